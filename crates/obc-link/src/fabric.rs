//! Routing fabric: sources, destinations and the queues between them.
//!
//! Every stage of a link reads from a [`PacketSource`] and writes to a
//! [`PacketDest`]. Threads are connected by [`QueueBridge`]s; fan-out to
//! several consumers goes through a [`MultiDest`]; framing is layered on with
//! [`ProtocolPacketSource`] and [`ProtocolPacketDest`].

use crate::error::FabricError;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use obc_packet::{FrameFormat, StreamParser};
use parking_lot::RwLock;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Largest number of items returned by one [`QueueBridge`] read.
pub const MAX_BATCH: usize = 64;

// ============================================================================
// Traits
// ============================================================================

/// Something items can be read from.
pub trait PacketSource<T>: Send {
    /// Wait at most `timeout` for the first item, then return it together
    /// with whatever else is immediately available.
    ///
    /// An empty result means the timeout expired or the source is closed.
    fn read(&mut self, timeout: Duration) -> Vec<T>;

    /// Whether the source will never produce another item.
    fn is_closed(&self) -> bool;
}

/// Something items can be written to.
pub trait PacketDest<T>: Send + Sync {
    fn write(&self, item: T) -> Result<(), FabricError>;
}

impl<T, D: PacketDest<T> + ?Sized> PacketDest<T> for Arc<D> {
    fn write(&self, item: T) -> Result<(), FabricError> {
        (**self).write(item)
    }
}

impl<T, S: PacketSource<T> + ?Sized> PacketSource<T> for Box<S> {
    fn read(&mut self, timeout: Duration) -> Vec<T> {
        (**self).read(timeout)
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }
}

// ============================================================================
// Queue bridge
// ============================================================================

/// What travels through a [`QueueBridge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item<T> {
    Data(T),
    /// No more data follows.
    End,
}

/// What a full bounded queue does with a new item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Overflow {
    /// The writer waits for space.
    #[default]
    Block,
    /// The item is dropped and counted.
    Drop,
}

#[derive(Debug, Default)]
struct BridgeState {
    /// Writers are refused.
    closed: AtomicBool,
    /// A reader has seen the end of the queue.
    ended: AtomicBool,
    dropped: AtomicU64,
}

/// A thread-safe queue usable as both a source and a destination.
///
/// Clones share the same queue. Capacity 0 means unbounded.
#[derive(Debug)]
pub struct QueueBridge<T> {
    tx: Sender<Item<T>>,
    rx: Receiver<Item<T>>,
    state: Arc<BridgeState>,
    overflow: Overflow,
}

impl<T> Clone for QueueBridge<T> {
    fn clone(&self) -> Self {
        QueueBridge {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            state: Arc::clone(&self.state),
            overflow: self.overflow,
        }
    }
}

impl<T: Send> QueueBridge<T> {
    /// Create a queue whose writers block while it is full.
    pub fn new(capacity: usize) -> Self {
        Self::with_overflow(capacity, Overflow::Block)
    }

    /// Create a queue that drops new items while it is full.
    pub fn lossy(capacity: usize) -> Self {
        Self::with_overflow(capacity, Overflow::Drop)
    }

    pub fn with_overflow(capacity: usize, overflow: Overflow) -> Self {
        let (tx, rx) = if capacity == 0 {
            crossbeam_channel::unbounded()
        } else {
            crossbeam_channel::bounded(capacity)
        };
        QueueBridge {
            tx,
            rx,
            state: Arc::new(BridgeState::default()),
            overflow,
        }
    }

    /// Refuse further writes and mark the end of the queue.
    ///
    /// Items already queued can still be read.
    pub fn close(&self) {
        if self.state.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // A full queue has no room for the marker; readers also notice the
        // closed flag once the queue drains.
        let _ = self.tx.try_send(Item::End);
    }

    /// Take everything currently queued without waiting.
    pub fn drain(&self) -> Vec<T> {
        let mut items = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(Item::Data(item)) => items.push(item),
                Ok(Item::End) => {
                    self.state.ended.store(true, Ordering::Release);
                    break;
                }
                Err(_) => break,
            }
        }
        items
    }

    /// Items waiting in the queue, end marker included.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Items refused because a lossy queue was full.
    pub fn dropped(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }

    fn mark_ended_if_drained(&self) -> bool {
        if self.state.closed.load(Ordering::Acquire) && self.rx.is_empty() {
            self.state.ended.store(true, Ordering::Release);
            return true;
        }
        false
    }
}

impl<T: Send> PacketSource<T> for QueueBridge<T> {
    fn read(&mut self, timeout: Duration) -> Vec<T> {
        let mut items = Vec::new();
        if self.is_closed() || self.mark_ended_if_drained() {
            return items;
        }

        match self.rx.recv_timeout(timeout) {
            Ok(Item::Data(item)) => items.push(item),
            Ok(Item::End) | Err(RecvTimeoutError::Disconnected) => {
                self.state.ended.store(true, Ordering::Release);
                return items;
            }
            Err(RecvTimeoutError::Timeout) => {
                self.mark_ended_if_drained();
                return items;
            }
        }

        while items.len() < MAX_BATCH {
            match self.rx.try_recv() {
                Ok(Item::Data(item)) => items.push(item),
                Ok(Item::End) | Err(TryRecvError::Disconnected) => {
                    self.state.ended.store(true, Ordering::Release);
                    break;
                }
                Err(TryRecvError::Empty) => break,
            }
        }
        items
    }

    fn is_closed(&self) -> bool {
        self.state.ended.load(Ordering::Acquire)
    }
}

impl<T: Send> PacketDest<T> for QueueBridge<T> {
    fn write(&self, item: T) -> Result<(), FabricError> {
        if self.state.closed.load(Ordering::Acquire) {
            return Err(FabricError::Closed);
        }
        match self.overflow {
            Overflow::Block => self
                .tx
                .send(Item::Data(item))
                .map_err(|_| FabricError::Disconnected),
            Overflow::Drop => match self.tx.try_send(Item::Data(item)) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    self.state.dropped.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
                Err(TrySendError::Disconnected(_)) => Err(FabricError::Disconnected),
            },
        }
    }
}

// ============================================================================
// Fan-out
// ============================================================================

/// Handle for removing a destination from a [`MultiDest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DestId(u64);

/// Copies every item to each registered destination.
pub struct MultiDest<T> {
    dests: RwLock<Vec<(DestId, Arc<dyn PacketDest<T>>)>>,
    next_id: AtomicU64,
}

impl<T: Clone> MultiDest<T> {
    pub fn new() -> Self {
        MultiDest {
            dests: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn add(&self, dest: Arc<dyn PacketDest<T>>) -> DestId {
        let id = DestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.dests.write().push((id, dest));
        id
    }

    /// Returns false if the id was not registered.
    pub fn remove(&self, id: DestId) -> bool {
        let mut dests = self.dests.write();
        let before = dests.len();
        dests.retain(|(dest_id, _)| *dest_id != id);
        dests.len() != before
    }

    pub fn len(&self) -> usize {
        self.dests.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.dests.read().is_empty()
    }
}

impl<T: Clone> Default for MultiDest<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync> PacketDest<T> for MultiDest<T> {
    /// Never fails; destinations that refuse the item are unregistered.
    fn write(&self, item: T) -> Result<(), FabricError> {
        let snapshot: Vec<_> = self.dests.read().clone();
        let closed: Vec<DestId> = snapshot
            .iter()
            .filter(|(_, dest)| dest.write(item.clone()).is_err())
            .map(|(id, _)| *id)
            .collect();
        if !closed.is_empty() {
            self.dests.write().retain(|(id, _)| !closed.contains(id));
        }
        Ok(())
    }
}

/// A queue registered with a [`MultiDest`], unregistered when dropped.
pub struct Subscription<T: Clone + Send + Sync + 'static> {
    queue: QueueBridge<T>,
    parent: Weak<MultiDest<T>>,
    id: DestId,
}

impl<T: Clone + Send + Sync + 'static> Subscription<T> {
    /// Register a new queue with `parent`.
    pub fn new(parent: &Arc<MultiDest<T>>, queue: QueueBridge<T>) -> Self {
        let id = parent.add(Arc::new(queue.clone()));
        Subscription {
            queue,
            parent: Arc::downgrade(parent),
            id,
        }
    }

    pub fn id(&self) -> DestId {
        self.id
    }

    /// Items this subscriber missed because its queue was full.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }
}

impl<T: Clone + Send + Sync + 'static> PacketSource<T> for Subscription<T> {
    fn read(&mut self, timeout: Duration) -> Vec<T> {
        self.queue.read(timeout)
    }

    fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}

impl<T: Clone + Send + Sync + 'static> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(parent) = self.parent.upgrade() {
            parent.remove(self.id);
        }
        self.queue.close();
    }
}

// ============================================================================
// Framing adapters
// ============================================================================

/// Parses frames out of an upstream byte-chunk source.
pub struct ProtocolPacketSource<F: FrameFormat, S> {
    parser: StreamParser<F>,
    upstream: S,
}

impl<F: FrameFormat, S: PacketSource<Vec<u8>>> ProtocolPacketSource<F, S> {
    pub fn new(format: F, upstream: S) -> Self {
        ProtocolPacketSource {
            parser: StreamParser::new(format),
            upstream,
        }
    }

    pub fn parser(&self) -> &StreamParser<F> {
        &self.parser
    }
}

impl<F, S> PacketSource<F::Packet> for ProtocolPacketSource<F, S>
where
    F: FrameFormat + Send,
    F::State: Send,
    S: PacketSource<Vec<u8>>,
{
    fn read(&mut self, timeout: Duration) -> Vec<F::Packet> {
        let mut frames = Vec::new();
        for chunk in self.upstream.read(timeout) {
            frames.extend(self.parser.push(&chunk));
        }
        frames
    }

    fn is_closed(&self) -> bool {
        self.upstream.is_closed()
    }
}

/// Serializes frames and writes the bytes downstream.
pub struct ProtocolPacketDest<F, D> {
    format: F,
    downstream: D,
}

impl<F: FrameFormat, D: PacketDest<Vec<u8>>> ProtocolPacketDest<F, D> {
    pub fn new(format: F, downstream: D) -> Self {
        ProtocolPacketDest { format, downstream }
    }
}

impl<F, D> PacketDest<F::Packet> for ProtocolPacketDest<F, D>
where
    F: FrameFormat + Send + Sync,
    D: PacketDest<Vec<u8>>,
{
    fn write(&self, packet: F::Packet) -> Result<(), FabricError> {
        self.downstream.write(self.format.encode(&packet))
    }
}

/// Maps each item of an inner source, skipping items the map rejects.
///
/// Used to turn relay frames back into the byte chunks of the serial stream
/// they carry.
pub struct MapSource<S, F, T> {
    inner: S,
    map: F,
    _input: PhantomData<fn(T)>,
}

impl<S, F, T> MapSource<S, F, T> {
    pub fn new(inner: S, map: F) -> Self {
        MapSource {
            inner,
            map,
            _input: PhantomData,
        }
    }
}

impl<T, U, S, F> PacketSource<U> for MapSource<S, F, T>
where
    S: PacketSource<T>,
    F: FnMut(T) -> Option<U> + Send,
{
    fn read(&mut self, timeout: Duration) -> Vec<U> {
        self.inner
            .read(timeout)
            .into_iter()
            .filter_map(&mut self.map)
            .collect()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// Maps each item before writing it to an inner destination.
pub struct MapDest<D, F> {
    inner: D,
    map: F,
}

impl<D, F> MapDest<D, F> {
    pub fn new(inner: D, map: F) -> Self {
        MapDest { inner, map }
    }
}

impl<T, U, D, F> PacketDest<T> for MapDest<D, F>
where
    D: PacketDest<U>,
    F: Fn(T) -> U + Send + Sync,
{
    fn write(&self, item: T) -> Result<(), FabricError> {
        self.inner.write((self.map)(item))
    }
}
