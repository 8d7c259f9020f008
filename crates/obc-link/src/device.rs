//! Byte-stream devices the link workers read from and write to.

use bytes::{Buf, BytesMut};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shortest read timeout handed to the OS; zero would mean "block forever".
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// A bidirectional byte stream shared by the RX and TX workers.
///
/// All methods take `&self` so both workers can hold one `Arc<dyn Device>`.
pub trait Device: Send + Sync {
    /// Open the device.
    fn connect(&self) -> io::Result<()>;

    fn is_open(&self) -> bool;

    /// Read whatever is available, waiting at most `timeout`.
    ///
    /// Returns `Ok(0)` when the timeout expires. A peer that has gone away is
    /// reported as an error and leaves the device closed.
    fn read_chunk(&self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    fn write_all(&self, data: &[u8]) -> io::Result<()>;

    /// Close the device. Unblocks a pending `read_chunk`.
    fn close(&self);

    /// Human-readable name for logs and errors.
    fn describe(&self) -> String;
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "device is not open")
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

// ============================================================================
// TCP
// ============================================================================

/// A UART exposed over TCP, as served by serial-to-network bridges and the
/// OBC simulator.
pub struct TcpDevice {
    address: String,
    connect_timeout: Duration,
    reader: Mutex<Option<TcpStream>>,
    writer: Mutex<Option<TcpStream>>,
    /// Kept apart from the reader so `close` never waits on a blocked read.
    control: Mutex<Option<TcpStream>>,
    open: AtomicBool,
}

impl TcpDevice {
    pub fn new(address: impl Into<String>) -> Self {
        TcpDevice {
            address: address.into(),
            connect_timeout: Duration::from_secs(5),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            control: Mutex::new(None),
            open: AtomicBool::new(false),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn open_stream(&self) -> io::Result<TcpStream> {
        let mut last_err = None;
        for addr in self.address.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing")
        }))
    }
}

impl Device for TcpDevice {
    fn connect(&self) -> io::Result<()> {
        let stream = self.open_stream()?;
        stream.set_nodelay(true)?;
        let writer = stream.try_clone()?;
        let control = stream.try_clone()?;
        *self.reader.lock() = Some(stream);
        *self.writer.lock() = Some(writer);
        *self.control.lock() = Some(control);
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn read_chunk(&self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let mut guard = self.reader.lock();
        let stream = guard.as_mut().ok_or_else(not_connected)?;
        stream.set_read_timeout(Some(timeout.max(MIN_READ_TIMEOUT)))?;
        match stream.read(buf) {
            Ok(0) => {
                drop(guard);
                self.close();
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by peer",
                ))
            }
            Ok(n) => Ok(n),
            Err(e) if is_timeout(&e) => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write_all(&self, data: &[u8]) -> io::Result<()> {
        let mut guard = self.writer.lock();
        let stream = guard.as_mut().ok_or_else(not_connected)?;
        stream.write_all(data)?;
        stream.flush()
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
        if let Some(stream) = self.control.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.writer.lock().take();
        if let Some(mut reader) = self.reader.try_lock() {
            reader.take();
        }
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.address)
    }
}

// ============================================================================
// In-memory pipe
// ============================================================================

/// One end of an in-process byte pipe.
///
/// Bytes written to one end are read from the other. Closing either end
/// makes the other end's writes fail at once and its reads fail once it has
/// drained.
pub struct MemoryDevice {
    name: String,
    tx: Mutex<Option<Sender<Vec<u8>>>>,
    rx: Receiver<Vec<u8>>,
    pending: Mutex<BytesMut>,
    open: AtomicBool,
    /// Shared by both ends; set when either closes.
    broken: Arc<AtomicBool>,
}

impl MemoryDevice {
    /// Create two connected ends, `a` and `b`.
    pub fn pair() -> (MemoryDevice, MemoryDevice) {
        let (a_tx, b_rx) = crossbeam_channel::unbounded();
        let (b_tx, a_rx) = crossbeam_channel::unbounded();
        let broken = Arc::new(AtomicBool::new(false));
        let end = |name: &str, tx, rx| MemoryDevice {
            name: name.to_string(),
            tx: Mutex::new(Some(tx)),
            rx,
            pending: Mutex::new(BytesMut::new()),
            open: AtomicBool::new(false),
            broken: Arc::clone(&broken),
        };
        (end("memory:a", a_tx, a_rx), end("memory:b", b_tx, b_rx))
    }

    fn take_pending(&self, buf: &mut [u8]) -> usize {
        let mut pending = self.pending.lock();
        let n = pending.len().min(buf.len());
        buf[..n].copy_from_slice(&pending[..n]);
        pending.advance(n);
        n
    }
}

impl Device for MemoryDevice {
    fn connect(&self) -> io::Result<()> {
        if self.tx.lock().is_none() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "memory device was closed",
            ));
        }
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn read_chunk(&self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        if !self.is_open() {
            return Err(not_connected());
        }
        let n = self.take_pending(buf);
        if n > 0 {
            return Ok(n);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(chunk) => {
                self.pending.lock().extend_from_slice(&chunk);
                Ok(self.take_pending(buf))
            }
            Err(RecvTimeoutError::Timeout) => Ok(0),
            Err(RecvTimeoutError::Disconnected) => {
                self.close();
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed the pipe",
                ))
            }
        }
    }

    fn write_all(&self, data: &[u8]) -> io::Result<()> {
        if !self.is_open() {
            return Err(not_connected());
        }
        let sent = match self.tx.lock().as_ref() {
            Some(tx) if !self.broken.load(Ordering::Acquire) => tx.send(data.to_vec()).is_ok(),
            _ => false,
        };
        if !sent {
            self.close();
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer closed the pipe"));
        }
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
        self.broken.store(true, Ordering::Release);
        self.tx.lock().take();
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}
