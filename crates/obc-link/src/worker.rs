//! RX and TX worker threads moving bytes between a device and the fabric.

use crate::device::Device;
use crate::error::LinkError;
use crate::fabric::{PacketDest, PacketSource};
use obc_metrics::{metric_defs, LinkLabels};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// How often a joining thread is checked for completion.
const JOIN_POLL: Duration = Duration::from_millis(5);

/// Timing and buffer settings for the device workers.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Upper bound on every blocking read, and so on stop latency.
    pub poll_interval: Duration,
    /// How long `stop` waits for each thread before giving up on it.
    pub join_timeout: Duration,
    /// Size of the RX read buffer.
    pub read_buffer: usize,
    /// Metric labels for this link.
    pub labels: LinkLabels,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            poll_interval: Duration::from_millis(50),
            join_timeout: Duration::from_secs(2),
            read_buffer: 512,
            labels: LinkLabels::new("serial", "unknown"),
        }
    }
}

/// Spawn a named thread, mapping spawn failure into a [`LinkError`].
pub(crate) fn spawn_named<F>(name: &'static str, body: F) -> Result<JoinHandle<()>, LinkError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(|e| LinkError::Spawn {
            thread: name,
            message: e.to_string(),
        })
}

/// Wait up to `timeout` for a thread to finish.
///
/// Returns false if the thread was left running.
pub(crate) fn join_bounded(name: &str, handle: JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(JOIN_POLL);
    }
    if handle.join().is_err() {
        error!(thread = name, "worker thread panicked");
    }
    true
}

/// The RX and TX threads of one open device.
///
/// Dropping the workers stops them.
pub struct DeviceWorkers {
    device: Arc<dyn Device>,
    stop: Arc<AtomicBool>,
    threads: Vec<(&'static str, JoinHandle<()>)>,
    join_timeout: Duration,
}

impl DeviceWorkers {
    /// Connect `device` and start moving bytes.
    ///
    /// Chunks read from the device go to `rx_dest`; byte strings read from
    /// `tx_source` are written to the device. Threads are only spawned once
    /// the device is open.
    pub fn start<D, S>(
        device: Arc<dyn Device>,
        rx_dest: D,
        tx_source: S,
        config: WorkerConfig,
    ) -> Result<Self, LinkError>
    where
        D: PacketDest<Vec<u8>> + 'static,
        S: PacketSource<Vec<u8>> + 'static,
    {
        let description = device.describe();
        if device.is_open() {
            return Err(LinkError::AlreadyConnected {
                device: description,
            });
        }
        device.connect().map_err(|e| LinkError::Connect {
            device: description.clone(),
            message: e.to_string(),
        })?;
        info!(device = %description, "device connected");

        let stop = Arc::new(AtomicBool::new(false));
        let mut workers = DeviceWorkers {
            device: Arc::clone(&device),
            stop: Arc::clone(&stop),
            threads: Vec::with_capacity(2),
            join_timeout: config.join_timeout,
        };

        let rx = {
            let device = Arc::clone(&device);
            let stop = Arc::clone(&stop);
            let config = config.clone();
            spawn_named("obc-rx", move || rx_loop(device, rx_dest, stop, config))
        };
        match rx {
            Ok(handle) => workers.threads.push(("obc-rx", handle)),
            Err(e) => {
                device.close();
                return Err(e);
            }
        }

        let tx = {
            let device = Arc::clone(&device);
            let stop = Arc::clone(&stop);
            spawn_named("obc-tx", move || tx_loop(device, tx_source, stop, config))
        };
        match tx {
            Ok(handle) => workers.threads.push(("obc-tx", handle)),
            Err(e) => {
                // Dropping the workers stops the RX thread.
                device.close();
                return Err(e);
            }
        }

        Ok(workers)
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    /// Whether both threads are still running.
    pub fn is_running(&self) -> bool {
        !self.threads.is_empty() && self.threads.iter().all(|(_, h)| !h.is_finished())
    }

    /// Stop both threads, leaving the device open.
    ///
    /// A thread that does not exit within the join timeout is detached; the
    /// device is then closed to unblock it. Returns false in that case.
    pub fn stop(&mut self) -> bool {
        self.stop.store(true, Ordering::Release);
        let mut clean = true;
        for (name, handle) in self.threads.drain(..) {
            if !join_bounded(name, handle, self.join_timeout) {
                error!(
                    thread = name,
                    timeout = ?self.join_timeout,
                    device = %self.device.describe(),
                    "worker did not stop in time; closing device and detaching it"
                );
                self.device.close();
                clean = false;
            }
        }
        clean
    }
}

impl Drop for DeviceWorkers {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            self.stop();
        }
    }
}

fn rx_loop<D: PacketDest<Vec<u8>>>(
    device: Arc<dyn Device>,
    dest: D,
    stop: Arc<AtomicBool>,
    config: WorkerConfig,
) {
    let labels = config.labels.to_labels();
    let mut buf = vec![0u8; config.read_buffer.max(1)];
    debug!(device = %device.describe(), "rx worker started");

    while !stop.load(Ordering::Acquire) {
        match device.read_chunk(&mut buf, config.poll_interval) {
            Ok(0) => {}
            Ok(n) => {
                trace!(len = n, data = %hex::encode(&buf[..n]), "rx");
                metrics::counter!(metric_defs::LINK_RX_BYTES.name, &labels).increment(n as u64);
                if let Err(e) = dest.write(buf[..n].to_vec()) {
                    debug!(error = %e, "rx destination gone");
                    break;
                }
            }
            Err(e) => {
                if !device.is_open() {
                    info!(device = %device.describe(), error = %e, "device closed");
                    break;
                }
                warn!(device = %device.describe(), error = %e, "read failed");
                metrics::counter!(
                    metric_defs::LINK_IO_ERRORS.name,
                    &config.labels.with(&[("direction", "rx".to_string())])
                )
                .increment(1);
                thread::sleep(config.poll_interval);
            }
        }
    }
    debug!("rx worker exiting");
}

fn tx_loop<S: PacketSource<Vec<u8>>>(
    device: Arc<dyn Device>,
    mut source: S,
    stop: Arc<AtomicBool>,
    config: WorkerConfig,
) {
    let labels = config.labels.to_labels();
    debug!(device = %device.describe(), "tx worker started");

    'outer: while !stop.load(Ordering::Acquire) {
        for packet in source.read(config.poll_interval) {
            match device.write_all(&packet) {
                Ok(()) => {
                    trace!(len = packet.len(), data = %hex::encode(&packet), "tx");
                    metrics::counter!(metric_defs::LINK_TX_BYTES.name, &labels)
                        .increment(packet.len() as u64);
                }
                Err(e) => {
                    if !device.is_open() {
                        info!(device = %device.describe(), error = %e, "device closed");
                        break 'outer;
                    }
                    warn!(device = %device.describe(), error = %e, "write failed");
                    metrics::counter!(
                        metric_defs::LINK_IO_ERRORS.name,
                        &config.labels.with(&[("direction", "tx".to_string())])
                    )
                    .increment(1);
                }
            }
        }
        if source.is_closed() {
            debug!("tx source closed");
            break;
        }
    }
    debug!("tx worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDevice;
    use crate::error::FabricError;
    use crate::fabric::QueueBridge;

    fn config() -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(10),
            join_timeout: Duration::from_secs(1),
            read_buffer: 4,
            labels: LinkLabels::new("serial", "memory"),
        }
    }

    #[test]
    fn test_bytes_flow_both_ways() {
        let (ours, theirs) = MemoryDevice::pair();
        theirs.connect().unwrap();
        let ours: Arc<dyn Device> = Arc::new(ours);

        let mut rx = QueueBridge::new(0);
        let tx = QueueBridge::new(0);
        let mut workers =
            DeviceWorkers::start(Arc::clone(&ours), rx.clone(), tx.clone(), config()).unwrap();
        assert!(workers.is_running());

        tx.write(vec![1, 2, 3]).unwrap();
        let mut buf = [0u8; 8];
        let mut n = 0;
        while n == 0 {
            n = theirs.read_chunk(&mut buf, Duration::from_millis(100)).unwrap();
        }
        assert_eq!(&buf[..n], &[1, 2, 3]);

        theirs.write_all(&[9, 8, 7, 6, 5]).unwrap();
        let mut got = Vec::new();
        while got.len() < 5 {
            for chunk in rx.read(Duration::from_millis(100)) {
                assert!(chunk.len() <= 4);
                got.extend(chunk);
            }
        }
        assert_eq!(got, vec![9, 8, 7, 6, 5]);

        assert!(workers.stop());
        assert!(!workers.is_running());
        assert!(ours.is_open());
    }

    #[test]
    fn test_already_connected() {
        let (ours, _theirs) = MemoryDevice::pair();
        ours.connect().unwrap();
        let err = DeviceWorkers::start(
            Arc::new(ours),
            QueueBridge::<Vec<u8>>::new(0),
            QueueBridge::<Vec<u8>>::new(0),
            config(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, LinkError::AlreadyConnected { .. }));
    }

    #[test]
    fn test_connect_failure_spawns_nothing() {
        let (ours, _theirs) = MemoryDevice::pair();
        ours.close();
        let err = DeviceWorkers::start(
            Arc::new(ours),
            QueueBridge::<Vec<u8>>::new(0),
            QueueBridge::<Vec<u8>>::new(0),
            config(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, LinkError::Connect { .. }));
    }

    #[test]
    fn test_workers_exit_when_peer_closes() {
        let (ours, theirs) = MemoryDevice::pair();
        theirs.connect().unwrap();
        let ours: Arc<dyn Device> = Arc::new(ours);
        let mut workers = DeviceWorkers::start(
            Arc::clone(&ours),
            QueueBridge::<Vec<u8>>::new(0),
            QueueBridge::<Vec<u8>>::new(0),
            config(),
        )
        .unwrap();

        drop(theirs);
        let deadline = Instant::now() + Duration::from_secs(1);
        while ours.is_open() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!ours.is_open());
        assert!(workers.stop());
    }

    #[test]
    fn test_stop_escape_hatch_closes_device() {
        /// A destination that never returns.
        struct Stuck;
        impl PacketDest<Vec<u8>> for Stuck {
            fn write(&self, _item: Vec<u8>) -> Result<(), FabricError> {
                loop {
                    thread::sleep(Duration::from_secs(60));
                }
            }
        }

        let (ours, theirs) = MemoryDevice::pair();
        theirs.connect().unwrap();
        let ours: Arc<dyn Device> = Arc::new(ours);
        let mut cfg = config();
        cfg.join_timeout = Duration::from_millis(50);
        let mut workers =
            DeviceWorkers::start(Arc::clone(&ours), Stuck, QueueBridge::<Vec<u8>>::new(0), cfg)
                .unwrap();

        theirs.write_all(&[1]).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(!workers.stop());
        assert!(!ours.is_open());
    }
}
