//! The OBC client: one connected link and the commands sent over it.
//!
//! ## Threads
//!
//! | thread          | reads                | writes                          |
//! |-----------------|----------------------|---------------------------------|
//! | `obc-rx`        | device               | raw RX queue                    |
//! | `obc-tx`        | outbound queue       | device                          |
//! | `obc-dispatch`  | raw RX queue, parsed | response queue, log fan-out     |
//! | `obc-correlate` | log subscription     | pending scheduled responses     |
//!
//! Commands themselves run on the caller's thread.

use crate::config::{ClientConfig, LinkKind};
use crate::correlation::{Correlator, PendingResponse};
use crate::device::{Device, TcpDevice};
use crate::error::{LinkError, ResponseError};
use crate::fabric::{
    MapDest, MapSource, MultiDest, PacketDest, PacketSource, ProtocolPacketDest,
    ProtocolPacketSource, QueueBridge, Subscription,
};
use crate::worker::{join_bounded, spawn_named, DeviceWorkers};
use obc_fields::{FieldValue, ObcDateTime, Record};
use obc_metrics::metric_defs;
use obc_packet::{
    CommandPacket, LogEntry, ObcPacket, Packet, RelayFormat, RelayFrame, ResponsePacket,
    ResultCode, SerialFormat, SerialFrame,
};
use obc_spec::{CommandSpec, Key, LogLevel, Response, SpecError, SpecSet, TaskTrace};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

// ============================================================================
// Results
// ============================================================================

/// What `send_command` produced.
#[derive(Debug)]
pub enum CommandOutcome {
    /// The command ran immediately.
    Immediate(Response),
    /// The command was scheduled; its response arrives later.
    Scheduled(PendingResponse),
}

impl CommandOutcome {
    /// The response, waiting up to `timeout` for a scheduled one.
    pub fn wait(&self, timeout: Option<Duration>) -> Option<Result<Response, ResponseError>> {
        match self {
            CommandOutcome::Immediate(response) => Some(Ok(response.clone())),
            CommandOutcome::Scheduled(pending) => pending.wait(timeout),
        }
    }
}

/// Stack usage of one RTOS task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackUsage {
    pub task: String,
    pub task_id: u8,
    /// Configured stack size.
    pub stack_size: u32,
    /// Least free stack seen since boot.
    pub high_water: u32,
}

/// A log entry decoded with the log registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedLog {
    pub group: String,
    pub signal: String,
    pub level: LogLevel,
    pub timestamp: ObcDateTime,
    pub record: Record,
}

impl std::fmt::Display for DecodedLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} {}.{} {}",
            self.timestamp, self.level, self.group, self.signal, self.record
        )
    }
}

/// A queue of log entries, registered with the client until dropped.
pub struct LogListener {
    subscription: Subscription<LogEntry>,
    buffered: VecDeque<LogEntry>,
    reported_drops: u64,
}

impl LogListener {
    fn new(subscription: Subscription<LogEntry>) -> Self {
        LogListener {
            subscription,
            buffered: VecDeque::new(),
            reported_drops: 0,
        }
    }

    /// The next entry, waiting at most `timeout`.
    pub fn recv(&mut self, timeout: Duration) -> Option<LogEntry> {
        if self.buffered.is_empty() {
            let batch = self.subscription.read(timeout);
            self.buffered.extend(batch);
            self.report_drops();
        }
        self.buffered.pop_front()
    }

    /// Every entry available within `timeout`.
    pub fn read(&mut self, timeout: Duration) -> Vec<LogEntry> {
        let mut entries: Vec<LogEntry> = self.buffered.drain(..).collect();
        if entries.is_empty() {
            entries = self.subscription.read(timeout);
        }
        self.report_drops();
        entries
    }

    /// Entries this listener missed because its queue was full.
    pub fn dropped(&self) -> u64 {
        self.subscription.dropped()
    }

    /// Whether the client has closed.
    pub fn is_closed(&self) -> bool {
        self.buffered.is_empty() && self.subscription.is_closed()
    }

    fn report_drops(&mut self) {
        let dropped = self.subscription.dropped();
        if dropped > self.reported_drops {
            let missed = dropped - self.reported_drops;
            warn!(missed, "log listener queue full; entries dropped");
            metrics::counter!(metric_defs::LOGS_DROPPED.name).increment(missed);
            self.reported_drops = dropped;
        }
    }
}

impl PacketSource<LogEntry> for LogListener {
    fn read(&mut self, timeout: Duration) -> Vec<LogEntry> {
        LogListener::read(self, timeout)
    }

    fn is_closed(&self) -> bool {
        LogListener::is_closed(self)
    }
}

// ============================================================================
// Client
// ============================================================================

struct Exchange {
    seq: u8,
    responses: QueueBridge<ResponsePacket>,
}

/// A connected OBC link.
///
/// Immediate commands are serialized: one exchange is in flight at a time.
/// Scheduled commands return as soon as they are acknowledged.
pub struct ObcClient {
    specs: Arc<SpecSet>,
    config: ClientConfig,
    device: Arc<dyn Device>,
    workers: Mutex<Option<DeviceWorkers>>,
    outbound: Box<dyn PacketDest<SerialFrame>>,
    tx_queue: QueueBridge<Vec<u8>>,
    raw_rx: QueueBridge<Vec<u8>>,
    responses: QueueBridge<ResponsePacket>,
    logs: Arc<MultiDest<LogEntry>>,
    correlator: Arc<Correlator>,
    exchange: Mutex<Exchange>,
    stop: Arc<AtomicBool>,
    threads: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    closed: AtomicBool,
}

impl ObcClient {
    /// Load the configured spec files and connect over TCP.
    pub fn from_config(config: ClientConfig) -> Result<Self, LinkError> {
        let specs = config.specs.load()?;
        Self::connect_tcp(specs, config)
    }

    /// Connect to the TCP-exposed UART at `config.link.address`.
    pub fn connect_tcp(specs: SpecSet, config: ClientConfig) -> Result<Self, LinkError> {
        let device = TcpDevice::new(config.link.address.clone())
            .with_connect_timeout(config.link.connect_timeout());
        Self::connect(Arc::new(device), specs, config)
    }

    /// Open `device` and start the link threads.
    pub fn connect(
        device: Arc<dyn Device>,
        specs: SpecSet,
        config: ClientConfig,
    ) -> Result<Self, LinkError> {
        let kind = config.link.kind;
        let tx_queue = QueueBridge::new(config.link.tx_queue_size);
        let raw_rx = QueueBridge::new(config.link.rx_queue_size);
        let responses = QueueBridge::lossy(config.response_queue_size.max(1));
        let logs = Arc::new(MultiDest::new());
        let correlator = Arc::new(Correlator::new(config.scheduled_response));
        // Subscribed before any traffic can arrive.
        let correlation_logs = Subscription::new(&logs, QueueBridge::new(0));

        let workers = DeviceWorkers::start(
            Arc::clone(&device),
            raw_rx.clone(),
            tx_queue.clone(),
            config.link.worker_config(),
        )?;

        let poll = config.link.poll_interval();
        let stop = Arc::new(AtomicBool::new(false));
        let client = ObcClient {
            specs: Arc::new(specs),
            outbound: outbound_dest(kind, tx_queue.clone()),
            device,
            workers: Mutex::new(Some(workers)),
            tx_queue,
            raw_rx: raw_rx.clone(),
            responses: responses.clone(),
            logs: Arc::clone(&logs),
            correlator: Arc::clone(&correlator),
            exchange: Mutex::new(Exchange {
                seq: 0,
                responses: responses.clone(),
            }),
            stop: Arc::clone(&stop),
            threads: Mutex::new(Vec::with_capacity(2)),
            closed: AtomicBool::new(false),
            config,
        };

        // On failure the client is dropped, which closes everything started so far.
        let dispatch = {
            let frames = inbound_frames(kind, raw_rx);
            let stop = Arc::clone(&stop);
            spawn_named("obc-dispatch", move || {
                dispatch_loop(frames, responses, logs, stop, poll)
            })?
        };
        client.threads.lock().push(("obc-dispatch", dispatch));

        let correlate = spawn_named("obc-correlate", move || {
            correlate_loop(correlation_logs, correlator, stop, poll)
        })?;
        client.threads.lock().push(("obc-correlate", correlate));

        info!(
            device = %client.device.describe(),
            link = %kind,
            commands = client.specs.commands.len(),
            log_groups = client.specs.logs.len(),
            "link up"
        );
        Ok(client)
    }

    pub fn specs(&self) -> &SpecSet {
        &self.specs
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.device.is_open()
    }

    /// Scheduled commands still waiting for their response.
    pub fn pending_count(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Send a command.
    ///
    /// With [`ObcDateTime::IMMEDIATE`] the command runs now and its decoded
    /// response is returned. Any other date/time schedules it; the returned
    /// [`PendingResponse`] resolves when the OBC reports execution.
    /// `timeout` bounds the wait for the immediate response or
    /// acknowledgement and defaults to the configured command timeout.
    pub fn send_command<'a>(
        &self,
        command: impl Into<Key<'a>>,
        args: &[FieldValue],
        date_time: ObcDateTime,
        timeout: Option<Duration>,
    ) -> Result<CommandOutcome, ResponseError> {
        let spec = self.specs.commands.get(command)?;
        let result = spec.encode_args(args).map_err(ResponseError::from).and_then(|body| {
            let timeout = timeout.unwrap_or_else(|| self.config.command_timeout());
            let response = self.exchange(spec, body, date_time, timeout)?;
            self.interpret(spec, date_time, response)
        });
        if let Err(e) = &result {
            debug!(command = spec.name(), error = %e, "command failed");
            metrics::counter!(
                metric_defs::COMMAND_ERRORS.name,
                "command" => spec.name().to_string(),
                "error" => e.kind()
            )
            .increment(1);
        }
        result
    }

    /// Send a command to run now and return its response.
    pub fn send_immediate<'a>(
        &self,
        command: impl Into<Key<'a>>,
        args: &[FieldValue],
    ) -> Result<Response, ResponseError> {
        match self.send_command(command, args, ObcDateTime::IMMEDIATE, None)? {
            CommandOutcome::Immediate(response) => Ok(response),
            CommandOutcome::Scheduled(pending) => Err(ResponseError::UnexpectedResponse {
                command: pending.command().to_string(),
                reason: "immediate command was scheduled".to_string(),
            }),
        }
    }

    /// Round-trip time of an immediate `ping`.
    pub fn ping(&self) -> Result<Duration, ResponseError> {
        let started = Instant::now();
        self.send_immediate("ping", &[])?;
        Ok(started.elapsed())
    }

    /// Reset the OBC.
    pub fn reset(&self) -> Result<(), ResponseError> {
        self.send_immediate("reset", &[]).map(|_| ())
    }

    /// Register a new log listener.
    ///
    /// The listener keeps at most `queue_size` entries (0 for no limit) and
    /// drops newer ones while full.
    pub fn add_log_listener(&self, queue_size: usize) -> LogListener {
        LogListener::new(Subscription::new(&self.logs, QueueBridge::lossy(queue_size)))
    }

    /// Stack high-water marks of every task the OBC reports.
    pub fn get_stack_usage(&self) -> Result<Vec<StackUsage>, ResponseError> {
        const COMMAND: &str = "get_stack_usage";
        let unexpected = |reason: &str| ResponseError::UnexpectedResponse {
            command: COMMAND.to_string(),
            reason: reason.to_string(),
        };

        let response = self.send_immediate(COMMAND, &[])?;
        let record = response.record().ok_or_else(|| unexpected("expected fields"))?;
        let mask = record
            .get("mask")
            .and_then(FieldValue::as_u64)
            .and_then(|m| u32::try_from(m).ok())
            .ok_or_else(|| unexpected("missing or invalid 'mask'"))?;
        let high_water = record
            .get("high_water")
            .and_then(FieldValue::as_array)
            .ok_or_else(|| unexpected("missing 'high_water' array"))?;

        self.specs
            .tasks
            .tasks_in_mask(mask)
            .into_iter()
            .map(|task| {
                let mark = high_water
                    .get(usize::from(task.id()))
                    .and_then(FieldValue::as_u64)
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(|| unexpected(&format!("no high-water mark for task {}", task.id())))?;
                Ok(StackUsage {
                    task: task.name().to_string(),
                    task_id: task.id(),
                    stack_size: task.stack_size(),
                    high_water: mark,
                })
            })
            .collect()
    }

    /// Capture `length` bytes of RTOS trace and reconstruct the schedule.
    pub fn capture_trace(&self, length: u16) -> Result<TaskTrace, ResponseError> {
        const COMMAND: &str = "capture_trace";
        let response = self.send_immediate(COMMAND, &[FieldValue::from(length)])?;
        let raw = response.raw().ok_or_else(|| ResponseError::UnexpectedResponse {
            command: COMMAND.to_string(),
            reason: "expected a raw response".to_string(),
        })?;
        Ok(TaskTrace::from_bytes(raw, &self.specs.tasks)?)
    }

    /// Decode a log entry's payload with the log registry.
    pub fn decode_log(&self, entry: &LogEntry) -> Result<DecodedLog, SpecError> {
        let (group, signal) = self.specs.logs.signal(entry.group, entry.signal)?;
        Ok(DecodedLog {
            group: group.name().to_string(),
            signal: signal.name().to_string(),
            level: signal.level(),
            timestamp: entry.timestamp,
            record: signal.decode(&entry.data)?,
        })
    }

    /// Stop every thread and close the device. Idempotent.
    ///
    /// Pending scheduled responses resolve to [`ResponseError::Cancelled`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(device = %self.device.describe(), "closing link");
        self.stop.store(true, Ordering::Release);
        if let Some(mut workers) = self.workers.lock().take() {
            workers.stop();
        }
        self.tx_queue.close();
        self.raw_rx.close();
        // Wakes a caller blocked on an immediate response.
        self.responses.close();

        let join_timeout = self.config.link.join_timeout();
        for (name, handle) in self.threads.lock().drain(..) {
            if !join_bounded(name, handle, join_timeout) {
                error!(thread = name, timeout = ?join_timeout, "thread did not stop in time; detaching it");
            }
        }
        self.correlator.cancel_all();
        self.device.close();
    }

    // ------------------------------------------------------------------------
    // Exchange
    // ------------------------------------------------------------------------

    fn exchange(
        &self,
        spec: &CommandSpec,
        args: Vec<u8>,
        date_time: ObcDateTime,
        timeout: Duration,
    ) -> Result<ResponsePacket, ResponseError> {
        let link_error = |source: LinkError| ResponseError::Link {
            command: spec.name().to_string(),
            source,
        };
        if self.closed.load(Ordering::Acquire) {
            return Err(link_error(LinkError::Closed));
        }

        let mut exchange = self.exchange.lock();
        let stale = exchange.responses.drain();
        if !stale.is_empty() {
            debug!(count = stale.len(), "discarding stale responses");
            metrics::counter!(metric_defs::RESPONSES_DISCARDED.name).increment(stale.len() as u64);
        }

        exchange.seq = exchange.seq.wrapping_add(1);
        let seq = exchange.seq;
        let packet = CommandPacket {
            seq,
            command_id: spec.id(),
            date_time,
            args,
        };
        let frame = SerialFrame::with_limit(packet.encode(), self.config.link.kind.max_payload())
            .map_err(|e| link_error(e.into()))?;

        let started = Instant::now();
        self.outbound.write(frame).map_err(|e| link_error(e.into()))?;
        let mode = if date_time.is_immediate() { "immediate" } else { "scheduled" };
        trace!(command = spec.name(), seq, mode, "command sent");
        metrics::counter!(
            metric_defs::COMMANDS_SENT.name,
            "command" => spec.name().to_string(),
            "mode" => mode
        )
        .increment(1);

        let deadline = started + timeout;
        let poll = self.config.link.poll_interval();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ResponseError::Timeout {
                    command: spec.name().to_string(),
                    timeout,
                });
            }
            for response in exchange.responses.read(remaining.min(poll)) {
                if response.seq == seq {
                    metrics::histogram!(
                        metric_defs::COMMAND_ROUND_TRIP.name,
                        "command" => spec.name().to_string()
                    )
                    .record(started.elapsed().as_micros() as f64);
                    return Ok(response);
                }
                debug!(expected = seq, received = response.seq, "discarding response with other sequence");
                metrics::counter!(metric_defs::RESPONSES_DISCARDED.name).increment(1);
            }
            if exchange.responses.is_closed() || !self.device.is_open() {
                return Err(link_error(LinkError::Closed));
            }
        }
    }

    fn interpret(
        &self,
        spec: &CommandSpec,
        date_time: ObcDateTime,
        response: ResponsePacket,
    ) -> Result<CommandOutcome, ResponseError> {
        let command = || spec.name().to_string();
        let code = response
            .result_byte()
            .ok_or_else(|| ResponseError::Short { command: command() })?;
        let result = ResultCode::from_byte(code).ok_or_else(|| ResponseError::UnknownResult {
            command: command(),
            code,
        })?;

        if date_time.is_immediate() {
            return match result {
                ResultCode::Success => Ok(CommandOutcome::Immediate(
                    spec.decode_success(response.data())?,
                )),
                result => Err(ResponseError::Rejected {
                    command: command(),
                    result,
                }),
            };
        }

        match (result, response.scheduled_uuid()) {
            (ResultCode::Scheduled, Some(uuid)) => {
                debug!(command = spec.name(), uuid, at = %date_time, "command scheduled");
                Ok(CommandOutcome::Scheduled(self.correlator.register(uuid, spec)?))
            }
            (ResultCode::Scheduled, None) => Err(ResponseError::UnexpectedResponse {
                command: command(),
                reason: "scheduled acknowledgement without a uuid".to_string(),
            }),
            (ResultCode::Success, _) => Err(ResponseError::NotScheduled {
                command: command(),
                result,
            }),
            (result, _) => Err(ResponseError::Rejected {
                command: command(),
                result,
            }),
        }
    }
}

impl Drop for ObcClient {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Link plumbing
// ============================================================================

/// Frames parsed out of the raw RX byte stream.
fn inbound_frames(kind: LinkKind, raw: QueueBridge<Vec<u8>>) -> Box<dyn PacketSource<SerialFrame>> {
    match kind {
        LinkKind::Serial => Box::new(ProtocolPacketSource::new(SerialFormat::serial(), raw)),
        LinkKind::Comms => {
            let relays = ProtocolPacketSource::new(RelayFormat, raw);
            let chunks =
                MapSource::<_, _, RelayFrame>::new(relays, |frame: RelayFrame| Some(frame.into_payload()));
            Box::new(ProtocolPacketSource::new(SerialFormat::comms(), chunks))
        }
    }
}

/// Where outbound frames are serialized into the TX queue.
fn outbound_dest(kind: LinkKind, tx: QueueBridge<Vec<u8>>) -> Box<dyn PacketDest<SerialFrame>> {
    match kind {
        LinkKind::Serial => Box::new(ProtocolPacketDest::new(SerialFormat::serial(), tx)),
        LinkKind::Comms => Box::new(MapDest::new(
            ProtocolPacketDest::new(RelayFormat, tx),
            |frame: SerialFrame| RelayFrame::from(frame),
        )),
    }
}

fn dispatch_loop(
    mut frames: Box<dyn PacketSource<SerialFrame>>,
    responses: QueueBridge<ResponsePacket>,
    logs: Arc<MultiDest<LogEntry>>,
    stop: Arc<AtomicBool>,
    poll: Duration,
) {
    debug!("dispatch started");
    while !stop.load(Ordering::Acquire) {
        for frame in frames.read(poll) {
            match ObcPacket::decode(frame.payload()) {
                Ok(ObcPacket::Response(response)) => {
                    trace!(seq = response.seq, len = response.body.len(), "response");
                    let _ = responses.write(response);
                }
                Ok(ObcPacket::Log(entry)) => {
                    trace!(group = entry.group, signal = entry.signal, "log entry");
                    metrics::counter!(
                        metric_defs::LOGS_RECEIVED.name,
                        "group" => entry.group.to_string()
                    )
                    .increment(1);
                    let _ = logs.write(entry);
                }
                Ok(ObcPacket::Command(command)) => {
                    debug!(command_id = command.command_id, "ignoring command frame from the OBC");
                }
                Err(e) => {
                    warn!(error = %e, payload = %hex::encode(frame.payload()), "undecodable packet");
                    metrics::counter!(metric_defs::PACKETS_UNKNOWN.name).increment(1);
                }
            }
        }
        if frames.is_closed() {
            break;
        }
    }
    debug!("dispatch exiting");
}

fn correlate_loop(
    mut logs: Subscription<LogEntry>,
    correlator: Arc<Correlator>,
    stop: Arc<AtomicBool>,
    poll: Duration,
) {
    debug!("correlation listener started");
    while !stop.load(Ordering::Acquire) {
        for entry in logs.read(poll) {
            correlator.handle_log(&entry);
        }
        if logs.is_closed() {
            break;
        }
    }
    debug!("correlation listener exiting");
}
