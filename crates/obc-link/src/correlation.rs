//! Matching scheduled-command responses to the commands that asked for them.
//!
//! A scheduled command is acknowledged immediately with a uuid. When the OBC
//! later executes it, the result arrives as a log entry on the
//! scheduled-response signal, carrying a [`CommandMessageHeader`] with the
//! same uuid followed by the response body.
//!
//! A command scheduled for "now" can complete before its acknowledgement has
//! been processed. Responses for unknown uuids are therefore held in a short
//! buffer and claimed by a later `register` with the same uuid.

use crate::config::SignalRef;
use crate::error::ResponseError;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use obc_metrics::metric_defs;
use obc_packet::{CommandMessageHeader, LogEntry};
use obc_spec::{CommandSpec, Response};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

type Outcome = Result<Response, ResponseError>;

/// Unclaimed scheduled responses kept for a late `register`.
const EARLY_RESPONSES: usize = 16;

// ============================================================================
// Pending response
// ============================================================================

/// A scheduled command's eventual response.
///
/// The outcome is delivered once and cached, so every later wait returns it
/// again.
#[derive(Debug)]
pub struct PendingResponse {
    uuid: u32,
    command: String,
    rx: Mutex<Receiver<Outcome>>,
    outcome: OnceLock<Outcome>,
}

impl PendingResponse {
    pub fn uuid(&self) -> u32 {
        self.uuid
    }

    /// Name of the scheduled command.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Wait for the outcome.
    ///
    /// `None` as the timeout waits indefinitely. Returns `None` if the
    /// timeout expires first; the pending response stays usable. Any number
    /// of threads may wait at once; all of them see the same outcome.
    pub fn wait(&self, timeout: Option<Duration>) -> Option<Outcome> {
        if let Some(outcome) = self.outcome.get() {
            return Some(outcome.clone());
        }
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let rx = match deadline {
            Some(deadline) => self.rx.try_lock_until(deadline)?,
            None => self.rx.lock(),
        };
        // Set by whichever waiter held the receiver before us.
        if let Some(outcome) = self.outcome.get() {
            return Some(outcome.clone());
        }
        let received = match deadline {
            Some(deadline) => match rx.recv_deadline(deadline) {
                Ok(outcome) => outcome,
                Err(RecvTimeoutError::Timeout) => return None,
                Err(RecvTimeoutError::Disconnected) => Err(ResponseError::Cancelled),
            },
            None => rx.recv().unwrap_or(Err(ResponseError::Cancelled)),
        };
        Some(self.outcome.get_or_init(|| received).clone())
    }

    /// Wait until the outcome arrives.
    pub fn wait_forever(&self) -> Outcome {
        self.wait(None).unwrap_or(Err(ResponseError::Cancelled))
    }

    /// The outcome, if it has already arrived.
    pub fn try_get(&self) -> Option<Outcome> {
        self.wait(Some(Duration::ZERO))
    }
}

// ============================================================================
// Correlator
// ============================================================================

struct Slot {
    command: CommandSpec,
    tx: Sender<Outcome>,
}

/// What happened to one log entry offered to the correlator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// Not on the scheduled-response signal.
    Ignored,
    /// Delivered to the waiting command.
    Fulfilled { uuid: u32 },
    /// No command was waiting for this uuid; held for a late registration.
    Unmatched { uuid: u32 },
    /// Too short to carry a header.
    Malformed,
}

#[derive(Default)]
struct State {
    pending: HashMap<u32, Slot>,
    early: VecDeque<(CommandMessageHeader, Vec<u8>)>,
}

/// The shared map of scheduled commands awaiting their response.
pub struct Correlator {
    signal: SignalRef,
    state: Mutex<State>,
}

impl Correlator {
    pub fn new(signal: SignalRef) -> Self {
        Correlator {
            signal,
            state: Mutex::new(State::default()),
        }
    }

    pub fn signal(&self) -> SignalRef {
        self.signal
    }

    /// Register a scheduled command under its uuid.
    ///
    /// If its response already arrived, the returned pending response is
    /// fulfilled immediately.
    pub fn register(&self, uuid: u32, command: &CommandSpec) -> Result<PendingResponse, ResponseError> {
        let mut state = self.state.lock();
        if state.pending.contains_key(&uuid) {
            return Err(ResponseError::DuplicateUuid { uuid });
        }
        let (tx, rx) = crossbeam_channel::bounded(1);
        let pending = PendingResponse {
            uuid,
            command: command.name().to_string(),
            rx: Mutex::new(rx),
            outcome: OnceLock::new(),
        };

        if let Some(index) = state.early.iter().position(|(header, _)| header.uuid == uuid) {
            if let Some((header, body)) = state.early.remove(index) {
                debug!(uuid, command = command.name(), "scheduled response arrived before registration");
                let _ = tx.try_send(Self::outcome(command, &header, &body));
                return Ok(pending);
            }
        }

        state.pending.insert(
            uuid,
            Slot {
                command: command.clone(),
                tx,
            },
        );
        metrics::gauge!(metric_defs::SCHEDULED_PENDING.name).set(state.pending.len() as f64);
        debug!(uuid, command = command.name(), "scheduled response registered");
        Ok(pending)
    }

    /// Offer a log entry; fulfils the matching pending response, if any.
    pub fn handle_log(&self, entry: &LogEntry) -> Handled {
        if !entry.is_signal(self.signal.group, self.signal.signal) {
            return Handled::Ignored;
        }
        let (header, body) = match CommandMessageHeader::decode(&entry.data) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "malformed scheduled response");
                return Handled::Malformed;
            }
        };

        let slot = {
            let mut state = self.state.lock();
            let slot = state.pending.remove(&header.uuid);
            if slot.is_none() {
                if state.early.len() == EARLY_RESPONSES {
                    if let Some((stale, _)) = state.early.pop_front() {
                        debug!(uuid = stale.uuid, "unclaimed scheduled response dropped");
                    }
                }
                state.early.push_back((header, body.to_vec()));
            }
            metrics::gauge!(metric_defs::SCHEDULED_PENDING.name).set(state.pending.len() as f64);
            slot
        };
        let Some(slot) = slot else {
            warn!(
                uuid = header.uuid,
                command_id = header.command_id,
                "scheduled response for unknown uuid"
            );
            metrics::counter!(metric_defs::SCHEDULED_UNMATCHED.name).increment(1);
            return Handled::Unmatched { uuid: header.uuid };
        };

        let outcome = Self::outcome(&slot.command, &header, body);
        match &outcome {
            Ok(_) => debug!(uuid = header.uuid, command = slot.command.name(), "scheduled command completed"),
            Err(e) => debug!(uuid = header.uuid, command = slot.command.name(), error = %e, "scheduled command failed"),
        }
        // The receiver may already be gone if the caller dropped it.
        let _ = slot.tx.try_send(outcome);
        Handled::Fulfilled { uuid: header.uuid }
    }

    fn outcome(command: &CommandSpec, header: &CommandMessageHeader, body: &[u8]) -> Outcome {
        if header.command_id != command.id() {
            return Err(ResponseError::CommandMismatch {
                uuid: header.uuid,
                expected: command.id(),
                actual: header.command_id,
            });
        }
        if header.failed() {
            return Err(ResponseError::ExecutionFailed {
                command: command.name().to_string(),
                uuid: header.uuid,
                code: body.first().copied(),
            });
        }
        Ok(command.decode_success(body)?)
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Fail every pending response with [`ResponseError::Cancelled`].
    pub fn cancel_all(&self) {
        let drained: Vec<(u32, Slot)> = {
            let mut state = self.state.lock();
            state.early.clear();
            state.pending.drain().collect()
        };
        for (uuid, slot) in drained {
            debug!(uuid, command = slot.command.name(), "pending response cancelled");
            let _ = slot.tx.try_send(Err(ResponseError::Cancelled));
        }
        metrics::gauge!(metric_defs::SCHEDULED_PENDING.name).set(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obc_fields::{ByteOrder, FieldList, FieldValue, ObcDateTime};
    use obc_spec::ResponseSpec;

    fn deploy() -> CommandSpec {
        let resp = FieldList::from_type_strs([("angle", "u16")], ByteOrder::Big).unwrap();
        CommandSpec::new("deploy", 0x20, FieldList::empty(), ResponseSpec::Fields(resp))
    }

    fn response_entry(uuid: u32, command_id: u16, flags: u8, body: &[u8]) -> LogEntry {
        let header = CommandMessageHeader {
            uuid,
            command_id,
            date_time: ObcDateTime::from_seconds(100),
            flags,
        };
        let mut data = header.encode().to_vec();
        data.extend_from_slice(body);
        LogEntry {
            group: 0,
            signal: 0,
            timestamp: ObcDateTime::from_seconds(100),
            data,
        }
    }

    #[test]
    fn test_fulfil_and_cache() {
        let correlator = Correlator::new(SignalRef::default());
        let pending = correlator.register(7, &deploy()).unwrap();
        assert_eq!(pending.uuid(), 7);
        assert_eq!(pending.command(), "deploy");
        assert!(pending.wait(Some(Duration::from_millis(5))).is_none());
        assert_eq!(correlator.pending_count(), 1);

        let handled = correlator.handle_log(&response_entry(7, 0x20, 0, &[0x01, 0x02]));
        assert_eq!(handled, Handled::Fulfilled { uuid: 7 });
        assert_eq!(correlator.pending_count(), 0);

        let response = pending.wait(Some(Duration::from_millis(5))).unwrap().unwrap();
        assert_eq!(
            response.record().unwrap().get("angle"),
            Some(&FieldValue::Unsigned(0x0102))
        );
        // Cached.
        assert_eq!(pending.wait_forever().unwrap(), response);
        assert_eq!(pending.try_get().unwrap().unwrap(), response);
    }

    #[test]
    fn test_failed_flag() {
        let correlator = Correlator::new(SignalRef::default());
        let pending = correlator.register(9, &deploy()).unwrap();
        correlator.handle_log(&response_entry(9, 0x20, CommandMessageHeader::FLAG_FAILED, &[0x05]));
        assert_eq!(
            pending.wait(None).unwrap().unwrap_err(),
            ResponseError::ExecutionFailed {
                command: "deploy".into(),
                uuid: 9,
                code: Some(5)
            }
        );
    }

    #[test]
    fn test_decode_error_is_delivered() {
        let correlator = Correlator::new(SignalRef::default());
        let pending = correlator.register(1, &deploy()).unwrap();
        correlator.handle_log(&response_entry(1, 0x20, 0, &[0x01]));
        assert!(matches!(
            pending.wait_forever(),
            Err(ResponseError::Command(_))
        ));
    }

    #[test]
    fn test_duplicate_uuid() {
        let correlator = Correlator::new(SignalRef::default());
        let _first = correlator.register(3, &deploy()).unwrap();
        assert_eq!(
            correlator.register(3, &deploy()).unwrap_err(),
            ResponseError::DuplicateUuid { uuid: 3 }
        );
    }

    #[test]
    fn test_unmatched_and_ignored() {
        let correlator = Correlator::new(SignalRef { group: 4, signal: 2 });
        let mut entry = response_entry(11, 0x20, 0, &[]);
        assert_eq!(correlator.handle_log(&entry), Handled::Ignored);

        entry.group = 4;
        entry.signal = 2;
        assert_eq!(correlator.handle_log(&entry), Handled::Unmatched { uuid: 11 });

        entry.data.truncate(3);
        assert_eq!(correlator.handle_log(&entry), Handled::Malformed);
    }

    #[test]
    fn test_response_before_registration() {
        let correlator = Correlator::new(SignalRef::default());
        assert_eq!(
            correlator.handle_log(&response_entry(21, 0x20, 0, &[0x00, 0x2D])),
            Handled::Unmatched { uuid: 21 }
        );

        let pending = correlator.register(21, &deploy()).unwrap();
        let response = pending.try_get().unwrap().unwrap();
        assert_eq!(response.record().unwrap().get("angle"), Some(&FieldValue::Unsigned(45)));
        assert_eq!(correlator.pending_count(), 0);

        // Claimed once only.
        let again = correlator.register(21, &deploy()).unwrap();
        assert!(again.try_get().is_none());
    }

    #[test]
    fn test_early_responses_are_bounded() {
        let correlator = Correlator::new(SignalRef::default());
        for uuid in 0..=EARLY_RESPONSES as u32 {
            correlator.handle_log(&response_entry(uuid, 0x20, 0, &[0, 1]));
        }
        // The oldest was evicted.
        assert!(correlator.register(0, &deploy()).unwrap().try_get().is_none());
        let newest = correlator.register(EARLY_RESPONSES as u32, &deploy()).unwrap();
        assert!(newest.try_get().unwrap().is_ok());
    }

    #[test]
    fn test_concurrent_waiters_share_outcome() {
        let correlator = Correlator::new(SignalRef::default());
        let pending = correlator.register(8, &deploy()).unwrap();
        let started = Instant::now();

        std::thread::scope(|scope| {
            let waiters: Vec<_> = (0..3)
                .map(|_| scope.spawn(|| pending.wait(Some(Duration::from_secs(10)))))
                .collect();
            std::thread::sleep(Duration::from_millis(20));
            correlator.handle_log(&response_entry(8, 0x20, 0, &[0, 9]));
            for waiter in waiters {
                let response = waiter.join().unwrap().unwrap().unwrap();
                assert_eq!(response.record().unwrap().get("angle"), Some(&FieldValue::Unsigned(9)));
            }
        });
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_command_mismatch() {
        let correlator = Correlator::new(SignalRef::default());
        let pending = correlator.register(5, &deploy()).unwrap();
        correlator.handle_log(&response_entry(5, 0x21, 0, &[0, 0]));
        assert!(matches!(
            pending.wait_forever(),
            Err(ResponseError::CommandMismatch { expected: 0x20, actual: 0x21, .. })
        ));
    }

    #[test]
    fn test_cancel_all() {
        let correlator = Correlator::new(SignalRef::default());
        let pending = correlator.register(1, &deploy()).unwrap();
        correlator.cancel_all();
        assert_eq!(pending.wait_forever(), Err(ResponseError::Cancelled));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_dropped_correlator_cancels() {
        let correlator = Correlator::new(SignalRef::default());
        let pending = correlator.register(1, &deploy()).unwrap();
        drop(correlator);
        assert_eq!(pending.wait(Some(Duration::from_secs(1))), Some(Err(ResponseError::Cancelled)));
    }
}
