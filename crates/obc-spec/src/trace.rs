//! RTOS context-switch traces.
//!
//! The OBC records a fixed-size record on every context switch:
//!
//! ```text
//! [kind:u8][task_id:u8][timestamp_us:u32 BE]
//! ```
//!
//! `kind` is 0 for a switch-in and 1 for a switch-out. [`TaskTrace`] pairs the
//! records back into per-task run slices.

use crate::error::TraceError;
use crate::task::{TaskRegistry, TaskSpec};
use serde::Serialize;

/// Size of one trace record in bytes.
pub const TRACE_RECORD_SIZE: usize = 6;

/// Direction of a context switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEventKind {
    SwitchIn,
    SwitchOut,
}

impl TraceEventKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(TraceEventKind::SwitchIn),
            1 => Some(TraceEventKind::SwitchOut),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            TraceEventKind::SwitchIn => 0,
            TraceEventKind::SwitchOut => 1,
        }
    }
}

/// One raw trace record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TraceEvent {
    pub kind: TraceEventKind,
    pub task_id: u8,
    pub timestamp_us: u32,
}

impl TraceEvent {
    /// Serialize to the on-board record layout.
    pub fn to_bytes(&self) -> [u8; TRACE_RECORD_SIZE] {
        let ts = self.timestamp_us.to_be_bytes();
        [self.kind.to_byte(), self.task_id, ts[0], ts[1], ts[2], ts[3]]
    }
}

/// Split a raw trace buffer into records.
pub fn parse_trace_records(bytes: &[u8]) -> Result<Vec<TraceEvent>, TraceError> {
    if bytes.len() % TRACE_RECORD_SIZE != 0 {
        return Err(TraceError::Truncated {
            len: bytes.len(),
            record_size: TRACE_RECORD_SIZE,
        });
    }
    bytes
        .chunks_exact(TRACE_RECORD_SIZE)
        .enumerate()
        .map(|(index, rec)| -> Result<TraceEvent, TraceError> {
            let kind = TraceEventKind::from_byte(rec[0]).ok_or(TraceError::UnknownKind { index, kind: rec[0] })?;
            Ok(TraceEvent {
                kind,
                task_id: rec[1],
                timestamp_us: u32::from_be_bytes([rec[2], rec[3], rec[4], rec[5]]),
            })
        })
        .collect()
}

/// One uninterrupted run of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSlice {
    pub task: String,
    pub task_id: u8,
    pub start_us: u32,
    pub end_us: u32,
}

impl TaskSlice {
    /// Run time, tolerant of one timer wrap.
    pub fn duration_us(&self) -> u32 {
        self.end_us.wrapping_sub(self.start_us)
    }
}

/// A reconstructed schedule.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TaskTrace {
    slices: Vec<TaskSlice>,
}

impl TaskTrace {
    /// Pair switch-in and switch-out events into slices.
    ///
    /// A task still running when the trace ends has no slice.
    pub fn from_events(events: &[TraceEvent], tasks: &TaskRegistry) -> Result<Self, TraceError> {
        let mut slices = Vec::new();
        let mut running: Option<(&TaskSpec, u32)> = None;

        for (index, event) in events.iter().enumerate() {
            let task = tasks
                .get(event.task_id)
                .map_err(|_| TraceError::UnknownTask {
                    index,
                    task_id: event.task_id,
                })?;

            match (event.kind, running) {
                (TraceEventKind::SwitchIn, None) => running = Some((task, event.timestamp_us)),
                (TraceEventKind::SwitchIn, Some((current, _))) => {
                    return Err(TraceError::ConsecutiveSwitchIn {
                        index,
                        task: task.name().to_string(),
                        running: current.name().to_string(),
                    });
                }
                (TraceEventKind::SwitchOut, None) => {
                    return Err(TraceError::ConsecutiveSwitchOut {
                        index,
                        task: task.name().to_string(),
                    });
                }
                (TraceEventKind::SwitchOut, Some((current, start_us))) => {
                    if current.id() != task.id() {
                        return Err(TraceError::TaskMismatch {
                            index,
                            task: task.name().to_string(),
                            running: current.name().to_string(),
                        });
                    }
                    slices.push(TaskSlice {
                        task: task.name().to_string(),
                        task_id: task.id(),
                        start_us,
                        end_us: event.timestamp_us,
                    });
                    running = None;
                }
            }
        }

        Ok(TaskTrace { slices })
    }

    /// Parse raw records and reconstruct the schedule in one step.
    pub fn from_bytes(bytes: &[u8], tasks: &TaskRegistry) -> Result<Self, TraceError> {
        Self::from_events(&parse_trace_records(bytes)?, tasks)
    }

    pub fn slices(&self) -> &[TaskSlice] {
        &self.slices
    }

    /// Total run time per task, ordered by task id.
    pub fn totals(&self) -> Vec<(String, u64)> {
        let mut totals: Vec<(u8, String, u64)> = Vec::new();
        for slice in &self.slices {
            match totals.iter_mut().find(|(id, _, _)| *id == slice.task_id) {
                Some(entry) => entry.2 += u64::from(slice.duration_us()),
                None => totals.push((slice.task_id, slice.task.clone(), u64::from(slice.duration_us()))),
            }
        }
        totals.sort_by_key(|(id, _, _)| *id);
        totals.into_iter().map(|(_, name, total)| (name, total)).collect()
    }

    /// Time from the first switch-in to the last switch-out.
    pub fn span_us(&self) -> u64 {
        match (self.slices.first(), self.slices.last()) {
            (Some(first), Some(last)) => u64::from(last.end_us.wrapping_sub(first.start_us)),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tasks() -> TaskRegistry {
        TaskRegistry::new(vec![
            TaskSpec::new("idle", 0, 128, 0).unwrap(),
            TaskSpec::new("comms", 1, 512, 2).unwrap(),
        ])
        .unwrap()
    }

    fn ev(kind: TraceEventKind, task_id: u8, timestamp_us: u32) -> TraceEvent {
        TraceEvent {
            kind,
            task_id,
            timestamp_us,
        }
    }

    #[test]
    fn test_parse_and_reconstruct() {
        use TraceEventKind::*;
        let events = [
            ev(SwitchIn, 0, 100),
            ev(SwitchOut, 0, 150),
            ev(SwitchIn, 1, 150),
            ev(SwitchOut, 1, 400),
            ev(SwitchIn, 0, 400),
            ev(SwitchOut, 0, 420),
            ev(SwitchIn, 1, 420),
        ];
        let bytes: Vec<u8> = events.iter().flat_map(|e| e.to_bytes()).collect();
        assert_eq!(parse_trace_records(&bytes).unwrap(), events);

        let trace = TaskTrace::from_bytes(&bytes, &tasks()).unwrap();
        assert_eq!(trace.slices().len(), 3);
        assert_eq!(trace.totals(), vec![("idle".to_string(), 70), ("comms".to_string(), 250)]);
        assert_eq!(trace.span_us(), 320);
    }

    #[test]
    fn test_record_errors() {
        assert!(matches!(
            parse_trace_records(&[0, 0, 0]),
            Err(TraceError::Truncated { len: 3, record_size: 6 })
        ));
        assert!(matches!(
            parse_trace_records(&[7, 0, 0, 0, 0, 0]),
            Err(TraceError::UnknownKind { index: 0, kind: 7 })
        ));
    }

    #[test]
    fn test_sequence_errors() {
        use TraceEventKind::*;
        let reg = tasks();
        assert!(matches!(
            TaskTrace::from_events(&[ev(SwitchIn, 0, 0), ev(SwitchIn, 1, 1)], &reg),
            Err(TraceError::ConsecutiveSwitchIn { index: 1, .. })
        ));
        assert!(matches!(
            TaskTrace::from_events(&[ev(SwitchOut, 0, 0)], &reg),
            Err(TraceError::ConsecutiveSwitchOut { index: 0, .. })
        ));
        assert!(matches!(
            TaskTrace::from_events(&[ev(SwitchIn, 0, 0), ev(SwitchOut, 1, 1)], &reg),
            Err(TraceError::TaskMismatch { index: 1, .. })
        ));
        assert!(matches!(
            TaskTrace::from_events(&[ev(SwitchIn, 9, 0)], &reg),
            Err(TraceError::UnknownTask { index: 0, task_id: 9 })
        ));
    }

    #[test]
    fn test_timer_wrap() {
        let slice = TaskSlice {
            task: "idle".into(),
            task_id: 0,
            start_us: u32::MAX - 9,
            end_us: 10,
        };
        assert_eq!(slice.duration_us(), 20);
    }
}
