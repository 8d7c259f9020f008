//! A loopback OBC for integration tests.
//!
//! The simulator sits on the far end of a [`MemoryDevice`] pair, parses the
//! command frames the client sends and answers them the way flight software
//! does.

#![allow(dead_code)]

use obc_fields::{ByteOrder, ObcDateTime};
use obc_link::{ClientConfig, Device, LinkKind, MemoryDevice, ObcClient};
use obc_packet::{
    CommandMessageHeader, CommandPacket, LogEntry, ObcPacket, Packet, RelayFormat, RelayFrame,
    ResponsePacket, ResultCode, SerialFormat, SerialFrame, StreamParser, COMMS_MAX_PAYLOAD,
};
use obc_spec::{CommandRegistry, LogRegistry, SpecSet, TaskRegistry, TraceEvent, TraceEventKind};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const COMMANDS: &str = r#"
ping:
  id: 0x01
  resp: []
reset:
  id: 0x02
set_rate:
  id: 0x10
  args:
    - hz: u16
  resp:
    - hz: u16
deploy:
  id: 0x20
  args:
    - angle: u16
  resp:
    - angle: u16
get_stack_usage:
  id: 0x30
  resp:
    - mask: u32
    - high_water: u32[32]
capture_trace:
  id: 0x31
  args:
    - length: u16
  resp: raw
silent:
  id: 0x40
unsupported:
  id: 0x50
"#;

pub const LOGS: &str = r#"
scheduler:
  id: 0
  signals:
    command_response:
      id: 0
power:
  id: 3
  signals:
    bus:
      id: 1
      level: warning
      data:
        - volts: u16
"#;

pub const TASKS: &str = "idle: {id: 0, stack_size: 128}\ncomms: {id: 1, stack_size: 512, priority: 2}\n";

/// Angle that makes a scheduled deploy fail on board.
pub const FAILING_ANGLE: u16 = 0xFFFF;

/// Failure code reported for [`FAILING_ANGLE`].
pub const FAILURE_CODE: u8 = 0x07;

/// Delay between a scheduled acknowledgement and its response.
pub const EXECUTION_DELAY: Duration = Duration::from_millis(150);

pub fn specs() -> SpecSet {
    SpecSet {
        commands: CommandRegistry::from_yaml_str(COMMANDS, ByteOrder::Big).unwrap(),
        logs: LogRegistry::from_yaml_str(LOGS, ByteOrder::Big).unwrap(),
        tasks: TaskRegistry::from_yaml_str(TASKS).unwrap(),
    }
}

/// Trace returned by `capture_trace`: idle 100..150, comms 150..400.
pub fn trace_events() -> Vec<TraceEvent> {
    use TraceEventKind::*;
    [
        (SwitchIn, 0, 100),
        (SwitchOut, 0, 150),
        (SwitchIn, 1, 150),
        (SwitchOut, 1, 400),
    ]
    .into_iter()
    .map(|(kind, task_id, timestamp_us)| TraceEvent {
        kind,
        task_id,
        timestamp_us,
    })
    .collect()
}

pub fn config(kind: LinkKind) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.link.kind = kind;
    config.link.poll_interval_ms = 10;
    config.link.join_timeout_ms = 1000;
    config.command_timeout_ms = 1000;
    config
}

/// Connect a client to a fresh simulator.
pub fn connect(kind: LinkKind) -> (ObcClient, Simulator) {
    let (ours, theirs) = MemoryDevice::pair();
    let sim = Simulator::start(theirs, kind);
    let client = ObcClient::connect(Arc::new(ours), specs(), config(kind)).unwrap();
    (client, sim)
}

// ============================================================================
// Simulator
// ============================================================================

struct Shared {
    device: MemoryDevice,
    kind: LinkKind,
    stop: AtomicBool,
    next_uuid: AtomicU32,
}

impl Shared {
    fn send(&self, payload: Vec<u8>) {
        let bytes = match self.kind {
            LinkKind::Serial => SerialFrame::new(payload).unwrap().serialize(),
            LinkKind::Comms => {
                let inner = SerialFrame::with_limit(payload, COMMS_MAX_PAYLOAD).unwrap();
                RelayFrame::wrap(&inner).unwrap().serialize()
            }
        };
        // The client may already be gone.
        let _ = self.device.write_all(&bytes);
    }

    fn respond(&self, seq: u8, result: ResultCode, data: &[u8]) {
        self.send(ResponsePacket::with_result(seq, result, data).encode());
    }
}

/// The OBC end of a memory link.
pub struct Simulator {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl Simulator {
    pub fn start(device: MemoryDevice, kind: LinkKind) -> Self {
        device.connect().unwrap();
        let shared = Arc::new(Shared {
            device,
            kind,
            stop: AtomicBool::new(false),
            next_uuid: AtomicU32::new(1000),
        });
        let handle = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("obc-sim".to_string())
                .spawn(move || run(shared))
                .unwrap()
        };
        Simulator {
            shared,
            handle: Some(handle),
        }
    }

    /// Emit a log entry.
    pub fn send_log(&self, group: u8, signal: u8, timestamp: u32, data: &[u8]) {
        let entry = LogEntry {
            group,
            signal,
            timestamp: ObcDateTime::from_seconds(timestamp),
            data: data.to_vec(),
        };
        self.shared.send(entry.encode());
    }

    /// Emit raw bytes, bypassing framing.
    pub fn send_raw(&self, bytes: &[u8]) {
        self.shared.device.write_all(bytes).unwrap();
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.device.close();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(shared: Arc<Shared>) {
    let mut relay = StreamParser::new(RelayFormat);
    let mut serial = StreamParser::new(match shared.kind {
        LinkKind::Serial => SerialFormat::serial(),
        LinkKind::Comms => SerialFormat::comms(),
    });
    let mut buf = [0u8; 256];

    while !shared.stop.load(Ordering::Acquire) {
        let n = match shared.device.read_chunk(&mut buf, Duration::from_millis(10)) {
            Ok(n) => n,
            Err(_) => break,
        };
        let frames = match shared.kind {
            LinkKind::Serial => serial.push(&buf[..n]),
            LinkKind::Comms => relay
                .push(&buf[..n])
                .into_iter()
                .flat_map(|r| serial.push(r.payload()))
                .collect(),
        };
        for frame in frames {
            if let Ok(ObcPacket::Command(command)) = ObcPacket::decode(frame.payload()) {
                handle(&shared, command);
            }
        }
    }
}

fn handle(shared: &Arc<Shared>, command: CommandPacket) {
    let seq = command.seq;
    match command.command_id {
        0x01 | 0x02 => shared.respond(seq, ResultCode::Success, &[]),
        0x10 => {
            if command.args.len() != 2 {
                shared.respond(seq, ResultCode::InvalidArgs, &[]);
            } else {
                shared.respond(seq, ResultCode::Success, &command.args);
            }
        }
        0x20 if command.date_time.is_immediate() => {
            shared.respond(seq, ResultCode::Success, &command.args)
        }
        0x20 => {
            let uuid = shared.next_uuid.fetch_add(1, Ordering::Relaxed);
            shared.send(ResponsePacket::scheduled(seq, uuid).encode());

            let failed = command.args == FAILING_ANGLE.to_be_bytes();
            let header = CommandMessageHeader {
                uuid,
                command_id: command.command_id,
                date_time: command.date_time,
                flags: if failed { CommandMessageHeader::FLAG_FAILED } else { 0 },
            };
            let mut data = header.encode().to_vec();
            if failed {
                data.push(FAILURE_CODE);
            } else {
                data.extend_from_slice(&command.args);
            }
            let shared = Arc::clone(shared);
            thread::spawn(move || {
                thread::sleep(EXECUTION_DELAY);
                let entry = LogEntry {
                    group: 0,
                    signal: 0,
                    timestamp: header.date_time,
                    data,
                };
                shared.send(entry.encode());
            });
        }
        0x30 => {
            let mut data = 0b11u32.to_be_bytes().to_vec();
            for task in 0..32u32 {
                data.extend_from_slice(&(100 + task).to_be_bytes());
            }
            shared.respond(seq, ResultCode::Success, &data);
        }
        0x31 => {
            let data: Vec<u8> = trace_events().iter().flat_map(|e| e.to_bytes()).collect();
            shared.respond(seq, ResultCode::Success, &data);
        }
        // Never answered.
        0x40 => {}
        _ => shared.respond(seq, ResultCode::UnknownCommand, &[]),
    }
}
