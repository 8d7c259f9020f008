//! Integration tests running the `obc` binary.

use obc_packet::{
    CommandPacket, ObcPacket, Packet, ResponsePacket, ResultCode, SerialFormat, SerialFrame,
    StreamParser,
};
use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::Path;
use std::process::{Command, Output};
use std::thread;
use tempfile::TempDir;

const COMMANDS: &str = r#"
ping:
  id: 0x01
  resp: []
set_rate:
  id: 0x10
  args:
    - hz: u16
  resp:
    - hz: u16
"#;

const LOGS: &str = "power:\n  id: 3\n  signals:\n    bus:\n      id: 1\n      data:\n        - volts: u16\n";

const TASKS: &str = "idle: {id: 0, stack_size: 128}\n";

fn obc(args: &[&str]) -> Output {
    // CARGO_BIN_EXE_obc is set by cargo for this crate's integration tests.
    Command::new(env!("CARGO_BIN_EXE_obc"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run obc")
}

fn write_config(dir: &Path, address: &str) -> String {
    fs::write(dir.join("commands.yaml"), COMMANDS).unwrap();
    fs::write(dir.join("logs.yaml"), LOGS).unwrap();
    fs::write(dir.join("tasks.yaml"), TASKS).unwrap();
    let config = dir.join("obc.yaml");
    fs::write(
        &config,
        format!(
            "link:\n  address: {}\n  poll_interval_ms: 10\ncommand_timeout_ms: 2000\nspecs:\n  commands: [commands.yaml]\n  logs: [logs.yaml]\n  tasks: [tasks.yaml]\n",
            address
        ),
    )
    .unwrap();
    config.display().to_string()
}

/// Answer every command on one TCP connection by echoing its arguments.
fn echo_obc() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut parser = StreamParser::new(SerialFormat::serial());
        let mut buf = [0u8; 256];
        loop {
            let n = match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            for frame in parser.push(&buf[..n]) {
                if let Ok(ObcPacket::Command(CommandPacket { seq, args, .. })) =
                    ObcPacket::decode(frame.payload())
                {
                    let response = ResponsePacket::with_result(seq, ResultCode::Success, &args);
                    let bytes = SerialFrame::new(response.encode()).unwrap().serialize();
                    if stream.write_all(&bytes).is_err() {
                        return;
                    }
                }
            }
        }
    });
    address
}

#[test]
fn test_check_summarizes_specs() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "127.0.0.1:1");

    let output = obc(&["--config", &config, "check"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("2 commands, 1 log groups (1 signals), 1 tasks"), "stdout: {}", stdout);

    let output = obc(&["--config", &config, "--json", "check"]);
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["commands"], 2);
    assert_eq!(summary["log_signals"], 1);
}

#[test]
fn test_check_reports_bad_specs() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "127.0.0.1:1");
    fs::write(dir.path().join("commands.yaml"), "a:\n  id: 1\nb:\n  id: 1\n").unwrap();

    let output = obc(&["--config", &config, "check"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("error:"));
}

#[test]
fn test_ping_and_send_over_tcp() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), &echo_obc());
    let output = obc(&["--config", &config, "ping"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("pong in"));

    let config = write_config(dir.path(), &echo_obc());
    let output = obc(&["--config", &config, "--json", "send", "set_rate", "250"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let response: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(response.to_string().contains("250"), "response: {}", response);
}

#[test]
fn test_connection_refused() {
    let dir = TempDir::new().unwrap();
    // Bind then drop to get a port with nothing listening.
    let address = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().to_string();
    let config = write_config(dir.path(), &address);

    let output = obc(&["--config", &config, "ping"]);
    assert!(!output.status.success());
}
