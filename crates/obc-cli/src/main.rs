//! `obc` command-line tool: send commands to an OBC and watch its logs.

mod error;

use clap::{Parser, Subcommand, ValueEnum};
use error::CliError;
use obc_fields::ObcDateTime;
use obc_link::{ClientConfig, CommandOutcome, LinkKind, ObcClient};
use obc_spec::{Key, Response, SpecSet};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// OBC command line.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase output verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// YAML configuration file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Address of the TCP-exposed UART, overriding the config file.
    #[arg(long, value_name = "HOST:PORT")]
    addr: Option<String>,
    /// Link framing, overriding the config file.
    #[arg(long, value_enum)]
    link: Option<LinkArg>,
    /// Print results as JSON.
    #[arg(long)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Measure the round trip of a ping.
    Ping,
    /// Reset the OBC.
    Reset,
    /// Send any command from the command specs.
    Send {
        /// Command name or numeric id.
        name: String,
        /// One value per argument field.
        args: Vec<String>,
        /// Schedule for this time (RFC 3339 or seconds since 2000).
        #[arg(long, value_name = "TIME")]
        at: Option<String>,
        /// Wait this many seconds for a scheduled command's response.
        #[arg(long, value_name = "SECS")]
        wait: Option<f64>,
    },
    /// Print log entries until interrupted.
    Logs {
        /// Stop after this many entries.
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
    /// Show stack high-water marks per task.
    Stack,
    /// Capture and summarize an RTOS trace.
    Trace {
        /// Trace buffer length in bytes.
        length: u16,
    },
    /// Load and validate the spec files without connecting.
    Check,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LinkArg {
    Serial,
    Comms,
}

impl From<LinkArg> for LinkKind {
    fn from(arg: LinkArg) -> Self {
        match arg {
            LinkArg::Serial => LinkKind::Serial,
            LinkArg::Comms => LinkKind::Comms,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) -> Result<(), CliError> {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).map_err(|e| CliError::Logging(e.to_string()))
}

fn load_config(cli: &Cli) -> Result<ClientConfig, CliError> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    };
    if let Some(addr) = &cli.addr {
        config.link.address = addr.clone();
    }
    if let Some(link) = cli.link {
        config.link.kind = link.into();
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_config(&cli)?;
    debug!(?config, "configuration loaded");
    let out = Output { json: cli.json };

    if let Commands::Check = cli.command {
        return check(&config, &out);
    }

    let client = ObcClient::from_config(config)?;
    let result = match cli.command {
        Commands::Ping => {
            let rtt = client.ping()?;
            out.line(&format!("pong in {:.1} ms", rtt.as_secs_f64() * 1000.0), &PingReport {
                round_trip_ms: rtt.as_secs_f64() * 1000.0,
            })
        }
        Commands::Reset => {
            client.reset()?;
            out.line("reset sent", &Response::None)
        }
        Commands::Send { name, args, at, wait } => send(&client, &out, &name, &args, at.as_deref(), wait),
        Commands::Logs { count } => logs(&client, &out, count),
        Commands::Stack => stack(&client, &out),
        Commands::Trace { length } => trace(&client, &out, length),
        Commands::Check => Ok(()),
    };
    client.close();
    result
}

// ============================================================================
// Commands
// ============================================================================

/// A command given by name, or by decimal or `0x` id.
fn command_key(name: &str) -> Key<'_> {
    let parsed = match name.strip_prefix("0x").or_else(|| name.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => name.parse::<u16>().ok(),
    };
    match parsed {
        Some(id) => Key::from(id),
        None => Key::Name(name),
    }
}

fn send(
    client: &ObcClient,
    out: &Output,
    name: &str,
    args: &[String],
    at: Option<&str>,
    wait: Option<f64>,
) -> Result<(), CliError> {
    let spec = client.specs().commands.get(command_key(name))?;
    let texts: Vec<&str> = args.iter().map(String::as_str).collect();
    let values = spec.parse_args(&texts)?;
    let date_time = match at {
        Some(text) => ObcDateTime::parse(text).map_err(|message| CliError::Time {
            text: text.to_string(),
            message,
        })?,
        None => ObcDateTime::IMMEDIATE,
    };

    match client.send_command(spec.id(), &values, date_time, None)? {
        CommandOutcome::Immediate(response) => out.line(&response.to_string(), &response),
        CommandOutcome::Scheduled(pending) => {
            info!(command = pending.command(), uuid = pending.uuid(), at = %date_time, "scheduled");
            let Some(secs) = wait else {
                return out.line(
                    &format!("scheduled '{}' as uuid {}", pending.command(), pending.uuid()),
                    &ScheduledReport {
                        command: pending.command(),
                        uuid: pending.uuid(),
                        at: date_time,
                    },
                );
            };
            let timeout = Duration::from_secs_f64(secs.max(0.0));
            match pending.wait(Some(timeout)) {
                Some(outcome) => {
                    let response = outcome?;
                    out.line(&response.to_string(), &response)
                }
                None => Err(CliError::WaitTimeout {
                    command: pending.command().to_string(),
                    uuid: pending.uuid(),
                    timeout,
                }),
            }
        }
    }
}

fn logs(client: &ObcClient, out: &Output, count: Option<usize>) -> Result<(), CliError> {
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::Release))?;
    }

    let mut listener = client.add_log_listener(client.config().log_queue_size);
    let mut printed = 0usize;
    while !stop.load(Ordering::Acquire) && count.map_or(true, |n| printed < n) {
        let Some(entry) = listener.recv(Duration::from_millis(200)) else {
            if listener.is_closed() || !client.is_connected() {
                warn!("link closed");
                break;
            }
            continue;
        };
        match client.decode_log(&entry) {
            Ok(decoded) => out.line(&decoded.to_string(), &decoded)?,
            Err(e) => {
                debug!(error = %e, "log entry not decoded");
                out.line(
                    &format!(
                        "[{}] {}.{} {}",
                        entry.timestamp,
                        entry.group,
                        entry.signal,
                        hex::encode(&entry.data)
                    ),
                    &RawLog {
                        group: entry.group,
                        signal: entry.signal,
                        timestamp: entry.timestamp,
                        data: hex::encode(&entry.data),
                    },
                )?
            }
        }
        printed += 1;
    }
    if listener.dropped() > 0 {
        warn!(dropped = listener.dropped(), "log entries were dropped");
    }
    Ok(())
}

fn stack(client: &ObcClient, out: &Output) -> Result<(), CliError> {
    let usage = client.get_stack_usage()?;
    if out.json {
        return out.json(&usage);
    }
    println!("{:>3}  {:<22} {:>10} {:>10}", "id", "task", "stack", "free");
    for task in &usage {
        println!(
            "{:>3}  {:<22} {:>10} {:>10}",
            task.task_id, task.task, task.stack_size, task.high_water
        );
    }
    Ok(())
}

fn trace(client: &ObcClient, out: &Output, length: u16) -> Result<(), CliError> {
    let trace = client.capture_trace(length)?;
    if out.json {
        return out.json(&trace);
    }
    let span = trace.span_us().max(1);
    println!("{} slices over {} us", trace.slices().len(), trace.span_us());
    for (task, total) in trace.totals() {
        println!(
            "  {:<22} {:>10} us {:>6.1}%",
            task,
            total,
            total as f64 * 100.0 / span as f64
        );
    }
    Ok(())
}

fn check(config: &ClientConfig, out: &Output) -> Result<(), CliError> {
    let files = &config.specs;
    if files.commands.is_empty() && files.logs.is_empty() && files.tasks.is_empty() {
        return Err(CliError::NoSpecs);
    }
    let specs = files.load()?;
    let summary = CheckSummary::new(&specs);
    out.line(
        &format!(
            "{} commands, {} log groups ({} signals), {} tasks",
            summary.commands, summary.log_groups, summary.log_signals, summary.tasks
        ),
        &summary,
    )
}

// ============================================================================
// Output
// ============================================================================

struct Output {
    json: bool,
}

impl Output {
    /// Print `text`, or `value` as a JSON line in JSON mode.
    fn line<T: Serialize>(&self, text: &str, value: &T) -> Result<(), CliError> {
        if self.json {
            return self.json(value);
        }
        println!("{}", text);
        Ok(())
    }

    fn json<T: Serialize>(&self, value: &T) -> Result<(), CliError> {
        println!("{}", serde_json::to_string(value)?);
        Ok(())
    }
}

#[derive(Serialize)]
struct PingReport {
    round_trip_ms: f64,
}

#[derive(Serialize)]
struct ScheduledReport<'a> {
    command: &'a str,
    uuid: u32,
    at: ObcDateTime,
}

#[derive(Serialize)]
struct RawLog {
    group: u8,
    signal: u8,
    timestamp: ObcDateTime,
    data: String,
}

#[derive(Serialize)]
struct CheckSummary {
    commands: usize,
    log_groups: usize,
    log_signals: usize,
    tasks: usize,
}

impl CheckSummary {
    fn new(specs: &SpecSet) -> Self {
        CheckSummary {
            commands: specs.commands.len(),
            log_groups: specs.logs.len(),
            log_signals: specs.logs.signal_count(),
            tasks: specs.tasks.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_send() {
        let cli = Cli::try_parse_from([
            "obc", "-vv", "--link", "comms", "send", "deploy", "45", "--at", "now", "--wait", "2.5",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.link, Some(LinkArg::Comms));
        match cli.command {
            Commands::Send { name, args, at, wait } => {
                assert_eq!(name, "deploy");
                assert_eq!(args, vec!["45"]);
                assert_eq!(at.as_deref(), Some("now"));
                assert_eq!(wait, Some(2.5));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_command_key() {
        assert_eq!(command_key("ping"), Key::Name("ping"));
        assert_eq!(command_key("0x20"), Key::Id(0x20));
        assert_eq!(command_key("16"), Key::Id(16));
        assert_eq!(command_key("0xzz"), Key::Name("0xzz"));
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::try_parse_from(["obc", "--addr", "10.1.1.1:7000", "--link", "comms", "ping"]).unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.link.address, "10.1.1.1:7000");
        assert_eq!(config.link.kind, LinkKind::Comms);
        assert_eq!(config.command_timeout_ms, ClientConfig::default().command_timeout_ms);
    }

    #[test]
    fn test_check_requires_specs() {
        let out = Output { json: false };
        assert!(matches!(check(&ClientConfig::default(), &out), Err(CliError::NoSpecs)));
    }
}
