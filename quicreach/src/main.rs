use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use quic_probe::{CounterMode, CredentialMode, PassReport, ReachConfig, RunDriver};
use quic_transport::QuicTransport;
use std::net::{IpAddr, SocketAddr};
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod domains;
mod output;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat { Text, Json, Jsonl }

#[derive(Debug, Parser)]
#[command(name = "quicreach", version, about = "Check whether hosts complete a QUIC handshake")]
struct Cli {
    /// Comma-separated hostnames, or `*` for a built-in list of popular domains
    hostnames: String,
    /// ALPN to offer (repeatable or comma-separated; default h3)
    #[arg(short = 'a', long, value_delimiter = ',')]
    alpn: Vec<String>,
    /// Validate certificates against the bundled root store
    #[arg(short = 'b', long)]
    built_in_val: bool,
    /// Accept any server certificate
    #[arg(short = 'u', long)]
    unsecure: bool,
    /// Append a summary row per pass to this CSV file
    #[arg(short = 'f', long, value_name = "FILE")]
    file: Option<PathBuf>,
    /// Initial (minimum) MTU (default 1288)
    #[arg(short = 'm', long)]
    mtu: Option<u16>,
    /// Upper bound for MTU discovery (default 1500)
    #[arg(long)]
    max_mtu: Option<u16>,
    /// UDP port to connect to (default 443)
    #[arg(short = 'p', long)]
    port: Option<u16>,
    /// Require every host to be reachable
    #[arg(short = 'r', long)]
    req_all: bool,
    /// Print per-host connection statistics
    #[arg(short = 's', long)]
    stats: bool,
    /// Maximum concurrent handshakes (default 1)
    #[arg(short = 'j', long)]
    parallel: Option<usize>,
    /// Repeat every N milliseconds until interrupted; 0 runs once
    #[arg(short = 'i', long, value_name = "MS")]
    interval: Option<u64>,
    /// Keep counting across passes instead of resetting each pass
    #[arg(long)]
    cumulative: bool,
    /// Local address to bind
    #[arg(long, value_name = "IP[:PORT]")]
    source: Option<String>,
    /// Connect to this address instead of resolving the hostnames
    #[arg(long, value_name = "IP[:PORT]")]
    remote: Option<String>,
    /// Handshake idle timeout in milliseconds (default 750)
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Output format: text, json, or jsonl
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,
    /// YAML config file (default ./quicreach.yaml if present)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// More logging on stderr (-v info, -vv debug, -vvv trace); RUST_LOG overrides
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Presentation {
    stats: bool,
    format: OutputFormat,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<bool> {
    let file_cfg = config::load_config(cli.config.as_deref()).unwrap_or_default();
    let (reach, presentation) = build_config(&cli, &file_cfg)?;
    reach.validate()?;
    info!(hosts = reach.hosts.len(), parallelism = reach.parallelism, "starting");
    let transport = QuicTransport::new(&reach).context("initializing QUIC transport")?;
    let driver = RunDriver::new(reach, Arc::new(transport))?;

    let mut emit_error = None;
    let report = driver.run(|pass| {
        if let Err(e) = emit(pass, presentation, driver.pass_verdict(pass)) {
            emit_error = Some(e);
            return ControlFlow::Break(());
        }
        if let Some(path) = &driver.config().output_file {
            persist(path, pass, presentation);
        }
        ControlFlow::Continue(())
    });
    if let Some(e) = emit_error {
        return Err(e);
    }
    Ok(report.success)
}

fn build_config(cli: &Cli, file: &config::Config) -> Result<(ReachConfig, Presentation)> {
    let hosts = domains::expand_hosts(&cli.hostnames);
    let mut reach = ReachConfig::new(hosts);

    if let Some(port) = cli.port.or(file.port) {
        reach.port = port;
    }
    if !cli.alpn.is_empty() {
        reach.alpn = cli.alpn.clone();
    } else if let Some(alpn) = &file.alpn {
        reach.alpn = alpn.clone();
    }
    reach.credentials = if cli.unsecure {
        CredentialMode::Unsecure
    } else if cli.built_in_val {
        CredentialMode::BuiltIn
    } else {
        file.credentials.unwrap_or_default()
    };
    if let Some(mtu) = cli.mtu.or(file.mtu) {
        reach.settings.min_mtu = mtu;
    }
    if let Some(mtu) = cli.max_mtu.or(file.max_mtu) {
        reach.settings.max_mtu = mtu;
    }
    if let Some(ms) = cli.timeout_ms.or(file.timeout_ms) {
        reach.settings.handshake_idle_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = file.disconnect_timeout_ms {
        reach.settings.disconnect_timeout = Duration::from_millis(ms);
    }
    if let Some(n) = cli.parallel.or(file.parallel) {
        reach.parallelism = n;
    }
    if let Some(ms) = cli.interval.or(file.interval_ms) {
        reach.repeat_interval = Duration::from_millis(ms);
    }
    reach.counter_mode = if cli.cumulative {
        CounterMode::Cumulative
    } else {
        file.counter_mode.unwrap_or_default()
    };
    reach.require_all = cli.req_all || file.require_all.unwrap_or(false);
    reach.local_address = cli.source.as_deref().map(|s| parse_addr(s, 0)).transpose()?;
    reach.remote_address = cli.remote.as_deref().map(|s| parse_addr(s, reach.port)).transpose()?;
    reach.output_file = cli.file.clone().or_else(|| file.file.as_ref().map(PathBuf::from));

    let format = cli.format.unwrap_or(match file.format.as_deref() {
        Some("json") => OutputFormat::Json,
        Some("jsonl") => OutputFormat::Jsonl,
        _ => OutputFormat::Text,
    });
    let presentation = Presentation { stats: cli.stats || file.stats.unwrap_or(false), format };
    Ok((reach, presentation))
}

/// `ip:port`, `[v6]:port`, or a bare IP that takes `default_port`.
fn parse_addr(s: &str, default_port: u16) -> Result<SocketAddr> {
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let ip: IpAddr = s.parse().map_err(|_| anyhow!("invalid address {s:?}"))?;
    Ok(SocketAddr::new(ip, default_port))
}

fn emit(pass: &PassReport, presentation: Presentation, verdict: bool) -> Result<()> {
    match presentation.format {
        OutputFormat::Text => {
            if presentation.stats {
                println!("{}", output::stats_header());
                for outcome in &pass.outcomes {
                    println!("{}", output::stats_line(outcome));
                }
                let summary = output::summary_lines(&pass.counters);
                if !summary.is_empty() {
                    println!();
                    for line in summary {
                        println!("{line}");
                    }
                }
            } else {
                println!("{}", if verdict { "Success" } else { "Failure" });
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string(&output::pass_json(pass))?),
        OutputFormat::Jsonl => {
            for line in output::pass_jsonl(pass)? {
                println!("{line}");
            }
        }
    }
    Ok(())
}

#[cfg(feature = "results")]
fn persist(path: &std::path::Path, pass: &PassReport, presentation: Presentation) {
    let written = results_csv::SummaryRow::new(pass.started_at, &pass.counters)
        .and_then(|row| results_csv::append_summary(path, &row));
    match written {
        Ok(()) if presentation.format == OutputFormat::Text => {
            println!("\nOutput written to {}", path.display());
        }
        Ok(()) => info!(path = %path.display(), "summary written"),
        Err(e) => {
            tracing::error!(path = %path.display(), error = %format!("{e:#}"), "failed to write summary");
            eprintln!("Failed to write output file {}: {e:#}", path.display());
        }
    }
}

#[cfg(not(feature = "results"))]
fn persist(path: &std::path::Path, _pass: &PassReport, _presentation: Presentation) {
    tracing::warn!(path = %path.display(), "built without the results feature; summary not written");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("quicreach").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_without_flags() {
        let (reach, presentation) = build_config(&cli(&["example.com"]), &config::Config::default()).unwrap();
        assert_eq!(reach.hosts, vec!["example.com"]);
        assert_eq!(reach.port, 443);
        assert_eq!(reach.alpn, vec!["h3"]);
        assert_eq!(reach.credentials, CredentialMode::Strict);
        assert_eq!(reach.settings.min_mtu, 1288);
        assert_eq!(reach.parallelism, 1);
        assert!(!reach.repeats());
        assert_eq!(presentation, Presentation { stats: false, format: OutputFormat::Text });
    }

    #[test]
    fn short_flags() {
        let c = cli(&["a.com,b.com", "-a", "h3,hq-interop", "-u", "-b", "-m", "1350", "-p", "8443", "-r", "-s", "-j", "4"]);
        let (reach, presentation) = build_config(&c, &config::Config::default()).unwrap();
        assert_eq!(reach.hosts, vec!["a.com", "b.com"]);
        assert_eq!(reach.alpn, vec!["h3", "hq-interop"]);
        assert_eq!(reach.credentials, CredentialMode::Unsecure);
        assert_eq!(reach.settings.min_mtu, 1350);
        assert_eq!(reach.port, 8443);
        assert!(reach.require_all);
        assert!(presentation.stats);
        assert_eq!(reach.parallelism, 4);
    }

    #[test]
    fn command_line_wins_over_file() {
        let file = config::Config {
            port: Some(4433),
            parallel: Some(16),
            counter_mode: Some(CounterMode::Cumulative),
            format: Some("jsonl".into()),
            ..Default::default()
        };
        let (reach, presentation) = build_config(&cli(&["x.test", "-j", "2"]), &file).unwrap();
        assert_eq!(reach.port, 4433);
        assert_eq!(reach.parallelism, 2);
        assert_eq!(reach.counter_mode, CounterMode::Cumulative);
        assert_eq!(presentation.format, OutputFormat::Jsonl);
    }

    #[test]
    fn remote_override_takes_port_default() {
        let (reach, _) = build_config(&cli(&["x.test", "-p", "4433", "--remote", "192.0.2.9"]), &config::Config::default()).unwrap();
        assert_eq!(reach.remote_address, Some("192.0.2.9:4433".parse().unwrap()));
        assert_eq!(parse_addr("[2001:db8::1]:443", 0).unwrap(), "[2001:db8::1]:443".parse().unwrap());
        assert!(parse_addr("not-an-ip", 443).is_err());
    }

    #[test]
    fn star_expands() {
        let (reach, _) = build_config(&cli(&["*"]), &config::Config::default()).unwrap();
        assert_eq!(reach.hosts.len(), domains::TOP_DOMAINS.len());
    }

    #[test]
    fn empty_host_list_fails_validation() {
        let (reach, _) = build_config(&cli(&[" , "]), &config::Config::default()).unwrap();
        assert_eq!(reach.validate(), Err(quic_probe::ConfigError::NoHosts));
    }
}
