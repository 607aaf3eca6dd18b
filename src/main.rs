//! rust-relay command line entry point
//!
//! ```bash
//! # Forward local 9500 to 203.0.113.7:48000 over TCP and UDP
//! rust-relay -l "tcp+udp://:9500?remote=example" -r "example://203.0.113.7:48000"
//!
//! # Start from a config file (command line entries are appended)
//! rust-relay -c config.json
//! ```

use anyhow::{anyhow, bail, Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use rust_relay::config::{load_config, merge_cli_entries, Config, LogConfig};
use rust_relay::service::Service;

const HELP: &str = r#"Usage:
    rust-relay -l [listen] -r [remote] -c [config] -h

Options:
    -l [listen] : add a listen configuration (repeatable)
    -r [remote] : add a remote configuration (repeatable)
    -c [config] : read a JSON config file ('-' reads standard input)
    --check     : parse and construct only (dry-run)
    --pprof     : start a diagnostics server on an ephemeral port
    -h/--help   : print this help message

Example:
    # Forward local 9500 to 203.0.113.7:48000
    rust-relay -l "tcp+udp://:9500?remote=example" -r "example://203.0.113.7:48000"

    # Start from a config file; -l and -r entries are appended
    rust-relay -c config.json

See README.md for the full documentation.
"#;

/// Parsed command line flags
#[derive(Debug, Default)]
struct Args {
    config: Option<String>,
    listens: Vec<String>,
    remotes: Vec<String>,
    check: bool,
    pprof: bool,
    help: bool,
}

fn parse_args(raw: &[String]) -> Result<Args, String> {
    fn value_after<'a>(raw: &'a [String], index: usize, key: &str) -> Result<&'a String, String> {
        raw.get(index)
            .ok_or_else(|| format!("{key} option requires a value"))
    }

    let mut args = Args::default();
    let mut i = 0;
    while i < raw.len() {
        match raw[i].as_str() {
            "-l" => {
                i += 1;
                args.listens.push(value_after(raw, i, "-l")?.clone());
            }
            "-r" => {
                i += 1;
                args.remotes.push(value_after(raw, i, "-r")?.clone());
            }
            "-c" => {
                i += 1;
                args.config = Some(value_after(raw, i, "-c")?.clone());
            }
            "-h" | "--help" => {
                args.help = true;
                return Ok(args);
            }
            "--check" => args.check = true,
            "--pprof" => args.pprof = true,
            other => return Err(format!("unknown option {other}")),
        }
        i += 1;
    }
    Ok(args)
}

/// Initialize tracing from the config's log section.
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_logging(config: &LogConfig) -> Result<()> {
    if config.disable {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("off"))
            .init();
        return Ok(());
    }

    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "" | "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        other => bail!("invalid log level: {other}"),
    };
    let filter = EnvFilter::from_default_env().add_directive(level.into());
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match config.format.as_str() {
        "" | "console" => subscriber.init(),
        "json" => subscriber.json().init(),
        other => bail!("invalid log format: {other}"),
    }
    Ok(())
}

/// Serve a one-page runtime status on an ephemeral loopback port
async fn start_diagnostics() -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await?;
    info!(address = %listener.local_addr()?, "diagnostics server started");
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let body = format!(
                    "rust-relay v{}\npid: {}\n",
                    rust_relay::VERSION,
                    std::process::id()
                );
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
            });
        }
    });
    Ok(())
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    sigterm.recv().await;
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}

#[tokio::main]
async fn main() -> Result<()> {
    let raw: Vec<String> = std::env::args().skip(1).collect();
    let args = match parse_args(&raw) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            eprint!("{HELP}");
            std::process::exit(1);
        }
    };
    if args.help || (args.listens.is_empty() && args.remotes.is_empty() && args.config.is_none()) {
        print!("{HELP}");
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => load_config(path).with_context(|| format!("load config from {path}"))?,
        None => Config::default(),
    };
    merge_cli_entries(&mut config, &args.listens, &args.remotes)
        .context("merge command line configuration")?;

    init_logging(&config.log)?;
    info!(version = rust_relay::VERSION, "rust-relay starting");

    let service = Service::new(config).map_err(|e| anyhow!("create service failed: {e}"))?;
    if args.check {
        println!("configuration ok");
        return Ok(());
    }

    if args.pprof {
        start_diagnostics().await?;
    }

    service
        .start()
        .map_err(|e| anyhow!("start service failed: {e}"))?;

    tokio::select! {
        _ = signal::ctrl_c() => info!("received SIGINT, shutting down"),
        () = wait_for_sigterm() => info!("received SIGTERM, shutting down"),
    }

    service.close();
    info!("shutdown complete");
    Ok(())
}
