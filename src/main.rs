#![forbid(unsafe_code)]

//! `ghalibvr-relay`: forwards TCP client data to the `GhalibVRPipe` consumer.
//!
//! Loads configuration, builds the relay controller and drives it from a
//! line-oriented console on stdin. Status notifications are printed to
//! stdout as they happen.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use ghalibvr_relay::console::{self, ConsoleCommand};
use ghalibvr_relay::relay::RelayController;
use ghalibvr_relay::status::{ChannelReporter, StatusEvent};
use ghalibvr_relay::{AppError, RelayConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "ghalibvr-relay", about = "TCP to named pipe relay", version, long_about = None)]
struct Cli {
    /// Path to an optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the TCP port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the pipe name.
    #[arg(long)]
    pipe_name: Option<String>,

    /// Start relaying immediately instead of waiting for `start`.
    #[arg(long)]
    autostart: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("ghalibvr-relay bootstrap");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;
    let outcome = runtime.block_on(run(args));
    // A pending stdin read would otherwise hold the runtime open.
    runtime.shutdown_timeout(Duration::from_millis(500));
    outcome
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => RelayConfig::load_from_path(path)?,
        None => RelayConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(name) = args.pipe_name {
        config.pipe_name = name;
    }
    config.validate()?;
    info!(addr = %config.bind_addr(), pipe = %config.pipe_name, "configuration loaded");

    // ── Build controller and status printer ─────────────
    let (reporter, mut events) = ChannelReporter::new();
    let controller = Arc::new(RelayController::new(config, Arc::new(reporter)));

    let printer_done = CancellationToken::new();
    let json_events = args.log_format == LogFormat::Json;
    let printer = {
        let done = printer_done.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    event = events.recv() => match event {
                        Some(event) => print_event(&event, json_events),
                        None => break,
                    },

                    () = done.cancelled() => {
                        // Sessions may still hold reporters; print what is queued and leave.
                        while let Ok(event) = events.try_recv() {
                            print_event(&event, json_events);
                        }
                        break;
                    }
                }
            }
        })
    };

    if args.autostart {
        // Failures are already reported; the console can retry.
        let _ = controller.start().await;
    }

    println!("{}", console::HELP);

    // ── Console loop ────────────────────────────────────
    let signal = shutdown_signal();
    tokio::pin!(signal);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut console_open = true;

    loop {
        tokio::select! {
            () = &mut signal => {
                info!("shutdown signal received");
                break;
            }

            line = lines.next_line(), if console_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match line.parse::<ConsoleCommand>() {
                    Ok(ConsoleCommand::Exit) => break,
                    Ok(command) => {
                        if let Some(output) = console::execute(&controller, command).await {
                            println!("{output}");
                        }
                    }
                    Err(err) => println!("{err}; {}", console::HELP),
                },
                Ok(None) => {
                    info!("stdin closed; waiting for a shutdown signal");
                    console_open = false;
                }
                Err(err) => {
                    warn!(%err, "console read failed; waiting for a shutdown signal");
                    console_open = false;
                }
            },
        }
    }

    // ── Shutdown ────────────────────────────────────────
    controller.shutdown().await;
    printer_done.cancel();
    if let Err(err) = printer.await {
        warn!(%err, "status printer ended abnormally");
    }
    info!("ghalibvr-relay shut down");

    Ok(())
}

/// Print a status event for the operator, as JSON when logs are JSON.
fn print_event(event: &StatusEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(err) => warn!(%err, "failed to serialise status event"),
        }
    } else {
        println!("{event}");
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
