#![forbid(unsafe_code)]

//! `ghalibvr-ctl`: local companion for `ghalibvr-relay`.
//!
//! `listen` attaches to the relay's pipe as the downstream consumer and
//! prints every received line. `send` connects to the relay's TCP port and
//! writes messages the way a tracking client would.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use interprocess::local_socket::{traits::Stream as _, Stream};

use ghalibvr_relay::config::{DEFAULT_PIPE_NAME, DEFAULT_PORT};
use ghalibvr_relay::ipc::pipe_name;

#[derive(Debug, Parser)]
#[command(
    name = "ghalibvr-ctl",
    about = "Local consumer and test client for ghalibvr-relay",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Attach to the pipe and print each forwarded line.
    Listen {
        /// Pipe name (must match the relay's `pipe_name`).
        #[arg(long, default_value = DEFAULT_PIPE_NAME)]
        pipe_name: String,
    },

    /// Connect to the relay over TCP and send messages.
    Send {
        /// Relay TCP port.
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Delay between messages in milliseconds.
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,

        /// Messages to send; each is one TCP write. Reads stdin lines when empty.
        messages: Vec<String>,
    },
}

fn main() {
    let args = Cli::parse();

    let outcome = match args.command {
        Command::Listen { pipe_name } => listen(&pipe_name),
        Command::Send {
            port,
            interval_ms,
            messages,
        } => send(port, Duration::from_millis(interval_ms), messages),
    };

    if let Err(err) = outcome {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

/// Attach to the pipe and print lines until the relay closes it.
fn listen(name: &str) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let stream = Stream::connect(pipe_name(name)?).map_err(|err| {
        format!("cannot attach to pipe '{name}': {err} (is ghalibvr-relay started?)")
    })?;
    eprintln!("attached to pipe '{name}'");

    let reader = BufReader::new(&stream);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for line in reader.lines() {
        writeln!(out, "{}", line?)?;
        out.flush()?;
    }

    eprintln!("pipe closed by relay");
    Ok(())
}

/// Send each message as its own write, pausing `interval` between them.
fn send(
    port: u16,
    interval: Duration,
    messages: Vec<String>,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let mut stream = TcpStream::connect(addr)?;
    stream.set_nodelay(true)?;
    eprintln!("connected to {addr}");

    let messages: Box<dyn Iterator<Item = io::Result<String>>> = if messages.is_empty() {
        Box::new(io::stdin().lock().lines())
    } else {
        Box::new(messages.into_iter().map(Ok))
    };

    for (index, message) in messages.enumerate() {
        if index > 0 {
            thread::sleep(interval);
        }
        let message = message?;
        stream.write_all(message.as_bytes())?;
        eprintln!("sent: {message}");
    }

    Ok(())
}
