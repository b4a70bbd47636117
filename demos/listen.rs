//! Connects to a task backend, submits one query and prints the stream.
//!
//! Demonstrates:
//! - Building a channel with user info and a message handler
//! - Waiting for the connected status
//! - Submitting a streaming task and following its chunks
//!
//! Usage:
//!   cargo run --example listen -- "What is a borrow checker?"
//!   cargo run --example listen -- --origin http://localhost:8000 --debug "hi"

// ============================================================================
// Imports
// ============================================================================

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use task_channel::{InboundMessage, ReconnectPolicy, TaskChannel, UserInfo};
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_QUERY: &str = "Explain ownership in one paragraph.";
const CONNECT_WAIT: Duration = Duration::from_secs(30);

// ============================================================================
// Args
// ============================================================================

#[derive(Debug, Clone)]
struct Args {
    debug: bool,
    origin: String,
    query: String,
}

impl Args {
    fn parse() -> Self {
        let mut debug = false;
        let mut origin = "http://localhost:8000".to_owned();
        let mut query = DEFAULT_QUERY.to_owned();

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--debug" => debug = true,
                "--origin" => {
                    if let Some(value) = args.next() {
                        origin = value;
                    }
                }
                _ => query = arg,
            }
        }

        Self {
            debug,
            origin,
            query,
        }
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "task_channel=debug"
    } else {
        "task_channel=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== listen: {} ===\n", args.origin);

    let done = std::sync::Arc::new(Notify::new());
    let finished = std::sync::Arc::clone(&done);

    let channel = TaskChannel::builder()
        .origin(&args.origin)
        .user_info(UserInfo::new("demo"))
        .reconnect(ReconnectPolicy::backoff())
        .on_message(move |message| match message {
            InboundMessage::Chunk(chunk) => {
                print!("{}", chunk.content().unwrap_or_default());
                let _ = std::io::stdout().flush();
                if chunk.is_final() {
                    finished.notify_one();
                }
            }
            InboundMessage::Result(result) => {
                println!("{}", result.content().unwrap_or_default());
                finished.notify_one();
            }
            other => println!("[{}]", other.kind()),
        })
        .build()
        .context("invalid channel configuration")?;

    channel.connect();

    let mut status = channel.subscribe_status();
    tokio::time::timeout(CONNECT_WAIT, async {
        while !status.borrow_and_update().is_connected() {
            if status.changed().await.is_err() {
                break;
            }
        }
    })
    .await
    .context("backend did not accept the connection")?;

    println!("[Connected] submitting: {}\n", args.query);
    channel.create_task(args.query, 1, true)?;

    tokio::select! {
        () = done.notified() => println!("\n\n[Done]"),
        _ = tokio::signal::ctrl_c() => println!("\n[Interrupted]"),
    }

    if let Some(task_id) = channel.active_task() {
        println!("[Task] {task_id}");
    }
    channel.close_socket();
    Ok(())
}
