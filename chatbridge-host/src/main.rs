//! chatbridge - headless front end
//!
//! Reads intents from stdin, runs the bridge loop, and prints every UI
//! update to stdout as text or JSON lines.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use chatbridge_host::process::LayoutLocator;
use chatbridge_host::{Bridge, ConfigLoader, UiUpdate};
use chatbridge_utils::{init_logging_with_config, BridgeError, Result};

mod cli;
mod input;

use cli::Args;
use input::{parse_line, InputLine, USAGE};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    init_logging_with_config(args.log_config())?;
    info!("chatbridge starting");
    tracing::debug!("CLI args: {:?}", args);

    match run(args).await {
        Ok(()) => {
            info!("chatbridge exiting normally");
            Ok(())
        }
        Err(e) => {
            error!("chatbridge error: {}", e);
            eprintln!("Error: {}", e);
            Err(e)
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = ConfigLoader::load_and_validate(args.config.as_deref())?;
    if let Some(layout) = args.layout {
        config.binaries.layout = layout;
    }

    let locator = LayoutLocator::from_config(&config.binaries);
    info!(layout = %locator.layout(), "Resolved executable layout");

    let (bridge, handle, updates) = Bridge::new(&config, Arc::new(locator));
    let bridge_task = tokio::spawn(bridge.run());
    let printer = tokio::spawn(print_updates(updates, args.json));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => match parse_line(&line) {
                    Ok(Some(InputLine::Intent(intent))) => {
                        if handle.send(intent).is_err() {
                            break;
                        }
                    }
                    Ok(Some(InputLine::Help)) => println!("{}", USAGE),
                    Ok(Some(InputLine::Quit)) => break,
                    Ok(None) => {}
                    Err(e) => eprintln!("{}", e),
                },
                Ok(None) => {
                    info!("stdin closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    break;
                }
            }
        }
    }

    // The loop may already be gone if it failed
    let _ = handle.shutdown();
    let result = bridge_task
        .await
        .map_err(|e| BridgeError::internal(format!("bridge task failed: {}", e)))?;

    if let Err(e) = printer.await {
        warn!(error = %e, "Printer task failed");
    }
    result
}

async fn print_updates(mut updates: mpsc::UnboundedReceiver<UiUpdate>, json: bool) {
    while let Some(update) = updates.recv().await {
        if json {
            match serde_json::to_string(&update) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!(error = %e, "Failed to serialize update"),
            }
        } else {
            println!("{}", update);
        }
    }
}
