//! Tasks that own a child's pipes
//!
//! - one reader per output stream, each with its own `FramedRead` + [`LineCodec`]
//! - one stdin writer fed from an unbounded queue
//! - one exit watcher that owns the `Child`
//!
//! They only ever send [`ProcessEvent`]s; none of them touches session state.

use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::{Child, ChildStdin};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use chatbridge_protocol::{LineCodec, Role, StreamKind};

use super::supervisor::ProcessEvent;
use super::ExitInfo;

/// Forward every line of `reader` until EOF
pub(crate) async fn read_lines<R>(
    role: Role,
    generation: u64,
    stream: StreamKind,
    reader: R,
    events: mpsc::UnboundedSender<ProcessEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = FramedRead::new(reader, LineCodec::new());

    while let Some(item) = lines.next().await {
        match item {
            Ok(line) => {
                trace!(role = %role, stream = %stream, line = %line, "Output line");
                let event = ProcessEvent::Line {
                    role,
                    generation,
                    stream,
                    line,
                };
                if events.send(event).is_err() {
                    trace!(role = %role, "Event channel closed, reader exiting");
                    return;
                }
            }
            Err(e) => {
                warn!(role = %role, stream = %stream, error = %e, "Output read failed");
                break;
            }
        }
    }

    debug!(role = %role, stream = %stream, "Output stream closed");
}

/// Write queued lines to the child's stdin, newline-terminated
///
/// Ends when the queue closes, a write fails, or `cancel` fires. Dropping
/// `stdin` on the way out closes the child's input.
pub(crate) async fn write_lines(
    role: Role,
    mut stdin: ChildStdin,
    mut input: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                trace!(role = %role, "Input writer cancelled");
                break;
            }

            next = input.recv() => {
                let Some(mut text) = next else {
                    break;
                };
                text.push('\n');

                if let Err(e) = stdin.write_all(text.as_bytes()).await {
                    warn!(role = %role, error = %e, "Write to stdin failed");
                    break;
                }
                if let Err(e) = stdin.flush().await {
                    warn!(role = %role, error = %e, "Flush of stdin failed");
                    break;
                }
            }
        }
    }

    debug!(role = %role, "Input writer exiting");
}

/// Wait for the child to exit, give the readers `drain` to finish, then report
pub(crate) async fn watch_exit(
    role: Role,
    generation: u64,
    mut child: Child,
    readers: Vec<JoinHandle<()>>,
    drain: Duration,
    events: mpsc::UnboundedSender<ProcessEvent>,
) {
    let exit = match child.wait().await {
        Ok(status) => ExitInfo::from_status(status),
        Err(e) => {
            warn!(role = %role, error = %e, "Waiting on child failed");
            ExitInfo::default()
        }
    };

    // Helpers that inherited the pipes can keep them open past the exit
    if tokio::time::timeout(drain, futures::future::join_all(readers))
        .await
        .is_err()
    {
        debug!(role = %role, "Output not drained before exit report");
    }

    debug!(role = %role, generation, exit = %exit, "Process exited");
    let _ = events.send(ProcessEvent::Exited {
        role,
        generation,
        exit,
    });
}
