//! Line-delimited JSON transport to the parent process.
//!
//! Events leave through a single writer task so lines never interleave.
//! Commands arrive on a dedicated reader thread and reach the main loop as
//! messages; the main loop drains them once per iteration.

use crate::events::{Command, Event};
use std::io::{BufRead, ErrorKind};
use std::thread::{self, JoinHandle};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

/// Why an inbound line was rejected
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Invalid JSON command received")]
    InvalidJson(String),

    #[error("Unknown command: {0}")]
    Unknown(String),

    #[error("Malformed command: {0}")]
    Malformed(String),
}

/// Cloneable handle for emitting events
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: UnboundedSender<Event>,
}

impl EventSink {
    pub fn new(tx: UnboundedSender<Event>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Queue an event for the writer. Dropped silently once the writer is gone.
    pub fn send(&self, event: Event) {
        if let Event::Debug { message } = &event {
            debug!("{}", message);
        }
        if let Err(e) = self.tx.send(event) {
            debug!("Event writer closed, dropping {:?}", e.0);
        }
    }
}

/// Write each event as one JSON line, flushing after every line.
/// Returns after `shutdown_complete` is written or once every [`EventSink`]
/// has been dropped.
pub async fn run_event_writer<W>(mut rx: UnboundedReceiver<Event>, mut writer: W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    info!("Event writer started");
    while let Some(event) = rx.recv().await {
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
        if event == Event::ShutdownComplete {
            break;
        }
    }
    info!("Event writer shutting down");
    Ok(())
}

/// Run the event writer; if it fails, the parent is gone, so ask the main
/// loop to shut down.
pub async fn run_event_writer_or_shutdown<W>(
    rx: UnboundedReceiver<Event>,
    writer: W,
    commands: UnboundedSender<Command>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let result = run_event_writer(rx, writer).await;
    if let Err(e) = &result {
        error!("Event writer failed, stopping: {}", e);
        if commands.send(Command::Shutdown).is_err() {
            debug!("Main loop already stopped");
        }
    }
    result
}

/// Parse one inbound line.
pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| CommandError::InvalidJson(e.to_string()))?;

    let name = value
        .get("command")
        .and_then(|c| c.as_str())
        .ok_or_else(|| CommandError::Malformed("missing \"command\" field".to_string()))?;
    if !Command::NAMES.contains(&name) {
        return Err(CommandError::Unknown(name.to_string()));
    }

    serde_json::from_value(value).map_err(|e| CommandError::Malformed(e.to_string()))
}

/// Read commands line by line on a named thread until EOF or until the
/// command receiver is dropped. Rejected lines become error events.
pub fn spawn_command_reader<R>(
    reader: R,
    commands: UnboundedSender<Command>,
    events: EventSink,
) -> std::io::Result<JoinHandle<()>>
where
    R: BufRead + Send + 'static,
{
    thread::Builder::new()
        .name("ipc-commands".to_string())
        .spawn(move || {
            let mut reader = reader;
            let mut buf = Vec::with_capacity(256);
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!("Command input failed: {}", e);
                        events.send(Event::error(format!("Command listener error: {}", e)));
                        break;
                    }
                }

                let line = match std::str::from_utf8(&buf) {
                    Ok(line) => line.trim(),
                    Err(e) => {
                        warn!("Rejected non UTF-8 command line: {}", e);
                        events.send(Event::error(
                            CommandError::InvalidJson(e.to_string()).to_string(),
                        ));
                        continue;
                    }
                };
                if line.is_empty() {
                    continue;
                }

                match parse_command(line) {
                    Ok(cmd) => {
                        debug!("Received command: {:?}", cmd);
                        if commands.send(cmd).is_err() {
                            debug!("Command receiver dropped, stopping listener");
                            return;
                        }
                    }
                    Err(e) => {
                        warn!("Rejected command line {:?}: {:?}", line, e);
                        events.send(Event::error(e.to_string()));
                    }
                }
            }
            info!("Command input closed");
        })
}
