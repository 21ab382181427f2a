//! Model host event loop and its two entry points.
//!
//! The loop owns the model slot and runs on a single thread with a
//! current-thread runtime:
//! - a preload task starts the model load as soon as the host starts
//! - the command loop handles one `analyze` at a time, in receipt order
//! - downloads, model construction and inference run on the blocking pool
//!
//! `spawn_host` runs the loop on a background thread of this process.
//! `run_worker` runs it as a child process speaking JSON Lines on
//! stdin/stdout; logs go to stderr.

use std::io::{self, BufRead, Write};
use std::rc::Rc;
use std::sync::Arc;
use std::thread;

use fixity_caption_config::HostConfig;
use fixity_caption_types::{to_json_line, HostCommand, HostMessage, ModelVariant};
use tokio::sync::mpsc;
use tokio::task::LocalSet;

use super::inference::run_caption;
use super::HostChannels;
use crate::error::InferenceError;
use crate::model::{HardwareProbe, ModelLoader, ModelSlot};

/// Handle to an in-process host thread.
pub struct HostHandle {
    thread: thread::JoinHandle<()>,
}

impl HostHandle {
    /// Wait for the host thread to exit. Drop the channels first.
    pub fn join(self) {
        if self.thread.join().is_err() {
            log::error!("Model host thread panicked");
        }
    }
}

/// Start the host on a dedicated thread of this process.
pub fn spawn_host(
    loader: Arc<dyn ModelLoader>,
    probe: Box<dyn HardwareProbe>,
    config: &HostConfig,
) -> io::Result<(HostHandle, HostChannels)> {
    let (command_tx, command_rx) = mpsc::channel(config.command_capacity);
    let (event_tx, event_rx) = mpsc::channel(config.event_capacity);
    let forced_variant = config.variant;

    let thread = thread::Builder::new()
        .name("model-host".into())
        .spawn(move || run_host_thread(loader, probe, forced_variant, command_rx, event_tx))?;

    Ok((
        HostHandle { thread },
        HostChannels {
            commands: command_tx,
            events: event_rx,
        },
    ))
}

fn run_host_thread(
    loader: Arc<dyn ModelLoader>,
    probe: Box<dyn HardwareProbe>,
    forced_variant: Option<ModelVariant>,
    commands: mpsc::Receiver<HostCommand>,
    events: mpsc::Sender<HostMessage>,
) {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("Failed to create host runtime: {e}");
            let _ = events.blocking_send(HostMessage::error(format!(
                "failed to start model host: {e}"
            )));
            return;
        }
    };

    let local = LocalSet::new();
    local.block_on(&rt, async move {
        let slot = Rc::new(ModelSlot::new(loader, probe, forced_variant, events.clone()));
        run_host(slot, commands, events).await;
    });

    // Do not wait for an orphaned download or inference to finish.
    rt.shutdown_background();
}

/// Preload the model, then serve commands until the command channel closes.
pub async fn run_host(
    slot: Rc<ModelSlot>,
    mut commands: mpsc::Receiver<HostCommand>,
    events: mpsc::Sender<HostMessage>,
) {
    log::info!("Model host started");

    {
        let slot = slot.clone();
        let events = events.clone();
        tokio::task::spawn_local(async move {
            if let Err(e) = slot.get().await {
                send(&events, HostMessage::error(e.to_string())).await;
            }
        });
    }

    while let Some(command) = commands.recv().await {
        match command {
            HostCommand::Analyze { image } => {
                log::info!("Analyze request ({} bytes)", image.len());
                let message = match analyze(&slot, image).await {
                    Ok(output) => {
                        log::info!("Caption ready ({} chars)", output.len());
                        HostMessage::Complete { output }
                    }
                    Err(e) => {
                        log::error!("Analyze failed: {e}");
                        HostMessage::error(e.to_string())
                    }
                };
                send(&events, message).await;
            }
        }
    }

    log::info!("Command channel closed, model host exiting");
}

async fn analyze(slot: &ModelSlot, image: String) -> Result<String, InferenceError> {
    let model = slot.get().await?;
    tokio::task::spawn_blocking(move || run_caption(&model, &image))
        .await
        .map_err(|e| InferenceError::Task(e.to_string()))?
}

async fn send(events: &mpsc::Sender<HostMessage>, message: HostMessage) {
    if events.send(message).await.is_err() {
        log::debug!("Event channel closed, dropping message");
    }
}

/// Run the host as a child process over stdin/stdout. Returns the exit code.
pub fn run_worker(
    loader: Arc<dyn ModelLoader>,
    probe: Box<dyn HardwareProbe>,
    config: &HostConfig,
) -> i32 {
    log::info!("Starting model host worker (pid={})", std::process::id());

    let (command_tx, command_rx) = mpsc::channel::<HostCommand>(config.command_capacity);
    let (event_tx, mut event_rx) = mpsc::channel::<HostMessage>(config.event_capacity);

    // stdin reader: one JSON command per line
    let parse_errors = event_tx.clone();
    let reader = thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(l) if l.trim().is_empty() => continue,
                Ok(l) => l,
                Err(_) => break,
            };
            match serde_json::from_str::<HostCommand>(&line) {
                Ok(command) => {
                    if command_tx.blocking_send(command).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::warn!("Rejected command line: {e}");
                    let message = HostMessage::error(format!("invalid command: {e}"));
                    if parse_errors.blocking_send(message).is_err() {
                        break;
                    }
                }
            }
        }
        log::info!("Stdin closed, stopping command reader");
    });

    // stdout writer: one JSON message per line, flushed immediately
    let writer = thread::spawn(move || {
        let stdout = io::stdout();
        let mut stdout = stdout.lock();
        while let Some(message) = event_rx.blocking_recv() {
            if let Err(e) = write_message(&mut stdout, &message) {
                log::error!("Failed to write to stdout: {e}");
                break;
            }
        }
    });

    run_host_thread(loader, probe, config.variant, command_rx, event_tx);

    // The host only exits once the reader has dropped its command sender.
    if reader.join().is_err() {
        log::error!("Stdin reader panicked");
    }
    if writer.join().is_err() {
        log::error!("Stdout writer panicked");
    }

    log::info!("Model host worker exiting");
    0
}

fn write_message(out: &mut impl Write, message: &HostMessage) -> io::Result<()> {
    let json = to_json_line(message).map_err(io::Error::other)?;
    writeln!(out, "{json}")?;
    out.flush()
}
