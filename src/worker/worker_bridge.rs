//! UI-side handle to a model host running as a child process.
//!
//! Manages the stdin/stdout pipes and turns them back into the same typed
//! channels an in-process host provides.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;

use fixity_caption_types::{to_json_line, HostCommand, HostMessage};
use tokio::sync::mpsc;

use super::process_manager::ProcessManager;
use super::HostChannels;
use crate::error::BridgeError;

/// Keeps the host process alive for as long as the bridge exists.
pub struct HostBridge {
    process_manager: Arc<ProcessManager>,
}

impl HostBridge {
    /// Spawn the host process and start the pipe threads.
    pub fn spawn(
        config_path: Option<&Path>,
        command_capacity: usize,
        event_capacity: usize,
    ) -> Result<(Self, HostChannels), BridgeError> {
        let process_manager = Arc::new(ProcessManager::spawn(config_path)?);
        let stdin = process_manager
            .take_stdin()
            .ok_or(BridgeError::Pipe("stdin"))?;
        let stdout = process_manager
            .take_stdout()
            .ok_or(BridgeError::Pipe("stdout"))?;

        let (command_tx, command_rx) = mpsc::channel(command_capacity);
        let (event_tx, event_rx) = mpsc::channel(event_capacity);

        thread::spawn(move || stdin_writer(command_rx, stdin));
        thread::spawn(move || stdout_reader(stdout, event_tx));

        Ok((
            Self { process_manager },
            HostChannels {
                commands: command_tx,
                events: event_rx,
            },
        ))
    }

    /// Kill the host process. Pending requests observe a closed channel.
    pub fn kill(&self) {
        self.process_manager.kill();
    }
}

/// Write each command as one JSON line to the host's stdin.
fn stdin_writer(mut commands: mpsc::Receiver<HostCommand>, mut stdin: impl Write) {
    while let Some(command) = commands.blocking_recv() {
        let json = match to_json_line(&command) {
            Ok(json) => json,
            Err(e) => {
                log::error!("Failed to serialize command: {e}");
                continue;
            }
        };
        if writeln!(stdin, "{json}").is_err() || stdin.flush().is_err() {
            log::error!("Failed to write to model host stdin");
            break;
        }
    }
    log::debug!("Stdin writer exiting");
}

/// Parse each stdout line as a host message. Unparseable lines are skipped.
fn stdout_reader(stdout: impl Read, events: mpsc::Sender<HostMessage>) {
    let reader = BufReader::new(stdout);
    for line in reader.lines() {
        let line = match line {
            Ok(l) if l.trim().is_empty() => continue,
            Ok(l) => l,
            Err(e) => {
                log::error!("Model host stdout read error: {e}");
                break;
            }
        };
        let message: HostMessage = match serde_json::from_str(&line) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("Failed to parse model host message: {e}");
                continue;
            }
        };
        if events.blocking_send(message).is_err() {
            break;
        }
    }
    log::debug!("Stdout reader exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::drain;

    #[test]
    fn test_stdout_reader_skips_garbage_lines() {
        let stdout = concat!(
            "{\"status\":\"initiate\",\"file\":\"model.bin\"}\n",
            "not json at all\n",
            "\n",
            "{\"status\":\"unknown\"}\n",
            "{\"status\":\"ready\"}\n",
        );
        let (tx, mut rx) = mpsc::channel(16);
        stdout_reader(stdout.as_bytes(), tx);
        assert_eq!(
            drain(&mut rx),
            vec![
                HostMessage::Initiate { file: "model.bin".into() },
                HostMessage::Ready,
            ]
        );
    }

    #[test]
    fn test_stdin_writer_emits_json_lines() {
        let (tx, rx) = mpsc::channel(4);
        tx.blocking_send(HostCommand::Analyze { image: "data:a".into() }).unwrap();
        tx.blocking_send(HostCommand::Analyze { image: "data:b".into() }).unwrap();
        drop(tx);

        let mut out = Vec::new();
        stdin_writer(rx, &mut out);
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "{\"type\":\"analyze\",\"image\":\"data:a\"}",
                "{\"type\":\"analyze\",\"image\":\"data:b\"}",
            ]
        );
    }
}
