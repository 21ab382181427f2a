//! Model host: owns the model and answers `analyze` commands.
//!
//! The host runs either on a thread of this process (`spawn_host`) or as a
//! child process (`--worker`) reached through `HostBridge`. Both hand the
//! UI the same pair of channels.

pub mod inference;
pub mod process_manager;
pub mod worker_bridge;
pub mod worker_main;

use fixity_caption_types::{HostCommand, HostMessage};
use tokio::sync::mpsc;

pub use worker_bridge::HostBridge;
pub use worker_main::{run_worker, spawn_host, HostHandle};

/// UI-side ends of the host message channel.
pub struct HostChannels {
    pub commands: mpsc::Sender<HostCommand>,
    pub events: mpsc::Receiver<HostMessage>,
}
