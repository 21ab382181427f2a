//! Message protocol between the UI orchestrator and the model host.
//!
//! Both directions are closed tagged unions serialized as one JSON object
//! per message. Unknown discriminators fail to deserialize, so a peer that
//! speaks a different protocol is rejected at the boundary.

use serde::{Deserialize, Serialize};

/// Command sent from the UI to the model host.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HostCommand {
    /// Request a caption for one image (data URL).
    Analyze { image: String },
}

/// Message sent from the model host to the UI.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum HostMessage {
    /// A named resource begins loading.
    Initiate { file: String },
    /// Load progress (0-100) for a named resource.
    Progress { file: String, progress: f64 },
    /// A named resource finished loading.
    Done { file: String },
    /// Model fully initialized; inference may be requested.
    Ready,
    /// Inference succeeded.
    Complete { output: String },
    /// Load or inference failed.
    Error { error: String },
}

impl HostMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    /// True for messages that end a request or the load sequence.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Complete { .. } | Self::Error { .. })
    }

    /// Resource name carried by load events.
    pub fn file(&self) -> Option<&str> {
        match self {
            Self::Initiate { file } | Self::Progress { file, .. } | Self::Done { file } => {
                Some(file)
            }
            _ => None,
        }
    }
}

/// Florence-2 checkpoint size.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    /// florence-2-base: memory-frugal, safe on low-end devices.
    #[default]
    Base,
    /// florence-2-large: higher quality, needs more cores and RAM.
    Large,
}

impl ModelVariant {
    /// HuggingFace repository holding the ONNX export.
    pub fn repo_id(&self) -> &'static str {
        match self {
            ModelVariant::Base => "Xenova/florence-2-base",
            ModelVariant::Large => "Xenova/florence-2-large",
        }
    }
}

impl std::fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.repo_id())
    }
}

/// Encode a message as a single JSON line (no trailing newline).
pub fn to_json_line<T: Serialize>(value: &T) -> serde_json::Result<String> {
    serde_json::to_string(value)
}
