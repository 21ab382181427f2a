//! UI state machine driven by host messages and user actions.
//!
//! `idle -> model-loading -> model-ready -> analyzing -> {result | error}`.
//! Result and error both accept the next submission; a submission while
//! analyzing is rejected.

use std::fmt;

use fixity_caption_types::{HostCommand, HostMessage};

#[derive(Debug, Clone, PartialEq, Default)]
pub enum UiState {
    #[default]
    Idle,
    ModelLoading { file: String, progress: f64 },
    ModelReady,
    Analyzing,
    Result { caption: String },
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UiError {
    #[error("an analysis is already running")]
    Busy,
    #[error("model is not ready yet")]
    NotReady,
    #[error("no caption to review")]
    NothingToReview,
    #[error("correction text is empty")]
    EmptyCorrection,
}

#[derive(Debug, Default)]
pub struct Orchestrator {
    state: UiState,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &UiState {
        &self.state
    }

    /// Fold one host message into the UI state.
    pub fn apply(&mut self, message: &HostMessage) {
        let analyzing = self.state == UiState::Analyzing;
        match message {
            // A reload triggered by a submission stays under "analyzing".
            HostMessage::Initiate { .. }
            | HostMessage::Progress { .. }
            | HostMessage::Done { .. }
            | HostMessage::Ready
                if analyzing => {}
            HostMessage::Initiate { file } => {
                self.state = UiState::ModelLoading {
                    file: file.clone(),
                    progress: 0.0,
                };
            }
            HostMessage::Progress { file, progress } => {
                self.state = UiState::ModelLoading {
                    file: file.clone(),
                    progress: *progress,
                };
            }
            HostMessage::Done { file } => {
                self.state = UiState::ModelLoading {
                    file: file.clone(),
                    progress: 100.0,
                };
            }
            HostMessage::Ready => self.state = UiState::ModelReady,
            HostMessage::Complete { output } => {
                self.state = UiState::Result {
                    caption: output.clone(),
                };
            }
            HostMessage::Error { error } => {
                self.state = UiState::Error {
                    message: error.clone(),
                };
            }
        }
    }

    /// Start an analysis. Returns the one command to send to the host.
    pub fn begin_analysis(&mut self, image: String) -> Result<HostCommand, UiError> {
        match self.state {
            UiState::Analyzing => return Err(UiError::Busy),
            UiState::Idle | UiState::ModelLoading { .. } => return Err(UiError::NotReady),
            UiState::ModelReady | UiState::Result { .. } | UiState::Error { .. } => {}
        }
        self.state = UiState::Analyzing;
        Ok(HostCommand::Analyze { image })
    }

    /// Accept the current caption as-is.
    pub fn accept(&mut self) -> Result<String, UiError> {
        let UiState::Result { caption } = &self.state else {
            return Err(UiError::NothingToReview);
        };
        let caption = caption.clone();
        log::info!("Caption accepted: {caption}");
        self.state = UiState::ModelReady;
        Ok(caption)
    }

    /// Reject the current caption, recording the technician's correction.
    pub fn reject_with_correction(&mut self, correction: &str) -> Result<(), UiError> {
        let UiState::Result { caption } = &self.state else {
            return Err(UiError::NothingToReview);
        };
        let correction = correction.trim();
        if correction.is_empty() {
            return Err(UiError::EmptyCorrection);
        }
        log::info!("Caption rejected: {caption}");
        log::info!("Correction submitted for continuous learning: {correction}");
        self.state = UiState::ModelReady;
        Ok(())
    }

    pub fn status_text(&self) -> String {
        self.state.to_string()
    }
}

impl fmt::Display for UiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UiState::Idle => f.write_str("Waiting for model"),
            UiState::ModelLoading { file, progress } => {
                write!(f, "Loading {file}... {progress:.0}%")
            }
            UiState::ModelReady => f.write_str("Model ready"),
            UiState::Analyzing => f.write_str("Analyzing image..."),
            UiState::Result { caption } => write!(f, "Result: {caption}"),
            UiState::Error { message } => write!(f, "Error: {message}"),
        }
    }
}
