//! UI orchestrator: status rendering and the caption review flow.

pub mod orchestrator;
pub mod session;

pub use orchestrator::{Orchestrator, UiError, UiState};
pub use session::{encode_data_url, read_image_data_url, CaptionSession};
