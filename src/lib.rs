//! On-device Florence-2 image captioning for maintenance technicians.
//!
//! A model host owns the captioning model and answers `analyze` commands
//! with typed status messages; a UI orchestrator turns those messages into
//! screen state. The two sides only talk through `fixity_caption_types`.

pub mod error;
pub mod logger;
pub mod model;
pub mod ui;
pub mod worker;

pub use fixity_caption_config::{load_config, resolve_config, HostConfig};
pub use fixity_caption_types::{HostCommand, HostMessage, ModelVariant};
