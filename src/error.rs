/// Model or processor construction failed.
///
/// Cloneable because every awaiter of the shared initialization future
/// receives its own copy of the outcome. A fetch failure shows only its
/// message; the resource name is logged where the fetch failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LoadError {
    #[error("{message}")]
    Fetch { resource: String, message: String },
    #[error("failed to build model: {0}")]
    Backend(String),
    #[error("load task failed: {0}")]
    Task(String),
}

impl LoadError {
    pub fn fetch(resource: impl Into<String>, message: impl ToString) -> Self {
        LoadError::Fetch {
            resource: resource.into(),
            message: message.to_string(),
        }
    }
}

/// A single caption request failed. The loaded model stays usable.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("invalid image data URL: {0}")]
    DataUrl(String),
    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),
    #[error("model execution failed: {0}")]
    Model(String),
    #[error("failed to decode output: {0}")]
    Decode(String),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("inference task failed: {0}")]
    Task(String),
}

/// Failures of the child-process transport.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("cannot find own executable: {0}")]
    Executable(std::io::Error),
    #[error("failed to spawn model host: {0}")]
    Spawn(std::io::Error),
    #[error("model host {0} pipe not available")]
    Pipe(&'static str),
}

/// Failures seen by the UI side of a captioning session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{0}")]
    Host(String),
    #[error("model host exited unexpectedly")]
    HostExited,
    #[error(transparent)]
    Ui(#[from] crate::ui::orchestrator::UiError),
    #[error("cannot read image {path}: {source}")]
    ReadImage {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("unrecognized image format: {0}")]
    Format(#[from] image::ImageError),
}
