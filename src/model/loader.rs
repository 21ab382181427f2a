//! Seams between the host and a concrete captioning backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fixity_caption_types::{HostMessage, ModelVariant};
use image::DynamicImage;
use tokio::sync::mpsc;

use crate::error::{InferenceError, LoadError};

/// Tensors handed from the processor to the generation model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelInputs {
    /// CHW-ordered, normalized pixels for a batch of one.
    pub pixel_values: Vec<f32>,
    /// (height, width) of `pixel_values`.
    pub image_size: (usize, usize),
    /// Prompt token ids, special tokens included.
    pub input_ids: Vec<i64>,
}

/// Sequence-to-sequence generation model.
pub trait CaptionModel: Send + Sync {
    /// Greedy-generate at most `max_new_tokens` tokens.
    fn generate(&self, inputs: &ModelInputs, max_new_tokens: usize)
        -> Result<Vec<u32>, InferenceError>;
}

/// Tokenizer plus image preprocessor.
pub trait Processor: Send + Sync {
    fn prepare(&self, image: &DynamicImage, task: &str) -> Result<ModelInputs, InferenceError>;

    /// Decode generated tokens, special tokens kept.
    fn decode(&self, tokens: &[u32]) -> Result<String, InferenceError>;
}

/// Fetches and constructs the two halves of a model. Both methods block;
/// the host runs them on the blocking pool.
pub trait ModelLoader: Send + Sync + 'static {
    fn load_model(
        &self,
        variant: ModelVariant,
        progress: &ProgressReporter,
    ) -> Result<Box<dyn CaptionModel>, LoadError>;

    fn load_processor(
        &self,
        variant: ModelVariant,
        progress: &ProgressReporter,
    ) -> Result<Box<dyn Processor>, LoadError>;
}

/// The constructed model pair. Read-only once built.
pub struct LoadedModel {
    pub variant: ModelVariant,
    pub model: Box<dyn CaptionModel>,
    pub processor: Box<dyn Processor>,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("variant", &self.variant)
            .finish_non_exhaustive()
    }
}

/// Emits load events from blocking loader threads.
///
/// Closing the reporter silences it and tells long-running fetches to stop,
/// so a sibling load winds down as soon as the other half has failed.
#[derive(Clone)]
pub struct ProgressReporter {
    events: mpsc::Sender<HostMessage>,
    closed: Arc<AtomicBool>,
}

impl ProgressReporter {
    pub fn new(events: mpsc::Sender<HostMessage>) -> Self {
        Self {
            events,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Announce a resource and return its progress handle.
    pub fn resource(&self, file: impl Into<String>) -> ResourceProgress {
        let file = file.into();
        self.emit(HostMessage::Initiate { file: file.clone() });
        ResourceProgress {
            reporter: self.clone(),
            file,
            last: None,
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn emit(&self, message: HostMessage) {
        if self.is_closed() {
            return;
        }
        if self.events.blocking_send(message).is_err() {
            log::debug!("Event channel closed, dropping load event");
        }
    }
}

/// Progress of one named resource. `finish` consumes the handle so `done`
/// is emitted at most once.
pub struct ResourceProgress {
    reporter: ProgressReporter,
    file: String,
    last: Option<f64>,
}

impl ResourceProgress {
    /// Report a percentage. Values are clamped to 0-100 and regressions dropped.
    pub fn update(&mut self, percent: f64) {
        if !percent.is_finite() {
            return;
        }
        let percent = percent.clamp(0.0, 100.0);
        if self.last.is_some_and(|last| percent < last) {
            return;
        }
        self.last = Some(percent);
        self.reporter.emit(HostMessage::Progress {
            file: self.file.clone(),
            progress: percent,
        });
    }

    pub fn finish(self) {
        self.reporter.emit(HostMessage::Done { file: self.file });
    }

    /// True once the load this resource belongs to has been abandoned.
    pub fn is_cancelled(&self) -> bool {
        self.reporter.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::Receiver<HostMessage>) -> Vec<HostMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_resource_sequence() {
        let (tx, mut rx) = mpsc::channel(16);
        let reporter = ProgressReporter::new(tx);

        let mut res = reporter.resource("model.bin");
        res.update(50.0);
        res.update(100.0);
        res.finish();

        assert_eq!(
            drain(&mut rx),
            vec![
                HostMessage::Initiate { file: "model.bin".into() },
                HostMessage::Progress { file: "model.bin".into(), progress: 50.0 },
                HostMessage::Progress { file: "model.bin".into(), progress: 100.0 },
                HostMessage::Done { file: "model.bin".into() },
            ]
        );
    }

    #[test]
    fn test_progress_is_clamped_and_monotonic() {
        let (tx, mut rx) = mpsc::channel(16);
        let reporter = ProgressReporter::new(tx);

        let mut res = reporter.resource("a");
        res.update(-5.0);
        res.update(40.0);
        res.update(30.0);
        res.update(f64::NAN);
        res.update(250.0);
        res.finish();

        let percents: Vec<f64> = drain(&mut rx)
            .into_iter()
            .filter_map(|m| match m {
                HostMessage::Progress { progress, .. } => Some(progress),
                _ => None,
            })
            .collect();
        assert_eq!(percents, vec![0.0, 40.0, 100.0]);
    }

    #[test]
    fn test_closed_reporter_is_silent() {
        let (tx, mut rx) = mpsc::channel(16);
        let reporter = ProgressReporter::new(tx);
        let mut res = reporter.resource("a");
        reporter.close();
        res.update(10.0);
        res.finish();

        assert_eq!(drain(&mut rx), vec![HostMessage::Initiate { file: "a".into() }]);
    }

    #[test]
    fn test_close_does_not_wait_for_blocked_sender() {
        let (tx, mut rx) = mpsc::channel(1);
        let reporter = ProgressReporter::new(tx);
        // Initiate fills the channel, so the next update blocks.
        let mut res = reporter.resource("a");
        let blocked = std::thread::spawn(move || {
            res.update(10.0);
            res.is_cancelled()
        });
        std::thread::sleep(std::time::Duration::from_millis(50));

        let started = std::time::Instant::now();
        reporter.close();
        assert!(started.elapsed() < std::time::Duration::from_millis(500));
        assert!(reporter.is_closed());

        assert_eq!(rx.blocking_recv(), Some(HostMessage::Initiate { file: "a".into() }));
        assert!(blocked.join().unwrap());
    }

    #[test]
    fn test_dropped_receiver_does_not_panic() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let reporter = ProgressReporter::new(tx);
        reporter.resource("a").finish();
    }
}
