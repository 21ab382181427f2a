//! Lazily constructed, memoized model handle owned by the host loop.
//!
//! The slot lives on the host's single thread. The first `get` starts one
//! initialization future and stores it; every later or concurrent `get`
//! awaits a clone of that same future, so resources are fetched once.

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use fixity_caption_types::{HostMessage, ModelVariant};
use futures_util::future::{FutureExt, LocalBoxFuture, Shared};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::loader::{LoadedModel, ModelLoader, ProgressReporter};
use super::selection::{select_variant, HardwareProbe};
use crate::error::LoadError;

type LoadFuture = Shared<LocalBoxFuture<'static, Result<Arc<LoadedModel>, LoadError>>>;

pub struct ModelSlot {
    loader: Arc<dyn ModelLoader>,
    probe: Box<dyn HardwareProbe>,
    forced_variant: Option<ModelVariant>,
    events: mpsc::Sender<HostMessage>,
    variant: Cell<Option<ModelVariant>>,
    /// In-flight or resolved initialization, tagged with its attempt number.
    pending: RefCell<Option<(u64, LoadFuture)>>,
    attempts: Cell<u64>,
}

impl ModelSlot {
    pub fn new(
        loader: Arc<dyn ModelLoader>,
        probe: Box<dyn HardwareProbe>,
        forced_variant: Option<ModelVariant>,
        events: mpsc::Sender<HostMessage>,
    ) -> Self {
        Self {
            loader,
            probe,
            forced_variant,
            events,
            variant: Cell::new(None),
            pending: RefCell::new(None),
            attempts: Cell::new(0),
        }
    }

    /// The session's variant. Chosen on first call, frozen afterwards.
    pub fn variant(&self) -> ModelVariant {
        if let Some(variant) = self.variant.get() {
            return variant;
        }
        let variant = match self.forced_variant {
            Some(variant) => {
                log::info!("Using configured variant {variant}");
                variant
            }
            None => select_variant(self.probe.as_ref()),
        };
        self.variant.set(Some(variant));
        variant
    }

    /// Number of initialization attempts started so far.
    pub fn attempts(&self) -> u64 {
        self.attempts.get()
    }

    /// Get the model, starting the load if nobody has yet.
    ///
    /// A failed attempt is forgotten, so the next call starts a new one.
    pub async fn get(&self) -> Result<Arc<LoadedModel>, LoadError> {
        let (attempt, future) = {
            let mut pending = self.pending.borrow_mut();
            match pending.as_ref() {
                Some((attempt, future)) => (*attempt, future.clone()),
                None => {
                    let attempt = self.attempts.get() + 1;
                    self.attempts.set(attempt);
                    let future = self.start_load(attempt);
                    *pending = Some((attempt, future.clone()));
                    (attempt, future)
                }
            }
        };

        let result = future.await;

        if result.is_err() {
            let mut pending = self.pending.borrow_mut();
            if matches!(pending.as_ref(), Some((current, _)) if *current == attempt) {
                *pending = None;
            }
        }
        result
    }

    fn start_load(&self, attempt: u64) -> LoadFuture {
        let variant = self.variant();
        let loader = self.loader.clone();
        let events = self.events.clone();

        async move {
            log::info!("Loading {variant} (attempt {attempt})");
            let reporter = ProgressReporter::new(events.clone());

            let model_task = {
                let loader = loader.clone();
                let reporter = reporter.clone();
                tokio::task::spawn_blocking(move || loader.load_model(variant, &reporter))
            };
            let processor_task = {
                let reporter = reporter.clone();
                tokio::task::spawn_blocking(move || loader.load_processor(variant, &reporter))
            };

            // Both halves must finish before this attempt resolves, so a retry
            // never overlaps a half still writing into the cache. The first
            // failure closes the reporter, which makes the other half stop early.
            let first_error = RefCell::new(None);
            let (model, processor) = tokio::join!(
                join_load(model_task, &reporter, &first_error),
                join_load(processor_task, &reporter, &first_error),
            );
            let (model, processor) = match (model, processor) {
                (Ok(model), Ok(processor)) => (model, processor),
                (Err(e), _) | (_, Err(e)) => {
                    let e = first_error.into_inner().unwrap_or(e);
                    log::error!("Failed to load {variant}: {e}");
                    return Err(e);
                }
            };

            log::info!("{variant} ready");
            if events.send(HostMessage::Ready).await.is_err() {
                log::debug!("Event channel closed before ready");
            }

            Ok(Arc::new(LoadedModel {
                variant,
                model,
                processor,
            }))
        }
        .boxed_local()
        .shared()
    }
}

/// Await one load half. On failure, record the error if it is the first one
/// and close the shared reporter.
async fn join_load<T>(
    handle: JoinHandle<Result<T, LoadError>>,
    reporter: &ProgressReporter,
    first_error: &RefCell<Option<LoadError>>,
) -> Result<T, LoadError> {
    let result = match handle.await {
        Ok(result) => result,
        Err(e) => Err(LoadError::Task(e.to_string())),
    };
    if let Err(e) = &result {
        first_error.borrow_mut().get_or_insert_with(|| e.clone());
        reporter.close();
    }
    result
}
