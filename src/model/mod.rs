//! Model selection, loading and the memoized model handle.

pub mod florence;
pub mod hub;
pub mod loader;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod processor;
pub mod selection;
pub mod slot;

#[cfg(test)]
pub(crate) mod testing;

pub use loader::{CaptionModel, LoadedModel, ModelInputs, ModelLoader, Processor, ProgressReporter};
pub use selection::{select_variant, HardwareProbe, SystemProbe};
pub use slot::ModelSlot;
