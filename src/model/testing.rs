//! Test doubles shared by the slot, host and session tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use fixity_caption_types::{HostMessage, ModelVariant};
use image::DynamicImage;
use tokio::sync::mpsc;

use super::loader::{CaptionModel, ModelInputs, ModelLoader, Processor, ProgressReporter};
use super::selection::HardwareProbe;
use crate::error::{InferenceError, LoadError};
use crate::worker::inference::CAPTION_TASK;

pub const FAKE_CAPTION: &str = "a photo of a coolant pump valve";
pub const MODEL_RESOURCE: &str = "model.bin";
pub const PROCESSOR_RESOURCE: &str = "processor.json";

pub struct FixedProbe(pub Option<usize>);

impl HardwareProbe for FixedProbe {
    fn logical_cores(&self) -> Option<usize> {
        self.0
    }
}

pub fn drain(rx: &mut mpsc::Receiver<HostMessage>) -> Vec<HostMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

/// A small valid PNG encoded as a data URL.
pub fn png_data_url() -> String {
    let img = image::RgbImage::from_pixel(4, 4, image::Rgb([200, 30, 30]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    format!("data:image/png;base64,{}", STANDARD.encode(bytes))
}

pub struct FakeLoader {
    model_loads: AtomicUsize,
    processor_loads: AtomicUsize,
    variants: Mutex<Vec<ModelVariant>>,
    failure: Mutex<Option<String>>,
    fail_forever: bool,
    panic_on_generate: AtomicBool,
}

impl Default for FakeLoader {
    fn default() -> Self {
        Self {
            model_loads: AtomicUsize::new(0),
            processor_loads: AtomicUsize::new(0),
            variants: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            fail_forever: false,
            panic_on_generate: AtomicBool::new(false),
        }
    }
}

impl FakeLoader {
    pub fn failing_once(message: &str) -> Self {
        Self {
            failure: Mutex::new(Some(message.to_string())),
            ..Self::default()
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Mutex::new(Some(message.to_string())),
            fail_forever: true,
            ..Self::default()
        }
    }

    pub fn panicking() -> Self {
        let loader = Self::default();
        loader.panic_on_generate.store(true, Ordering::SeqCst);
        loader
    }

    pub fn model_loads(&self) -> usize {
        self.model_loads.load(Ordering::SeqCst)
    }

    pub fn processor_loads(&self) -> usize {
        self.processor_loads.load(Ordering::SeqCst)
    }

    pub fn variants_seen(&self) -> Vec<ModelVariant> {
        self.variants.lock().unwrap().clone()
    }

    fn take_failure(&self) -> Option<String> {
        let mut failure = self.failure.lock().unwrap();
        if self.fail_forever {
            failure.clone()
        } else {
            failure.take()
        }
    }
}

impl ModelLoader for FakeLoader {
    fn load_model(
        &self,
        variant: ModelVariant,
        progress: &ProgressReporter,
    ) -> Result<Box<dyn CaptionModel>, LoadError> {
        self.model_loads.fetch_add(1, Ordering::SeqCst);
        self.variants.lock().unwrap().push(variant);

        let mut resource = progress.resource(MODEL_RESOURCE);
        if let Some(message) = self.take_failure() {
            return Err(LoadError::fetch(MODEL_RESOURCE, message));
        }
        resource.update(50.0);
        resource.update(100.0);
        resource.finish();

        Ok(Box::new(FakeModel {
            panic: self.panic_on_generate.load(Ordering::SeqCst),
        }))
    }

    fn load_processor(
        &self,
        _variant: ModelVariant,
        progress: &ProgressReporter,
    ) -> Result<Box<dyn Processor>, LoadError> {
        self.processor_loads.fetch_add(1, Ordering::SeqCst);
        let mut resource = progress.resource(PROCESSOR_RESOURCE);
        resource.update(50.0);
        resource.update(100.0);
        resource.finish();
        Ok(Box::new(FakeProcessor))
    }
}

struct FakeModel {
    panic: bool,
}

impl CaptionModel for FakeModel {
    fn generate(
        &self,
        inputs: &ModelInputs,
        max_new_tokens: usize,
    ) -> Result<Vec<u32>, InferenceError> {
        if self.panic {
            panic!("model exploded");
        }
        if inputs.input_ids.is_empty() || max_new_tokens == 0 {
            return Err(InferenceError::Model("empty prompt".into()));
        }
        Ok(vec![2, 0, 42, 2])
    }
}

struct FakeProcessor;

impl Processor for FakeProcessor {
    fn prepare(&self, image: &DynamicImage, _task: &str) -> Result<ModelInputs, InferenceError> {
        let (h, w) = (image.height() as usize, image.width() as usize);
        Ok(ModelInputs {
            pixel_values: vec![0.0; 3 * h * w],
            image_size: (h, w),
            input_ids: vec![0, 2],
        })
    }

    fn decode(&self, _tokens: &[u32]) -> Result<String, InferenceError> {
        Ok(format!("</s><s>{CAPTION_TASK}{FAKE_CAPTION}</s>"))
    }
}
