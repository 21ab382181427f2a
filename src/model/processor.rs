//! Florence-2 processor: image preprocessing and prompt tokenization.

use std::path::Path;

use image::imageops::FilterType;
use image::DynamicImage;
use serde::Deserialize;
use tokenizers::Tokenizer;

use super::loader::{ModelInputs, Processor};
use crate::error::{InferenceError, LoadError};

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ImageSize {
    pub height: u32,
    pub width: u32,
}

/// The subset of `preprocessor_config.json` Florence-2 needs.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PreprocessorConfig {
    pub size: ImageSize,
    pub do_resize: bool,
    pub do_rescale: bool,
    pub rescale_factor: f32,
    pub do_normalize: bool,
    pub image_mean: [f32; 3],
    pub image_std: [f32; 3],
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            size: ImageSize {
                height: 768,
                width: 768,
            },
            do_resize: true,
            do_rescale: true,
            rescale_factor: 1.0 / 255.0,
            do_normalize: true,
            image_mean: [0.485, 0.456, 0.406],
            image_std: [0.229, 0.224, 0.225],
        }
    }
}

impl PreprocessorConfig {
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| LoadError::Backend(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| LoadError::Backend(format!("{}: {e}", path.display())))
    }
}

/// Natural-language prompt the model was trained with for a task token.
pub fn task_prompt(task: &str) -> &str {
    match task {
        "<CAPTION>" => "What does the image describe?",
        "<DETAILED_CAPTION>" => "Describe in detail what is shown in the image.",
        "<MORE_DETAILED_CAPTION>" => "Describe with a paragraph what is shown in the image.",
        "<OCR>" => "What is the text in the image?",
        other => other,
    }
}

/// Resize, rescale and normalize into a CHW f32 buffer.
pub fn pixel_values(image: &DynamicImage, config: &PreprocessorConfig) -> (Vec<f32>, (usize, usize)) {
    let rgb = if config.do_resize {
        image
            .resize_exact(config.size.width, config.size.height, FilterType::CatmullRom)
            .to_rgb8()
    } else {
        image.to_rgb8()
    };

    let (width, height) = (rgb.width() as usize, rgb.height() as usize);
    let plane = width * height;
    let mut values = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let idx = y as usize * width + x as usize;
        for c in 0..3 {
            let mut v = pixel[c] as f32;
            if config.do_rescale {
                v *= config.rescale_factor;
            }
            if config.do_normalize {
                v = (v - config.image_mean[c]) / config.image_std[c];
            }
            values[c * plane + idx] = v;
        }
    }

    (values, (height, width))
}

pub struct FlorenceProcessor {
    tokenizer: Tokenizer,
    config: PreprocessorConfig,
}

impl FlorenceProcessor {
    pub fn new(tokenizer: Tokenizer, config: PreprocessorConfig) -> Self {
        Self { tokenizer, config }
    }

    pub fn from_files(tokenizer_path: &Path, config_path: &Path) -> Result<Self, LoadError> {
        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| LoadError::Backend(format!("{}: {e}", tokenizer_path.display())))?;
        let config = PreprocessorConfig::from_file(config_path)?;
        Ok(Self::new(tokenizer, config))
    }
}

impl Processor for FlorenceProcessor {
    fn prepare(&self, image: &DynamicImage, task: &str) -> Result<ModelInputs, InferenceError> {
        let (pixel_values, image_size) = pixel_values(image, &self.config);
        let encoding = self
            .tokenizer
            .encode(task_prompt(task), true)
            .map_err(|e| InferenceError::Model(format!("tokenization failed: {e}")))?;
        let input_ids = encoding.get_ids().iter().map(|&id| id as i64).collect();

        Ok(ModelInputs {
            pixel_values,
            image_size,
            input_ids,
        })
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, InferenceError> {
        self.tokenizer
            .decode(tokens, false)
            .map_err(|e| InferenceError::Decode(e.to_string()))
    }
}
