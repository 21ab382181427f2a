//! Loader for the Florence-2 ONNX export on the HuggingFace hub.

use std::path::Path;

use fixity_caption_config::HostConfig;
use fixity_caption_types::ModelVariant;
use serde::Deserialize;

use super::hub::HubFetcher;
use super::loader::{CaptionModel, ModelLoader, Processor, ProgressReporter};
use super::processor::FlorenceProcessor;
use crate::error::LoadError;

/// 4-bit quantized graphs, in the order they are fetched.
pub const MODEL_FILES: [&str; 5] = [
    "config.json",
    "onnx/vision_encoder_q4.onnx",
    "onnx/embed_tokens_q4.onnx",
    "onnx/encoder_model_q4.onnx",
    "onnx/decoder_model_q4.onnx",
];

pub const PROCESSOR_FILES: [&str; 2] = ["preprocessor_config.json", "tokenizer.json"];

/// Token ids the decoder loop needs, read from `config.json`.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GenerationIds {
    pub decoder_start_token_id: u32,
    pub eos_token_id: u32,
}

impl Default for GenerationIds {
    fn default() -> Self {
        Self {
            decoder_start_token_id: 2,
            eos_token_id: 2,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawModelConfig {
    decoder_start_token_id: Option<u32>,
    eos_token_id: Option<u32>,
    text_config: Option<GenerationIds>,
}

impl GenerationIds {
    /// Top-level ids win; Florence-2 also nests them under `text_config`.
    pub fn from_config_json(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawModelConfig = serde_json::from_str(text)?;
        let nested = raw.text_config.unwrap_or_default();
        Ok(Self {
            decoder_start_token_id: raw
                .decoder_start_token_id
                .unwrap_or(nested.decoder_start_token_id),
            eos_token_id: raw.eos_token_id.unwrap_or(nested.eos_token_id),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| LoadError::Backend(format!("{}: {e}", path.display())))?;
        Self::from_config_json(&text)
            .map_err(|e| LoadError::Backend(format!("{}: {e}", path.display())))
    }
}

pub struct FlorenceLoader {
    fetcher: HubFetcher,
    #[cfg_attr(not(feature = "onnx"), allow(dead_code))]
    intra_threads: usize,
}

impl FlorenceLoader {
    pub fn new(config: &HostConfig) -> Self {
        Self {
            fetcher: HubFetcher::new(config.hub_endpoint.clone(), config.cache_dir.clone()),
            intra_threads: config.intra_threads,
        }
    }
}

impl ModelLoader for FlorenceLoader {
    #[cfg(feature = "onnx")]
    fn load_model(
        &self,
        variant: ModelVariant,
        progress: &ProgressReporter,
    ) -> Result<Box<dyn CaptionModel>, LoadError> {
        let repo = variant.repo_id();
        let mut paths = Vec::with_capacity(MODEL_FILES.len());
        for file in MODEL_FILES {
            paths.push(self.fetcher.fetch(repo, file, progress)?);
        }

        let ids = GenerationIds::from_file(&paths[0])?;
        let model = super::onnx::OnnxFlorence::open(
            &paths[1],
            &paths[2],
            &paths[3],
            &paths[4],
            ids,
            self.intra_threads,
        )?;
        Ok(Box::new(model))
    }

    #[cfg(not(feature = "onnx"))]
    fn load_model(
        &self,
        variant: ModelVariant,
        _progress: &ProgressReporter,
    ) -> Result<Box<dyn CaptionModel>, LoadError> {
        Err(LoadError::Backend(format!(
            "cannot run {variant}: rebuild with `--features onnx`"
        )))
    }

    fn load_processor(
        &self,
        variant: ModelVariant,
        progress: &ProgressReporter,
    ) -> Result<Box<dyn Processor>, LoadError> {
        let repo = variant.repo_id();
        let config_path = self.fetcher.fetch(repo, PROCESSOR_FILES[0], progress)?;
        let tokenizer_path = self.fetcher.fetch(repo, PROCESSOR_FILES[1], progress)?;
        Ok(Box::new(FlorenceProcessor::from_files(
            &tokenizer_path,
            &config_path,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_ids_top_level() {
        let ids = GenerationIds::from_config_json(
            r#"{"decoder_start_token_id": 5, "eos_token_id": 6, "model_type": "florence2"}"#,
        )
        .unwrap();
        assert_eq!(ids, GenerationIds { decoder_start_token_id: 5, eos_token_id: 6 });
    }

    #[test]
    fn test_generation_ids_nested_and_defaults() {
        let nested = GenerationIds::from_config_json(
            r#"{"text_config": {"decoder_start_token_id": 2, "eos_token_id": 3}}"#,
        )
        .unwrap();
        assert_eq!(nested.eos_token_id, 3);

        let empty = GenerationIds::from_config_json("{}").unwrap();
        assert_eq!(empty, GenerationIds::default());
    }

    #[test]
    fn test_quantized_files_requested() {
        assert!(MODEL_FILES[1..].iter().all(|f| f.ends_with("_q4.onnx")));
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn test_without_backend_load_fails_cleanly() {
        let loader = FlorenceLoader::new(&HostConfig::default());
        let (tx, _rx) = tokio::sync::mpsc::channel(4);
        let err = loader
            .load_model(ModelVariant::Base, &ProgressReporter::new(tx))
            .err()
            .unwrap();
        assert!(err.to_string().contains("--features onnx"));
    }
}
