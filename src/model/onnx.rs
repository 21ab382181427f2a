//! Greedy Florence-2 generation over ONNX Runtime sessions.
//!
//! Four graphs: vision encoder (pixels -> image features), token embedder,
//! text encoder over [image features ++ prompt embeddings], and a decoder
//! without KV cache that is re-run over the growing sequence. The decoder
//! sequence is bounded by `max_new_tokens`, which keeps the quadratic
//! re-run cost small.

use std::path::Path;
use std::sync::Mutex;

use ort::session::Session;
use ort::value::Tensor;

use super::florence::GenerationIds;
use super::loader::{CaptionModel, ModelInputs};
use crate::error::{InferenceError, LoadError};

pub struct OnnxFlorence {
    vision: Mutex<Session>,
    embed: Mutex<Session>,
    encoder: Mutex<Session>,
    decoder: Mutex<Session>,
    ids: GenerationIds,
}

fn open_session(path: &Path, threads: usize) -> Result<Session, LoadError> {
    let build = || -> Result<Session, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Session::builder()?
            .with_intra_threads(threads)?
            .commit_from_file(path)?)
    };
    build().map_err(|e| LoadError::Backend(format!("{}: {e}", path.display())))
}

fn model_err(e: impl std::fmt::Display) -> InferenceError {
    InferenceError::Model(e.to_string())
}

/// Copy a named f32 output out of a run result as (shape, data).
macro_rules! extract_f32 {
    ($outputs:expr, $name:literal) => {{
        let (shape, data) = $outputs[$name].try_extract_tensor::<f32>().map_err(model_err)?;
        (shape.to_vec(), data.to_vec())
    }};
}

impl OnnxFlorence {
    pub fn open(
        vision: &Path,
        embed: &Path,
        encoder: &Path,
        decoder: &Path,
        ids: GenerationIds,
        threads: usize,
    ) -> Result<Self, LoadError> {
        log::info!("Creating ONNX sessions ({threads} intra-op threads)");
        Ok(Self {
            vision: Mutex::new(open_session(vision, threads)?),
            embed: Mutex::new(open_session(embed, threads)?),
            encoder: Mutex::new(open_session(encoder, threads)?),
            decoder: Mutex::new(open_session(decoder, threads)?),
            ids,
        })
    }

    fn lock<'a>(session: &'a Mutex<Session>) -> Result<std::sync::MutexGuard<'a, Session>, InferenceError> {
        session
            .lock()
            .map_err(|_| InferenceError::Model("session mutex poisoned".into()))
    }

    fn image_features(&self, inputs: &ModelInputs) -> Result<(Vec<i64>, Vec<f32>), InferenceError> {
        let (h, w) = inputs.image_size;
        let pixels = Tensor::from_array(([1usize, 3, h, w], inputs.pixel_values.clone()))
            .map_err(model_err)?;
        let mut session = Self::lock(&self.vision)?;
        let outputs = session
            .run(ort::inputs!["pixel_values" => pixels])
            .map_err(model_err)?;
        Ok(extract_f32!(outputs, "image_features"))
    }

    fn embed_tokens(&self, ids: &[i64]) -> Result<(Vec<i64>, Vec<f32>), InferenceError> {
        let input_ids = Tensor::from_array(([1usize, ids.len()], ids.to_vec())).map_err(model_err)?;
        let mut session = Self::lock(&self.embed)?;
        let outputs = session
            .run(ort::inputs!["input_ids" => input_ids])
            .map_err(model_err)?;
        Ok(extract_f32!(outputs, "inputs_embeds"))
    }

    fn encode(&self, embeds: Vec<f32>, seq_len: usize, hidden: usize) -> Result<Vec<f32>, InferenceError> {
        let inputs_embeds =
            Tensor::from_array(([1usize, seq_len, hidden], embeds)).map_err(model_err)?;
        let attention_mask =
            Tensor::from_array(([1usize, seq_len], vec![1i64; seq_len])).map_err(model_err)?;
        let mut session = Self::lock(&self.encoder)?;
        let outputs = session
            .run(ort::inputs![
                "inputs_embeds" => inputs_embeds,
                "attention_mask" => attention_mask
            ])
            .map_err(model_err)?;
        Ok(extract_f32!(outputs, "last_hidden_state").1)
    }

    /// Logits of the last decoder position.
    fn next_logits(
        &self,
        encoder_states: &[f32],
        enc_len: usize,
        hidden: usize,
        tokens: &[i64],
    ) -> Result<Vec<f32>, InferenceError> {
        let (_, embeds) = self.embed_tokens(tokens)?;
        let inputs_embeds =
            Tensor::from_array(([1usize, tokens.len(), hidden], embeds)).map_err(model_err)?;
        let encoder_hidden_states =
            Tensor::from_array(([1usize, enc_len, hidden], encoder_states.to_vec()))
                .map_err(model_err)?;
        let encoder_attention_mask =
            Tensor::from_array(([1usize, enc_len], vec![1i64; enc_len])).map_err(model_err)?;

        let mut session = Self::lock(&self.decoder)?;
        let outputs = session
            .run(ort::inputs![
                "encoder_attention_mask" => encoder_attention_mask,
                "encoder_hidden_states" => encoder_hidden_states,
                "inputs_embeds" => inputs_embeds
            ])
            .map_err(model_err)?;
        let (shape, logits) = extract_f32!(outputs, "logits");

        let vocab = shape.last().copied().unwrap_or(0) as usize;
        if vocab == 0 || logits.len() < vocab {
            return Err(InferenceError::Model(format!("unexpected logits shape {shape:?}")));
        }
        Ok(logits[logits.len() - vocab..].to_vec())
    }
}

fn argmax(values: &[f32]) -> u32 {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best as u32
}

impl CaptionModel for OnnxFlorence {
    fn generate(
        &self,
        inputs: &ModelInputs,
        max_new_tokens: usize,
    ) -> Result<Vec<u32>, InferenceError> {
        let (image_shape, image_features) = self.image_features(inputs)?;
        let (text_shape, text_embeds) = self.embed_tokens(&inputs.input_ids)?;

        let hidden = image_shape.last().copied().unwrap_or(0) as usize;
        if hidden == 0 || text_shape.last().copied() != Some(hidden as i64) {
            return Err(InferenceError::Model(format!(
                "hidden size mismatch: image {image_shape:?}, text {text_shape:?}"
            )));
        }

        let mut embeds = image_features;
        embeds.extend_from_slice(&text_embeds);
        let enc_len = embeds.len() / hidden;
        let encoder_states = self.encode(embeds, enc_len, hidden)?;

        let mut tokens: Vec<i64> = vec![self.ids.decoder_start_token_id as i64];
        for _ in 0..max_new_tokens {
            let logits = self.next_logits(&encoder_states, enc_len, hidden, &tokens)?;
            let next = argmax(&logits);
            tokens.push(next as i64);
            if next == self.ids.eos_token_id {
                break;
            }
        }
        log::debug!("Generated {} tokens", tokens.len() - 1);

        Ok(tokens.into_iter().map(|t| t as u32).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax_picks_first_maximum() {
        assert_eq!(argmax(&[0.1, 0.9, 0.3, 0.9]), 1);
        assert_eq!(argmax(&[-1.0]), 0);
    }
}
