//! One caption request: data URL -> pixels -> tokens -> cleaned text.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::DynamicImage;

use crate::error::InferenceError;
use crate::model::LoadedModel;

/// Task directive asking for a paragraph-length scene description.
pub const CAPTION_TASK: &str = "<MORE_DETAILED_CAPTION>";

/// Generation budget; bounds worst-case latency and memory on-device.
pub const MAX_NEW_TOKENS: usize = 100;

/// Sequence markers left in the output when special tokens are kept.
const SEQUENCE_MARKERS: [&str; 3] = ["</s>", "<s>", "<pad>"];

/// Decode a `data:<mime>;base64,<payload>` URL into an image.
pub fn decode_data_url(url: &str) -> Result<DynamicImage, InferenceError> {
    let rest = url
        .trim()
        .strip_prefix("data:")
        .ok_or_else(|| InferenceError::DataUrl("missing `data:` scheme".into()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| InferenceError::DataUrl("missing `,` separator".into()))?;
    if !meta.split(';').any(|part| part.eq_ignore_ascii_case("base64")) {
        return Err(InferenceError::DataUrl("only base64 payloads are supported".into()));
    }

    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| InferenceError::DataUrl(e.to_string()))?;

    Ok(image::load_from_memory(&bytes)?)
}

/// Strip the echoed task and sequence markers from decoded model output.
pub fn clean_caption(decoded: &str, task: &str) -> String {
    let mut text = decoded.replace(task, "");
    for marker in SEQUENCE_MARKERS {
        text = text.replace(marker, "");
    }
    text.trim().to_string()
}

/// Run the full caption pipeline on an already-loaded model. Blocking.
pub fn run_caption(model: &LoadedModel, image_url: &str) -> Result<String, InferenceError> {
    let image = decode_data_url(image_url)?;
    log::debug!("Decoded image {}x{}", image.width(), image.height());

    let inputs = model.processor.prepare(&image, CAPTION_TASK)?;
    let tokens = model.model.generate(&inputs, MAX_NEW_TOKENS)?;
    let decoded = model.processor.decode(&tokens)?;

    Ok(clean_caption(&decoded, CAPTION_TASK))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::png_data_url;

    #[test]
    fn test_clean_caption_strips_task_and_markers() {
        let raw = "</s><s><MORE_DETAILED_CAPTION>A rusted coolant pump valve.</s><pad><pad>";
        assert_eq!(clean_caption(raw, CAPTION_TASK), "A rusted coolant pump valve.");
    }

    #[test]
    fn test_clean_caption_removes_every_occurrence() {
        let raw = "<s>pump</s> <s>valve</s>";
        let cleaned = clean_caption(raw, CAPTION_TASK);
        assert_eq!(cleaned, "pump valve");
        assert!(!cleaned.contains("<s>") && !cleaned.contains("</s>"));
    }

    #[test]
    fn test_decode_valid_png() {
        let img = decode_data_url(&png_data_url()).unwrap();
        assert_eq!((img.width(), img.height()), (4, 4));
    }

    #[test]
    fn test_decode_tolerates_whitespace_in_payload() {
        let url = png_data_url();
        let (head, payload) = url.split_once(',').unwrap();
        let wrapped = format!("{head},{}\n{}", &payload[..10], &payload[10..]);
        assert!(decode_data_url(&wrapped).is_ok());
    }

    #[test]
    fn test_decode_rejects_malformed_input() {
        assert!(matches!(
            decode_data_url("http://example.com/a.jpg"),
            Err(InferenceError::DataUrl(_))
        ));
        assert!(matches!(
            decode_data_url("data:image/png;base64"),
            Err(InferenceError::DataUrl(_))
        ));
        assert!(matches!(
            decode_data_url("data:text/plain,hello"),
            Err(InferenceError::DataUrl(_))
        ));
        assert!(matches!(
            decode_data_url("data:image/jpeg;base64,!!!not-base64"),
            Err(InferenceError::DataUrl(_))
        ));
        assert!(matches!(
            decode_data_url("data:image/jpeg;base64,AAAA"),
            Err(InferenceError::Image(_))
        ));
    }
}
