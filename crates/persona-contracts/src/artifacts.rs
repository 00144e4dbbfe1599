use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An encoded image: base64 data plus the media type it was encoded as.
///
/// Payloads are binary-safe strings so they can travel through JSON stores
/// and the generation wire format without re-encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub data: String,
    pub mime_type: String,
}

impl ImagePayload {
    pub fn new(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// The preprocessed user photo. Never mutated after preprocessing; edits
/// always operate on the most recent generation result instead.
pub type SourceImage = ImagePayload;

/// An image returned by the generation service. Superseded wholesale on
/// every successful edit.
pub type GenerationResult = ImagePayload;

/// Cache key for a generation: hash of the input payload, the composed
/// prompt, and the model id, so the same request resolves to the same entry.
pub fn content_fingerprint(image: &ImagePayload, prompt: &str, model_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image.data.as_bytes());
    hasher.update(b"\x00");
    hasher.update(image.mime_type.as_bytes());
    hasher.update(b"\x00");
    hasher.update(prompt.as_bytes());
    hasher.update(b"\x00");
    hasher.update(model_id.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::{content_fingerprint, ImagePayload};

    #[test]
    fn fingerprint_is_stable_for_identical_inputs() {
        let image = ImagePayload::new("aGVsbG8=", "image/jpeg");
        let first = content_fingerprint(&image, "corporate prompt", "gemini-2.5-flash-image");
        let second = content_fingerprint(&image, "corporate prompt", "gemini-2.5-flash-image");
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn fingerprint_varies_with_prompt_and_model() {
        let image = ImagePayload::new("aGVsbG8=", "image/jpeg");
        let base = content_fingerprint(&image, "corporate prompt", "gemini-2.5-flash-image");
        assert_ne!(
            base,
            content_fingerprint(&image, "outdoor prompt", "gemini-2.5-flash-image")
        );
        assert_ne!(
            base,
            content_fingerprint(&image, "corporate prompt", "gemini-3-pro-image-preview")
        );
    }
}
