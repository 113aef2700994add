use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Speech-to-text request carrying the raw audio bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionRequest {
    /// Encoded audio file contents.
    #[serde(skip)]
    pub audio: Vec<u8>,
    /// File name sent with the upload; vendors infer the format from its extension.
    pub file_name: String,
    /// MIME type of the upload.
    pub mime_type: Option<String>,
    /// Optional model override.
    pub model: Option<String>,
    /// ISO-639-1 language hint.
    pub language: Option<String>,
    /// Text guiding the transcription style.
    pub prompt: Option<String>,
    /// Vendor response format, e.g. `json` or `verbose_json`.
    pub response_format: Option<String>,
    pub temperature: Option<f32>,
}

impl TranscriptionRequest {
    pub fn new(audio: Vec<u8>, file_name: impl Into<String>) -> Self {
        Self {
            audio,
            file_name: file_name.into(),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// Transcription produced by an adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    /// Detected or requested language, when reported.
    pub language: Option<String>,
    /// Audio duration in seconds, when reported.
    pub duration_secs: Option<f64>,
    /// Handle of the façade that served the request.
    pub served_by: String,
    /// Raw vendor payload.
    pub raw: Option<Value>,
}
