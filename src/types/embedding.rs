use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::UsageSummary;

/// Embedding request for one or more input texts.
///
/// # Examples
///
/// ```
/// # use unillm::types::EmbeddingRequest;
/// let request = EmbeddingRequest::new(vec!["first".into(), "second".into()])
///     .with_model("text-embedding-3-small");
/// assert_eq!(request.input.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// Texts to embed; output vectors follow the same order.
    pub input: Vec<String>,
    /// Optional model override.
    #[serde(default)]
    pub model: Option<String>,
    /// Requested output dimensionality, when the vendor supports it.
    #[serde(default)]
    pub dimensions: Option<u32>,
    /// Vendor parameters merged into the request body.
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

impl EmbeddingRequest {
    pub fn new(input: Vec<String>) -> Self {
        Self {
            input,
            ..Self::default()
        }
    }

    /// Request for a single text.
    pub fn single(text: impl Into<String>) -> Self {
        Self::new(vec![text.into()])
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Embedding vectors in input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub embeddings: Vec<Vec<f32>>,
    pub model: Option<String>,
    pub usage: UsageSummary,
    /// Handle of the façade that served the request.
    pub served_by: String,
}
