use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::LLMClient;
use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::provider::registry::{ProviderRegistry, default_registry};

/// Describes one façade and, through `fallback`, the rest of its chain.
///
/// ```
/// use unillm::config::ClientConfig;
///
/// let config = ClientConfig::from_json(r#"{
///     "engine": "openai",
///     "credential": {"type": "bearer", "token": "sk-test"},
///     "model": "gpt-4o-mini",
///     "fallback": {
///         "engine": "groq",
///         "credential": {"type": "api_key", "key": "gsk-test"},
///         "model": "llama-3.1-8b-instant"
///     }
/// }"#).unwrap();
/// assert_eq!(config.handle(), "openai:gpt-4o-mini");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Façade identifier. Defaults to `<engine>:<model>`, or `<engine>` without a model.
    #[serde(default)]
    pub handle: Option<String>,
    /// Registry key, e.g. `openai`, `groq` or `anthropic`.
    pub engine: String,
    #[serde(flatten)]
    pub settings: ProviderSettings,
    /// Façade tried after a recoverable failure of this one.
    #[serde(default)]
    pub fallback: Option<Box<ClientConfig>>,
    /// Default metadata handed to the callback.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// Adapter settings understood by the registry factories.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub credential: Credential,
    /// Model used when a request does not name one.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Headers merged over the adapter defaults.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Vendor body parameters merged into every request.
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

/// Credentials are passed through to the vendor untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    ApiKey {
        /// Header carrying the key; the adapter default when absent.
        #[serde(default)]
        header: Option<String>,
        key: String,
    },
    Bearer {
        token: String,
    },
    /// Local engines that need no authentication.
    #[default]
    None,
}

impl ClientConfig {
    pub fn new(engine: impl Into<String>, settings: ProviderSettings) -> Self {
        Self {
            handle: None,
            engine: engine.into(),
            settings,
            fallback: None,
            metadata: HashMap::new(),
        }
    }

    /// Parses a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self, LLMError> {
        serde_json::from_str(json).map_err(|err| LLMError::InvalidConfig {
            field: "config".to_string(),
            reason: err.to_string(),
        })
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    pub fn with_fallback(mut self, fallback: ClientConfig) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }

    /// Resolved façade identifier.
    pub fn handle(&self) -> String {
        match (&self.handle, &self.settings.model) {
            (Some(handle), _) => handle.clone(),
            (None, Some(model)) => format!("{}:{model}", self.engine),
            (None, None) => self.engine.clone(),
        }
    }
}

/// Builds a façade and its fallback chain using the built-in engines.
pub fn build_client(
    config: &ClientConfig,
    transport: DynHttpTransport,
) -> Result<LLMClient, LLMError> {
    build_client_with_registry(config, default_registry(), transport)
}

/// Builds a façade and its fallback chain using `registry`.
///
/// # Errors
///
/// Fails with [`LLMError::InvalidConfig`] for unknown engines, missing
/// credentials or a handle that appears twice in the chain.
pub fn build_client_with_registry(
    config: &ClientConfig,
    registry: &ProviderRegistry,
    transport: DynHttpTransport,
) -> Result<LLMClient, LLMError> {
    let fallback = match &config.fallback {
        Some(next) => Some(Arc::new(build_client_with_registry(
            next,
            registry,
            transport.clone(),
        )?)),
        None => None,
    };

    let provider = registry.build(&config.engine, &config.settings, transport)?;
    let mut builder = LLMClient::builder(config.handle(), provider);
    if let Some(fallback) = fallback {
        builder = builder.with_fallback(fallback);
    }
    for (key, value) in &config.metadata {
        builder = builder.with_metadata(key.clone(), value.clone());
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::reqwest::default_dyn_transport;

    #[test]
    fn nested_fallbacks_build_a_flat_chain() {
        let config = ClientConfig::from_json(
            r#"{
                "engine": "openai",
                "credential": {"type": "bearer", "token": "sk-test"},
                "model": "gpt-4o-mini",
                "metadata": {"team": "search"},
                "fallback": {
                    "engine": "anthropic",
                    "credential": {"type": "api_key", "key": "sk-ant"},
                    "model": "claude-3-5-haiku-latest",
                    "fallback": {
                        "handle": "last-resort",
                        "engine": "groq",
                        "credential": {"type": "api_key", "key": "gsk"}
                    }
                }
            }"#,
        )
        .expect("config");

        let client = build_client(&config, default_dyn_transport().expect("transport"))
            .expect("client");
        assert_eq!(
            client.chain_handles(),
            vec![
                "openai:gpt-4o-mini".to_string(),
                "anthropic:claude-3-5-haiku-latest".to_string(),
                "last-resort".to_string(),
            ]
        );
    }

    #[test]
    fn duplicate_handle_in_chain_is_rejected() {
        let settings = ProviderSettings {
            credential: Credential::Bearer {
                token: "sk".to_string(),
            },
            ..ProviderSettings::default()
        };
        let config = ClientConfig::new("openai", settings.clone())
            .with_handle("primary")
            .with_fallback(ClientConfig::new("groq", settings).with_handle("primary"));

        let err = build_client(&config, default_dyn_transport().expect("transport"))
            .err()
            .expect("duplicate handle must fail");
        assert!(matches!(err, LLMError::InvalidConfig { ref field, .. } if field == "fallback"));
    }

    #[test]
    fn credential_defaults_to_none() {
        let config = ClientConfig::from_json(r#"{"engine": "openai"}"#).expect("config");
        assert!(matches!(config.settings.credential, Credential::None));
        assert_eq!(config.handle(), "openai");

        let err = build_client(&config, default_dyn_transport().expect("transport"))
            .err()
            .expect("credential required");
        assert!(matches!(err, LLMError::InvalidConfig { ref field, .. } if field == "credential"));
    }

    #[test]
    fn malformed_document_is_invalid_config() {
        let err = ClientConfig::from_json("{\"engine\": 7}").unwrap_err();
        assert!(matches!(err, LLMError::InvalidConfig { .. }));
    }
}
