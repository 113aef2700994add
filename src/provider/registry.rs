use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use serde_json::Value;

use crate::config::{Credential, ProviderSettings};
use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::provider::DynProvider;
use crate::provider::anthropic_messages::AnthropicMessagesProvider;
use crate::provider::google_gemini::GoogleGeminiProvider;
use crate::provider::openai_chat::OpenAiChatProvider;
use crate::provider::openai_chat::presets::{self, PRESETS};

/// Builds an adapter for `engine` from its settings and a transport.
pub type ProviderFactory = fn(
    engine: &str,
    settings: &ProviderSettings,
    transport: DynHttpTransport,
) -> Result<DynProvider, LLMError>;

/// Maps engine identifiers to adapter factories.
///
/// Adding a vendor means registering one factory; the orchestration code
/// never branches on the engine.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding every built-in engine.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for preset in PRESETS {
            registry.register(preset.engine, build_openai_compatible);
        }
        registry.register("anthropic", build_anthropic);
        registry.register("google", build_google);
        registry
    }

    /// Registers or replaces the factory for `engine`.
    pub fn register(&mut self, engine: impl Into<String>, factory: ProviderFactory) -> &mut Self {
        self.factories.insert(engine.into(), factory);
        self
    }

    pub fn contains(&self, engine: &str) -> bool {
        self.factories.contains_key(engine)
    }

    /// Registered engine identifiers, sorted.
    pub fn engines(&self) -> Vec<&str> {
        let mut engines: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        engines.sort_unstable();
        engines
    }

    /// Instantiates the adapter registered for `engine`.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::InvalidConfig`] for an unknown engine, or whatever the
    /// factory reports for unusable settings.
    pub fn build(
        &self,
        engine: &str,
        settings: &ProviderSettings,
        transport: DynHttpTransport,
    ) -> Result<DynProvider, LLMError> {
        let factory = self
            .factories
            .get(engine)
            .ok_or_else(|| LLMError::InvalidConfig {
                field: "engine".to_string(),
                reason: format!("unknown engine {engine}"),
            })?;
        factory(engine, settings, transport)
    }
}

static DEFAULT_REGISTRY: LazyLock<ProviderRegistry> = LazyLock::new(ProviderRegistry::with_builtin);

/// Process-wide registry of the built-in engines. Read-only after first use.
pub fn default_registry() -> &'static ProviderRegistry {
    &DEFAULT_REGISTRY
}

fn timeout(settings: &ProviderSettings) -> Option<Duration> {
    settings.timeout_secs.map(Duration::from_secs)
}

fn missing_credential(engine: &str) -> LLMError {
    LLMError::InvalidConfig {
        field: "credential".to_string(),
        reason: format!("engine {engine} requires a credential"),
    }
}

fn build_openai_compatible(
    engine: &str,
    settings: &ProviderSettings,
    transport: DynHttpTransport,
) -> Result<DynProvider, LLMError> {
    let preset = presets::preset(engine).ok_or_else(|| LLMError::InvalidConfig {
        field: "engine".to_string(),
        reason: format!("{engine} is not an OpenAI-compatible engine"),
    })?;

    // A custom header carries the key verbatim instead of `Authorization: Bearer`.
    let (api_key, key_header) = match &settings.credential {
        Credential::ApiKey {
            header: Some(header),
            key,
        } => (None, Some((header.clone(), key.clone()))),
        Credential::ApiKey { header: None, key } => (Some(key.clone()), None),
        Credential::Bearer { token } => (Some(token.clone()), None),
        Credential::None => return Err(missing_credential(engine)),
    };

    let mut provider = OpenAiChatProvider::for_preset(transport, *preset, api_key);
    if let Some((header, key)) = key_header {
        provider = provider.with_header(header, key);
    }
    if let Some(base_url) = &settings.base_url {
        provider = provider.with_base_url(base_url.clone());
    }
    if let Some(model) = &settings.model {
        provider = provider.with_default_model(model.clone());
    }
    if let Some(timeout) = timeout(settings) {
        provider = provider.with_timeout(timeout);
    }
    for (name, value) in &settings.headers {
        provider = provider.with_header(name.clone(), value.clone());
    }
    for (key, value) in &settings.extra {
        provider = match (key.as_str(), value) {
            ("organization", Value::String(org)) => provider.with_organization(org.clone()),
            _ => provider.with_extra(key.clone(), value.clone()),
        };
    }
    Ok(Arc::new(provider))
}

fn build_anthropic(
    engine: &str,
    settings: &ProviderSettings,
    transport: DynHttpTransport,
) -> Result<DynProvider, LLMError> {
    // A custom header carries the key verbatim instead of `x-api-key`.
    let mut provider = match &settings.credential {
        Credential::ApiKey { header, key } => {
            let provider = AnthropicMessagesProvider::new(transport, key.clone());
            match header {
                Some(header) => provider.with_api_key_header(header.clone()),
                None => provider,
            }
        }
        Credential::Bearer { token } => {
            AnthropicMessagesProvider::new(transport, String::new()).with_bearer_token(token.clone())
        }
        Credential::None => return Err(missing_credential(engine)),
    };

    if let Some(base_url) = &settings.base_url {
        provider = provider.with_base_url(base_url.clone());
    }
    if let Some(model) = &settings.model {
        provider = provider.with_default_model(model.clone());
    }
    if let Some(timeout) = timeout(settings) {
        provider = provider.with_timeout(timeout);
    }
    for (name, value) in &settings.headers {
        provider = provider.with_header(name.clone(), value.clone());
    }
    for (key, value) in &settings.extra {
        provider = match (key.as_str(), value) {
            ("version", Value::String(version)) => provider.with_version(version.clone()),
            ("beta", Value::String(beta)) => provider.with_beta(beta.clone()),
            _ => provider.with_extra(key.clone(), value.clone()),
        };
    }
    Ok(Arc::new(provider))
}

fn build_google(
    engine: &str,
    settings: &ProviderSettings,
    transport: DynHttpTransport,
) -> Result<DynProvider, LLMError> {
    let mut provider = match &settings.credential {
        Credential::ApiKey { header, key } => {
            let provider = GoogleGeminiProvider::new(transport, key.clone());
            match header {
                Some(header) => provider.with_api_key_header(header.clone()),
                None => provider,
            }
        }
        Credential::Bearer { token } => {
            GoogleGeminiProvider::new(transport, String::new()).with_bearer_token(token.clone())
        }
        Credential::None => return Err(missing_credential(engine)),
    };

    if let Some(base_url) = &settings.base_url {
        provider = provider.with_base_url(base_url.clone());
    }
    if let Some(model) = &settings.model {
        provider = provider.with_default_model(model.clone());
    }
    if let Some(timeout) = timeout(settings) {
        provider = provider.with_timeout(timeout);
    }
    for (name, value) in &settings.headers {
        provider = provider.with_header(name.clone(), value.clone());
    }
    for (key, value) in &settings.extra {
        provider = provider.with_extra(key.clone(), value.clone());
    }
    Ok(Arc::new(provider))
}
