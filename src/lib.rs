//! Provider-agnostic LLM client.
//!
//! One [`LLMClient`] façade drives any registered vendor adapter through the
//! same generate, stream, embed and transcribe surface, walks a fallback chain
//! on transport or protocol failures and reports every successful call to an
//! optional callback.

pub mod aggregate;
pub mod blocking;
pub mod client;
pub mod config;
pub mod error;
mod executor;
pub mod http;
pub mod provider;
pub mod stream;
pub mod types;
pub mod usage;

pub use blocking::{BlockingClient, BlockingStream};
pub use client::{CallbackError, CallbackEvent, GenerationCallback, LLMClient, LLMClientBuilder};
pub use config::{ClientConfig, Credential, ProviderSettings, build_client};
pub use error::LLMError;
pub use provider::{ChatStream, DynProvider, LLMProvider};
pub use types::*;
