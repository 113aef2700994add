//! OpenAI Chat Completions adapter, shared by every OpenAI-compatible vendor.

mod error;
pub mod presets;
mod provider;
mod request;
mod response;
mod stream;
mod types;

pub use presets::{OpenAiPreset, UsageQuirk};
pub use provider::OpenAiChatProvider;
