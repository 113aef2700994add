//! Shared data structures modeling conversations, requests, streamed deltas and
//! final results.
//!
//! These types normalize provider-specific payloads so the orchestration layer can
//! stay agnostic of individual API differences.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

mod audio;
mod embedding;

pub use audio::{Transcription, TranscriptionRequest};
pub use embedding::{EmbeddingRequest, EmbeddingResponse};

/// Chat role string compatible with provider-specific semantics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(pub String);

impl Role {
    pub fn system() -> Self {
        Self("system".to_string())
    }

    pub fn user() -> Self {
        Self("user".to_string())
    }

    pub fn assistant() -> Self {
        Self("assistant".to_string())
    }

    pub fn tool() -> Self {
        Self("tool".to_string())
    }
}

/// Normalized chat message shared across providers.
///
/// Each message bundles a [`Role`], an optional name, and a sequence of
/// [`ContentPart`] entries so callers can mix text, images or tool directives
/// in a single turn.
///
/// # Examples
///
/// ```
/// # use unillm::types::{ContentPart, Message, Role, TextContent, ImageContent, ImageSource};
/// let msg = Message {
///     role: Role::user(),
///     name: Some("alice".into()),
///     content: vec![
///         ContentPart::Text(TextContent { text: "Describe this image".into() }),
///         ContentPart::Image(ImageContent {
///             source: ImageSource::Url { url: "https://example.com/img.png".into() },
///             detail: None,
///         }),
///     ],
///     metadata: None,
/// };
/// assert_eq!(msg.content.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role associated with this message.
    pub role: Role,
    /// Optional vendor-specific name attribute.
    #[serde(default)]
    pub name: Option<String>,
    /// Multimodal content parts provided in order.
    #[serde(default)]
    pub content: Vec<ContentPart>,
    /// Arbitrary metadata forwarded to providers.
    #[serde(default)]
    pub metadata: Option<HashMap<String, Value>>,
}

impl Message {
    /// Builds a single-text message for the given role.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            name: None,
            content: vec![ContentPart::Text(TextContent { text: text.into() })],
            metadata: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::system(), text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::user(), text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::assistant(), text)
    }

    /// Concatenates every text part of the message, separated by newlines.
    pub fn joined_text(&self) -> Option<String> {
        let mut buffer = String::new();
        for part in &self.content {
            if let ContentPart::Text(TextContent { text }) = part {
                if !buffer.is_empty() {
                    buffer.push('\n');
                }
                buffer.push_str(text);
            }
        }
        if buffer.is_empty() { None } else { Some(buffer) }
    }
}

/// Multimodal content part covering text, images, tools, and vendor data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text content variant.
    Text(TextContent),
    /// Image content variant.
    Image(ImageContent),
    /// Tool invocation emitted by the assistant.
    ToolCall(ToolCall),
    /// Tool execution result authored by the tool role.
    ToolResult(ToolResult),
    /// Vendor-defined or opaque content payload, forwarded verbatim.
    Data { data: Value },
}

/// Textual content payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    /// Plain UTF-8 text.
    pub text: String,
}

/// Image payload attached to a user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageContent {
    /// Source describing where the image bytes come from.
    pub source: ImageSource,
    /// Optional detail hint.
    #[serde(default)]
    pub detail: Option<ImageDetail>,
}

/// Source for an image input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageSource {
    /// Public URL accessible by the provider.
    Url { url: String },
    /// Base64-encoded inline payload.
    Base64 {
        data: String,
        mime_type: Option<String>,
    },
}

/// Detail preset requested for image inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageDetail {
    Low,
    High,
    Auto,
}

/// Ordered sequence of messages owned by the caller.
///
/// The core only ever reads a conversation; adapters receive it by reference
/// through the [`GenerationRequest`].
///
/// # Examples
///
/// ```
/// # use unillm::types::Conversation;
/// let mut conversation = Conversation::with_system("You are terse.");
/// conversation.add_user_message("Hello");
/// conversation.add_assistant_message("Hi.");
/// assert_eq!(conversation.len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a conversation with a leading system message.
    pub fn with_system(system: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system)],
        }
    }

    pub fn add_message(&mut self, message: Message) -> &mut Self {
        self.messages.push(message);
        self
    }

    pub fn add_system_message(&mut self, text: impl Into<String>) -> &mut Self {
        self.add_message(Message::system(text))
    }

    pub fn add_user_message(&mut self, text: impl Into<String>) -> &mut Self {
        self.add_message(Message::user(text))
    }

    /// Adds a user turn carrying an inline base64 image followed by text.
    pub fn add_user_image(
        &mut self,
        text: impl Into<String>,
        base64_image: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> &mut Self {
        self.add_message(Message {
            role: Role::user(),
            name: None,
            content: vec![
                ContentPart::Image(ImageContent {
                    source: ImageSource::Base64 {
                        data: base64_image.into(),
                        mime_type: Some(mime_type.into()),
                    },
                    detail: None,
                }),
                ContentPart::Text(TextContent { text: text.into() }),
            ],
            metadata: None,
        })
    }

    pub fn add_assistant_message(&mut self, text: impl Into<String>) -> &mut Self {
        self.add_message(Message::assistant(text))
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl From<Vec<Message>> for Conversation {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

/// Declarative definition of a function tool available to the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique name exposed to the model.
    pub name: String,
    /// Natural-language description of the tool purpose.
    #[serde(default)]
    pub description: Option<String>,
    /// JSON Schema describing the input payload, passed through untouched.
    #[serde(default)]
    pub input_schema: Option<Value>,
}

/// Tool call emitted inside a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-supplied invocation identifier.
    pub id: Option<String>,
    /// Name of the invoked tool.
    pub name: String,
    /// Structured arguments; kept as a JSON string value when they do not parse.
    pub arguments: Value,
}

/// Result returned by a tool execution step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Correlated call identifier.
    pub call_id: Option<String>,
    /// JSON payload returned by the tool.
    pub output: Value,
    /// Indicates whether the tool reported an error.
    #[serde(default)]
    pub is_error: bool,
}

/// Tool-choice strategies supported across providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    /// Provider decides when to call tools.
    Auto,
    /// Provider must invoke at least one tool.
    Required,
    /// Tools are disabled for the request.
    None,
    /// Force a specific tool by name.
    Tool { name: String },
}

/// Response-formatting modes supported by providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonObject,
    JsonSchema { schema: Value },
}

/// Tunable generation parameters.
///
/// Every field is optional so callers only set knobs they care about. Adapters
/// ignore parameters their vendor does not understand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Optional model identifier override.
    pub model: Option<String>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Nucleus sampling parameter.
    pub top_p: Option<f32>,
    /// Maximum number of output tokens.
    pub max_output_tokens: Option<u32>,
    /// Stop sequences.
    #[serde(default)]
    pub stop: Vec<String>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    /// Whether providers may execute tool calls in parallel.
    pub parallel_tool_calls: Option<bool>,
    /// Per-call vendor parameters merged into the request body.
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

/// One generation call: the conversation plus parameters and tools.
///
/// The request is immutable for the duration of an orchestrated call; every
/// façade of a fallback chain receives an identical copy.
///
/// # Examples
///
/// ```
/// # use unillm::types::{Conversation, GenerationRequest};
/// let mut conversation = Conversation::new();
/// conversation.add_user_message("Hello");
/// let request = GenerationRequest::new(conversation)
///     .with_model("gpt-4o-mini")
///     .with_temperature(0.2);
/// assert_eq!(request.options.model.as_deref(), Some("gpt-4o-mini"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Ordered conversation sent to the model.
    pub conversation: Conversation,
    /// Fine-grained generation options.
    #[serde(default)]
    pub options: GenerationOptions,
    /// Tool definitions available to the assistant.
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    /// Strategy describing how tools may be invoked.
    #[serde(default)]
    pub tool_choice: Option<ToolChoice>,
    /// Optional response-formatting requirement.
    #[serde(default)]
    pub response_format: Option<ResponseFormat>,
    /// Caller metadata handed to the callback; never sent to vendors.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl GenerationRequest {
    pub fn new(conversation: impl Into<Conversation>) -> Self {
        Self {
            conversation: conversation.into(),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.options.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.options.temperature = Some(temperature);
        self
    }

    pub fn with_max_output_tokens(mut self, max_tokens: u32) -> Self {
        self.options.max_output_tokens = Some(max_tokens);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Operation families exposed by adapters and façades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Generate,
    Stream,
    Embed,
    Transcribe,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Generate => "generate",
            Operation::Stream => "stream",
            Operation::Embed => "embed",
            Operation::Transcribe => "transcribe",
        };
        f.write_str(name)
    }
}

/// Canonical streaming unit produced by every chunk normalizer.
///
/// A delta carries a content fragment (possibly empty), zero or more tool-call
/// fragments, and optionally a finish reason and usage. The last delta of a
/// stream is the only one whose `finish_reason` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamDelta {
    /// Incremental content fragment.
    #[serde(default)]
    pub content: String,
    /// Tool-call fragments, possibly partial.
    #[serde(default)]
    pub tool_calls: Vec<ToolCallDelta>,
    /// Absent until the terminal delta.
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
    /// Absent until the vendor reports usage.
    #[serde(default)]
    pub usage: Option<UsageSummary>,
}

/// Classification of a [`StreamDelta`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    Content,
    ToolCall,
    Finish,
    Usage,
}

impl StreamDelta {
    /// Content-only delta.
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: text.into(),
            ..Self::default()
        }
    }

    /// Delta carrying tool-call fragments only.
    pub fn tool_calls(tool_calls: Vec<ToolCallDelta>) -> Self {
        Self {
            tool_calls,
            ..Self::default()
        }
    }

    /// Terminal delta with empty content.
    pub fn finish(reason: FinishReason) -> Self {
        Self {
            finish_reason: Some(reason),
            ..Self::default()
        }
    }

    /// Usage-only delta.
    pub fn usage_only(usage: UsageSummary) -> Self {
        Self {
            usage: Some(usage),
            ..Self::default()
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.finish_reason.is_some()
    }

    /// Classifies the delta; a finish signal wins over everything else.
    pub fn kind(&self) -> DeltaKind {
        if self.finish_reason.is_some() {
            DeltaKind::Finish
        } else if !self.tool_calls.is_empty() {
            DeltaKind::ToolCall
        } else if self.content.is_empty() && self.usage.is_some() {
            DeltaKind::Usage
        } else {
            DeltaKind::Content
        }
    }
}

/// Fragment of a streamed tool call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Position of the call within the response, used to merge fragments.
    pub index: usize,
    /// Identifier, usually present on the first fragment only.
    pub id: Option<String>,
    /// Tool name, usually present on the first fragment only.
    pub name: Option<String>,
    /// Arguments text appended by this fragment.
    pub arguments_delta: Option<String>,
}

/// Why a response stopped generating content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Other(String),
}

/// Token, cost and latency accounting for one call.
///
/// Fields stay `None` when the vendor does not report them; nothing is
/// estimated.
///
/// # Examples
///
/// ```
/// # use unillm::types::UsageSummary;
/// let usage = UsageSummary {
///     prompt_tokens: Some(1200),
///     completion_tokens: Some(200),
///     total_tokens: Some(1400),
///     ..Default::default()
/// };
/// assert_eq!(usage.total_tokens, Some(1400));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    pub reasoning_tokens: Option<u64>,
    /// Prompt tokens served from a vendor-side cache.
    pub cached_tokens: Option<u64>,
    /// Vendor-reported cost, in the vendor's billing currency.
    pub cost: Option<f64>,
    /// Wall-clock latency of the orchestrated call.
    pub latency: Option<Duration>,
}

impl UsageSummary {
    /// Returns `true` when no field carries a value.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Provider metadata returned with each result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Adapter identifier such as `openai_chat`.
    pub provider: String,
    /// Upstream response identifier.
    pub request_id: Option<String>,
    /// Endpoint URL.
    pub endpoint: Option<String>,
    /// Raw response excerpt for debugging.
    pub raw: Option<Value>,
}

/// The single result of a generate or stream call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    /// Full assistant content.
    pub content: String,
    /// Aggregated tool calls in index order.
    pub tool_calls: Vec<ToolCall>,
    /// Why the response stopped.
    pub finish_reason: Option<FinishReason>,
    /// Usage accounting; immutable once attached.
    pub usage: UsageSummary,
    /// Effective model identifier reported by the provider.
    pub model: Option<String>,
    /// Handle of the façade whose adapter produced this result.
    pub served_by: String,
    /// Metadata about the adapter invocation.
    pub provider: ProviderMetadata,
}

/// Capability descriptor used to filter adapters at runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub supports_generate: bool,
    pub supports_stream: bool,
    pub supports_embedding: bool,
    pub supports_transcription: bool,
    pub supports_tools: bool,
    pub supports_image_input: bool,
}

impl CapabilityDescriptor {
    /// Returns whether the given operation is offered.
    pub fn supports(&self, operation: Operation) -> bool {
        match operation {
            Operation::Generate => self.supports_generate,
            Operation::Stream => self.supports_stream,
            Operation::Embed => self.supports_embedding,
            Operation::Transcribe => self.supports_transcription,
        }
    }
}
