/// Where a vendor reports token usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageQuirk {
    /// Standard `usage` object.
    Standard,
    /// Groq streams usage inside `x_groq.usage`.
    GroqExtension,
    /// DeepSeek reports cache hits as `prompt_cache_hit_tokens`.
    DeepSeekCache,
}

/// Static description of an OpenAI-compatible vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenAiPreset {
    /// Registry key and adapter name.
    pub engine: &'static str,
    pub base_url: &'static str,
    /// Sends `stream_options.include_usage` on streaming requests.
    pub include_stream_usage: bool,
    /// Body field used for the output token limit.
    pub max_tokens_field: &'static str,
    pub supports_embedding: bool,
    pub supports_transcription: bool,
    pub usage: UsageQuirk,
}

const fn compatible(engine: &'static str, base_url: &'static str) -> OpenAiPreset {
    OpenAiPreset {
        engine,
        base_url,
        include_stream_usage: false,
        max_tokens_field: "max_tokens",
        supports_embedding: false,
        supports_transcription: false,
        usage: UsageQuirk::Standard,
    }
}

pub const OPENAI: OpenAiPreset = OpenAiPreset {
    include_stream_usage: true,
    max_tokens_field: "max_completion_tokens",
    supports_embedding: true,
    supports_transcription: true,
    ..compatible("openai", "https://api.openai.com/v1")
};

pub const GROQ: OpenAiPreset = OpenAiPreset {
    supports_transcription: true,
    usage: UsageQuirk::GroqExtension,
    ..compatible("groq", "https://api.groq.com/openai/v1")
};

pub const DEEPSEEK: OpenAiPreset = OpenAiPreset {
    usage: UsageQuirk::DeepSeekCache,
    ..compatible("deepseek", "https://api.deepseek.com/v1")
};

pub const TOGETHER: OpenAiPreset = OpenAiPreset {
    supports_embedding: true,
    ..compatible("together", "https://api.together.xyz/v1")
};

pub const OPENROUTER: OpenAiPreset = compatible("openrouter", "https://openrouter.ai/api/v1");

pub const MISTRAL: OpenAiPreset = OpenAiPreset {
    supports_embedding: true,
    ..compatible("mistral", "https://api.mistral.ai/v1")
};

pub const FIREWORKS: OpenAiPreset = OpenAiPreset {
    supports_embedding: true,
    ..compatible("fireworks", "https://api.fireworks.ai/inference/v1")
};

pub const DEEPINFRA: OpenAiPreset = OpenAiPreset {
    supports_embedding: true,
    ..compatible("deepinfra", "https://api.deepinfra.com/v1/openai")
};

pub const SAMBANOVA: OpenAiPreset = OpenAiPreset {
    include_stream_usage: true,
    ..compatible("sambanova", "https://api.sambanova.ai/v1")
};

pub const NOVITA: OpenAiPreset = compatible("novita", "https://api.novita.ai/v3/openai");

/// Every built-in OpenAI-compatible vendor.
pub const PRESETS: &[OpenAiPreset] = &[
    OPENAI, GROQ, DEEPSEEK, TOGETHER, OPENROUTER, MISTRAL, FIREWORKS, DEEPINFRA, SAMBANOVA, NOVITA,
];

/// Looks up a preset by engine identifier.
pub fn preset(engine: &str) -> Option<&'static OpenAiPreset> {
    PRESETS.iter().find(|preset| preset.engine == engine)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engines_are_unique() {
        let mut engines: Vec<_> = PRESETS.iter().map(|p| p.engine).collect();
        engines.sort_unstable();
        engines.dedup();
        assert_eq!(engines.len(), PRESETS.len());
    }

    #[test]
    fn stream_usage_is_requested_from_openai_and_sambanova() {
        assert!(preset("openai").expect("openai").include_stream_usage);
        assert!(preset("sambanova").expect("sambanova").include_stream_usage);
        assert!(
            PRESETS
                .iter()
                .filter(|p| !matches!(p.engine, "openai" | "sambanova"))
                .all(|p| !p.include_stream_usage)
        );
        assert_eq!(preset("groq").map(|p| p.usage), Some(UsageQuirk::GroqExtension));
        assert!(preset("cohere").is_none());
    }
}
