use std::env;

use dotenvy::dotenv;
use futures_util::StreamExt;
use unillm::config::{ClientConfig, Credential, ProviderSettings, build_client};
use unillm::http::reqwest::default_dyn_transport;
use unillm::types::{Conversation, GenerationRequest};

fn load_env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Reads `UNILLM_<PREFIX>_{KEY,MODEL,ENDPOINT}`; the endpoint is optional.
fn config_from_env(engine: &str, prefix: &str) -> Option<ClientConfig> {
    let Some(key) = load_env_var(&format!("UNILLM_{prefix}_KEY")) else {
        eprintln!("skip live test: UNILLM_{prefix}_KEY missing");
        return None;
    };
    let Some(model) = load_env_var(&format!("UNILLM_{prefix}_MODEL")) else {
        eprintln!("skip live test: UNILLM_{prefix}_MODEL missing");
        return None;
    };
    Some(ClientConfig::new(
        engine,
        ProviderSettings {
            credential: Credential::Bearer { token: key },
            model: Some(model),
            base_url: load_env_var(&format!("UNILLM_{prefix}_ENDPOINT")),
            timeout_secs: Some(60),
            ..ProviderSettings::default()
        },
    ))
}

fn build_request() -> GenerationRequest {
    let mut conversation = Conversation::with_system("You are a helpful assistant.");
    conversation.add_user_message("Please introduce Rust language in one sentence.");
    GenerationRequest::new(conversation).with_max_output_tokens(200)
}

#[tokio::test]
#[ignore = "requires valid OpenAI-compatible endpoint"]
async fn openai_live_generate_and_stream() {
    let _ = dotenv();
    let Some(config) = config_from_env("openai", "OPENAI") else {
        return;
    };
    let client = build_client(&config, default_dyn_transport().expect("transport"))
        .expect("client");

    let request = build_request();
    let result = client.generate(&request).await.expect("generate should succeed");
    assert!(!result.content.is_empty(), "response should contain text");

    let mut stream = client
        .stream_generate(&request)
        .await
        .expect("streaming should start");
    let mut text = String::new();
    let mut terminal = false;
    while let Some(delta) = stream.next().await {
        let delta = delta.expect("stream delta should be valid");
        text.push_str(&delta.content);
        terminal = delta.is_terminal();
    }
    assert!(terminal, "last delta should carry the finish reason");
    assert!(!text.is_empty(), "stream should yield content");
}

#[tokio::test]
#[ignore = "requires Anthropic credentials"]
async fn anthropic_live_falls_back_to_openai() {
    let _ = dotenv();
    let Some(openai) = config_from_env("openai", "OPENAI") else {
        return;
    };
    let Some(mut anthropic) = config_from_env("anthropic", "ANTHROPIC") else {
        return;
    };
    anthropic.settings.credential = match anthropic.settings.credential {
        Credential::Bearer { token } => Credential::ApiKey {
            header: None,
            key: token,
        },
        other => other,
    };
    // An unroutable base URL forces a transport failure on the primary.
    let primary = ClientConfig {
        settings: ProviderSettings {
            base_url: Some("http://127.0.0.1:9".to_string()),
            ..anthropic.settings.clone()
        },
        ..anthropic
    }
    .with_handle("broken-anthropic")
    .with_fallback(openai);

    let client = build_client(&primary, default_dyn_transport().expect("transport"))
        .expect("client");
    let result = client
        .generate(&build_request())
        .await
        .expect("fallback should succeed");
    assert!(result.served_by.starts_with("openai"));
}
