use keyhub::models;
use keyhub::providers;
use keyhub::storage::{
    Channel, ChannelType, KeyStatus, LoadBalanceStrategy, TestMethod,
};

fn channel(channel_type: ChannelType, base_url: &str) -> Channel {
    Channel {
        id: "ch".to_string(),
        name: "ch".to_string(),
        channel_type,
        base_url: base_url.to_string(),
        test_method: TestMethod::Models,
        test_model: None,
        proxy_id: None,
        load_balance_strategy: LoadBalanceStrategy::RoundRobin,
        enabled: true,
        created_at_ms: 0,
        updated_at_ms: 0,
    }
}

#[test]
fn endpoints_follow_the_dialect() {
    let openai = channel(ChannelType::Openai, "https://api.openai.com/");
    assert_eq!(
        providers::chat_url(&openai, "gpt-4o", false),
        "https://api.openai.com/v1/chat/completions"
    );
    assert_eq!(
        providers::models_url(&openai),
        "https://api.openai.com/v1/models"
    );
    assert_eq!(
        providers::balance_url(&openai).as_deref(),
        Some("https://api.openai.com/dashboard/billing/credit_grants")
    );

    let anthropic = channel(ChannelType::Anthropic, "https://api.anthropic.com");
    assert_eq!(
        providers::chat_url(&anthropic, "claude-3-haiku", false),
        "https://api.anthropic.com/v1/messages"
    );
    assert_eq!(providers::balance_url(&anthropic), None);

    // trailing slashes are stripped before composition
    let gemini = channel(
        ChannelType::Gemini,
        "https://generativelanguage.googleapis.com///",
    );
    assert_eq!(
        providers::chat_url(&gemini, "gemini-pro", false),
        "https://generativelanguage.googleapis.com/v1beta/models/gemini-pro:generateContent"
    );
    assert_eq!(
        providers::chat_url(&gemini, "gemini-pro", true),
        "https://generativelanguage.googleapis.com/v1beta/models/gemini-pro:streamGenerateContent?alt=sse"
    );
    assert_eq!(
        providers::models_url(&gemini),
        "https://generativelanguage.googleapis.com/v1beta/models"
    );
}

#[test]
fn auth_injection_per_dialect() {
    let mut url = reqwest::Url::parse("https://api.openai.com/v1/models").expect("url");
    let mut headers = axum::http::HeaderMap::new();
    providers::apply_auth(ChannelType::Openai, "sk-abc", &mut url, &mut headers).expect("auth");
    assert_eq!(
        headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok()),
        Some("Bearer sk-abc")
    );

    let mut url = reqwest::Url::parse("https://api.anthropic.com/v1/messages").expect("url");
    let mut headers = axum::http::HeaderMap::new();
    providers::apply_auth(ChannelType::Anthropic, "sk-ant", &mut url, &mut headers).expect("auth");
    assert_eq!(
        headers.get("x-api-key").and_then(|v| v.to_str().ok()),
        Some("sk-ant")
    );
    assert_eq!(
        headers
            .get("anthropic-version")
            .and_then(|v| v.to_str().ok()),
        Some("2023-06-01")
    );

    let mut url = reqwest::Url::parse(
        "https://generativelanguage.googleapis.com/v1beta/models/gemini-pro:streamGenerateContent?alt=sse",
    )
    .expect("url");
    let mut headers = axum::http::HeaderMap::new();
    providers::apply_auth(ChannelType::Gemini, "g-key", &mut url, &mut headers).expect("auth");
    assert!(headers.is_empty());
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    assert!(pairs.contains(&("alt".to_string(), "sse".to_string())));
    assert!(pairs.contains(&("key".to_string(), "g-key".to_string())));
}

#[test]
fn status_classification() {
    assert_eq!(
        providers::classify_status(200, b"{}"),
        (KeyStatus::Active, None)
    );
    assert_eq!(
        providers::classify_status(401, b"{}"),
        (KeyStatus::Invalid, None)
    );
    assert_eq!(
        providers::classify_status(403, b"{}"),
        (KeyStatus::Invalid, None)
    );
    assert_eq!(
        providers::classify_status(429, b"{}"),
        (KeyStatus::QuotaExceeded, None)
    );

    let (status, error) = providers::classify_status(500, b"oh no");
    assert_eq!(status, KeyStatus::Invalid);
    assert_eq!(error.as_deref(), Some("HTTP 500: oh no"));

    // the snippet is capped at 200 bytes
    let long = vec![b'x'; 1000];
    let (_, error) = providers::classify_status(500, &long);
    assert_eq!(error.expect("error").len(), "HTTP 500: ".len() + 200);
}

#[test]
fn model_resolution_longest_prefix() {
    let openai = [ChannelType::Openai, ChannelType::OpenaiCompatible];

    assert_eq!(models::provider_types_for("gpt-4o-mini"), &openai);
    assert_eq!(models::provider_types_for("gpt-4o-2024-08-06"), &openai);
    assert_eq!(
        models::provider_types_for("claude-3-5-sonnet-20240620"),
        &[ChannelType::Anthropic]
    );
    assert_eq!(
        models::provider_types_for("gemini-1.5-flash-8b"),
        &[ChannelType::Gemini]
    );
    // unknown models fall back to the openai family
    assert_eq!(models::provider_types_for("llama-3-70b"), &openai);
    assert_eq!(models::provider_types_for("o1-mini"), &openai);
}

#[test]
fn probe_bodies_match_dialect() {
    let body = providers::probe_chat_body(ChannelType::Openai, "gpt-3.5-turbo");
    assert_eq!(body["model"], "gpt-3.5-turbo");
    assert_eq!(body["max_tokens"], 1);
    assert_eq!(body["messages"][0]["role"], "user");

    let body = providers::probe_chat_body(ChannelType::Gemini, "gemini-pro");
    assert_eq!(body["contents"][0]["parts"][0]["text"], "hi");
    assert_eq!(body["generationConfig"]["maxOutputTokens"], 1);
}

#[test]
fn default_probe_models() {
    assert_eq!(
        providers::default_probe_model(ChannelType::Openai),
        "gpt-3.5-turbo"
    );
    assert_eq!(
        providers::default_probe_model(ChannelType::Anthropic),
        "claude-3-haiku-20240307"
    );
    assert_eq!(
        providers::default_probe_model(ChannelType::Gemini),
        "gemini-pro"
    );
}
