use axum::http::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;

use crate::storage::{Channel, ChannelType, KeyStatus};

#[derive(thiserror::Error, Debug)]
pub enum AdapterError {
    #[error("构造认证头失败：{0}")]
    BadAuthValue(String),
}

pub fn trimmed_base(channel: &Channel) -> &str {
    channel.base_url.trim().trim_end_matches('/')
}

pub fn default_probe_model(channel_type: ChannelType) -> &'static str {
    match channel_type {
        ChannelType::Openai | ChannelType::OpenaiCompatible => "gpt-3.5-turbo",
        ChannelType::Anthropic => "claude-3-haiku-20240307",
        ChannelType::Gemini => "gemini-pro",
    }
}

pub fn chat_url(channel: &Channel, model: &str, streaming: bool) -> String {
    let base = trimmed_base(channel);
    match channel.channel_type {
        ChannelType::Openai | ChannelType::OpenaiCompatible => {
            format!("{base}/v1/chat/completions")
        }
        ChannelType::Anthropic => format!("{base}/v1/messages"),
        ChannelType::Gemini => {
            let op = if streaming {
                "streamGenerateContent?alt=sse"
            } else {
                "generateContent"
            };
            format!("{base}/v1beta/models/{model}:{op}")
        }
    }
}

pub fn models_url(channel: &Channel) -> String {
    let base = trimmed_base(channel);
    match channel.channel_type {
        ChannelType::Openai | ChannelType::OpenaiCompatible | ChannelType::Anthropic => {
            format!("{base}/v1/models")
        }
        ChannelType::Gemini => format!("{base}/v1beta/models"),
    }
}

/// Only the openai dialect exposes a billing endpoint.
pub fn balance_url(channel: &Channel) -> Option<String> {
    match channel.channel_type {
        ChannelType::Openai | ChannelType::OpenaiCompatible => Some(format!(
            "{}/dashboard/billing/credit_grants",
            trimmed_base(channel)
        )),
        ChannelType::Anthropic | ChannelType::Gemini => None,
    }
}

/// Minimal one-token chat body used by health probes.
pub fn probe_chat_body(channel_type: ChannelType, model: &str) -> serde_json::Value {
    match channel_type {
        ChannelType::Openai | ChannelType::OpenaiCompatible | ChannelType::Anthropic => {
            serde_json::json!({
                "model": model,
                "messages": [{"role": "user", "content": "hi"}],
                "max_tokens": 1,
            })
        }
        ChannelType::Gemini => serde_json::json!({
            "contents": [{"parts": [{"text": "hi"}]}],
            "generationConfig": {"maxOutputTokens": 1},
        }),
    }
}

/// Injects the provider's auth convention: bearer header for the openai
/// dialect, x-api-key + anthropic-version for anthropic, `?key=` for gemini.
pub fn apply_auth(
    channel_type: ChannelType,
    key: &str,
    url: &mut Url,
    headers: &mut HeaderMap,
) -> Result<(), AdapterError> {
    let key = key.trim();
    match channel_type {
        ChannelType::Openai | ChannelType::OpenaiCompatible => {
            let v = format!("Bearer {key}");
            headers.insert(
                axum::http::header::AUTHORIZATION,
                v.parse::<HeaderValue>()
                    .map_err(|e| AdapterError::BadAuthValue(e.to_string()))?,
            );
        }
        ChannelType::Anthropic => {
            headers.insert(
                HeaderName::from_static("x-api-key"),
                key.parse::<HeaderValue>()
                    .map_err(|e| AdapterError::BadAuthValue(e.to_string()))?,
            );
            headers.insert(
                HeaderName::from_static("anthropic-version"),
                HeaderValue::from_static("2023-06-01"),
            );
        }
        ChannelType::Gemini => {
            set_query_param(url, "key", key);
        }
    }
    Ok(())
}

fn set_query_param(url: &mut Url, name: &str, value: &str) {
    let existing: Vec<(String, String)> = url
        .query_pairs()
        .filter_map(|(k, v)| (k != name).then(|| (k.to_string(), v.to_string())))
        .collect();

    url.set_query(None);
    {
        let mut qp = url.query_pairs_mut();
        for (k, v) in existing {
            qp.append_pair(&k, &v);
        }
        qp.append_pair(name, value);
    }
}

/// Maps an upstream probe response to a key status. 2xx means the credential
/// works; 401/403 means it does not; 429 is quota; anything else is invalid
/// with the status and a body snippet retained for the operator.
pub fn classify_status(status: u16, body: &[u8]) -> (KeyStatus, Option<String>) {
    match status {
        200..=299 => (KeyStatus::Active, None),
        401 | 403 => (KeyStatus::Invalid, None),
        429 => (KeyStatus::QuotaExceeded, None),
        code => {
            let snippet = String::from_utf8_lossy(&body[..body.len().min(200)]).to_string();
            (KeyStatus::Invalid, Some(format!("HTTP {code}: {snippet}")))
        }
    }
}

/// Pulls `total_available` out of an openai credit_grants payload.
pub fn parse_balance(body: &[u8]) -> Option<f64> {
    let v: serde_json::Value = serde_json::from_slice(body).ok()?;
    v.get("total_available").and_then(|n| n.as_f64())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokenUsage {
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
}

impl TokenUsage {
    pub fn merge(&mut self, other: TokenUsage) {
        if other.input_tokens.is_some() {
            self.input_tokens = other.input_tokens;
        }
        if other.output_tokens.is_some() {
            self.output_tokens = other.output_tokens;
        }
    }
}

/// Pulls token accounting out of a response body, per dialect. Best-effort:
/// anything unrecognised yields an empty usage.
pub fn extract_usage(channel_type: ChannelType, v: &serde_json::Value) -> TokenUsage {
    match channel_type {
        ChannelType::Openai | ChannelType::OpenaiCompatible => {
            let Some(u) = v.get("usage") else {
                return TokenUsage::default();
            };
            TokenUsage {
                input_tokens: u
                    .get("prompt_tokens")
                    .or_else(|| u.get("input_tokens"))
                    .and_then(|n| n.as_i64()),
                output_tokens: u
                    .get("completion_tokens")
                    .or_else(|| u.get("output_tokens"))
                    .and_then(|n| n.as_i64()),
            }
        }
        ChannelType::Anthropic => {
            let Some(u) = v
                .get("usage")
                .or_else(|| v.get("message").and_then(|m| m.get("usage")))
            else {
                return TokenUsage::default();
            };
            TokenUsage {
                input_tokens: u.get("input_tokens").and_then(|n| n.as_i64()),
                output_tokens: u.get("output_tokens").and_then(|n| n.as_i64()),
            }
        }
        ChannelType::Gemini => {
            let Some(u) = v.get("usageMetadata") else {
                return TokenUsage::default();
            };
            TokenUsage {
                input_tokens: u.get("promptTokenCount").and_then(|n| n.as_i64()),
                output_tokens: u.get("candidatesTokenCount").and_then(|n| n.as_i64()),
            }
        }
    }
}
