use axum::body::Body;
use axum::http::{HeaderValue, Response, header};
use bytes::Bytes;
use futures_util::StreamExt as _;
use std::path::PathBuf;
use std::time::Instant;

use crate::balancer::Balancer;
use crate::models;
use crate::outbound::ClientPool;
use crate::providers;
use crate::storage::{self, ApiKey, Channel, Token};

mod stream;

use stream::{LogStream, StreamLogContext};

#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    #[error("model is required")]
    MissingModel,
    #[error("No available API keys for this model")]
    NoAvailableKey,
    #[error("发送上游请求失败：{0}")]
    Upstream(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEndpoint {
    ChatCompletions,
    Embeddings,
    ImagesGenerations,
}

impl RelayEndpoint {
    pub fn path(self) -> &'static str {
        match self {
            RelayEndpoint::ChatCompletions => "/v1/chat/completions",
            RelayEndpoint::Embeddings => "/v1/embeddings",
            RelayEndpoint::ImagesGenerations => "/v1/images/generations",
        }
    }

    /// Only chat has per-dialect endpoints; the rest are openai-only.
    fn openai_only(self) -> bool {
        !matches!(self, RelayEndpoint::ChatCompletions)
    }
}

/// Picks `(channel, key)` for a model under a token's channel scope.
/// Candidates are iterated in insertion order; the first channel whose
/// balancer yields a key wins.
pub async fn select_upstream(
    balancer: &Balancer,
    db_path: PathBuf,
    token: &Token,
    model: &str,
    openai_only: bool,
) -> Result<Option<(Channel, ApiKey)>, anyhow::Error> {
    let types = models::provider_types_for(model);
    let channels = storage::list_channels(db_path.clone()).await?;

    for channel in channels {
        if !channel.enabled || !types.contains(&channel.channel_type) {
            continue;
        }
        if openai_only && !channel.channel_type.is_openai_family() {
            continue;
        }
        if !token.allowed_channels.is_empty() && !token.allowed_channels.contains(&channel.id) {
            continue;
        }

        let keys = storage::active_keys_for(db_path.clone(), channel.id.clone()).await?;
        if let Some(key) = balancer.pick(&keys, channel.load_balance_strategy, &channel.id) {
            let key = key.clone();
            return Ok(Some((channel, key)));
        }
    }

    Ok(None)
}

fn upstream_url(
    endpoint: RelayEndpoint,
    channel: &Channel,
    model: &str,
    streaming: bool,
) -> String {
    let base = providers::trimmed_base(channel);
    match endpoint {
        RelayEndpoint::ChatCompletions => providers::chat_url(channel, model, streaming),
        RelayEndpoint::Embeddings => format!("{base}/v1/embeddings"),
        RelayEndpoint::ImagesGenerations => format!("{base}/v1/images/generations"),
    }
}

async fn client_for_channel(
    clients: &ClientPool,
    db_path: PathBuf,
    channel: &Channel,
) -> anyhow::Result<reqwest::Client> {
    let proxy = match &channel.proxy_id {
        Some(id) => storage::get_proxy(db_path, id.clone()).await?,
        None => None,
    };
    clients.client_for(proxy.as_ref())
}

pub async fn forward(
    clients: &ClientPool,
    balancer: &Balancer,
    db_path: PathBuf,
    token: &Token,
    endpoint: RelayEndpoint,
    body_bytes: Bytes,
) -> Result<Response<Body>, RelayError> {
    let started = Instant::now();

    let body_json: Option<serde_json::Value> = serde_json::from_slice(&body_bytes).ok();
    let model = body_json
        .as_ref()
        .and_then(|v| v.get("model"))
        .and_then(|m| m.as_str())
        .map(|s| s.to_string())
        .ok_or(RelayError::MissingModel)?;
    let streaming = endpoint == RelayEndpoint::ChatCompletions
        && body_json
            .as_ref()
            .and_then(|v| v.get("stream"))
            .and_then(|s| s.as_bool())
            .unwrap_or(false);

    let Some((channel, key)) = select_upstream(
        balancer,
        db_path.clone(),
        token,
        &model,
        endpoint.openai_only(),
    )
    .await?
    else {
        return Err(RelayError::NoAvailableKey);
    };

    let url_str = upstream_url(endpoint, &channel, &model, streaming);
    let mut url = reqwest::Url::parse(&url_str)
        .map_err(|e| RelayError::Upstream(format!("invalid upstream url {url_str}: {e}")))?;

    let mut headers = axum::http::HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    providers::apply_auth(channel.channel_type, &key.key, &mut url, &mut headers)
        .map_err(|e| RelayError::Upstream(e.to_string()))?;

    let client = client_for_channel(clients, db_path.clone(), &channel)
        .await
        .map_err(|e| RelayError::Upstream(e.to_string()))?;

    // The client's JSON body is forwarded byte-for-byte; only auth and the
    // endpoint path are rewritten for the provider's dialect.
    let upstream = match client
        .post(url)
        .headers(headers)
        .body(body_bytes)
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            let latency_ms = started.elapsed().as_millis() as i64;
            spawn_key_transport_failure(db_path.clone(), key.id.clone());
            spawn_log(
                db_path,
                storage::CreateRequestLog {
                    ts_ms: storage::now_ms(),
                    token_id: Some(token.id.clone()),
                    channel_id: channel.id.clone(),
                    key_id: key.id.clone(),
                    model,
                    path: endpoint.path().to_string(),
                    method: "POST".to_string(),
                    status: 500,
                    latency_ms,
                    input_tokens: None,
                    output_tokens: None,
                    error: Some(truncate(&e.to_string(), 2000)),
                    streaming,
                },
            );
            return Err(RelayError::Upstream(e.to_string()));
        }
    };

    let status = upstream.status();
    let success = status.is_success();
    spawn_key_usage(db_path.clone(), key.id.clone(), success);

    if streaming {
        let ctx = StreamLogContext {
            db_path,
            channel_type: channel.channel_type,
            token_id: Some(token.id.clone()),
            channel_id: channel.id,
            key_id: key.id,
            model,
            path: endpoint.path().to_string(),
            http_status: status.as_u16() as i64,
            status_is_success: success,
            started,
        };
        let body = Body::from_stream(LogStream::new(upstream.bytes_stream().boxed(), ctx));

        return Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::CONNECTION, "keep-alive")
            .body(body)
            .map_err(|e| RelayError::Upstream(e.to_string()));
    }

    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));

    let bytes = match upstream.bytes().await {
        Ok(b) => b,
        Err(e) => {
            let latency_ms = started.elapsed().as_millis() as i64;
            spawn_log(
                db_path,
                storage::CreateRequestLog {
                    ts_ms: storage::now_ms(),
                    token_id: Some(token.id.clone()),
                    channel_id: channel.id,
                    key_id: key.id,
                    model,
                    path: endpoint.path().to_string(),
                    method: "POST".to_string(),
                    status: 500,
                    latency_ms,
                    input_tokens: None,
                    output_tokens: None,
                    error: Some(truncate(&e.to_string(), 2000)),
                    streaming,
                },
            );
            return Err(RelayError::Upstream(e.to_string()));
        }
    };

    let latency_ms = started.elapsed().as_millis() as i64;
    let usage = serde_json::from_slice::<serde_json::Value>(&bytes)
        .map(|v| providers::extract_usage(channel.channel_type, &v))
        .unwrap_or_default();

    spawn_log(
        db_path,
        storage::CreateRequestLog {
            ts_ms: storage::now_ms(),
            token_id: Some(token.id.clone()),
            channel_id: channel.id,
            key_id: key.id,
            model,
            path: endpoint.path().to_string(),
            method: "POST".to_string(),
            status: status.as_u16() as i64,
            latency_ms,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            error: (!success).then(|| truncate(&String::from_utf8_lossy(&bytes), 2000)),
            streaming,
        },
    );

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(bytes))
        .map_err(|e| RelayError::Upstream(e.to_string()))
}

pub(crate) fn spawn_log(db_path: PathBuf, input: storage::CreateRequestLog) {
    tokio::spawn(async move {
        if let Err(e) = storage::append_log(db_path, input).await {
            tracing::warn!(err = %e, "append request log failed");
        }
    });
}

pub(crate) fn spawn_key_usage(db_path: PathBuf, key_id: String, success: bool) {
    tokio::spawn(async move {
        if let Err(e) = storage::record_key_usage(db_path, key_id, success).await {
            tracing::warn!(err = %e, "record key usage failed");
        }
    });
}

pub(crate) fn spawn_key_transport_failure(db_path: PathBuf, key_id: String) {
    tokio::spawn(async move {
        if let Err(e) = storage::record_key_transport_failure(db_path, key_id).await {
            tracing::warn!(err = %e, "record key failure failed");
        }
    });
}

pub(crate) fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut out = String::with_capacity(max_len + 1);
    let keep = max_len.saturating_sub(1);
    for ch in s.chars() {
        if out.len() + ch.len_utf8() > keep {
            break;
        }
        out.push(ch);
    }
    out.push('…');
    out
}
