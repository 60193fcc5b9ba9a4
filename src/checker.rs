use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::outbound::ClientPool;
use crate::providers;
use crate::storage::{self, ApiKey, Channel, KeyStatus, TestMethod};

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);
const BATCH_SIZE: usize = 5;
const BATCH_DELAY: Duration = Duration::from_secs(1);
const SERIAL_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Serialize)]
pub struct KeyCheckResult {
    pub key_id: String,
    pub status: KeyStatus,
    pub balance: Option<f64>,
    pub error: Option<String>,
    pub latency_ms: i64,
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

async fn send_probe(
    client: &reqwest::Client,
    channel: &Channel,
    key: &ApiKey,
    method: TestMethod,
) -> anyhow::Result<(u16, Vec<u8>)> {
    let probe_model = channel
        .test_model
        .clone()
        .unwrap_or_else(|| providers::default_probe_model(channel.channel_type).to_string());

    let (url_str, body) = match method {
        TestMethod::Chat => (
            providers::chat_url(channel, &probe_model, false),
            Some(providers::probe_chat_body(channel.channel_type, &probe_model)),
        ),
        TestMethod::Models => (providers::models_url(channel), None),
        TestMethod::Balance => match providers::balance_url(channel) {
            Some(url) => (url, None),
            // No billing endpoint on this dialect, probe models instead.
            None => (providers::models_url(channel), None),
        },
    };

    let mut url = reqwest::Url::parse(&url_str)
        .map_err(|e| anyhow::anyhow!("base_url 无效（{url_str}）：{e}"))?;
    let mut headers = axum::http::HeaderMap::new();
    providers::apply_auth(channel.channel_type, &key.key, &mut url, &mut headers)?;

    let req = match body {
        Some(body) => client.post(url).headers(headers).json(&body),
        None => client.get(url).headers(headers),
    };

    let resp = req.send().await?;
    let status = resp.status().as_u16();
    let bytes = resp.bytes().await.unwrap_or_default();
    Ok((status, bytes.to_vec()))
}

/// Runs exactly one probe. The outcome is always one of active / invalid /
/// quota_exceeded; transport failures surface as invalid with the error.
pub async fn check_key(
    clients: &ClientPool,
    db_path: PathBuf,
    channel: &Channel,
    key: &ApiKey,
) -> KeyCheckResult {
    let started = Instant::now();

    let client = match client_for_channel(clients, db_path, channel).await {
        Ok(c) => c,
        Err(e) => {
            return KeyCheckResult {
                key_id: key.id.clone(),
                status: KeyStatus::Invalid,
                balance: None,
                error: Some(e.to_string()),
                latency_ms: started.elapsed().as_millis() as i64,
            };
        }
    };

    let outcome = tokio::time::timeout(
        PROBE_TIMEOUT,
        send_probe(&client, channel, key, channel.test_method),
    )
    .await;
    let latency_ms = started.elapsed().as_millis() as i64;

    let (status, balance, error) = match outcome {
        Ok(Ok((http_status, body))) => {
            let (status, error) = providers::classify_status(http_status, &body);
            let balance = (status == KeyStatus::Active
                && channel.test_method == TestMethod::Balance)
                .then(|| providers::parse_balance(&body))
                .flatten();
            (status, balance, error)
        }
        Ok(Err(e)) => (KeyStatus::Invalid, None, Some(e.to_string())),
        Err(_) => (KeyStatus::Invalid, None, Some("timeout".to_string())),
    };

    KeyCheckResult {
        key_id: key.id.clone(),
        status,
        balance,
        error,
        latency_ms,
    }
}

async fn check_and_apply(
    clients: &ClientPool,
    db_path: PathBuf,
    channel: &Channel,
    key: &ApiKey,
) -> anyhow::Result<KeyCheckResult> {
    let result = check_key(clients, db_path.clone(), channel, key).await;
    storage::apply_check_result(db_path, key.id.clone(), result.status, result.balance).await?;

    tracing::debug!(
        channel_id = %channel.id,
        key_id = %key.id,
        status = result.status.as_str(),
        latency_ms = result.latency_ms,
        error = result.error.as_deref().unwrap_or("-"),
        "key probe finished"
    );
    Ok(result)
}

/// Single on-demand probe; `None` when the key or its channel is gone.
pub async fn check_one(
    clients: &ClientPool,
    db_path: PathBuf,
    key_id: String,
) -> anyhow::Result<Option<KeyCheckResult>> {
    let Some(key) = storage::get_key(db_path.clone(), key_id).await? else {
        return Ok(None);
    };
    let Some(channel) = storage::get_channel(db_path.clone(), key.channel_id.clone()).await? else {
        return Ok(None);
    };
    let result = check_and_apply(clients, db_path, &channel, &key).await?;
    Ok(Some(result))
}

fn checkable(key: &ApiKey) -> bool {
    key.status != KeyStatus::Disabled
}

/// Bulk path: non-disabled keys of one channel, 5 concurrent probes per
/// batch, 1 s pause between batches.
pub async fn check_channel_keys(
    clients: &ClientPool,
    db_path: PathBuf,
    channel: &Channel,
) -> anyhow::Result<()> {
    let keys = storage::list_keys(db_path.clone(), Some(channel.id.clone())).await?;
    let keys: Vec<ApiKey> = keys.into_iter().filter(checkable).collect();

    let mut batches = keys.chunks(BATCH_SIZE).peekable();
    while let Some(batch) = batches.next() {
        let probes = batch
            .iter()
            .map(|key| check_and_apply(clients, db_path.clone(), channel, key));
        for res in futures_util::future::join_all(probes).await {
            if let Err(e) = res {
                tracing::warn!(channel_id = %channel.id, err = %e, "key probe update failed");
            }
        }
        if batches.peek().is_some() {
            tokio::time::sleep(BATCH_DELAY).await;
        }
    }
    Ok(())
}

/// Bulk path over every enabled channel (management check-all).
pub async fn check_all_batched(clients: &ClientPool, db_path: PathBuf) -> anyhow::Result<()> {
    let channels = storage::list_channels(db_path.clone()).await?;
    for channel in channels.into_iter().filter(|c| c.enabled) {
        check_channel_keys(clients, db_path.clone(), &channel).await?;
    }
    Ok(())
}

/// Scheduler path: strictly one probe at a time, 500 ms apart, so the
/// periodic sweep never bursts against upstream providers.
pub async fn check_all_serial(clients: &ClientPool, db_path: PathBuf) -> anyhow::Result<()> {
    let channels = storage::list_channels(db_path.clone()).await?;
    let mut first = true;
    for channel in channels.into_iter().filter(|c| c.enabled) {
        let keys = storage::list_keys(db_path.clone(), Some(channel.id.clone())).await?;
        for key in keys.into_iter().filter(checkable) {
            if !first {
                tokio::time::sleep(SERIAL_DELAY).await;
            }
            first = false;
            if let Err(e) = check_and_apply(clients, db_path.clone(), &channel, &key).await {
                tracing::warn!(channel_id = %channel.id, key_id = %key.id, err = %e, "key probe update failed");
            }
        }
    }
    Ok(())
}
