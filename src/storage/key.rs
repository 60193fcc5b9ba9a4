use rusqlite::types::{FromSql, FromSqlError, ValueRef};
use rusqlite::{OptionalExtension as _, params};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use super::channel::get_channel_conn;
use super::{now_ms, with_conn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Active,
    Invalid,
    QuotaExceeded,
    Disabled,
    Unknown,
}

impl KeyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyStatus::Active => "active",
            KeyStatus::Invalid => "invalid",
            KeyStatus::QuotaExceeded => "quota_exceeded",
            KeyStatus::Disabled => "disabled",
            KeyStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for KeyStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(KeyStatus::Active),
            "invalid" => Ok(KeyStatus::Invalid),
            "quota_exceeded" => Ok(KeyStatus::QuotaExceeded),
            "disabled" => Ok(KeyStatus::Disabled),
            "unknown" => Ok(KeyStatus::Unknown),
            other => Err(anyhow::anyhow!("未知 key status：{other}")),
        }
    }
}

impl FromSql for KeyStatus {
    fn column_result(value: ValueRef<'_>) -> rusqlite::types::FromSqlResult<Self> {
        let s = value.as_str()?;
        s.parse::<KeyStatus>()
            .map_err(|e| FromSqlError::Other(e.into_boxed_dyn_error()))
    }
}

/// 脱敏 API Key：前4位 + "****" + 后4位，短 key 全遮
pub fn mask_key(key: &str) -> String {
    let s = key.trim();
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let prefix: String = chars[..4].iter().collect();
    let suffix: String = chars[chars.len() - 4..].iter().collect();
    format!("{prefix}****{suffix}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub channel_id: String,
    #[serde(skip_serializing)]
    pub key: String,
    pub key_masked: String,
    pub alias: Option<String>,
    pub status: KeyStatus,
    pub priority: i64,
    pub weight: i64,
    pub balance: Option<f64>,
    pub last_checked_ms: Option<i64>,
    pub last_used_ms: Option<i64>,
    pub error_count: i64,
    pub total_requests: i64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

const KEY_COLUMNS: &str = "id, channel_id, key, alias, status, priority, weight, balance, last_checked_ms, last_used_ms, error_count, total_requests, created_at_ms, updated_at_ms";

fn key_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ApiKey> {
    let key: String = row.get(2)?;
    Ok(ApiKey {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        key_masked: mask_key(&key),
        key,
        alias: row.get(3)?,
        status: row.get(4)?,
        priority: row.get(5)?,
        weight: row.get(6)?,
        balance: row.get(7)?,
        last_checked_ms: row.get(8)?,
        last_used_ms: row.get(9)?,
        error_count: row.get(10)?,
        total_requests: row.get(11)?,
        created_at_ms: row.get(12)?,
        updated_at_ms: row.get(13)?,
    })
}

pub async fn list_keys(
    db_path: PathBuf,
    channel_id: Option<String>,
) -> anyhow::Result<Vec<ApiKey>> {
    with_conn(db_path, move |conn| {
        let mut out = Vec::new();
        if let Some(channel_id) = channel_id {
            let mut stmt = conn.prepare(&format!(
                "SELECT {KEY_COLUMNS} FROM api_keys WHERE channel_id = ?1 ORDER BY created_at_ms ASC, id ASC"
            ))?;
            let rows = stmt.query_map([channel_id], key_from_row)?;
            for row in rows {
                out.push(row?);
            }
        } else {
            let mut stmt = conn.prepare(&format!(
                "SELECT {KEY_COLUMNS} FROM api_keys ORDER BY created_at_ms ASC, id ASC"
            ))?;
            let rows = stmt.query_map([], key_from_row)?;
            for row in rows {
                out.push(row?);
            }
        }
        Ok(out)
    })
    .await
}

pub async fn get_key(db_path: PathBuf, key_id: String) -> anyhow::Result<Option<ApiKey>> {
    with_conn(db_path, move |conn| {
        let mut stmt = conn.prepare(&format!("SELECT {KEY_COLUMNS} FROM api_keys WHERE id = ?1"))?;
        stmt.query_row([key_id], key_from_row)
            .optional()
            .map_err(Into::into)
    })
    .await
}

/// Only `status = active`, in insertion order (balancer tie-breaks rely on it).
pub async fn active_keys_for(db_path: PathBuf, channel_id: String) -> anyhow::Result<Vec<ApiKey>> {
    with_conn(db_path, move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {KEY_COLUMNS} FROM api_keys WHERE channel_id = ?1 AND status = 'active' ORDER BY created_at_ms ASC, id ASC"
        ))?;
        let rows = stmt.query_map([channel_id], key_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    })
    .await
}

fn default_priority() -> i64 {
    50
}

fn default_weight() -> i64 {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateKey {
    pub channel_id: String,
    pub key: String,
    pub alias: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default = "default_weight")]
    pub weight: i64,
}

fn insert_key(
    conn: &rusqlite::Connection,
    input: &CreateKey,
    ts: i64,
) -> anyhow::Result<ApiKey> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        r#"
        INSERT INTO api_keys (id, channel_id, key, alias, status, priority, weight, error_count, total_requests, created_at_ms, updated_at_ms)
        VALUES (?1, ?2, ?3, ?4, 'unknown', ?5, ?6, 0, 0, ?7, ?7)
        "#,
        params![id, input.channel_id, input.key, input.alias, input.priority, input.weight, ts],
    )?;

    Ok(ApiKey {
        id,
        channel_id: input.channel_id.clone(),
        key_masked: mask_key(&input.key),
        key: input.key.clone(),
        alias: input.alias.clone(),
        status: KeyStatus::Unknown,
        priority: input.priority,
        weight: input.weight,
        balance: None,
        last_checked_ms: None,
        last_used_ms: None,
        error_count: 0,
        total_requests: 0,
        created_at_ms: ts,
        updated_at_ms: ts,
    })
}

pub async fn create_key(db_path: PathBuf, input: CreateKey) -> anyhow::Result<ApiKey> {
    with_conn(db_path, move |conn| {
        if get_channel_conn(conn, &input.channel_id)?.is_none() {
            return Err(anyhow::anyhow!("channel not found: {}", input.channel_id));
        }
        insert_key(conn, &input, now_ms())
    })
    .await
}

/// Bulk import, all-or-nothing.
pub async fn create_keys(db_path: PathBuf, inputs: Vec<CreateKey>) -> anyhow::Result<Vec<ApiKey>> {
    with_conn(db_path, move |conn| {
        let ts = now_ms();
        let tx = conn.unchecked_transaction()?;
        let mut out = Vec::with_capacity(inputs.len());
        for input in &inputs {
            if get_channel_conn(&tx, &input.channel_id)?.is_none() {
                return Err(anyhow::anyhow!("channel not found: {}", input.channel_id));
            }
            out.push(insert_key(&tx, input, ts)?);
        }
        tx.commit()?;
        Ok(out)
    })
    .await
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateKey {
    pub key: Option<String>,
    pub alias: Option<Option<String>>,
    pub status: Option<KeyStatus>,
    pub priority: Option<i64>,
    pub weight: Option<i64>,
}

pub async fn update_key(
    db_path: PathBuf,
    key_id: String,
    input: UpdateKey,
) -> anyhow::Result<Option<ApiKey>> {
    with_conn(db_path, move |conn| {
        let mut stmt = conn.prepare(&format!("SELECT {KEY_COLUMNS} FROM api_keys WHERE id = ?1"))?;
        let Some(mut key) = stmt.query_row([&key_id], key_from_row).optional()? else {
            return Ok(None);
        };

        if let Some(v) = input.key {
            key.key_masked = mask_key(&v);
            key.key = v;
        }
        if let Some(v) = input.alias {
            key.alias = v;
        }
        if let Some(v) = input.status {
            key.status = v;
        }
        if let Some(v) = input.priority {
            key.priority = v;
        }
        if let Some(v) = input.weight {
            key.weight = v;
        }
        key.updated_at_ms = now_ms();

        conn.execute(
            r#"
            UPDATE api_keys
            SET key = ?2, alias = ?3, status = ?4, priority = ?5, weight = ?6, updated_at_ms = ?7
            WHERE id = ?1
            "#,
            params![
                key.id,
                key.key,
                key.alias,
                key.status.as_str(),
                key.priority,
                key.weight,
                key.updated_at_ms,
            ],
        )?;

        Ok(Some(key))
    })
    .await
}

pub async fn delete_key(db_path: PathBuf, key_id: String) -> anyhow::Result<bool> {
    with_conn(db_path, move |conn| {
        let deleted = conn.execute(r#"DELETE FROM api_keys WHERE id = ?1"#, params![key_id])?;
        Ok(deleted > 0)
    })
    .await
}

/// Relay bookkeeping: touches last_used, bumps total_requests, and resets or
/// bumps error_count depending on the upstream outcome.
pub async fn record_key_usage(db_path: PathBuf, key_id: String, success: bool) -> anyhow::Result<()> {
    with_conn(db_path, move |conn| {
        let ts = now_ms();
        conn.execute(
            r#"
            UPDATE api_keys
            SET last_used_ms = ?2,
                total_requests = total_requests + 1,
                error_count = CASE WHEN ?3 THEN 0 ELSE error_count + 1 END,
                updated_at_ms = ?2
            WHERE id = ?1
            "#,
            params![key_id, ts, success],
        )?;
        Ok(())
    })
    .await
}

/// Transport failure before any upstream status was seen: error_count only.
pub async fn record_key_transport_failure(db_path: PathBuf, key_id: String) -> anyhow::Result<()> {
    with_conn(db_path, move |conn| {
        conn.execute(
            r#"
            UPDATE api_keys
            SET error_count = error_count + 1, updated_at_ms = ?2
            WHERE id = ?1
            "#,
            params![key_id, now_ms()],
        )?;
        Ok(())
    })
    .await
}

/// Health probe outcome. The checker is the only writer of `status`.
pub async fn apply_check_result(
    db_path: PathBuf,
    key_id: String,
    status: KeyStatus,
    balance: Option<f64>,
) -> anyhow::Result<()> {
    with_conn(db_path, move |conn| {
        let ts = now_ms();
        conn.execute(
            r#"
            UPDATE api_keys
            SET status = ?2,
                balance = COALESCE(?3, balance),
                last_checked_ms = ?4,
                error_count = CASE WHEN ?2 = 'active' THEN 0 ELSE error_count + 1 END,
                updated_at_ms = ?4
            WHERE id = ?1
            "#,
            params![key_id, status.as_str(), balance, ts],
        )?;
        Ok(())
    })
    .await
}
