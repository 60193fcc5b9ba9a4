use rusqlite::types::{FromSql, FromSqlError, ValueRef};
use rusqlite::{Connection, OptionalExtension as _, params};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use super::{now_ms, with_conn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelType {
    Openai,
    Anthropic,
    Gemini,
    OpenaiCompatible,
}

impl ChannelType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelType::Openai => "openai",
            ChannelType::Anthropic => "anthropic",
            ChannelType::Gemini => "gemini",
            ChannelType::OpenaiCompatible => "openai-compatible",
        }
    }

    /// openai-compatible endpoints speak the openai dialect.
    pub fn is_openai_family(self) -> bool {
        matches!(self, ChannelType::Openai | ChannelType::OpenaiCompatible)
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChannelType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(ChannelType::Openai),
            "anthropic" => Ok(ChannelType::Anthropic),
            "gemini" => Ok(ChannelType::Gemini),
            "openai-compatible" => Ok(ChannelType::OpenaiCompatible),
            other => Err(anyhow::anyhow!("未知 channel type：{other}")),
        }
    }
}

impl FromSql for ChannelType {
    fn column_result(value: ValueRef<'_>) -> rusqlite::types::FromSqlResult<Self> {
        let s = value.as_str()?;
        s.parse::<ChannelType>()
            .map_err(|e| FromSqlError::Other(e.into_boxed_dyn_error()))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TestMethod {
    Balance,
    Chat,
    Models,
}

impl TestMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            TestMethod::Balance => "balance",
            TestMethod::Chat => "chat",
            TestMethod::Models => "models",
        }
    }
}

impl std::str::FromStr for TestMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "balance" => Ok(TestMethod::Balance),
            "chat" => Ok(TestMethod::Chat),
            "models" => Ok(TestMethod::Models),
            other => Err(anyhow::anyhow!("未知 test method：{other}")),
        }
    }
}

impl FromSql for TestMethod {
    fn column_result(value: ValueRef<'_>) -> rusqlite::types::FromSqlResult<Self> {
        let s = value.as_str()?;
        s.parse::<TestMethod>()
            .map_err(|e| FromSqlError::Other(e.into_boxed_dyn_error()))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalanceStrategy {
    RoundRobin,
    Weighted,
    Priority,
    LeastUsed,
}

impl LoadBalanceStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            LoadBalanceStrategy::RoundRobin => "round-robin",
            LoadBalanceStrategy::Weighted => "weighted",
            LoadBalanceStrategy::Priority => "priority",
            LoadBalanceStrategy::LeastUsed => "least-used",
        }
    }
}

impl std::str::FromStr for LoadBalanceStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round-robin" => Ok(LoadBalanceStrategy::RoundRobin),
            "weighted" => Ok(LoadBalanceStrategy::Weighted),
            "priority" => Ok(LoadBalanceStrategy::Priority),
            "least-used" => Ok(LoadBalanceStrategy::LeastUsed),
            other => Err(anyhow::anyhow!("未知 load balance strategy：{other}")),
        }
    }
}

impl FromSql for LoadBalanceStrategy {
    fn column_result(value: ValueRef<'_>) -> rusqlite::types::FromSqlResult<Self> {
        let s = value.as_str()?;
        s.parse::<LoadBalanceStrategy>()
            .map_err(|e| FromSqlError::Other(e.into_boxed_dyn_error()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    pub base_url: String,
    pub test_method: TestMethod,
    pub test_model: Option<String>,
    pub proxy_id: Option<String>,
    pub load_balance_strategy: LoadBalanceStrategy,
    pub enabled: bool,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

const CHANNEL_COLUMNS: &str = "id, name, channel_type, base_url, test_method, test_model, proxy_id, load_balance_strategy, enabled, created_at_ms, updated_at_ms";

fn channel_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: row.get(0)?,
        name: row.get(1)?,
        channel_type: row.get(2)?,
        base_url: row.get(3)?,
        test_method: row.get(4)?,
        test_model: row.get(5)?,
        proxy_id: row.get(6)?,
        load_balance_strategy: row.get(7)?,
        enabled: row.get::<_, i64>(8)? != 0,
        created_at_ms: row.get(9)?,
        updated_at_ms: row.get(10)?,
    })
}

pub(crate) fn get_channel_conn(
    conn: &Connection,
    channel_id: &str,
) -> anyhow::Result<Option<Channel>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = ?1"
    ))?;
    stmt.query_row([channel_id], channel_from_row)
        .optional()
        .map_err(Into::into)
}

/// Insertion order, so relay candidate iteration is deterministic.
pub async fn list_channels(db_path: PathBuf) -> anyhow::Result<Vec<Channel>> {
    with_conn(db_path, |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels ORDER BY created_at_ms ASC, id ASC"
        ))?;
        let rows = stmt.query_map([], channel_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    })
    .await
}

pub async fn get_channel(db_path: PathBuf, channel_id: String) -> anyhow::Result<Option<Channel>> {
    with_conn(db_path, move |conn| get_channel_conn(conn, &channel_id)).await
}

fn default_test_method() -> TestMethod {
    TestMethod::Models
}

fn default_strategy() -> LoadBalanceStrategy {
    LoadBalanceStrategy::RoundRobin
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateChannel {
    pub name: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    pub base_url: String,
    #[serde(default = "default_test_method")]
    pub test_method: TestMethod,
    pub test_model: Option<String>,
    pub proxy_id: Option<String>,
    #[serde(default = "default_strategy")]
    pub load_balance_strategy: LoadBalanceStrategy,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

pub async fn create_channel(db_path: PathBuf, input: CreateChannel) -> anyhow::Result<Channel> {
    with_conn(db_path, move |conn| {
        let ts = now_ms();
        let id = Uuid::new_v4().to_string();
        conn.execute(
            r#"
            INSERT INTO channels (id, name, channel_type, base_url, test_method, test_model, proxy_id, load_balance_strategy, enabled, created_at_ms, updated_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                id,
                input.name,
                input.channel_type.as_str(),
                input.base_url.trim(),
                input.test_method.as_str(),
                input.test_model,
                input.proxy_id,
                input.load_balance_strategy.as_str(),
                if input.enabled { 1 } else { 0 },
                ts,
                ts,
            ],
        )?;

        Ok(Channel {
            id,
            name: input.name,
            channel_type: input.channel_type,
            base_url: input.base_url.trim().to_string(),
            test_method: input.test_method,
            test_model: input.test_model,
            proxy_id: input.proxy_id,
            load_balance_strategy: input.load_balance_strategy,
            enabled: input.enabled,
            created_at_ms: ts,
            updated_at_ms: ts,
        })
    })
    .await
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateChannel {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub channel_type: Option<ChannelType>,
    pub base_url: Option<String>,
    pub test_method: Option<TestMethod>,
    pub test_model: Option<Option<String>>,
    pub proxy_id: Option<Option<String>>,
    pub load_balance_strategy: Option<LoadBalanceStrategy>,
    pub enabled: Option<bool>,
}

pub async fn update_channel(
    db_path: PathBuf,
    channel_id: String,
    input: UpdateChannel,
) -> anyhow::Result<Option<Channel>> {
    with_conn(db_path, move |conn| {
        let Some(mut channel) = get_channel_conn(conn, &channel_id)? else {
            return Ok(None);
        };

        if let Some(v) = input.name {
            channel.name = v;
        }
        if let Some(v) = input.channel_type {
            channel.channel_type = v;
        }
        if let Some(v) = input.base_url {
            channel.base_url = v.trim().to_string();
        }
        if let Some(v) = input.test_method {
            channel.test_method = v;
        }
        if let Some(v) = input.test_model {
            channel.test_model = v;
        }
        if let Some(v) = input.proxy_id {
            channel.proxy_id = v;
        }
        if let Some(v) = input.load_balance_strategy {
            channel.load_balance_strategy = v;
        }
        if let Some(v) = input.enabled {
            channel.enabled = v;
        }
        channel.updated_at_ms = now_ms();

        conn.execute(
            r#"
            UPDATE channels
            SET name = ?2, channel_type = ?3, base_url = ?4, test_method = ?5, test_model = ?6,
                proxy_id = ?7, load_balance_strategy = ?8, enabled = ?9, updated_at_ms = ?10
            WHERE id = ?1
            "#,
            params![
                channel.id,
                channel.name,
                channel.channel_type.as_str(),
                channel.base_url,
                channel.test_method.as_str(),
                channel.test_model,
                channel.proxy_id,
                channel.load_balance_strategy.as_str(),
                if channel.enabled { 1 } else { 0 },
                channel.updated_at_ms,
            ],
        )?;

        Ok(Some(channel))
    })
    .await
}

/// Removes the channel and every key under it in one transaction.
pub async fn delete_channel(db_path: PathBuf, channel_id: String) -> anyhow::Result<bool> {
    with_conn(db_path, move |conn| {
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            r#"DELETE FROM api_keys WHERE channel_id = ?1"#,
            params![channel_id],
        )?;
        let deleted = tx.execute(r#"DELETE FROM channels WHERE id = ?1"#, params![channel_id])?;
        tx.commit()?;
        Ok(deleted > 0)
    })
    .await
}
