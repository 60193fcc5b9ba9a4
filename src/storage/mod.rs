use anyhow::Context as _;
use rusqlite::Connection;
use std::path::{Path, PathBuf};

mod channel;
mod key;
mod log;
mod proxy;
mod settings;
mod stats;
mod token;

pub use channel::{
    Channel, ChannelType, CreateChannel, LoadBalanceStrategy, TestMethod, UpdateChannel,
    create_channel, delete_channel, get_channel, list_channels, update_channel,
};
pub use key::{
    ApiKey, CreateKey, KeyStatus, UpdateKey, active_keys_for, apply_check_result, create_key,
    create_keys, delete_key, get_key, list_keys, mask_key, record_key_transport_failure,
    record_key_usage, update_key,
};
pub use log::{
    CreateRequestLog, LogQuery, LogQueryResult, RequestLog, append_log, logs_since, query_logs,
};
pub use proxy::{
    CreateProxy, Proxy, ProxyType, UpdateProxy, create_proxy, delete_proxy, get_proxy,
    list_proxies, update_proxy,
};
pub use settings::{Settings, SettingsPatch, get_settings, update_settings};
pub use stats::{DashboardStats, RequestStats, dashboard_stats};
pub use token::{
    CreateToken, Token, UpdateToken, create_token, delete_token, get_token, list_tokens,
    mask_token, token_by_value, touch_token_last_used, update_token,
};

pub fn init_db(db_path: &Path) -> anyhow::Result<()> {
    let conn = Connection::open(db_path)
        .with_context(|| format!("打开 SQLite 文件失败：{}", db_path.display()))?;

    let migration = include_str!("../../migrations/001_init.sql");
    conn.execute_batch(migration)
        .with_context(|| "执行 migrations/001_init.sql 失败")?;

    ensure_api_keys_schema(&conn)?;
    ensure_request_logs_schema(&conn)?;

    Ok(())
}

fn ensure_api_keys_schema(conn: &Connection) -> anyhow::Result<()> {
    ensure_column(conn, "api_keys", "alias", "TEXT NULL")?;
    ensure_column(conn, "api_keys", "balance", "REAL NULL")?;
    Ok(())
}

fn ensure_request_logs_schema(conn: &Connection) -> anyhow::Result<()> {
    ensure_column(conn, "request_logs", "input_tokens", "INTEGER NULL")?;
    ensure_column(conn, "request_logs", "output_tokens", "INTEGER NULL")?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_request_logs_token_ts ON request_logs(token_id, ts_ms)",
        [],
    )?;
    Ok(())
}

fn ensure_column(
    conn: &Connection,
    table: &str,
    column: &str,
    column_def: &str,
) -> anyhow::Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(());
        }
    }

    conn.execute(
        &format!("ALTER TABLE {table} ADD COLUMN {column} {column_def}"),
        [],
    )
    .with_context(|| format!("为 {table} 添加字段 {column} 失败"))?;

    Ok(())
}

pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

async fn with_conn<T, F>(db_path: PathBuf, f: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let conn = Connection::open(&db_path)
            .with_context(|| format!("打开 SQLite 文件失败：{}", db_path.display()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        f(&conn)
    })
    .await
    .context("等待 sqlite blocking 任务失败")?
}
