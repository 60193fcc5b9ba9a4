use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use super::settings::max_logs_retention_ms_conn;
use super::with_conn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLog {
    pub id: String,
    pub ts_ms: i64,
    pub token_id: Option<String>,
    pub channel_id: String,
    pub key_id: String,
    pub model: String,
    pub path: String,
    pub method: String,
    pub status: i64,
    pub latency_ms: i64,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub error: Option<String>,
    pub streaming: bool,
}

#[derive(Debug, Clone)]
pub struct CreateRequestLog {
    pub ts_ms: i64,
    pub token_id: Option<String>,
    pub channel_id: String,
    pub key_id: String,
    pub model: String,
    pub path: String,
    pub method: String,
    pub status: i64,
    pub latency_ms: i64,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub error: Option<String>,
    pub streaming: bool,
}

const LOG_COLUMNS: &str = "id, ts_ms, token_id, channel_id, key_id, model, path, method, status, latency_ms, input_tokens, output_tokens, error, streaming";

fn log_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RequestLog> {
    Ok(RequestLog {
        id: row.get(0)?,
        ts_ms: row.get(1)?,
        token_id: row.get(2)?,
        channel_id: row.get(3)?,
        key_id: row.get(4)?,
        model: row.get(5)?,
        path: row.get(6)?,
        method: row.get(7)?,
        status: row.get(8)?,
        latency_ms: row.get(9)?,
        input_tokens: row.get(10)?,
        output_tokens: row.get(11)?,
        error: row.get(12)?,
        streaming: row.get::<_, i64>(13)? != 0,
    })
}

/// Appends one row and garbage-collects everything past the retention
/// horizon in the same transaction.
pub async fn append_log(db_path: PathBuf, input: CreateRequestLog) -> anyhow::Result<()> {
    with_conn(db_path, move |conn| {
        let retention_ms = max_logs_retention_ms_conn(conn)?;
        let cutoff_ms = input.ts_ms.saturating_sub(retention_ms);

        let tx = conn.unchecked_transaction()?;
        tx.execute(
            r#"
            INSERT INTO request_logs (id, ts_ms, token_id, channel_id, key_id, model, path, method, status, latency_ms, input_tokens, output_tokens, error, streaming)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                Uuid::new_v4().to_string(),
                input.ts_ms,
                input.token_id,
                input.channel_id,
                input.key_id,
                input.model,
                input.path,
                input.method,
                input.status,
                input.latency_ms,
                input.input_tokens,
                input.output_tokens,
                input.error,
                if input.streaming { 1 } else { 0 },
            ],
        )?;
        tx.execute(
            r#"DELETE FROM request_logs WHERE ts_ms < ?1"#,
            params![cutoff_ms],
        )?;
        tx.commit()?;
        Ok(())
    })
    .await
}

#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    pub channel_id: Option<String>,
    pub status: Option<i64>,
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogQueryResult {
    pub total: i64,
    pub items: Vec<RequestLog>,
}

/// Filters compose as AND; newest first; `total` counts before pagination.
pub async fn query_logs(db_path: PathBuf, q: LogQuery) -> anyhow::Result<LogQueryResult> {
    with_conn(db_path, move |conn| {
        let mut where_sql = Vec::<String>::new();
        let mut params = Vec::<rusqlite::types::Value>::new();

        if let Some(channel_id) = q.channel_id.filter(|s| !s.trim().is_empty()) {
            where_sql.push("channel_id = ?".to_string());
            params.push(channel_id.into());
        }
        if let Some(status) = q.status {
            where_sql.push("status = ?".to_string());
            params.push(status.into());
        }
        if let Some(start_ms) = q.start_ms {
            where_sql.push("ts_ms >= ?".to_string());
            params.push(start_ms.into());
        }
        if let Some(end_ms) = q.end_ms {
            where_sql.push("ts_ms <= ?".to_string());
            params.push(end_ms.into());
        }

        let where_clause = if where_sql.is_empty() {
            "".to_string()
        } else {
            format!("WHERE {}", where_sql.join(" AND "))
        };

        let total: i64 = {
            let sql = format!("SELECT COUNT(*) FROM request_logs {where_clause}");
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_row(rusqlite::params_from_iter(params.iter()), |row| row.get(0))?
        };

        let mut params_items = params;
        params_items.push(q.limit.unwrap_or(50).clamp(1, 1000).into());
        params_items.push(q.offset.unwrap_or(0).max(0).into());

        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM request_logs {where_clause} ORDER BY ts_ms DESC LIMIT ? OFFSET ?"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params_items.iter()), log_from_row)?;
        let items = rows.collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(LogQueryResult { total, items })
    })
    .await
}

pub async fn logs_since(db_path: PathBuf, start_ms: i64) -> anyhow::Result<Vec<RequestLog>> {
    with_conn(db_path, move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {LOG_COLUMNS} FROM request_logs WHERE ts_ms >= ?1 ORDER BY ts_ms DESC"
        ))?;
        let rows = stmt.query_map(params![start_ms], log_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    })
    .await
}
