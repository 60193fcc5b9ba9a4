use rusqlite::params;
use serde::Serialize;
use std::path::PathBuf;

use super::with_conn;

#[derive(Debug, Clone, Serialize)]
pub struct RequestStats {
    pub total: i64,
    pub success: i64,
    pub failed: i64,
    pub avg_latency_ms: Option<f64>,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub total_channels: i64,
    pub enabled_channels: i64,
    pub total_keys: i64,
    pub active_keys: i64,
    pub total_proxies: i64,
    pub total_tokens: i64,
    pub start_ms: i64,
    pub requests: RequestStats,
}

pub async fn dashboard_stats(db_path: PathBuf, start_ms: i64) -> anyhow::Result<DashboardStats> {
    with_conn(db_path, move |conn| {
        let count = |sql: &str| -> rusqlite::Result<i64> {
            conn.query_row(sql, [], |row| row.get(0))
        };

        let total_channels = count("SELECT COUNT(*) FROM channels")?;
        let enabled_channels = count("SELECT COUNT(*) FROM channels WHERE enabled = 1")?;
        let total_keys = count("SELECT COUNT(*) FROM api_keys")?;
        let active_keys = count("SELECT COUNT(*) FROM api_keys WHERE status = 'active'")?;
        let total_proxies = count("SELECT COUNT(*) FROM proxies")?;
        let total_tokens = count("SELECT COUNT(*) FROM tokens")?;

        let requests = conn.query_row(
            r#"
            SELECT
              COUNT(*) AS total,
              SUM(CASE WHEN status >= 200 AND status < 300 THEN 1 ELSE 0 END) AS success,
              AVG(latency_ms) AS avg_latency_ms,
              SUM(COALESCE(input_tokens, 0)) AS input_tokens,
              SUM(COALESCE(output_tokens, 0)) AS output_tokens
            FROM request_logs
            WHERE ts_ms >= ?1
            "#,
            params![start_ms],
            |row| {
                let total: i64 = row.get(0)?;
                let success: Option<i64> = row.get(1)?;
                let avg_latency_ms: Option<f64> = row.get(2)?;
                let input_tokens: Option<i64> = row.get(3)?;
                let output_tokens: Option<i64> = row.get(4)?;
                let success = success.unwrap_or(0);
                Ok(RequestStats {
                    total,
                    success,
                    failed: total - success,
                    avg_latency_ms,
                    input_tokens: input_tokens.unwrap_or(0),
                    output_tokens: output_tokens.unwrap_or(0),
                })
            },
        )?;

        Ok(DashboardStats {
            total_channels,
            enabled_channels,
            total_keys,
            active_keys,
            total_proxies,
            total_tokens,
            start_ms,
            requests,
        })
    })
    .await
}
