use rusqlite::{Connection, OptionalExtension as _, params};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::{now_ms, with_conn};

const KEY_CHECK_INTERVAL_MS: &str = "check_interval_ms";
const KEY_MAX_LOGS_RETENTION_MS: &str = "max_logs_retention_ms";

pub(crate) const DEFAULT_CHECK_INTERVAL_MS: i64 = 3_600_000;
pub(crate) const DEFAULT_MAX_LOGS_RETENTION_MS: i64 = 604_800_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Settings {
    pub check_interval_ms: i64,
    pub max_logs_retention_ms: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            check_interval_ms: DEFAULT_CHECK_INTERVAL_MS,
            max_logs_retention_ms: DEFAULT_MAX_LOGS_RETENTION_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct SettingsPatch {
    pub check_interval_ms: Option<i64>,
    pub max_logs_retention_ms: Option<i64>,
}

fn get_setting(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM app_settings WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

fn set_setting(
    conn: &Connection,
    key: &str,
    value: &str,
    updated_at_ms: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        r#"
        INSERT INTO app_settings (key, value, updated_at_ms)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(key) DO UPDATE SET
          value = excluded.value,
          updated_at_ms = excluded.updated_at_ms
        "#,
        params![key, value, updated_at_ms],
    )?;
    Ok(())
}

fn get_settings_conn(conn: &Connection) -> anyhow::Result<Settings> {
    let mut out = Settings::default();
    if let Some(v) = get_setting(conn, KEY_CHECK_INTERVAL_MS)?
        && let Ok(n) = v.trim().parse::<i64>()
        && n > 0
    {
        out.check_interval_ms = n;
    }
    if let Some(v) = get_setting(conn, KEY_MAX_LOGS_RETENTION_MS)?
        && let Ok(n) = v.trim().parse::<i64>()
        && n > 0
    {
        out.max_logs_retention_ms = n;
    }
    Ok(out)
}

pub(crate) fn max_logs_retention_ms_conn(conn: &Connection) -> anyhow::Result<i64> {
    Ok(get_settings_conn(conn)?.max_logs_retention_ms)
}

pub async fn get_settings(db_path: PathBuf) -> anyhow::Result<Settings> {
    with_conn(db_path, get_settings_conn).await
}

pub async fn update_settings(db_path: PathBuf, patch: SettingsPatch) -> anyhow::Result<Settings> {
    with_conn(db_path, move |conn| {
        let updated_at_ms = now_ms();
        if let Some(v) = patch.check_interval_ms {
            set_setting(conn, KEY_CHECK_INTERVAL_MS, &v.to_string(), updated_at_ms)?;
        }
        if let Some(v) = patch.max_logs_retention_ms {
            set_setting(
                conn,
                KEY_MAX_LOGS_RETENTION_MS,
                &v.to_string(),
                updated_at_ms,
            )?;
        }
        get_settings_conn(conn)
    })
    .await
}
