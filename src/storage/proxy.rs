use rusqlite::types::{FromSql, FromSqlError, ValueRef};
use rusqlite::{OptionalExtension as _, params};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use super::{now_ms, with_conn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    Socks5,
    Socks5h,
    Http,
    Https,
}

impl ProxyType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProxyType::Socks5 => "socks5",
            ProxyType::Socks5h => "socks5h",
            ProxyType::Http => "http",
            ProxyType::Https => "https",
        }
    }
}

impl std::str::FromStr for ProxyType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "socks5" => Ok(ProxyType::Socks5),
            "socks5h" => Ok(ProxyType::Socks5h),
            "http" => Ok(ProxyType::Http),
            "https" => Ok(ProxyType::Https),
            other => Err(anyhow::anyhow!("未知 proxy type：{other}")),
        }
    }
}

impl FromSql for ProxyType {
    fn column_result(value: ValueRef<'_>) -> rusqlite::types::FromSqlResult<Self> {
        let s = value.as_str()?;
        s.parse::<ProxyType>()
            .map_err(|e| FromSqlError::Other(e.into_boxed_dyn_error()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proxy {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub proxy_type: ProxyType,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_masked: Option<String>,
    pub enabled: bool,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

const PROXY_COLUMNS: &str =
    "id, name, proxy_type, host, port, username, password, enabled, created_at_ms, updated_at_ms";

fn proxy_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Proxy> {
    let password: Option<String> = row.get(6)?;
    Ok(Proxy {
        id: row.get(0)?,
        name: row.get(1)?,
        proxy_type: row.get(2)?,
        host: row.get(3)?,
        port: row.get::<_, i64>(4)? as u16,
        username: row.get(5)?,
        password_masked: password.as_ref().map(|_| "****".to_string()),
        password,
        enabled: row.get::<_, i64>(7)? != 0,
        created_at_ms: row.get(8)?,
        updated_at_ms: row.get(9)?,
    })
}

pub async fn list_proxies(db_path: PathBuf) -> anyhow::Result<Vec<Proxy>> {
    with_conn(db_path, |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROXY_COLUMNS} FROM proxies ORDER BY created_at_ms ASC, id ASC"
        ))?;
        let rows = stmt.query_map([], proxy_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    })
    .await
}

pub async fn get_proxy(db_path: PathBuf, proxy_id: String) -> anyhow::Result<Option<Proxy>> {
    with_conn(db_path, move |conn| {
        let mut stmt = conn.prepare(&format!("SELECT {PROXY_COLUMNS} FROM proxies WHERE id = ?1"))?;
        stmt.query_row([proxy_id], proxy_from_row)
            .optional()
            .map_err(Into::into)
    })
    .await
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProxy {
    pub name: String,
    #[serde(rename = "type")]
    pub proxy_type: ProxyType,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

pub async fn create_proxy(db_path: PathBuf, input: CreateProxy) -> anyhow::Result<Proxy> {
    with_conn(db_path, move |conn| {
        let ts = now_ms();
        let id = Uuid::new_v4().to_string();
        conn.execute(
            r#"
            INSERT INTO proxies (id, name, proxy_type, host, port, username, password, enabled, created_at_ms, updated_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
            "#,
            params![
                id,
                input.name,
                input.proxy_type.as_str(),
                input.host,
                input.port as i64,
                input.username,
                input.password,
                if input.enabled { 1 } else { 0 },
                ts,
            ],
        )?;

        Ok(Proxy {
            id,
            name: input.name,
            proxy_type: input.proxy_type,
            host: input.host,
            port: input.port,
            username: input.username,
            password_masked: input.password.as_ref().map(|_| "****".to_string()),
            password: input.password,
            enabled: input.enabled,
            created_at_ms: ts,
            updated_at_ms: ts,
        })
    })
    .await
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProxy {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub proxy_type: Option<ProxyType>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<Option<String>>,
    pub password: Option<Option<String>>,
    pub enabled: Option<bool>,
}

pub async fn update_proxy(
    db_path: PathBuf,
    proxy_id: String,
    input: UpdateProxy,
) -> anyhow::Result<Option<Proxy>> {
    with_conn(db_path, move |conn| {
        let mut stmt = conn.prepare(&format!("SELECT {PROXY_COLUMNS} FROM proxies WHERE id = ?1"))?;
        let Some(mut proxy) = stmt.query_row([&proxy_id], proxy_from_row).optional()? else {
            return Ok(None);
        };

        if let Some(v) = input.name {
            proxy.name = v;
        }
        if let Some(v) = input.proxy_type {
            proxy.proxy_type = v;
        }
        if let Some(v) = input.host {
            proxy.host = v;
        }
        if let Some(v) = input.port {
            proxy.port = v;
        }
        if let Some(v) = input.username {
            proxy.username = v;
        }
        if let Some(v) = input.password {
            proxy.password_masked = v.as_ref().map(|_| "****".to_string());
            proxy.password = v;
        }
        if let Some(v) = input.enabled {
            proxy.enabled = v;
        }
        proxy.updated_at_ms = now_ms();

        conn.execute(
            r#"
            UPDATE proxies
            SET name = ?2, proxy_type = ?3, host = ?4, port = ?5, username = ?6, password = ?7,
                enabled = ?8, updated_at_ms = ?9
            WHERE id = ?1
            "#,
            params![
                proxy.id,
                proxy.name,
                proxy.proxy_type.as_str(),
                proxy.host,
                proxy.port as i64,
                proxy.username,
                proxy.password,
                if proxy.enabled { 1 } else { 0 },
                proxy.updated_at_ms,
            ],
        )?;

        Ok(Some(proxy))
    })
    .await
}

/// Deletes the proxy and clears `proxy_id` on every referencing channel in
/// one transaction, so no dangling reference is ever observable.
pub async fn delete_proxy(db_path: PathBuf, proxy_id: String) -> anyhow::Result<bool> {
    with_conn(db_path, move |conn| {
        let ts = now_ms();
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            r#"UPDATE channels SET proxy_id = NULL, updated_at_ms = ?2 WHERE proxy_id = ?1"#,
            params![proxy_id, ts],
        )?;
        let deleted = tx.execute(r#"DELETE FROM proxies WHERE id = ?1"#, params![proxy_id])?;
        tx.commit()?;
        Ok(deleted > 0)
    })
    .await
}
