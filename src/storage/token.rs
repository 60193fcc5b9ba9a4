use rand::RngCore as _;
use rusqlite::{OptionalExtension as _, params};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use super::{now_ms, with_conn};

pub(crate) const TOKEN_PREFIX: &str = "kh-";

/// 脱敏 Token：前6位 + "****" + 后4位
pub fn mask_token(token: &str) -> String {
    let s = token.trim();
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= 10 {
        return "****".to_string();
    }
    let prefix: String = chars[..6].iter().collect();
    let suffix: String = chars[chars.len() - 4..].iter().collect();
    format!("{prefix}****{suffix}")
}

fn mint_token_value() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{TOKEN_PREFIX}{}", hex::encode(bytes))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub token: String,
    pub token_masked: String,
    pub allowed_channels: Vec<String>,
    pub rate_limit: Option<i64>,
    pub enabled: bool,
    pub created_at_ms: i64,
    pub last_used_ms: Option<i64>,
}

const TOKEN_COLUMNS: &str =
    "id, name, token, allowed_channels, rate_limit, enabled, created_at_ms, last_used_ms";

fn token_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Token> {
    let token: String = row.get(2)?;
    let allowed_raw: String = row.get(3)?;
    let allowed_channels = serde_json::from_str::<Vec<String>>(&allowed_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Token {
        id: row.get(0)?,
        name: row.get(1)?,
        token_masked: mask_token(&token),
        token,
        allowed_channels,
        rate_limit: row.get(4)?,
        enabled: row.get::<_, i64>(5)? != 0,
        created_at_ms: row.get(6)?,
        last_used_ms: row.get(7)?,
    })
}

pub async fn list_tokens(db_path: PathBuf) -> anyhow::Result<Vec<Token>> {
    with_conn(db_path, |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens ORDER BY created_at_ms ASC, id ASC"
        ))?;
        let rows = stmt.query_map([], token_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    })
    .await
}

pub async fn get_token(db_path: PathBuf, token_id: String) -> anyhow::Result<Option<Token>> {
    with_conn(db_path, move |conn| {
        let mut stmt = conn.prepare(&format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE id = ?1"))?;
        stmt.query_row([token_id], token_from_row)
            .optional()
            .map_err(Into::into)
    })
    .await
}

/// Exact-match lookup on the secret value, used by the auth gate.
pub async fn token_by_value(db_path: PathBuf, value: String) -> anyhow::Result<Option<Token>> {
    with_conn(db_path, move |conn| {
        let mut stmt =
            conn.prepare(&format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE token = ?1"))?;
        stmt.query_row([value], token_from_row)
            .optional()
            .map_err(Into::into)
    })
    .await
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateToken {
    pub name: String,
    #[serde(default)]
    pub allowed_channels: Vec<String>,
    pub rate_limit: Option<i64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

pub async fn create_token(db_path: PathBuf, input: CreateToken) -> anyhow::Result<Token> {
    with_conn(db_path, move |conn| {
        let ts = now_ms();
        let id = Uuid::new_v4().to_string();
        let token = mint_token_value();
        let allowed_json = serde_json::to_string(&input.allowed_channels)?;
        conn.execute(
            r#"
            INSERT INTO tokens (id, name, token, allowed_channels, rate_limit, enabled, created_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                id,
                input.name,
                token,
                allowed_json,
                input.rate_limit,
                if input.enabled { 1 } else { 0 },
                ts,
            ],
        )?;

        Ok(Token {
            id,
            name: input.name,
            token_masked: mask_token(&token),
            token,
            allowed_channels: input.allowed_channels,
            rate_limit: input.rate_limit,
            enabled: input.enabled,
            created_at_ms: ts,
            last_used_ms: None,
        })
    })
    .await
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateToken {
    pub name: Option<String>,
    pub allowed_channels: Option<Vec<String>>,
    pub rate_limit: Option<Option<i64>>,
    pub enabled: Option<bool>,
}

pub async fn update_token(
    db_path: PathBuf,
    token_id: String,
    input: UpdateToken,
) -> anyhow::Result<Option<Token>> {
    with_conn(db_path, move |conn| {
        let mut stmt = conn.prepare(&format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE id = ?1"))?;
        let Some(mut token) = stmt.query_row([&token_id], token_from_row).optional()? else {
            return Ok(None);
        };

        if let Some(v) = input.name {
            token.name = v;
        }
        if let Some(v) = input.allowed_channels {
            token.allowed_channels = v;
        }
        if let Some(v) = input.rate_limit {
            token.rate_limit = v;
        }
        if let Some(v) = input.enabled {
            token.enabled = v;
        }

        let allowed_json = serde_json::to_string(&token.allowed_channels)?;
        conn.execute(
            r#"
            UPDATE tokens
            SET name = ?2, allowed_channels = ?3, rate_limit = ?4, enabled = ?5
            WHERE id = ?1
            "#,
            params![
                token.id,
                token.name,
                allowed_json,
                token.rate_limit,
                if token.enabled { 1 } else { 0 },
            ],
        )?;

        Ok(Some(token))
    })
    .await
}

pub async fn delete_token(db_path: PathBuf, token_id: String) -> anyhow::Result<bool> {
    with_conn(db_path, move |conn| {
        let deleted = conn.execute(r#"DELETE FROM tokens WHERE id = ?1"#, params![token_id])?;
        Ok(deleted > 0)
    })
    .await
}

/// Best-effort: the auth gate fires this without awaiting the outcome.
pub async fn touch_token_last_used(db_path: PathBuf, token_id: String) -> anyhow::Result<()> {
    with_conn(db_path, move |conn| {
        conn.execute(
            r#"UPDATE tokens SET last_used_ms = ?2 WHERE id = ?1"#,
            params![token_id, now_ms()],
        )?;
        Ok(())
    })
    .await
}
