//! SQLite implementation of BackendRepository.
//!
//! Collection-valued fields (args, env, headers, secret_names) are stored
//! as JSON text columns. Nothing in this table is encrypted - backend
//! configuration is not secret material.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tokio::sync::Mutex;

use toolgate_core::{BackendConfig, BackendRepository, ReconnectPolicy, TransportKind};

use crate::Database;

/// Raw row data extracted from SQLite before JSON decoding.
struct RawBackendRow {
    name: String,
    transport: String,
    command: Option<String>,
    args: String,
    env: String,
    url: Option<String>,
    headers: String,
    session_token: Option<String>,
    reconnect_max_retries: Option<u32>,
    reconnect_base_delay_ms: Option<u64>,
    secret_names: String,
    enabled: bool,
    request_timeout_secs: Option<u64>,
}

pub struct SqliteBackendRepository {
    db: Arc<Mutex<Database>>,
}

impl SqliteBackendRepository {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    /// Standard column list for SELECT queries.
    const SELECT_COLUMNS: &'static str =
        "name, transport, command, args, env, url, headers, session_token, \
         reconnect_max_retries, reconnect_base_delay_ms, secret_names, enabled, \
         request_timeout_secs";

    fn extract_row(row: &rusqlite::Row) -> rusqlite::Result<RawBackendRow> {
        Ok(RawBackendRow {
            name: row.get(0)?,
            transport: row.get(1)?,
            command: row.get(2)?,
            args: row.get(3)?,
            env: row.get(4)?,
            url: row.get(5)?,
            headers: row.get(6)?,
            session_token: row.get(7)?,
            reconnect_max_retries: row.get(8)?,
            reconnect_base_delay_ms: row.get(9)?,
            secret_names: row.get(10)?,
            enabled: row.get(11)?,
            request_timeout_secs: row.get(12)?,
        })
    }

    fn build_config(row: RawBackendRow) -> Result<BackendConfig> {
        let transport = match row.transport.as_str() {
            "stdio" => TransportKind::Stdio,
            "http" => TransportKind::Http,
            other => anyhow::bail!("Unknown transport tag: {other}"),
        };
        let reconnect = match (row.reconnect_max_retries, row.reconnect_base_delay_ms) {
            (Some(max_retries), Some(base_delay_ms)) => Some(ReconnectPolicy {
                max_retries,
                base_delay_ms,
            }),
            _ => None,
        };
        Ok(BackendConfig {
            name: row.name,
            transport,
            command: row.command,
            args: serde_json::from_str(&row.args).context("Invalid args JSON")?,
            env: serde_json::from_str(&row.env).context("Invalid env JSON")?,
            url: row.url,
            headers: serde_json::from_str(&row.headers).context("Invalid headers JSON")?,
            session_token: row.session_token,
            reconnect,
            secret_names: serde_json::from_str(&row.secret_names)
                .context("Invalid secret_names JSON")?,
            secret_name: None,
            enabled: row.enabled,
            request_timeout_secs: row.request_timeout_secs,
        })
    }

    fn transport_tag(transport: TransportKind) -> &'static str {
        match transport {
            TransportKind::Stdio => "stdio",
            TransportKind::Http => "http",
        }
    }
}

#[async_trait]
impl BackendRepository for SqliteBackendRepository {
    async fn list(&self) -> Result<Vec<BackendConfig>> {
        let db = self.db.lock().await;
        let conn = db.connection();

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM backends ORDER BY name",
            Self::SELECT_COLUMNS
        ))?;
        let rows: Vec<_> = stmt
            .query_map([], Self::extract_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::build_config).collect()
    }

    async fn list_enabled(&self) -> Result<Vec<BackendConfig>> {
        let db = self.db.lock().await;
        let conn = db.connection();

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM backends WHERE enabled = 1 ORDER BY name",
            Self::SELECT_COLUMNS
        ))?;
        let rows: Vec<_> = stmt
            .query_map([], Self::extract_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::build_config).collect()
    }

    async fn get(&self, name: &str) -> Result<Option<BackendConfig>> {
        let db = self.db.lock().await;
        let conn = db.connection();

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM backends WHERE name = ?1",
            Self::SELECT_COLUMNS
        ))?;
        let row = stmt.query_row(params![name], Self::extract_row).optional()?;
        row.map(Self::build_config).transpose()
    }

    async fn upsert(&self, config: &BackendConfig) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO backends (name, transport, command, args, env, url, headers, \
             session_token, reconnect_max_retries, reconnect_base_delay_ms, secret_names, \
             enabled, request_timeout_secs, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
             ON CONFLICT(name) DO UPDATE SET
                transport = excluded.transport,
                command = excluded.command,
                args = excluded.args,
                env = excluded.env,
                url = excluded.url,
                headers = excluded.headers,
                session_token = excluded.session_token,
                reconnect_max_retries = excluded.reconnect_max_retries,
                reconnect_base_delay_ms = excluded.reconnect_base_delay_ms,
                secret_names = excluded.secret_names,
                enabled = excluded.enabled,
                request_timeout_secs = excluded.request_timeout_secs,
                updated_at = excluded.updated_at",
            params![
                config.name,
                Self::transport_tag(config.transport),
                config.command,
                serde_json::to_string(&config.args)?,
                serde_json::to_string(&config.env)?,
                config.url,
                serde_json::to_string(&config.headers)?,
                config.session_token,
                config.reconnect.map(|r| r.max_retries),
                config.reconnect.map(|r| r.base_delay_ms),
                serde_json::to_string(&config.secret_names)?,
                config.enabled,
                config.request_timeout_secs,
                now,
            ],
        )?;
        Ok(())
    }

    async fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let db = self.db.lock().await;
        db.connection().execute(
            "UPDATE backends SET enabled = ?2, updated_at = ?3 WHERE name = ?1",
            params![name, enabled, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    async fn set_session_token(&self, name: &str, token: Option<&str>) -> Result<()> {
        let db = self.db.lock().await;
        db.connection().execute(
            "UPDATE backends SET session_token = ?2, updated_at = ?3 WHERE name = ?1",
            params![name, token, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection()
            .execute("DELETE FROM backends WHERE name = ?1", params![name])?;
        Ok(())
    }
}
