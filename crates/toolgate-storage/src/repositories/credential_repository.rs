//! SQLite implementation of CredentialRepository with field encryption.
//!
//! Token material (access token, refresh token, client secret, PKCE
//! verifier) is encrypted before it touches the database. Registration
//! metadata (client id, endpoints) stays in the clear.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tokio::sync::Mutex;

use toolgate_core::{CredentialRecord, CredentialRepository};

use crate::crypto::FieldCipher;
use crate::Database;

use super::{parse_datetime, parse_optional_datetime};

/// Raw row data extracted from SQLite before decryption.
struct RawCredentialRow {
    backend_name: String,
    token_type: String,
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<String>,
    scope: Option<String>,
    client_id: String,
    client_secret: Option<String>,
    redirect_uri: Option<String>,
    authorize_url: String,
    token_url: String,
    pkce_verifier: Option<String>,
    created_at: String,
    updated_at: String,
}

pub struct SqliteCredentialRepository {
    db: Arc<Mutex<Database>>,
    cipher: Arc<FieldCipher>,
}

impl SqliteCredentialRepository {
    pub fn new(db: Arc<Mutex<Database>>, cipher: Arc<FieldCipher>) -> Self {
        Self { db, cipher }
    }

    const SELECT_COLUMNS: &'static str =
        "backend_name, token_type, access_token, refresh_token, expires_at, scope, \
         client_id, client_secret, redirect_uri, authorize_url, token_url, pkce_verifier, \
         created_at, updated_at";

    fn extract_row(row: &rusqlite::Row) -> rusqlite::Result<RawCredentialRow> {
        Ok(RawCredentialRow {
            backend_name: row.get(0)?,
            token_type: row.get(1)?,
            access_token: row.get(2)?,
            refresh_token: row.get(3)?,
            expires_at: row.get(4)?,
            scope: row.get(5)?,
            client_id: row.get(6)?,
            client_secret: row.get(7)?,
            redirect_uri: row.get(8)?,
            authorize_url: row.get(9)?,
            token_url: row.get(10)?,
            pkce_verifier: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    fn build_record(&self, row: RawCredentialRow) -> Result<CredentialRecord> {
        Ok(CredentialRecord {
            backend: row.backend_name,
            token_type: row.token_type,
            access_token: self.cipher.decrypt(&row.access_token)?,
            refresh_token: self.cipher.decrypt_opt(row.refresh_token.as_deref())?,
            expires_at: parse_optional_datetime(row.expires_at),
            scope: row.scope,
            client_id: row.client_id,
            client_secret: self.cipher.decrypt_opt(row.client_secret.as_deref())?,
            redirect_uri: row.redirect_uri,
            authorize_url: row.authorize_url,
            token_url: row.token_url,
            pkce_verifier: self.cipher.decrypt_opt(row.pkce_verifier.as_deref())?,
            created_at: parse_datetime(&row.created_at),
            updated_at: parse_datetime(&row.updated_at),
        })
    }
}

#[async_trait]
impl CredentialRepository for SqliteCredentialRepository {
    async fn get(&self, backend: &str) -> Result<Option<CredentialRecord>> {
        let db = self.db.lock().await;
        let conn = db.connection();

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM credentials WHERE backend_name = ?1",
            Self::SELECT_COLUMNS
        ))?;
        let row = stmt
            .query_row(params![backend], Self::extract_row)
            .optional()?;
        drop(stmt);

        row.map(|r| self.build_record(r)).transpose()
    }

    async fn save(&self, record: &CredentialRecord) -> Result<()> {
        let access_token = self.cipher.encrypt(&record.access_token)?;
        let refresh_token = self.cipher.encrypt_opt(record.refresh_token.as_deref())?;
        let client_secret = self.cipher.encrypt_opt(record.client_secret.as_deref())?;
        let pkce_verifier = self.cipher.encrypt_opt(record.pkce_verifier.as_deref())?;

        let db = self.db.lock().await;
        db.connection().execute(
            "INSERT INTO credentials (backend_name, token_type, access_token, refresh_token, \
             expires_at, scope, client_id, client_secret, redirect_uri, authorize_url, \
             token_url, pkce_verifier, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(backend_name) DO UPDATE SET
                token_type = excluded.token_type,
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                scope = excluded.scope,
                client_id = excluded.client_id,
                client_secret = excluded.client_secret,
                redirect_uri = excluded.redirect_uri,
                authorize_url = excluded.authorize_url,
                token_url = excluded.token_url,
                pkce_verifier = excluded.pkce_verifier,
                updated_at = excluded.updated_at",
            params![
                record.backend,
                record.token_type,
                access_token,
                refresh_token,
                record.expires_at.map(|dt| dt.to_rfc3339()),
                record.scope,
                record.client_id,
                client_secret,
                record.redirect_uri,
                record.authorize_url,
                record.token_url,
                pkce_verifier,
                record.created_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn delete(&self, backend: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection().execute(
            "DELETE FROM credentials WHERE backend_name = ?1",
            params![backend],
        )?;
        Ok(())
    }
}
