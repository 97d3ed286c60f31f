//! SQLite implementation of SecretStore.
//!
//! Secrets are keyed by (caller, key); values are encrypted at rest.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::params;
use tokio::sync::Mutex;

use toolgate_core::SecretStore;

use crate::crypto::FieldCipher;
use crate::Database;

pub struct SqliteSecretStore {
    db: Arc<Mutex<Database>>,
    cipher: Arc<FieldCipher>,
}

impl SqliteSecretStore {
    pub fn new(db: Arc<Mutex<Database>>, cipher: Arc<FieldCipher>) -> Self {
        Self { db, cipher }
    }
}

#[async_trait]
impl SecretStore for SqliteSecretStore {
    async fn secrets_for(&self, caller: &str) -> Result<HashMap<String, String>> {
        let db = self.db.lock().await;
        let conn = db.connection();

        let mut stmt = conn.prepare("SELECT key, value FROM secrets WHERE caller = ?1")?;
        let rows: Vec<(String, String)> = stmt
            .query_map(params![caller], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut secrets = HashMap::with_capacity(rows.len());
        for (key, stored) in rows {
            secrets.insert(key, self.cipher.decrypt(&stored)?);
        }
        Ok(secrets)
    }

    async fn put(&self, caller: &str, key: &str, value: &str) -> Result<()> {
        let stored = self.cipher.encrypt(value)?;

        let db = self.db.lock().await;
        db.connection().execute(
            "INSERT INTO secrets (caller, key, value, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(caller, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            params![caller, key, stored, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    async fn delete(&self, caller: &str, key: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection().execute(
            "DELETE FROM secrets WHERE caller = ?1 AND key = ?2",
            params![caller, key],
        )?;
        Ok(())
    }
}
