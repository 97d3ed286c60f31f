//! Toolgate Storage Layer
//!
//! SQLite database with field-level encryption for sensitive data.
//!
//! Repository traits live in `toolgate-core`; this crate provides the
//! SQLite implementations. Token and secret values are encrypted with
//! AES-256-GCM before they touch the database; everything else is stored
//! as plaintext for queryability.

pub mod crypto;
mod database;
mod repositories;

pub use crypto::{generate_master_key, FieldCipher, KEY_SIZE};
pub use database::Database;
pub use repositories::{
    SqliteBackendRepository, SqliteCredentialRepository, SqliteSecretStore,
};

use anyhow::{Context, Result};
use std::path::Path;

/// Default database file name.
pub const DATABASE_FILE: &str = "toolgate.db";

/// Default master key file name, stored next to the database.
pub const MASTER_KEY_FILE: &str = "toolgate.key";

/// Get the default data directory for the current platform.
pub fn default_data_dir() -> Option<std::path::PathBuf> {
    dirs::data_local_dir().map(|p| p.join("toolgate"))
}

/// Load the master key from `path`, generating and persisting a fresh one
/// on first run.
pub fn load_or_create_master_key(path: &Path) -> Result<[u8; KEY_SIZE]> {
    if path.exists() {
        let hex_key = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read master key at {path:?}"))?;
        let bytes = hex::decode(hex_key.trim()).context("Master key file is not valid hex")?;
        let key: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("Master key must be {KEY_SIZE} bytes"))?;
        return Ok(key);
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create key directory: {parent:?}"))?;
    }
    let key = generate_master_key()?;
    std::fs::write(path, hex::encode(key))
        .with_context(|| format!("Failed to write master key to {path:?}"))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(key)
}
