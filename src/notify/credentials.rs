//! Named SMTP credential blocks

use crate::config::{SmtpSettings, SmtpType};
use crate::error::{MlopsError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailServerCredentials {
    pub username: String,
    pub password: String,
    pub smtp_server: String,
    pub smtp_port: u16,
    pub smtp_type: SmtpType,
}

// Keep the password out of logs
impl fmt::Debug for EmailServerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailServerCredentials")
            .field("username", &self.username)
            .field("password", &"********")
            .field("smtp_server", &self.smtp_server)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_type", &self.smtp_type)
            .finish()
    }
}

impl EmailServerCredentials {
    /// Credentials for `username` on the relay described by `settings`
    pub fn new(username: impl Into<String>, password: impl Into<String>, settings: &SmtpSettings) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            smtp_server: settings.smtp_server.clone(),
            smtp_port: settings.smtp_port,
            smtp_type: settings.smtp_type,
        }
    }

    fn block_path(blocks_dir: &Path, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(MlopsError::invalid_param(
                "block name",
                name,
                "use letters, digits, '-' or '_'",
            ));
        }
        Ok(blocks_dir.join(format!("{}.json", name)))
    }

    /// Store the block as `<blocks_dir>/<name>.json`, replacing any previous one
    pub fn save(&self, blocks_dir: impl AsRef<Path>, name: &str) -> Result<PathBuf> {
        let blocks_dir = blocks_dir.as_ref();
        let path = Self::block_path(blocks_dir, name)?;
        std::fs::create_dir_all(blocks_dir)?;
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        info!(block = name, path = %path.display(), "Saved email credentials block");
        Ok(path)
    }

    pub fn load(blocks_dir: impl AsRef<Path>, name: &str) -> Result<Self> {
        let path = Self::block_path(blocks_dir.as_ref(), name)?;
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            MlopsError::ConfigError(format!(
                "credentials block '{}' not found at {}: {}",
                name,
                path.display(),
                e
            ))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}
