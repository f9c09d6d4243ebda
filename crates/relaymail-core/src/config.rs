//! Client configuration
//!
//! Loaded from `relaymail.json` in the data directory. Every field has a
//! default, so a missing file or a partial file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MailError, MailResult};
use crate::types::Network;

/// File name of the configuration inside the data directory
pub const CONFIG_FILE_NAME: &str = "relaymail.json";

/// File name of the database inside the data directory
pub const DATABASE_FILE_NAME: &str = "relaymail.redb";

/// Package id of the messaging contracts on testnet
pub const DEFAULT_MESSAGING_PACKAGE: &str =
    "0x984960ebddd75c15c6d38355ac462621db0ffc7d6647214c802cd3b685e1af3d";

/// Runtime configuration of the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct MailConfig {
    pub network: Network,
    /// Base URL of the sponsor relay (`/sponsor` and `/execute` are appended)
    pub sponsor_url: String,
    /// Package id whose call targets the relay is allowed to sponsor
    pub messaging_package: String,
    /// Interval of the background pull loop
    pub poll_interval_secs: u64,
    /// Lifetime of a freshly created session credential
    pub session_ttl_minutes: u32,
    /// Call targets sponsored in addition to the built-in allowlist
    pub extra_call_targets: Vec<String>,
    /// Timeout of a single relay HTTP request
    pub request_timeout_secs: u64,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            network: Network::Testnet,
            sponsor_url: "http://localhost:3001".to_string(),
            messaging_package: DEFAULT_MESSAGING_PACKAGE.to_string(),
            poll_interval_secs: 10,
            session_ttl_minutes: 30,
            extra_call_targets: Vec::new(),
            request_timeout_secs: 30,
        }
    }
}

impl MailConfig {
    /// Load configuration from `path`, falling back to defaults if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns `MailError::Serialization` for a file that exists but is not
    /// valid JSON, and `MailError::InvalidInput` for out-of-range values.
    pub fn load(path: impl AsRef<Path>) -> MailResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let data = std::fs::read(path)?;
        let config: MailConfig = serde_json::from_slice(&data)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), network = %config.network, "Loaded config");
        Ok(config)
    }

    /// Load `relaymail.json` from a data directory
    pub fn load_from_dir(data_dir: impl AsRef<Path>) -> MailResult<Self> {
        Self::load(data_dir.as_ref().join(CONFIG_FILE_NAME))
    }

    /// Write the configuration as pretty JSON, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> MailResult<()> {
        let path = path.as_ref();
        self.validate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    pub fn validate(&self) -> MailResult<()> {
        if self.poll_interval_secs == 0 {
            return Err(MailError::InvalidInput(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.session_ttl_minutes == 0 {
            return Err(MailError::InvalidInput(
                "session_ttl_minutes must be at least 1".to_string(),
            ));
        }
        if !self.sponsor_url.starts_with("http://") && !self.sponsor_url.starts_with("https://") {
            return Err(MailError::InvalidInput(format!(
                "sponsor_url '{}' must be an http(s) URL",
                self.sponsor_url
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Path of the database inside `data_dir`
    pub fn database_path(data_dir: impl AsRef<Path>) -> PathBuf {
        data_dir.as_ref().join(DATABASE_FILE_NAME)
    }
}
