use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::fs::read;

use crate::error::DaemonError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub listen: String,
    pub instances_dir: PathBuf,
    pub auth_hash_path: PathBuf,
    pub jvm_dir: PathBuf,
    pub log_dir: PathBuf,
    pub queue_poll_interval_ms: u64,
    pub history_capacity: usize,
    pub default_jvm_args: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:29836".to_string(),
            instances_dir: PathBuf::from("/var/lib/fleetguard/instances"),
            auth_hash_path: PathBuf::from("/var/lib/fleetguard/authhash"),
            jvm_dir: PathBuf::from("/usr/lib/jvm"),
            log_dir: PathBuf::from("/var/log/fleetguard"),
            queue_poll_interval_ms: 2000,
            history_capacity: 1024 * 1024,
            default_jvm_args: "-Xmx4G".to_string(),
        }
    }
}

impl DaemonConfig {
    pub async fn load(path: &PathBuf) -> Result<Self, DaemonError> {
        let data = read(path).await.map_err(|e| DaemonError::Config {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        serde_json::from_slice(&data).map_err(|e| DaemonError::Config {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue_poll_interval_ms)
    }

    /// Reads the pre-shared auth hash. Surrounding whitespace, including the
    /// trailing newline most editors add, is not part of the secret.
    pub async fn read_auth_hash(&self) -> Result<String, DaemonError> {
        let data = read(&self.auth_hash_path)
            .await
            .map_err(|e| DaemonError::AuthHash {
                path: self.auth_hash_path.display().to_string(),
                reason: e.to_string(),
            })?;

        Ok(String::from_utf8_lossy(&data).trim().to_string())
    }
}
