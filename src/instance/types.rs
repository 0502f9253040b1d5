use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::config::Software;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    #[serde(default)]
    pub name: String,
    pub software: Software,
    #[serde(default)]
    pub software_version: String,
    pub mc_version: String,
    #[serde(rename = "java")]
    pub java_path: String,
    #[serde(rename = "java_ver", default)]
    pub java_version: String,
    #[serde(default)]
    pub autostart: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSettings {
    pub software_version: String,
    pub mc_version: String,
    pub java_version: String,
    pub autostart: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Starting => "starting",
            InstanceStatus::Running => "running",
            InstanceStatus::Stopping => "stopping",
        }
    }
}

impl Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
