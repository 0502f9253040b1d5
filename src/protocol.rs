use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    config::Software,
    error::ProtocolError,
    instance::{InstanceConfig, InstanceStatus},
};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "data", rename_all = "lowercase")]
pub enum Inbound {
    Auth {
        hash: String,
    },
    StartConsoleLogging {
        server_name: String,
    },
    StopConsoleLogging,
    StartServer {
        server_name: String,
    },
    StopServer {
        server_name: String,
    },
    ListServers,
    GetState {
        server_name: String,
    },
    GetSoftwareData {
        software: String,
    },
    GetBuildData {
        software: String,
        mc_version: String,
    },
    InstallServer {
        mcversion: String,
        software: String,
        #[serde(default)]
        softwareversion: Option<String>,
        name: String,
    },
    DeleteServer {
        name: String,
    },
    #[serde(rename = "console_write")]
    ConsoleWrite {
        server_name: String,
        content: String,
    },
}

impl Inbound {
    pub const COMMANDS: &'static [&'static str] = &[
        "auth",
        "startconsolelogging",
        "stopconsolelogging",
        "startserver",
        "stopserver",
        "listservers",
        "getstate",
        "getsoftwaredata",
        "getbuilddata",
        "installserver",
        "deleteserver",
        "console_write",
    ];

    pub fn json(text: &str) -> Result<Value, ProtocolError> {
        serde_json::from_str(text).map_err(|_| ProtocolError::Json)
    }

    pub fn tag(value: &Value) -> Result<&str, ProtocolError> {
        value
            .get("data")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingData)
    }

    /// Unknown commands are reported before missing fields.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let tag = Self::tag(&value)?;
        if !Self::COMMANDS.contains(&tag) {
            return Err(ProtocolError::InvalidCommand);
        }
        serde_json::from_value(value).map_err(|_| ProtocolError::MissingData)
    }

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Self::from_value(Self::json(text)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "data", rename_all = "lowercase")]
pub enum Outbound {
    Welcome,
    Exception {
        msg: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        java_ver: Option<String>,
    },
    ServerList {
        servers: BTreeMap<String, InstanceConfig>,
        states: BTreeMap<String, InstanceStatus>,
        queue: Vec<String>,
    },
    ServerState {
        server: String,
        state: InstanceStatus,
    },
    SoftwareInfo {
        software: Software,
        mc_versions: Vec<String>,
    },
    BuildInfo {
        software: Software,
        mc_version: String,
        builds: Vec<String>,
    },
    #[serde(rename = "log_history")]
    LogHistory {
        log: String,
    },
    #[serde(rename = "console_logging")]
    ConsoleLogging {
        console: String,
        msg: String,
    },
    Queue {
        queue: Vec<String>,
    },
}

impl Outbound {
    pub fn exception<S: Into<String>>(msg: S) -> Self {
        Outbound::Exception {
            msg: msg.into(),
            java_ver: None,
        }
    }
}

impl From<ProtocolError> for Outbound {
    fn from(e: ProtocolError) -> Self {
        Outbound::exception(e.to_string())
    }
}
