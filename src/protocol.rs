//! Request and response types exchanged with callers.
//!
//! The serde names match the JSON-RPC wire format existing clients already
//! speak: lowercase request keys and capitalized response keys.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::RetCode;

/// Transport used to reach a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProtocolKind {
    #[default]
    Ssh,
    Telnet,
}

impl TryFrom<String> for ProtocolKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_ascii_lowercase().as_str() {
            "ssh" => Ok(ProtocolKind::Ssh),
            "telnet" => Ok(ProtocolKind::Telnet),
            _ => Err(format!("protocol {value} not support")),
        }
    }
}

impl From<ProtocolKind> for String {
    fn from(kind: ProtocolKind) -> String {
        kind.to_string()
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolKind::Ssh => f.write_str("ssh"),
            ProtocolKind::Telnet => f.write_str("telnet"),
        }
    }
}

/// Login credentials.
#[derive(Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Auth {
    #[serde(alias = "Username")]
    pub username: String,
    #[serde(alias = "Password")]
    pub password: String,
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Auth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A batch of CLI commands to run on one device.
#[derive(Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CliRequest {
    /// Device vendor, e.g. `cisco`.
    #[serde(default)]
    pub vendor: String,

    /// Device type, e.g. `asa`.
    #[serde(default, rename = "type")]
    pub device_type: String,

    /// Device OS version, e.g. `9.6(x)`.
    #[serde(default)]
    pub version: String,

    /// Device identity (uuid, hostname, ...), echoed in the response.
    #[serde(default)]
    pub device: String,

    /// Mode the commands must run in. Empty selects the profile start mode.
    #[serde(default)]
    pub mode: String,

    #[serde(default)]
    #[schemars(with = "String")]
    pub protocol: ProtocolKind,

    #[serde(default)]
    pub auth: Auth,

    /// `host:port` of the device; also the session key.
    pub address: String,

    #[serde(default)]
    pub commands: Vec<String>,

    /// Output format hint (PAN-OS `set`, `xml`, ...).
    #[serde(default)]
    pub format: Option<String>,

    /// Per-read timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Whole-request deadline in seconds. Defaults to the per-read timeout.
    #[serde(default)]
    pub deadline: Option<u64>,

    #[serde(default)]
    pub log_prefix: Option<String>,

    /// Secret sent after `enable` on devices that start unprivileged.
    #[serde(default)]
    pub enable_pwd: Option<String>,

    /// Correlation id; generated when absent.
    #[serde(default)]
    pub session: Option<String>,
}

impl CliRequest {
    /// Identity string used for profile resolution: `vendor.type.version`.
    pub fn identity(&self) -> String {
        [
            self.vendor.as_str(),
            self.device_type.as_str(),
            self.version.as_str(),
        ]
        .join(".")
    }

    /// Per-read timeout, falling back to `default` when unset or zero.
    pub fn read_timeout(&self, default: Duration) -> Duration {
        match self.timeout {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => default,
        }
    }

    /// Outer deadline for the whole request.
    pub fn request_deadline(&self, default: Duration) -> Duration {
        match self.deadline {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => self.read_timeout(default),
        }
    }

    /// Log prefix; empty until the dispatcher fills it.
    pub fn prefix(&self) -> &str {
        self.log_prefix.as_deref().unwrap_or("")
    }
}

impl fmt::Debug for CliRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CliRequest")
            .field("identity", &self.identity())
            .field("device", &self.device)
            .field("address", &self.address)
            .field("protocol", &self.protocol)
            .field("mode", &self.mode)
            .field("auth", &self.auth)
            .field("commands", &self.commands)
            .field("format", &self.format)
            .field("timeout", &self.timeout)
            .field("deadline", &self.deadline)
            .field("session", &self.session)
            .finish()
    }
}

/// Outcome of a [`CliRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CliResponse {
    #[serde(rename = "Retcode")]
    #[schemars(with = "i32")]
    pub retcode: RetCode,

    #[serde(rename = "Message")]
    pub message: String,

    #[serde(rename = "Device")]
    pub device: String,

    /// Output per command. Repeated commands keep only the last output.
    #[serde(rename = "CmdsStd")]
    pub cmds_std: Option<HashMap<String, String>>,
}

impl CliResponse {
    pub fn ok(device: impl Into<String>, cmds_std: HashMap<String, String>) -> Self {
        Self {
            retcode: RetCode::Ok,
            message: "OK".to_string(),
            device: device.into(),
            cmds_std: Some(cmds_std),
        }
    }

    /// Failure response; never carries partial output.
    pub fn failure(retcode: RetCode, device: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            retcode,
            message: message.into(),
            device: device.into(),
            cmds_std: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.retcode == RetCode::Ok
    }
}
