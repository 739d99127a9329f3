use serde::de::{self, DeserializeOwned, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;
pub const CURRENT_PROTOCOL_VERSION: u16 = 1;
pub const HUB_SENDER_ID: &str = "pcc-hub";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolVersion(pub u16);

impl ProtocolVersion {
    pub const CURRENT: Self = Self(CURRENT_PROTOCOL_VERSION);
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl Serialize for ProtocolVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for ProtocolVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ProtocolVersionVisitor;

        impl<'de> Visitor<'de> for ProtocolVersionVisitor {
            type Value = ProtocolVersion;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a protocol version as string or integer")
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let version = u16::try_from(value)
                    .map_err(|_| E::custom(format!("protocol version out of range: {value}")))?;
                Ok(ProtocolVersion(version))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if value < 0 {
                    return Err(E::custom(format!(
                        "protocol version cannot be negative: {value}"
                    )));
                }
                self.visit_u64(value as u64)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let cleaned = value.trim().trim_start_matches('v');
                let version = cleaned.parse::<u16>().map_err(|err| {
                    E::custom(format!("invalid protocol version '{value}': {err}"))
                })?;
                Ok(ProtocolVersion(version))
            }
        }

        deserializer.deserialize_any(ProtocolVersionVisitor)
    }
}

/// One of the two long-running services the console manages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ProcessId {
    Tracker,
    Notifier,
}

impl ProcessId {
    pub const ALL: [ProcessId; 2] = [ProcessId::Tracker, ProcessId::Notifier];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessId::Tracker => "tracker",
            ProcessId::Notifier => "notifier",
        }
    }

    /// Prefix stamped on every log line the process produces.
    pub fn log_prefix(&self) -> &'static str {
        match self {
            ProcessId::Tracker => "[TRACKER]",
            ProcessId::Notifier => "[BARK]",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProcessId::Tracker => "tracking script",
            ProcessId::Notifier => "bark server",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            ProcessId::Tracker => 0,
            ProcessId::Notifier => 1,
        }
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessId {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "tracker" | "script" => Ok(ProcessId::Tracker),
            "notifier" | "bark" => Ok(ProcessId::Notifier),
            other => Err(format!("Unknown process: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireEnvelope {
    #[serde(default)]
    pub version: ProtocolVersion,
    pub sender_id: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub msg: WireMsg,
}

impl WireEnvelope {
    pub fn new(sender_id: impl Into<String>, msg: WireMsg) -> Self {
        Self {
            version: ProtocolVersion::CURRENT,
            sender_id: sender_id.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            request_id: None,
            msg,
        }
    }

    pub fn from_hub(msg: WireMsg) -> Self {
        Self::new(HUB_SENDER_ID, msg)
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.sender_id.is_empty() || self.timestamp.is_empty() {
            return Err("missing_required_fields");
        }
        if self.version.0 > CURRENT_PROTOCOL_VERSION {
            return Err("unsupported_version");
        }
        if chrono::DateTime::parse_from_rfc3339(&self.timestamp).is_err() {
            return Err("invalid_timestamp");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum WireMsg {
    Hello(HelloPayload),
    Command(CommandPayload),
    RequestSnapshot(SnapshotRequestPayload),
    Status(StatusPayload),
    LogIncremental(LogPayload),
    LogFull(LogPayload),
    Error(ErrorPayload),
}

impl WireMsg {
    pub fn kind(&self) -> &'static str {
        match self {
            WireMsg::Hello(_) => "hello",
            WireMsg::Command(_) => "command",
            WireMsg::RequestSnapshot(_) => "request_snapshot",
            WireMsg::Status(_) => "status",
            WireMsg::LogIncremental(_) => "log_incremental",
            WireMsg::LogFull(_) => "log_full",
            WireMsg::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelloPayload {
    pub client_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessCommand {
    Start,
    Stop,
}

impl ProcessCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessCommand::Start => "start",
            ProcessCommand::Stop => "stop",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandPayload {
    pub command: ProcessCommand,
    pub process: ProcessId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotRequestPayload {}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusPayload {
    pub process: ProcessId,
    pub running: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogPayload {
    pub process: ProcessId,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

pub fn encode_frame<T: Serialize>(value: &T, max_frame_bytes: usize) -> Result<String, FrameError> {
    let encoded = serde_json::to_string(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    Ok(encoded)
}

pub fn decode_frame<T: DeserializeOwned>(
    bytes: &[u8],
    max_frame_bytes: usize,
) -> Result<T, FrameError> {
    if bytes.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: bytes.len(),
            max: max_frame_bytes,
        });
    }
    serde_json::from_slice(bytes).map_err(|err| FrameError::Decode(err.to_string()))
}
