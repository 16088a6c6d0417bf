use phf::phf_map;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::types::ClientInfo;

/// SRS data-plane message types, carried as a number in the `MsgType` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Update,
    Ping,
    Sync,
    RadioUpdate,
    ServerSettings,
    ClientDisconnect,
    VersionMismatch,
    ExternalAwacsModePassword,
    ExternalAwacsModeDisconnect,
    /// A type this client does not recognize; logged and ignored.
    Unknown(i32),
}

pub static MESSAGE_TYPE_PARSE: phf::Map<&'static str, MsgType> = phf_map! {
    "0" => MsgType::Update,
    "1" => MsgType::Ping,
    "2" => MsgType::Sync,
    "3" => MsgType::RadioUpdate,
    "4" => MsgType::ServerSettings,
    "5" => MsgType::ClientDisconnect,
    "6" => MsgType::VersionMismatch,
    "7" => MsgType::ExternalAwacsModePassword,
    "8" => MsgType::ExternalAwacsModeDisconnect,
};

impl MsgType {
    pub fn to_i32(self) -> i32 {
        match self {
            MsgType::Update => 0,
            MsgType::Ping => 1,
            MsgType::Sync => 2,
            MsgType::RadioUpdate => 3,
            MsgType::ServerSettings => 4,
            MsgType::ClientDisconnect => 5,
            MsgType::VersionMismatch => 6,
            MsgType::ExternalAwacsModePassword => 7,
            MsgType::ExternalAwacsModeDisconnect => 8,
            MsgType::Unknown(value) => value,
        }
    }
}

impl Serialize for MsgType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.to_i32())
    }
}

impl<'de> Deserialize<'de> for MsgType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = i32::deserialize(deserializer)?;
        Ok(MESSAGE_TYPE_PARSE
            .get(value.to_string().as_str())
            .copied()
            .unwrap_or(MsgType::Unknown(value)))
    }
}

/// One newline-delimited JSON message on the TCP data connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "Version", default)]
    pub version: String,
    #[serde(rename = "MsgType")]
    pub msg_type: MsgType,
    #[serde(rename = "Client", default, skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientInfo>,
    #[serde(rename = "Clients", default, skip_serializing_if = "Option::is_none")]
    pub clients: Option<Vec<ClientInfo>>,
    #[serde(
        rename = "ExternalAWACSModePassword",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub external_awacs_mode_password: Option<String>,
}

impl Message {
    pub fn new(version: impl Into<String>, msg_type: MsgType) -> Self {
        Self {
            version: version.into(),
            msg_type,
            client: None,
            clients: None,
            external_awacs_mode_password: None,
        }
    }
}
