use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Interaction request types on the bot channel.
pub const INTERACTION_PING: u8 = 1;
pub const INTERACTION_COMMAND: u8 = 2;

/// Interaction ack types returned on the synchronous path.
pub const ACK_PONG: u8 = 1;
pub const ACK_DEFERRED: u8 = 5;

/// Inbound interaction body as posted by the bot platform. Unknown fields
/// are tolerated; the platform adds fields without notice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub data: Option<InteractionData>,
    #[serde(default)]
    pub member: Option<Value>,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionData {
    pub name: String,
}

/// Synchronous reply to an interaction: pong or deferred.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InteractionAck {
    #[serde(rename = "type")]
    pub kind: u8,
}

/// Asynchronous follow-up posted to the per-token webhook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FollowupMessage {
    pub content: String,
    pub embeds: Vec<Value>,
    pub tts: bool,
    pub allowed_mentions: Vec<Value>,
}

/// Recognized slash commands plus a catch-all, matched exhaustively.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Status,
    Start,
    Stop,
    Unknown,
}

/// Target instance count for the workload. The workload runs at most one
/// live instance, so the only valid targets are 0 and 1.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DesiredCount {
    Stopped,
    Running,
}

impl DesiredCount {
    pub fn as_u32(self) -> u32 {
        match self {
            DesiredCount::Stopped => 0,
            DesiredCount::Running => 1,
        }
    }
}

/// Observed run state, recomputed on every query and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerState {
    pub running: bool,
    #[serde(default)]
    pub public_address: Option<String>,
}

impl ServerState {
    pub fn offline() -> Self {
        Self {
            running: false,
            public_address: None,
        }
    }

    pub fn online(address: String) -> Self {
        Self {
            running: true,
            public_address: Some(address),
        }
    }
}

/// Credential bundle served by the secret store, fetched once per process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub signing_public_key: String,
    pub control_shared_secret: String,
    pub bot_auth_token: String,
    pub bot_client_id: String,
}

/// One running task description from the orchestration platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDescription {
    #[serde(default)]
    pub attachments: Vec<TaskAttachment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAttachment {
    #[serde(default)]
    pub details: Vec<AttachmentDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentDetail {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// One network interface description; the public address lives on the
/// association, which is absent while the interface is still private.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    #[serde(default)]
    pub association: Option<InterfaceAssociation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceAssociation {
    #[serde(default)]
    pub public_ip: Option<String>,
}

/// Body of the direct control endpoint's status reply. `ip` is omitted
/// entirely when no instance is running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlStatusBody {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlUpdateBody {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}
