//! Inter-node wire protocol: `GeneralPacket`, its payload, and the request
//! tags that drive the CA3 protocol and its surrounding housekeeping RPCs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Protocol version. Packets at any other version are rejected by the
/// peer receiver.
pub const WIRE_VERSION: u32 = 4;

/// The legacy "Already started" numeric reply to `DeclareBlockCreation`.
/// Kept as the one place that translates the internal
/// `ErrorKind::AlreadyStarted` into its wire-boundary encoding.
pub const ALREADY_STARTED_CODE: i64 = 1;

/// Request tags. `AddBlock` and `ResetTestNode` are legacy/test-only tags
/// that a CA3 node always answers with failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestTag {
    Ping,
    AddPool,
    AddBlock,
    AddBlockCa3,
    GetPoolHeight,
    GetBlockHeight,
    GetBlockDigest,
    GetBlock,
    ExamineBlockDifference,
    ExaminePoolDifference,
    DeclareBlockCreation,
    SignAndResendOrStore,
    ResetTestNode,
}

/// Whether a packet carries a request or one of two possible reply shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadType {
    Request,
    ResultSuccess,
    ResultFailure,
}

/// The payload carried by a `GeneralPacket`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketPayload {
    pub payload_type: PayloadType,
    pub request: RequestTag,
    pub data_as_string: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub g_error_as_string: Option<String>,
}

impl PacketPayload {
    pub fn request(tag: RequestTag, data: &impl Serialize) -> serde_json::Result<Self> {
        Ok(PacketPayload {
            payload_type: PayloadType::Request,
            request: tag,
            data_as_string: serde_json::to_string(data)?,
            g_error_as_string: None,
        })
    }

    pub fn success(tag: RequestTag, data: &impl Serialize) -> serde_json::Result<Self> {
        Ok(PacketPayload {
            payload_type: PayloadType::ResultSuccess,
            request: tag,
            data_as_string: serde_json::to_string(data)?,
            g_error_as_string: None,
        })
    }

    pub fn failure(tag: RequestTag, error_json: String) -> Self {
        PacketPayload {
            payload_type: PayloadType::ResultFailure,
            request: tag,
            data_as_string: String::new(),
            g_error_as_string: Some(error_json),
        }
    }
}

/// A single bidirectional RPC envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralPacket {
    pub version: u32,
    pub packet_id: Uuid,
    pub sender: String,
    pub receiver: String,
    pub prev_id: Uuid,
    pub payload: PacketPayload,
}

impl GeneralPacket {
    /// Builds a fresh request packet from `sender` to `receiver`.
    pub fn new_request(
        sender: &str,
        receiver: &str,
        tag: RequestTag,
        data: &impl Serialize,
    ) -> serde_json::Result<Self> {
        Ok(GeneralPacket {
            version: WIRE_VERSION,
            packet_id: Uuid::new_v4(),
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            prev_id: Uuid::nil(),
            payload: PacketPayload::request(tag, data)?,
        })
    }

    /// Builds the reply to `self`, with sender/receiver swapped and
    /// `prev_id` pointing back at the request's `packet_id`.
    pub fn reply(&self, payload: PacketPayload) -> GeneralPacket {
        GeneralPacket {
            version: WIRE_VERSION,
            packet_id: Uuid::new_v4(),
            sender: self.receiver.clone(),
            receiver: self.sender.clone(),
            prev_id: self.packet_id,
            payload,
        }
    }

    /// The empty-`packet_id` terminator used when an unknown request tag is
    /// received.
    pub fn unknown_request_terminator(receiver: &str, sender: &str) -> GeneralPacket {
        GeneralPacket {
            version: WIRE_VERSION,
            packet_id: Uuid::nil(),
            sender: receiver.to_string(),
            receiver: sender.to_string(),
            prev_id: Uuid::nil(),
            payload: PacketPayload {
                payload_type: PayloadType::ResultFailure,
                request: RequestTag::Ping,
                data_as_string: String::new(),
                g_error_as_string: Some("\"unknown request\"".to_string()),
            },
        }
    }
}
