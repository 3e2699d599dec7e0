//! Shared data model: transactions, blocks, trip records, and the static
//! peer roster entry shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque 24-hex-character identifier, used for both transaction and block
/// ids. The spec treats these as opaque strings; we keep the representation
/// a plain `String` rather than a fixed-size byte array so ids coming from
/// peers that happen to use a different alphabet still round-trip.
pub type Oid = String;

/// Generates a fresh 24-hex-character id, unique with overwhelming
/// probability.
pub fn new_oid() -> Oid {
    let hi = Uuid::new_v4();
    let lo = Uuid::new_v4();
    let mut s = String::with_capacity(24);
    for byte in hi.as_bytes().iter().chain(lo.as_bytes().iter()).take(12) {
        s.push_str(&format!("{:02x}", byte));
    }
    s
}

/// Transaction type discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxType {
    New,
    Update,
    Delete,
    Custom,
}

/// A single transaction carried by a block's `data` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tx {
    pub id: Oid,
    #[serde(rename = "type")]
    pub tx_type: TxType,
    pub tenant: Oid,
    pub settime: String,
    pub delivered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_id: Option<Oid>,
    pub data: serde_json::Value,
}

/// Block-type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Genesis,
    Data,
    ParcelOpen,
    ParcelClose,
}

/// A CA3 block. `id` and `hash` are always present once assembled; they are
/// omitted from the canonical hashing view (see `crate::assembler`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: Oid,
    /// CA3 block format version; always 2.
    pub version: u32,
    pub tenant: Oid,
    pub height: u64,
    pub size: usize,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    pub settime: String,
    /// Milliseconds since epoch, carried as a decimal string (wire
    /// compatibility: peers compare this textually, not numerically).
    pub timestamp: String,
    pub prev_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Tx>>,
    /// Peer name -> hex-encoded Ed25519 signature. Insertion order is
    /// irrelevant; never contains the empty string as a key.
    pub signedby: BTreeMap<String, String>,
    /// Remaining signatures this block may still collect.
    pub signcounter: u32,
    pub hash: String,
}

impl Block {
    /// `|signedby| + signcounter == max_sign_nodes` must always hold.
    pub fn signature_budget_holds(&self, max_sign_nodes: u32) -> bool {
        self.signedby.len() as u32 + self.signcounter == max_sign_nodes
    }
}

/// Per-creation-attempt lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TripState {
    Preparation,
    Underway,
    Arrived,
}

/// Per-creation-attempt state record, keyed by `trip_id` in the registry.
/// Never transmitted as a whole; only `TravelingId` crosses the wire.
#[derive(Debug, Clone)]
pub struct TripRecord {
    pub trip_id: Uuid,
    pub state: TripState,
    pub stored: bool,
    pub deadline_ms: u64,
    pub block_type: BlockType,
    pub tenant: Oid,
    pub tx_ids: Vec<Oid>,
    pub block: Option<Block>,
}

impl TripRecord {
    pub fn new(
        trip_id: Uuid,
        block_type: BlockType,
        tenant: Oid,
        tx_ids: Vec<Oid>,
        deadline_ms: u64,
    ) -> Self {
        TripRecord {
            trip_id,
            state: TripState::Preparation,
            stored: false,
            deadline_ms,
            block_type,
            tenant,
            tx_ids,
            block: None,
        }
    }
}

/// The flat view of a trip that crosses the wire with `DeclareBlockCreation`
/// and as the identifying header of `SignAndResendOrStore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TravelingId {
    pub trip_id: Uuid,
    pub state: TripState,
    pub stored: bool,
    pub deadline_ms: u64,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    pub tenant: Oid,
    #[serde(default)]
    pub tx_ids: Vec<Oid>,
}

impl From<&TripRecord> for TravelingId {
    fn from(t: &TripRecord) -> Self {
        TravelingId {
            trip_id: t.trip_id,
            state: t.state,
            stored: t.stored,
            deadline_ms: t.deadline_ms,
            block_type: t.block_type,
            tenant: t.tenant.clone(),
            tx_ids: t.tx_ids.clone(),
        }
    }
}

/// The `{trip_id, block}` pair forwarded during signature collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TravelingBlock {
    pub trip_id: Uuid,
    pub block: Block,
}

/// A statically configured peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterEntry {
    pub nodename: String,
    pub host: String,
    pub rpc_port: u16,
    pub allow_outgoing: bool,
    pub abnormal_count: u32,
}

impl RosterEntry {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.rpc_port)
    }
}
