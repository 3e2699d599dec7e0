//! Builds a candidate block from a previous block and a transaction list,
//! and computes its content hash.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{Error, ErrorKind, Result};
use crate::types::{Block, BlockType, Oid, Tx};

/// Canonical hashing view of a block: `id` and `hash` are absent, and
/// `signedby`/`signcounter` are reset to their pre-signature state
/// (`signedby={}`, `signcounter=max_sign_nodes`).
#[derive(Serialize)]
struct HashView<'a> {
    version: u32,
    tenant: &'a str,
    height: u64,
    size: usize,
    #[serde(rename = "type")]
    block_type: BlockType,
    settime: &'a str,
    timestamp: &'a str,
    prev_hash: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: &'a Option<Vec<Tx>>,
    signedby: &'a BTreeMap<String, String>,
    signcounter: u32,
}

/// Serializes the canonical, order-independent view of `block`'s content
/// that both hashing and signing operate over: `id`/`hash` absent,
/// `signedby` reset to empty, `signcounter` restored to `max_sign_nodes`.
/// This is what both `compute_hash` and `crate::signature::sign` commit to,
/// so tampering with the *stored* `hash` field alone (without touching the
/// block's content) is caught by a hash mismatch rather than a spurious
/// signature failure.
pub fn canonical_bytes(block: &Block, max_sign_nodes: u32) -> Vec<u8> {
    let empty = BTreeMap::new();
    let view = HashView {
        version: block.version,
        tenant: &block.tenant,
        height: block.height,
        size: block.size,
        block_type: block.block_type,
        settime: &block.settime,
        timestamp: &block.timestamp,
        prev_hash: &block.prev_hash,
        data: &block.data,
        signedby: &empty,
        signcounter: max_sign_nodes,
    };
    serde_json::to_vec(&view).expect("HashView serialization cannot fail")
}

/// Computes `SHA-256(canonical(block - {id, hash}))` with `signedby`
/// peeled back to empty and `signcounter` restored to `max_sign_nodes`.
pub fn compute_hash(block: &Block, max_sign_nodes: u32) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(&canonical_bytes(block, max_sign_nodes));
    hex::encode(digest)
}

/// Builds a candidate block, per block-type arm.
///
/// `settime`/`timestamp` are supplied by the caller rather than read from
/// the system clock here, so assembly stays a pure function the way the
/// rest of this module is tested.
pub fn pack(
    prev: Option<&Block>,
    txs: Vec<Tx>,
    block_type: BlockType,
    tenant: Oid,
    max_sign_nodes: u32,
    settime: String,
    timestamp: String,
) -> Result<Block> {
    let (height, prev_hash, size, data) = match block_type {
        BlockType::Genesis => (0u64, "0".to_string(), 0usize, None),
        BlockType::Data => {
            let prev = prev.ok_or_else(|| {
                Error::from(ErrorKind::CreateBlock("data block requires prev".into()))
            })?;
            (prev.height + 1, prev.hash.clone(), txs.len(), Some(txs))
        }
        BlockType::ParcelOpen => {
            let prev = prev.ok_or_else(|| {
                Error::from(ErrorKind::CreateBlock("parcel_open block requires prev".into()))
            })?;
            (prev.height + 1, prev.hash.clone(), 1, Some(txs))
        }
        BlockType::ParcelClose => {
            let prev = prev.ok_or_else(|| {
                Error::from(ErrorKind::CreateBlock("parcel_close block requires prev".into()))
            })?;
            (prev.height + 1, prev.hash.clone(), 0usize, None)
        }
    };

    let mut block = Block {
        id: String::new(),
        version: 2,
        tenant,
        height,
        size,
        block_type,
        settime,
        timestamp,
        prev_hash,
        data,
        signedby: BTreeMap::new(),
        signcounter: max_sign_nodes,
        hash: String::new(),
    };

    block.hash = compute_hash(&block, max_sign_nodes);
    block.id = crate::types::new_oid();
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TxType;

    fn make_tx(id: &str) -> Tx {
        Tx {
            id: id.to_string(),
            tx_type: TxType::New,
            tenant: "tenant-a".to_string(),
            settime: "2026-01-01T00:00:00Z".to_string(),
            delivered: false,
            prev_id: None,
            data: serde_json::json!({"k": "v"}),
        }
    }

    #[test]
    fn genesis_block_has_no_data_and_height_zero() {
        let block = pack(
            None,
            vec![],
            BlockType::Genesis,
            "tenant-a".to_string(),
            3,
            "t".to_string(),
            "0".to_string(),
        )
        .unwrap();
        assert_eq!(block.height, 0);
        assert_eq!(block.prev_hash, "0");
        assert_eq!(block.size, 0);
        assert!(block.data.is_none());
        assert_eq!(block.signcounter, 3);
        assert!(block.signature_budget_holds(3));
    }

    #[test]
    fn data_block_requires_prev() {
        let err = pack(
            None,
            vec![make_tx("a")],
            BlockType::Data,
            "tenant-a".to_string(),
            2,
            "t".to_string(),
            "0".to_string(),
        )
        .unwrap_err();
        match err.kind() {
            ErrorKind::CreateBlock(_) => {}
            other => panic!("expected CreateBlock error, got {:?}", other),
        }
    }

    #[test]
    fn data_block_chains_from_prev() {
        let genesis = pack(
            None,
            vec![],
            BlockType::Genesis,
            "tenant-a".to_string(),
            2,
            "t".to_string(),
            "0".to_string(),
        )
        .unwrap();
        let data = pack(
            Some(&genesis),
            vec![make_tx("a"), make_tx("b")],
            BlockType::Data,
            "tenant-a".to_string(),
            2,
            "t".to_string(),
            "1".to_string(),
        )
        .unwrap();
        assert_eq!(data.height, 1);
        assert_eq!(data.prev_hash, genesis.hash);
        assert_eq!(data.size, 2);
    }

    #[test]
    fn hash_is_stable_under_recomputation() {
        let block = pack(
            None,
            vec![],
            BlockType::Genesis,
            "tenant-a".to_string(),
            1,
            "t".to_string(),
            "0".to_string(),
        )
        .unwrap();
        assert_eq!(compute_hash(&block, 1), block.hash);
    }

    #[test]
    fn distinct_blocks_get_distinct_ids() {
        let a = pack(None, vec![], BlockType::Genesis, "t".into(), 1, "t".into(), "0".into())
            .unwrap();
        let b = pack(None, vec![], BlockType::Genesis, "t".into(), 1, "t".into(), "0".into())
            .unwrap();
        assert_ne!(a.id, b.id);
    }
}
