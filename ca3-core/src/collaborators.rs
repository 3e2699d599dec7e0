//! The minimal collaborator interfaces the CA3 core consumes: the ledger
//! façade and the peer transport. The key store is defined alongside the
//! signature engine in `crate::signature`, since that's its only consumer.

use std::time::Duration;

use crate::error::Result;
use crate::packet::GeneralPacket;
use crate::types::{Block, Oid, RosterEntry};

/// Façade over the persistent blockchain/pool storage engine — out of
/// scope here, modeled purely as the boundary the protocol calls through.
pub trait LedgerFacade: Send + Sync {
    /// Persists `block` locally. `remove_from_pool` asks the façade to
    /// drop the block's transactions from the pending pool. `trip_id` is
    /// passed through for the façade's own bookkeeping/logging.
    fn add_block(&self, block: &Block, remove_from_pool: bool, trip_id: &str) -> Result<()>;

    /// The most recently stored block for `tenant`, or `None` if the chain
    /// is empty (the next block to create would be genesis).
    fn get_last_block(&self, tenant: &str) -> Result<Option<Block>>;
}

/// Façade over the inter-node transport. `unary` performs one
/// request/response round trip against `target`, bounded by `timeout`.
/// `broadcast` is built on top of `unary` by `crate::dispatch`, not
/// reimplemented per transport, since the aggregation rule (collect every
/// result, never abort early) is protocol-level, not transport-level.
pub trait PeerTransport: Send + Sync {
    fn unary(
        &self,
        target: &RosterEntry,
        packet: GeneralPacket,
        timeout: Duration,
    ) -> Result<GeneralPacket>;

    /// Purges any cached connection to `target`, forcing the next `unary`
    /// call to establish a fresh one: on retry, the cached entry is
    /// purged first.
    fn purge(&self, target: &RosterEntry);
}

/// Convenience alias used throughout the protocol layer.
pub type TenantId = Oid;
