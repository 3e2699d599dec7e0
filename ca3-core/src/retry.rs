//! Drives repeated block-creation attempts against an expanding deadline
//! until the block is stored or the node gives up.

use uuid::Uuid;

use log::{info, warn};

use crate::clock::Clock;
use crate::error::{Error, ErrorKind, Result};
use crate::protocol::{proceed_creator, ProtocolContext};
use crate::types::{Block, BlockType, Oid, Tx};

/// A single attempt's lifetime expands by this factor after each timeout,
/// capped at `max_life_time_ms`.
const LIFETIME_GROWTH_FACTOR: f64 = 1.5;

/// Runs the CA3 round for a fresh block, retrying with an expanding
/// deadline until the block reaches `stored` state, the trip is reported
/// `AlreadyStarted` by a peer (in which case the caller should treat this
/// as a no-op, not a failure), or two consecutive attempts time out at
/// the lifetime ceiling.
pub fn create_block(
    ctx: &ProtocolContext,
    block_type: BlockType,
    tenant: Oid,
    txs: Vec<Tx>,
    min_life_time_ms: u64,
    max_life_time_ms: u64,
) -> Result<Block> {
    let mut life_time_ms = min_life_time_ms.max(1);
    let mut ceiling_timeouts = 0u32;

    let first_now_ms = ctx.clock.now_ms();
    let trip_id = ctx.registry.allocate(
        None,
        block_type,
        tenant.clone(),
        tx_ids_for(&txs),
        first_now_ms + life_time_ms,
        first_now_ms,
    );

    loop {
        let result = proceed_creator(ctx, trip_id, block_type, tenant.clone(), txs.clone());

        match result {
            Ok(()) => {
                let record = ctx
                    .registry
                    .get(trip_id)
                    .ok_or_else(|| Error::from(ErrorKind::Timeout(trip_id.to_string())))?;
                ctx.registry.release(trip_id);
                return record
                    .block
                    .ok_or_else(|| Error::from(ErrorKind::CreateBlock("stored trip carries no block".into())));
            }
            Err(e) => {
                if let ErrorKind::AlreadyStarted = e.kind() {
                    ctx.registry.release(trip_id);
                    info!(target: "ca3::protocol", "block creation for {} already underway elsewhere", tenant);
                    return Err(e);
                }

                let at_ceiling = life_time_ms >= max_life_time_ms;
                if at_ceiling {
                    ceiling_timeouts += 1;
                    if ceiling_timeouts >= 2 {
                        ctx.registry.release(trip_id);
                        warn!(target: "ca3::protocol", "giving up on block creation for {} after repeated timeouts at the lifetime ceiling", tenant);
                        return Err(Error::from(ErrorKind::CreateBlock("unknown reason".into())));
                    }
                } else {
                    ceiling_timeouts = 0;
                }

                life_time_ms = ((life_time_ms as f64) * LIFETIME_GROWTH_FACTOR) as u64;
                life_time_ms = life_time_ms.min(max_life_time_ms).max(min_life_time_ms);
                warn!(target: "ca3::protocol", "attempt for {} failed ({}), retrying with life_time={}ms", tenant, e, life_time_ms);

                let now_ms = ctx.clock.now_ms();
                ctx.registry
                    .restart(trip_id, block_type, tenant.clone(), tx_ids_for(&txs), now_ms + life_time_ms, now_ms);
            }
        }
    }
}

fn tx_ids_for(txs: &[Tx]) -> Vec<Oid> {
    txs.iter().map(|t| t.id.clone()).collect()
}

/// Explicitly abandons a trip before it would otherwise time out.
pub fn stop_creator(ctx: &ProtocolContext, trip_id: Uuid) {
    ctx.registry.release(trip_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::collaborators::{LedgerFacade, PeerTransport};
    use crate::packet::GeneralPacket;
    use crate::registry::TripRegistry;
    use crate::roster::Roster;
    use crate::signature::KeyStore;
    use crate::types::RosterEntry;
    use std::sync::Arc;
    use std::time::Duration;

    struct NullLedger;
    impl LedgerFacade for NullLedger {
        fn add_block(&self, _block: &Block, _remove_from_pool: bool, _trip_id: &str) -> Result<()> {
            Ok(())
        }
        fn get_last_block(&self, _tenant: &str) -> Result<Option<Block>> {
            Ok(None)
        }
    }

    struct NullKeyStore;
    impl KeyStore for NullKeyStore {
        fn sign(&self, _payload: &[u8]) -> Result<String> {
            Ok("00".to_string())
        }
        fn verify(&self, _payload: &[u8], _sig_hex: &str, _peer_name: &str) -> Result<bool> {
            Ok(true)
        }
    }

    struct NullTransport;
    impl PeerTransport for NullTransport {
        fn unary(
            &self,
            _target: &RosterEntry,
            _packet: GeneralPacket,
            _timeout: Duration,
        ) -> Result<GeneralPacket> {
            Err(Error::from(ErrorKind::PeerUnreachable("none".into())))
        }
        fn purge(&self, _target: &RosterEntry) {}
    }

    fn single_node_ctx() -> ProtocolContext {
        let roster = Roster::new("a".to_string(), 100, vec![RosterEntry {
            nodename: "a".to_string(),
            host: "127.0.0.1".to_string(),
            rpc_port: 9000,
            allow_outgoing: true,
            abnormal_count: 0,
        }]);
        ProtocolContext::new(
            "a".to_string(),
            1,
            1,
            true,
            Arc::new(TripRegistry::new()),
            Arc::new(roster),
            Arc::new(NullKeyStore),
            Arc::new(NullLedger),
            Arc::new(NullTransport),
            Arc::new(FakeClock::new(0)),
        )
    }

    #[test]
    fn single_node_network_stores_immediately() {
        let ctx = single_node_ctx();
        let block = create_block(&ctx, BlockType::Genesis, "tenant".into(), vec![], 1000, 4000).unwrap();
        assert_eq!(block.height, 0);
        assert!(block.signature_budget_holds(1));
    }
}
