//! The CA3 round itself: the initiator path, the relay path, and
//! duplicate suppression for in-flight block-creation attempts.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::assembler;
use crate::clock::Clock;
use crate::collaborators::LedgerFacade;
use crate::collaborators::PeerTransport;
use crate::dispatch::{self, DispatchOutcome, RngSource, ThreadRng};
use crate::error::{Error, ErrorKind, Result};
use crate::packet::{GeneralPacket, RequestTag};
use crate::registry::TripRegistry;
use crate::roster::Roster;
use crate::signature::{self, KeyStore};
use crate::types::{Block, BlockType, Oid, TravelingBlock, TravelingId, Tx};

/// Everything the protocol layer needs: the collaborators it talks
/// through and the per-node configuration it was wired up with.
pub struct ProtocolContext {
    pub self_nodename: String,
    pub min_sign_nodes: u32,
    pub max_sign_nodes: u32,
    pub strict_empty_tx_conflict: bool,
    pub registry: Arc<TripRegistry>,
    pub roster: Arc<Roster>,
    pub key_store: Arc<dyn KeyStore>,
    pub ledger: Arc<dyn LedgerFacade>,
    pub transport: Arc<dyn PeerTransport>,
    pub clock: Arc<dyn Clock>,
    /// Process-wide serialization around the terminal store step, so two
    /// trips never race each other into the ledger.
    pub add_block_lock: Mutex<()>,
    pub rng: Mutex<Box<dyn RngSource + Send>>,
}

impl ProtocolContext {
    pub fn new(
        self_nodename: String,
        min_sign_nodes: u32,
        max_sign_nodes: u32,
        strict_empty_tx_conflict: bool,
        registry: Arc<TripRegistry>,
        roster: Arc<Roster>,
        key_store: Arc<dyn KeyStore>,
        ledger: Arc<dyn LedgerFacade>,
        transport: Arc<dyn PeerTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        ProtocolContext {
            self_nodename,
            min_sign_nodes,
            max_sign_nodes,
            strict_empty_tx_conflict,
            registry,
            roster,
            key_store,
            ledger,
            transport,
            clock,
            add_block_lock: Mutex::new(()),
            rng: Mutex::new(Box::new(ThreadRng)),
        }
    }

    fn deadline_remaining(&self, deadline_ms: u64) -> Duration {
        let now = self.clock.now_ms();
        Duration::from_millis(deadline_ms.saturating_sub(now))
    }
}

/// Terminal sentinel returned by the relay chain: negative is a partial
/// broadcast failure count, 1000+ is a verify failure, 2000+ a downstream
/// sign failure, 3000+ a dispatch exhaustion.
pub type Sentinel = i64;

/// ---------------------------------------------------------------------
/// Initiator path
/// ---------------------------------------------------------------------

/// Runs one attempt of the CA3 round for `trip_id`, which must already be
/// registered by the caller. On success the trip's registry record has
/// `stored=true`; on failure the record has been advanced to `Arrived`
/// and the returned error carries the reason.
pub fn proceed_creator(
    ctx: &ProtocolContext,
    trip_id: Uuid,
    block_type: BlockType,
    tenant: Oid,
    txs: Vec<Tx>,
) -> Result<()> {
    declare_creation(ctx, trip_id)?;

    let record = ctx
        .registry
        .get(trip_id)
        .ok_or_else(|| Error::from(ErrorKind::Timeout(trip_id.to_string())))?;
    let deadline_ms = record.deadline_ms;

    let prev = ctx
        .ledger
        .get_last_block(&tenant)
        .map_err(|_| Error::from(ErrorKind::CollaboratorDown("ledger".into())))?;

    let now_ms = ctx.clock.now_ms();
    let block = match assembler::pack(
        prev.as_ref(),
        txs,
        block_type,
        tenant,
        ctx.max_sign_nodes,
        now_ms.to_string(),
        now_ms.to_string(),
    ) {
        Ok(b) => b,
        Err(e) => {
            let _ = ctx
                .registry
                .advance(trip_id, crate::types::TripState::Arrived);
            return Err(e);
        }
    };

    ctx.registry.set_block(trip_id, block.clone());
    ctx.registry
        .advance(trip_id, crate::types::TripState::Underway)?;

    let mut block = block;
    if let Err(e) = signature::sign(
        &mut block,
        &ctx.self_nodename,
        ctx.key_store.as_ref(),
        ctx.max_sign_nodes,
        now_ms,
        deadline_ms,
        &trip_id.to_string(),
    ) {
        let _ = ctx
            .registry
            .advance(trip_id, crate::types::TripState::Arrived);
        return Err(e);
    }
    ctx.registry.set_block(trip_id, block.clone());

    let sentinel = continue_after_sign(ctx, trip_id, block, deadline_ms)?;
    let _ = ctx
        .registry
        .advance(trip_id, crate::types::TripState::Arrived);

    match ctx.registry.get(trip_id) {
        Some(r) if r.stored => Ok(()),
        _ => Err(sentinel_to_error(trip_id, sentinel)),
    }
}

fn sentinel_to_error(trip_id: Uuid, sentinel: Sentinel) -> Error {
    let detail = match sentinel {
        s if (1000..2000).contains(&s) => format!("verification failed ({})", s),
        s if (2000..3000).contains(&s) => format!("signing failed downstream ({})", s),
        s if (3000..4000).contains(&s) => "insufficient signatures".to_string(),
        _ => "unknown reason".to_string(),
    };
    warn!(target: "ca3::protocol", "trip {} did not reach stored state: {}", trip_id, detail);
    Error::from(ErrorKind::DispatchExhausted)
}

/// Broadcasts `DeclareBlockCreation` to every peer; any negative reply
/// means some peer considers an equivalent trip already underway (both
/// the `-deadline_ms` tx-conflict reply and the `-102` genesis/parcel
/// reply collapse to this one canonical error).
fn declare_creation(ctx: &ProtocolContext, trip_id: Uuid) -> Result<()> {
    let record = ctx
        .registry
        .get(trip_id)
        .ok_or_else(|| Error::from(ErrorKind::Timeout(trip_id.to_string())))?;
    let traveling: TravelingId = (&record).into();
    let deadline = ctx.deadline_remaining(record.deadline_ms);

    let results = dispatch::broadcast(ctx.transport.as_ref(), ctx.roster.as_ref(), deadline, |peer| {
        GeneralPacket::new_request(
            &ctx.self_nodename,
            &peer.nodename,
            RequestTag::DeclareBlockCreation,
            &traveling,
        )
        .map_err(|_| Error::from(ErrorKind::MalformedData))
    });

    for (peer, result) in results {
        match result {
            Ok(reply) => {
                if let Ok(value) = parse_i64_reply(&reply) {
                    if value < 0 {
                        let _ = ctx
                            .registry
                            .advance(trip_id, crate::types::TripState::Arrived);
                        return Err(ErrorKind::AlreadyStarted.into());
                    }
                }
            }
            Err(e) => {
                warn!(target: "ca3::protocol", "declare_creation to {} failed: {}", peer.nodename, e);
            }
        }
    }
    Ok(())
}

fn parse_i64_reply(packet: &GeneralPacket) -> Result<i64> {
    serde_json::from_str::<i64>(&packet.payload.data_as_string)
        .map_err(|_| ErrorKind::MalformedData.into())
}

/// Shared post-sign continuation used by both the initiator (right after
/// its own self-sign) and the relay handler (right after it signs an
/// inbound traveling block): if signatures remain, forward to a random
/// peer; otherwise terminal-store and broadcast.
fn continue_after_sign(
    ctx: &ProtocolContext,
    trip_id: Uuid,
    block: Block,
    deadline_ms: u64,
) -> Result<Sentinel> {
    if block.signcounter > 0 {
        let signed_by: Vec<&String> = block.signedby.keys().collect();
        let candidates: Vec<_> = ctx
            .roster
            .eligible_peers()
            .into_iter()
            .filter(|p| !signed_by.iter().any(|s| s.as_str() == p.nodename))
            .collect();

        let traveling = TravelingBlock {
            trip_id,
            block: block.clone(),
        };
        let timeout = ctx.deadline_remaining(deadline_ms);
        let mut rng = ctx.rng.lock();
        let outcome = dispatch::random_dispatch(
            ctx.transport.as_ref(),
            ctx.roster.as_ref(),
            candidates,
            timeout,
            rng.as_mut(),
            |peer| {
                GeneralPacket::new_request(
                    &ctx.self_nodename,
                    &peer.nodename,
                    RequestTag::SignAndResendOrStore,
                    &traveling,
                )
                .map_err(|_| Error::from(ErrorKind::MalformedData))
            },
        );
        drop(rng);

        match outcome {
            DispatchOutcome::Delivered(reply) => {
                let sentinel = parse_i64_reply(&reply)?;
                return Ok(sentinel);
            }
            DispatchOutcome::Exhausted => {
                if (block.signedby.len() as u32) < ctx.min_sign_nodes {
                    return Ok(3000);
                }
                // fall through to terminal store
            }
        }
    }

    terminal_store(ctx, trip_id, block)
}

fn terminal_store(ctx: &ProtocolContext, trip_id: Uuid, block: Block) -> Result<Sentinel> {
    {
        let _guard = ctx.add_block_lock.lock();
        ctx.ledger
            .add_block(&block, true, &trip_id.to_string())
            .map_err(|_| Error::from(ErrorKind::CollaboratorDown("ledger".into())))?;
    }
    ctx.registry.mark_stored(trip_id);

    let traveling = TravelingBlock {
        trip_id,
        block: block.clone(),
    };
    let timeout = Duration::from_millis(500);
    let results = dispatch::broadcast(ctx.transport.as_ref(), ctx.roster.as_ref(), timeout, |peer| {
        GeneralPacket::new_request(&ctx.self_nodename, &peer.nodename, RequestTag::AddBlockCa3, &traveling)
            .map_err(|_| Error::from(ErrorKind::MalformedData))
    });

    let failcnt = results.iter().filter(|(_, r)| r.is_err()).count() as i64;
    debug!(target: "ca3::protocol", "terminal store for trip {} complete, {} peer failures", trip_id, failcnt);
    Ok(-failcnt)
}

/// ---------------------------------------------------------------------
/// Relay path
/// ---------------------------------------------------------------------

/// Handles an inbound `SignAndResendOrStore` request. Returns the
/// terminal sentinel to reply with.
pub fn request_to_sign_and_resend_or_store(
    ctx: &ProtocolContext,
    traveling: TravelingBlock,
) -> Sentinel {
    let outcome = signature::verify_all(&traveling.block, ctx.max_sign_nodes, ctx.key_store.as_ref());
    if outcome.status != 0 {
        trace!(target: "ca3::protocol", "verify failed for trip {}: {:?}", traveling.trip_id, outcome);
        return 1000 + outcome.status as i64;
    }

    let deadline_ms = ctx
        .registry
        .get(traveling.trip_id)
        .map(|r| r.deadline_ms)
        .unwrap_or_else(|| ctx.clock.now_ms());

    let mut block = traveling.block;
    let now_ms = ctx.clock.now_ms();
    if let Err(e) = signature::sign(
        &mut block,
        &ctx.self_nodename,
        ctx.key_store.as_ref(),
        ctx.max_sign_nodes,
        now_ms,
        deadline_ms,
        &traveling.trip_id.to_string(),
    ) {
        let status = sign_error_status(&e);
        return 2000 + status;
    }
    ctx.registry.set_block(traveling.trip_id, block.clone());

    match continue_after_sign(ctx, traveling.trip_id, block, deadline_ms) {
        Ok(sentinel) => sentinel,
        Err(_) => 3000,
    }
}

fn sign_error_status(e: &Error) -> i64 {
    match e.kind() {
        ErrorKind::Timeout(_) => 1,
        ErrorKind::KeyMissing => 2,
        ErrorKind::SignFailed(_) => 3,
        _ => 9,
    }
}

/// Handles an inbound `DeclareBlockCreation` request: duplicate
/// suppression and retry-deadline refresh.
pub fn request_to_declare_block_creation(ctx: &ProtocolContext, traveling: TravelingId) -> i64 {
    let now_ms = ctx.clock.now_ms();

    if ctx.registry.get(traveling.trip_id).is_some() {
        let new_deadline = traveling.deadline_ms;
        ctx.registry.allocate(
            Some(traveling.trip_id),
            traveling.block_type,
            traveling.tenant,
            traveling.tx_ids,
            new_deadline,
            now_ms,
        );
        return new_deadline as i64;
    }

    if !traveling.tx_ids.is_empty() {
        if let Some(conflicting_deadline) = ctx.registry.find_tx_conflict(&traveling.tx_ids) {
            return -(conflicting_deadline as i64);
        }
    } else if ctx.strict_empty_tx_conflict
        && ctx.registry.has_other_empty_tx_trip(traveling.trip_id)
    {
        return -102;
    }

    ctx.registry.allocate(
        Some(traveling.trip_id),
        traveling.block_type,
        traveling.tenant,
        traveling.tx_ids,
        traveling.deadline_ms,
        now_ms,
    );
    traveling.deadline_ms as i64
}

/// Handles an inbound `AddBlockCa3` request: stores the block locally and
/// marks the corresponding trip stored, if known locally.
pub fn request_to_add_block_ca3(ctx: &ProtocolContext, traveling: TravelingBlock) -> Result<()> {
    {
        let _guard = ctx.add_block_lock.lock();
        ctx.ledger
            .add_block(&traveling.block, true, &traveling.trip_id.to_string())
            .map_err(|_| Error::from(ErrorKind::CollaboratorDown("ledger".into())))?;
    }
    ctx.registry.set_block(traveling.trip_id, traveling.block);
    ctx.registry.mark_stored(traveling.trip_id);
    Ok(())
}
