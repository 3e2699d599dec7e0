//! The in-memory trip registry: per-creation-attempt state, keyed by
//! `trip_id`.

use std::collections::HashMap;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{Error, ErrorKind, Result};
use crate::types::{Block, BlockType, Oid, TripRecord, TripState};

/// The in-memory trip registry. Exclusively owned by the node; never
/// transmitted as a whole — only `TravelingId` views cross the wire.
/// Every operation here is a short, non-blocking map mutation, so one
/// coarse lock over the whole map never becomes a bottleneck relative to
/// the RPCs that happen between registry calls.
pub struct TripRegistry {
    trips: Mutex<HashMap<Uuid, TripRecord>>,
}

impl Default for TripRegistry {
    fn default() -> Self {
        TripRegistry {
            trips: Mutex::new(HashMap::new()),
        }
    }
}

impl TripRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sweeps every record whose `deadline_ms` has passed. Runs once per
    /// `allocate` call; records are never resurrected once swept.
    fn sweep(trips: &mut HashMap<Uuid, TripRecord>, now_ms: u64) {
        trips.retain(|_, t| t.deadline_ms >= now_ms);
    }

    /// Creates (if `trip_id` is `None`) or refreshes (if present) a trip
    /// record. Returns the trip's id. Sweeps expired records first.
    pub fn allocate(
        &self,
        trip_id: Option<Uuid>,
        block_type: BlockType,
        tenant: Oid,
        tx_ids: Vec<Oid>,
        deadline_ms: u64,
        now_ms: u64,
    ) -> Uuid {
        let mut trips = self.trips.lock();
        Self::sweep(&mut trips, now_ms);

        match trip_id {
            Some(id) => {
                if let Some(existing) = trips.get_mut(&id) {
                    existing.deadline_ms = deadline_ms;
                } else {
                    trips.insert(
                        id,
                        TripRecord::new(id, block_type, tenant, tx_ids, deadline_ms),
                    );
                }
                id
            }
            None => {
                let id = Uuid::new_v4();
                trips.insert(
                    id,
                    TripRecord::new(id, block_type, tenant, tx_ids, deadline_ms),
                );
                id
            }
        }
    }

    /// Atomically advances `trip_id` to `to_state`, rejecting backward
    /// transitions.
    pub fn advance(&self, trip_id: Uuid, to_state: TripState) -> Result<()> {
        let mut trips = self.trips.lock();
        let record = trips
            .get_mut(&trip_id)
            .ok_or_else(|| Error::from(ErrorKind::Timeout(trip_id.to_string())))?;
        if rank(to_state) < rank(record.state) {
            return Err(ErrorKind::MalformedData.into());
        }
        record.state = to_state;
        Ok(())
    }

    /// Records the assembled candidate block on the trip, without changing
    /// its lifecycle state (the caller drives state transitions explicitly).
    pub fn set_block(&self, trip_id: Uuid, block: Block) {
        let mut trips = self.trips.lock();
        if let Some(record) = trips.get_mut(&trip_id) {
            record.block = Some(block);
        }
    }

    /// Sets `stored=true`. Silent no-op if the record was already swept
    /// (tolerates lost races).
    pub fn mark_stored(&self, trip_id: Uuid) {
        let mut trips = self.trips.lock();
        if let Some(record) = trips.get_mut(&trip_id) {
            record.stored = true;
        }
    }

    /// Returns `Err(Timeout)` if the trip is absent or its deadline has
    /// passed.
    pub fn check_timeout(&self, trip_id: Uuid, now_ms: u64) -> Result<()> {
        let trips = self.trips.lock();
        match trips.get(&trip_id) {
            Some(record) if record.deadline_ms > now_ms => Ok(()),
            _ => Err(ErrorKind::Timeout(trip_id.to_string()).into()),
        }
    }

    pub fn get(&self, trip_id: Uuid) -> Option<TripRecord> {
        self.trips.lock().get(&trip_id).cloned()
    }

    /// Scans every currently known trip for one whose `tx_ids` intersects
    /// `tx_ids` (duplicate suppression). Returns the conflicting
    /// trip's `deadline_ms` if found.
    pub fn find_tx_conflict(&self, tx_ids: &[Oid]) -> Option<u64> {
        let trips = self.trips.lock();
        trips
            .values()
            .find(|t| t.tx_ids.iter().any(|id| tx_ids.contains(id)))
            .map(|t| t.deadline_ms)
    }

    /// Whether any currently known trip has an empty `tx_ids` list (i.e. is
    /// a genesis/parcel trip), excluding `except`. Used by the stricter
    /// default duplicate-suppression behavior for genesis/parcel trips
    /// Gated by `Config::strict_empty_tx_conflict`.
    pub fn has_other_empty_tx_trip(&self, except: Uuid) -> bool {
        let trips = self.trips.lock();
        trips
            .values()
            .any(|t| t.trip_id != except && t.tx_ids.is_empty())
    }

    /// Releases the record for `trip_id`.
    pub fn release(&self, trip_id: Uuid) {
        self.trips.lock().remove(&trip_id);
    }

    /// Unconditionally replaces `trip_id`'s record with a fresh
    /// `Preparation` one, keeping the same id. Used by the retry driver
    /// between attempts: unlike `allocate`'s `Some(trip_id)` branch (a pure
    /// deadline refresh for a trip some peer is still tracking), a retried
    /// attempt starts its own local state machine over from scratch.
    pub fn restart(
        &self,
        trip_id: Uuid,
        block_type: BlockType,
        tenant: Oid,
        tx_ids: Vec<Oid>,
        deadline_ms: u64,
        now_ms: u64,
    ) {
        let mut trips = self.trips.lock();
        Self::sweep(&mut trips, now_ms);
        trips.insert(
            trip_id,
            TripRecord::new(trip_id, block_type, tenant, tx_ids, deadline_ms),
        );
    }
}

fn rank(state: TripState) -> u8 {
    match state {
        TripState::Preparation => 0,
        TripState::Underway => 1,
        TripState::Arrived => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BlockType;

    #[test]
    fn allocate_with_no_id_creates_preparation_record() {
        let registry = TripRegistry::new();
        let id = registry.allocate(None, BlockType::Data, "t".into(), vec![], 1000, 0);
        let record = registry.get(id).unwrap();
        assert_eq!(record.state, TripState::Preparation);
        assert!(!record.stored);
    }

    #[test]
    fn allocate_with_known_id_only_refreshes_deadline() {
        let registry = TripRegistry::new();
        let id = registry.allocate(None, BlockType::Data, "t".into(), vec!["a".into()], 1000, 0);
        registry.advance(id, TripState::Underway).unwrap();
        registry.allocate(Some(id), BlockType::Data, "t".into(), vec![], 5000, 10);
        let record = registry.get(id).unwrap();
        assert_eq!(record.deadline_ms, 5000);
        assert_eq!(record.state, TripState::Underway);
    }

    #[test]
    fn sweep_drops_expired_records_on_next_allocate() {
        let registry = TripRegistry::new();
        let id = registry.allocate(None, BlockType::Data, "t".into(), vec![], 100, 0);
        registry.allocate(None, BlockType::Data, "t".into(), vec![], 2000, 500);
        assert!(registry.get(id).is_none());
    }

    #[test]
    fn backward_transition_rejected() {
        let registry = TripRegistry::new();
        let id = registry.allocate(None, BlockType::Data, "t".into(), vec![], 1000, 0);
        registry.advance(id, TripState::Arrived).unwrap();
        assert!(registry.advance(id, TripState::Preparation).is_err());
    }

    #[test]
    fn mark_stored_after_sweep_is_silent_no_op() {
        let registry = TripRegistry::new();
        let id = registry.allocate(None, BlockType::Data, "t".into(), vec![], 100, 0);
        registry.allocate(None, BlockType::Data, "t".into(), vec![], 2000, 500);
        registry.mark_stored(id);
        assert!(registry.get(id).is_none());
    }

    #[test]
    fn tx_conflict_detection() {
        let registry = TripRegistry::new();
        registry.allocate(None, BlockType::Data, "t".into(), vec!["a".into()], 1000, 0);
        assert!(registry.find_tx_conflict(&["a".into()]).is_some());
        assert!(registry.find_tx_conflict(&["z".into()]).is_none());
    }
}
