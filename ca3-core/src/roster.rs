//! The static peer list and its outbound-eligibility bookkeeping.

use parking_lot::RwLock;

use crate::types::RosterEntry;

/// The static peer roster. `abnormal_count` mutation and the
/// `allow_outgoing` flip are both idempotent last-writer-wins operations,
/// so a single `RwLock` over the whole list is sufficient.
pub struct Roster {
    self_nodename: String,
    abnormal_count_for_judging: u32,
    entries: RwLock<Vec<RosterEntry>>,
}

impl Roster {
    pub fn new(self_nodename: String, abnormal_count_for_judging: u32, entries: Vec<RosterEntry>) -> Self {
        Roster {
            self_nodename,
            abnormal_count_for_judging,
            entries: RwLock::new(entries),
        }
    }

    pub fn self_nodename(&self) -> &str {
        &self.self_nodename
    }

    /// Snapshot of every entry eligible for outbound selection: allowed,
    /// below the abnormal-count threshold, and not self.
    pub fn eligible_peers(&self) -> Vec<RosterEntry> {
        let guard = self.entries.read();
        guard
            .iter()
            .filter(|e| self.is_eligible(e))
            .cloned()
            .collect()
    }

    /// Every configured peer other than self, eligible or not — used by
    /// `broadcast`, which aggregates results from all allowed peers rather
    /// than filtering by abnormal count: broadcast targets every
    /// `allow_outgoing=true` peer, independent of the random-dispatch
    /// eligibility gate.
    pub fn outgoing_peers(&self) -> Vec<RosterEntry> {
        let guard = self.entries.read();
        guard
            .iter()
            .filter(|e| e.nodename != self.self_nodename && e.allow_outgoing)
            .cloned()
            .collect()
    }

    fn is_eligible(&self, e: &RosterEntry) -> bool {
        e.nodename != self.self_nodename
            && e.allow_outgoing
            && e.abnormal_count < self.abnormal_count_for_judging
    }

    /// Records an outbound failure against `nodename`, bumping its
    /// `abnormal_count`. Never reset on success — a known limitation
    /// carried as-is.
    pub fn record_failure(&self, nodename: &str) {
        let mut guard = self.entries.write();
        if let Some(e) = guard.iter_mut().find(|e| e.nodename == nodename) {
            e.abnormal_count += 1;
        }
    }

    /// Flips `allow_outgoing` for `nodename`. Idempotent; takes effect on
    /// the next dispatch.
    pub fn set_allow_outgoing(&self, nodename: &str, allow: bool) {
        let mut guard = self.entries.write();
        if let Some(e) = guard.iter_mut().find(|e| e.nodename == nodename) {
            e.allow_outgoing = allow;
        }
    }

    pub fn get(&self, nodename: &str) -> Option<RosterEntry> {
        self.entries
            .read()
            .iter()
            .find(|e| e.nodename == nodename)
            .cloned()
    }

    pub fn contains_allowed(&self, nodename: &str) -> bool {
        self.entries
            .read()
            .iter()
            .any(|e| e.nodename == nodename && e.allow_outgoing)
    }
}
