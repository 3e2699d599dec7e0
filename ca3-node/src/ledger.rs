//! Minimal in-process ledger façade: blocks are kept in memory only, per
//! tenant, in append order. No real persistence — the embedding of a
//! production storage engine is out of scope.

use std::collections::HashMap;

use ca3_core::error::Result;
use ca3_core::types::Block;
use ca3_core::LedgerFacade;
use log::info;
use parking_lot::Mutex;

#[derive(Default)]
pub struct InMemoryLedger {
    by_tenant: Mutex<HashMap<String, Vec<Block>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerFacade for InMemoryLedger {
    fn add_block(&self, block: &Block, _remove_from_pool: bool, trip_id: &str) -> Result<()> {
        info!(target: "ca3", "storing block {} (height {}) for trip {}", block.id, block.height, trip_id);
        self.by_tenant
            .lock()
            .entry(block.tenant.clone())
            .or_insert_with(Vec::new)
            .push(block.clone());
        Ok(())
    }

    fn get_last_block(&self, tenant: &str) -> Result<Option<Block>> {
        Ok(self.by_tenant.lock().get(tenant).and_then(|v| v.last().cloned()))
    }
}
