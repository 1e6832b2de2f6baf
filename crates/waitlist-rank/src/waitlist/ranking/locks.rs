use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::waitlist::domain::CampaignId;

/// Per-campaign mutual exclusion around compute-then-write sequences.
///
/// Campaigns never share a lock, so events for different campaigns run in parallel.
#[derive(Debug, Default)]
pub struct CampaignLocks {
    locks: Mutex<HashMap<CampaignId, Arc<Mutex<()>>>>,
}

impl CampaignLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, campaign: &CampaignId) -> Arc<Mutex<()>> {
        // The map and the unit mutexes hold no invariants a panic could break.
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(campaign.clone()).or_default().clone()
    }

    /// Run `work` while holding the campaign's lock.
    pub fn with_campaign<T>(&self, campaign: &CampaignId, work: impl FnOnce() -> T) -> T {
        let handle = self.handle(campaign);
        let _guard = handle.lock().unwrap_or_else(PoisonError::into_inner);
        work()
    }

    pub fn tracked_campaigns(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
