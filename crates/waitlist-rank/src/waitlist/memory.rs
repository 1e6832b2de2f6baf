//! Thread-safe in-memory entrant store.
//!
//! Enforces the same constraints a relational backend would: globally unique referral
//! codes, unique `(campaign, email)`, unique `(campaign, position)` among live rows and a
//! per-campaign revision used for optimistic concurrency.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::domain::{CampaignId, Entrant, EntrantId, EntrantStatus, ReferralCode};
use super::filter::EntrantFilter;
use super::repository::{
    CommitReceipt, EntrantRepository, LiveStats, RankingBatch, RepositoryError, UniqueField,
};

#[derive(Debug, Default)]
struct CampaignIndex {
    /// Live rows only, keyed by position.
    ranks: BTreeMap<u32, EntrantId>,
    members: Vec<EntrantId>,
    revision: u64,
}

#[derive(Debug, Default)]
struct Store {
    entrants: HashMap<EntrantId, Entrant>,
    by_code: HashMap<ReferralCode, EntrantId>,
    by_email: HashMap<(CampaignId, String), EntrantId>,
    campaigns: HashMap<CampaignId, CampaignIndex>,
}

impl Store {
    fn campaign(&self, campaign: &CampaignId) -> Option<&CampaignIndex> {
        self.campaigns.get(campaign)
    }

    fn live_entrants(&self, campaign: &CampaignId) -> Vec<Entrant> {
        self.campaign(campaign)
            .map(|index| {
                index
                    .ranks
                    .values()
                    .filter_map(|id| self.entrants.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn entrant_mut(&mut self, id: &EntrantId) -> Result<&mut Entrant, RepositoryError> {
        self.entrants.get_mut(id).ok_or(RepositoryError::NotFound)
    }

    /// Drops a row from the live rank index after it stopped being live.
    fn unrank(&mut self, entrant: &Entrant) {
        if let Some(index) = self.campaigns.get_mut(&entrant.campaign_id) {
            if index.ranks.get(&entrant.position) == Some(&entrant.id) {
                index.ranks.remove(&entrant.position);
            }
            index.revision += 1;
        }
    }

    fn validate(&self, batch: &RankingBatch) -> Result<(), RepositoryError> {
        let index = self.campaign(&batch.campaign_id);
        let revision = index.map(|index| index.revision).unwrap_or_default();
        if let Some(expected) = batch.expected_revision {
            if expected != revision {
                return Err(RepositoryError::Conflict(format!(
                    "campaign {} at revision {revision}, expected {expected}",
                    batch.campaign_id
                )));
            }
        }

        let mut moved = HashSet::new();
        let mut targets = HashSet::new();
        for assignment in &batch.positions {
            let entrant = self.entrants.get(&assignment.entrant_id).ok_or_else(|| {
                RepositoryError::Rejected(format!("unknown entrant {}", assignment.entrant_id))
            })?;
            if entrant.campaign_id != batch.campaign_id || !entrant.is_live() {
                return Err(RepositoryError::Rejected(format!(
                    "entrant {} is not live in campaign {}",
                    entrant.id, batch.campaign_id
                )));
            }
            if assignment.position == 0 {
                return Err(RepositoryError::Rejected("positions are 1-based".to_string()));
            }
            if !moved.insert(assignment.entrant_id) || !targets.insert(assignment.position) {
                return Err(RepositoryError::Duplicate(UniqueField::Position));
            }
        }

        if let Some(index) = index {
            let collides = targets.iter().any(|position| {
                index
                    .ranks
                    .get(position)
                    .is_some_and(|holder| !moved.contains(holder))
            });
            if collides {
                return Err(RepositoryError::Duplicate(UniqueField::Position));
            }
        }

        let mut pending: HashMap<EntrantId, (u32, u32)> = HashMap::new();
        for increment in &batch.counters {
            let entrant = self.entrants.get(&increment.entrant_id).ok_or_else(|| {
                RepositoryError::Rejected(format!("unknown entrant {}", increment.entrant_id))
            })?;
            let (referrals, verified) = pending
                .entry(entrant.id)
                .or_insert((entrant.referral_count, entrant.verified_referral_count));
            *referrals += u32::from(increment.referral);
            *verified += u32::from(increment.verified_referral);
            if *verified > *referrals {
                return Err(RepositoryError::Rejected(format!(
                    "verified referrals would exceed referrals for {}",
                    entrant.id
                )));
            }
        }

        for id in &batch.reward_marks {
            let entrant = self.entrants.get(id).ok_or(RepositoryError::NotFound)?;
            if entrant.reward_applied {
                return Err(RepositoryError::Conflict(format!(
                    "reward for {id} already applied"
                )));
            }
        }

        Ok(())
    }
}

/// In-process repository used by the service binary, the demo and the tests.
#[derive(Debug, Default)]
pub struct InMemoryEntrantRepository {
    store: Mutex<Store>,
}

impl InMemoryEntrantRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Store>, RepositoryError> {
        self.store
            .lock()
            .map_err(|_| RepositoryError::Unavailable("entrant store lock poisoned".to_string()))
    }

    /// Every row of a campaign, deleted and blocked included.
    pub fn snapshot(&self, campaign: &CampaignId) -> Result<Vec<Entrant>, RepositoryError> {
        let store = self.lock()?;
        Ok(store
            .campaign(campaign)
            .map(|index| {
                index
                    .members
                    .iter()
                    .filter_map(|id| store.entrants.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl EntrantRepository for InMemoryEntrantRepository {
    fn insert(&self, entrant: Entrant, expected_revision: u64) -> Result<Entrant, RepositoryError> {
        let mut store = self.lock()?;
        let email_key = (entrant.campaign_id.clone(), entrant.email.clone());
        if store.by_email.contains_key(&email_key) {
            return Err(RepositoryError::Duplicate(UniqueField::Email));
        }
        if store.by_code.contains_key(&entrant.referral_code) {
            return Err(RepositoryError::Duplicate(UniqueField::ReferralCode));
        }
        if store.entrants.contains_key(&entrant.id) {
            return Err(RepositoryError::Conflict(format!(
                "entrant {} already exists",
                entrant.id
            )));
        }

        let index = store
            .campaigns
            .entry(entrant.campaign_id.clone())
            .or_default();
        if index.revision != expected_revision {
            return Err(RepositoryError::Conflict(format!(
                "campaign {} at revision {}, expected {expected_revision}",
                entrant.campaign_id, index.revision
            )));
        }
        if entrant.is_live() {
            if index.ranks.contains_key(&entrant.position) {
                return Err(RepositoryError::Duplicate(UniqueField::Position));
            }
            index.ranks.insert(entrant.position, entrant.id);
        }
        index.members.push(entrant.id);
        index.revision += 1;

        store.by_email.insert(email_key, entrant.id);
        store
            .by_code
            .insert(entrant.referral_code.clone(), entrant.id);
        store.entrants.insert(entrant.id, entrant.clone());
        Ok(entrant)
    }

    fn get_by_id(&self, id: &EntrantId) -> Result<Option<Entrant>, RepositoryError> {
        let store = self.lock()?;
        Ok(store.entrants.get(id).cloned())
    }

    fn get_by_referral_code(
        &self,
        code: &ReferralCode,
    ) -> Result<Option<Entrant>, RepositoryError> {
        let store = self.lock()?;
        Ok(store
            .by_code
            .get(code)
            .and_then(|id| store.entrants.get(id))
            .cloned())
    }

    fn get_by_email(
        &self,
        campaign: &CampaignId,
        email: &str,
    ) -> Result<Option<Entrant>, RepositoryError> {
        let store = self.lock()?;
        Ok(store
            .by_email
            .get(&(campaign.clone(), email.to_string()))
            .and_then(|id| store.entrants.get(id))
            .cloned())
    }

    fn live_stats(&self, campaign: &CampaignId) -> Result<LiveStats, RepositoryError> {
        let store = self.lock()?;
        Ok(store
            .campaign(campaign)
            .map(|index| LiveStats {
                live_count: index.ranks.len() as u32,
                max_position: index
                    .ranks
                    .keys()
                    .next_back()
                    .copied()
                    .unwrap_or_default(),
                revision: index.revision,
            })
            .unwrap_or_default())
    }

    fn list_live_ordered(&self, campaign: &CampaignId) -> Result<Vec<Entrant>, RepositoryError> {
        let store = self.lock()?;
        let mut live = store.live_entrants(campaign);
        live.sort_by(|a, b| {
            a.position
                .cmp(&b.position)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(live)
    }

    fn list_live_in_range(
        &self,
        campaign: &CampaignId,
        from: u32,
        to: u32,
    ) -> Result<Vec<Entrant>, RepositoryError> {
        if from > to {
            return Ok(Vec::new());
        }
        let store = self.lock()?;
        Ok(store
            .campaign(campaign)
            .map(|index| {
                index
                    .ranks
                    .range(from..=to)
                    .filter_map(|(_, id)| store.entrants.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn commit(&self, batch: RankingBatch) -> Result<CommitReceipt, RepositoryError> {
        let mut store = self.lock()?;
        store.validate(&batch)?;

        // Validation passed; everything below is infallible.
        let mut old_positions = Vec::with_capacity(batch.positions.len());
        for assignment in &batch.positions {
            if let Some(entrant) = store.entrants.get_mut(&assignment.entrant_id) {
                old_positions.push(entrant.position);
                entrant.position = assignment.position;
            }
        }
        for increment in &batch.counters {
            if let Some(entrant) = store.entrants.get_mut(&increment.entrant_id) {
                entrant.referral_count += u32::from(increment.referral);
                entrant.verified_referral_count += u32::from(increment.verified_referral);
            }
        }
        for id in &batch.reward_marks {
            if let Some(entrant) = store.entrants.get_mut(id) {
                entrant.reward_applied = true;
            }
        }

        let index = store.campaigns.entry(batch.campaign_id.clone()).or_default();
        for position in old_positions {
            index.ranks.remove(&position);
        }
        for assignment in &batch.positions {
            index.ranks.insert(assignment.position, assignment.entrant_id);
        }
        if !batch.positions.is_empty() {
            index.revision += 1;
        }

        Ok(CommitReceipt {
            revision: index.revision,
            positions_written: batch.positions.len(),
        })
    }

    fn increment_counters(
        &self,
        id: &EntrantId,
        referral: bool,
        verified_referral: bool,
    ) -> Result<(), RepositoryError> {
        let mut store = self.lock()?;
        let entrant = store.entrant_mut(id)?;
        let referrals = entrant.referral_count + u32::from(referral);
        let verified = entrant.verified_referral_count + u32::from(verified_referral);
        if verified > referrals {
            return Err(RepositoryError::Rejected(format!(
                "verified referrals would exceed referrals for {id}"
            )));
        }
        entrant.referral_count = referrals;
        entrant.verified_referral_count = verified;
        Ok(())
    }

    fn mark_email_verified(&self, id: &EntrantId) -> Result<bool, RepositoryError> {
        let mut store = self.lock()?;
        let entrant = store.entrant_mut(id)?;
        if entrant.email_verified {
            return Ok(false);
        }
        entrant.email_verified = true;
        if entrant.status == EntrantStatus::Pending {
            entrant.status = EntrantStatus::Verified;
        }
        Ok(true)
    }

    fn set_status(
        &self,
        id: &EntrantId,
        status: EntrantStatus,
    ) -> Result<Entrant, RepositoryError> {
        let mut store = self.lock()?;
        let entrant = store.entrant_mut(id)?;
        let was_live = entrant.is_live();
        if !was_live && status != EntrantStatus::Blocked && entrant.deleted_at.is_none() {
            return Err(RepositoryError::Rejected(
                "re-admitting an entrant requires a recompute slot".to_string(),
            ));
        }
        entrant.status = status;
        let updated = entrant.clone();
        if was_live && !updated.is_live() {
            store.unrank(&updated);
        }
        Ok(updated)
    }

    fn soft_delete(&self, id: &EntrantId, at: DateTime<Utc>) -> Result<Entrant, RepositoryError> {
        let mut store = self.lock()?;
        let entrant = store.entrant_mut(id)?;
        if entrant.deleted_at.is_some() {
            return Ok(entrant.clone());
        }
        let was_live = entrant.is_live();
        entrant.deleted_at = Some(at);
        let updated = entrant.clone();
        if was_live {
            store.unrank(&updated);
        }
        Ok(updated)
    }

    fn leaderboard(
        &self,
        campaign: &CampaignId,
        limit: usize,
    ) -> Result<Vec<Entrant>, RepositoryError> {
        let store = self.lock()?;
        let mut live = store.live_entrants(campaign);
        live.sort_by(|a, b| {
            b.referral_count
                .cmp(&a.referral_count)
                .then(a.position.cmp(&b.position))
        });
        live.truncate(limit);
        Ok(live)
    }

    fn search(
        &self,
        campaign: &CampaignId,
        filter: &EntrantFilter,
        limit: usize,
    ) -> Result<Vec<Entrant>, RepositoryError> {
        let store = self.lock()?;
        let Some(index) = store.campaign(campaign) else {
            return Ok(Vec::new());
        };
        let mut matches: Vec<Entrant> = index
            .members
            .iter()
            .filter_map(|id| store.entrants.get(id))
            .filter(|entrant| filter.matches(entrant))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.position.cmp(&b.position).then(a.id.cmp(&b.id)));
        matches.truncate(limit);
        Ok(matches)
    }
}
