use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{CampaignId, Entrant, EntrantId, EntrantStatus, ReferralCode};
use super::filter::EntrantFilter;

/// New position for one entrant inside a batch write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionAssignment {
    pub entrant_id: EntrantId,
    pub position: u32,
}

/// Atomic counter bump; applied as a delta, never as an absolute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterIncrement {
    pub entrant_id: EntrantId,
    pub referral: bool,
    pub verified_referral: bool,
}

/// Cheap aggregate over a campaign's live rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiveStats {
    pub live_count: u32,
    pub max_position: u32,
    /// Bumped by every write that changes the campaign's live position space.
    pub revision: u64,
}

impl LiveStats {
    /// Next free slot at the tail of the queue.
    pub fn tail_position(&self) -> u32 {
        self.live_count.max(self.max_position) + 1
    }
}

/// Unit of work for the ranking engine: applied completely or not at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankingBatch {
    pub campaign_id: CampaignId,
    /// `None` skips the optimistic revision check.
    pub expected_revision: Option<u64>,
    pub positions: Vec<PositionAssignment>,
    pub counters: Vec<CounterIncrement>,
    /// Referred entrants whose reward is committed by this batch.
    pub reward_marks: Vec<EntrantId>,
}

impl RankingBatch {
    pub fn positions(
        campaign_id: CampaignId,
        expected_revision: Option<u64>,
        positions: Vec<PositionAssignment>,
    ) -> Self {
        Self {
            campaign_id,
            expected_revision,
            positions,
            counters: Vec::new(),
            reward_marks: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() && self.counters.is_empty() && self.reward_marks.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReceipt {
    pub revision: u64,
    pub positions_written: usize,
}

/// Storage contract consumed by the ranking engine.
///
/// Point lookups return `Ok(None)` on a miss; callers decide whether that is an error.
pub trait EntrantRepository: Send + Sync {
    /// Insert a new entrant, failing with `Conflict` when the campaign revision moved.
    fn insert(&self, entrant: Entrant, expected_revision: u64) -> Result<Entrant, RepositoryError>;
    fn get_by_id(&self, id: &EntrantId) -> Result<Option<Entrant>, RepositoryError>;
    fn get_by_referral_code(&self, code: &ReferralCode)
        -> Result<Option<Entrant>, RepositoryError>;
    fn get_by_email(
        &self,
        campaign: &CampaignId,
        email: &str,
    ) -> Result<Option<Entrant>, RepositoryError>;
    fn live_stats(&self, campaign: &CampaignId) -> Result<LiveStats, RepositoryError>;
    /// Live entrants ordered by `(position, created_at, id)`.
    fn list_live_ordered(&self, campaign: &CampaignId) -> Result<Vec<Entrant>, RepositoryError>;
    /// Live entrants with `from <= position <= to`, ascending.
    fn list_live_in_range(
        &self,
        campaign: &CampaignId,
        from: u32,
        to: u32,
    ) -> Result<Vec<Entrant>, RepositoryError>;
    fn commit(&self, batch: RankingBatch) -> Result<CommitReceipt, RepositoryError>;
    fn increment_counters(
        &self,
        id: &EntrantId,
        referral: bool,
        verified_referral: bool,
    ) -> Result<(), RepositoryError>;
    /// Returns `true` only for the call that flipped the flag.
    fn mark_email_verified(&self, id: &EntrantId) -> Result<bool, RepositoryError>;
    fn set_status(&self, id: &EntrantId, status: EntrantStatus)
        -> Result<Entrant, RepositoryError>;
    fn soft_delete(&self, id: &EntrantId, at: DateTime<Utc>) -> Result<Entrant, RepositoryError>;
    /// Live entrants ordered by `referral_count DESC, position ASC`.
    fn leaderboard(
        &self,
        campaign: &CampaignId,
        limit: usize,
    ) -> Result<Vec<Entrant>, RepositoryError>;
    fn search(
        &self,
        campaign: &CampaignId,
        filter: &EntrantFilter,
        limit: usize,
    ) -> Result<Vec<Entrant>, RepositoryError>;

    /// Position-only batch; every id must belong to `campaign` and be live.
    fn bulk_set_positions(
        &self,
        campaign: &CampaignId,
        assignments: &[PositionAssignment],
    ) -> Result<CommitReceipt, RepositoryError> {
        self.commit(RankingBatch::positions(
            campaign.clone(),
            None,
            assignments.to_vec(),
        ))
    }
}

/// Unique constraints enforced by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Email,
    ReferralCode,
    Position,
}

impl UniqueField {
    pub const fn label(self) -> &'static str {
        match self {
            UniqueField::Email => "email",
            UniqueField::ReferralCode => "referral_code",
            UniqueField::Position => "position",
        }
    }
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("concurrent modification: {0}")]
    Conflict(String),
    #[error("unique constraint violated on {}", .0.label())]
    Duplicate(UniqueField),
    #[error("record not found")]
    NotFound,
    #[error("batch rejected: {0}")]
    Rejected(String),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

impl RepositoryError {
    /// Connection-level failures worth one more attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, RepositoryError::Unavailable(_))
    }
}
