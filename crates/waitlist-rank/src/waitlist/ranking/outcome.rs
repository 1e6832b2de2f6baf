use serde::Serialize;

use crate::waitlist::domain::{CampaignId, EntrantId};

/// Old and new rank of an entrant moved by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PositionChange {
    pub entrant_id: EntrantId,
    pub old_position: u32,
    pub new_position: u32,
}

/// Committed effect of one reward application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecomputeResult {
    pub campaign_id: CampaignId,
    /// Referrer first, then the referred entrant when that side is promoted.
    pub movers: Vec<PositionChange>,
    /// Entrants pushed back one rank to make room.
    pub shifted: usize,
    pub revision: u64,
}

impl RecomputeResult {
    pub fn mover(&self, entrant: &EntrantId) -> Option<&PositionChange> {
        self.movers.iter().find(|change| change.entrant_id == *entrant)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    ReferralsDisabled,
    NotReferred,
    /// The referrer was deleted, blocked or belongs to another campaign.
    ReferrerUnavailable,
    ReferredNotLive,
    AwaitingVerification,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RewardOutcome {
    Applied(RecomputeResult),
    AlreadyApplied { referred: EntrantId },
    Skipped { reason: SkipReason },
}

impl RewardOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, RewardOutcome::Applied(_))
    }

    pub fn applied(&self) -> Option<&RecomputeResult> {
        match self {
            RewardOutcome::Applied(result) => Some(result),
            _ => None,
        }
    }
}

/// Result of an email verification event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationOutcome {
    pub entrant_id: EntrantId,
    /// `false` when the entrant had already verified.
    pub newly_verified: bool,
    /// `None` for entrants that were not referred.
    pub reward: Option<RewardOutcome>,
}

/// Result of a full maintenance recompute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecomputeSummary {
    pub campaign_id: CampaignId,
    pub live_count: u32,
    pub moved: usize,
    pub revision: u64,
}

const MAX_REPORTED_GAPS: usize = 64;

/// Audit of a campaign's live positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DensityReport {
    pub campaign_id: CampaignId,
    pub live_count: u32,
    pub max_position: u32,
    pub duplicates: Vec<u32>,
    /// First missing ranks, truncated; see `gap_count` for the total.
    pub gaps: Vec<u32>,
    pub gap_count: u32,
}

impl DensityReport {
    pub fn from_positions<I>(campaign_id: CampaignId, positions: I) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        let mut positions: Vec<u32> = positions.into_iter().collect();
        positions.sort_unstable();

        let mut duplicates = Vec::new();
        let mut gaps = Vec::new();
        let mut gap_count = 0u32;
        let mut expected = 1u32;
        let mut previous = None;
        for &position in &positions {
            if previous == Some(position) {
                duplicates.push(position);
                continue;
            }
            while expected < position {
                gap_count += 1;
                if gaps.len() < MAX_REPORTED_GAPS {
                    gaps.push(expected);
                }
                expected += 1;
            }
            expected = position + 1;
            previous = Some(position);
        }

        Self {
            campaign_id,
            live_count: positions.len() as u32,
            max_position: positions.last().copied().unwrap_or_default(),
            duplicates,
            gaps,
            gap_count,
        }
    }

    /// Live positions are exactly `1..=live_count`.
    pub fn is_dense(&self) -> bool {
        self.duplicates.is_empty() && self.gap_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_positions_pass() {
        let report = DensityReport::from_positions(CampaignId::new("c"), [3, 1, 2]);
        assert!(report.is_dense());
        assert_eq!(report.max_position, 3);
    }

    #[test]
    fn gaps_and_duplicates_are_reported() {
        let report = DensityReport::from_positions(CampaignId::new("c"), [1, 2, 2, 5]);
        assert!(!report.is_dense());
        assert_eq!(report.duplicates, vec![2]);
        assert_eq!(report.gaps, vec![3, 4]);
        assert_eq!(report.gap_count, 2);
    }

    #[test]
    fn empty_campaign_is_dense() {
        let report = DensityReport::from_positions(CampaignId::new("c"), Vec::new());
        assert!(report.is_dense());
        assert_eq!(report.live_count, 0);
    }
}
