//! Referral ranking engine.
//!
//! Every position-changing sequence runs under the campaign lock and is committed as a
//! single [`RankingBatch`] guarded by the campaign revision. A stale read surfaces as a
//! conflict and the whole compute-then-write sequence is retried from fresh reads.

mod error;
mod locks;
mod outcome;
mod retry;
mod window;

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::telemetry::RANKING_TARGET;

use super::codes::{RegistryError, ReferralCodeRegistry};
use super::domain::{normalize_email, CampaignId, Entrant, EntrantDraft, EntrantId, EntrantStatus};
use super::repository::{
    CounterIncrement, EntrantRepository, PositionAssignment, RankingBatch, RepositoryError,
    UniqueField,
};
use super::settings::{CampaignSettings, ReferralSettings, SettingsProvider};

pub use error::{ErrorKind, RankingError};
pub use locks::CampaignLocks;
pub use outcome::{
    DensityReport, PositionChange, RecomputeResult, RecomputeSummary, RewardOutcome, SkipReason,
    VerificationOutcome,
};
pub use retry::{Deadline, RetryPolicy, RetryStrategy};
pub use window::{RankWindow, WindowError};

use retry::with_transient_retry;

/// Target rank after jumping `jump` places from `position`, clamped at the front.
pub fn promoted_position(position: u32, jump: u32) -> u32 {
    position.saturating_sub(jump).max(1)
}

fn validate_email(email: &str) -> Result<(), RankingError> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(RankingError::InvalidInput(format!(
            "'{email}' is not a valid email address"
        )))
    }
}

/// Maintains referral-driven queue order for every campaign in a repository.
pub struct RankingEngine<R, S> {
    repository: Arc<R>,
    settings: Arc<S>,
    registry: ReferralCodeRegistry<R>,
    locks: CampaignLocks,
    policy: RetryPolicy,
    config: EngineConfig,
}

impl<R, S> RankingEngine<R, S>
where
    R: EntrantRepository + 'static,
    S: SettingsProvider + 'static,
{
    pub fn new(repository: Arc<R>, settings: Arc<S>, config: EngineConfig) -> Self {
        let registry =
            ReferralCodeRegistry::new(repository.clone(), config.code_length, config.code_attempts);
        Self::with_registry(repository, settings, registry, config)
    }

    pub fn with_registry(
        repository: Arc<R>,
        settings: Arc<S>,
        registry: ReferralCodeRegistry<R>,
        config: EngineConfig,
    ) -> Self {
        Self {
            repository,
            settings,
            registry,
            locks: CampaignLocks::new(),
            policy: RetryPolicy::from_config(&config),
            config,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    pub fn registry(&self) -> &ReferralCodeRegistry<R> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn locks(&self) -> &CampaignLocks {
        &self.locks
    }

    pub fn campaign_settings(&self, campaign: &CampaignId) -> Result<CampaignSettings, RankingError> {
        Ok(self.settings.campaign_settings(campaign)?)
    }

    fn read<T>(
        &self,
        mut call: impl FnMut(&R) -> Result<T, RepositoryError>,
    ) -> Result<T, RepositoryError> {
        let repository = self.repository.as_ref();
        with_transient_retry(self.config.retry_backoff(), || call(repository))
    }

    pub fn entrant(&self, id: &EntrantId) -> Result<Entrant, RankingError> {
        self.read(|repository| repository.get_by_id(id))?
            .ok_or_else(|| RankingError::NotFound(format!("entrant {id}")))
    }

    fn with_conflict_retry<T>(
        &self,
        campaign: &CampaignId,
        deadline: Deadline,
        mut attempt: impl FnMut() -> Result<T, RankingError>,
    ) -> Result<T, RankingError> {
        let max_attempts = self.policy.max_attempts;
        let mut last_detail = String::new();
        for round in 1..=max_attempts {
            if deadline.is_expired() {
                warn!(target: RANKING_TARGET, campaign = %campaign, round, "deadline elapsed before attempt");
                return Err(RankingError::DeadlineExceeded);
            }
            match attempt() {
                Err(RankingError::Conflict { detail, .. }) => {
                    warn!(
                        target: RANKING_TARGET,
                        campaign = %campaign,
                        round,
                        detail = %detail,
                        "position conflict, retrying from fresh reads"
                    );
                    last_detail = detail;
                    if round < max_attempts {
                        deadline.sleep(self.policy.strategy.delay_for_attempt(round));
                    }
                }
                other => return other,
            }
        }
        error!(target: RANKING_TARGET, campaign = %campaign, attempts = max_attempts, "conflict retries exhausted");
        Err(RankingError::Conflict {
            attempts: max_attempts,
            detail: last_detail,
        })
    }

    /// Add a signup at the tail of the campaign queue.
    ///
    /// A referrer that does not exist or belongs to another campaign is dropped rather
    /// than failing the signup.
    pub fn register_signup(
        &self,
        campaign: &CampaignId,
        draft: EntrantDraft,
    ) -> Result<Entrant, RankingError> {
        let settings = self.campaign_settings(campaign)?;
        let email = normalize_email(&draft.email);
        validate_email(&email)?;

        let referred_by = match draft.referred_by {
            Some(referrer_id) => match self.read(|repository| repository.get_by_id(&referrer_id))? {
                Some(referrer) if referrer.campaign_id == *campaign => Some(referrer_id),
                _ => {
                    debug!(campaign = %campaign, referrer = %referrer_id, "ignoring referrer outside campaign");
                    None
                }
            },
            None => None,
        };

        let entrant = self.locks.with_campaign(campaign, || {
            self.with_conflict_retry(campaign, Deadline::none(), || {
                self.try_register(campaign, &settings, &email, referred_by)
            })
        })?;

        info!(
            target: RANKING_TARGET,
            campaign = %campaign,
            entrant = %entrant.id,
            position = entrant.position,
            referred = entrant.referred_by.is_some(),
            "signup registered"
        );
        Ok(entrant)
    }

    fn try_register(
        &self,
        campaign: &CampaignId,
        settings: &CampaignSettings,
        email: &str,
        referred_by: Option<EntrantId>,
    ) -> Result<Entrant, RankingError> {
        let already_registered = || RankingError::AlreadyRegistered {
            campaign: campaign.clone(),
            email: email.to_string(),
        };
        if self
            .read(|repository| repository.get_by_email(campaign, email))?
            .is_some()
        {
            return Err(already_registered());
        }

        let stats = self.read(|repository| repository.live_stats(campaign))?;
        if let Some(limit) = settings.max_signups {
            if stats.live_count >= limit {
                return Err(RankingError::CapacityExceeded {
                    campaign: campaign.clone(),
                    limit,
                });
            }
        }

        let position = stats.tail_position();
        let id = EntrantId::generate();
        let created_at = Utc::now();
        let stored = self.registry.issue(|referral_code| {
            let entrant = Entrant {
                id,
                campaign_id: campaign.clone(),
                email: email.to_string(),
                position,
                original_position: position,
                referral_code,
                referred_by,
                referral_count: 0,
                verified_referral_count: 0,
                email_verified: false,
                reward_applied: false,
                status: EntrantStatus::Pending,
                created_at,
                deleted_at: None,
            };
            self.read(|repository| repository.insert(entrant.clone(), stats.revision))
        });

        match stored {
            Ok(entrant) => Ok(entrant),
            Err(RegistryError::Repository(RepositoryError::Duplicate(UniqueField::Email))) => {
                Err(already_registered())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Apply the reward for `referred`'s referral: promote the referrer (and the referred
    /// entrant when configured), bump the referrer's counters and mark the reward applied,
    /// all in one batch.
    ///
    /// Calling this again for the same entrant returns [`RewardOutcome::AlreadyApplied`].
    pub fn apply_referral_reward(
        &self,
        campaign: &CampaignId,
        referred: &EntrantId,
        deadline: Deadline,
    ) -> Result<RewardOutcome, RankingError> {
        if deadline.is_expired() {
            return Err(RankingError::DeadlineExceeded);
        }
        let settings = self.campaign_settings(campaign)?.referral;
        if !settings.enabled {
            return Ok(RewardOutcome::Skipped {
                reason: SkipReason::ReferralsDisabled,
            });
        }

        self.locks.with_campaign(campaign, || {
            self.with_conflict_retry(campaign, deadline, || {
                self.try_reward(campaign, referred, &settings, deadline)
            })
        })
    }

    fn try_reward(
        &self,
        campaign: &CampaignId,
        referred_id: &EntrantId,
        settings: &ReferralSettings,
        deadline: Deadline,
    ) -> Result<RewardOutcome, RankingError> {
        let skipped = |reason| Ok(RewardOutcome::Skipped { reason });

        let referred = self.entrant(referred_id)?;
        if referred.campaign_id != *campaign {
            return Err(RankingError::NotFound(format!(
                "entrant {referred_id} in campaign {campaign}"
            )));
        }
        if referred.reward_applied {
            debug!(target: RANKING_TARGET, referred = %referred.id, "reward already applied");
            return Ok(RewardOutcome::AlreadyApplied {
                referred: referred.id,
            });
        }
        let Some(referrer_id) = referred.referred_by else {
            return skipped(SkipReason::NotReferred);
        };
        if !referred.is_live() {
            return skipped(SkipReason::ReferredNotLive);
        }
        if settings.verified_only && !referred.email_verified {
            return skipped(SkipReason::AwaitingVerification);
        }
        let referrer = match self.read(|repository| repository.get_by_id(&referrer_id))? {
            Some(referrer) if referrer.campaign_id == *campaign && referrer.is_live() => referrer,
            _ => {
                debug!(target: RANKING_TARGET, referrer = %referrer_id, "referrer no longer live");
                return skipped(SkipReason::ReferrerUnavailable);
            }
        };

        let stats = self.read(|repository| repository.live_stats(campaign))?;
        let mut window = RankWindow::new();
        let mut shifted = 0;

        let referrer_target =
            promoted_position(referrer.position, settings.referrer_positions_to_jump);
        shifted += self.promote(
            campaign,
            &mut window,
            referrer.id,
            referrer.position,
            referrer_target,
        )?;

        let mut moved = vec![(referrer.id, referrer.position)];
        if let Some(jump) = settings.referred_jump() {
            let current = window.position_of(&referred.id).unwrap_or(referred.position);
            let target = promoted_position(current, jump);
            shifted += self.promote(campaign, &mut window, referred.id, current, target)?;
            moved.push((referred.id, referred.position));
        }

        let movers: Vec<PositionChange> = moved
            .into_iter()
            .map(|(entrant_id, old_position)| PositionChange {
                entrant_id,
                old_position,
                new_position: window.position_of(&entrant_id).unwrap_or(old_position),
            })
            .collect();

        let assignments = window.assignments();
        let batch = RankingBatch {
            campaign_id: campaign.clone(),
            expected_revision: Some(stats.revision),
            positions: assignments.clone(),
            counters: vec![CounterIncrement {
                entrant_id: referrer.id,
                referral: true,
                verified_referral: referred.email_verified,
            }],
            reward_marks: vec![referred.id],
        };

        if deadline.is_expired() {
            warn!(target: RANKING_TARGET, campaign = %campaign, referred = %referred.id, "deadline elapsed before commit");
            return Err(RankingError::DeadlineExceeded);
        }
        let receipt = self.read(|repository| repository.commit(batch.clone()))?;
        if receipt.positions_written != assignments.len() {
            error!(
                target: RANKING_TARGET,
                campaign = %campaign,
                expected = assignments.len(),
                written = receipt.positions_written,
                "bulk position write was partial"
            );
            return Err(RankingError::InvariantViolation(format!(
                "wrote {} of {} positions",
                receipt.positions_written,
                assignments.len()
            )));
        }
        self.verify_assignments(campaign, &window, &assignments, receipt.revision)?;

        info!(
            target: RANKING_TARGET,
            campaign = %campaign,
            referrer = %referrer.id,
            referred = %referred.id,
            from = referrer.position,
            to = referrer_target,
            shifted,
            revision = receipt.revision,
            "referral reward applied"
        );
        Ok(RewardOutcome::Applied(RecomputeResult {
            campaign_id: campaign.clone(),
            movers,
            shifted,
            revision: receipt.revision,
        }))
    }

    fn promote(
        &self,
        campaign: &CampaignId,
        window: &mut RankWindow,
        entrant: EntrantId,
        from: u32,
        to: u32,
    ) -> Result<usize, RankingError> {
        if to >= from {
            return Ok(0);
        }
        for (start, end) in window.missing(to, from) {
            let occupants =
                self.read(|repository| repository.list_live_in_range(campaign, start, end))?;
            window.load(
                start,
                end,
                occupants.into_iter().map(|entrant| (entrant.position, entrant.id)),
            );
        }
        window
            .promote(entrant, from, to)
            .map_err(|err| RankingError::conflict(err.to_string()))
    }

    /// Re-read every range the window loaded and compare it with the committed window.
    ///
    /// Ranks between loaded ranges were never read or written, so they are not compared.
    /// Skipped when another writer has moved the campaign past `revision` since the commit.
    fn verify_assignments(
        &self,
        campaign: &CampaignId,
        window: &RankWindow,
        assignments: &[PositionAssignment],
        revision: u64,
    ) -> Result<(), RankingError> {
        if assignments.is_empty() {
            return Ok(());
        }
        let mut diverged = Vec::new();
        for &(from, to) in window.loaded_ranges() {
            let stored: Vec<(u32, EntrantId)> = self
                .read(|repository| repository.list_live_in_range(campaign, from, to))?
                .into_iter()
                .map(|entrant| (entrant.position, entrant.id))
                .collect();
            let unique = stored.windows(2).all(|pair| pair[0].0 < pair[1].0);
            if !unique || stored != window.occupants(from, to) {
                diverged.push((from, to));
            }
        }
        if diverged.is_empty() {
            return Ok(());
        }
        if self.read(|repository| repository.live_stats(campaign))?.revision != revision {
            debug!(target: RANKING_TARGET, campaign = %campaign, "campaign moved on since commit");
            return Ok(());
        }
        let ranges = diverged
            .iter()
            .map(|(from, to)| format!("{from}..={to}"))
            .collect::<Vec<_>>()
            .join(", ");
        error!(
            target: RANKING_TARGET,
            campaign = %campaign,
            ranges = %ranges,
            "stored ranks diverge from the committed window"
        );
        Err(RankingError::InvariantViolation(format!(
            "ranks {ranges} of campaign {campaign} do not match the committed batch"
        )))
    }

    /// Rewrite live positions to exactly `1..=live_count`, keeping the current order.
    ///
    /// Ties on position fall back to signup time, then id.
    pub fn recompute(&self, campaign: &CampaignId) -> Result<RecomputeSummary, RankingError> {
        self.campaign_settings(campaign)?;
        self.locks.with_campaign(campaign, || {
            self.with_conflict_retry(campaign, Deadline::none(), || self.try_recompute(campaign))
        })
    }

    fn try_recompute(&self, campaign: &CampaignId) -> Result<RecomputeSummary, RankingError> {
        let stats = self.read(|repository| repository.live_stats(campaign))?;
        let live = self.read(|repository| repository.list_live_ordered(campaign))?;

        let assignments: Vec<PositionAssignment> = live
            .iter()
            .zip(1u32..)
            .filter(|(entrant, position)| entrant.position != *position)
            .map(|(entrant, position)| PositionAssignment {
                entrant_id: entrant.id,
                position,
            })
            .collect();

        let revision = if assignments.is_empty() {
            stats.revision
        } else {
            let batch =
                RankingBatch::positions(campaign.clone(), Some(stats.revision), assignments.clone());
            let receipt = self.read(|repository| repository.commit(batch.clone()))?;
            if receipt.positions_written != assignments.len() {
                return Err(RankingError::InvariantViolation(format!(
                    "recompute wrote {} of {} positions",
                    receipt.positions_written,
                    assignments.len()
                )));
            }
            receipt.revision
        };

        let report = self.audit(campaign)?;
        let settled = self.read(|repository| repository.live_stats(campaign))?.revision == revision;
        if settled && !report.is_dense() {
            error!(
                target: RANKING_TARGET,
                campaign = %campaign,
                gaps = report.gap_count,
                duplicates = report.duplicates.len(),
                "positions not dense after recompute"
            );
            return Err(RankingError::InvariantViolation(format!(
                "campaign {campaign} has {} gaps and {} duplicate ranks after recompute",
                report.gap_count,
                report.duplicates.len()
            )));
        }

        info!(
            target: RANKING_TARGET,
            campaign = %campaign,
            live = report.live_count,
            moved = assignments.len(),
            "campaign recomputed"
        );
        Ok(RecomputeSummary {
            campaign_id: campaign.clone(),
            live_count: report.live_count,
            moved: assignments.len(),
            revision,
        })
    }

    /// Check that live positions are exactly `1..=live_count`.
    pub fn audit(&self, campaign: &CampaignId) -> Result<DensityReport, RankingError> {
        let live = self.read(|repository| repository.list_live_ordered(campaign))?;
        Ok(DensityReport::from_positions(
            campaign.clone(),
            live.iter().map(|entrant| entrant.position),
        ))
    }

    /// Flip the entrant's verification flag; `true` only on the first transition.
    pub fn mark_email_verified(&self, id: &EntrantId) -> Result<bool, RankingError> {
        Ok(self.read(|repository| repository.mark_email_verified(id))?)
    }

    /// Flip the verification flag and settle the referral reward it unlocks.
    ///
    /// Both happen under the campaign lock, so a reward committed from the signup path
    /// either already saw the flag or leaves the verified credit to this call.
    pub fn verify_and_reward(
        &self,
        id: &EntrantId,
        deadline: Deadline,
    ) -> Result<VerificationOutcome, RankingError> {
        let entrant = self.entrant(id)?;
        let campaign = entrant.campaign_id.clone();
        let settings = self.campaign_settings(&campaign)?.referral;

        self.locks.with_campaign(&campaign, || -> Result<_, RankingError> {
            let newly_verified = self.mark_email_verified(id)?;
            let reward = match entrant.referred_by {
                None => None,
                Some(_) if !settings.enabled => Some(RewardOutcome::Skipped {
                    reason: SkipReason::ReferralsDisabled,
                }),
                Some(referrer) if self.entrant(id)?.reward_applied => {
                    if newly_verified {
                        // The reward batch ran before the flip and counted an unverified referral.
                        self.record_verified_referral(&campaign, &referrer)?;
                    }
                    Some(RewardOutcome::AlreadyApplied { referred: *id })
                }
                Some(_) => Some(self.with_conflict_retry(&campaign, deadline, || {
                    self.try_reward(&campaign, id, &settings, deadline)
                })?),
            };
            Ok(VerificationOutcome {
                entrant_id: *id,
                newly_verified,
                reward,
            })
        })
    }

    fn record_verified_referral(
        &self,
        campaign: &CampaignId,
        referrer: &EntrantId,
    ) -> Result<(), RankingError> {
        self.read(|repository| repository.increment_counters(referrer, false, true))?;
        debug!(target: RANKING_TARGET, campaign = %campaign, referrer = %referrer, "late verification credited");
        Ok(())
    }

    /// Take an entrant out of the ranking. The slot stays empty until the next recompute.
    pub fn block(&self, id: &EntrantId) -> Result<Entrant, RankingError> {
        let entrant = self.entrant(id)?;
        let blocked = self.locks.with_campaign(&entrant.campaign_id, || {
            self.read(|repository| repository.set_status(id, EntrantStatus::Blocked))
        })?;
        info!(target: RANKING_TARGET, campaign = %blocked.campaign_id, entrant = %id, "entrant blocked");
        Ok(blocked)
    }

    /// Soft-delete an entrant; repeated calls return the already deleted row.
    pub fn remove(&self, id: &EntrantId) -> Result<Entrant, RankingError> {
        let entrant = self.entrant(id)?;
        let removed = self.locks.with_campaign(&entrant.campaign_id, || {
            self.read(|repository| repository.soft_delete(id, Utc::now()))
        })?;
        info!(target: RANKING_TARGET, campaign = %removed.campaign_id, entrant = %id, "entrant removed");
        Ok(removed)
    }
}
