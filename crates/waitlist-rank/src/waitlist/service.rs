use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::codes::{parse_code, RegistryError};
use super::domain::{
    mask_email, CampaignId, Entrant, EntrantDraft, EntrantId, LeaderboardEntry, PublicPosition,
};
use super::filter::EntrantFilter;
use super::ranking::{
    Deadline, DensityReport, ErrorKind, RankingEngine, RankingError, RecomputeSummary,
    RewardOutcome,
};
pub use super::ranking::VerificationOutcome;
use super::repository::EntrantRepository;
use super::settings::SettingsProvider;

pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;

/// Signup payload accepted from the public form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    #[serde(default)]
    pub referral_code: Option<String>,
}

impl SignupRequest {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            referral_code: None,
        }
    }

    pub fn with_referral_code(mut self, code: impl Into<String>) -> Self {
        self.referral_code = Some(code.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignupReceipt {
    pub entrant: Entrant,
    /// Present when the reward fired at signup, i.e. without verification gating.
    pub reward: Option<RewardOutcome>,
}

/// Public position plus the channels the campaign suggests for sharing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositionView {
    #[serde(flatten)]
    pub position: PublicPosition,
    pub sharing_channels: Vec<String>,
}

/// Facade combining signup intake, verification events and public reads.
pub struct WaitlistService<R, S> {
    engine: Arc<RankingEngine<R, S>>,
}

impl<R, S> WaitlistService<R, S>
where
    R: EntrantRepository + 'static,
    S: SettingsProvider + 'static,
{
    pub fn new(engine: Arc<RankingEngine<R, S>>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<RankingEngine<R, S>> {
        &self.engine
    }

    fn reward_deadline(&self) -> Deadline {
        Deadline::after(self.engine.config().reward_timeout())
    }

    /// Resolve a referral code to a referrer in `campaign`, ignoring anything that does
    /// not resolve there.
    fn resolve_referrer(
        &self,
        campaign: &CampaignId,
        raw: Option<&str>,
    ) -> Result<Option<EntrantId>, ServiceError> {
        let Some(raw) = raw.filter(|raw| !raw.trim().is_empty()) else {
            return Ok(None);
        };
        let Some(code) = parse_code(raw) else {
            debug!(campaign = %campaign, "malformed referral code ignored");
            return Ok(None);
        };
        let referrer = match self.engine.registry().resolve(&code) {
            Ok(referrer) => referrer,
            Err(RegistryError::NotFound(_)) => {
                debug!(campaign = %campaign, code = %code, "unknown referral code ignored");
                return Ok(None);
            }
            Err(err) => return Err(RankingError::from(err).into()),
        };
        let owner = self.engine.entrant(&referrer)?;
        Ok((owner.campaign_id == *campaign).then_some(referrer))
    }

    /// Register a signup, attributing it to the owner of `referral_code` when it resolves.
    pub fn signup(
        &self,
        campaign: &CampaignId,
        request: SignupRequest,
    ) -> Result<SignupReceipt, ServiceError> {
        let referrer = self.resolve_referrer(campaign, request.referral_code.as_deref())?;
        let mut draft = EntrantDraft::new(request.email);
        if let Some(referrer) = referrer {
            draft = draft.referred_by(referrer);
        }

        let entrant = self.engine.register_signup(campaign, draft)?;
        let settings = self.engine.campaign_settings(campaign)?.referral;
        if entrant.referred_by.is_none() || settings.verified_only {
            return Ok(SignupReceipt {
                entrant,
                reward: None,
            });
        }

        // The signup is committed; a failed reward is retried by the verification event.
        let reward = match self
            .engine
            .apply_referral_reward(campaign, &entrant.id, self.reward_deadline())
        {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                warn!(
                    campaign = %campaign,
                    entrant = %entrant.id,
                    error = %err,
                    "signup reward deferred"
                );
                None
            }
        };
        let entrant = self.engine.entrant(&entrant.id)?;
        Ok(SignupReceipt { entrant, reward })
    }

    /// Handle an email verification event. Safe to replay.
    pub fn entrant_verified(&self, id: &EntrantId) -> Result<VerificationOutcome, ServiceError> {
        Ok(self.engine.verify_and_reward(id, self.reward_deadline())?)
    }

    pub fn public_position(&self, id: &EntrantId) -> Result<PositionView, ServiceError> {
        let entrant = self.engine.entrant(id)?;
        if entrant.deleted_at.is_some() {
            return Err(ServiceError::EntrantRemoved(*id));
        }
        let settings = self.engine.campaign_settings(&entrant.campaign_id)?.referral;
        Ok(PositionView {
            position: entrant.public_view(settings.points_per_referral),
            sharing_channels: settings.sharing_channels,
        })
    }

    /// Top referrers, ranked by `referral_count DESC, position ASC`.
    pub fn leaderboard(
        &self,
        campaign: &CampaignId,
        limit: Option<usize>,
    ) -> Result<Vec<LeaderboardEntry>, ServiceError> {
        self.engine.campaign_settings(campaign)?;
        let limit = limit
            .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
            .clamp(1, MAX_PAGE_SIZE);
        let rows = self
            .engine
            .repository()
            .leaderboard(campaign, limit)
            .map_err(RankingError::from)?;
        Ok(rows
            .into_iter()
            .enumerate()
            .map(|(index, entrant)| LeaderboardEntry {
                rank: index + 1,
                entrant_id: entrant.id,
                display_email: mask_email(&entrant.email),
                position: entrant.position,
                referral_count: entrant.referral_count,
            })
            .collect())
    }

    pub fn search(
        &self,
        campaign: &CampaignId,
        filter: &EntrantFilter,
        limit: usize,
    ) -> Result<Vec<Entrant>, ServiceError> {
        let rows = self
            .engine
            .repository()
            .search(campaign, filter, limit.clamp(1, MAX_PAGE_SIZE))
            .map_err(RankingError::from)?;
        Ok(rows)
    }

    pub fn block(&self, id: &EntrantId) -> Result<Entrant, ServiceError> {
        Ok(self.engine.block(id)?)
    }

    pub fn remove(&self, id: &EntrantId) -> Result<Entrant, ServiceError> {
        Ok(self.engine.remove(id)?)
    }

    pub fn recompute(&self, campaign: &CampaignId) -> Result<RecomputeSummary, ServiceError> {
        Ok(self.engine.recompute(campaign)?)
    }

    pub fn audit(&self, campaign: &CampaignId) -> Result<DensityReport, ServiceError> {
        self.engine.campaign_settings(campaign)?;
        Ok(self.engine.audit(campaign)?)
    }
}

/// Error raised by the waitlist service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Ranking(#[from] RankingError),
    #[error("entrant {0} has left the waitlist")]
    EntrantRemoved(EntrantId),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Ranking(err) => err.kind(),
            ServiceError::EntrantRemoved(_) => ErrorKind::NotFound,
        }
    }
}
