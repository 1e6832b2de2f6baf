use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use super::domain::CampaignId;

/// Sharing channels a campaign may advertise next to the referral link.
pub const KNOWN_SHARING_CHANNELS: &[&str] = &[
    "email",
    "twitter",
    "facebook",
    "linkedin",
    "whatsapp",
    "sms",
    "copy_link",
];

/// Per-campaign referral configuration, read-only to the ranking engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralSettings {
    pub enabled: bool,
    pub points_per_referral: u32,
    /// Rewards wait for the referred entrant's email verification.
    pub verified_only: bool,
    /// Ranks the referred entrant advances when `reward_referred` is set.
    pub positions_to_jump: u32,
    pub referrer_positions_to_jump: u32,
    pub reward_referred: bool,
    #[serde(default)]
    pub sharing_channels: Vec<String>,
}

impl Default for ReferralSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            points_per_referral: 1,
            verified_only: true,
            positions_to_jump: 0,
            referrer_positions_to_jump: 1,
            reward_referred: false,
            sharing_channels: vec!["email".to_string(), "copy_link".to_string()],
        }
    }
}

impl ReferralSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if let Some(channel) = self
            .sharing_channels
            .iter()
            .find(|channel| !KNOWN_SHARING_CHANNELS.contains(&channel.as_str()))
        {
            return Err(SettingsError::UnknownChannel(channel.clone()));
        }
        if self.reward_referred && self.positions_to_jump == 0 {
            return Err(SettingsError::Invalid(
                "referred-side promotion requires positions_to_jump > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Jump applied to the referred entrant, or `None` when that side is not promoted.
    pub fn referred_jump(&self) -> Option<u32> {
        (self.reward_referred && self.positions_to_jump > 0).then_some(self.positions_to_jump)
    }
}

/// Everything the engine reads about a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignSettings {
    pub referral: ReferralSettings,
    /// Signup capacity, enforced against the live entrant count.
    #[serde(default)]
    pub max_signups: Option<u32>,
}

impl From<ReferralSettings> for CampaignSettings {
    fn from(referral: ReferralSettings) -> Self {
        Self {
            referral,
            max_signups: None,
        }
    }
}

/// Source of campaign configuration.
pub trait SettingsProvider: Send + Sync {
    fn campaign_settings(&self, campaign: &CampaignId) -> Result<CampaignSettings, SettingsError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("campaign {0} is not configured")]
    UnknownCampaign(CampaignId),
    #[error("unknown sharing channel '{0}'")]
    UnknownChannel(String),
    #[error("invalid referral settings: {0}")]
    Invalid(String),
    #[error("settings store unavailable: {0}")]
    Unavailable(String),
}

/// Settings held in process, with an optional fallback for unconfigured campaigns.
#[derive(Debug, Default)]
pub struct InMemorySettingsProvider {
    campaigns: RwLock<HashMap<CampaignId, CampaignSettings>>,
    fallback: Option<CampaignSettings>,
}

impl InMemorySettingsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any campaign without explicit settings resolves to `fallback`.
    pub fn with_fallback(fallback: CampaignSettings) -> Result<Self, SettingsError> {
        fallback.referral.validate()?;
        Ok(Self {
            campaigns: RwLock::new(HashMap::new()),
            fallback: Some(fallback),
        })
    }

    pub fn configure(
        &self,
        campaign: CampaignId,
        settings: CampaignSettings,
    ) -> Result<(), SettingsError> {
        settings.referral.validate()?;
        let mut guard = self
            .campaigns
            .write()
            .map_err(|_| SettingsError::Unavailable("settings lock poisoned".to_string()))?;
        guard.insert(campaign, settings);
        Ok(())
    }
}

impl SettingsProvider for InMemorySettingsProvider {
    fn campaign_settings(&self, campaign: &CampaignId) -> Result<CampaignSettings, SettingsError> {
        let guard = self
            .campaigns
            .read()
            .map_err(|_| SettingsError::Unavailable("settings lock poisoned".to_string()))?;
        guard
            .get(campaign)
            .cloned()
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| SettingsError::UnknownCampaign(campaign.clone()))
    }
}
