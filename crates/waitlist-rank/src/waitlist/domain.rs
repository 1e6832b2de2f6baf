use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier wrapper for a waitlist campaign.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CampaignId(pub String);

impl CampaignId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque, immutable entrant identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntrantId(pub Uuid);

impl EntrantId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for EntrantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for EntrantId {
    type Err = uuid::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value.trim()).map(Self)
    }
}

/// Unique, URL-safe token identifying an entrant as a referrer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReferralCode(pub String);

impl ReferralCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReferralCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Moderation status. Blocked entrants keep their row but leave the ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrantStatus {
    Pending,
    Verified,
    Blocked,
}

impl EntrantStatus {
    pub const fn label(self) -> &'static str {
        match self {
            EntrantStatus::Pending => "pending",
            EntrantStatus::Verified => "verified",
            EntrantStatus::Blocked => "blocked",
        }
    }
}

/// Caller supplied data for a new signup, before a position is assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrantDraft {
    pub email: String,
    #[serde(default)]
    pub referred_by: Option<EntrantId>,
}

impl EntrantDraft {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            referred_by: None,
        }
    }

    pub fn referred_by(mut self, referrer: EntrantId) -> Self {
        self.referred_by = Some(referrer);
        self
    }
}

/// Lower-cases and trims an address so lookups are case-insensitive.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// One waitlist signup within a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entrant {
    pub id: EntrantId,
    pub campaign_id: CampaignId,
    pub email: String,
    pub position: u32,
    pub original_position: u32,
    pub referral_code: ReferralCode,
    /// Weak reference; the referrer may since have been deleted.
    pub referred_by: Option<EntrantId>,
    pub referral_count: u32,
    pub verified_referral_count: u32,
    pub email_verified: bool,
    /// Set once the reward for this entrant's referral has been committed.
    pub reward_applied: bool,
    pub status: EntrantStatus,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Entrant {
    /// Live entrants participate in ranking: not soft-deleted and not blocked.
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none() && self.status != EntrantStatus::Blocked
    }

    /// Ranks gained since signup; negative when displaced behind the original slot.
    pub fn positions_gained(&self) -> i64 {
        i64::from(self.original_position) - i64::from(self.position)
    }

    pub fn public_view(&self, points_per_referral: u32) -> PublicPosition {
        PublicPosition {
            entrant_id: self.id,
            position: self.position,
            original_position: self.original_position,
            positions_gained: self.positions_gained(),
            referral_count: self.referral_count,
            verified_referral_count: self.verified_referral_count,
            referral_points: self.referral_count.saturating_mul(points_per_referral),
            referral_code: self.referral_code.clone(),
            status: self.status.label(),
        }
    }
}

/// Sanitized representation of an entrant's place in line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicPosition {
    pub entrant_id: EntrantId,
    pub position: u32,
    pub original_position: u32,
    pub positions_gained: i64,
    pub referral_count: u32,
    pub verified_referral_count: u32,
    pub referral_points: u32,
    pub referral_code: ReferralCode,
    pub status: &'static str,
}

/// Leaderboard row; email is masked for public display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub entrant_id: EntrantId,
    pub display_email: String,
    pub position: u32,
    pub referral_count: u32,
}

/// Masks the local part of an address, keeping its first character.
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{first}***@{domain}")
        }
        None => "***".to_string(),
    }
}
