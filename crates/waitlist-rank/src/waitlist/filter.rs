//! Composable entrant predicates for moderation and search listings.
//!
//! Filters are plain values combined with [`EntrantFilter::and`], [`EntrantFilter::or`] and
//! [`EntrantFilter::negate`]; storage backends evaluate them with
//! [`EntrantFilter::matches`] or translate them into their own query language. The
//! ranking engine never uses them, its reads stay on the dedicated range queries.

use serde::{Deserialize, Serialize};

use super::domain::{normalize_email, Entrant, EntrantId, EntrantStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EntrantFilter {
    #[default]
    Any,
    Live,
    Deleted,
    Status { status: EntrantStatus },
    EmailVerified { verified: bool },
    ReferredBy { referrer: EntrantId },
    MinReferrals { count: u32 },
    PositionBetween { from: u32, to: u32 },
    EmailDomain { domain: String },
    And { filters: Vec<EntrantFilter> },
    Or { filters: Vec<EntrantFilter> },
    Not { filter: Box<EntrantFilter> },
}

impl EntrantFilter {
    pub fn status(status: EntrantStatus) -> Self {
        EntrantFilter::Status { status }
    }

    pub fn verified(verified: bool) -> Self {
        EntrantFilter::EmailVerified { verified }
    }

    pub fn referred_by(referrer: EntrantId) -> Self {
        EntrantFilter::ReferredBy { referrer }
    }

    pub fn min_referrals(count: u32) -> Self {
        EntrantFilter::MinReferrals { count }
    }

    pub fn position_between(from: u32, to: u32) -> Self {
        EntrantFilter::PositionBetween { from, to }
    }

    pub fn email_domain(domain: impl AsRef<str>) -> Self {
        EntrantFilter::EmailDomain {
            domain: normalize_email(domain.as_ref()),
        }
    }

    /// Conjunction; nested conjunctions are flattened.
    pub fn and(self, other: EntrantFilter) -> Self {
        match (self, other) {
            (EntrantFilter::Any, other) | (other, EntrantFilter::Any) => other,
            (EntrantFilter::And { mut filters }, EntrantFilter::And { filters: rest }) => {
                filters.extend(rest);
                EntrantFilter::And { filters }
            }
            (EntrantFilter::And { mut filters }, other) => {
                filters.push(other);
                EntrantFilter::And { filters }
            }
            (left, right) => EntrantFilter::And {
                filters: vec![left, right],
            },
        }
    }

    pub fn or(self, other: EntrantFilter) -> Self {
        match (self, other) {
            (EntrantFilter::Or { mut filters }, other) => {
                filters.push(other);
                EntrantFilter::Or { filters }
            }
            (left, right) => EntrantFilter::Or {
                filters: vec![left, right],
            },
        }
    }

    pub fn negate(self) -> Self {
        match self {
            EntrantFilter::Not { filter } => *filter,
            other => EntrantFilter::Not {
                filter: Box::new(other),
            },
        }
    }

    pub fn matches(&self, entrant: &Entrant) -> bool {
        match self {
            EntrantFilter::Any => true,
            EntrantFilter::Live => entrant.is_live(),
            EntrantFilter::Deleted => entrant.deleted_at.is_some(),
            EntrantFilter::Status { status } => entrant.status == *status,
            EntrantFilter::EmailVerified { verified } => entrant.email_verified == *verified,
            EntrantFilter::ReferredBy { referrer } => entrant.referred_by == Some(*referrer),
            EntrantFilter::MinReferrals { count } => entrant.referral_count >= *count,
            EntrantFilter::PositionBetween { from, to } => {
                (*from..=*to).contains(&entrant.position)
            }
            EntrantFilter::EmailDomain { domain } => entrant
                .email
                .rsplit_once('@')
                .is_some_and(|(_, host)| host == domain.as_str()),
            EntrantFilter::And { filters } => filters.iter().all(|filter| filter.matches(entrant)),
            EntrantFilter::Or { filters } => filters.iter().any(|filter| filter.matches(entrant)),
            EntrantFilter::Not { filter } => !filter.matches(entrant),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waitlist::domain::{CampaignId, ReferralCode};
    use chrono::Utc;

    fn entrant(position: u32, email: &str, referrals: u32) -> Entrant {
        Entrant {
            id: EntrantId::generate(),
            campaign_id: CampaignId::new("launch"),
            email: email.to_string(),
            position,
            original_position: position,
            referral_code: ReferralCode(format!("code{position}")),
            referred_by: None,
            referral_count: referrals,
            verified_referral_count: 0,
            email_verified: false,
            reward_applied: false,
            status: EntrantStatus::Pending,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn and_flattens_and_skips_any() {
        let filter = EntrantFilter::Any
            .and(EntrantFilter::Live)
            .and(EntrantFilter::min_referrals(2))
            .and(EntrantFilter::verified(false));
        match &filter {
            EntrantFilter::And { filters } => assert_eq!(filters.len(), 3),
            other => panic!("expected flattened conjunction, got {other:?}"),
        }
        assert!(filter.matches(&entrant(3, "a@example.com", 2)));
        assert!(!filter.matches(&entrant(3, "a@example.com", 1)));
    }

    #[test]
    fn composes_domain_range_and_negation() {
        let filter = EntrantFilter::email_domain("Example.com")
            .and(EntrantFilter::position_between(1, 10))
            .or(EntrantFilter::min_referrals(5));
        assert!(filter.matches(&entrant(4, "b@example.com", 0)));
        assert!(!filter.matches(&entrant(40, "b@example.com", 0)));
        assert!(filter.matches(&entrant(40, "b@other.org", 7)));
        assert!(filter.clone().negate().matches(&entrant(40, "b@other.org", 0)));
        assert_eq!(filter.clone().negate().negate(), filter);
    }

    #[test]
    fn serializes_as_tagged_tree() {
        let filter = EntrantFilter::Live.and(EntrantFilter::status(EntrantStatus::Verified));
        let json = serde_json::to_value(&filter).expect("filter serializes");
        assert_eq!(json["op"], "and");
        assert_eq!(json["filters"][1]["status"], "verified");
    }
}
