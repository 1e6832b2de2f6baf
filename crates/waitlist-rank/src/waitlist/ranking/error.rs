use serde::Serialize;

use crate::waitlist::codes::RegistryError;
use crate::waitlist::domain::CampaignId;
use crate::waitlist::repository::{RepositoryError, UniqueField};
use crate::waitlist::settings::SettingsError;

/// Taxonomy tag preserved as errors cross module and transport boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvariantViolation,
    CapacityExceeded,
    AlreadyRegistered,
    DeadlineExceeded,
    Unavailable,
    InvalidInput,
}

impl ErrorKind {
    pub const fn label(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvariantViolation => "invariant_violation",
            ErrorKind::CapacityExceeded => "capacity_exceeded",
            ErrorKind::AlreadyRegistered => "already_registered",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::InvalidInput => "invalid_input",
        }
    }
}

/// Error raised by the ranking engine.
#[derive(Debug, thiserror::Error)]
pub enum RankingError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("position conflict persisted after {attempts} attempts: {detail}")]
    Conflict { attempts: u32, detail: String },
    #[error("rank invariant violated: {0}")]
    InvariantViolation(String),
    #[error("campaign {campaign} reached its signup limit of {limit}")]
    CapacityExceeded { campaign: CampaignId, limit: u32 },
    #[error("{email} is already on the {campaign} waitlist")]
    AlreadyRegistered { campaign: CampaignId, email: String },
    #[error("deadline elapsed before the batch was committed")]
    DeadlineExceeded,
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl RankingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RankingError::NotFound(_) => ErrorKind::NotFound,
            RankingError::Conflict { .. } => ErrorKind::Conflict,
            RankingError::InvariantViolation(_) => ErrorKind::InvariantViolation,
            RankingError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            RankingError::AlreadyRegistered { .. } => ErrorKind::AlreadyRegistered,
            RankingError::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            RankingError::Unavailable(_) => ErrorKind::Unavailable,
            RankingError::InvalidInput(_) => ErrorKind::InvalidInput,
        }
    }

    pub(crate) fn conflict(detail: impl Into<String>) -> Self {
        RankingError::Conflict {
            attempts: 1,
            detail: detail.into(),
        }
    }
}

impl From<RepositoryError> for RankingError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound => RankingError::NotFound("entrant".to_string()),
            RepositoryError::Conflict(detail) | RepositoryError::Rejected(detail) => {
                RankingError::conflict(detail)
            }
            RepositoryError::Duplicate(UniqueField::Position) => {
                RankingError::conflict("position already taken")
            }
            RepositoryError::Duplicate(field) => {
                RankingError::InvalidInput(format!("duplicate {}", field.label()))
            }
            RepositoryError::Unavailable(detail) => RankingError::Unavailable(detail),
        }
    }
}

impl From<SettingsError> for RankingError {
    fn from(value: SettingsError) -> Self {
        match value {
            SettingsError::UnknownCampaign(campaign) => {
                RankingError::NotFound(format!("campaign {campaign}"))
            }
            SettingsError::Unavailable(detail) => RankingError::Unavailable(detail),
            other => RankingError::InvalidInput(other.to_string()),
        }
    }
}

impl From<RegistryError> for RankingError {
    fn from(value: RegistryError) -> Self {
        match value {
            RegistryError::NotFound(code) => RankingError::NotFound(format!("referral code {code}")),
            RegistryError::Exhausted { attempts } => RankingError::Unavailable(format!(
                "no unique referral code after {attempts} attempts"
            )),
            RegistryError::Repository(err) => err.into(),
        }
    }
}
