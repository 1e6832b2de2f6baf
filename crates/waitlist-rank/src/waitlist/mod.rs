//! Waitlist campaigns: signup intake, referral codes, ranking and the HTTP surface.

pub mod codes;
pub mod domain;
pub mod filter;
pub mod import;
pub mod memory;
pub mod ranking;
pub mod repository;
pub mod router;
pub mod service;
pub mod settings;

#[cfg(test)]
mod tests;

pub use codes::{parse_code, CodeGenerator, RandomCodeGenerator, ReferralCodeRegistry, RegistryError};
pub use domain::{
    CampaignId, Entrant, EntrantDraft, EntrantId, EntrantStatus, LeaderboardEntry,
    PublicPosition, ReferralCode,
};
pub use filter::EntrantFilter;
pub use import::{ReplayError, ReplaySummary, SignupReplay};
pub use memory::InMemoryEntrantRepository;
pub use ranking::{
    Deadline, DensityReport, ErrorKind, PositionChange, RankingEngine, RankingError,
    RecomputeResult, RecomputeSummary, RetryPolicy, RetryStrategy, RewardOutcome, SkipReason,
};
pub use repository::{
    CommitReceipt, CounterIncrement, EntrantRepository, LiveStats, PositionAssignment,
    RankingBatch, RepositoryError, UniqueField,
};
pub use router::waitlist_router;
pub use service::{
    PositionView, ServiceError, SignupReceipt, SignupRequest, VerificationOutcome,
    WaitlistService,
};
pub use settings::{
    CampaignSettings, InMemorySettingsProvider, ReferralSettings, SettingsError,
    SettingsProvider,
};
