use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::config::EngineConfig;
use crate::waitlist::codes::CodeGenerator;
use crate::waitlist::domain::{
    CampaignId, Entrant, EntrantDraft, EntrantId, EntrantStatus, ReferralCode,
};
use crate::waitlist::filter::EntrantFilter;
use crate::waitlist::memory::InMemoryEntrantRepository;
use crate::waitlist::ranking::RankingEngine;
use crate::waitlist::repository::{
    CommitReceipt, EntrantRepository, LiveStats, RankingBatch, RepositoryError,
};
use crate::waitlist::service::WaitlistService;
use crate::waitlist::settings::{CampaignSettings, InMemorySettingsProvider, ReferralSettings};

pub(super) type MemoryEngine = RankingEngine<InMemoryEntrantRepository, InMemorySettingsProvider>;

pub(super) fn campaign() -> CampaignId {
    CampaignId::new("spring-launch")
}

pub(super) fn engine_config() -> EngineConfig {
    EngineConfig {
        conflict_retries: 3,
        retry_backoff_ms: 1,
        reward_timeout_ms: 2_000,
        code_length: 8,
        code_attempts: 5,
    }
}

/// Referrer-only rewards gated on verification.
pub(super) fn referral_settings(referrer_jump: u32) -> ReferralSettings {
    ReferralSettings {
        referrer_positions_to_jump: referrer_jump,
        ..ReferralSettings::default()
    }
}

pub(super) fn settings_provider(referral: ReferralSettings) -> Arc<InMemorySettingsProvider> {
    Arc::new(
        InMemorySettingsProvider::with_fallback(CampaignSettings::from(referral))
            .expect("valid referral settings"),
    )
}

pub(super) fn build_engine(
    referral: ReferralSettings,
) -> (Arc<MemoryEngine>, Arc<InMemoryEntrantRepository>) {
    let repository = Arc::new(InMemoryEntrantRepository::new());
    let engine = RankingEngine::new(
        repository.clone(),
        settings_provider(referral),
        engine_config(),
    );
    (Arc::new(engine), repository)
}

pub(super) fn build_service(
    referral: ReferralSettings,
) -> (
    WaitlistService<InMemoryEntrantRepository, InMemorySettingsProvider>,
    Arc<InMemoryEntrantRepository>,
) {
    let (engine, repository) = build_engine(referral);
    (WaitlistService::new(engine), repository)
}

pub(super) fn email(index: usize) -> String {
    format!("entrant{index:03}@example.com")
}

/// Sign up `count` unreferred entrants, returning them in queue order.
pub(super) fn seed<R, S>(
    engine: &RankingEngine<R, S>,
    campaign: &CampaignId,
    count: usize,
) -> Vec<Entrant>
where
    R: EntrantRepository + 'static,
    S: crate::waitlist::settings::SettingsProvider + 'static,
{
    (1..=count)
        .map(|index| {
            engine
                .register_signup(campaign, EntrantDraft::new(email(index)))
                .expect("seed signup")
        })
        .collect()
}

pub(super) fn position_of<R: EntrantRepository>(repository: &R, id: &EntrantId) -> u32 {
    repository
        .get_by_id(id)
        .expect("lookup succeeds")
        .expect("entrant present")
        .position
}

pub(super) fn live_positions<R: EntrantRepository>(
    repository: &R,
    campaign: &CampaignId,
) -> Vec<(u32, EntrantId)> {
    repository
        .list_live_ordered(campaign)
        .expect("list succeeds")
        .into_iter()
        .map(|entrant| (entrant.position, entrant.id))
        .collect()
}

/// In-memory repository whose commits can be scripted to fail.
#[derive(Debug, Default)]
pub(super) struct FlakyRepository {
    pub(super) inner: InMemoryEntrantRepository,
    conflicts: AtomicU32,
    outages: AtomicU32,
    commits: AtomicU32,
}

impl FlakyRepository {
    pub(super) fn conflicting(times: u32) -> Self {
        let repository = Self::default();
        repository.conflicts.store(times, Ordering::SeqCst);
        repository
    }

    pub(super) fn unavailable(times: u32) -> Self {
        let repository = Self::default();
        repository.outages.store(times, Ordering::SeqCst);
        repository
    }

    pub(super) fn commit_calls(&self) -> u32 {
        self.commits.load(Ordering::SeqCst)
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

impl EntrantRepository for FlakyRepository {
    fn insert(&self, entrant: Entrant, expected_revision: u64) -> Result<Entrant, RepositoryError> {
        self.inner.insert(entrant, expected_revision)
    }

    fn get_by_id(&self, id: &EntrantId) -> Result<Option<Entrant>, RepositoryError> {
        self.inner.get_by_id(id)
    }

    fn get_by_referral_code(
        &self,
        code: &ReferralCode,
    ) -> Result<Option<Entrant>, RepositoryError> {
        self.inner.get_by_referral_code(code)
    }

    fn get_by_email(
        &self,
        campaign: &CampaignId,
        email: &str,
    ) -> Result<Option<Entrant>, RepositoryError> {
        self.inner.get_by_email(campaign, email)
    }

    fn live_stats(&self, campaign: &CampaignId) -> Result<LiveStats, RepositoryError> {
        self.inner.live_stats(campaign)
    }

    fn list_live_ordered(&self, campaign: &CampaignId) -> Result<Vec<Entrant>, RepositoryError> {
        self.inner.list_live_ordered(campaign)
    }

    fn list_live_in_range(
        &self,
        campaign: &CampaignId,
        from: u32,
        to: u32,
    ) -> Result<Vec<Entrant>, RepositoryError> {
        self.inner.list_live_in_range(campaign, from, to)
    }

    fn commit(&self, batch: RankingBatch) -> Result<CommitReceipt, RepositoryError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        if Self::take(&self.conflicts) {
            return Err(RepositoryError::Conflict("injected conflict".to_string()));
        }
        if Self::take(&self.outages) {
            return Err(RepositoryError::Unavailable("connection reset".to_string()));
        }
        self.inner.commit(batch)
    }

    fn increment_counters(
        &self,
        id: &EntrantId,
        referral: bool,
        verified_referral: bool,
    ) -> Result<(), RepositoryError> {
        self.inner.increment_counters(id, referral, verified_referral)
    }

    fn mark_email_verified(&self, id: &EntrantId) -> Result<bool, RepositoryError> {
        self.inner.mark_email_verified(id)
    }

    fn set_status(
        &self,
        id: &EntrantId,
        status: EntrantStatus,
    ) -> Result<Entrant, RepositoryError> {
        self.inner.set_status(id, status)
    }

    fn soft_delete(&self, id: &EntrantId, at: DateTime<Utc>) -> Result<Entrant, RepositoryError> {
        self.inner.soft_delete(id, at)
    }

    fn leaderboard(
        &self,
        campaign: &CampaignId,
        limit: usize,
    ) -> Result<Vec<Entrant>, RepositoryError> {
        self.inner.leaderboard(campaign, limit)
    }

    fn search(
        &self,
        campaign: &CampaignId,
        filter: &EntrantFilter,
        limit: usize,
    ) -> Result<Vec<Entrant>, RepositoryError> {
        self.inner.search(campaign, filter, limit)
    }
}

pub(super) fn flaky_engine(
    repository: Arc<FlakyRepository>,
    referral: ReferralSettings,
) -> RankingEngine<FlakyRepository, InMemorySettingsProvider> {
    RankingEngine::new(repository, settings_provider(referral), engine_config())
}

/// Hands out a fixed list of codes, then repeats the last one.
pub(super) struct ScriptedCodes {
    codes: Mutex<Vec<&'static str>>,
}

impl ScriptedCodes {
    pub(super) fn new(codes: &[&'static str]) -> Self {
        let mut codes = codes.to_vec();
        codes.reverse();
        Self {
            codes: Mutex::new(codes),
        }
    }
}

impl CodeGenerator for ScriptedCodes {
    fn generate(&self, _length: usize) -> ReferralCode {
        let mut codes = self.codes.lock().expect("code script poisoned");
        let code = if codes.len() > 1 {
            codes.pop()
        } else {
            codes.last().copied()
        };
        ReferralCode(code.unwrap_or("FALLBACK").to_string())
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
