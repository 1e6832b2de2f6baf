use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use waitlist_rank::config::{ConfigError, EngineConfig};
use waitlist_rank::waitlist::{
    CampaignSettings, InMemoryEntrantRepository, InMemorySettingsProvider, RankingEngine,
    ReferralSettings, WaitlistService,
};

pub(crate) type MemoryService = WaitlistService<InMemoryEntrantRepository, InMemorySettingsProvider>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Wire an in-memory store behind the engine; every campaign falls back to `referral`.
pub(crate) fn in_memory_service(
    engine: EngineConfig,
    referral: ReferralSettings,
) -> Result<(MemoryService, Arc<InMemoryEntrantRepository>), ConfigError> {
    let repository = Arc::new(InMemoryEntrantRepository::new());
    let settings = InMemorySettingsProvider::with_fallback(CampaignSettings::from(referral))
        .map_err(|err| ConfigError::InvalidValue {
            name: "WAITLIST_POSITIONS_TO_JUMP",
            value: err.to_string(),
        })?;
    let engine = RankingEngine::new(repository.clone(), Arc::new(settings), engine);
    Ok((WaitlistService::new(Arc::new(engine)), repository))
}
