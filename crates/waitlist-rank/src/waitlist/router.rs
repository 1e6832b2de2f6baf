use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use super::domain::{CampaignId, EntrantId};
use super::filter::EntrantFilter;
use super::ranking::{ErrorKind, RewardOutcome};
use super::repository::EntrantRepository;
use super::service::{PositionView, ServiceError, SignupRequest, WaitlistService};
use super::settings::SettingsProvider;

#[derive(Debug, Deserialize)]
pub(crate) struct LeaderboardQuery {
    pub(crate) limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchRequest {
    #[serde(default)]
    pub(crate) filter: EntrantFilter,
    #[serde(default = "default_search_limit")]
    pub(crate) limit: usize,
}

fn default_search_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
struct SignupView {
    entrant: PositionView,
    reward: Option<RewardOutcome>,
}

/// HTTP status for each error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict | ErrorKind::AlreadyRegistered | ErrorKind::CapacityExceeded => {
            StatusCode::CONFLICT
        }
        ErrorKind::InvalidInput => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::InvariantViolation => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: ServiceError) -> Response {
    let kind = error.kind();
    let payload = json!({
        "error": error.to_string(),
        "kind": kind.label(),
    });
    (status_for(kind), axum::Json(payload)).into_response()
}

fn parse_entrant(raw: &str) -> Result<EntrantId, Response> {
    raw.parse::<EntrantId>().map_err(|_| {
        let payload = json!({
            "error": format!("'{raw}' is not a valid entrant id"),
            "kind": ErrorKind::InvalidInput.label(),
        });
        (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(payload)).into_response()
    })
}

/// Run a service call on the blocking pool.
///
/// The engine waits on campaign locks and sleeps between conflict retries, neither of
/// which may happen on a runtime worker.
async fn run_blocking<R, S, T, F>(
    service: Arc<WaitlistService<R, S>>,
    call: F,
) -> Result<T, Response>
where
    R: EntrantRepository + 'static,
    S: SettingsProvider + 'static,
    T: Send + 'static,
    F: FnOnce(&WaitlistService<R, S>) -> Result<T, ServiceError> + Send + 'static,
{
    match tokio::task::spawn_blocking(move || call(&service)).await {
        Ok(result) => result.map_err(error_response),
        Err(join_error) => {
            error!(error = %join_error, "waitlist call did not complete");
            let payload = json!({
                "error": "waitlist call did not complete",
                "kind": "internal",
            });
            Err((StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response())
        }
    }
}

/// Router builder exposing signup, verification, position and moderation endpoints.
pub fn waitlist_router<R, S>(service: Arc<WaitlistService<R, S>>) -> Router
where
    R: EntrantRepository + 'static,
    S: SettingsProvider + 'static,
{
    Router::new()
        .route(
            "/api/v1/campaigns/:campaign_id/entrants",
            post(signup_handler::<R, S>),
        )
        .route(
            "/api/v1/campaigns/:campaign_id/leaderboard",
            get(leaderboard_handler::<R, S>),
        )
        .route(
            "/api/v1/campaigns/:campaign_id/search",
            post(search_handler::<R, S>),
        )
        .route(
            "/api/v1/campaigns/:campaign_id/recompute",
            post(recompute_handler::<R, S>),
        )
        .route(
            "/api/v1/campaigns/:campaign_id/audit",
            get(audit_handler::<R, S>),
        )
        .route(
            "/api/v1/entrants/:entrant_id",
            get(position_handler::<R, S>).delete(remove_handler::<R, S>),
        )
        .route(
            "/api/v1/entrants/:entrant_id/verify",
            post(verify_handler::<R, S>),
        )
        .route(
            "/api/v1/entrants/:entrant_id/block",
            post(block_handler::<R, S>),
        )
        .with_state(service)
}

pub(crate) async fn signup_handler<R, S>(
    State(service): State<Arc<WaitlistService<R, S>>>,
    Path(campaign_id): Path<String>,
    axum::Json(request): axum::Json<SignupRequest>,
) -> Response
where
    R: EntrantRepository + 'static,
    S: SettingsProvider + 'static,
{
    let campaign = CampaignId::new(campaign_id);
    let signup = run_blocking(service, move |service| {
        let receipt = service.signup(&campaign, request)?;
        let entrant = service.public_position(&receipt.entrant.id)?;
        Ok(SignupView {
            entrant,
            reward: receipt.reward,
        })
    })
    .await;
    match signup {
        Ok(view) => (StatusCode::CREATED, axum::Json(view)).into_response(),
        Err(response) => response,
    }
}

pub(crate) async fn position_handler<R, S>(
    State(service): State<Arc<WaitlistService<R, S>>>,
    Path(entrant_id): Path<String>,
) -> Response
where
    R: EntrantRepository + 'static,
    S: SettingsProvider + 'static,
{
    let id = match parse_entrant(&entrant_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match run_blocking(service, move |service| service.public_position(&id)).await {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(response) => response,
    }
}

pub(crate) async fn verify_handler<R, S>(
    State(service): State<Arc<WaitlistService<R, S>>>,
    Path(entrant_id): Path<String>,
) -> Response
where
    R: EntrantRepository + 'static,
    S: SettingsProvider + 'static,
{
    let id = match parse_entrant(&entrant_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match run_blocking(service, move |service| service.entrant_verified(&id)).await {
        Ok(outcome) => (StatusCode::OK, axum::Json(outcome)).into_response(),
        Err(response) => response,
    }
}

pub(crate) async fn leaderboard_handler<R, S>(
    State(service): State<Arc<WaitlistService<R, S>>>,
    Path(campaign_id): Path<String>,
    Query(query): Query<LeaderboardQuery>,
) -> Response
where
    R: EntrantRepository + 'static,
    S: SettingsProvider + 'static,
{
    let campaign = CampaignId::new(campaign_id);
    let lookup = campaign.clone();
    match run_blocking(service, move |service| service.leaderboard(&lookup, query.limit)).await {
        Ok(entries) => {
            let payload = json!({
                "campaign_id": campaign,
                "entries": entries,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(response) => response,
    }
}

pub(crate) async fn search_handler<R, S>(
    State(service): State<Arc<WaitlistService<R, S>>>,
    Path(campaign_id): Path<String>,
    axum::Json(request): axum::Json<SearchRequest>,
) -> Response
where
    R: EntrantRepository + 'static,
    S: SettingsProvider + 'static,
{
    let campaign = CampaignId::new(campaign_id);
    let search = run_blocking(service, move |service| {
        service.search(&campaign, &request.filter, request.limit)
    })
    .await;
    match search {
        Ok(entrants) => (StatusCode::OK, axum::Json(entrants)).into_response(),
        Err(response) => response,
    }
}

pub(crate) async fn recompute_handler<R, S>(
    State(service): State<Arc<WaitlistService<R, S>>>,
    Path(campaign_id): Path<String>,
) -> Response
where
    R: EntrantRepository + 'static,
    S: SettingsProvider + 'static,
{
    let campaign = CampaignId::new(campaign_id);
    match run_blocking(service, move |service| service.recompute(&campaign)).await {
        Ok(summary) => (StatusCode::OK, axum::Json(summary)).into_response(),
        Err(response) => response,
    }
}

pub(crate) async fn audit_handler<R, S>(
    State(service): State<Arc<WaitlistService<R, S>>>,
    Path(campaign_id): Path<String>,
) -> Response
where
    R: EntrantRepository + 'static,
    S: SettingsProvider + 'static,
{
    let campaign = CampaignId::new(campaign_id);
    match run_blocking(service, move |service| service.audit(&campaign)).await {
        Ok(report) => (StatusCode::OK, axum::Json(report)).into_response(),
        Err(response) => response,
    }
}

pub(crate) async fn block_handler<R, S>(
    State(service): State<Arc<WaitlistService<R, S>>>,
    Path(entrant_id): Path<String>,
) -> Response
where
    R: EntrantRepository + 'static,
    S: SettingsProvider + 'static,
{
    let id = match parse_entrant(&entrant_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match run_blocking(service, move |service| service.block(&id)).await {
        Ok(entrant) => {
            let payload = json!({
                "entrant_id": entrant.id,
                "status": entrant.status.label(),
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(response) => response,
    }
}

pub(crate) async fn remove_handler<R, S>(
    State(service): State<Arc<WaitlistService<R, S>>>,
    Path(entrant_id): Path<String>,
) -> Response
where
    R: EntrantRepository + 'static,
    S: SettingsProvider + 'static,
{
    let id = match parse_entrant(&entrant_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match run_blocking(service, move |service| service.remove(&id)).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(response) => response,
    }
}
