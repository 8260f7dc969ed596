//! Axum router and Control API handlers (§6.1). Grounded on
//! `mqk-daemon::routes::build_router` — one `pub fn build_router`, handlers
//! `pub(crate)` so tests can compose the router directly without a listener.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use dialer_db::TransitionOutcome;
use dialer_schemas::provider::CallbackUrls;
use dialer_schemas::HeartbeatHealth;

use crate::api_types::{
    CampaignProgressResponse, CancelCampaignRequest, CreateCampaignRequest, CreateCampaignResponse,
    ErrorResponse, HealthResponse, OkResponse, ResumeResponse, SingleCallRequest, SingleCallResponse,
};
use crate::state::{uptime_secs, AppState, BusMsg};
use crate::webhook::webhook;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/campaigns", post(create_campaign))
        .route("/v1/campaigns/:id", get(campaign_progress))
        .route("/v1/campaigns/:id/pause", post(pause_campaign))
        .route("/v1/campaigns/:id/resume", post(resume_campaign))
        .route("/v1/campaigns/:id/cancel", post(cancel_campaign))
        .route("/v1/campaigns/:id/stream", get(stream))
        .route("/v1/calls", post(single_call))
        .route("/webhooks/calls/:call_id/:kind", post(webhook))
        .with_state(state)
}

async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: "dialer-daemon",
            uptime_secs: uptime_secs(),
        }),
    )
}

async fn create_campaign(
    State(st): State<Arc<AppState>>,
    Json(body): Json<CreateCampaignRequest>,
) -> Response {
    let total_contacts = match st.contacts.count(&body.list_id).await {
        Ok(n) => n,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: e.to_string() })).into_response();
        }
    };

    let campaign_id = Uuid::new_v4();
    if let Err(e) = dialer_db::insert_campaign(
        &st.pool,
        &dialer_db::NewCampaign {
            id: campaign_id,
            tenant_id: body.tenant_id,
            name: body.name,
            list_id: body.list_id,
            from_number: body.from_number,
            provider_hint: body.provider_hint,
            bot_endpoint: body.bot_endpoint,
            total_contacts,
        },
    )
    .await
    {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse { error: e.to_string() }))
            .into_response();
    }

    let deps = st.runner_deps();
    tokio::spawn(async move {
        if let Err(e) = dialer_runner::run_campaign(deps, campaign_id).await {
            tracing::warn!(%campaign_id, error = %e, "campaign run failed");
        }
    });

    (StatusCode::OK, Json(CreateCampaignResponse { campaign_id })).into_response()
}

async fn campaign_progress(State(st): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    let row = match dialer_db::fetch_campaign(&st.pool, id).await {
        Ok(row) => row,
        Err(_) => {
            return (StatusCode::NOT_FOUND, Json(ErrorResponse { error: "campaign not found".to_string() }))
                .into_response();
        }
    };

    let age_secs = row.heartbeat.map(|hb| (chrono::Utc::now() - hb).num_seconds().max(0));
    let health = HeartbeatHealth::classify(age_secs, st.config.orphan_threshold_ms / 1000);

    let resp = CampaignProgressResponse {
        campaign_id: row.id,
        status: row.status,
        current_index: row.current_index,
        total: row.total_contacts,
        processed: row.processed_contacts,
        connected: row.connected_count,
        failed: row.failed_count,
        heartbeat: row.heartbeat,
        heartbeat_health: health.as_str().to_string(),
        paused_at: row.paused_at,
        resumed_at: row.resumed_at,
    };

    let _ = st.bus.send(BusMsg::Progress(resp.clone()));
    (StatusCode::OK, Json(resp)).into_response()
}

async fn pause_campaign(State(st): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match dialer_db::pause_campaign(&st.pool, id).await {
        Ok(TransitionOutcome::Ok) => (StatusCode::OK, Json(OkResponse { ok: true })).into_response(),
        Ok(TransitionOutcome::InvalidState) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse { error: "campaign is not running".to_string() }),
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse { error: e.to_string() }))
            .into_response(),
    }
}

async fn resume_campaign(State(st): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match dialer_db::resume_campaign(&st.pool, id).await {
        Ok(TransitionOutcome::Ok) => {
            let deps = st.runner_deps();
            tokio::spawn(async move {
                if let Err(e) = dialer_runner::run_campaign(deps, id).await {
                    tracing::warn!(campaign_id = %id, error = %e, "resumed campaign run failed");
                }
            });

            let remaining = match dialer_db::fetch_campaign(&st.pool, id).await {
                Ok(row) => row.total_contacts - row.current_index,
                Err(_) => 0,
            };
            (StatusCode::OK, Json(ResumeResponse { ok: true, remaining })).into_response()
        }
        Ok(TransitionOutcome::InvalidState) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse { error: "campaign is not paused".to_string() }),
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse { error: e.to_string() }))
            .into_response(),
    }
}

async fn cancel_campaign(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<CancelCampaignRequest>,
) -> Response {
    let cancelled_by = body.cancelled_by.unwrap_or_else(|| "operator".to_string());

    match dialer_db::cancel_campaign(&st.pool, id, &cancelled_by).await {
        Ok(TransitionOutcome::Ok) => (StatusCode::OK, Json(OkResponse { ok: true })).into_response(),
        Ok(TransitionOutcome::InvalidState) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse { error: "campaign is already terminal".to_string() }),
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse { error: e.to_string() }))
            .into_response(),
    }
}

/// `SingleCall`: same admission/warmup/billing path as a campaign contact,
/// without a campaign row or cursor. Dialed once, not retried — unlike the
/// runner's contact loop, there is no next contact to fall through to.
async fn single_call(State(st): State<Arc<AppState>>, Json(body): Json<SingleCallRequest>) -> Response {
    let admitted = match dialer_registry::try_admit(
        &st.pool,
        dialer_registry::TryAdmitRequest {
            tenant_id: &body.tenant_id,
            campaign_id: None,
            contact_index: None,
            from_number: &body.from,
            to_number: &body.to,
            provider: st.provider.name(),
        },
        st.config.max_global_concurrent_calls,
        st.config.max_per_tenant_concurrent_calls,
    )
    .await
    {
        Ok(dialer_registry::TryAdmitOutcome::Admitted { call_id }) => call_id,
        Ok(dialer_registry::TryAdmitOutcome::ConcurrencyFull) => {
            return (StatusCode::TOO_MANY_REQUESTS, Json(ErrorResponse { error: "concurrency limit reached".to_string() }))
                .into_response();
        }
        Ok(dialer_registry::TryAdmitOutcome::InsufficientBalance) => {
            return (StatusCode::PAYMENT_REQUIRED, Json(ErrorResponse { error: "insufficient balance".to_string() }))
                .into_response();
        }
        Err(e) => {
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse { error: e.to_string() }))
                .into_response();
        }
    };

    let warmup = dialer_registry::warmup(
        &st.http,
        &st.pool,
        call_id,
        &body.bot_endpoint,
        st.config.warmup_max_attempts,
        st.config.warmup_backoff_ms as u64,
    )
    .await;

    if !matches!(warmup, Ok(dialer_registry::WarmupOutcome::Ok)) {
        return (StatusCode::OK, Json(SingleCallResponse { call_id })).into_response();
    }

    let callbacks = CallbackUrls::for_call(&st.webhook_base_url, call_id);
    let credentials = st.provider.resolve_credentials(&body.tenant_id).await;
    match st
        .provider
        .place_call(credentials.credentials(), &body.from, &body.to, &callbacks)
        .await
    {
        Ok(provider_call_ref) => {
            let _ = dialer_registry::mark_dialed(&st.pool, call_id, &provider_call_ref).await;
        }
        Err(_) => {
            let _ = dialer_registry::mark_dial_rejected(&st.pool, call_id).await;
        }
    }

    (StatusCode::OK, Json(SingleCallResponse { call_id })).into_response()
}

async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);
    Sse::new(events).keep_alive(KeepAlive::new()).into_response()
}

fn broadcast_to_sse(rx: broadcast::Receiver<BusMsg>) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::Progress(_) => "progress",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None,
        }
    })
}
