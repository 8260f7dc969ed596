//! Provider Webhooks (ingress, §6.2): a stateless adapter from provider wire
//! format to `dialer_registry::on_event`. The `kind` path segment is purely
//! diagnostic — `normalize_webhook` determines the actual event from payload
//! content, since Plivo/Twilio both carry an explicit status field.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::api_types::{ErrorResponse, OkResponse};
use crate::state::AppState;

pub(crate) async fn webhook(
    State(st): State<Arc<AppState>>,
    Path((call_id, kind)): Path<(Uuid, String)>,
    Json(payload): Json<serde_json::Value>,
) -> Response {
    let normalized = match st.provider.normalize_webhook(call_id, &payload) {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(%call_id, %kind, error = %e, "webhook: malformed payload");
            return (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: e.to_string() })).into_response();
        }
    };

    match dialer_registry::on_event(&st.pool, call_id, normalized.event, &normalized.fields).await {
        Ok(outcome) => {
            tracing::info!(%call_id, %kind, ?outcome, "webhook: applied");
            (StatusCode::OK, Json(OkResponse { ok: true })).into_response()
        }
        Err(e) => {
            tracing::error!(%call_id, %kind, error = %e, "webhook: onEvent failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse { error: e.to_string() })).into_response()
        }
    }
}
