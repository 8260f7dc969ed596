//! Request/response bodies for the Control API (§6.1). Shapes are the
//! contract; the JSON field names are what `serde`'s default (camelCase via
//! `rename_all`) produces, independent of how the Rust fields are named.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCampaignRequest {
    pub tenant_id: String,
    pub name: String,
    pub list_id: String,
    pub from_number: String,
    pub provider_hint: Option<String>,
    pub bot_endpoint: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCampaignResponse {
    pub campaign_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResumeResponse {
    pub ok: bool,
    pub remaining: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CancelCampaignRequest {
    pub cancelled_by: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignProgressResponse {
    pub campaign_id: Uuid,
    pub status: String,
    pub current_index: i64,
    pub total: i64,
    pub processed: i64,
    pub connected: i64,
    pub failed: i64,
    pub heartbeat: Option<DateTime<Utc>>,
    pub heartbeat_health: String,
    pub paused_at: Option<DateTime<Utc>>,
    pub resumed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleCallRequest {
    pub tenant_id: String,
    pub from: String,
    pub to: String,
    pub bot_endpoint: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleCallResponse {
    pub call_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub uptime_secs: u64,
}
