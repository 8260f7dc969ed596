//! Shared wire/storage types for the campaign engine.
//!
//! Every other crate in the workspace depends on this one for the shapes
//! that cross a boundary (DB row, HTTP body, webhook payload). Nothing here
//! carries behavior beyond `as_str`/`parse` on the tagged enums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod provider;

// ---------------------------------------------------------------------------
// Campaign
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Running => "running",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Cancelled => "cancelled",
            CampaignStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(CampaignStatus::Running),
            "paused" => Some(CampaignStatus::Paused),
            "completed" => Some(CampaignStatus::Completed),
            "cancelled" => Some(CampaignStatus::Cancelled),
            "failed" => Some(CampaignStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::Cancelled | CampaignStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub list_id: String,
    pub from_number: String,
    pub provider_hint: Option<String>,
    pub bot_endpoint: String,
    pub total_contacts: i64,
    pub current_index: i64,
    pub processed_contacts: i64,
    pub connected_count: i64,
    pub failed_count: i64,
    pub status: CampaignStatus,
    pub heartbeat: Option<DateTime<Utc>>,
    pub runner_id: Option<String>,
    pub paused_at: Option<DateTime<Utc>>,
    pub resumed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<String>,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Liveness classification for `CampaignProgress`, per §6.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatHealth {
    Healthy,
    Stale,
    Inactive,
}

impl HeartbeatHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeartbeatHealth::Healthy => "healthy",
            HeartbeatHealth::Stale => "stale",
            HeartbeatHealth::Inactive => "inactive",
        }
    }

    /// Classify a heartbeat age against the healthy (<60s) / orphan (<OrphanThreshold)
    /// boundaries from §6.1.
    pub fn classify(age_secs: Option<i64>, orphan_threshold_secs: i64) -> Self {
        match age_secs {
            None => HeartbeatHealth::Inactive,
            Some(age) if age < 60 => HeartbeatHealth::Healthy,
            Some(age) if age < orphan_threshold_secs => HeartbeatHealth::Stale,
            Some(_) => HeartbeatHealth::Inactive,
        }
    }
}

// ---------------------------------------------------------------------------
// Contact
// ---------------------------------------------------------------------------

/// Opaque to the engine beyond these fields; never mutated during a campaign attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub index: i64,
    pub phone_number: String,
    pub first_name: Option<String>,
    pub custom_fields: serde_json::Value,
}

// ---------------------------------------------------------------------------
// ActiveCall
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Initiating,
    Warming,
    Ringing,
    Ongoing,
    Completed,
    Failed,
    Timeout,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Initiating => "initiating",
            CallState::Warming => "warming",
            CallState::Ringing => "ringing",
            CallState::Ongoing => "ongoing",
            CallState::Completed => "completed",
            CallState::Failed => "failed",
            CallState::Timeout => "timeout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initiating" => Some(CallState::Initiating),
            "warming" => Some(CallState::Warming),
            "ringing" => Some(CallState::Ringing),
            "ongoing" => Some(CallState::Ongoing),
            "completed" => Some(CallState::Completed),
            "failed" => Some(CallState::Failed),
            "timeout" => Some(CallState::Timeout),
            _ => None,
        }
    }

    /// Terminal states release the concurrency slot they hold (§4.3).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallState::Completed | CallState::Failed | CallState::Timeout
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    BotNotReady,
    ProviderRejected,
    NotAnswered,
    Timeout,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::BotNotReady => "bot_not_ready",
            FailureReason::ProviderRejected => "provider_rejected",
            FailureReason::NotAnswered => "not_answered",
            FailureReason::Timeout => "timeout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bot_not_ready" => Some(FailureReason::BotNotReady),
            "provider_rejected" => Some(FailureReason::ProviderRejected),
            "not_answered" => Some(FailureReason::NotAnswered),
            "timeout" => Some(FailureReason::Timeout),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveCall {
    pub call_id: Uuid,
    pub provider_call_ref: Option<String>,
    pub tenant_id: String,
    pub campaign_id: Option<Uuid>,
    pub contact_index: Option<i64>,
    pub from_number: String,
    pub to_number: String,
    pub provider: String,
    pub state: CallState,
    pub state_since: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<FailureReason>,
    pub billing_duration_secs: Option<i64>,
}

// ---------------------------------------------------------------------------
// Billing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingKind {
    Campaign,
    Test,
    Incoming,
}

impl BillingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingKind::Campaign => "campaign",
            BillingKind::Test => "test",
            BillingKind::Incoming => "incoming",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "campaign" => Some(BillingKind::Campaign),
            "test" => Some(BillingKind::Test),
            "incoming" => Some(BillingKind::Incoming),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingEntry {
    pub id: Uuid,
    pub tenant_id: String,
    pub call_id: Option<Uuid>,
    pub campaign_id: Option<Uuid>,
    pub kind: BillingKind,
    pub credits: i64,
    pub balance_after: i64,
    pub duration_seconds: i64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantBalance {
    pub tenant_id: String,
    pub available_balance: i64,
}
