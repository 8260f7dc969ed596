//! Provider-port wire types shared between `dialer-provider`, `dialer-registry`
//! and `dialer-daemon`'s webhook-ingress handlers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub account_sid: String,
    pub auth_token: String,
}

/// Returned by `resolveCredentials` when no tenant override exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResolvedCredentials {
    Tenant(Credentials),
    SystemDefault(Credentials),
}

impl ResolvedCredentials {
    pub fn credentials(&self) -> &Credentials {
        match self {
            ResolvedCredentials::Tenant(c) => c,
            ResolvedCredentials::SystemDefault(c) => c,
        }
    }
}

/// The three webhook URLs the engine publishes per call, keyed by `callId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackUrls {
    pub ring_url: String,
    pub stream_start_url: String,
    pub hangup_url: String,
}

impl CallbackUrls {
    pub fn for_call(base_url: &str, call_id: Uuid) -> Self {
        Self {
            ring_url: format!("{base_url}/webhooks/calls/{call_id}/ring"),
            stream_start_url: format!("{base_url}/webhooks/calls/{call_id}/stream-start"),
            hangup_url: format!("{base_url}/webhooks/calls/{call_id}/hangup"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEvent {
    Ring,
    Answered,
    Hangup,
    Recording,
}

/// Provider-specific numbers normalized into a common shape (§4.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizedFields {
    pub duration_seconds: Option<i64>,
    pub hangup_cause: Option<String>,
    pub recording_url: Option<String>,
    pub provider_call_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedWebhook {
    pub call_id: Uuid,
    pub event: WebhookEvent,
    pub fields: NormalizedFields,
}
