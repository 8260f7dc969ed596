//! Plivo adapter: `reqwest`-based HTTP client, same client-per-adapter shape
//! as the teacher's `mqk-md::TwelveDataHistoricalProvider`.

use async_trait::async_trait;
use dialer_schemas::provider::{
    CallbackUrls, Credentials, NormalizedFields, NormalizedWebhook, ResolvedCredentials,
    WebhookEvent,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{ProviderAdapter, ProviderError};

#[derive(Debug, Clone)]
pub struct PlivoProvider {
    http: reqwest::Client,
    base_url: String,
}

impl PlivoProvider {
    pub fn new() -> Self {
        Self::new_with_base_url("https://api.plivo.com/v1".to_string())
    }

    pub fn new_with_base_url(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    fn call_create_url(&self, account_sid: &str) -> String {
        format!(
            "{}/Account/{}/Call/",
            self.base_url.trim_end_matches('/'),
            account_sid
        )
    }
}

impl Default for PlivoProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for PlivoProvider {
    fn name(&self) -> &'static str {
        "plivo"
    }

    async fn resolve_credentials(&self, _tenant_id: &str) -> ResolvedCredentials {
        // Tenant-specific Plivo sub-accounts are resolved by `dialer-config`'s
        // per-tenant overrides; the adapter itself has no credential store.
        ResolvedCredentials::SystemDefault(Credentials {
            account_sid: String::new(),
            auth_token: String::new(),
        })
    }

    async fn place_call(
        &self,
        credentials: &Credentials,
        from: &str,
        to: &str,
        callbacks: &CallbackUrls,
    ) -> Result<String, ProviderError> {
        let url = self.call_create_url(&credentials.account_sid);

        let resp = self
            .http
            .post(url)
            .basic_auth(&credentials.account_sid, Some(&credentials.auth_token))
            .form(&[
                ("from", from),
                ("to", to),
                ("answer_url", &callbacks.stream_start_url),
                ("ring_url", &callbacks.ring_url),
                ("hangup_url", &callbacks.hangup_url),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("plivo request failed: {e}")))?;

        let status = resp.status();
        let body: PlivoCallResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("plivo response decode failed: {e}")))?;

        if !status.is_success() {
            return Err(ProviderError::Rejected(
                body.error.unwrap_or_else(|| format!("http status {status}")),
            ));
        }

        body.request_uuid
            .ok_or_else(|| ProviderError::Unavailable("plivo response missing request_uuid".to_string()))
    }

    fn normalize_webhook(
        &self,
        call_id: Uuid,
        raw_payload: &serde_json::Value,
    ) -> Result<NormalizedWebhook, ProviderError> {
        let event_str = raw_payload
            .get("Event")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::MalformedWebhook("missing Event field".to_string()))?;

        let event = match event_str {
            "Ring" => WebhookEvent::Ring,
            "Answer" | "StartApp" => WebhookEvent::Answered,
            "Hangup" => WebhookEvent::Hangup,
            "Record" => WebhookEvent::Recording,
            other => {
                return Err(ProviderError::MalformedWebhook(format!(
                    "unknown plivo event {other}"
                )))
            }
        };

        let fields = NormalizedFields {
            duration_seconds: raw_payload
                .get("Duration")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<i64>().ok()),
            hangup_cause: raw_payload
                .get("HangupCause")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            recording_url: raw_payload
                .get("RecordUrl")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            provider_call_ref: raw_payload
                .get("CallUUID")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        };

        Ok(NormalizedWebhook {
            call_id,
            event,
            fields,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PlivoCallResponse {
    #[serde(default)]
    request_uuid: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_webhook_maps_hangup_event() {
        let provider = PlivoProvider::new();
        let call_id = Uuid::new_v4();
        let payload = serde_json::json!({
            "Event": "Hangup",
            "Duration": "17",
            "HangupCause": "NORMAL_CLEARING",
            "CallUUID": "plivo-uuid-1",
        });
        let normalized = provider.normalize_webhook(call_id, &payload).unwrap();
        assert!(matches!(normalized.event, WebhookEvent::Hangup));
        assert_eq!(normalized.fields.duration_seconds, Some(17));
        assert_eq!(normalized.fields.provider_call_ref.as_deref(), Some("plivo-uuid-1"));
    }

    #[test]
    fn normalize_webhook_rejects_unknown_event() {
        let provider = PlivoProvider::new();
        let payload = serde_json::json!({ "Event": "Something" });
        let err = provider.normalize_webhook(Uuid::new_v4(), &payload).unwrap_err();
        assert!(matches!(err, ProviderError::MalformedWebhook(_)));
    }
}
