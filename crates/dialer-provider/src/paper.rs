//! Deterministic in-memory provider adapter, grounded on the teacher's
//! `mqk-broker-paper::PaperBroker`: no randomness, no wall-clock, a
//! provider-side reference derived purely from the call's own inputs.

use std::collections::BTreeSet;
use std::sync::Mutex;

use async_trait::async_trait;
use dialer_schemas::provider::{
    CallbackUrls, Credentials, NormalizedFields, NormalizedWebhook, ResolvedCredentials,
    WebhookEvent,
};
use uuid::Uuid;

use crate::{call_id_from_callback_url, ProviderAdapter, ProviderError};

/// Numbers in this set cause `place_call` to return `Rejected`, for exercising
/// the failure path in tests without any network dependency.
#[derive(Debug, Default)]
pub struct PaperProvider {
    rejected_numbers: Mutex<BTreeSet<String>>,
}

impl PaperProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_number(&self, to: impl Into<String>) {
        self.rejected_numbers.lock().unwrap().insert(to.into());
    }
}

#[async_trait]
impl ProviderAdapter for PaperProvider {
    fn name(&self) -> &'static str {
        "paper"
    }

    async fn resolve_credentials(&self, _tenant_id: &str) -> ResolvedCredentials {
        ResolvedCredentials::SystemDefault(Credentials {
            account_sid: "paper-account".to_string(),
            auth_token: "paper-token".to_string(),
        })
    }

    async fn place_call(
        &self,
        _credentials: &Credentials,
        _from: &str,
        to: &str,
        callbacks: &CallbackUrls,
    ) -> Result<String, ProviderError> {
        if self.rejected_numbers.lock().unwrap().contains(to) {
            return Err(ProviderError::Rejected("blocked test number".to_string()));
        }

        let call_id = call_id_from_callback_url(&callbacks.ring_url)
            .ok_or_else(|| ProviderError::Unavailable("malformed callback url".to_string()))?;
        Ok(format!("paper:call:{call_id}"))
    }

    fn normalize_webhook(
        &self,
        call_id: Uuid,
        raw_payload: &serde_json::Value,
    ) -> Result<NormalizedWebhook, ProviderError> {
        let event = match raw_payload.get("event").and_then(|v| v.as_str()) {
            Some("ring") => WebhookEvent::Ring,
            Some("answered") => WebhookEvent::Answered,
            Some("hangup") => WebhookEvent::Hangup,
            Some("recording") => WebhookEvent::Recording,
            other => {
                return Err(ProviderError::MalformedWebhook(format!(
                    "unknown event {other:?}"
                )))
            }
        };

        let fields = NormalizedFields {
            duration_seconds: raw_payload.get("duration_seconds").and_then(|v| v.as_i64()),
            hangup_cause: raw_payload
                .get("hangup_cause")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            recording_url: raw_payload
                .get("recording_url")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            provider_call_ref: raw_payload
                .get("provider_call_ref")
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn place_call_derives_reference_from_callback_url() {
        let provider = PaperProvider::new();
        let creds = Credentials {
            account_sid: "a".to_string(),
            auth_token: "b".to_string(),
        };
        let call_id = Uuid::new_v4();
        let callbacks = CallbackUrls::for_call("https://engine.example.com", call_id);

        let first = provider
            .place_call(&creds, "+10000000000", "+19999999999", &callbacks)
            .await
            .unwrap();
        let second = provider
            .place_call(&creds, "+10000000000", "+19999999999", &callbacks)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(first, format!("paper:call:{call_id}"));
    }

    #[tokio::test]
    async fn place_call_rejects_blocked_numbers() {
        let provider = PaperProvider::new();
        provider.reject_number("+19999999999");
        let creds = Credentials {
            account_sid: "a".to_string(),
            auth_token: "b".to_string(),
        };
        let callbacks = CallbackUrls::for_call("https://engine.example.com", Uuid::new_v4());

        let err = provider
            .place_call(&creds, "+10000000000", "+19999999999", &callbacks)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(_)));
    }

    #[test]
    fn normalize_webhook_parses_hangup_fields() {
        let provider = PaperProvider::new();
        let call_id = Uuid::new_v4();
        let payload = serde_json::json!({
            "event": "hangup",
            "duration_seconds": 42,
            "hangup_cause": "normal_clearing",
        });
        let normalized = provider.normalize_webhook(call_id, &payload).unwrap();
        assert_eq!(normalized.call_id, call_id);
        assert!(matches!(normalized.event, WebhookEvent::Hangup));
        assert_eq!(normalized.fields.duration_seconds, Some(42));
    }
}
