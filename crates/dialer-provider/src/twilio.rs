//! Twilio adapter: same `reqwest`-client-per-adapter shape as
//! [`crate::plivo::PlivoProvider`], different wire format.

use async_trait::async_trait;
use dialer_schemas::provider::{
    CallbackUrls, Credentials, NormalizedFields, NormalizedWebhook, ResolvedCredentials,
    WebhookEvent,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{ProviderAdapter, ProviderError};

#[derive(Debug, Clone)]
pub struct TwilioProvider {
    http: reqwest::Client,
    base_url: String,
}

impl TwilioProvider {
    pub fn new() -> Self {
        Self::new_with_base_url("https://api.twilio.com/2010-04-01".to_string())
    }

    pub fn new_with_base_url(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    fn calls_url(&self, account_sid: &str) -> String {
        format!(
            "{}/Accounts/{}/Calls.json",
            self.base_url.trim_end_matches('/'),
            account_sid
        )
    }
}

impl Default for TwilioProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for TwilioProvider {
    fn name(&self) -> &'static str {
        "twilio"
    }

    async fn resolve_credentials(&self, _tenant_id: &str) -> ResolvedCredentials {
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
        let url = self.calls_url(&credentials.account_sid);

        let resp = self
            .http
            .post(url)
            .basic_auth(&credentials.account_sid, Some(&credentials.auth_token))
            .form(&[
                ("From", from),
                ("To", to),
                ("Url", &callbacks.stream_start_url),
                ("StatusCallback", &callbacks.hangup_url),
                ("StatusCallbackEvent", "completed"),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("twilio request failed: {e}")))?;

        let status = resp.status();
        let body: TwilioCallResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("twilio response decode failed: {e}")))?;

        if !status.is_success() {
            return Err(ProviderError::Rejected(
                body.message.unwrap_or_else(|| format!("http status {status}")),
            ));
        }

        body.sid
            .ok_or_else(|| ProviderError::Unavailable("twilio response missing sid".to_string()))
    }

    fn normalize_webhook(
        &self,
        call_id: Uuid,
        raw_payload: &serde_json::Value,
    ) -> Result<NormalizedWebhook, ProviderError> {
        let status = raw_payload
            .get("CallStatus")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::MalformedWebhook("missing CallStatus field".to_string()))?;

        let event = match status {
            "ringing" => WebhookEvent::Ring,
            "in-progress" | "answered" => WebhookEvent::Answered,
            "completed" | "busy" | "failed" | "no-answer" | "canceled" => WebhookEvent::Hangup,
            other => {
                return Err(ProviderError::MalformedWebhook(format!(
                    "unknown twilio call status {other}"
                )))
            }
        };

        let fields = NormalizedFields {
            duration_seconds: raw_payload
                .get("CallDuration")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<i64>().ok()),
            hangup_cause: Some(status.to_string()),
            recording_url: raw_payload
                .get("RecordingUrl")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            provider_call_ref: raw_payload
                .get("CallSid")
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
struct TwilioCallResponse {
    #[serde(default)]
    sid: Option<String>,
    #[serde(default)]
    message: Option<String>,
}
