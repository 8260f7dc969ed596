//! Credential & Provider Port (A): a narrow, provider-agnostic boundary
//! between the rest of the engine and Plivo/Twilio-style telephony APIs.
//!
//! Mirrors the teacher's `BrokerAdapter` boundary (`mqk-execution::order_router`):
//! callers never touch a concrete provider type, only `dyn ProviderAdapter`.
//! Unlike `BrokerAdapter`, every operation here does network I/O, so the
//! trait is async (`async-trait`, the same crate the teacher already pulls
//! in for `mqk-md::HistoricalProvider`).

use std::fmt;

use async_trait::async_trait;
use dialer_schemas::provider::{CallbackUrls, Credentials, NormalizedWebhook, ResolvedCredentials};
use uuid::Uuid;

pub mod paper;
pub mod plivo;
pub mod twilio;

pub use paper::PaperProvider;
pub use plivo::PlivoProvider;
pub use twilio::TwilioProvider;

/// Errors a [`ProviderAdapter`] may return from `place_call` or `normalize_webhook`.
#[derive(Debug)]
pub enum ProviderError {
    /// Transport failure, timeout, or non-2xx from the provider with no
    /// actionable reason — the caller should treat the attempt as retriable
    /// at a higher level (it still consumes a warmup/dial attempt).
    Unavailable(String),
    /// The provider understood the request and explicitly refused it
    /// (bad number, insufficient provider-side funds, blocked route, ...).
    Rejected(String),
    /// A webhook payload could not be parsed into a known shape.
    MalformedWebhook(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Unavailable(msg) => write!(f, "provider unavailable: {msg}"),
            ProviderError::Rejected(reason) => write!(f, "provider rejected call: {reason}"),
            ProviderError::MalformedWebhook(msg) => write!(f, "malformed webhook payload: {msg}"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Pluggable outbound-calling provider. Implementations must be `Send + Sync`
/// so a single adapter instance can be shared across runner tasks.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Short identifier used in `active_calls.provider` (e.g. `"plivo"`).
    fn name(&self) -> &'static str;

    /// Resolve credentials for `tenant_id`. Never fails on a missing tenant
    /// override — falls back to the process-wide default.
    async fn resolve_credentials(&self, tenant_id: &str) -> ResolvedCredentials;

    /// Place an outbound call. `callbacks` carries the three webhook URLs
    /// the provider must hit as the call progresses; the engine-side
    /// `callId` is embedded in each URL's path, not passed separately.
    async fn place_call(
        &self,
        credentials: &Credentials,
        from: &str,
        to: &str,
        callbacks: &CallbackUrls,
    ) -> Result<String, ProviderError>;

    /// Parse a raw webhook body (already decoded to JSON by the ingress
    /// handler, whatever the provider's native wire format) into the
    /// common shape. `call_id` comes from the URL path the webhook hit,
    /// not from the payload itself — providers don't know it's engine-side.
    fn normalize_webhook(
        &self,
        call_id: Uuid,
        raw_payload: &serde_json::Value,
    ) -> Result<NormalizedWebhook, ProviderError>;
}

/// Extracts the `{call_id}` path segment `CallbackUrls::for_call` embeds in
/// each of its three URLs. Used by adapters that derive a deterministic
/// provider-side reference from the callback URL rather than a free API call.
pub(crate) fn call_id_from_callback_url(url: &str) -> Option<Uuid> {
    let after = url.split("/calls/").nth(1)?;
    let segment = after.split('/').next()?;
    Uuid::parse_str(segment).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_id_round_trips_through_callback_url() {
        let id = Uuid::new_v4();
        let urls = CallbackUrls::for_call("https://engine.example.com", id);
        assert_eq!(call_id_from_callback_url(&urls.ring_url), Some(id));
        assert_eq!(call_id_from_callback_url(&urls.hangup_url), Some(id));
    }
}
