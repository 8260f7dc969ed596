//! Command handler modules for the dialer CLI.
//!
//! Shared utilities used by multiple command paths live here. Command-specific
//! logic lives in the submodules. Every handler talks to `dialer-db` /
//! `dialer-registry` / `dialer-runner` directly — the CLI is the operator
//! entry point that does not go through the daemon's HTTP surface.

pub mod calls;
pub mod campaign;
pub mod db;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use dialer_provider::ProviderAdapter;
use dialer_schemas::Contact;

/// Loads a JSON map of `listId -> contacts` from disk, the same shape
/// `dialer-daemon`'s `DIALER_CONTACTS_FILE` expects.
pub fn load_contact_lists(path: &str) -> Result<HashMap<String, Vec<Contact>>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read {path}"))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {path}"))
}

/// Same provider-selection switch as `dialer-daemon::main::build_provider`,
/// so a CLI-placed single call uses the deployment's configured provider.
pub fn build_provider() -> Arc<dyn ProviderAdapter> {
    match std::env::var("DIALER_PROVIDER").as_deref() {
        Ok("plivo") => Arc::new(dialer_provider::PlivoProvider::default()),
        Ok("twilio") => Arc::new(dialer_provider::TwilioProvider::default()),
        _ => Arc::new(dialer_provider::PaperProvider::new()),
    }
}

pub fn webhook_base_url() -> String {
    std::env::var("DIALER_WEBHOOK_BASE_URL").unwrap_or_else(|_| "http://localhost:8899".to_string())
}
