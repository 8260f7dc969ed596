//! Shared daemon state: DB pool, injected provider/contact adapters, engine
//! config, and the SSE broadcast bus. Grounded on `mqk-daemon::state::AppState`
//! — one `Arc<AppState>` handed to every axum handler via `State`.

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::broadcast;
use uuid::Uuid;

use dialer_config::EngineConfig;
use dialer_provider::ProviderAdapter;
use dialer_runner::{ContactSource, RunnerDeps};

use crate::api_types::CampaignProgressResponse;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { campaign_id: Uuid },
    Progress(CampaignProgressResponse),
}

pub struct AppState {
    pub pool: PgPool,
    pub provider: Arc<dyn ProviderAdapter>,
    pub contacts: Arc<dyn ContactSource>,
    pub config: EngineConfig,
    pub runner_id: String,
    pub webhook_base_url: String,
    pub http: reqwest::Client,
    pub bus: broadcast::Sender<BusMsg>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        provider: Arc<dyn ProviderAdapter>,
        contacts: Arc<dyn ContactSource>,
        config: EngineConfig,
        runner_id: String,
        webhook_base_url: String,
    ) -> Self {
        let (bus, _) = broadcast::channel(256);
        Self {
            pool,
            provider,
            contacts,
            config,
            runner_id,
            webhook_base_url,
            http: reqwest::Client::new(),
            bus,
        }
    }

    pub fn runner_deps(&self) -> Arc<RunnerDeps> {
        Arc::new(RunnerDeps {
            pool: self.pool.clone(),
            http: self.http.clone(),
            provider: Arc::clone(&self.provider),
            contacts: Arc::clone(&self.contacts),
            config: self.config.clone(),
            runner_id: self.runner_id.clone(),
            webhook_base_url: self.webhook_base_url.clone(),
        })
    }
}

static START: OnceLock<Instant> = OnceLock::new();

pub fn uptime_secs() -> u64 {
    START.get_or_init(Instant::now).elapsed().as_secs()
}
