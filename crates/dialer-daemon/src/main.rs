//! dialer-daemon entry point.
//!
//! Thin by design: load config, connect the DB, build shared state, wire
//! middleware, serve. All handlers live in `routes.rs`/`webhook.rs`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use dialer_daemon::{routes, state::AppState};
use dialer_provider::ProviderAdapter;
use dialer_runner::{ContactSource, InMemoryContactSource};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let pool = dialer_db::connect_from_env().await.context("connect to postgres")?;
    dialer_db::migrate(&pool).await.context("run migrations")?;

    let config_paths = config_paths_from_env();
    let config_path_refs: Vec<&str> = config_paths.iter().map(String::as_str).collect();
    let loaded = dialer_config::load_layered_yaml(&config_path_refs).context("load engine config")?;
    let config = loaded.engine_config().context("materialize engine config")?;
    info!(config_hash = %loaded.config_hash, "engine config loaded");

    let provider: Arc<dyn ProviderAdapter> = build_provider();
    let contacts: Arc<dyn ContactSource> = build_contact_source()?;
    let runner_id = runner_id();
    let webhook_base_url = std::env::var("DIALER_WEBHOOK_BASE_URL")
        .unwrap_or_else(|_| "http://localhost:8899".to_string());

    let shared = Arc::new(AppState::new(pool, provider, contacts, config, runner_id, webhook_base_url));

    spawn_orphan_sweeper(&shared);
    spawn_reaper(&shared);

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_layer());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8899)));
    info!("dialer-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("DIALER_DAEMON_ADDR").ok()?.parse().ok()
}

fn cors_layer() -> CorsLayer {
    let allowed = ["http://localhost", "http://127.0.0.1", "http://localhost:3000", "http://127.0.0.1:3000"];
    let origins: Vec<HeaderValue> = allowed.iter().filter_map(|o| HeaderValue::from_str(o).ok()).collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}

fn config_paths_from_env() -> Vec<String> {
    std::env::var("DIALER_CONFIG_FILES")
        .ok()
        .map(|v| v.split(',').map(str::to_string).collect())
        .unwrap_or_else(|| vec!["config/default.yaml".to_string()])
}

fn build_provider() -> Arc<dyn ProviderAdapter> {
    match std::env::var("DIALER_PROVIDER").as_deref() {
        Ok("plivo") => Arc::new(dialer_provider::PlivoProvider::default()),
        Ok("twilio") => Arc::new(dialer_provider::TwilioProvider::default()),
        _ => Arc::new(dialer_provider::PaperProvider::new()),
    }
}

/// Loads a JSON map of `listId -> contacts` from `DIALER_CONTACTS_FILE`, if
/// set. Contact-list CRUD is out of scope; this is the narrowest possible
/// wiring that lets the daemon run end to end without it.
fn build_contact_source() -> anyhow::Result<Arc<dyn ContactSource>> {
    let Ok(path) = std::env::var("DIALER_CONTACTS_FILE") else {
        return Ok(Arc::new(InMemoryContactSource::new(HashMap::new())));
    };
    let raw = std::fs::read_to_string(&path).with_context(|| format!("read {path}"))?;
    let lists: HashMap<String, Vec<dialer_schemas::Contact>> =
        serde_json::from_str(&raw).with_context(|| format!("parse {path}"))?;
    Ok(Arc::new(InMemoryContactSource::new(lists)))
}

fn runner_id() -> String {
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string());
    format!("{hostname}:{}", std::process::id())
}

fn spawn_orphan_sweeper(state: &Arc<AppState>) {
    let deps = state.runner_deps();
    let interval_ms = state.config.orphan_threshold_ms.max(1_000) as u64;
    dialer_runner::spawn_orphan_sweeper(deps, Duration::from_millis(interval_ms));
}

/// Sole timeout authority (§4.3, §5): periodically reaps any active call that
/// has sat in `initiating`/`warming`/`ringing`/`ongoing` past its configured
/// timeout, releasing the admission slot it holds. Ticks on the shortest
/// configured timeout so no state can overshoot by more than one tick.
fn spawn_reaper(state: &Arc<AppState>) {
    let pool = state.pool.clone();
    let timeouts = state.config.call_state_timeouts_ms.clone();
    let interval_ms = timeouts.values().copied().min().unwrap_or(30_000).max(1_000) as u64;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            ticker.tick().await;
            match dialer_registry::reap(&pool, chrono::Utc::now(), &timeouts).await {
                Ok(n) if n > 0 => info!(reaped = n, "reaper: timed out stale calls"),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "reaper: sweep failed"),
            }
        }
    });
}
