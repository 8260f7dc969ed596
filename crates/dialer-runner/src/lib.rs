//! Campaign Runner (F) and Heartbeat/Orphan Detector (D).
//!
//! One [`run_campaign`] call drives exactly one campaign's contact loop from
//! wherever `currentIndex` left off to completion, pause, or cancellation.
//! The outer loop never holds a lock across an `.await`: every state change
//! is a single conditional update in `dialer_db`, the same discipline the
//! teacher's `mqk-cli::commands::run` handlers use for run lifecycle calls.
//! [`spawn_heartbeat`] and [`spawn_orphan_sweeper`] are `tokio::spawn`ed
//! periodic tasks, structurally identical to `mqk-daemon::state::spawn_heartbeat`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use uuid::Uuid;

use dialer_config::EngineConfig;
use dialer_db::{AdvanceOutcome, ClaimOutcome, CounterDelta, TransitionOutcome};
use dialer_provider::ProviderAdapter;
use dialer_schemas::provider::CallbackUrls;
use dialer_schemas::{CampaignStatus, Contact};

/// Interface to the out-of-scope contact-list collaborator: the engine only
/// ever reads contacts by `(listId, index)`, never writes them.
#[async_trait]
pub trait ContactSource: Send + Sync {
    async fn load_page(&self, list_id: &str, from_index: i64, page_size: i64) -> anyhow::Result<Vec<Contact>>;

    /// Total contacts in `list_id`, used once at campaign creation to set the
    /// immutable `totalContacts` counter — `CreateCampaign` itself doesn't
    /// carry a count, since contact-list CRUD is the out-of-scope collaborator.
    async fn count(&self, list_id: &str) -> anyhow::Result<i64>;
}

/// Deterministic in-memory [`ContactSource`], the runner's equivalent of
/// `mqk-broker-paper::PaperBroker` — no randomness, no I/O, used for tests
/// and for the paper provider's demo wiring.
pub struct InMemoryContactSource {
    lists: HashMap<String, Vec<Contact>>,
}

impl InMemoryContactSource {
    pub fn new(lists: HashMap<String, Vec<Contact>>) -> Self {
        Self { lists }
    }

    pub fn single_list(list_id: impl Into<String>, contacts: Vec<Contact>) -> Self {
        let mut lists = HashMap::new();
        lists.insert(list_id.into(), contacts);
        Self { lists }
    }
}

#[async_trait]
impl ContactSource for InMemoryContactSource {
    async fn load_page(&self, list_id: &str, from_index: i64, page_size: i64) -> anyhow::Result<Vec<Contact>> {
        let Some(all) = self.lists.get(list_id) else {
            return Ok(Vec::new());
        };
        let start = from_index.max(0) as usize;
        let end = (start + page_size.max(0) as usize).min(all.len());
        Ok(if start >= all.len() {
            Vec::new()
        } else {
            all[start..end].to_vec()
        })
    }

    async fn count(&self, list_id: &str) -> anyhow::Result<i64> {
        Ok(self.lists.get(list_id).map(|l| l.len() as i64).unwrap_or(0))
    }
}

pub struct RunnerDeps {
    pub pool: sqlx::PgPool,
    pub http: reqwest::Client,
    pub provider: Arc<dyn ProviderAdapter>,
    pub contacts: Arc<dyn ContactSource>,
    pub config: EngineConfig,
    pub runner_id: String,
    pub webhook_base_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Paused,
    Cancelled,
    OutOfCredit,
    LostOwnership,
}

/// §4.6 step 1: claim runnership, then drive the contact loop until the
/// campaign leaves `running` for any reason. Returns `LostOwnership` without
/// touching the campaign further if another runner already holds it.
pub async fn run_campaign(deps: Arc<RunnerDeps>, campaign_id: Uuid) -> anyhow::Result<RunOutcome> {
    let claim = dialer_db::claim_runnership(
        &deps.pool,
        campaign_id,
        &deps.runner_id,
        CampaignStatus::Running,
        deps.config.orphan_threshold_ms,
    )
    .await?;

    if claim == ClaimOutcome::Conflict {
        return Ok(RunOutcome::LostOwnership);
    }
    tracing::info!(%campaign_id, runner_id = %deps.runner_id, "runner: claimed campaign");

    let heartbeat_handle = spawn_heartbeat(
        deps.pool.clone(),
        campaign_id,
        deps.runner_id.clone(),
        StdDuration::from_millis(deps.config.heartbeat_interval_ms as u64),
    );

    let outcome = contact_loop(&deps, campaign_id).await;
    heartbeat_handle.abort();

    match &outcome {
        Ok(o) => tracing::info!(%campaign_id, ?o, "runner: exited"),
        Err(e) => tracing::warn!(%campaign_id, error = %e, "runner: exited with error"),
    }
    outcome
}

async fn contact_loop(deps: &RunnerDeps, campaign_id: Uuid) -> anyhow::Result<RunOutcome> {
    loop {
        let campaign = dialer_db::fetch_campaign(&deps.pool, campaign_id).await?;

        match campaign.status_enum() {
            Some(CampaignStatus::Paused) => return Ok(RunOutcome::Paused),
            Some(CampaignStatus::Cancelled) => return Ok(RunOutcome::Cancelled),
            Some(CampaignStatus::Completed) | Some(CampaignStatus::Failed) => {
                return Ok(RunOutcome::Completed);
            }
            Some(CampaignStatus::Running) => {}
            None => anyhow::bail!("campaign {campaign_id} has unrecognized status {}", campaign.status),
        }

        dialer_db::heartbeat_campaign(&deps.pool, campaign_id, &deps.runner_id).await?;

        if campaign.current_index >= campaign.total_contacts {
            if dialer_db::complete_campaign(&deps.pool, campaign_id).await? == TransitionOutcome::Ok {
                dialer_billing::complete_campaign_ledger(&deps.pool, &campaign.tenant_id, campaign_id).await?;
            }
            return Ok(RunOutcome::Completed);
        }

        let mut page = deps
            .contacts
            .load_page(&campaign.list_id, campaign.current_index, 1)
            .await?;
        let Some(contact) = page.pop() else {
            // List shorter than `totalContacts` recorded at creation: nothing
            // left to dial, but the cursor hasn't caught up. Treat as done.
            if dialer_db::complete_campaign(&deps.pool, campaign_id).await? == TransitionOutcome::Ok {
                dialer_billing::complete_campaign_ledger(&deps.pool, &campaign.tenant_id, campaign_id).await?;
            }
            return Ok(RunOutcome::Completed);
        };

        match step_one_contact(deps, &campaign, &contact).await? {
            StepOutcome::Advanced => {}
            StepOutcome::StaleCursor => continue,
            StepOutcome::Backpressure => {
                tokio::time::sleep(StdDuration::from_millis(deps.config.backpressure_sleep_ms as u64)).await;
                continue;
            }
            StepOutcome::OutOfCredit => {
                dialer_db::auto_pause_out_of_credit(&deps.pool, campaign_id).await?;
                return Ok(RunOutcome::OutOfCredit);
            }
        }

        if deps.config.inter_call_pacing_ms > 0 {
            tokio::time::sleep(StdDuration::from_millis(deps.config.inter_call_pacing_ms as u64)).await;
        }
    }
}

enum StepOutcome {
    Advanced,
    StaleCursor,
    Backpressure,
    OutOfCredit,
}

/// §4.6 step 3 (b)-(e): one contact through tryAdmit → warmup → placeCall →
/// advanceCursor. `connectedCount` reflects a successful dial at this point,
/// not a later `Answered` webhook — the outer loop never waits on G.
async fn step_one_contact(
    deps: &RunnerDeps,
    campaign: &dialer_db::CampaignRow,
    contact: &Contact,
) -> anyhow::Result<StepOutcome> {
    let provider_name = campaign.provider_hint.as_deref().unwrap_or(deps.provider.name());

    let admitted = dialer_registry::try_admit(
        &deps.pool,
        dialer_registry::TryAdmitRequest {
            tenant_id: &campaign.tenant_id,
            campaign_id: Some(campaign.id),
            contact_index: Some(contact.index),
            from_number: &campaign.from_number,
            to_number: &contact.phone_number,
            provider: provider_name,
        },
        deps.config.max_global_concurrent_calls,
        deps.config.max_per_tenant_concurrent_calls,
    )
    .await?;

    let call_id = match admitted {
        dialer_registry::TryAdmitOutcome::Admitted { call_id } => call_id,
        dialer_registry::TryAdmitOutcome::ConcurrencyFull => return Ok(StepOutcome::Backpressure),
        dialer_registry::TryAdmitOutcome::InsufficientBalance => return Ok(StepOutcome::OutOfCredit),
    };

    let mut delta = CounterDelta::default();

    let warmup = dialer_registry::warmup(
        &deps.http,
        &deps.pool,
        call_id,
        &campaign.bot_endpoint,
        deps.config.warmup_max_attempts,
        deps.config.warmup_backoff_ms as u64,
    )
    .await?;

    if warmup == dialer_registry::WarmupOutcome::BotNotReady {
        delta.failed = 1;
    } else {
        match place_call_with_retry(deps, campaign, call_id, contact).await? {
            Ok(provider_call_ref) => {
                dialer_registry::mark_dialed(&deps.pool, call_id, &provider_call_ref).await?;
                delta.connected = 1;
            }
            Err(()) => {
                dialer_registry::mark_dial_rejected(&deps.pool, call_id).await?;
                delta.failed = 1;
            }
        }
    }

    match dialer_db::advance_cursor(&deps.pool, campaign.id, campaign.current_index, delta).await? {
        AdvanceOutcome::Ok => Ok(StepOutcome::Advanced),
        AdvanceOutcome::StaleCursor => Ok(StepOutcome::StaleCursor),
    }
}

/// Retries `ProviderError::Unavailable` up to `ProviderRetryMax` times; any
/// other error (or exhausted retries) is a terminal dial failure for this
/// contact, never a backoff of the whole loop.
async fn place_call_with_retry(
    deps: &RunnerDeps,
    campaign: &dialer_db::CampaignRow,
    call_id: Uuid,
    contact: &Contact,
) -> anyhow::Result<Result<String, ()>> {
    let callbacks = CallbackUrls::for_call(&deps.webhook_base_url, call_id);
    let credentials = deps.provider.resolve_credentials(&campaign.tenant_id).await;

    let mut attempts_left = deps.config.provider_retry_max + 1;
    loop {
        attempts_left -= 1;
        match deps
            .provider
            .place_call(credentials.credentials(), &campaign.from_number, &contact.phone_number, &callbacks)
            .await
        {
            Ok(provider_call_ref) => return Ok(Ok(provider_call_ref)),
            Err(dialer_provider::ProviderError::Unavailable(msg)) if attempts_left > 0 => {
                tracing::warn!(%call_id, error = %msg, "runner: provider unavailable, retrying");
            }
            Err(_) => return Ok(Err(())),
        }
    }
}

/// §4.6 heartbeat: owner-only periodic writer, grounded on
/// `mqk-daemon::state::spawn_heartbeat`'s `tokio::time::interval` loop.
pub fn spawn_heartbeat(
    pool: sqlx::PgPool,
    campaign_id: Uuid,
    runner_id: String,
    interval: StdDuration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            if let Err(e) = dialer_db::heartbeat_campaign(&pool, campaign_id, &runner_id).await {
                tracing::warn!(%campaign_id, error = %e, "runner: heartbeat write failed");
            }
        }
    })
}

/// §4.5 sweep: periodically looks for `running` campaigns whose heartbeat has
/// gone stale and attempts `claimRunnership` on each; a successful claim
/// spawns a fresh [`run_campaign`] task from `currentIndex`. Grounded on the
/// teacher's `mqk-db::deadman_expired`/`enforce_deadman_or_halt` pair —
/// read-only detection followed by a conditional claim, never a forced write.
pub fn spawn_orphan_sweeper(deps: Arc<RunnerDeps>, interval: StdDuration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let stale = match dialer_db::sweep_stale_campaigns(&deps.pool, deps.config.orphan_threshold_ms).await {
                Ok(ids) => ids,
                Err(e) => {
                    tracing::warn!(error = %e, "orphan sweeper: scan failed");
                    continue;
                }
            };

            for campaign_id in stale {
                let deps = Arc::clone(&deps);
                tokio::spawn(async move {
                    tracing::info!(%campaign_id, "orphan sweeper: attempting takeover");
                    if let Err(e) = run_campaign(deps, campaign_id).await {
                        tracing::warn!(%campaign_id, error = %e, "orphan sweeper: takeover run failed");
                    }
                });
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(index: i64, phone: &str) -> Contact {
        Contact {
            index,
            phone_number: phone.to_string(),
            first_name: None,
            custom_fields: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn in_memory_contact_source_pages_from_an_index() {
        let source = InMemoryContactSource::single_list(
            "list-1",
            vec![contact(0, "+1"), contact(1, "+2"), contact(2, "+3")],
        );

        let page = source.load_page("list-1", 1, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].phone_number, "+2");
    }

    #[tokio::test]
    async fn in_memory_contact_source_returns_empty_past_the_end() {
        let source = InMemoryContactSource::single_list("list-1", vec![contact(0, "+1")]);
        let page = source.load_page("list-1", 5, 1).await.unwrap();
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn unknown_list_id_returns_empty() {
        let source = InMemoryContactSource::single_list("list-1", vec![contact(0, "+1")]);
        let page = source.load_page("list-2", 0, 1).await.unwrap();
        assert!(page.is_empty());
    }
}
