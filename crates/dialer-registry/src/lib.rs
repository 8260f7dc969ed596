//! Active Call Registry & Call State Machine (C).
//!
//! State is persisted in `dialer_db::active_calls`; every transition is one
//! of that crate's conditional `UPDATE ... WHERE state = ANY(expected)`
//! calls, so idempotent webhook replay is handled at the storage layer.
//! The exhaustive-match discipline this module layers on top — a public
//! entry point per event that no-ops on an already-applied transition
//! rather than erroring — mirrors the teacher's `OmsOrder::apply` /
//! `do_transition` split in `mqk-execution::oms::state_machine`.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use dialer_schemas::provider::{NormalizedFields, WebhookEvent};
use dialer_schemas::{BillingKind, CallState, FailureReason};

// ---------------------------------------------------------------------------
// tryAdmit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryAdmitOutcome {
    Admitted { call_id: Uuid },
    ConcurrencyFull,
    InsufficientBalance,
}

pub struct TryAdmitRequest<'a> {
    pub tenant_id: &'a str,
    pub campaign_id: Option<Uuid>,
    pub contact_index: Option<i64>,
    pub from_number: &'a str,
    pub to_number: &'a str,
    pub provider: &'a str,
}

/// §4.3 `tryAdmit`: consults B (balance) before spending a concurrency slot,
/// then atomically counts + inserts via `dialer_db::try_insert_active_call`.
pub async fn try_admit(
    pool: &PgPool,
    req: TryAdmitRequest<'_>,
    max_global: i64,
    max_per_tenant: i64,
) -> anyhow::Result<TryAdmitOutcome> {
    if dialer_billing::admit(pool, req.tenant_id).await? == dialer_billing::AdmitOutcome::InsufficientBalance {
        return Ok(TryAdmitOutcome::InsufficientBalance);
    }

    let call_id = Uuid::new_v4();
    let new_call = dialer_db::NewActiveCall {
        call_id,
        tenant_id: req.tenant_id.to_string(),
        campaign_id: req.campaign_id,
        contact_index: req.contact_index,
        from_number: req.from_number.to_string(),
        to_number: req.to_number.to_string(),
        provider: req.provider.to_string(),
    };

    match dialer_db::try_insert_active_call(pool, &new_call, max_global, max_per_tenant).await? {
        dialer_db::AdmitDbOutcome::Admitted => Ok(TryAdmitOutcome::Admitted { call_id }),
        dialer_db::AdmitDbOutcome::ConcurrencyFull => Ok(TryAdmitOutcome::ConcurrencyFull),
    }
}

// ---------------------------------------------------------------------------
// warmup
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmupOutcome {
    Ok,
    BotNotReady,
}

/// §4.3 `warmup`: probes `bot_endpoint` up to `max_attempts` times, backing
/// off `backoff_ms` between tries. Leaves the call in `warming` on success —
/// the runner dials and transitions to `ringing` itself after `placeCall`.
pub async fn warmup(
    http: &reqwest::Client,
    pool: &PgPool,
    call_id: Uuid,
    bot_endpoint: &str,
    max_attempts: u32,
    backoff_ms: u64,
) -> anyhow::Result<WarmupOutcome> {
    dialer_db::mark_warming(pool, call_id).await?;

    for attempt in 0..max_attempts {
        if attempt > 0 {
            tokio::time::sleep(StdDuration::from_millis(backoff_ms)).await;
        }
        if probe_once(http, bot_endpoint).await {
            return Ok(WarmupOutcome::Ok);
        }
    }

    dialer_db::mark_failed(pool, call_id, &["warming"], FailureReason::BotNotReady).await?;
    Ok(WarmupOutcome::BotNotReady)
}

async fn probe_once(http: &reqwest::Client, bot_endpoint: &str) -> bool {
    http.get(bot_endpoint)
        .send()
        .await
        .map(|resp| resp.status().is_success())
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// attachProviderRef / mark dialed
// ---------------------------------------------------------------------------

pub async fn attach_provider_ref(pool: &PgPool, call_id: Uuid, provider_call_ref: &str) -> anyhow::Result<()> {
    dialer_db::attach_provider_ref(pool, call_id, provider_call_ref).await
}

/// `warming → ringing`, called by the runner right after `placeCall` succeeds.
pub async fn mark_dialed(pool: &PgPool, call_id: Uuid, provider_call_ref: &str) -> anyhow::Result<bool> {
    dialer_db::mark_ringing_after_dial(pool, call_id, provider_call_ref).await
}

pub async fn mark_dial_rejected(pool: &PgPool, call_id: Uuid) -> anyhow::Result<bool> {
    dialer_db::mark_failed(pool, call_id, &["warming"], FailureReason::ProviderRejected).await
}

// ---------------------------------------------------------------------------
// onEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnEventOutcome {
    Applied,
    NoOp,
}

/// §4.3 `onEvent`, driven by G (Webhook Ingress). Late or duplicate webhooks
/// for an already-terminal call are a silent no-op (`NoOp`), never an error.
pub async fn on_event(
    pool: &PgPool,
    call_id: Uuid,
    event: WebhookEvent,
    fields: &NormalizedFields,
) -> anyhow::Result<OnEventOutcome> {
    match event {
        WebhookEvent::Ring => {
            let applied = dialer_db::ack_ring(pool, call_id).await?;
            Ok(applied_outcome(applied))
        }
        WebhookEvent::Answered => {
            let applied = dialer_db::mark_answered(pool, call_id, Utc::now()).await?;
            Ok(applied_outcome(applied))
        }
        WebhookEvent::Hangup => on_hangup(pool, call_id, fields).await,
        // Recording isn't modeled in the state machine; acknowledged without
        // a state transition.
        WebhookEvent::Recording => Ok(OnEventOutcome::NoOp),
    }
}

async fn on_hangup(pool: &PgPool, call_id: Uuid, fields: &NormalizedFields) -> anyhow::Result<OnEventOutcome> {
    // `ringing → failed(not_answered)` takes priority; the conditional UPDATE
    // simply no-ops if the call isn't in `ringing`.
    if dialer_db::mark_hangup_not_answered(pool, call_id).await? {
        return Ok(OnEventOutcome::Applied);
    }

    let duration = fields.duration_seconds.unwrap_or(0).max(0);
    if dialer_db::mark_completed(pool, call_id, duration).await? {
        if duration > 0 {
            let row = dialer_db::fetch_active_call(pool, call_id).await?;
            let kind = row
                .campaign_id
                .map(|_| BillingKind::Campaign)
                .unwrap_or(BillingKind::Test);
            dialer_billing::debit(
                pool,
                dialer_billing::DebitRequest {
                    tenant_id: &row.tenant_id,
                    call_id,
                    campaign_id: row.campaign_id,
                    duration_seconds: duration,
                    kind,
                },
            )
            .await?;
        }
        return Ok(OnEventOutcome::Applied);
    }

    // Already terminal (duplicate Hangup delivery) — idempotent no-op.
    Ok(OnEventOutcome::NoOp)
}

fn applied_outcome(applied: bool) -> OnEventOutcome {
    if applied {
        OnEventOutcome::Applied
    } else {
        OnEventOutcome::NoOp
    }
}

// ---------------------------------------------------------------------------
// reap
// ---------------------------------------------------------------------------

const REAPABLE_STATES: [&str; 4] = ["initiating", "warming", "ringing", "ongoing"];

/// §4.3 `reap`: the sole timeout authority. Transitions any non-terminal call
/// whose `stateSince` predates its configured per-state timeout to `timeout`,
/// billing the answered duration if the call had reached `ongoing`.
pub async fn reap(pool: &PgPool, now: DateTime<Utc>, timeouts_ms: &HashMap<String, i64>) -> anyhow::Result<usize> {
    let mut reaped = 0usize;

    for state in REAPABLE_STATES {
        let Some(timeout_ms) = timeouts_ms.get(state) else {
            continue;
        };
        let older_than = now - chrono::Duration::milliseconds(*timeout_ms);
        let stale = dialer_db::list_stale_calls(pool, state, older_than).await?;

        for row in stale {
            let billing_duration = row
                .answered_at
                .map(|answered_at| (now - answered_at).num_seconds().max(0));

            if !dialer_db::mark_timeout(pool, row.call_id, billing_duration).await? {
                continue;
            }
            reaped += 1;

            if let Some(duration) = billing_duration {
                if duration > 0 {
                    let kind = row
                        .campaign_id
                        .map(|_| BillingKind::Campaign)
                        .unwrap_or(BillingKind::Test);
                    dialer_billing::debit(
                        pool,
                        dialer_billing::DebitRequest {
                            tenant_id: &row.tenant_id,
                            call_id: row.call_id,
                            campaign_id: row.campaign_id,
                            duration_seconds: duration,
                            kind,
                        },
                    )
                    .await?;
                }
            }
        }
    }

    Ok(reaped)
}

// ---------------------------------------------------------------------------
// snapshot
// ---------------------------------------------------------------------------

/// `snapshot(tenantId?) → counts by state`, used both for admission decisions
/// and dashboards.
pub async fn snapshot(pool: &PgPool, tenant_id: Option<&str>) -> anyhow::Result<BTreeMap<CallState, i64>> {
    let rows: Vec<(String, i64)> = match tenant_id {
        Some(t) => {
            sqlx::query_as("SELECT state, count(*) FROM active_calls WHERE tenant_id = $1 GROUP BY state")
                .bind(t)
                .fetch_all(pool)
                .await
        }
        None => {
            sqlx::query_as("SELECT state, count(*) FROM active_calls GROUP BY state")
                .fetch_all(pool)
                .await
        }
    }?;

    let mut counts = BTreeMap::new();
    for state in [
        CallState::Initiating,
        CallState::Warming,
        CallState::Ringing,
        CallState::Ongoing,
        CallState::Completed,
        CallState::Failed,
        CallState::Timeout,
    ] {
        counts.insert(state, 0i64);
    }
    for (state_str, count) in rows {
        if let Some(state) = CallState::parse(&state_str) {
            counts.insert(state, count);
        }
    }

    Ok(counts)
}
