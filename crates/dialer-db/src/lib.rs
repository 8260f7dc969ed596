//! Postgres-backed persistence for campaigns, active calls, billing entries
//! and tenant balances (spec §6.3).
//!
//! Every mutation that carries an invariant (campaign status transitions,
//! cursor advance, call state transitions, balance debit) is a single
//! conditional `UPDATE ... WHERE <expected state> RETURNING` statement.
//! None of them take an explicit lock; the `WHERE` clause is the lock.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use dialer_schemas::{BillingKind, CallState, CampaignStatus, FailureReason};

pub const ENV_DB_URL: &str = "DIALER_DATABASE_URL";

pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).context("DIALER_DATABASE_URL not set")?;
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("connect to postgres")?;
    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("run migrations")?;
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub struct DbStatus {
    pub ok: bool,
    pub has_campaigns_table: bool,
}

/// Cheap connectivity + schema-presence probe for `dialer db status`.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let ok = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await.is_ok();
    let has_campaigns_table: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = 'campaigns')",
    )
    .fetch_one(pool)
    .await
    .context("check campaigns table")?;
    Ok(DbStatus { ok, has_campaigns_table })
}

const TERMINAL_CALL_STATES: [&str; 3] = ["completed", "failed", "timeout"];

fn non_terminal_clause() -> &'static str {
    "state NOT IN ('completed', 'failed', 'timeout')"
}

// ---------------------------------------------------------------------------
// Campaigns (E — Campaign State Store)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub list_id: String,
    pub from_number: String,
    pub provider_hint: Option<String>,
    pub bot_endpoint: String,
    pub total_contacts: i64,
}

pub async fn insert_campaign(pool: &PgPool, c: &NewCampaign) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO campaigns
            (id, tenant_id, name, list_id, from_number, provider_hint, bot_endpoint,
             total_contacts, status, current_index, last_activity, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'running', 0, now(), now())
        "#,
    )
    .bind(c.id)
    .bind(&c.tenant_id)
    .bind(&c.name)
    .bind(&c.list_id)
    .bind(&c.from_number)
    .bind(&c.provider_hint)
    .bind(&c.bot_endpoint)
    .bind(c.total_contacts)
    .execute(pool)
    .await
    .context("insert campaign")?;
    Ok(())
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CampaignRow {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub list_id: String,
    pub from_number: String,
    pub provider_hint: Option<String>,
    pub bot_endpoint: String,
    pub total_contacts: i64,
    pub current_index: i64,
    pub processed_contacts: i64,
    pub connected_count: i64,
    pub failed_count: i64,
    pub status: String,
    pub heartbeat: Option<DateTime<Utc>>,
    pub runner_id: Option<String>,
    pub paused_at: Option<DateTime<Utc>>,
    pub resumed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<String>,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl CampaignRow {
    pub fn status_enum(&self) -> Option<CampaignStatus> {
        CampaignStatus::parse(&self.status)
    }
}

pub async fn fetch_campaign(pool: &PgPool, campaign_id: Uuid) -> Result<CampaignRow> {
    sqlx::query_as::<_, CampaignRow>("SELECT * FROM campaigns WHERE id = $1")
        .bind(campaign_id)
        .fetch_one(pool)
        .await
        .context("fetch campaign")
}

/// §4.4 `claimRunnership`: conditional set of `runnerId, heartbeat=now` when the
/// current status matches `expected_status` AND (`runner_id` is null OR the
/// prior heartbeat is older than the orphan threshold). Race-free takeover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    Conflict,
}

pub async fn claim_runnership(
    pool: &PgPool,
    campaign_id: Uuid,
    runner_id: &str,
    expected_status: CampaignStatus,
    orphan_threshold_ms: i64,
) -> Result<ClaimOutcome> {
    let row = sqlx::query(
        r#"
        UPDATE campaigns
        SET runner_id = $2, heartbeat = now()
        WHERE id = $1
          AND status = $3
          AND (runner_id IS NULL OR heartbeat < now() - ($4 || ' milliseconds')::interval)
        RETURNING id
        "#,
    )
    .bind(campaign_id)
    .bind(runner_id)
    .bind(expected_status.as_str())
    .bind(orphan_threshold_ms.to_string())
    .fetch_optional(pool)
    .await
    .context("claim runnership")?;

    Ok(if row.is_some() {
        ClaimOutcome::Claimed
    } else {
        ClaimOutcome::Conflict
    })
}

/// §4.4 `advanceCursor`: conditional on `currentIndex == fromIndex` so two
/// runners racing on the same campaign can't both advance the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Ok,
    StaleCursor,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CounterDelta {
    pub connected: i64,
    pub failed: i64,
}

pub async fn advance_cursor(
    pool: &PgPool,
    campaign_id: Uuid,
    from_index: i64,
    delta: CounterDelta,
) -> Result<AdvanceOutcome> {
    let row = sqlx::query(
        r#"
        UPDATE campaigns
        SET current_index = current_index + 1,
            processed_contacts = processed_contacts + $3 + $4,
            connected_count = connected_count + $3,
            failed_count = failed_count + $4,
            last_activity = now()
        WHERE id = $1 AND current_index = $2
        RETURNING id
        "#,
    )
    .bind(campaign_id)
    .bind(from_index)
    .bind(delta.connected)
    .bind(delta.failed)
    .fetch_optional(pool)
    .await
    .context("advance cursor")?;

    Ok(if row.is_some() {
        AdvanceOutcome::Ok
    } else {
        AdvanceOutcome::StaleCursor
    })
}

pub async fn heartbeat_campaign(pool: &PgPool, campaign_id: Uuid, runner_id: &str) -> Result<bool> {
    let row = sqlx::query(
        "UPDATE campaigns SET heartbeat = now() WHERE id = $1 AND status = 'running' AND runner_id = $2 RETURNING id",
    )
    .bind(campaign_id)
    .bind(runner_id)
    .fetch_optional(pool)
    .await
    .context("heartbeat campaign")?;
    Ok(row.is_some())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Ok,
    InvalidState,
}

/// `running → paused`, clearing ownership. `reason` is surfaced to callers via
/// `cancelled_by`-style free text stashed in `runner_id`'s replacement — kept
/// as a dedicated column rather than overloading an existing one.
pub async fn pause_campaign(
    pool: &PgPool,
    campaign_id: Uuid,
) -> Result<TransitionOutcome> {
    let row = sqlx::query(
        r#"
        UPDATE campaigns
        SET status = 'paused', runner_id = NULL, heartbeat = NULL, paused_at = now(), last_activity = now()
        WHERE id = $1 AND status = 'running'
        RETURNING id
        "#,
    )
    .bind(campaign_id)
    .fetch_optional(pool)
    .await
    .context("pause campaign")?;

    Ok(if row.is_some() {
        TransitionOutcome::Ok
    } else {
        TransitionOutcome::InvalidState
    })
}

pub async fn resume_campaign(pool: &PgPool, campaign_id: Uuid) -> Result<TransitionOutcome> {
    let row = sqlx::query(
        r#"
        UPDATE campaigns
        SET status = 'running', resumed_at = now(), last_activity = now()
        WHERE id = $1 AND status = 'paused'
        RETURNING id
        "#,
    )
    .bind(campaign_id)
    .fetch_optional(pool)
    .await
    .context("resume campaign")?;

    Ok(if row.is_some() {
        TransitionOutcome::Ok
    } else {
        TransitionOutcome::InvalidState
    })
}

/// Idempotent over `cancelled`: a second `cancel` on an already-cancelled
/// campaign is `Ok`, never `InvalidState` (§6.1).
pub async fn cancel_campaign(
    pool: &PgPool,
    campaign_id: Uuid,
    cancelled_by: &str,
) -> Result<TransitionOutcome> {
    let row = sqlx::query(
        r#"
        UPDATE campaigns
        SET status = 'cancelled', runner_id = NULL, heartbeat = NULL,
            cancelled_at = now(), cancelled_by = $2, last_activity = now()
        WHERE id = $1 AND status IN ('running', 'paused')
        RETURNING id
        "#,
    )
    .bind(campaign_id)
    .bind(cancelled_by)
    .fetch_optional(pool)
    .await
    .context("cancel campaign")?;

    if row.is_some() {
        return Ok(TransitionOutcome::Ok);
    }

    let current = fetch_campaign(pool, campaign_id).await?;
    Ok(if current.status == "cancelled" {
        TransitionOutcome::Ok
    } else {
        TransitionOutcome::InvalidState
    })
}

/// `running → completed`, conditional on the cursor having reached the end.
pub async fn complete_campaign(pool: &PgPool, campaign_id: Uuid) -> Result<TransitionOutcome> {
    let row = sqlx::query(
        r#"
        UPDATE campaigns
        SET status = 'completed', runner_id = NULL, heartbeat = NULL, last_activity = now()
        WHERE id = $1 AND status = 'running' AND current_index = total_contacts
        RETURNING id
        "#,
    )
    .bind(campaign_id)
    .fetch_optional(pool)
    .await
    .context("complete campaign")?;

    Ok(if row.is_some() {
        TransitionOutcome::Ok
    } else {
        TransitionOutcome::InvalidState
    })
}

/// `running → paused` for the `out_of_credit` auto-pause path (§4.6 step 3.b).
pub async fn auto_pause_out_of_credit(pool: &PgPool, campaign_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE campaigns
        SET status = 'paused', runner_id = NULL, heartbeat = NULL, paused_at = now(), last_activity = now()
        WHERE id = $1 AND status = 'running'
        "#,
    )
    .bind(campaign_id)
    .execute(pool)
    .await
    .context("auto-pause out of credit")?;
    Ok(())
}

/// `running → failed`: unrecoverable error. Releases ownership so the
/// campaign is inert rather than orphan-recoverable (`failed` is terminal).
pub async fn fail_campaign(pool: &PgPool, campaign_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE campaigns
        SET status = 'failed', runner_id = NULL, heartbeat = NULL, last_activity = now()
        WHERE id = $1 AND status = 'running'
        "#,
    )
    .bind(campaign_id)
    .execute(pool)
    .await
    .context("fail campaign")?;
    Ok(())
}

/// §4.5 sweep: `status=running` campaigns whose heartbeat is older than the
/// orphan threshold. Read-only — the sweeper still has to win `claim_runnership`.
pub async fn sweep_stale_campaigns(
    pool: &PgPool,
    orphan_threshold_ms: i64,
) -> Result<Vec<Uuid>> {
    let rows = sqlx::query(
        r#"
        SELECT id FROM campaigns
        WHERE status = 'running'
          AND (heartbeat IS NULL OR heartbeat < now() - ($1 || ' milliseconds')::interval)
        "#,
    )
    .bind(orphan_threshold_ms.to_string())
    .fetch_all(pool)
    .await
    .context("sweep stale campaigns")?;

    Ok(rows.iter().map(|r| r.get::<Uuid, _>("id")).collect())
}

// ---------------------------------------------------------------------------
// Active calls (C — Active Call Registry)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ActiveCallRow {
    pub call_id: Uuid,
    pub provider_call_ref: Option<String>,
    pub tenant_id: String,
    pub campaign_id: Option<Uuid>,
    pub contact_index: Option<i64>,
    pub from_number: String,
    pub to_number: String,
    pub provider: String,
    pub state: String,
    pub state_since: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub billing_duration_secs: Option<i64>,
}

impl ActiveCallRow {
    pub fn state_enum(&self) -> Option<CallState> {
        CallState::parse(&self.state)
    }
}

#[derive(Debug, Clone)]
pub struct NewActiveCall {
    pub call_id: Uuid,
    pub tenant_id: String,
    pub campaign_id: Option<Uuid>,
    pub contact_index: Option<i64>,
    pub from_number: String,
    pub to_number: String,
    pub provider: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitDbOutcome {
    Admitted,
    ConcurrencyFull,
}

/// Two advisory-lock keys serialize admission so the count-then-insert pair
/// below can't race: one global, one hashed per tenant. Neither lock is held
/// outside this transaction.
const GLOBAL_ADMISSION_LOCK_KEY: i64 = 0x6469_616c_6572; // "dialer" in hex, truncated

/// §4.3 `tryAdmit`'s concurrency half: atomically counts non-terminal rows
/// against both ceilings and inserts in `initiating` state iff both pass.
/// The balance check (§4.2 `admit`) is the caller's (`dialer-registry`)
/// responsibility — this function only guards the concurrency gates.
pub async fn try_insert_active_call(
    pool: &PgPool,
    new_call: &NewActiveCall,
    max_global: i64,
    max_per_tenant: i64,
) -> Result<AdmitDbOutcome> {
    let mut tx = pool.begin().await.context("begin admission tx")?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(GLOBAL_ADMISSION_LOCK_KEY)
        .execute(&mut *tx)
        .await
        .context("acquire global admission lock")?;
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(&new_call.tenant_id)
        .execute(&mut *tx)
        .await
        .context("acquire tenant admission lock")?;

    let global_count: i64 = sqlx::query_scalar(&format!(
        "SELECT count(*) FROM active_calls WHERE {}",
        non_terminal_clause()
    ))
    .fetch_one(&mut *tx)
    .await
    .context("count global non-terminal calls")?;

    if global_count >= max_global {
        tx.rollback().await.ok();
        return Ok(AdmitDbOutcome::ConcurrencyFull);
    }

    let tenant_count: i64 = sqlx::query_scalar(&format!(
        "SELECT count(*) FROM active_calls WHERE tenant_id = $1 AND {}",
        non_terminal_clause()
    ))
    .bind(&new_call.tenant_id)
    .fetch_one(&mut *tx)
    .await
    .context("count tenant non-terminal calls")?;

    if tenant_count >= max_per_tenant {
        tx.rollback().await.ok();
        return Ok(AdmitDbOutcome::ConcurrencyFull);
    }

    sqlx::query(
        r#"
        INSERT INTO active_calls
            (call_id, tenant_id, campaign_id, contact_index, from_number, to_number,
             provider, state, state_since, started_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'initiating', now(), now())
        "#,
    )
    .bind(new_call.call_id)
    .bind(&new_call.tenant_id)
    .bind(new_call.campaign_id)
    .bind(new_call.contact_index)
    .bind(&new_call.from_number)
    .bind(&new_call.to_number)
    .bind(&new_call.provider)
    .execute(&mut *tx)
    .await
    .context("insert active call")?;

    tx.commit().await.context("commit admission tx")?;
    Ok(AdmitDbOutcome::Admitted)
}

pub async fn fetch_active_call(pool: &PgPool, call_id: Uuid) -> Result<ActiveCallRow> {
    sqlx::query_as::<_, ActiveCallRow>("SELECT * FROM active_calls WHERE call_id = $1")
        .bind(call_id)
        .fetch_one(pool)
        .await
        .context("fetch active call")
}

pub async fn attach_provider_ref(pool: &PgPool, call_id: Uuid, provider_call_ref: &str) -> Result<()> {
    sqlx::query("UPDATE active_calls SET provider_call_ref = $2 WHERE call_id = $1")
        .bind(call_id)
        .bind(provider_call_ref)
        .execute(pool)
        .await
        .context("attach provider ref")?;
    Ok(())
}

/// Generic conditional state transition: `state = ANY(expected)` -> `new_state`.
/// Returns `false` (no-op) when the current state isn't one of `expected` —
/// this is the mechanism behind §4.3's webhook idempotency.
async fn cas_call_state(
    pool: &PgPool,
    call_id: Uuid,
    expected: &[&str],
    new_state: &str,
) -> Result<bool> {
    let row = sqlx::query(
        "UPDATE active_calls SET state = $2, state_since = now() WHERE call_id = $1 AND state = ANY($3) RETURNING call_id",
    )
    .bind(call_id)
    .bind(new_state)
    .bind(expected)
    .fetch_optional(pool)
    .await
    .context("conditional call state transition")?;
    Ok(row.is_some())
}

pub async fn mark_warming(pool: &PgPool, call_id: Uuid) -> Result<bool> {
    cas_call_state(pool, call_id, &["initiating"], "warming").await
}

pub async fn mark_ringing_after_dial(
    pool: &PgPool,
    call_id: Uuid,
    provider_call_ref: &str,
) -> Result<bool> {
    let row = sqlx::query(
        r#"
        UPDATE active_calls
        SET state = 'ringing', state_since = now(), provider_call_ref = $2
        WHERE call_id = $1 AND state = 'warming'
        RETURNING call_id
        "#,
    )
    .bind(call_id)
    .bind(provider_call_ref)
    .fetch_optional(pool)
    .await
    .context("mark ringing after dial")?;
    Ok(row.is_some())
}

/// `initiating|warming → failed(reason)`. Covers warmup exhaustion and
/// provider rejection, both of which release the concurrency slot because
/// `failed` is terminal.
pub async fn mark_failed(
    pool: &PgPool,
    call_id: Uuid,
    from_states: &[&str],
    reason: FailureReason,
) -> Result<bool> {
    let row = sqlx::query(
        r#"
        UPDATE active_calls
        SET state = 'failed', state_since = now(), ended_at = now(), failure_reason = $3
        WHERE call_id = $1 AND state = ANY($2)
        RETURNING call_id
        "#,
    )
    .bind(call_id)
    .bind(from_states)
    .bind(reason.as_str())
    .fetch_optional(pool)
    .await
    .context("mark call failed")?;
    Ok(row.is_some())
}

/// `ringing → ringing`, idempotent ack that only refreshes `stateSince`.
pub async fn ack_ring(pool: &PgPool, call_id: Uuid) -> Result<bool> {
    cas_call_state(pool, call_id, &["ringing"], "ringing").await
}

pub async fn mark_answered(pool: &PgPool, call_id: Uuid, answered_at: DateTime<Utc>) -> Result<bool> {
    let row = sqlx::query(
        r#"
        UPDATE active_calls
        SET state = 'ongoing', state_since = now(), answered_at = $2
        WHERE call_id = $1 AND state = 'ringing'
        RETURNING call_id
        "#,
    )
    .bind(call_id)
    .bind(answered_at)
    .fetch_optional(pool)
    .await
    .context("mark call answered")?;
    Ok(row.is_some())
}

/// `ringing → failed(not_answered)`: hangup arrived before the call was answered.
pub async fn mark_hangup_not_answered(pool: &PgPool, call_id: Uuid) -> Result<bool> {
    let row = sqlx::query(
        r#"
        UPDATE active_calls
        SET state = 'failed', state_since = now(), ended_at = now(), failure_reason = 'not_answered'
        WHERE call_id = $1 AND state = 'ringing'
        RETURNING call_id
        "#,
    )
    .bind(call_id)
    .fetch_optional(pool)
    .await
    .context("mark hangup not answered")?;
    Ok(row.is_some())
}

/// `ongoing → completed`, recording the billable (answered) duration.
pub async fn mark_completed(
    pool: &PgPool,
    call_id: Uuid,
    billing_duration_secs: i64,
) -> Result<bool> {
    let row = sqlx::query(
        r#"
        UPDATE active_calls
        SET state = 'completed', state_since = now(), ended_at = now(), billing_duration_secs = $2
        WHERE call_id = $1 AND state = 'ongoing'
        RETURNING call_id
        "#,
    )
    .bind(call_id)
    .bind(billing_duration_secs)
    .fetch_optional(pool)
    .await
    .context("mark call completed")?;
    Ok(row.is_some())
}

/// Reaper-only: any non-terminal state -> `timeout`. Bills `billing_duration_secs`
/// if the call had been answered (§4.3 `reap`).
pub async fn mark_timeout(
    pool: &PgPool,
    call_id: Uuid,
    billing_duration_secs: Option<i64>,
) -> Result<bool> {
    let row = sqlx::query(
        r#"
        UPDATE active_calls
        SET state = 'timeout', state_since = now(), ended_at = now(), billing_duration_secs = $2
        WHERE call_id = $1 AND state NOT IN ('completed', 'failed', 'timeout')
        RETURNING call_id
        "#,
    )
    .bind(call_id)
    .bind(billing_duration_secs)
    .fetch_optional(pool)
    .await
    .context("mark call timeout")?;
    Ok(row.is_some())
}

pub async fn count_non_terminal(pool: &PgPool, tenant_id: Option<&str>) -> Result<i64> {
    let count = match tenant_id {
        Some(t) => {
            sqlx::query_scalar::<_, i64>(&format!(
                "SELECT count(*) FROM active_calls WHERE tenant_id = $1 AND {}",
                non_terminal_clause()
            ))
            .bind(t)
            .fetch_one(pool)
            .await
        }
        None => {
            sqlx::query_scalar::<_, i64>(&format!(
                "SELECT count(*) FROM active_calls WHERE {}",
                non_terminal_clause()
            ))
            .fetch_one(pool)
            .await
        }
    }
    .context("count non-terminal active calls")?;
    Ok(count)
}

/// Reaper (§4.3 `reap`): non-terminal rows in `state` whose `state_since` has
/// exceeded `older_than`. One call per state per sweep, since each state has
/// its own configured timeout.
pub async fn list_stale_calls(
    pool: &PgPool,
    state: &str,
    older_than: DateTime<Utc>,
) -> Result<Vec<ActiveCallRow>> {
    sqlx::query_as::<_, ActiveCallRow>(
        "SELECT * FROM active_calls WHERE state = $1 AND state_since < $2",
    )
    .bind(state)
    .bind(older_than)
    .fetch_all(pool)
    .await
    .context("list stale calls")
}

pub fn terminal_call_states() -> &'static [&'static str; 3] {
    &TERMINAL_CALL_STATES
}

// ---------------------------------------------------------------------------
// Billing (B — Billing Ledger)
// ---------------------------------------------------------------------------

pub async fn ensure_tenant_balance(pool: &PgPool, tenant_id: &str, initial_balance: i64) -> Result<()> {
    sqlx::query(
        "INSERT INTO tenant_balances (tenant_id, available_balance) VALUES ($1, $2) ON CONFLICT (tenant_id) DO NOTHING",
    )
    .bind(tenant_id)
    .bind(initial_balance)
    .execute(pool)
    .await
    .context("ensure tenant balance")?;
    Ok(())
}

pub async fn get_balance(pool: &PgPool, tenant_id: &str) -> Result<i64> {
    let balance: Option<i64> =
        sqlx::query_scalar("SELECT available_balance FROM tenant_balances WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_optional(pool)
            .await
            .context("get balance")?;
    Ok(balance.unwrap_or(0))
}

/// §4.2 `debit`: a single atomic `UPDATE ... SET x = x - $n RETURNING x`.
/// Never a read followed by a separate write.
pub async fn debit_balance(pool: &PgPool, tenant_id: &str, amount: i64) -> Result<i64> {
    let balance_after: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO tenant_balances (tenant_id, available_balance)
        VALUES ($1, -$2)
        ON CONFLICT (tenant_id)
        DO UPDATE SET available_balance = tenant_balances.available_balance - $2
        RETURNING available_balance
        "#,
    )
    .bind(tenant_id)
    .bind(amount)
    .fetch_one(pool)
    .await
    .context("debit balance")?;
    Ok(balance_after)
}

#[derive(Debug, Clone)]
pub struct NewBillingEntry {
    pub id: Uuid,
    pub tenant_id: String,
    pub call_id: Option<Uuid>,
    pub campaign_id: Option<Uuid>,
    pub kind: BillingKind,
    pub credits: i64,
    pub balance_after: i64,
    pub duration_seconds: i64,
}

pub async fn insert_billing_entry(pool: &PgPool, entry: &NewBillingEntry) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO billing_entries
            (id, tenant_id, call_id, campaign_id, kind, credits, balance_after, duration_seconds, at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())
        "#,
    )
    .bind(entry.id)
    .bind(&entry.tenant_id)
    .bind(entry.call_id)
    .bind(entry.campaign_id)
    .bind(entry.kind.as_str())
    .bind(entry.credits)
    .bind(entry.balance_after)
    .bind(entry.duration_seconds)
    .execute(pool)
    .await
    .context("insert billing entry")?;
    Ok(())
}

/// §4.2 `completeCampaignLedger`: sum the per-call billable durations already
/// recorded on terminal `active_calls` rows for this campaign and emit one
/// aggregated row. Balance itself was already decremented in real time by
/// each `debit_balance` call during the run — this only records the summary.
pub async fn aggregate_campaign_billed_seconds(pool: &PgPool, campaign_id: Uuid) -> Result<i64> {
    let total: Option<i64> = sqlx::query_scalar(
        "SELECT SUM(billing_duration_secs) FROM active_calls WHERE campaign_id = $1",
    )
    .bind(campaign_id)
    .fetch_one(pool)
    .await
    .context("aggregate campaign billed seconds")?;
    Ok(total.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn campaign_status_round_trips() {
        for s in ["running", "paused", "completed", "cancelled", "failed"] {
            let parsed = CampaignStatus::parse(s).unwrap();
            assert_eq!(parsed.as_str(), s);
        }
    }

    #[test]
    fn non_terminal_clause_excludes_terminal_states() {
        let clause = non_terminal_clause();
        for t in TERMINAL_CALL_STATES {
            assert!(clause.contains(t));
        }
    }
}
