//! Billing Ledger (B): coarse pre-call admission plus an atomic per-call
//! debit, layered over `dialer_db`'s conditional-update primitives.
//!
//! The invariant-validate-then-delegate split mirrors the teacher's
//! `mqk-portfolio::ledger::Ledger`: inputs are checked before the call ever
//! reaches the database, and the error enum names exactly which invariant
//! failed rather than surfacing a bare database error.

use sqlx::PgPool;
use uuid::Uuid;

use dialer_schemas::BillingKind;

/// Invariant violations caught before touching the database, plus the one
/// domain-level outcome (`InsufficientBalance`) that `admit` can return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingError {
    EmptyTenantId,
    NonPositiveDuration { duration_seconds: i64 },
    InsufficientBalance { tenant_id: String, balance: i64 },
}

impl std::fmt::Display for BillingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BillingError::EmptyTenantId => write!(f, "billing invariant: tenant_id must not be empty"),
            BillingError::NonPositiveDuration { duration_seconds } => write!(
                f,
                "billing invariant: duration_seconds must be > 0, got {duration_seconds}"
            ),
            BillingError::InsufficientBalance { tenant_id, balance } => write!(
                f,
                "tenant {tenant_id} has insufficient balance ({balance}) for admission"
            ),
        }
    }
}

impl std::error::Error for BillingError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitOutcome {
    Admitted,
    InsufficientBalance,
}

/// `admit(tenantId)`: admits iff `availableBalance > 0`. Does not reserve
/// credits — the engine is post-pay per call (§4.2 rationale).
pub async fn admit(pool: &PgPool, tenant_id: &str) -> anyhow::Result<AdmitOutcome> {
    if tenant_id.trim().is_empty() {
        anyhow::bail!(BillingError::EmptyTenantId);
    }
    let balance = dialer_db::get_balance(pool, tenant_id).await?;
    Ok(if balance > 0 {
        AdmitOutcome::Admitted
    } else {
        AdmitOutcome::InsufficientBalance
    })
}

pub struct DebitRequest<'a> {
    pub tenant_id: &'a str,
    pub call_id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub duration_seconds: i64,
    pub kind: BillingKind,
}

/// `debit(tenantId, callId, durationSeconds, kind, campaignId?) -> balanceAfter`.
///
/// The balance decrement happens in real time for every kind via a single
/// atomic `UPDATE`. Per-entry ledger rows are written immediately for
/// `test`/`incoming`; for `kind = campaign` the row is deferred to
/// `complete_campaign_ledger` to avoid one row per call (§4.2).
pub async fn debit(pool: &PgPool, req: DebitRequest<'_>) -> anyhow::Result<i64> {
    if req.tenant_id.trim().is_empty() {
        anyhow::bail!(BillingError::EmptyTenantId);
    }
    if req.duration_seconds <= 0 {
        anyhow::bail!(BillingError::NonPositiveDuration {
            duration_seconds: req.duration_seconds
        });
    }

    let balance_after = dialer_db::debit_balance(pool, req.tenant_id, req.duration_seconds).await?;

    if !matches!(req.kind, BillingKind::Campaign) {
        dialer_db::insert_billing_entry(
            pool,
            &dialer_db::NewBillingEntry {
                id: Uuid::new_v4(),
                tenant_id: req.tenant_id.to_string(),
                call_id: Some(req.call_id),
                campaign_id: req.campaign_id,
                kind: req.kind,
                credits: -req.duration_seconds,
                balance_after,
                duration_seconds: req.duration_seconds,
            },
        )
        .await?;
    }

    Ok(balance_after)
}

/// `completeCampaignLedger(campaignId)`: one aggregated row summarizing every
/// debit already applied to the tenant's balance during the run.
pub async fn complete_campaign_ledger(
    pool: &PgPool,
    tenant_id: &str,
    campaign_id: Uuid,
) -> anyhow::Result<i64> {
    let total_seconds = dialer_db::aggregate_campaign_billed_seconds(pool, campaign_id).await?;
    let balance_after = dialer_db::get_balance(pool, tenant_id).await?;

    dialer_db::insert_billing_entry(
        pool,
        &dialer_db::NewBillingEntry {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            call_id: None,
            campaign_id: Some(campaign_id),
            kind: BillingKind::Campaign,
            credits: -total_seconds,
            balance_after,
            duration_seconds: total_seconds,
        },
    )
    .await?;

    Ok(total_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_tenant_id() {
        let err = BillingError::EmptyTenantId;
        assert_eq!(err.to_string(), "billing invariant: tenant_id must not be empty");
    }

    #[test]
    fn rejects_non_positive_duration_display() {
        let err = BillingError::NonPositiveDuration { duration_seconds: 0 };
        assert!(err.to_string().contains("duration_seconds must be > 0"));
    }
}
