//! Campaign lifecycle subcommands: create, pause, resume, cancel, status.
//!
//! Each handler is a thin wrapper over a single `dialer_db` conditional
//! update — the same discipline the engine itself follows (§4.4/§4.6).
//! `create` only inserts the row; the actual dialing is picked up by
//! whichever `dialer-daemon` process next claims runnership (§4.5), exactly
//! as a freshly-inserted `running` campaign with no heartbeat looks orphaned.

use anyhow::{bail, Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use super::load_contact_lists;

pub struct CreateArgs {
    pub tenant_id: String,
    pub name: String,
    pub list_id: String,
    pub from_number: String,
    pub provider_hint: Option<String>,
    pub bot_endpoint: String,
    pub contacts_file: String,
}

pub async fn create(pool: &PgPool, args: CreateArgs) -> Result<()> {
    let lists = load_contact_lists(&args.contacts_file)?;
    let total_contacts = lists.get(&args.list_id).map(|c| c.len() as i64).unwrap_or(0);

    let campaign_id = Uuid::new_v4();
    dialer_db::insert_campaign(
        pool,
        &dialer_db::NewCampaign {
            id: campaign_id,
            tenant_id: args.tenant_id,
            name: args.name,
            list_id: args.list_id,
            from_number: args.from_number,
            provider_hint: args.provider_hint,
            bot_endpoint: args.bot_endpoint,
            total_contacts,
        },
    )
    .await
    .context("insert campaign")?;

    println!("campaign_id={campaign_id}");
    println!("total_contacts={total_contacts}");
    println!("status=running");
    Ok(())
}

pub async fn pause(pool: &PgPool, campaign_id: Uuid) -> Result<()> {
    match dialer_db::pause_campaign(pool, campaign_id).await? {
        dialer_db::TransitionOutcome::Ok => {
            println!("campaign_id={campaign_id} status=paused");
            Ok(())
        }
        dialer_db::TransitionOutcome::InvalidState => {
            bail!("campaign {campaign_id} is not running")
        }
    }
}

pub async fn resume(pool: &PgPool, campaign_id: Uuid) -> Result<()> {
    match dialer_db::resume_campaign(pool, campaign_id).await? {
        dialer_db::TransitionOutcome::Ok => {
            let row = dialer_db::fetch_campaign(pool, campaign_id).await?;
            println!("campaign_id={campaign_id} status=running remaining={}", row.total_contacts - row.current_index);
            Ok(())
        }
        dialer_db::TransitionOutcome::InvalidState => {
            bail!("campaign {campaign_id} is not paused")
        }
    }
}

pub async fn cancel(pool: &PgPool, campaign_id: Uuid, cancelled_by: Option<String>) -> Result<()> {
    let cancelled_by = cancelled_by.unwrap_or_else(|| "operator".to_string());
    match dialer_db::cancel_campaign(pool, campaign_id, &cancelled_by).await? {
        dialer_db::TransitionOutcome::Ok => {
            println!("campaign_id={campaign_id} status=cancelled cancelled_by={cancelled_by}");
            Ok(())
        }
        dialer_db::TransitionOutcome::InvalidState => {
            bail!("campaign {campaign_id} is already terminal")
        }
    }
}

pub async fn status(pool: &PgPool, campaign_id: Uuid, orphan_threshold_ms: i64) -> Result<()> {
    let row = dialer_db::fetch_campaign(pool, campaign_id).await?;
    let age_secs = row.heartbeat.map(|hb| (chrono::Utc::now() - hb).num_seconds().max(0));
    let health = dialer_schemas::HeartbeatHealth::classify(age_secs, orphan_threshold_ms / 1000);

    println!("campaign_id={}", row.id);
    println!("status={}", row.status);
    println!("current_index={}", row.current_index);
    println!("total_contacts={}", row.total_contacts);
    println!("connected_count={}", row.connected_count);
    println!("failed_count={}", row.failed_count);
    println!("heartbeat_health={}", health.as_str());
    Ok(())
}
