//! `dialer calls place`: the same admission/warmup/dial path as a campaign
//! contact (§4.3), driven directly rather than through the daemon's HTTP
//! surface — useful for operators testing a bot endpoint or provider
//! credentials without standing up a whole campaign.

use anyhow::Result;
use sqlx::PgPool;

use dialer_config::EngineConfig;
use dialer_provider::ProviderAdapter;
use dialer_schemas::provider::CallbackUrls;

pub struct PlaceArgs {
    pub tenant_id: String,
    pub from: String,
    pub to: String,
    pub bot_endpoint: String,
}

pub async fn place(
    pool: &PgPool,
    provider: &dyn ProviderAdapter,
    config: &EngineConfig,
    webhook_base_url: &str,
    args: PlaceArgs,
) -> Result<()> {
    let http = reqwest::Client::new();

    let admitted = dialer_registry::try_admit(
        pool,
        dialer_registry::TryAdmitRequest {
            tenant_id: &args.tenant_id,
            campaign_id: None,
            contact_index: None,
            from_number: &args.from,
            to_number: &args.to,
            provider: provider.name(),
        },
        config.max_global_concurrent_calls,
        config.max_per_tenant_concurrent_calls,
    )
    .await?;

    let call_id = match admitted {
        dialer_registry::TryAdmitOutcome::Admitted { call_id } => call_id,
        dialer_registry::TryAdmitOutcome::ConcurrencyFull => {
            println!("result=rejected reason=concurrency_full");
            return Ok(());
        }
        dialer_registry::TryAdmitOutcome::InsufficientBalance => {
            println!("result=rejected reason=insufficient_balance");
            return Ok(());
        }
    };
    println!("call_id={call_id}");

    let warmup = dialer_registry::warmup(
        &http,
        pool,
        call_id,
        &args.bot_endpoint,
        config.warmup_max_attempts,
        config.warmup_backoff_ms as u64,
    )
    .await?;

    if !matches!(warmup, dialer_registry::WarmupOutcome::Ok) {
        println!("result=failed reason=bot_not_ready");
        return Ok(());
    }

    let callbacks = CallbackUrls::for_call(webhook_base_url, call_id);
    let credentials = provider.resolve_credentials(&args.tenant_id).await;
    match provider.place_call(credentials.credentials(), &args.from, &args.to, &callbacks).await {
        Ok(provider_call_ref) => {
            dialer_registry::mark_dialed(pool, call_id, &provider_call_ref).await?;
            println!("result=dialed provider_call_ref={provider_call_ref}");
        }
        Err(e) => {
            dialer_registry::mark_dial_rejected(pool, call_id).await?;
            println!("result=rejected reason={e}");
        }
    }

    Ok(())
}
