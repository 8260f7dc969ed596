use uuid::Uuid;

async fn connect_or_skip() -> Option<sqlx::PgPool> {
    let url = match std::env::var(dialer_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: {} not set", dialer_db::ENV_DB_URL);
            return None;
        }
    };
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await
        .ok()?;
    dialer_db::migrate(&pool).await.ok()?;
    Some(pool)
}

#[tokio::test]
async fn concurrent_debits_never_lose_an_update() -> anyhow::Result<()> {
    let Some(pool) = connect_or_skip().await else {
        return Ok(());
    };

    let tenant = format!("tenant-{}", Uuid::new_v4());
    dialer_db::ensure_tenant_balance(&pool, &tenant, 1_000).await?;

    // 10 concurrent debits of 1 credit each. A naive read-then-write would
    // lose updates under concurrency; the atomic UPDATE must not.
    let mut handles = Vec::new();
    for _ in 0..10 {
        let pool = pool.clone();
        let tenant = tenant.clone();
        handles.push(tokio::spawn(async move {
            dialer_db::debit_balance(&pool, &tenant, 1).await
        }));
    }
    for h in handles {
        h.await??;
    }

    let balance = dialer_db::get_balance(&pool, &tenant).await?;
    assert_eq!(balance, 990);

    Ok(())
}

#[tokio::test]
async fn campaign_ledger_aggregates_terminal_call_durations_once() -> anyhow::Result<()> {
    let Some(pool) = connect_or_skip().await else {
        return Ok(());
    };

    let tenant = format!("tenant-{}", Uuid::new_v4());
    let campaign_id = Uuid::new_v4();
    dialer_db::ensure_tenant_balance(&pool, &tenant, 1_000).await?;
    dialer_db::insert_campaign(
        &pool,
        &dialer_db::NewCampaign {
            id: campaign_id,
            tenant_id: tenant.clone(),
            name: "ledger-test".to_string(),
            list_id: "list-1".to_string(),
            from_number: "+10000000000".to_string(),
            provider_hint: None,
            bot_endpoint: "http://bot.local".to_string(),
            total_contacts: 2,
        },
    )
    .await?;

    for duration in [20i64, 40i64] {
        let call_id = Uuid::new_v4();
        dialer_db::try_insert_active_call(
            &pool,
            &dialer_db::NewActiveCall {
                call_id,
                tenant_id: tenant.clone(),
                campaign_id: Some(campaign_id),
                contact_index: Some(0),
                from_number: "+10000000000".to_string(),
                to_number: "+19999999999".to_string(),
                provider: "plivo".to_string(),
            },
            100,
            100,
        )
        .await?;
        dialer_db::mark_warming(&pool, call_id).await?;
        dialer_db::mark_ringing_after_dial(&pool, call_id, "prov-ref").await?;
        dialer_db::mark_answered(&pool, call_id, chrono::Utc::now()).await?;
        dialer_db::mark_completed(&pool, call_id, duration).await?;
        dialer_db::debit_balance(&pool, &tenant, duration).await?;
    }

    let total = dialer_db::aggregate_campaign_billed_seconds(&pool, campaign_id).await?;
    assert_eq!(total, 60);

    let balance = dialer_db::get_balance(&pool, &tenant).await?;
    assert_eq!(balance, 940);

    Ok(())
}
