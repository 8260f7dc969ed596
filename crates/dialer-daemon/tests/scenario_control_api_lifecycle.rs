//! In-process scenario tests for the Control API and webhook ingress.
//!
//! Grounded on `mqk-daemon`'s `scenario_daemon_routes.rs`: router composed
//! via `tower::ServiceExt::oneshot`, no TCP socket bound.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use dialer_daemon::{routes, state::AppState};
use dialer_runner::InMemoryContactSource;
use dialer_schemas::Contact;
use http_body_util::BodyExt;
use httpmock::MockServer;
use tower::ServiceExt; // oneshot
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

fn contact(index: i64, phone: &str) -> Contact {
    Contact {
        index,
        phone_number: phone.to_string(),
        first_name: None,
        custom_fields: serde_json::Value::Null,
    }
}

fn make_state(pool: sqlx::PgPool, lists: HashMap<String, Vec<Contact>>) -> Arc<AppState> {
    let mut config = dialer_config::EngineConfig::default();
    config.inter_call_pacing_ms = 0;
    config.warmup_backoff_ms = 1;

    Arc::new(AppState::new(
        pool,
        Arc::new(dialer_provider::PaperProvider::new()),
        Arc::new(InMemoryContactSource::new(lists)),
        config,
        format!("runner-{}", Uuid::new_v4()),
        "https://engine.example.com".to_string(),
    ))
}

async fn call(router: axum::Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let bytes = resp.into_body().collect().await.expect("body collect failed").to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

fn json_req(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_req(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_ok_true() {
    let Some(pool) = connect_or_skip().await else {
        return;
    };
    let st = make_state(pool, HashMap::new());
    let router = routes::build_router(st);

    let (status, json) = call(router, get_req("/v1/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "dialer-daemon");
}

// ---------------------------------------------------------------------------
// Unknown routes return 404
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_route_returns_404() {
    let Some(pool) = connect_or_skip().await else {
        return;
    };
    let st = make_state(pool, HashMap::new());
    let router = routes::build_router(st);

    let (status, _) = call(router, get_req("/v1/does-not-exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// POST /v1/campaigns derives totalContacts from the contact source, never
// from the request body.
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_campaign_derives_total_contacts_from_contact_source() {
    let Some(pool) = connect_or_skip().await else {
        return;
    };
    let tenant = format!("tenant-{}", Uuid::new_v4());
    dialer_db::ensure_tenant_balance(&pool, &tenant, 1_000).await.unwrap();

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(httpmock::Method::GET).path("/health");
        then.status(200);
    });

    let list_id = format!("list-{}", Uuid::new_v4());
    let mut lists = HashMap::new();
    lists.insert(list_id.clone(), vec![contact(0, "+19999999991")]);

    let st = make_state(pool.clone(), lists);
    let router = routes::build_router(Arc::clone(&st));

    let body = serde_json::json!({
        "tenantId": tenant,
        "name": "derive-total",
        "listId": list_id,
        "fromNumber": "+10000000000",
        "providerHint": "paper",
        "botEndpoint": server.url("/health"),
    });

    let (status, json) = call(router, json_req("POST", "/v1/campaigns", body)).await;
    assert_eq!(status, StatusCode::OK);
    let campaign_id: Uuid = serde_json::from_value(json["campaignId"].clone()).unwrap();

    let row = dialer_db::fetch_campaign(&pool, campaign_id).await.unwrap();
    assert_eq!(row.total_contacts, 1, "total_contacts must come from the contact list, not the request body");
}

// ---------------------------------------------------------------------------
// GET /v1/campaigns/:id reports heartbeatHealth
// ---------------------------------------------------------------------------

#[tokio::test]
async fn campaign_progress_reports_fields_and_heartbeat_health() {
    let Some(pool) = connect_or_skip().await else {
        return;
    };
    let tenant = format!("tenant-{}", Uuid::new_v4());
    dialer_db::ensure_tenant_balance(&pool, &tenant, 1_000).await.unwrap();
    let campaign_id = Uuid::new_v4();
    dialer_db::insert_campaign(
        &pool,
        &dialer_db::NewCampaign {
            id: campaign_id,
            tenant_id: tenant.clone(),
            name: "progress".to_string(),
            list_id: "list-progress".to_string(),
            from_number: "+10000000000".to_string(),
            provider_hint: Some("paper".to_string()),
            bot_endpoint: "http://example.invalid/health".to_string(),
            total_contacts: 5,
        },
    )
    .await
    .unwrap();

    let st = make_state(pool.clone(), HashMap::new());
    let router = routes::build_router(st);

    let (status, json) = call(router, get_req(&format!("/v1/campaigns/{campaign_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 5);
    assert_eq!(json["status"], "running");
    // freshly inserted: heartbeat is NULL, never considered healthy
    assert_eq!(json["heartbeatHealth"], "inactive");
}

#[tokio::test]
async fn campaign_progress_404_for_unknown_id() {
    let Some(pool) = connect_or_skip().await else {
        return;
    };
    let st = make_state(pool, HashMap::new());
    let router = routes::build_router(st);

    let (status, _) = call(router, get_req(&format!("/v1/campaigns/{}", Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// pause -> resume -> cancel lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pause_resume_cancel_lifecycle() {
    let Some(pool) = connect_or_skip().await else {
        return;
    };
    let tenant = format!("tenant-{}", Uuid::new_v4());
    dialer_db::ensure_tenant_balance(&pool, &tenant, 1_000).await.unwrap();
    let campaign_id = Uuid::new_v4();
    dialer_db::insert_campaign(
        &pool,
        &dialer_db::NewCampaign {
            id: campaign_id,
            tenant_id: tenant.clone(),
            name: "lifecycle".to_string(),
            list_id: "list-lifecycle".to_string(),
            from_number: "+10000000000".to_string(),
            provider_hint: Some("paper".to_string()),
            bot_endpoint: "http://example.invalid/health".to_string(),
            total_contacts: 5,
        },
    )
    .await
    .unwrap();

    let st = make_state(pool.clone(), HashMap::new());

    // pause a running campaign
    let (status, json) = call(
        routes::build_router(Arc::clone(&st)),
        Request::builder()
            .method("POST")
            .uri(format!("/v1/campaigns/{campaign_id}/pause"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);

    // pausing again is an invalid-state conflict, not idempotent
    let (status, _) = call(
        routes::build_router(Arc::clone(&st)),
        Request::builder()
            .method("POST")
            .uri(format!("/v1/campaigns/{campaign_id}/pause"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // resume reports remaining contacts
    let (status, json) = call(
        routes::build_router(Arc::clone(&st)),
        Request::builder()
            .method("POST")
            .uri(format!("/v1/campaigns/{campaign_id}/resume"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["remaining"], 5);

    // cancel
    let (status, json) = call(
        routes::build_router(Arc::clone(&st)),
        json_req(
            "POST",
            &format!("/v1/campaigns/{campaign_id}/cancel"),
            serde_json::json!({ "cancelledBy": "operator-test" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);

    // cancel is idempotent
    let (status, json) = call(
        routes::build_router(Arc::clone(&st)),
        json_req("POST", &format!("/v1/campaigns/{campaign_id}/cancel"), serde_json::json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);

    let row = dialer_db::fetch_campaign(&pool, campaign_id).await.unwrap();
    assert_eq!(row.status, "cancelled");
    assert_eq!(row.cancelled_by.as_deref(), Some("operator-test"));
}

// ---------------------------------------------------------------------------
// POST /v1/calls (SingleCall) then webhook ingress drives the call to
// completion and bills it as BillingKind::Test (no campaign attached).
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_call_then_webhooks_complete_and_bill_as_test_call() {
    let Some(pool) = connect_or_skip().await else {
        return;
    };
    let tenant = format!("tenant-{}", Uuid::new_v4());
    dialer_db::ensure_tenant_balance(&pool, &tenant, 1_000).await.unwrap();

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(httpmock::Method::GET).path("/health");
        then.status(200);
    });

    let st = make_state(pool.clone(), HashMap::new());
    let router = routes::build_router(Arc::clone(&st));

    let create_body = serde_json::json!({
        "tenantId": tenant,
        "from": "+10000000000",
        "to": "+19999999992",
        "botEndpoint": server.url("/health"),
    });
    let (status, json) = call(router, json_req("POST", "/v1/calls", create_body)).await;
    assert_eq!(status, StatusCode::OK);
    let call_id: Uuid = serde_json::from_value(json["callId"].clone()).unwrap();

    let row = dialer_db::fetch_active_call(&pool, call_id).await.unwrap();
    assert_eq!(row.state, "ringing");

    // ring ack, then answered, then hangup with a billable duration.
    for (kind, payload) in [
        ("ring", serde_json::json!({ "event": "ring" })),
        ("stream-start", serde_json::json!({ "event": "answered" })),
        ("hangup", serde_json::json!({ "event": "hangup", "duration_seconds": 30 })),
    ] {
        let (status, json) = call(
            routes::build_router(Arc::clone(&st)),
            json_req("POST", &format!("/webhooks/calls/{call_id}/{kind}"), payload),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{kind} webhook failed: {json:?}");
        assert_eq!(json["ok"], true);
    }

    let row = dialer_db::fetch_active_call(&pool, call_id).await.unwrap();
    assert_eq!(row.state, "completed");
    assert_eq!(row.billing_duration_secs, Some(30));

    let balance = dialer_db::get_balance(&pool, &tenant).await.unwrap();
    assert!(balance < 1_000, "a billable test call must debit the tenant balance");
}

// ---------------------------------------------------------------------------
// Late/duplicate webhooks for an unknown or already-terminal call are a
// silent no-op, never a 5xx.
// ---------------------------------------------------------------------------

#[tokio::test]
async fn webhook_for_unknown_call_is_a_no_op_not_an_error() {
    let Some(pool) = connect_or_skip().await else {
        return;
    };
    let st = make_state(pool, HashMap::new());
    let router = routes::build_router(st);

    let (status, json) = call(
        router,
        json_req(
            "POST",
            &format!("/webhooks/calls/{}/hangup", Uuid::new_v4()),
            serde_json::json!({ "event": "hangup" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
}
