use axum::Router;
use axum::http::StatusCode;
use axum::routing::any;
use std::sync::Arc;

use keyhub::checker;
use keyhub::outbound::ClientPool;
use keyhub::storage;

async fn spawn_upstream(status: StatusCode, body: &'static str) -> String {
    let app = Router::new().route(
        "/{*path}",
        any(move || async move {
            (
                status,
                [(axum::http::header::CONTENT_TYPE, "application/json")],
                body,
            )
        }),
    );
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://127.0.0.1:{}", addr.port())
}

fn temp_db_path() -> std::path::PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("keyhub-test-{}.sqlite", uuid::Uuid::new_v4()));
    p
}

async fn setup(
    base_url: &str,
    test_method: storage::TestMethod,
) -> (std::path::PathBuf, storage::Channel, storage::ApiKey) {
    let db_path = temp_db_path();
    storage::init_db(&db_path).expect("init_db");
    let channel = storage::create_channel(
        db_path.clone(),
        storage::CreateChannel {
            name: "probe-target".to_string(),
            channel_type: storage::ChannelType::Openai,
            base_url: base_url.to_string(),
            test_method,
            test_model: None,
            proxy_id: None,
            load_balance_strategy: storage::LoadBalanceStrategy::RoundRobin,
            enabled: true,
        },
    )
    .await
    .expect("create_channel");
    let key = storage::create_key(
        db_path.clone(),
        storage::CreateKey {
            channel_id: channel.id.clone(),
            key: "sk-probe-0123456789abcdef".to_string(),
            alias: None,
            priority: 50,
            weight: 50,
        },
    )
    .await
    .expect("create_key");
    (db_path, channel, key)
}

#[tokio::test]
async fn probe_unauthorized_marks_invalid() {
    let upstream = spawn_upstream(StatusCode::UNAUTHORIZED, r#"{"error":"bad key"}"#).await;
    let (db_path, _, key) = setup(&upstream, storage::TestMethod::Models).await;
    let clients = Arc::new(ClientPool::new().expect("client pool"));

    let result = checker::check_one(&clients, db_path.clone(), key.id.clone())
        .await
        .expect("check_one")
        .expect("key exists");
    assert_eq!(result.status, storage::KeyStatus::Invalid);

    let key = storage::get_key(db_path, key.id)
        .await
        .expect("get_key")
        .expect("key exists");
    assert_eq!(key.status, storage::KeyStatus::Invalid);
    assert_eq!(key.error_count, 1);
    assert!(key.last_checked_ms.is_some());
}

#[tokio::test]
async fn probe_rate_limited_marks_quota_exceeded() {
    let upstream = spawn_upstream(StatusCode::TOO_MANY_REQUESTS, r#"{"error":"quota"}"#).await;
    let (db_path, _, key) = setup(&upstream, storage::TestMethod::Chat).await;
    let clients = Arc::new(ClientPool::new().expect("client pool"));

    let result = checker::check_one(&clients, db_path.clone(), key.id.clone())
        .await
        .expect("check_one")
        .expect("key exists");
    assert_eq!(result.status, storage::KeyStatus::QuotaExceeded);

    let key = storage::get_key(db_path, key.id)
        .await
        .expect("get_key")
        .expect("key exists");
    assert_eq!(key.status, storage::KeyStatus::QuotaExceeded);
}

#[tokio::test]
async fn probe_success_activates_and_resets_errors() {
    let upstream = spawn_upstream(StatusCode::OK, r#"{"data":[]}"#).await;
    let (db_path, _, key) = setup(&upstream, storage::TestMethod::Models).await;
    let clients = Arc::new(ClientPool::new().expect("client pool"));

    storage::record_key_transport_failure(db_path.clone(), key.id.clone())
        .await
        .expect("seed error count");

    let result = checker::check_one(&clients, db_path.clone(), key.id.clone())
        .await
        .expect("check_one")
        .expect("key exists");
    assert_eq!(result.status, storage::KeyStatus::Active);
    assert_eq!(result.error, None);

    let key = storage::get_key(db_path, key.id)
        .await
        .expect("get_key")
        .expect("key exists");
    assert_eq!(key.status, storage::KeyStatus::Active);
    assert_eq!(key.error_count, 0);
}

#[tokio::test]
async fn probe_balance_method_parses_total_available() {
    let upstream = spawn_upstream(StatusCode::OK, r#"{"total_available":42.5}"#).await;
    let (db_path, _, key) = setup(&upstream, storage::TestMethod::Balance).await;
    let clients = Arc::new(ClientPool::new().expect("client pool"));

    let result = checker::check_one(&clients, db_path.clone(), key.id.clone())
        .await
        .expect("check_one")
        .expect("key exists");
    assert_eq!(result.status, storage::KeyStatus::Active);
    assert_eq!(result.balance, Some(42.5));

    let key = storage::get_key(db_path, key.id)
        .await
        .expect("get_key")
        .expect("key exists");
    assert_eq!(key.balance, Some(42.5));
}

#[tokio::test]
async fn probe_transport_failure_is_invalid_with_error() {
    let (db_path, _, key) = setup("http://127.0.0.1:9", storage::TestMethod::Models).await;
    let clients = Arc::new(ClientPool::new().expect("client pool"));

    let result = checker::check_one(&clients, db_path.clone(), key.id.clone())
        .await
        .expect("check_one")
        .expect("key exists");
    assert_eq!(result.status, storage::KeyStatus::Invalid);
    assert!(result.error.is_some());
}

#[tokio::test]
async fn probe_other_http_error_keeps_body_snippet() {
    let upstream = spawn_upstream(StatusCode::BAD_GATEWAY, r#"{"error":"upstream sad"}"#).await;
    let (db_path, _, key) = setup(&upstream, storage::TestMethod::Models).await;
    let clients = Arc::new(ClientPool::new().expect("client pool"));

    let result = checker::check_one(&clients, db_path, key.id)
        .await
        .expect("check_one")
        .expect("key exists");
    assert_eq!(result.status, storage::KeyStatus::Invalid);
    let error = result.error.expect("error recorded");
    assert!(error.starts_with("HTTP 502:"));
    assert!(error.contains("upstream sad"));
}

#[tokio::test]
async fn missing_key_or_channel_yields_none() {
    let db_path = temp_db_path();
    storage::init_db(&db_path).expect("init_db");
    let clients = Arc::new(ClientPool::new().expect("client pool"));

    let result = checker::check_one(&clients, db_path, "nope".to_string())
        .await
        .expect("check_one");
    assert!(result.is_none());
}

#[tokio::test]
async fn disabled_keys_are_skipped_by_bulk_check() {
    let upstream = spawn_upstream(StatusCode::OK, r#"{"data":[]}"#).await;
    let (db_path, channel, key) = setup(&upstream, storage::TestMethod::Models).await;
    let clients = Arc::new(ClientPool::new().expect("client pool"));

    storage::update_key(
        db_path.clone(),
        key.id.clone(),
        storage::UpdateKey {
            status: Some(storage::KeyStatus::Disabled),
            ..Default::default()
        },
    )
    .await
    .expect("disable key")
    .expect("key exists");

    checker::check_channel_keys(&clients, db_path.clone(), &channel)
        .await
        .expect("check_channel_keys");

    let key = storage::get_key(db_path, key.id)
        .await
        .expect("get_key")
        .expect("key exists");
    // still disabled: the sweep never probed it
    assert_eq!(key.status, storage::KeyStatus::Disabled);
    assert_eq!(key.last_checked_ms, None);
}
