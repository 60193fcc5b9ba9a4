use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::StatusCode;
use axum::routing::{any, post};
use bytes::Bytes;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use keyhub::balancer::Balancer;
use keyhub::outbound::ClientPool;
use keyhub::relay::{self, RelayEndpoint, RelayError};
use keyhub::storage;

async fn spawn_app(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://127.0.0.1:{}", addr.port())
}

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
    spawn_app(app).await
}

fn temp_db_path() -> std::path::PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("keyhub-test-{}.sqlite", uuid::Uuid::new_v4()));
    p
}

struct Harness {
    db_path: std::path::PathBuf,
    clients: Arc<ClientPool>,
    balancer: Arc<Balancer>,
    token: storage::Token,
}

async fn harness() -> Harness {
    let db_path = temp_db_path();
    storage::init_db(&db_path).expect("init_db");
    let token = storage::create_token(
        db_path.clone(),
        storage::CreateToken {
            name: "test".to_string(),
            allowed_channels: vec![],
            rate_limit: None,
            enabled: true,
        },
    )
    .await
    .expect("create_token");

    Harness {
        db_path,
        clients: Arc::new(ClientPool::new().expect("client pool")),
        balancer: Arc::new(Balancer::new()),
        token,
    }
}

async fn add_channel_with_active_key(
    db_path: &std::path::Path,
    name: &str,
    base_url: &str,
) -> (storage::Channel, storage::ApiKey) {
    let channel = storage::create_channel(
        db_path.to_path_buf(),
        storage::CreateChannel {
            name: name.to_string(),
            channel_type: storage::ChannelType::Openai,
            base_url: base_url.to_string(),
            test_method: storage::TestMethod::Models,
            test_model: None,
            proxy_id: None,
            load_balance_strategy: storage::LoadBalanceStrategy::RoundRobin,
            enabled: true,
        },
    )
    .await
    .expect("create_channel");

    let key = storage::create_key(
        db_path.to_path_buf(),
        storage::CreateKey {
            channel_id: channel.id.clone(),
            key: "sk-test-0123456789abcdef".to_string(),
            alias: None,
            priority: 50,
            weight: 50,
        },
    )
    .await
    .expect("create_key");
    storage::apply_check_result(
        db_path.to_path_buf(),
        key.id.clone(),
        storage::KeyStatus::Active,
        None,
    )
    .await
    .expect("activate key");

    let key = storage::get_key(db_path.to_path_buf(), key.id)
        .await
        .expect("get_key")
        .expect("key exists");
    (channel, key)
}

async fn wait_for_logs(db_path: &std::path::Path, expected: i64) -> Vec<storage::RequestLog> {
    for _ in 0..50 {
        let result = storage::query_logs(db_path.to_path_buf(), storage::LogQuery::default())
            .await
            .expect("query_logs");
        if result.total >= expected {
            return result.items;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("expected {expected} log rows");
}

async fn wait_for_key<F>(db_path: &std::path::Path, key_id: &str, pred: F) -> storage::ApiKey
where
    F: Fn(&storage::ApiKey) -> bool,
{
    for _ in 0..50 {
        let key = storage::get_key(db_path.to_path_buf(), key_id.to_string())
            .await
            .expect("get_key")
            .expect("key exists");
        if pred(&key) {
            return key;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("key never reached expected state");
}

#[tokio::test]
async fn unary_relay_mirrors_upstream_and_accounts() {
    let upstream = spawn_upstream(
        StatusCode::OK,
        r#"{"id":"cmpl-1","usage":{"prompt_tokens":7,"completion_tokens":3}}"#,
    )
    .await;

    let h = harness().await;
    let (channel, key) = add_channel_with_active_key(&h.db_path, "c1", &upstream).await;

    let resp = relay::forward(
        &h.clients,
        &h.balancer,
        h.db_path.clone(),
        &h.token,
        RelayEndpoint::ChatCompletions,
        Bytes::from(r#"{"model":"gpt-4o","messages":[]}"#),
    )
    .await
    .expect("forward");

    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.expect("body");
    assert_eq!(
        std::str::from_utf8(&bytes).unwrap(),
        r#"{"id":"cmpl-1","usage":{"prompt_tokens":7,"completion_tokens":3}}"#
    );

    let logs = wait_for_logs(&h.db_path, 1).await;
    assert_eq!(logs.len(), 1);
    let log = &logs[0];
    assert_eq!(log.channel_id, channel.id);
    assert_eq!(log.key_id, key.id);
    assert_eq!(log.model, "gpt-4o");
    assert_eq!(log.status, 200);
    assert_eq!(log.path, "/v1/chat/completions");
    assert!(!log.streaming);
    assert_eq!(log.input_tokens, Some(7));
    assert_eq!(log.output_tokens, Some(3));
    assert_eq!(log.error, None);

    let key = wait_for_key(&h.db_path, &key.id, |k| k.total_requests == 1).await;
    assert_eq!(key.error_count, 0);
    assert!(key.last_used_ms.is_some());
}

#[tokio::test]
async fn upstream_error_is_mirrored_and_counted() {
    let upstream = spawn_upstream(StatusCode::TOO_MANY_REQUESTS, r#"{"error":"slow down"}"#).await;

    let h = harness().await;
    let (_, key) = add_channel_with_active_key(&h.db_path, "c1", &upstream).await;

    let resp = relay::forward(
        &h.clients,
        &h.balancer,
        h.db_path.clone(),
        &h.token,
        RelayEndpoint::ChatCompletions,
        Bytes::from(r#"{"model":"gpt-4o"}"#),
    )
    .await
    .expect("forward");
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

    let logs = wait_for_logs(&h.db_path, 1).await;
    assert_eq!(logs[0].status, 429);
    assert_eq!(logs[0].error.as_deref(), Some(r#"{"error":"slow down"}"#));

    let key = wait_for_key(&h.db_path, &key.id, |k| k.total_requests == 1).await;
    assert_eq!(key.error_count, 1);
}

#[tokio::test]
async fn missing_model_is_rejected() {
    let h = harness().await;
    let err = relay::forward(
        &h.clients,
        &h.balancer,
        h.db_path.clone(),
        &h.token,
        RelayEndpoint::ChatCompletions,
        Bytes::from(r#"{"messages":[]}"#),
    )
    .await
    .expect_err("should fail");
    assert!(matches!(err, RelayError::MissingModel));
}

#[tokio::test]
async fn no_candidate_yields_unavailable() {
    let h = harness().await;

    // no channels at all
    let err = relay::forward(
        &h.clients,
        &h.balancer,
        h.db_path.clone(),
        &h.token,
        RelayEndpoint::ChatCompletions,
        Bytes::from(r#"{"model":"gpt-4o"}"#),
    )
    .await
    .expect_err("should fail");
    assert!(matches!(err, RelayError::NoAvailableKey));

    // a channel of the wrong provider type does not match a claude model
    let upstream = spawn_upstream(StatusCode::OK, r#"{}"#).await;
    add_channel_with_active_key(&h.db_path, "openai-only", &upstream).await;
    let err = relay::forward(
        &h.clients,
        &h.balancer,
        h.db_path.clone(),
        &h.token,
        RelayEndpoint::ChatCompletions,
        Bytes::from(r#"{"model":"claude-3-haiku"}"#),
    )
    .await
    .expect_err("should fail");
    assert!(matches!(err, RelayError::NoAvailableKey));
}

#[tokio::test]
async fn token_scope_restricts_channels() {
    let upstream = spawn_upstream(StatusCode::OK, r#"{"ok":true}"#).await;
    let h = harness().await;
    let (channel, _) = add_channel_with_active_key(&h.db_path, "c1", &upstream).await;

    let scoped = storage::create_token(
        h.db_path.clone(),
        storage::CreateToken {
            name: "scoped".to_string(),
            allowed_channels: vec!["some-other-channel".to_string()],
            rate_limit: None,
            enabled: true,
        },
    )
    .await
    .expect("create_token");

    let err = relay::forward(
        &h.clients,
        &h.balancer,
        h.db_path.clone(),
        &scoped,
        RelayEndpoint::ChatCompletions,
        Bytes::from(r#"{"model":"gpt-4o"}"#),
    )
    .await
    .expect_err("should fail");
    assert!(matches!(err, RelayError::NoAvailableKey));

    // widening the scope to the real channel makes it eligible again
    let widened = storage::update_token(
        h.db_path.clone(),
        scoped.id.clone(),
        storage::UpdateToken {
            allowed_channels: Some(vec![channel.id.clone()]),
            ..Default::default()
        },
    )
    .await
    .expect("update_token")
    .expect("token exists");
    let resp = relay::forward(
        &h.clients,
        &h.balancer,
        h.db_path.clone(),
        &widened,
        RelayEndpoint::ChatCompletions,
        Bytes::from(r#"{"model":"gpt-4o"}"#),
    )
    .await
    .expect("forward");
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn transport_failure_bumps_error_count_only() {
    let h = harness().await;
    // nothing listens on this port
    let (_, key) = add_channel_with_active_key(&h.db_path, "dead", "http://127.0.0.1:9").await;

    let err = relay::forward(
        &h.clients,
        &h.balancer,
        h.db_path.clone(),
        &h.token,
        RelayEndpoint::ChatCompletions,
        Bytes::from(r#"{"model":"gpt-4o"}"#),
    )
    .await
    .expect_err("should fail");
    assert!(matches!(err, RelayError::Upstream(_)));

    let logs = wait_for_logs(&h.db_path, 1).await;
    assert_eq!(logs[0].status, 500);
    assert!(logs[0].error.is_some());

    let key = wait_for_key(&h.db_path, &key.id, |k| k.error_count == 1).await;
    assert_eq!(key.total_requests, 0);
}

#[tokio::test]
async fn streaming_relay_passes_chunks_and_logs_once() {
    let chunks = [
        "data: {\"choices\":[],\"usage\":null}\n\n",
        "data: {\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":2}}\n\n",
        "data: [DONE]\n\n",
    ];
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move || async move {
            let stream = futures_util::stream::iter(
                chunks
                    .into_iter()
                    .map(|c| Ok::<_, Infallible>(Bytes::from_static(c.as_bytes()))),
            );
            (
                [(axum::http::header::CONTENT_TYPE, "text/event-stream")],
                Body::from_stream(stream),
            )
        }),
    );
    let upstream = spawn_app(app).await;

    let h = harness().await;
    add_channel_with_active_key(&h.db_path, "sse", &upstream).await;

    let resp = relay::forward(
        &h.clients,
        &h.balancer,
        h.db_path.clone(),
        &h.token,
        RelayEndpoint::ChatCompletions,
        Bytes::from(r#"{"model":"gpt-4o","stream":true}"#),
    )
    .await
    .expect("forward");

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()
            .get(axum::http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );

    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.expect("body");
    assert_eq!(std::str::from_utf8(&bytes).unwrap(), chunks.concat());

    let logs = wait_for_logs(&h.db_path, 1).await;
    assert_eq!(logs.len(), 1);
    assert!(logs[0].streaming);
    assert_eq!(logs[0].status, 200);
    assert_eq!(logs[0].input_tokens, Some(5));
    assert_eq!(logs[0].output_tokens, Some(2));
}

#[tokio::test]
async fn round_robin_alternates_between_keys() {
    let upstream = spawn_upstream(StatusCode::OK, r#"{"ok":true}"#).await;
    let h = harness().await;
    let (channel, k1) = add_channel_with_active_key(&h.db_path, "c1", &upstream).await;

    let k2 = storage::create_key(
        h.db_path.clone(),
        storage::CreateKey {
            channel_id: channel.id.clone(),
            key: "sk-second-0123456789abcdef".to_string(),
            alias: None,
            priority: 50,
            weight: 50,
        },
    )
    .await
    .expect("create_key");
    storage::apply_check_result(
        h.db_path.clone(),
        k2.id.clone(),
        storage::KeyStatus::Active,
        None,
    )
    .await
    .expect("activate");

    for _ in 0..4 {
        let resp = relay::forward(
            &h.clients,
            &h.balancer,
            h.db_path.clone(),
            &h.token,
            RelayEndpoint::ChatCompletions,
            Bytes::from(r#"{"model":"gpt-4o"}"#),
        )
        .await
        .expect("forward");
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let k1 = wait_for_key(&h.db_path, &k1.id, |k| k.total_requests == 2).await;
    let k2 = wait_for_key(&h.db_path, &k2.id, |k| k.total_requests == 2).await;
    assert_eq!(k1.total_requests, 2);
    assert_eq!(k2.total_requests, 2);
}
