use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use ledger_core::adapters::InMemoryStore;
use ledger_core::domain::{Account, AccountStatus, Money};
use ledger_core::ports::AccountStore;
use ledger_core::use_cases::TransferSettings;
use ledger_core::{create_app, AppState};
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

struct TestApp {
    app: Router,
    store: InMemoryStore,
}

fn setup_test_app() -> TestApp {
    let settings = TransferSettings {
        lock_timeout: Duration::from_secs(2),
        idempotency_ttl: Duration::from_secs(3600),
        replay_wait: Duration::from_millis(500),
    };
    let store = InMemoryStore::new(settings.lock_timeout);
    TestApp {
        app: create_app(AppState::in_memory(&store, settings)),
        store,
    }
}

async fn open(app: &TestApp, owner: Uuid, balance: &str) -> Account {
    let account = Account::open(
        owner,
        format!("ACC-{}", &Uuid::new_v4().simple().to_string()[..12]),
        Money::parse(balance, "USD").unwrap(),
    )
    .unwrap();
    app.store.insert(&account).await.unwrap();
    account
}

fn transfer_request(actor: Uuid, key: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/transfers")
        .header("content-type", "application/json")
        .header("x-user-id", actor.to_string());
    if let Some(key) = key {
        builder = builder.header("idempotency-key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, actor: Uuid) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-user-id", actor.to_string())
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
    let response = app.app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, body)
}

#[tokio::test]
async fn test_transfer_created() {
    let app = setup_test_app();
    let owner = Uuid::new_v4();
    let source = open(&app, owner, "1000").await;
    let target = open(&app, Uuid::new_v4(), "0").await;

    let (status, headers, body) = send(
        &app,
        transfer_request(
            owner,
            None,
            json!({"sourceAccountId": source.id, "targetAccountId": target.id, "amount": 250.5}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert!(headers.get("idempotency-replayed").is_none());
    assert!(headers.contains_key("x-request-id"));
    assert_eq!(body["status"], "COMPLETED");
    assert_eq!(body["currency"], "USD");
    assert_eq!(body["replayed"], false);
    assert_eq!(body["sourceBalanceAfter"].to_string(), "749.5000");
    assert_eq!(body["amount"].to_string(), "250.5000");
}

#[tokio::test]
async fn test_transfer_replay_returns_200_with_header() {
    let app = setup_test_app();
    let owner = Uuid::new_v4();
    let source = open(&app, owner, "1000").await;
    let target = open(&app, Uuid::new_v4(), "0").await;
    let body = json!({"sourceAccountId": source.id, "targetAccountId": target.id, "amount": 100});

    let (first_status, _, first) = send(&app, transfer_request(owner, Some("pay-1"), body.clone())).await;
    let (second_status, headers, second) = send(&app, transfer_request(owner, Some("pay-1"), body)).await;

    assert_eq!(first_status, StatusCode::CREATED);
    assert_eq!(second_status, StatusCode::OK);
    assert_eq!(headers["idempotency-replayed"], "true");
    assert_eq!(first["transactionId"], second["transactionId"]);
    assert_eq!(second["replayed"], true);

    let (_, _, account) = send(&app, get(&format!("/api/v1/accounts/{}", source.id), owner)).await;
    assert_eq!(account["balance"].to_string(), "900.0000");
}

#[tokio::test]
async fn test_idempotency_key_of_another_actor_is_403() {
    let app = setup_test_app();
    let owner = Uuid::new_v4();
    let source = open(&app, owner, "1000").await;
    let target = open(&app, Uuid::new_v4(), "0").await;

    let (status, _, _) = send(
        &app,
        transfer_request(
            owner,
            Some("k-1"),
            json!({"sourceAccountId": source.id, "targetAccountId": target.id, "amount": 250}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, headers, body) = send(
        &app,
        transfer_request(
            Uuid::new_v4(),
            Some("k-1"),
            json!({"sourceAccountId": Uuid::new_v4(), "targetAccountId": Uuid::new_v4(), "amount": 1}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(headers.get("idempotency-replayed").is_none());
    assert_eq!(body["detail"], "You do not have access to this account");
    assert!(body.get("transactionId").is_none());
    assert!(body.get("sourceBalanceAfter").is_none());

    let (_, _, account) = send(&app, get(&format!("/api/v1/accounts/{}", source.id), owner)).await;
    assert_eq!(account["balance"].to_string(), "750.0000");
}

#[tokio::test]
async fn test_insufficient_funds_is_422() {
    let app = setup_test_app();
    let owner = Uuid::new_v4();
    let source = open(&app, owner, "10").await;
    let target = open(&app, Uuid::new_v4(), "0").await;

    let (status, _, body) = send(
        &app,
        transfer_request(
            owner,
            None,
            json!({"sourceAccountId": source.id, "targetAccountId": target.id, "amount": 10.0001}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["type"], "INSUFFICIENT_FUNDS");
}

#[tokio::test]
async fn test_inactive_account_is_422() {
    let app = setup_test_app();
    let owner = Uuid::new_v4();
    let source = open(&app, owner, "100").await;
    let mut frozen = Account::open(
        Uuid::new_v4(),
        format!("ACC-{}", &Uuid::new_v4().simple().to_string()[..12]),
        Money::parse("0", "USD").unwrap(),
    )
    .unwrap();
    frozen.status = AccountStatus::Frozen;
    app.store.insert(&frozen).await.unwrap();

    let (status, _, body) = send(
        &app,
        transfer_request(
            owner,
            None,
            json!({"sourceAccountId": source.id, "targetAccountId": frozen.id, "amount": 1}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["type"], "ACCOUNT_NOT_ACTIVE");
}

#[tokio::test]
async fn test_foreign_source_account_is_403() {
    let app = setup_test_app();
    let source = open(&app, Uuid::new_v4(), "100").await;
    let target = open(&app, Uuid::new_v4(), "0").await;

    let (status, _, body) = send(
        &app,
        transfer_request(
            Uuid::new_v4(),
            None,
            json!({"sourceAccountId": source.id, "targetAccountId": target.id, "amount": 1}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["detail"], "You do not have access to this account");
}

#[tokio::test]
async fn test_malformed_requests_are_400() {
    let app = setup_test_app();
    let owner = Uuid::new_v4();
    let source = open(&app, owner, "100").await;
    let target = open(&app, Uuid::new_v4(), "0").await;

    let cases = vec![
        json!({"sourceAccountId": source.id, "targetAccountId": target.id, "amount": 1, "memo": "x"}),
        json!({"sourceAccountId": source.id, "targetAccountId": target.id, "amount": 1, "currency": "usd"}),
        json!({"sourceAccountId": source.id, "targetAccountId": target.id, "amount": 0}),
        json!({"sourceAccountId": source.id, "targetAccountId": target.id, "amount": 1.00001}),
        json!({"sourceAccountId": source.id, "targetAccountId": source.id, "amount": 1}),
        json!({"sourceAccountId": source.id, "amount": 1}),
    ];

    for case in cases {
        let (status, _, _) = send(&app, transfer_request(owner, None, case.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body: {}", case);
    }

    let oversized_key = "k".repeat(256);
    let (status, _, _) = send(
        &app,
        transfer_request(
            owner,
            Some(&oversized_key),
            json!({"sourceAccountId": source.id, "targetAccountId": target.id, "amount": 1}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_actor_is_401() {
    let app = setup_test_app();
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/transfers")
        .header("content-type", "application/json")
        .body(Body::from("{}"))
        .unwrap();

    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_account_is_404() {
    let app = setup_test_app();
    let owner = Uuid::new_v4();
    let source = open(&app, owner, "100").await;

    let (status, _, body) = send(
        &app,
        transfer_request(
            owner,
            None,
            json!({"sourceAccountId": source.id, "targetAccountId": Uuid::new_v4(), "amount": 1}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["type"], "ACCOUNT_NOT_FOUND");

    let (status, _, _) = send(&app, get(&format!("/api/v1/accounts/{}", Uuid::new_v4()), owner)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_read_endpoints_are_owner_scoped() {
    let app = setup_test_app();
    let owner = Uuid::new_v4();
    let stranger = Uuid::new_v4();
    let source = open(&app, owner, "100").await;
    let target = open(&app, Uuid::new_v4(), "0").await;

    let (_, _, result) = send(
        &app,
        transfer_request(
            owner,
            None,
            json!({"sourceAccountId": source.id, "targetAccountId": target.id, "amount": 40}),
        ),
    )
    .await;
    let tx_id = result["transactionId"].as_str().unwrap().to_string();

    let (status, _, history) = send(
        &app,
        get(&format!("/api/v1/accounts/{}/transactions", source.id), owner),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().unwrap().len(), 1);

    let (status, _, ledger) = send(&app, get(&format!("/api/v1/transactions/{}/ledger", tx_id), owner)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ledger.as_array().unwrap().len(), 2);

    let (status, _, _) = send(&app, get(&format!("/api/v1/accounts/{}", source.id), stranger)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = send(&app, get(&format!("/api/v1/transactions/{}/ledger", tx_id), stranger)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, accounts) = send(&app, get("/api/v1/accounts", owner)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(accounts.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_health_without_dependencies_is_ok() {
    let app = setup_test_app();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}
