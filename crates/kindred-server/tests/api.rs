use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use kindred_db::Database;
use kindred_server::{AppState, AppStateInner, PushHub, app};

fn state() -> AppState {
    Arc::new(AppStateInner {
        db: Database::open_in_memory().unwrap(),
        hub: PushHub::new(),
    })
}

async fn call(state: &AppState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn interest_lifecycle() {
    let state = state();

    let (status, _) = call(&state, "GET", "/interest?fromUserId=1&toUserId=2", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, created) =
        call(&state, "POST", "/interest", Some(json!({ "fromUserId": 1, "toUserId": 2 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["status"], "pending");

    let (status, updated) = call(
        &state,
        "POST",
        "/interest",
        Some(json!({ "fromUserId": 1, "toUserId": 2, "status": "accepted" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["status"], "accepted");
    assert_eq!(updated["createdOn"], created["createdOn"]);

    let (_, fetched) = call(&state, "GET", "/interest?fromUserId=1&toUserId=2", None).await;
    assert_eq!(fetched["status"], "accepted");

    let (status, _) = call(&state, "GET", "/interest?fromUserId=2&toUserId=1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_interest_requests_are_rejected() {
    let state = state();

    let (status, _) =
        call(&state, "POST", "/interest", Some(json!({ "fromUserId": 3, "toUserId": 3 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &state,
        "POST",
        "/interest",
        Some(json!({ "fromUserId": 1, "toUserId": 2, "status": "maybe" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn settled_interest_changes_are_conflicts() {
    let state = state();
    let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
    state.hub.subscribe(Uuid::new_v4(), "sub-1".into(), "/topic/1".into(), alice_tx).await;

    let (status, _) = call(
        &state,
        "POST",
        "/interest",
        Some(json!({ "fromUserId": 1, "toUserId": 2, "status": "accepted" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = call(&state, "GET", "/interest?fromUserId=1&toUserId=2", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    call(&state, "POST", "/interest", Some(json!({ "fromUserId": 1, "toUserId": 2 }))).await;
    call(
        &state,
        "POST",
        "/interest",
        Some(json!({ "fromUserId": 1, "toUserId": 2, "status": "declined" })),
    )
    .await;
    assert_eq!(alice_rx.recv().await.unwrap().destination, "/topic/1");

    for status in ["accepted", "pending"] {
        let (code, _) = call(
            &state,
            "POST",
            "/interest",
            Some(json!({ "fromUserId": 1, "toUserId": 2, "status": status })),
        )
        .await;
        assert_eq!(code, StatusCode::CONFLICT);
    }
    assert!(alice_rx.try_recv().is_err());

    let (_, fetched) = call(&state, "GET", "/interest?fromUserId=1&toUserId=2", None).await;
    assert_eq!(fetched["status"], "declined");
}

#[tokio::test]
async fn channel_create_then_conflict() {
    let state = state();

    let (status, created) =
        call(&state, "POST", "/channel", Some(json!({ "fromUserId": 1, "toUserId": 2 }))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, existing) =
        call(&state, "POST", "/channel", Some(json!({ "fromUserId": 2, "toUserId": 1 }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(existing["id"], created["id"]);

    let (status, fetched) = call(&state, "GET", "/channel?fromUserId=2&toUserId=1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], created["id"]);

    let (_, list) = call(&state, "GET", "/channels?userId=2", None).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn listings_filter_by_direction_and_status() {
    let state = state();
    for from in [2, 3] {
        call(&state, "POST", "/interest", Some(json!({ "fromUserId": from, "toUserId": 1 }))).await;
    }
    call(
        &state,
        "POST",
        "/interest",
        Some(json!({ "fromUserId": 3, "toUserId": 1, "status": "declined" })),
    )
    .await;

    let (_, incoming) = call(&state, "GET", "/interests/incoming?userId=1", None).await;
    assert_eq!(incoming.as_array().unwrap().len(), 2);

    let (_, pending) = call(&state, "GET", "/interests/incoming?userId=1&status=pending", None).await;
    let pending = pending.as_array().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["fromUserId"], 2);

    let (_, sent) = call(&state, "GET", "/interests/sent?userId=3", None).await;
    assert_eq!(sent[0]["status"], "declined");
}

#[tokio::test]
async fn saves_publish_to_the_other_party() {
    let state = state();
    let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
    let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
    state.hub.subscribe(Uuid::new_v4(), "sub-1".into(), "/topic/1".into(), alice_tx).await;
    state.hub.subscribe(Uuid::new_v4(), "sub-2".into(), "/topic/2".into(), bob_tx).await;

    call(&state, "POST", "/interest", Some(json!({ "fromUserId": 1, "toUserId": 2 }))).await;
    let received: Value = serde_json::from_str(&bob_rx.recv().await.unwrap().body).unwrap();
    assert_eq!(received["eventType"], "INTEREST_RECEIVED");
    assert!(alice_rx.try_recv().is_err());

    call(
        &state,
        "POST",
        "/interest",
        Some(json!({ "fromUserId": 1, "toUserId": 2, "status": "accepted" })),
    )
    .await;
    let responded: Value = serde_json::from_str(&alice_rx.recv().await.unwrap().body).unwrap();
    assert_eq!(responded["eventType"], "INTEREST_RESPONDED");
    assert_eq!(responded["payload"]["status"], "accepted");

    call(&state, "POST", "/channel", Some(json!({ "fromUserId": 2, "toUserId": 1 }))).await;
    for rx in [&mut alice_rx, &mut bob_rx] {
        let created: Value = serde_json::from_str(&rx.recv().await.unwrap().body).unwrap();
        assert_eq!(created["eventType"], "CHANNEL_CREATED");
    }
}
