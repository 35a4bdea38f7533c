use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use meter_service::{
    api::{create_router, AppState},
    ingest::IngestOptions,
    store::MemoryReadingStore,
};
use serde_json::{json, Value};
use tower::ServiceExt;

fn test_state() -> AppState {
    AppState::new(
        Arc::new(MemoryReadingStore::new()),
        IngestOptions::default(),
        16,
    )
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn root_and_health_respond() {
    let app = create_router(test_state());

    let (status, body) = send(&app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("hello world".to_string()));

    let (status, body) = send(&app, get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn posted_readings_get_deltas_from_the_previous_counter() {
    let app = create_router(test_state());

    let (status, first) = send(
        &app,
        post_json(
            "/api/data",
            json!({
                "device_id": "ESP32-001",
                "voltage": 230.1,
                "current": 1.2,
                "power": 276.0,
                "energy": 100.0,
                "timestamp": "2024-05-01T10:00:00Z"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["success"], true);
    assert_eq!(first["data"]["energy"], 100.0);
    assert_eq!(first["data"]["lastEnergy"], 100.0);
    assert_eq!(first["data"]["timestamp"], "2024-05-01T10:00:00Z");
    assert!(first["data"]["createdAt"].is_string());

    let (status, second) = send(
        &app,
        post_json(
            "/api/data",
            json!({
                "device_id": "ESP32-001",
                "energy": "104.5",
                "timestamp": "2024-05-01T10:01:00Z"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(second["data"]["energy"], 4.5);
    assert_eq!(second["data"]["lastEnergy"], 104.5);

    // A different device bootstraps from its own counter.
    let (_, other) = send(
        &app,
        post_json("/api/data", json!({ "device_id": "ESP32-002", "energy": 7 })),
    )
    .await;
    assert_eq!(other["data"]["energy"], 7.0);
}

#[tokio::test]
async fn invalid_readings_are_rejected_with_field_errors() {
    let app = create_router(test_state());

    let (status, body) = send(
        &app,
        post_json("/api/data", json!({ "device_id": " ", "voltage": -3 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let fields: Vec<_> = body["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["field"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(fields, vec!["device_id", "voltage"]);
    assert_eq!(body["errors"][1]["value"], -3);

    let malformed = Request::builder()
        .method(Method::POST)
        .uri("/api/data")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&app, malformed).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["field"], "body");

    // Nothing was stored.
    let (_, latest) = send(&app, get("/api/data/latest")).await;
    assert_eq!(latest, json!({ "data": null }));
}

#[tokio::test]
async fn latest_and_last_one_return_the_newest_reading() {
    let app = create_router(test_state());

    for (i, energy) in [10.0, 12.0, 15.0].into_iter().enumerate() {
        let (status, _) = send(
            &app,
            post_json(
                "/api/data",
                json!({
                    "device_id": "m-1",
                    "energy": energy,
                    "timestamp": format!("2024-05-01T10:0{i}:00Z")
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, latest) = send(&app, get("/api/data/latest?device_id=m-1")).await;
    assert_eq!(status, StatusCode::OK);
    let (_, last_one) = send(&app, get("/api/data/last-one?device_id=m-1")).await;
    assert_eq!(latest, last_one);
    assert_eq!(latest["data"]["lastEnergy"], 15.0);
    assert_eq!(latest["data"]["energy"], 3.0);

    let (_, missing) = send(&app, get("/api/data/last-one?device_id=unknown")).await;
    assert_eq!(missing, json!({ "data": null }));
}

#[tokio::test]
async fn history_pages_and_clamps_parameters() {
    let app = create_router(test_state());

    for minute in 0..5 {
        send(
            &app,
            post_json(
                "/api/data",
                json!({
                    "device_id": "m-1",
                    "energy": minute as f64,
                    "timestamp": format!("2024-05-01T10:0{minute}:00Z")
                }),
            ),
        )
        .await;
    }

    let (status, page) = send(&app, get("/api/data/history?device_id=m-1&page=2&limit=2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["page"], 2);
    assert_eq!(page["limit"], 2);
    assert_eq!(page["total"], 5);
    let counters: Vec<_> = page["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["lastEnergy"].as_f64().unwrap())
        .collect();
    assert_eq!(counters, vec![2.0, 1.0]);

    let (_, clamped) = send(&app, get("/api/data/history?page=-2&limit=5000")).await;
    assert_eq!(clamped["page"], 1);
    assert_eq!(clamped["limit"], 1000);

    let (_, defaults) = send(&app, get("/api/data/history?limit=abc")).await;
    assert_eq!(defaults["limit"], 100);
    assert_eq!(defaults["data"].as_array().unwrap().len(), 5);

    let (_, bounded) = send(
        &app,
        get("/api/data/history?from=2024-05-01T10:01:00Z&to=2024-05-01T10:03:00Z"),
    )
    .await;
    assert_eq!(bounded["total"], 3);

    let (status, body) = send(&app, get("/api/data/history?from=yesterday")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["field"], "from");
}

#[tokio::test]
async fn usage_sums_deltas_recorded_recently() {
    let app = create_router(test_state());

    let (_, empty) = send(&app, get("/api/data/usage")).await;
    assert_eq!(empty, json!({ "last24hUsage": 0.0, "last30dUsage": 0.0 }));

    send(&app, post_json("/api/data", json!({ "device_id": "m-1", "energy": 100 }))).await;
    send(&app, post_json("/api/data", json!({ "device_id": "m-1", "energy": 104.5 }))).await;
    send(&app, post_json("/api/data", json!({ "device_id": "m-2", "energy": 1 }))).await;

    let (status, all) = send(&app, get("/api/data/usage")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all["last24hUsage"], 105.5);
    assert_eq!(all["last30dUsage"], 105.5);

    let (_, one) = send(&app, get("/api/data/usage?device_id=m-1")).await;
    assert_eq!(one["last24hUsage"], 104.5);
}

#[tokio::test]
async fn ingested_readings_are_broadcast_to_realtime_subscribers() {
    let state = test_state();
    let mut rx = state.realtime.subscribe();
    let app = create_router(state);

    let (_, created) = send(
        &app,
        post_json("/api/data", json!({ "device_id": "ESP32-001", "energy": 42 })),
    )
    .await;

    let event = rx.recv().await.unwrap();
    let frame = serde_json::to_value(&event).unwrap();
    assert_eq!(frame["event"], "new-measurement");
    assert_eq!(frame["data"], created["data"]);
}

#[tokio::test]
async fn rejected_readings_are_not_broadcast() {
    let state = test_state();
    let mut rx = state.realtime.subscribe();
    let app = create_router(state);

    let (status, _) = send(&app, post_json("/api/data", json!({ "voltage": 1 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(rx.try_recv().is_err());
}
