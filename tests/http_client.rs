mod common;

use std::time::Duration;

use futures::StreamExt;
use httpmock::MockServer;
use serde_json::{Value, json};
use storeops::application::client::DataLayer;
use storeops::application::error::{ErrorKind, FetchError};
use storeops::application::fetch::Fetcher;
use storeops::application::mutations::Mutator;
use storeops::cache::EventSource;
use storeops::domain::{FetchRequest, MutationRequest, Operation, QueryParams, Resource};
use storeops::infra::http::HttpApiClient;
use storeops::infra::sse::{SseError, SseFrame};
use url::Url;

fn client(server: &MockServer, token: Option<&str>) -> HttpApiClient {
    HttpApiClient::new(
        &server.base_url(),
        token.map(str::to_string),
        Duration::from_secs(5),
    )
    .expect("client")
}

fn list(resource: Resource, params: QueryParams) -> FetchRequest {
    FetchRequest::new(resource, Operation::List, params)
}

#[tokio::test]
async fn list_request_carries_params_and_keeps_pagination() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method("GET")
                .path("/api/orders")
                .query_param("page", "2")
                .query_param("status", "pending")
                .header("authorization", "Bearer secret");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "success": true,
                    "data": [{"id": "o-1"}],
                    "pagination": {"page": 2, "limit": 20, "total": 21, "totalPages": 2}
                }));
        })
        .await;

    let value = client(&server, Some("secret"))
        .fetch(&list(
            Resource::Orders,
            QueryParams::page(2, 20).with("status", "pending"),
        ))
        .await
        .expect("orders");

    mock.assert_async().await;
    assert_eq!(value["items"], json!([{"id": "o-1"}]));
    assert_eq!(value["pagination"]["totalPages"], json!(2));
}

#[tokio::test]
async fn envelope_is_unwrapped() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method("GET").path("/api/dashboard/stats");
            then.status(200).json_body(json!({
                "success": true,
                "data": {"totalOrders": 7},
                "timestamp": "2024-05-01T10:00:00Z"
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method("GET").path("/api/activity");
            then.status(200).body("");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method("GET").path("/api/categories");
            then.status(200)
                .json_body(json!({"success": false, "message": "categories offline"}));
        })
        .await;

    let api = client(&server, None);
    let stats = api
        .fetch(&FetchRequest::new(
            Resource::Dashboard,
            Operation::Stats,
            QueryParams::new(),
        ))
        .await
        .expect("stats");
    assert_eq!(stats, json!({"totalOrders": 7}));

    let activity = api
        .fetch(&list(Resource::Activity, QueryParams::new()))
        .await
        .expect("empty body");
    assert_eq!(activity, Value::Null);

    let err = api
        .fetch(&list(Resource::Categories, QueryParams::new()))
        .await
        .expect_err("success=false");
    assert_eq!(err.kind(), ErrorKind::Unknown);
    assert!(err.to_string().contains("categories offline"));
}

#[tokio::test]
async fn error_statuses_are_classified() {
    let server = MockServer::start_async().await;
    let cases = [
        ("/api/products", 401, ErrorKind::Unauthorized),
        ("/api/orders", 403, ErrorKind::Forbidden),
        ("/api/customers", 404, ErrorKind::NotFound),
        ("/api/categories", 422, ErrorKind::Validation),
        ("/api/activity", 503, ErrorKind::Server),
    ];
    for (path, status, _) in cases {
        server
            .mock_async(|when, then| {
                when.method("GET").path(path);
                then.status(status)
                    .json_body(json!({"success": false, "error": format!("failed with {status}")}));
            })
            .await;
    }

    let api = client(&server, None);
    for (path, status, kind) in cases {
        let resource: Resource = path.trim_start_matches("/api/").parse().expect("resource");
        let err = api
            .fetch(&list(resource, QueryParams::new()))
            .await
            .expect_err("error status");
        assert_eq!(err.kind(), kind, "{path}");
        assert_eq!(err.status(), Some(status), "{path}");
        assert!(err.to_string().contains(&format!("failed with {status}")));
    }
}

#[tokio::test]
async fn unreachable_backend_is_a_network_error() {
    let api = HttpApiClient::new("http://127.0.0.1:1", None, Duration::from_secs(2))
        .expect("client");
    let err = api
        .fetch(&list(Resource::Products, QueryParams::new()))
        .await
        .expect_err("refused");
    assert!(err.is_network());
    assert!(err.is_retryable());
}

#[tokio::test]
async fn mutations_use_rest_verbs() {
    let server = MockServer::start_async().await;
    let create = server
        .mock_async(|when, then| {
            when.method("POST")
                .path("/api/products")
                .json_body(json!({"name": "Lamp", "price": 30.0}));
            then.status(201).json_body(json!({"success": true, "data": {"id": "p-9"}}));
        })
        .await;
    let update = server
        .mock_async(|when, then| {
            when.method("PUT")
                .path("/api/products/p-9")
                .json_body(json!({"price": 25.0}));
            then.status(200).json_body(json!({"success": true, "data": {"id": "p-9", "price": 25.0}}));
        })
        .await;
    let delete = server
        .mock_async(|when, then| {
            when.method("DELETE").path("/api/products/p-9");
            then.status(204);
        })
        .await;

    let api = client(&server, None);
    let created = api
        .mutate(&MutationRequest::create(
            Resource::Products,
            json!({"name": "Lamp", "price": 30.0}),
        ))
        .await
        .expect("create");
    assert_eq!(created, json!({"id": "p-9"}));
    api.mutate(&MutationRequest::update(Resource::Products, "p-9", json!({"price": 25.0})))
        .await
        .expect("update");
    let deleted = api
        .mutate(&MutationRequest::delete(Resource::Products, "p-9"))
        .await
        .expect("delete");
    assert_eq!(deleted, Value::Null);

    create.assert_async().await;
    update.assert_async().await;
    delete.assert_async().await;
}

#[tokio::test]
async fn event_stream_is_decoded() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method("GET")
                .path("/api/events")
                .header("accept", "text/event-stream")
                .header("authorization", "Bearer secret");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(concat!(
                    "data: {\"type\":\"connected\",\"timestamp\":\"2024-05-01T10:00:00Z\"}\n\n",
                    ": heartbeat\n\n",
                    "event: stats_update\ndata: {\"data\":{\"totalOrders\":3}}\n\n",
                    "data: not json\n\n",
                ));
        })
        .await;

    let source = client(&server, Some("secret"))
        .event_source("/api/events")
        .expect("event source");
    let frames: Vec<SseFrame> = source
        .connect()
        .await
        .expect("connect")
        .map(|frame| frame.expect("frame"))
        .collect()
        .await;

    assert_eq!(frames.len(), 4);
    assert!(matches!(&frames[0], SseFrame::Message(message) if message.kind == "connected" && message.timestamp.is_some()));
    assert_eq!(frames[1], SseFrame::Comment("heartbeat".to_string()));
    match &frames[2] {
        SseFrame::Message(message) => {
            assert_eq!(message.kind, "stats_update");
            assert_eq!(message.data, Some(json!({"totalOrders": 3})));
        }
        other => panic!("expected message, got {other:?}"),
    }
    assert!(matches!(&frames[3], SseFrame::Invalid { data, .. } if data == "not json"));
}

#[tokio::test]
async fn rejected_event_stream_reports_status() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method("GET").path("/api/events");
            then.status(401);
        })
        .await;

    let source = client(&server, None)
        .event_source("/api/events")
        .expect("event source");
    match source.connect().await {
        Err(SseError::Status { status }) => assert_eq!(status, 401),
        Err(other) => panic!("expected status error, got {other}"),
        Ok(_) => panic!("expected status error, got a stream"),
    }
}

#[tokio::test]
async fn data_layer_caches_backend_reads() {
    let server = MockServer::start_async().await;
    let stats = server
        .mock_async(|when, then| {
            when.method("GET").path("/api/dashboard/stats");
            then.status(200)
                .json_body(json!({"success": true, "data": {"totalOrders": 12}}));
        })
        .await;

    let mut settings = common::settings();
    settings.api.base_url = Url::parse(&server.base_url()).expect("url");
    let layer = DataLayer::connect(&settings).expect("data layer");

    for _ in 0..3 {
        let value = layer
            .query()
            .query(Resource::Dashboard, Operation::Stats, None)
            .await
            .expect("stats");
        assert_eq!(value["totalOrders"], json!(12));
    }
    stats.assert_async().await;
}

#[tokio::test]
async fn session_expiry_stops_further_reads() {
    let server = MockServer::start_async().await;
    let orders = server
        .mock_async(|when, then| {
            when.method("GET").path("/api/orders");
            then.status(401).json_body(json!({"success": false, "error": "token expired"}));
        })
        .await;

    let mut settings = common::settings();
    settings.api.base_url = Url::parse(&server.base_url()).expect("url");
    let layer = DataLayer::connect(&settings).expect("data layer");

    let err = layer
        .query()
        .query(Resource::Orders, Operation::List, None)
        .await
        .expect_err("401");
    assert!(matches!(err, FetchError::Unauthorized { .. }));
    assert!(layer.session().is_expired());

    layer
        .query()
        .query(Resource::Products, Operation::List, None)
        .await
        .expect_err("expired session");
    orders.assert_async().await;
}
