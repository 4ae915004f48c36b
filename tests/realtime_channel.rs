mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use storeops::application::client::DataLayer;
use storeops::cache::{
    CacheKey, ChannelState, CloseReason, RealtimeConfig, RealtimeEventKind, RealtimeHandle,
};
use storeops::domain::{Operation, Resource};
use storeops::infra::sse::SseFrame;
use storeops_api_types::StreamMessage;
use tokio::time::Instant;

use common::{Connection, FakeBackend, ScriptedSource, settings};

fn layer_with(source: Arc<ScriptedSource>, realtime: RealtimeConfig) -> DataLayer {
    let backend = Arc::new(FakeBackend::new(|_, _| Ok(json!({})), |_| Ok(json!({}))));
    let mut settings = settings();
    settings.realtime = realtime;
    DataLayer::with_backend(&settings, backend.clone(), backend, source)
}

fn open(layer: &DataLayer) -> RealtimeHandle {
    layer.open_realtime().expect("realtime enabled")
}

async fn wait_terminal(handle: &RealtimeHandle) -> ChannelState {
    handle
        .watch_state()
        .wait_for(ChannelState::is_terminal)
        .await
        .expect("channel task alive")
        .clone()
}

fn gaps(connects: &[Instant]) -> Vec<Duration> {
    connects.windows(2).map(|pair| pair[1] - pair[0]).collect()
}

fn message(kind: &str, data: serde_json::Value) -> SseFrame {
    SseFrame::Message(StreamMessage {
        kind: kind.to_string(),
        timestamp: None,
        data: Some(data),
    })
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_five_reconnects_with_growing_delays() {
    let source = Arc::new(ScriptedSource::new(Vec::new()));
    let layer = layer_with(source.clone(), RealtimeConfig::default());
    let handle = open(&layer);

    assert_eq!(wait_terminal(&handle).await, ChannelState::PersistentlyDisconnected);

    let connects = source.connects();
    assert_eq!(connects.len(), 6, "initial attempt plus five reconnects");
    assert_eq!(
        gaps(&connects),
        [3, 6, 9, 12, 15].map(Duration::from_secs).to_vec()
    );
}

#[tokio::test(start_paused = true)]
async fn successful_connect_resets_backoff() {
    let source = Arc::new(ScriptedSource::new(vec![
        Connection::Refuse,
        Connection::Refuse,
        Connection::Finish(Vec::new()),
    ]));
    let layer = layer_with(source.clone(), RealtimeConfig::default());
    let handle = open(&layer);

    assert_eq!(wait_terminal(&handle).await, ChannelState::PersistentlyDisconnected);
    assert_eq!(
        gaps(&source.connects()),
        [3, 6, 3, 6, 9, 12, 15].map(Duration::from_secs).to_vec()
    );
}

#[tokio::test(start_paused = true)]
async fn silent_stream_is_treated_as_dead() {
    let source = Arc::new(ScriptedSource::new(vec![
        Connection::Hold(vec![SseFrame::Comment("ping".to_string())]),
        Connection::Hold(Vec::new()),
    ]));
    let layer = layer_with(source.clone(), RealtimeConfig::default());
    let started = Instant::now();
    let handle = open(&layer);

    handle
        .watch_state()
        .wait_for(|state| matches!(state, ChannelState::Reconnecting { attempt: 1, .. }))
        .await
        .expect("reconnecting");
    assert_eq!(started.elapsed(), Duration::from_secs(120));

    handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn session_ceiling_closes_channel() {
    let source = Arc::new(ScriptedSource::new(vec![Connection::Hold(Vec::new())]));
    let config = RealtimeConfig {
        heartbeat_interval_secs: 3_600,
        session_ceiling_secs: 300,
        ..RealtimeConfig::default()
    };
    let layer = layer_with(source.clone(), config);
    let started = Instant::now();
    let handle = open(&layer);

    assert_eq!(
        wait_terminal(&handle).await,
        ChannelState::Closed(CloseReason::SessionCeiling)
    );
    assert_eq!(started.elapsed(), Duration::from_secs(300));
    assert_eq!(source.connects().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn close_releases_connection() {
    let source = Arc::new(ScriptedSource::new(vec![Connection::Hold(Vec::new())]));
    let layer = layer_with(source.clone(), RealtimeConfig::default());
    let handle = open(&layer);
    let state = handle.watch_state();

    handle
        .watch_state()
        .wait_for(|state| *state == ChannelState::Connected)
        .await
        .expect("connected");
    handle.close().await;

    assert_eq!(*state.borrow(), ChannelState::Closed(CloseReason::Requested));
    assert_eq!(source.connects().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn pushes_invalidate_affected_queries() {
    let source = Arc::new(ScriptedSource::new(vec![Connection::Hold(vec![
        SseFrame::Comment("heartbeat".to_string()),
        message("connected", json!({})),
        SseFrame::Invalid {
            data: "{".to_string(),
            reason: "EOF while parsing".to_string(),
        },
        message("inventory_sync", json!({})),
        message("order_update", json!({"orderId": "o-1", "status": "shipped"})),
    ])]));
    let layer = layer_with(source, RealtimeConfig::default());
    let keys = layer.query().keys().clone();
    let orders = keys.build(Resource::Orders, Operation::List, None);
    let order = keys.build(Resource::Orders, Operation::detail("o-1"), None);
    let other_order = keys.build(Resource::Orders, Operation::detail("o-2"), None);
    let stats = keys.build(Resource::Dashboard, Operation::Stats, None);
    let products = keys.build(Resource::Products, Operation::List, None);
    for key in [&orders, &order, &other_order, &stats, &products] {
        layer.store().set(key, json!({}));
    }

    let handle = open(&layer);
    let mut events = handle.events();

    let first = events.recv().await.expect("connected event");
    assert_eq!(first.kind, RealtimeEventKind::Connected);
    let second = events.recv().await.expect("order event");
    assert_eq!(second.kind, RealtimeEventKind::OrderUpdate);
    assert_eq!(second.entity_id().as_deref(), Some("o-1"));

    let invalidated = |key: &CacheKey| layer.store().get(key).expect("entry").invalidated;
    assert!(invalidated(&orders));
    assert!(invalidated(&order));
    assert!(invalidated(&stats));
    assert!(!invalidated(&other_order));
    assert!(!invalidated(&products));

    handle.close().await;
}

#[tokio::test]
async fn disabled_channel_is_not_opened() {
    let source = Arc::new(ScriptedSource::new(Vec::new()));
    let layer = layer_with(
        source.clone(),
        RealtimeConfig {
            enabled: false,
            ..RealtimeConfig::default()
        },
    );
    assert!(layer.open_realtime().is_none());
    assert!(source.connects().is_empty());
}
