//! Realtime channel.
//!
//! Holds one server-sent event stream open, feeds pushes into the cache
//! trigger, and reconnects with linear backoff. The connection is closed
//! for good after `max_reconnect_attempts` consecutive failures, when the
//! session ceiling is reached, or when the handle is closed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use metrics::counter;
use serde::Deserialize;
use time::OffsetDateTime;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tracing::{debug, info, trace, warn};

use crate::infra::sse::{SseError, SseFrame};

use super::events::RealtimeEvent;
use super::trigger::CacheTrigger;

const EVENT_CHANNEL_CAPACITY: usize = 128;
const METRIC_REALTIME_RECONNECT: &str = "storeops_realtime_reconnect_total";

const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 3_000;
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 60;
const DEFAULT_SESSION_CEILING_SECS: u64 = 30 * 60;

pub type EventStream = BoxStream<'static, Result<SseFrame, SseError>>;

/// Opens the server-sent event stream.
#[async_trait]
pub trait EventSource: Send + Sync + 'static {
    async fn connect(&self) -> Result<EventStream, SseError>;
}

/// Realtime configuration from the `[realtime]` table of `storeops.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub enabled: bool,
    /// Base reconnect delay; attempt `n` waits `n` times this.
    pub reconnect_interval_ms: u64,
    pub max_reconnect_attempts: u32,
    /// Expected server heartbeat cadence. Twice this without traffic counts
    /// as a dead connection.
    pub heartbeat_interval_secs: u64,
    /// Hard limit on the lifetime of one channel.
    pub session_ceiling_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            session_ceiling_secs: DEFAULT_SESSION_CEILING_SECS,
        }
    }
}

impl RealtimeConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn silence_limit(&self) -> Duration {
        self.heartbeat_interval() * 2
    }

    pub fn session_ceiling(&self) -> Duration {
        Duration::from_secs(self.session_ceiling_secs)
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        self.reconnect_interval() * attempt
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Requested,
    SessionCeiling,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32, delay: Duration },
    /// Reconnect attempts exhausted. Cached data still works; nothing is
    /// pushed until a new channel is opened.
    PersistentlyDisconnected,
    Closed(CloseReason),
}

impl ChannelState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChannelState::PersistentlyDisconnected | ChannelState::Closed(_)
        )
    }
}

pub struct RealtimeChannel {
    source: Arc<dyn EventSource>,
    trigger: Arc<CacheTrigger>,
    config: RealtimeConfig,
}

impl RealtimeChannel {
    pub fn new(
        source: Arc<dyn EventSource>,
        trigger: Arc<CacheTrigger>,
        config: RealtimeConfig,
    ) -> Self {
        Self {
            source,
            trigger,
            config,
        }
    }

    /// Start the connection task.
    pub fn spawn(self) -> RealtimeHandle {
        let (state_tx, state_rx) = watch::channel(ChannelState::Disconnected);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let runner = Runner {
            source: self.source,
            trigger: self.trigger,
            config: self.config,
            state: state_tx,
            events: events_tx.clone(),
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(runner.run());

        RealtimeHandle {
            state: state_rx,
            events: events_tx,
            shutdown: shutdown_tx,
            task: Some(task),
        }
    }
}

/// Owner of a running channel. Dropping it stops the task.
pub struct RealtimeHandle {
    state: watch::Receiver<ChannelState>,
    events: broadcast::Sender<RealtimeEvent>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl RealtimeHandle {
    pub fn state(&self) -> ChannelState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// Decoded pushes, after they have been applied to the cache.
    pub fn events(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.events.subscribe()
    }

    /// Close the stream and wait for the task to finish.
    pub async fn close(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "Realtime task ended abnormally");
            }
        }
    }
}

impl Drop for RealtimeHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum StreamEnd {
    Shutdown,
    Ceiling,
    Dropped(String),
}

struct Runner {
    source: Arc<dyn EventSource>,
    trigger: Arc<CacheTrigger>,
    config: RealtimeConfig,
    state: watch::Sender<ChannelState>,
    events: broadcast::Sender<RealtimeEvent>,
    shutdown: watch::Receiver<bool>,
}

impl Runner {
    async fn run(mut self) {
        let deadline = Instant::now() + self.config.session_ceiling();
        let mut attempt: u32 = 0;

        let reason = loop {
            self.set_state(ChannelState::Connecting);
            let connected = tokio::select! {
                _ = shutdown_signal(&mut self.shutdown) => break CloseReason::Requested,
                _ = sleep_until(deadline) => break CloseReason::SessionCeiling,
                result = self.source.connect() => result,
            };

            match connected {
                Ok(stream) => {
                    attempt = 0;
                    self.set_state(ChannelState::Connected);
                    info!("Realtime channel connected");
                    match self.pump(stream, deadline).await {
                        StreamEnd::Shutdown => break CloseReason::Requested,
                        StreamEnd::Ceiling => break CloseReason::SessionCeiling,
                        StreamEnd::Dropped(reason) => {
                            warn!(reason = %reason, "Realtime stream dropped");
                        }
                    }
                }
                Err(err) => warn!(error = %err, attempt, "Realtime connect failed"),
            }

            if attempt >= self.config.max_reconnect_attempts {
                warn!(
                    attempts = attempt,
                    "Realtime channel giving up after repeated failures"
                );
                self.set_state(ChannelState::PersistentlyDisconnected);
                return;
            }

            attempt += 1;
            let delay = self.config.reconnect_delay(attempt);
            self.set_state(ChannelState::Reconnecting { attempt, delay });
            counter!(METRIC_REALTIME_RECONNECT).increment(1);

            tokio::select! {
                _ = shutdown_signal(&mut self.shutdown) => break CloseReason::Requested,
                _ = sleep_until(deadline) => break CloseReason::SessionCeiling,
                _ = sleep(delay) => {}
            }
        };

        info!(reason = ?reason, "Realtime channel closed");
        self.set_state(ChannelState::Closed(reason));
    }

    async fn pump(&mut self, mut stream: EventStream, deadline: Instant) -> StreamEnd {
        let silence = self.config.silence_limit();
        loop {
            let next = tokio::select! {
                _ = shutdown_signal(&mut self.shutdown) => return StreamEnd::Shutdown,
                _ = sleep_until(deadline) => return StreamEnd::Ceiling,
                next = timeout(silence, stream.next()) => next,
            };

            match next {
                Err(_) => {
                    return StreamEnd::Dropped(format!(
                        "no traffic for {} s",
                        silence.as_secs()
                    ));
                }
                Ok(None) => return StreamEnd::Dropped("stream ended".to_string()),
                Ok(Some(Err(err))) => return StreamEnd::Dropped(err.to_string()),
                Ok(Some(Ok(frame))) => self.handle_frame(frame),
            }
        }
    }

    fn handle_frame(&self, frame: SseFrame) {
        match frame {
            SseFrame::Comment(_) => trace!("Realtime heartbeat"),
            SseFrame::Invalid { reason, .. } => {
                warn!(reason = %reason, "Ignoring malformed realtime message");
            }
            SseFrame::Message(message) => {
                let kind = message.kind.clone();
                match RealtimeEvent::from_message(message, OffsetDateTime::now_utc()) {
                    Some(event) => {
                        debug!(kind = event.kind.as_str(), "Realtime event received");
                        self.trigger.realtime_event(&event);
                        let _ = self.events.send(event);
                    }
                    None => debug!(kind = %kind, "Ignoring unknown realtime event type"),
                }
            }
        }
    }

    fn set_state(&self, state: ChannelState) {
        self.state.send_replace(state);
    }
}

/// Resolves when a close is requested or the handle is gone.
async fn shutdown_signal(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
