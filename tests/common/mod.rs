#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use serde_json::Value;
use storeops::application::error::FetchError;
use storeops::application::fetch::{Fetcher, RetryPolicy};
use storeops::application::mutations::Mutator;
use storeops::cache::{CacheConfig, EventSource, EventStream, RealtimeConfig};
use storeops::config::{ApiSettings, LogFormat, LoggingSettings, Settings};
use storeops::domain::{FetchRequest, MutationRequest};
use storeops::infra::sse::{SseError, SseFrame};
use tokio::time::Instant;
use tracing::level_filters::LevelFilter;
use url::Url;

pub fn settings() -> Settings {
    Settings {
        api: ApiSettings {
            base_url: Url::parse("http://127.0.0.1:9/").expect("url"),
            token: None,
            request_timeout: Duration::from_secs(5),
            events_path: "/api/events".to_string(),
        },
        cache: CacheConfig::default(),
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 100,
        },
        realtime: RealtimeConfig::default(),
        logging: LoggingSettings {
            level: LevelFilter::INFO,
            format: LogFormat::Compact,
        },
    }
}

/// In-memory backend: answers reads with a handler over the request and the
/// call index, and records every write.
pub struct FakeBackend {
    reads: AtomicUsize,
    read: Box<dyn Fn(&FetchRequest, usize) -> Result<Value, FetchError> + Send + Sync>,
    writes: Mutex<Vec<MutationRequest>>,
    write: Box<dyn Fn(&MutationRequest) -> Result<Value, FetchError> + Send + Sync>,
}

impl FakeBackend {
    pub fn new(
        read: impl Fn(&FetchRequest, usize) -> Result<Value, FetchError> + Send + Sync + 'static,
        write: impl Fn(&MutationRequest) -> Result<Value, FetchError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            reads: AtomicUsize::new(0),
            read: Box::new(read),
            writes: Mutex::new(Vec::new()),
            write: Box::new(write),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<MutationRequest> {
        self.writes.lock().expect("writes").clone()
    }
}

#[async_trait]
impl Fetcher for FakeBackend {
    async fn fetch(&self, request: &FetchRequest) -> Result<Value, FetchError> {
        let call = self.reads.fetch_add(1, Ordering::SeqCst);
        (self.read)(request, call)
    }
}

#[async_trait]
impl Mutator for FakeBackend {
    async fn mutate(&self, request: &MutationRequest) -> Result<Value, FetchError> {
        self.writes.lock().expect("writes").push(request.clone());
        (self.write)(request)
    }
}

/// How one scripted connection attempt behaves.
pub enum Connection {
    Refuse,
    /// Yield these frames, then stay open without traffic.
    Hold(Vec<SseFrame>),
    /// Yield these frames, then end the stream.
    Finish(Vec<SseFrame>),
}

/// Event source that plays back scripted connections and records when each
/// connect happened. Once the script is exhausted every connect is refused.
pub struct ScriptedSource {
    script: Mutex<VecDeque<Connection>>,
    connects: Mutex<Vec<Instant>>,
}

impl ScriptedSource {
    pub fn new(script: Vec<Connection>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            connects: Mutex::new(Vec::new()),
        }
    }

    pub fn connects(&self) -> Vec<Instant> {
        self.connects.lock().expect("connects").clone()
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn connect(&self) -> Result<EventStream, SseError> {
        self.connects.lock().expect("connects").push(Instant::now());
        let next = self.script.lock().expect("script").pop_front();
        match next.unwrap_or(Connection::Refuse) {
            Connection::Refuse => Err(SseError::Connect("connection refused".to_string())),
            Connection::Hold(frames) => Ok(Box::pin(frames_stream(frames).chain(stream::pending()))),
            Connection::Finish(frames) => Ok(Box::pin(frames_stream(frames))),
        }
    }
}

fn frames_stream(
    frames: Vec<SseFrame>,
) -> impl futures::Stream<Item = Result<SseFrame, SseError>> + Send + 'static {
    stream::iter(frames.into_iter().map(Ok))
}
