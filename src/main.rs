use std::process;

use serde_json::Value;
use storeops::{
    application::{client::DataLayer, error::FetchError},
    cache::{CacheKey, ChannelState, StoreChange},
    config::{self, GetArgs, QueryArgs, WatchArgs},
    domain::DomainError,
    infra::{error::InfraError, telemetry},
};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] config::LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Query(#[from] DomainError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_error(&error);
        process::exit(1);
    }
}

fn report_error(error: &CliError) {
    if dispatcher::has_been_set() {
        match error {
            CliError::Fetch(err) => error!(error = %err, message = err.user_message(), "storeops failed"),
            other => error!(error = %other, "storeops failed"),
        }
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "storeops failed");
    });
}

async fn run() -> Result<(), CliError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let layer = DataLayer::connect(&settings)?;
    match cli_args.command {
        config::Command::Get(args) => run_get(&layer, args).await,
        config::Command::Watch(args) => run_watch(&layer, args).await,
    }
}

fn resolve_key(layer: &DataLayer, query: &QueryArgs) -> Result<CacheKey, CliError> {
    let operation = query.operation()?;
    let params = query.query_params()?;
    let params = (!params.is_empty()).then_some(params);
    Ok(layer
        .query()
        .key(query.resource, operation, params.as_ref()))
}

async fn run_get(layer: &DataLayer, args: GetArgs) -> Result<(), CliError> {
    let key = resolve_key(layer, &args.query)?;
    let value = layer.query().query_key(&key).await?;
    print_value(&value, args.compact)
}

async fn run_watch(layer: &DataLayer, args: WatchArgs) -> Result<(), CliError> {
    let key = resolve_key(layer, &args.query())?;
    let _subscription = layer.query().subscribe(&key);
    let mut changes = layer.store().changes();

    print_value(&layer.query().query_key(&key).await?, false)?;

    let maintenance = layer.spawn_maintenance();
    let Some(channel) = layer.open_realtime() else {
        maintenance.stop().await;
        return Ok(());
    };
    let mut state = channel.watch_state();
    let mut events = channel.events();
    info!(key = %key, "Watching query");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                info!(state = ?current, "Realtime channel state");
                if current.is_terminal() {
                    if current == ChannelState::PersistentlyDisconnected {
                        warn!("Realtime updates unavailable; stopping watch");
                    }
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(event) => {
                    let id = event.entity_id();
                    info!(kind = event.kind.as_str(), id = ?id, "Realtime event");
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Realtime event log lagged"),
                Err(RecvError::Closed) => break,
            },
            change = changes.recv() => match change {
                Ok(StoreChange::Invalidated(changed)) if changed == key => {
                    match layer.query().refetch(&key).await {
                        Ok(value) => print_value(&value, false)?,
                        Err(err) => warn!(error = %err, message = err.user_message(), "Refetch failed"),
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Store change log lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    channel.close().await;
    maintenance.stop().await;
    Ok(())
}

fn print_value(value: &Value, compact: bool) -> Result<(), CliError> {
    let rendered = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    println!("{rendered}");
    Ok(())
}
