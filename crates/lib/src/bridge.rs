//! Bridge runtime: ntfy subscriber feeding the action dispatcher.

use crate::config::Settings;
use crate::dispatch::Dispatcher;
use crate::ntfy::{InboundMessage, NtfySubscriber};
use crate::signal::shutdown_signalled;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

/// Qualifying messages buffered between the stream reader and the dispatch loop.
const INBOUND_QUEUE: usize = 64;

/// Run the bridge from settings until shutdown is signalled.
pub async fn run_bridge(settings: Arc<Settings>, shutdown_rx: watch::Receiver<bool>) -> Result<()> {
    let subscriber = NtfySubscriber::new(&settings);
    let dispatcher = Arc::new(Dispatcher::from_settings(&settings));
    log::info!(
        "bridge starting: call={} webhook={} threshold={}",
        settings
            .ami
            .as_ref()
            .map(|_| settings.call.dial_string.as_str())
            .unwrap_or("disabled"),
        settings
            .webhook
            .as_ref()
            .map(|w| w.url.as_str())
            .unwrap_or("disabled"),
        settings.bridge.min_priority
    );
    run_with(subscriber, dispatcher, shutdown_rx).await
}

/// Run with an explicit subscriber and dispatcher.
///
/// Each qualifying message is dispatched on its own task, spawned in arrival order, so a
/// slow PBX or webhook never stalls the stream reader. On shutdown the subscriber is
/// stopped first, then in-flight dispatches are awaited (each bounded by its own timeout).
pub async fn run_with(
    subscriber: NtfySubscriber,
    dispatcher: Arc<Dispatcher>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundMessage>(INBOUND_QUEUE);
    let subscriber_task = subscriber.start(inbound_tx, shutdown_rx.clone());
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            msg = inbound_rx.recv() => {
                let Some(msg) = msg else { break };
                let dispatcher = dispatcher.clone();
                in_flight.spawn(async move {
                    dispatcher.dispatch(&msg).await;
                });
            }
            Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = done {
                    log::error!("dispatch task failed: {}", e);
                }
            }
            _ = shutdown_signalled(&mut shutdown_rx) => break,
        }
    }

    drop(inbound_rx);
    wind_down(subscriber_task, in_flight).await
}

/// Wait for the subscriber, then drain in-flight dispatches. The drain happens even if the
/// subscriber failed, so every AMI session still gets its Logoff.
async fn wind_down(subscriber_task: JoinHandle<()>, mut in_flight: JoinSet<()>) -> Result<()> {
    let subscriber_result = subscriber_task.await;

    if !in_flight.is_empty() {
        log::info!("waiting for {} in-flight dispatch(es)", in_flight.len());
    }
    while let Some(done) = in_flight.join_next().await {
        if let Err(e) = done {
            log::error!("dispatch task failed: {}", e);
        }
    }
    subscriber_result.context("ntfy subscriber task failed")?;
    log::info!("bridge stopped");
    Ok(())
}
