//! ntfy SSE subscription loop: connect, read frames, filter, forward, reconnect.

use super::backoff::Backoff;
use super::message::{decode_frame, InboundMessage};
use super::sse::SseParser;
use crate::config::Settings;
use crate::signal::shutdown_signalled;
use base64::Engine;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// How many forwarded message ids are remembered to suppress re-delivery.
const RECENT_IDS: usize = 128;

/// Why one connection attempt ended. Always followed by a backoff and a reconnect.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("ntfy request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("ntfy returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("no data received for {0:?}")]
    Idle(Duration),
    #[error("stream ended by server")]
    Ended,
}

enum StreamEnd {
    Shutdown,
    ReceiverClosed,
}

/// Long-lived ntfy subscriber. Forwards qualifying messages to the bridge.
pub struct NtfySubscriber {
    sse_url: String,
    authorization: Option<String>,
    idle_timeout: Duration,
    min_priority: u8,
    backoff: Backoff,
    client: reqwest::Client,
}

impl NtfySubscriber {
    pub fn new(settings: &Settings) -> Self {
        Self {
            sse_url: settings.ntfy.sse_url(),
            authorization: settings.ntfy.auth.as_deref().map(authorization_header),
            idle_timeout: settings.ntfy.idle_timeout,
            min_priority: settings.bridge.min_priority,
            backoff: Backoff::new(settings.bridge.backoff_initial, settings.bridge.backoff_max),
            client: reqwest::Client::new(),
        }
    }

    pub fn sse_url(&self) -> &str {
        &self.sse_url
    }

    /// Spawn the subscription loop. The handle completes after shutdown.
    pub fn start(
        self,
        inbound_tx: mpsc::Sender<InboundMessage>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(inbound_tx, shutdown_rx))
    }

    /// Subscribe until shutdown, reconnecting forever with backoff.
    pub async fn run(
        mut self,
        inbound_tx: mpsc::Sender<InboundMessage>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut seen = RecentIds::new(RECENT_IDS);
        log::info!("subscribing to ntfy SSE: {}", self.sse_url);
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            match self.stream_once(&inbound_tx, &mut shutdown_rx, &mut seen).await {
                Ok(StreamEnd::Shutdown) => break,
                Ok(StreamEnd::ReceiverClosed) => {
                    log::debug!("ntfy: inbound channel closed, stopping subscriber");
                    break;
                }
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    log::warn!("ntfy stream error: {}; reconnecting in {:?}", e, delay);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown_signalled(&mut shutdown_rx) => break,
                    }
                }
            }
        }
        log::info!("ntfy subscriber stopped");
    }

    /// One connection: returns Ok on shutdown, Err when the stream failed and should be retried.
    async fn stream_once(
        &mut self,
        inbound_tx: &mpsc::Sender<InboundMessage>,
        shutdown_rx: &mut watch::Receiver<bool>,
        seen: &mut RecentIds,
    ) -> Result<StreamEnd, StreamError> {
        let mut req = self
            .client
            .get(&self.sse_url)
            .header(ACCEPT, "text/event-stream");
        if let Some(ref auth) = self.authorization {
            req = req.header(AUTHORIZATION, auth);
        }
        let sent = tokio::select! {
            sent = tokio::time::timeout(self.idle_timeout, req.send()) => sent,
            _ = shutdown_signalled(shutdown_rx) => return Ok(StreamEnd::Shutdown),
        };
        let res = sent.map_err(|_| StreamError::Idle(self.idle_timeout))??;
        if !res.status().is_success() {
            let status = res.status();
            let body = tokio::select! {
                body = tokio::time::timeout(self.idle_timeout, res.text()) => {
                    body.ok().and_then(Result::ok).unwrap_or_default()
                }
                _ = shutdown_signalled(shutdown_rx) => return Ok(StreamEnd::Shutdown),
            };
            return Err(StreamError::Status { status, body });
        }
        log::info!("ntfy stream connected ({})", res.status());
        self.backoff.reset();

        let mut stream = res.bytes_stream();
        let mut parser = SseParser::new();
        loop {
            let next = tokio::select! {
                next = tokio::time::timeout(self.idle_timeout, stream.next()) => next,
                _ = shutdown_signalled(shutdown_rx) => return Ok(StreamEnd::Shutdown),
            };
            let chunk = match next {
                Err(_) => return Err(StreamError::Idle(self.idle_timeout)),
                Ok(None) => return Err(StreamError::Ended),
                Ok(Some(chunk)) => chunk?,
            };
            for frame in parser.push(&chunk) {
                let msg = match decode_frame(&frame) {
                    Ok(Some(msg)) => msg,
                    Ok(None) => continue,
                    Err(e) => {
                        log::debug!("ignoring ntfy frame: {} ({})", e, preview(&frame.data));
                        continue;
                    }
                };
                if !self.forward(msg, inbound_tx, seen).await {
                    return Ok(StreamEnd::ReceiverClosed);
                }
            }
        }
    }

    /// Apply the threshold and duplicate check. Returns false when the receiver is gone.
    async fn forward(
        &self,
        msg: InboundMessage,
        inbound_tx: &mpsc::Sender<InboundMessage>,
        seen: &mut RecentIds,
    ) -> bool {
        log::info!(
            "ntfy message: priority={} title={:?} message={:?}",
            msg.priority,
            msg.title.as_deref().unwrap_or(""),
            msg.message
        );
        if !msg.qualifies(self.min_priority) {
            log::debug!("priority {} below threshold {}, ignoring", msg.priority, self.min_priority);
            return true;
        }
        if let Some(ref id) = msg.id {
            if !seen.insert(id) {
                log::info!("message {} already dispatched, skipping", id);
                return true;
            }
        }
        inbound_tx.send(msg).await.is_ok()
    }
}

/// Authorization header value for an ntfy credential.
fn authorization_header(auth: &str) -> String {
    if auth.starts_with("tk_") {
        format!("Bearer {}", auth)
    } else if auth.contains(':') {
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(auth)
        )
    } else {
        format!("Basic {}", auth)
    }
}

fn preview(data: &str) -> String {
    data.chars().take(120).collect()
}

/// Bounded set of recently forwarded message ids (oldest evicted first).
struct RecentIds {
    ids: VecDeque<String>,
    capacity: usize,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            ids: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns false if the id was already present.
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.iter().any(|s| s == id) {
            return false;
        }
        if self.ids.len() == self.capacity {
            self.ids.pop_front();
        }
        self.ids.push_back(id.to_string());
        true
    }
}
