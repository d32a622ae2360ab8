//! Fakes shared by the integration tests: an AMI peer, an ntfy SSE server and a webhook
//! receiver, all bound to ephemeral ports on 127.0.0.1.
#![allow(dead_code)]

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use bridge::ami::{read_frame, AmiFrame};
use bridge::config::{AmiSettings, Config};
use futures_util::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

/// Base config pointing at a fake ntfy server, with short backoff for tests.
pub fn test_config(ntfy: SocketAddr) -> Config {
    let mut config = Config::default();
    config.ntfy.url = format!("http://{}", ntfy);
    config.ntfy.topic = "alerts".to_string();
    config.bridge.backoff_initial_ms = 20;
    config.bridge.backoff_max_ms = 200;
    config.ami.host = "127.0.0.1".to_string();
    config.ami.connect_timeout_ms = 2_000;
    config.ami.response_timeout_ms = 2_000;
    config
}

pub fn ami_settings(port: u16, response_timeout: Duration) -> AmiSettings {
    AmiSettings {
        host: "127.0.0.1".to_string(),
        port,
        username: "ntfybridge".to_string(),
        secret: "secret".to_string(),
        connect_timeout: Duration::from_secs(2),
        response_timeout,
    }
}

// ---------------------------------------------------------------------------
// AMI

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginateReply {
    /// Two unrelated frames, then the matching Success.
    Accept,
    /// An event with a Latin-1 caller name, then the matching Success.
    AcceptAfterLatin1Event,
    /// Matching Error response.
    Reject,
    /// Never answer.
    Ignore,
}

#[derive(Debug, Clone, Copy)]
pub struct AmiScript {
    pub send_banner: bool,
    pub accept_login: bool,
    pub originate: OriginateReply,
}

impl Default for AmiScript {
    fn default() -> Self {
        Self {
            send_banner: true,
            accept_login: true,
            originate: OriginateReply::Accept,
        }
    }
}

/// Fake PBX. Every finished session (client closed the socket) yields the frames it received.
pub struct FakeAmi {
    pub port: u16,
    pub accepted: Arc<AtomicUsize>,
    sessions: mpsc::UnboundedReceiver<Vec<AmiFrame>>,
}

impl FakeAmi {
    /// Frames of the next session; only returns once the client has closed the connection.
    pub async fn next_session(&mut self) -> Vec<AmiFrame> {
        tokio::time::timeout(Duration::from_secs(5), self.sessions.recv())
            .await
            .expect("AMI session was not closed by the client")
            .expect("fake AMI stopped")
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

pub async fn fake_ami(script: AmiScript) -> FakeAmi {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake AMI");
    let port = listener.local_addr().expect("local_addr").port();
    let (tx, sessions) = mpsc::unbounded_channel();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let tx = tx.clone();
            tokio::spawn(async move {
                let frames = serve_ami_session(stream, script).await;
                let _ = tx.send(frames);
            });
        }
    });
    FakeAmi {
        port,
        accepted,
        sessions,
    }
}

async fn serve_ami_session(stream: TcpStream, script: AmiScript) -> Vec<AmiFrame> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut frames = Vec::new();
    if !script.send_banner {
        let mut rest = Vec::new();
        let _ = reader.read_to_end(&mut rest).await;
        frames.push(AmiFrame::parse(&String::from_utf8_lossy(&rest)));
        return frames;
    }
    let _ = write.write_all(b"Asterisk Call Manager/5.0.1\r\n").await;
    while let Ok(Some(frame)) = read_frame(&mut reader).await {
        let action = frame.get("Action").unwrap_or("").to_string();
        let id = frame.action_id().unwrap_or("").to_string();
        let reply = match action.as_str() {
            "Login" if script.accept_login => format!(
                "Event: FullyBooted\r\nPrivilege: system,all\r\nStatus: Fully Booted\r\n\r\n\
                 Response: Success\r\nActionID: {id}\r\nMessage: Authentication accepted\r\n\r\n"
            ),
            "Login" => format!(
                "Response: Error\r\nActionID: {id}\r\nMessage: Authentication failed\r\n\r\n"
            ),
            "Originate" => match script.originate {
                OriginateReply::Accept => format!(
                    "Event: Newchannel\r\nChannel: PJSIP/2000-00000001\r\n\r\n\
                     Response: Success\r\nActionID: someone-else\r\nPing: Pong\r\n\r\n\
                     Response: Success\r\nActionID: {id}\r\nMessage: Originate successfully queued\r\n\r\n"
                ),
                OriginateReply::Reject => format!(
                    "Event: VarSet\r\nVariable: RINGTIME\r\n\r\n\
                     Response: Error\r\nActionID: {id}\r\nMessage: Extension does not exist.\r\n\r\n"
                ),
                OriginateReply::AcceptAfterLatin1Event => {
                    let mut bytes =
                        b"Event: Newchannel\r\nCallerIDName: Jos\xe9\r\n\r\n".to_vec();
                    bytes.extend_from_slice(
                        format!("Response: Success\r\nActionID: {id}\r\n\r\n").as_bytes(),
                    );
                    frames.push(frame);
                    let _ = write.write_all(&bytes).await;
                    continue;
                }
                OriginateReply::Ignore => String::new(),
            },
            "Logoff" => format!(
                "Response: Goodbye\r\nActionID: {id}\r\nMessage: Thanks for all the fish.\r\n\r\n"
            ),
            _ => format!(
                "Response: Error\r\nActionID: {id}\r\nMessage: Invalid/unknown command\r\n\r\n"
            ),
        };
        frames.push(frame);
        if !reply.is_empty() {
            let _ = write.write_all(reply.as_bytes()).await;
        }
    }
    frames
}

/// Action names of a recorded session, in order.
pub fn actions(frames: &[AmiFrame]) -> Vec<String> {
    frames
        .iter()
        .filter_map(|f| f.get("Action").map(str::to_string))
        .collect()
}

// ---------------------------------------------------------------------------
// ntfy

pub enum SseReply {
    Status(u16),
    /// Error status whose body sends a few bytes and then stalls.
    StalledStatus(u16),
    /// Send the chunks, then either keep the stream open or end it.
    Events { chunks: Vec<String>, hold_open: bool },
}

pub struct NtfyState {
    replies: Mutex<VecDeque<SseReply>>,
    pub connections: AtomicUsize,
    pub auth_headers: Mutex<Vec<Option<String>>>,
}

pub struct FakeNtfy {
    pub addr: SocketAddr,
    pub state: Arc<NtfyState>,
}

impl FakeNtfy {
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }
}

/// Serves `/alerts/sse`; each connection consumes the next reply. Once the replies are
/// used up, connections are held open without data.
pub async fn fake_ntfy(replies: Vec<SseReply>) -> FakeNtfy {
    let state = Arc::new(NtfyState {
        replies: Mutex::new(replies.into()),
        connections: AtomicUsize::new(0),
        auth_headers: Mutex::new(Vec::new()),
    });
    let app = Router::new()
        .route("/alerts/sse", get(sse_handler))
        .with_state(state.clone());
    FakeNtfy {
        addr: serve(app).await,
        state,
    }
}

async fn sse_handler(State(state): State<Arc<NtfyState>>, headers: HeaderMap) -> Response {
    state.connections.fetch_add(1, Ordering::SeqCst);
    let auth = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.auth_headers.lock().unwrap().push(auth);
    let reply = state.replies.lock().unwrap().pop_front();
    let (chunks, hold_open) = match reply {
        Some(SseReply::Status(code)) => {
            return Response::builder()
                .status(code)
                .body(Body::from("unavailable"))
                .unwrap()
        }
        Some(SseReply::StalledStatus(code)) => {
            let body = stream::once(async { Ok::<_, Infallible>("partial".to_string()) })
                .chain(stream::pending());
            return Response::builder()
                .status(code)
                .body(Body::from_stream(body))
                .unwrap();
        }
        Some(SseReply::Events { chunks, hold_open }) => (chunks, hold_open),
        None => (Vec::new(), true),
    };
    let events = stream::iter(chunks.into_iter().map(Ok::<String, Infallible>));
    let body: BoxStream<'static, Result<String, Infallible>> = if hold_open {
        events.chain(stream::pending()).boxed()
    } else {
        events.boxed()
    };
    Response::builder()
        .header("content-type", "text/event-stream")
        .body(Body::from_stream(body))
        .unwrap()
}

pub fn open_event() -> String {
    "event: open\ndata: {\"id\":\"open1\",\"time\":1700000000,\"event\":\"open\",\"topic\":\"alerts\"}\n\n"
        .to_string()
}

pub fn keepalive_event() -> String {
    "event: keepalive\ndata: {\"id\":\"ka1\",\"time\":1700000001,\"event\":\"keepalive\",\"topic\":\"alerts\"}\n\n"
        .to_string()
}

pub fn message_event(id: &str, title: &str, message: &str, priority: u8) -> String {
    let data = serde_json::json!({
        "id": id,
        "time": 1700000002,
        "event": "message",
        "topic": "alerts",
        "title": title,
        "message": message,
        "priority": priority,
    });
    format!("event: message\ndata: {}\n\n", data)
}

// ---------------------------------------------------------------------------
// webhook

pub struct HookState {
    pub bodies: Mutex<Vec<serde_json::Value>>,
    status: StatusCode,
}

pub struct FakeWebhook {
    pub url: String,
    pub state: Arc<HookState>,
}

impl FakeWebhook {
    pub fn bodies(&self) -> Vec<serde_json::Value> {
        self.state.bodies.lock().unwrap().clone()
    }

    /// Poll until at least `n` bodies arrived (5 s limit).
    pub async fn wait_for(&self, n: usize) -> Vec<serde_json::Value> {
        for _ in 0..100 {
            let bodies = self.bodies();
            if bodies.len() >= n {
                return bodies;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("webhook did not receive {} request(s) within 5s", n);
    }
}

pub async fn fake_webhook(status: StatusCode) -> FakeWebhook {
    let state = Arc::new(HookState {
        bodies: Mutex::new(Vec::new()),
        status,
    });
    let app = Router::new()
        .route("/hook", post(hook_handler))
        .with_state(state.clone());
    let addr = serve(app).await;
    FakeWebhook {
        url: format!("http://{}/hook", addr),
        state,
    }
}

async fn hook_handler(
    State(state): State<Arc<HookState>>,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    state.bodies.lock().unwrap().push(body);
    state.status
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake server");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}
