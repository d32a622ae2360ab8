//! AMI originate client: one TCP session per call.

use super::error::AmiError;
use super::protocol::{encode_action, read_frame, AmiFrame};
use crate::config::{AmiSettings, CallSettings};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};

/// Bound on the best-effort Logoff when closing a session.
pub const LOGOFF_TIMEOUT: Duration = Duration::from_secs(2);

/// Parameters of an Originate action, built fresh from settings for each call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginateRequest {
    /// e.g. "PJSIP/1000"
    pub channel: String,
    pub exten: String,
    pub context: String,
    pub priority: u32,
    pub caller_id: String,
    /// Ring timeout in milliseconds.
    pub timeout_ms: u64,
}

impl OriginateRequest {
    pub fn from_settings(call: &CallSettings) -> Self {
        Self {
            channel: call.dial_string.clone(),
            exten: call.extension.clone(),
            context: call.context.clone(),
            priority: call.priority,
            caller_id: call.caller_id.clone(),
            timeout_ms: call.ring_timeout_ms,
        }
    }

    fn fields(&self, action_id: &str) -> Vec<(&'static str, String)> {
        vec![
            ("Action", "Originate".to_string()),
            ("ActionID", action_id.to_string()),
            ("Channel", self.channel.clone()),
            ("Context", self.context.clone()),
            ("Exten", self.exten.clone()),
            ("Priority", self.priority.to_string()),
            ("CallerID", self.caller_id.clone()),
            ("Timeout", self.timeout_ms.to_string()),
            ("Async", "true".to_string()),
        ]
    }
}

/// PBX acknowledgement of an Originate action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionAck {
    pub action_id: String,
    pub message: Option<String>,
}

/// Places a call for the dispatcher. Implemented by [`AmiClient`]; tests inject fakes.
#[async_trait]
pub trait Originator: Send + Sync {
    async fn originate(&self, request: &OriginateRequest) -> Result<ActionAck, AmiError>;
}

/// AMI client. Holds only connection parameters; every call opens its own session.
#[derive(Debug, Clone)]
pub struct AmiClient {
    host: String,
    port: u16,
    username: String,
    secret: String,
    connect_timeout: Duration,
    response_timeout: Duration,
}

impl AmiClient {
    pub fn new(settings: &AmiSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            username: settings.username.clone(),
            secret: settings.secret.clone(),
            connect_timeout: settings.connect_timeout,
            response_timeout: settings.response_timeout,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connect, log in, send Originate and wait for its correlated response.
    /// The session is logged off and closed on every path once the TCP connect succeeded.
    pub async fn originate(&self, request: &OriginateRequest) -> Result<ActionAck, AmiError> {
        let addr = self.addr();
        log::debug!("connecting to AMI at {}", addr);
        let stream = match timeout(self.connect_timeout, TcpStream::connect(&addr)).await {
            Err(_) => return Err(AmiError::ConnectTimeout(addr)),
            Ok(Err(source)) => return Err(AmiError::Connect { addr, source }),
            Ok(Ok(stream)) => stream,
        };
        let mut session = AmiSession::new(stream, addr, self.response_timeout);
        let outcome = self.run(&mut session, request).await;
        session.close().await;
        outcome
    }

    async fn run(
        &self,
        session: &mut AmiSession,
        request: &OriginateRequest,
    ) -> Result<ActionAck, AmiError> {
        session.read_banner().await?;
        session.login(&self.username, &self.secret).await?;
        session.originate(request).await
    }
}

#[async_trait]
impl Originator for AmiClient {
    async fn originate(&self, request: &OriginateRequest) -> Result<ActionAck, AmiError> {
        AmiClient::originate(self, request).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    AwaitingBanner,
    LoggingIn,
    Authenticated,
    ActionSent,
}

struct AmiSession {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    addr: String,
    state: SessionState,
    /// ActionID of the request whose response is awaited.
    pending: Option<String>,
    response_timeout: Duration,
}

impl AmiSession {
    fn new(stream: TcpStream, addr: String, response_timeout: Duration) -> Self {
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
            addr,
            state: SessionState::AwaitingBanner,
            pending: None,
            response_timeout,
        }
    }

    /// The PBX announces itself with one line, e.g. "Asterisk Call Manager/5.0.1".
    async fn read_banner(&mut self) -> Result<(), AmiError> {
        let deadline = Instant::now() + self.response_timeout;
        let mut line = String::new();
        loop {
            line.clear();
            let n = timeout_at(deadline, self.reader.read_line(&mut line))
                .await
                .map_err(|_| AmiError::ConnectTimeout(self.addr.clone()))??;
            if n == 0 {
                return Err(AmiError::Closed);
            }
            let banner = line.trim();
            if !banner.is_empty() {
                log::debug!("AMI banner: {}", banner);
                return Ok(());
            }
        }
    }

    async fn login(&mut self, username: &str, secret: &str) -> Result<(), AmiError> {
        self.state = SessionState::LoggingIn;
        let action_id = new_action_id("login");
        self.send(&[
            ("Action", "Login".to_string()),
            ("ActionID", action_id.clone()),
            ("Username", username.to_string()),
            ("Secret", secret.to_string()),
            ("Events", "off".to_string()),
        ])
        .await?;
        let frame = self.await_response(&action_id, "Login").await?;
        if !frame.is_success() {
            let reason = frame.message().unwrap_or("login rejected").to_string();
            return Err(AmiError::AuthFailed(reason));
        }
        self.state = SessionState::Authenticated;
        log::debug!("AMI login accepted for {}", username);
        Ok(())
    }

    async fn originate(&mut self, request: &OriginateRequest) -> Result<ActionAck, AmiError> {
        let action_id = new_action_id("originate");
        self.send(&request.fields(&action_id)).await?;
        self.state = SessionState::ActionSent;
        let frame = self.await_response(&action_id, "Originate").await?;
        if !frame.is_success() {
            let reason = frame.message().unwrap_or("originate failed").to_string();
            return Err(AmiError::OriginateRejected(reason));
        }
        Ok(ActionAck {
            action_id,
            message: frame.message().map(str::to_string),
        })
    }

    async fn send(&mut self, fields: &[(&str, String)]) -> Result<(), AmiError> {
        self.writer
            .write_all(encode_action(fields).as_bytes())
            .await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Read frames until the one carrying `action_id`, discarding events and responses to
    /// anything else. The whole wait is bounded by the response timeout.
    async fn await_response(
        &mut self,
        action_id: &str,
        action: &'static str,
    ) -> Result<AmiFrame, AmiError> {
        self.pending = Some(action_id.to_string());
        let deadline = Instant::now() + self.response_timeout;
        loop {
            let frame = timeout_at(deadline, read_frame(&mut self.reader))
                .await
                .map_err(|_| AmiError::Timeout(action))??;
            let Some(frame) = frame else {
                return Err(AmiError::Closed);
            };
            if frame.action_id() == Some(action_id) {
                self.pending = None;
                return Ok(frame);
            }
            log::trace!(
                "discarding AMI frame while awaiting {}: {}",
                action,
                frame
                    .event()
                    .or(frame.response())
                    .unwrap_or("<no event>")
            );
        }
    }

    /// Best-effort Logoff, then shut the socket. Errors are ignored. Logoff is sent from
    /// every state, including before the banner, so the peer never holds a half-open session.
    async fn close(mut self) {
        if let Some(ref pending) = self.pending {
            log::debug!(
                "closing AMI session in state {:?} with {} unanswered",
                self.state,
                pending
            );
        }
        let logoff = encode_action(&[("Action", "Logoff".to_string())]);
        let writer = &mut self.writer;
        let sent = timeout(LOGOFF_TIMEOUT, async {
            writer.write_all(logoff.as_bytes()).await?;
            writer.flush().await?;
            writer.shutdown().await
        })
        .await;
        match sent {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::debug!("AMI logoff failed: {}", e),
            Err(_) => log::debug!("AMI logoff timed out"),
        }
        log::debug!("AMI session to {} closed from state {:?}", self.addr, self.state);
    }
}

fn new_action_id(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}
