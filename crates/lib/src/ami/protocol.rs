//! AMI framing: `Key: Value` lines terminated by a blank line, CRLF on the wire.

use super::error::AmiError;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Default AMI TCP port.
pub const DEFAULT_AMI_PORT: u16 = 5038;

/// Upper bound on lines in one frame; a peer sending more is not speaking AMI.
const MAX_FRAME_LINES: usize = 512;

/// Serialize an action as `Key: Value\r\n` lines plus the terminating blank line.
pub fn encode_action(fields: &[(&str, String)]) -> String {
    let mut out = String::new();
    for (key, value) in fields {
        out.push_str(key);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
    out
}

/// One response or event block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmiFrame {
    headers: Vec<(String, String)>,
}

impl AmiFrame {
    /// Parse a block of lines (used for fixtures and logging).
    pub fn parse(text: &str) -> Self {
        let mut frame = Self::default();
        for line in text.lines() {
            frame.push_line(line);
        }
        frame
    }

    fn push_line(&mut self, line: &str) -> bool {
        match line.split_once(':') {
            Some((key, value)) => {
                self.headers
                    .push((key.trim().to_string(), value.trim().to_string()));
                true
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// First value for `key`, compared case-insensitively.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn action_id(&self) -> Option<&str> {
        self.get("ActionID")
    }

    pub fn response(&self) -> Option<&str> {
        self.get("Response")
    }

    pub fn event(&self) -> Option<&str> {
        self.get("Event")
    }

    pub fn message(&self) -> Option<&str> {
        self.get("Message")
    }

    pub fn is_success(&self) -> bool {
        self.response()
            .is_some_and(|r| r.eq_ignore_ascii_case("success"))
    }
}

/// Read the next frame. Leading blank lines are skipped; `None` on EOF before any header.
/// Non-UTF-8 bytes (e.g. Latin-1 caller names in events) are replaced, not rejected.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<AmiFrame>, AmiError>
where
    R: AsyncBufRead + Unpin,
{
    let mut frame = AmiFrame::default();
    let mut lines = 0usize;
    let mut raw = Vec::new();
    loop {
        raw.clear();
        if reader.read_until(b'\n', &mut raw).await? == 0 {
            return Ok(if frame.is_empty() { None } else { Some(frame) });
        }
        let line = String::from_utf8_lossy(&raw);
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            if frame.is_empty() {
                continue;
            }
            return Ok(Some(frame));
        }
        lines += 1;
        if lines > MAX_FRAME_LINES {
            return Err(AmiError::Protocol(format!(
                "frame exceeds {} lines",
                MAX_FRAME_LINES
            )));
        }
        frame.push_line(trimmed);
    }
}
