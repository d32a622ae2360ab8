//! Incremental server-sent-events parser.

/// One dispatched SSE frame (fields collected up to a blank line).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: String,
}

/// Longest line kept; the rest of a longer line is dropped up to its newline.
const MAX_LINE_BYTES: usize = 1 << 20;

/// Feeds on arbitrary byte chunks; partial lines are kept until the next chunk.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already searched for a newline.
    scanned: usize,
    /// Inside an over-long line that is being skipped.
    discarding: bool,
    event: Option<String>,
    id: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
            let end = self.scanned + offset;
            self.scanned = end + 1;
            if std::mem::take(&mut self.discarding) {
                start = self.scanned;
                continue;
            }
            let mut line_bytes = &self.buffer[start..end];
            if line_bytes.last() == Some(&b'\r') {
                line_bytes = &line_bytes[..line_bytes.len() - 1];
            }
            let line = String::from_utf8_lossy(line_bytes).into_owned();
            start = self.scanned;
            if let Some(frame) = self.line(&line) {
                frames.push(frame);
            }
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        if self.buffer.len() > MAX_LINE_BYTES {
            log::warn!("SSE line exceeds {} bytes, dropping it", MAX_LINE_BYTES);
            self.buffer.clear();
            self.scanned = 0;
            self.discarding = true;
        }
        frames
    }

    fn line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        let id = self.id.take();
        if self.data.is_empty() && event.is_none() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame { event, id, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ntfy_frames() {
        let mut p = SseParser::new();
        let frames = p.push(
            b"event: open\ndata: {\"id\":\"a\",\"event\":\"open\"}\n\nid: b\nevent: message\ndata: {\"message\":\"hi\"}\n\n",
        );
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event.as_deref(), Some("open"));
        assert_eq!(frames[1].id.as_deref(), Some("b"));
        assert_eq!(frames[1].data, "{\"message\":\"hi\"}");
    }

    #[test]
    fn frame_split_across_chunks_and_crlf() {
        let mut p = SseParser::new();
        assert!(p.push(b"event: mess").is_empty());
        assert!(p.push(b"age\r\ndata: {\"mes").is_empty());
        let frames = p.push(b"sage\":\"x\"}\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("message"));
        assert_eq!(frames[0].data, "{\"message\":\"x\"}");
    }

    #[test]
    fn overlong_line_is_dropped_and_parsing_resumes() {
        let mut p = SseParser::new();
        assert!(p.push(b"data: ").is_empty());
        let filler = vec![b'x'; MAX_LINE_BYTES];
        assert!(p.push(&filler).is_empty());
        assert!(p.push(&filler).is_empty());
        let frames = p.push(b"tail\n\ndata: ok\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "ok");
    }

    #[test]
    fn comments_and_stray_blank_lines_are_ignored() {
        let mut p = SseParser::new();
        let frames = p.push(b": keepalive comment\n\n\ndata: one\ndata: two\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "one\ntwo");
        assert_eq!(frames[0].event, None);
    }
}
