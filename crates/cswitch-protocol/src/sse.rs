use bytes::Bytes;

/// One server-sent event: an optional `event:` name plus the joined
/// `data:` payload lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    pub fn is_done(&self) -> bool {
        self.data == "[DONE]"
    }

    /// Re-encode in the `data: ...\n\n` framing the downstream expects.
    pub fn encode(&self) -> Bytes {
        let mut out = String::new();
        if let Some(event) = &self.event {
            out.push_str("event: ");
            out.push_str(event);
            out.push('\n');
        }
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        Bytes::from(out)
    }
}

/// Incremental SSE decoder. Bytes arrive in arbitrary chunk boundaries;
/// frames are emitted once their terminating blank line is seen.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: String,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        let Ok(text) = std::str::from_utf8(chunk) else {
            return Vec::new();
        };
        self.pending.push_str(text);

        let mut frames = Vec::new();
        while let Some(newline) = self.pending.find('\n') {
            let mut line: String = self.pending.drain(..=newline).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            self.take_line(&line, &mut frames);
        }
        frames
    }

    /// Flush a frame that was cut off without its trailing blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            let mut frames = Vec::new();
            self.take_line(line.trim_end_matches('\r'), &mut frames);
            if let Some(frame) = frames.pop() {
                return Some(frame);
            }
        }
        self.complete()
    }

    fn take_line(&mut self, line: &str, frames: &mut Vec<SseFrame>) {
        if line.is_empty() {
            if let Some(frame) = self.complete() {
                frames.push(frame);
            }
        } else if line.starts_with(':') {
            // comment line, keep-alive
        } else if let Some(value) = field_value(line, "event") {
            self.event = (!value.is_empty()).then(|| value.to_string());
        } else if let Some(value) = field_value(line, "data") {
            self.data_lines.push(value.to_string());
        }
    }

    fn complete(&mut self) -> Option<SseFrame> {
        if self.event.is_none() && self.data_lines.is_empty() {
            return None;
        }
        let frame = SseFrame {
            event: self.event.take(),
            data: self.data_lines.join("\n"),
        };
        self.data_lines.clear();
        Some(frame)
    }
}

fn field_value<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    if line == field {
        return Some("");
    }
    line.strip_prefix(field)?
        .strip_prefix(':')
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
}
