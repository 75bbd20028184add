//! Upstream HTTP execution over a shared pooled client: header
//! injection per provider convention, per-mode timeouts, and byte-stream
//! bridging for SSE responses.

use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use wreq::Client;

use cswitch_common::SchemaKind;

use crate::adapter::PreparedCall;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    pub connect_timeout: Duration,
    pub unary_timeout: Duration,
    pub stream_timeout: Duration,
    pub stream_idle_timeout: Duration,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            unary_timeout: Duration::from_secs(60),
            stream_timeout: Duration::from_secs(300),
            stream_idle_timeout: Duration::from_secs(30),
        }
    }
}

pub enum UpstreamBody {
    Bytes(Bytes),
    /// Chunks as they arrive; an `Err` item means the stream broke
    /// mid-flight (read error or idle timeout).
    Stream(mpsc::Receiver<Result<Bytes, String>>),
}

pub struct UpstreamReply {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: UpstreamBody,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

pub struct Forwarder {
    unary: Client,
    streaming: Client,
    stream_idle_timeout: Duration,
}

impl Forwarder {
    pub fn new(config: ForwarderConfig) -> Result<Self, wreq::Error> {
        let unary = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.unary_timeout)
            .build()?;
        let streaming = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.stream_timeout)
            .read_timeout(config.stream_idle_timeout)
            .build()?;
        Ok(Self {
            unary,
            streaming,
            stream_idle_timeout: config.stream_idle_timeout,
        })
    }

    /// One upstream attempt. Non-2xx responses come back with their full
    /// body so the caller can classify and pass through or fail over.
    pub async fn send(
        &self,
        api_url: &str,
        api_key: &str,
        call: &PreparedCall,
        want_stream: bool,
    ) -> Result<UpstreamReply, TransportError> {
        let client = if want_stream { &self.streaming } else { &self.unary };
        let url = build_url(api_url, call, api_key, want_stream);

        let mut request = client
            .post(&url)
            .header("content-type", "application/json")
            .header(
                "accept",
                if want_stream {
                    "text/event-stream"
                } else {
                    "application/json"
                },
            );
        // The inbound Authorization is never forwarded; credentials are
        // injected per provider convention.
        match call.upstream_schema {
            SchemaKind::AnthropicMessages => {
                request = request
                    .header("x-api-key", api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION);
            }
            SchemaKind::OpenaiChat | SchemaKind::OpenaiResponses => {
                request = request.header("authorization", format!("Bearer {api_key}"));
            }
            SchemaKind::GeminiNative => {
                // Key travels in the query string; nothing to add here.
            }
        }

        let response = request
            .body(call.body.clone())
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let success = (200..300).contains(&status);
        if !success || !want_stream {
            let body = response.bytes().await.map_err(map_transport_error)?;
            return Ok(UpstreamReply {
                status,
                content_type,
                body: UpstreamBody::Bytes(body),
            });
        }

        let (tx, rx) = mpsc::channel::<Result<Bytes, String>>(16);
        let idle = self.stream_idle_timeout;
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            loop {
                let next = tokio::time::timeout(idle, stream.next()).await;
                let item = match next {
                    Ok(item) => item,
                    Err(_) => {
                        let _ = tx.send(Err("stream idle timeout".to_string())).await;
                        break;
                    }
                };
                let Some(item) = item else {
                    break;
                };
                match item {
                    Ok(chunk) => {
                        if tx.send(Ok(chunk)).await.is_err() {
                            // Client went away; dropping the response
                            // cancels the upstream read.
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(err.to_string())).await;
                        break;
                    }
                }
            }
        });

        Ok(UpstreamReply {
            status,
            content_type,
            body: UpstreamBody::Stream(rx),
        })
    }
}

fn build_url(api_url: &str, call: &PreparedCall, api_key: &str, want_stream: bool) -> String {
    let base = api_url.trim_end_matches('/');
    let path = &call.path;
    // A gemini-native base already carrying /v1beta keeps a single copy.
    let joined = if let Some(stripped) = path.strip_prefix("/v1beta")
        && base.ends_with("/v1beta")
    {
        format!("{base}{stripped}")
    } else {
        format!("{base}{path}")
    };
    if call.upstream_schema == SchemaKind::GeminiNative {
        if want_stream {
            format!("{joined}?alt=sse&key={api_key}")
        } else {
            format!("{joined}?key={api_key}")
        }
    } else {
        joined
    }
}

fn map_transport_error(err: wreq::Error) -> TransportError {
    let mut message = err.to_string();
    if err.is_timeout() {
        message = format!("timeout: {message}");
    } else if err.is_connect() {
        message = format!("connect: {message}");
    }
    TransportError { message }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(path: &str, schema: SchemaKind) -> PreparedCall {
        PreparedCall {
            path: path.to_string(),
            body: Bytes::new(),
            upstream_schema: schema,
            convert_back: false,
        }
    }

    #[test]
    fn url_joins_base_and_path() {
        let url = build_url(
            "https://api.example.com/",
            &call("/v1/messages", SchemaKind::AnthropicMessages),
            "sk",
            false,
        );
        assert_eq!(url, "https://api.example.com/v1/messages");
    }

    #[test]
    fn gemini_url_carries_key_and_sse_flag() {
        let unary = build_url(
            "https://generativelanguage.googleapis.com",
            &call(
                "/v1beta/models/gemini-2.5-flash:generateContent",
                SchemaKind::GeminiNative,
            ),
            "g-key",
            false,
        );
        assert_eq!(
            unary,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent?key=g-key"
        );

        let stream = build_url(
            "https://generativelanguage.googleapis.com/v1beta",
            &call(
                "/v1beta/models/gemini-2.5-flash:streamGenerateContent",
                SchemaKind::GeminiNative,
            ),
            "g-key",
            true,
        );
        assert_eq!(
            stream,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:streamGenerateContent?alt=sse&key=g-key"
        );
    }
}
