use http::StatusCode;
use serde::{Deserialize, Serialize};

/// Every failure the relay can surface, as stored in the `error_type`
/// column and carried in the `type` field of JSON error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConfigInvalid,
    Conflict,
    NotFound,
    ProxyDisabled,
    NoProviderConfigured,
    ModelUnsupported,
    NoHealthyProvider,
    UpstreamTransport,
    #[serde(rename = "upstream_http_4xx")]
    UpstreamHttp4xx,
    #[serde(rename = "upstream_http_5xx")]
    UpstreamHttp5xx,
    UpstreamProtocol,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConfigInvalid => "config_invalid",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ProxyDisabled => "proxy_disabled",
            ErrorKind::NoProviderConfigured => "no_provider_configured",
            ErrorKind::ModelUnsupported => "model_unsupported",
            ErrorKind::NoHealthyProvider => "no_healthy_provider",
            ErrorKind::UpstreamTransport => "upstream_transport",
            ErrorKind::UpstreamHttp4xx => "upstream_http_4xx",
            ErrorKind::UpstreamHttp5xx => "upstream_http_5xx",
            ErrorKind::UpstreamProtocol => "upstream_protocol",
        }
    }

    /// Whether this failure should advance the breaker and move the
    /// selector to the next candidate.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::UpstreamTransport
                | ErrorKind::UpstreamHttp5xx
                | ErrorKind::UpstreamProtocol
        )
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::ConfigInvalid => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::ProxyDisabled
            | ErrorKind::NoProviderConfigured
            | ErrorKind::ModelUnsupported
            | ErrorKind::NoHealthyProvider => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::UpstreamTransport
            | ErrorKind::UpstreamHttp5xx
            | ErrorKind::UpstreamProtocol => StatusCode::BAD_GATEWAY,
            // 4xx pass-through keeps the upstream status; this is a fallback.
            ErrorKind::UpstreamHttp4xx => StatusCode::BAD_REQUEST,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RelayError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RelayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigInvalid, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    /// JSON body shape shared by every relay-originated error response.
    pub fn to_body(&self) -> serde_json::Value {
        serde_json::json!({
            "error": true,
            "type": self.kind.as_str(),
            "message": self.message,
        })
    }
}
