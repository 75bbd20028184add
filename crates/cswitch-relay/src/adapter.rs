//! Schema adapter: reads the request envelope (model, stream flag),
//! rewrites the model field for the chosen provider, and converts the
//! Gemini native route to openai-chat when the upstream needs it. It
//! never touches message content, tools, or sampling parameters.

use bytes::Bytes;
use serde_json::Value as JsonValue;

use cswitch_common::{ErrorKind, RelayError, SchemaKind};
use cswitch_protocol::gemini::GenerateContentRequest;
use cswitch_transform::convert_request;

use crate::route::RouteMatch;
use crate::select::Candidate;

#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub model: Option<String>,
    pub stream: bool,
}

/// Pull the requested model and stream flag out of the inbound request.
pub fn request_meta(route: &RouteMatch, body: &[u8]) -> RequestMeta {
    if let Some(stream) = route.stream_from_route {
        return RequestMeta {
            model: route.path_model.clone(),
            stream,
        };
    }
    let Ok(value) = serde_json::from_slice::<JsonValue>(body) else {
        return RequestMeta::default();
    };
    RequestMeta {
        model: value
            .get("model")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        stream: value
            .get("stream")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false),
    }
}

/// A request ready for one upstream attempt.
#[derive(Debug, Clone)]
pub struct PreparedCall {
    /// Path appended to the provider base URL.
    pub path: String,
    pub body: Bytes,
    /// The schema the upstream speaks for this call.
    pub upstream_schema: SchemaKind,
    /// Convert the upstream openai-chat reply back to gemini framing.
    pub convert_back: bool,
}

pub fn prepare(
    route: &RouteMatch,
    candidate: &Candidate,
    body: &Bytes,
    stream: bool,
) -> Result<PreparedCall, RelayError> {
    if route.schema == SchemaKind::GeminiNative {
        return prepare_gemini(candidate, body, stream);
    }

    let mut value: JsonValue = serde_json::from_slice(body)
        .map_err(|err| RelayError::new(ErrorKind::ConfigInvalid, format!("invalid json body: {err}")))?;
    if let Some(object) = value.as_object_mut() {
        object.insert(
            "model".to_string(),
            JsonValue::String(candidate.upstream_model.clone()),
        );
    }
    let rewritten = serde_json::to_vec(&value)
        .map_err(|err| RelayError::new(ErrorKind::ConfigInvalid, err.to_string()))?;
    Ok(PreparedCall {
        path: route.forward_path.clone(),
        body: Bytes::from(rewritten),
        upstream_schema: route.schema,
        convert_back: false,
    })
}

fn prepare_gemini(
    candidate: &Candidate,
    body: &Bytes,
    stream: bool,
) -> Result<PreparedCall, RelayError> {
    let model = &candidate.upstream_model;
    if is_gemini_upstream(&candidate.provider.api_url) {
        let action = if stream {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        return Ok(PreparedCall {
            path: format!("/v1beta/models/{model}:{action}"),
            body: body.clone(),
            upstream_schema: SchemaKind::GeminiNative,
            convert_back: false,
        });
    }

    let request: GenerateContentRequest = serde_json::from_slice(body).map_err(|err| {
        RelayError::new(
            ErrorKind::ConfigInvalid,
            format!("invalid gemini request body: {err}"),
        )
    })?;
    let converted = convert_request(request, model, stream);
    let encoded = serde_json::to_vec(&converted)
        .map_err(|err| RelayError::new(ErrorKind::ConfigInvalid, err.to_string()))?;
    Ok(PreparedCall {
        path: "/v1/chat/completions".to_string(),
        body: Bytes::from(encoded),
        upstream_schema: SchemaKind::OpenaiChat,
        convert_back: true,
    })
}

/// Whether a provider base URL is already gemini-native.
pub fn is_gemini_upstream(api_url: &str) -> bool {
    let trimmed = api_url.trim_end_matches('/');
    trimmed.contains("generativelanguage.googleapis.com") || trimmed.ends_with("/v1beta")
}
