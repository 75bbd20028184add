//! Static route table: inbound path → (family, schema, stream hint).

use http::Method;

use cswitch_common::{Family, SchemaKind};

#[derive(Debug, Clone, PartialEq)]
pub struct RouteMatch {
    pub family: Family,
    /// `/v1/chat/completions` serves generic clients but defaults to the
    /// codex provider pool when no generic provider exists.
    pub fallback_family: Option<Family>,
    pub schema: SchemaKind,
    /// Stream flag fixed by the route (gemini actions); body-driven
    /// schemas leave this unset and read the `stream` field instead.
    pub stream_from_route: Option<bool>,
    /// Model taken from the path (gemini only).
    pub path_model: Option<String>,
    /// Upstream path suffix for passthrough forwards.
    pub forward_path: String,
}

pub fn classify(method: &Method, path: &str) -> Option<RouteMatch> {
    if *method != Method::POST {
        return None;
    }
    let trimmed = path.trim_start_matches('/');
    let segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();

    match segments.as_slice() {
        ["v1", "messages"] => Some(RouteMatch {
            family: Family::Claude,
            fallback_family: None,
            schema: SchemaKind::AnthropicMessages,
            stream_from_route: None,
            path_model: None,
            forward_path: "/v1/messages".to_string(),
        }),
        ["responses"] => Some(RouteMatch {
            family: Family::Codex,
            fallback_family: None,
            schema: SchemaKind::OpenaiResponses,
            stream_from_route: None,
            path_model: None,
            forward_path: "/responses".to_string(),
        }),
        ["v1", "chat", "completions"] => Some(RouteMatch {
            family: Family::Generic,
            fallback_family: Some(Family::Codex),
            schema: SchemaKind::OpenaiChat,
            stream_from_route: None,
            path_model: None,
            forward_path: "/v1/chat/completions".to_string(),
        }),
        ["chat", "completions"] => Some(RouteMatch {
            family: Family::Generic,
            fallback_family: None,
            schema: SchemaKind::OpenaiChat,
            stream_from_route: None,
            path_model: None,
            forward_path: "/chat/completions".to_string(),
        }),
        ["v1beta", "models", rest @ ..] if !rest.is_empty() => {
            let joined = rest.join("/");
            let (model, action) = joined.split_once(':')?;
            let stream = match action {
                "generateContent" => false,
                "streamGenerateContent" => true,
                _ => return None,
            };
            Some(RouteMatch {
                family: Family::Gemini,
                fallback_family: None,
                schema: SchemaKind::GeminiNative,
                stream_from_route: Some(stream),
                path_model: Some(model.to_string()),
                forward_path: String::new(),
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_six_routes_classify() {
        let m = classify(&Method::POST, "/v1/messages").unwrap();
        assert_eq!(m.family, Family::Claude);
        assert_eq!(m.schema, SchemaKind::AnthropicMessages);

        let m = classify(&Method::POST, "/responses").unwrap();
        assert_eq!(m.family, Family::Codex);
        assert_eq!(m.schema, SchemaKind::OpenaiResponses);

        let m = classify(&Method::POST, "/v1/chat/completions").unwrap();
        assert_eq!(m.family, Family::Generic);
        assert_eq!(m.fallback_family, Some(Family::Codex));

        let m = classify(&Method::POST, "/chat/completions").unwrap();
        assert_eq!(m.family, Family::Generic);
        assert_eq!(m.fallback_family, None);

        let m = classify(
            &Method::POST,
            "/v1beta/models/gemini-2.5-flash:generateContent",
        )
        .unwrap();
        assert_eq!(m.family, Family::Gemini);
        assert_eq!(m.stream_from_route, Some(false));
        assert_eq!(m.path_model.as_deref(), Some("gemini-2.5-flash"));

        let m = classify(
            &Method::POST,
            "/v1beta/models/gemini-2.5-flash:streamGenerateContent",
        )
        .unwrap();
        assert_eq!(m.stream_from_route, Some(true));
    }

    #[test]
    fn unknown_paths_and_methods_fall_through() {
        assert!(classify(&Method::GET, "/v1/messages").is_none());
        assert!(classify(&Method::POST, "/v1/embeddings").is_none());
        assert!(classify(&Method::POST, "/v1beta/models/gemini:badAction").is_none());
        assert!(classify(&Method::POST, "/v1beta/models").is_none());
    }
}
