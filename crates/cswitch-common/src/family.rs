use serde::{Deserialize, Serialize};

/// Client family, determined by the inbound route.
///
/// Each family corresponds to one CLI agent ecosystem; `Generic` covers
/// plain OpenAI-chat clients that do not identify themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Claude,
    Codex,
    Gemini,
    Generic,
}

impl Family {
    pub const ALL: [Family; 4] = [
        Family::Claude,
        Family::Codex,
        Family::Gemini,
        Family::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Family::Claude => "claude",
            Family::Codex => "codex",
            Family::Gemini => "gemini",
            Family::Generic => "generic",
        }
    }

    pub fn parse(value: &str) -> Option<Family> {
        match value {
            "claude" => Some(Family::Claude),
            "codex" => Some(Family::Codex),
            "gemini" => Some(Family::Gemini),
            "generic" => Some(Family::Generic),
            _ => None,
        }
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire format of the request/response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemaKind {
    AnthropicMessages,
    OpenaiResponses,
    OpenaiChat,
    GeminiNative,
}

impl SchemaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaKind::AnthropicMessages => "anthropic-messages",
            SchemaKind::OpenaiResponses => "openai-responses",
            SchemaKind::OpenaiChat => "openai-chat",
            SchemaKind::GeminiNative => "gemini-native",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_round_trips_through_str() {
        for family in Family::ALL {
            assert_eq!(Family::parse(family.as_str()), Some(family));
        }
        assert_eq!(Family::parse("unknown"), None);
    }

    #[test]
    fn family_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Family::Claude).unwrap(), "\"claude\"");
        assert_eq!(
            serde_json::from_str::<Family>("\"gemini\"").unwrap(),
            Family::Gemini
        );
    }
}
