//! The slice of the Anthropic messages schema the relay actually reads:
//! the usage envelope. Message content passes through untouched.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: i64,
    #[serde(default)]
    pub output_tokens: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation: Option<CacheCreation>,
}

/// Ephemeral-cache breakdown inside `usage.cache_creation`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheCreation {
    #[serde(default)]
    pub ephemeral_5m_input_tokens: i64,
    #[serde(default)]
    pub ephemeral_1h_input_tokens: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_parses_with_cache_breakdown() {
        let usage: Usage = serde_json::from_str(
            r#"{
                "input_tokens": 100,
                "output_tokens": 50,
                "cache_creation_input_tokens": 30,
                "cache_read_input_tokens": 10,
                "cache_creation": {
                    "ephemeral_5m_input_tokens": 20,
                    "ephemeral_1h_input_tokens": 10
                }
            }"#,
        )
        .unwrap();
        assert_eq!(usage.input_tokens, 100);
        assert_eq!(usage.cache_creation.unwrap().ephemeral_1h_input_tokens, 10);
    }

    #[test]
    fn usage_parses_with_missing_fields() {
        let usage: Usage = serde_json::from_str(r#"{"output_tokens": 7}"#).unwrap();
        assert_eq!(usage.input_tokens, 0);
        assert_eq!(usage.output_tokens, 7);
        assert!(usage.cache_creation.is_none());
    }
}
