//! OpenAI responses-API usage envelope. Only the usage fields are
//! interpreted; everything else is relayed verbatim.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseUsage {
    #[serde(default)]
    pub input_tokens: i64,
    #[serde(default)]
    pub output_tokens: i64,
    #[serde(default)]
    pub total_tokens: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens_details: Option<InputTokensDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens_details: Option<OutputTokensDetails>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputTokensDetails {
    #[serde(default)]
    pub cached_tokens: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputTokensDetails {
    #[serde(default)]
    pub reasoning_tokens: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_parses_details() {
        let usage: ResponseUsage = serde_json::from_str(
            r#"{
                "input_tokens": 40,
                "output_tokens": 12,
                "total_tokens": 52,
                "input_tokens_details": {"cached_tokens": 8},
                "output_tokens_details": {"reasoning_tokens": 4}
            }"#,
        )
        .unwrap();
        assert_eq!(usage.input_tokens_details.unwrap().cached_tokens, 8);
        assert_eq!(usage.output_tokens_details.unwrap().reasoning_tokens, 4);
    }
}
