//! Token-usage extraction across the four schemas, for both unary bodies
//! and SSE streams. Missing fields default to zero.

use crate::claude;
use crate::gemini;
use crate::openai_chat::CompletionUsage;
use crate::openai_responses::ResponseUsage;
use cswitch_common::SchemaKind;
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageReport {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_create_tokens: i64,
    pub cache_read_tokens: i64,
    pub reasoning_tokens: i64,
    /// Ephemeral-cache split of `cache_create_tokens`; zero when the
    /// upstream does not break it down.
    pub cache_5m_tokens: i64,
    pub cache_1h_tokens: i64,
}

impl UsageReport {
    pub fn is_empty(&self) -> bool {
        *self == UsageReport::default()
    }

    fn from_claude(usage: &claude::Usage) -> Self {
        let (cache_5m, cache_1h) = usage
            .cache_creation
            .as_ref()
            .map(|cc| (cc.ephemeral_5m_input_tokens, cc.ephemeral_1h_input_tokens))
            .unwrap_or((0, 0));
        Self {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_create_tokens: usage.cache_creation_input_tokens.unwrap_or(0),
            cache_read_tokens: usage.cache_read_input_tokens.unwrap_or(0),
            reasoning_tokens: 0,
            cache_5m_tokens: cache_5m,
            cache_1h_tokens: cache_1h,
        }
    }

    fn from_openai_chat(usage: &CompletionUsage) -> Self {
        Self {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cache_create_tokens: 0,
            cache_read_tokens: usage
                .prompt_tokens_details
                .as_ref()
                .map(|details| details.cached_tokens)
                .unwrap_or(0),
            reasoning_tokens: usage
                .completion_tokens_details
                .as_ref()
                .map(|details| details.reasoning_tokens)
                .unwrap_or(0),
            cache_5m_tokens: 0,
            cache_1h_tokens: 0,
        }
    }

    fn from_openai_responses(usage: &ResponseUsage) -> Self {
        Self {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_create_tokens: 0,
            cache_read_tokens: usage
                .input_tokens_details
                .as_ref()
                .map(|details| details.cached_tokens)
                .unwrap_or(0),
            reasoning_tokens: usage
                .output_tokens_details
                .as_ref()
                .map(|details| details.reasoning_tokens)
                .unwrap_or(0),
            cache_5m_tokens: 0,
            cache_1h_tokens: 0,
        }
    }

    fn from_gemini(usage: &gemini::UsageMetadata) -> Self {
        Self {
            input_tokens: usage.prompt_token_count.unwrap_or(0),
            output_tokens: usage.candidates_token_count.unwrap_or(0),
            cache_create_tokens: 0,
            cache_read_tokens: usage.cached_content_token_count.unwrap_or(0),
            reasoning_tokens: usage.thoughts_token_count.unwrap_or(0),
            cache_5m_tokens: 0,
            cache_1h_tokens: 0,
        }
    }
}

/// Pull a usage report out of a complete (unary) response body.
pub fn extract_unary(schema: SchemaKind, body: &[u8]) -> UsageReport {
    let Ok(value) = serde_json::from_slice::<JsonValue>(body) else {
        return UsageReport::default();
    };
    extract_from_value(schema, &value).unwrap_or_default()
}

fn extract_from_value(schema: SchemaKind, value: &JsonValue) -> Option<UsageReport> {
    match schema {
        SchemaKind::AnthropicMessages => {
            let usage = value
                .get("usage")
                .or_else(|| value.get("message").and_then(|m| m.get("usage")))?;
            let usage: claude::Usage = serde_json::from_value(usage.clone()).ok()?;
            Some(UsageReport::from_claude(&usage))
        }
        SchemaKind::OpenaiChat => {
            let usage: CompletionUsage =
                serde_json::from_value(value.get("usage")?.clone()).ok()?;
            Some(UsageReport::from_openai_chat(&usage))
        }
        SchemaKind::OpenaiResponses => {
            // Stream events nest the response object; unary bodies are it.
            let usage = value
                .get("usage")
                .or_else(|| value.get("response").and_then(|r| r.get("usage")))?;
            let usage: ResponseUsage = serde_json::from_value(usage.clone()).ok()?;
            Some(UsageReport::from_openai_responses(&usage))
        }
        SchemaKind::GeminiNative => {
            let usage: gemini::UsageMetadata =
                serde_json::from_value(value.get("usageMetadata")?.clone()).ok()?;
            Some(UsageReport::from_gemini(&usage))
        }
    }
}

/// Incremental usage tap over an SSE stream. Feed every `data:` payload;
/// the last block carrying usage wins, matching upstreams that emit usage
/// only in a trailing message.
#[derive(Debug)]
pub struct StreamUsage {
    schema: SchemaKind,
    report: Option<UsageReport>,
    partial_output: Option<i64>,
}

impl StreamUsage {
    pub fn new(schema: SchemaKind) -> Self {
        Self {
            schema,
            report: None,
            partial_output: None,
        }
    }

    pub fn push_data(&mut self, data: &str) {
        if data == "[DONE]" {
            return;
        }
        let Ok(value) = serde_json::from_str::<JsonValue>(data) else {
            return;
        };
        if let Some(report) = extract_from_value(self.schema, &value) {
            // Anthropic message_start reports input tokens with a
            // placeholder output count; message_delta later corrects it.
            match self.report {
                Some(ref mut existing) if self.schema == SchemaKind::AnthropicMessages => {
                    merge_claude(existing, &report);
                }
                _ => self.report = Some(report),
            }
        } else if self.schema == SchemaKind::AnthropicMessages
            && let Some(delta_output) = value
                .get("usage")
                .and_then(|u| u.get("output_tokens"))
                .and_then(|v| v.as_i64())
        {
            self.partial_output = Some(delta_output);
        }
    }

    pub fn finish(self) -> UsageReport {
        let mut report = self.report.unwrap_or_default();
        if let Some(output) = self.partial_output
            && output > report.output_tokens
        {
            report.output_tokens = output;
        }
        report
    }
}

fn merge_claude(existing: &mut UsageReport, update: &UsageReport) {
    if update.input_tokens > 0 {
        existing.input_tokens = update.input_tokens;
    }
    if update.output_tokens > 0 {
        existing.output_tokens = update.output_tokens;
    }
    if update.cache_create_tokens > 0 {
        existing.cache_create_tokens = update.cache_create_tokens;
        existing.cache_5m_tokens = update.cache_5m_tokens;
        existing.cache_1h_tokens = update.cache_1h_tokens;
    }
    if update.cache_read_tokens > 0 {
        existing.cache_read_tokens = update.cache_read_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unary_claude_usage() {
        let body = br#"{"id":"msg_1","usage":{"input_tokens":100,"output_tokens":50}}"#;
        let report = extract_unary(SchemaKind::AnthropicMessages, body);
        assert_eq!(report.input_tokens, 100);
        assert_eq!(report.output_tokens, 50);
    }

    #[test]
    fn unary_openai_chat_usage_with_cached_and_reasoning() {
        let body = br#"{"usage":{
            "prompt_tokens":80,"completion_tokens":20,"total_tokens":100,
            "prompt_tokens_details":{"cached_tokens":16},
            "completion_tokens_details":{"reasoning_tokens":5}}}"#;
        let report = extract_unary(SchemaKind::OpenaiChat, body);
        assert_eq!(report.input_tokens, 80);
        assert_eq!(report.cache_read_tokens, 16);
        assert_eq!(report.reasoning_tokens, 5);
    }

    #[test]
    fn unary_gemini_usage() {
        let body = br#"{"usageMetadata":{"promptTokenCount":12,"candidatesTokenCount":7,"totalTokenCount":19}}"#;
        let report = extract_unary(SchemaKind::GeminiNative, body);
        assert_eq!(report.input_tokens, 12);
        assert_eq!(report.output_tokens, 7);
    }

    #[test]
    fn missing_usage_defaults_to_zero() {
        let report = extract_unary(SchemaKind::OpenaiChat, br#"{"choices":[]}"#);
        assert!(report.is_empty());
    }

    #[test]
    fn claude_stream_merges_start_and_delta() {
        let mut tap = StreamUsage::new(SchemaKind::AnthropicMessages);
        tap.push_data(
            r#"{"type":"message_start","message":{"usage":{"input_tokens":90,"output_tokens":1}}}"#,
        );
        tap.push_data(r#"{"type":"content_block_delta","delta":{"text":"hi"}}"#);
        tap.push_data(r#"{"type":"message_delta","usage":{"output_tokens":42}}"#);
        let report = tap.finish();
        assert_eq!(report.input_tokens, 90);
        assert_eq!(report.output_tokens, 42);
    }

    #[test]
    fn openai_chat_stream_takes_trailing_usage_block() {
        let mut tap = StreamUsage::new(SchemaKind::OpenaiChat);
        tap.push_data(r#"{"choices":[{"delta":{"content":"a"}}]}"#);
        tap.push_data(
            r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":3,"total_tokens":13}}"#,
        );
        tap.push_data("[DONE]");
        let report = tap.finish();
        assert_eq!(report.input_tokens, 10);
        assert_eq!(report.output_tokens, 3);
    }

    #[test]
    fn responses_stream_reads_completed_event() {
        let mut tap = StreamUsage::new(SchemaKind::OpenaiResponses);
        tap.push_data(
            r#"{"type":"response.completed","response":{"usage":{"input_tokens":5,"output_tokens":2,"total_tokens":7}}}"#,
        );
        let report = tap.finish();
        assert_eq!(report.input_tokens, 5);
        assert_eq!(report.output_tokens, 2);
    }

    #[test]
    fn gemini_stream_keeps_last_usage_metadata() {
        let mut tap = StreamUsage::new(SchemaKind::GeminiNative);
        tap.push_data(r#"{"candidates":[{"content":{"parts":[{"text":"a"}]}}]}"#);
        tap.push_data(
            r#"{"candidates":[],"usageMetadata":{"promptTokenCount":4,"candidatesTokenCount":9}}"#,
        );
        let report = tap.finish();
        assert_eq!(report.output_tokens, 9);
    }
}
