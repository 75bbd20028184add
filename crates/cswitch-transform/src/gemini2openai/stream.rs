use cswitch_protocol::gemini::{Candidate, Content, ContentRole, GenerateContentResponse, Part};
use cswitch_protocol::openai_chat::ChatCompletionChunk;

use super::response::{finish_reason_to_gemini, usage_to_metadata};

/// Rewrites an openai-chat SSE stream into gemini-native SSE framing.
///
/// Feed each upstream `data:` payload; the converter returns the encoded
/// replacement frame, or `None` for chunks with nothing to forward (for
/// example the `[DONE]` sentinel, which gemini framing does not use).
#[derive(Debug, Default)]
pub struct StreamConverter {
    model: String,
    finish_seen: bool,
}

impl StreamConverter {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            finish_seen: false,
        }
    }

    pub fn convert_data(&mut self, data: &str) -> Option<String> {
        if data == "[DONE]" {
            return None;
        }
        let chunk: ChatCompletionChunk = serde_json::from_str(data).ok()?;

        let mut response = GenerateContentResponse {
            model_version: Some(self.model.clone()),
            ..Default::default()
        };

        for (index, choice) in chunk.choices.iter().enumerate() {
            let text = choice.delta.content.clone().unwrap_or_default();
            let finish = choice
                .finish_reason
                .as_deref()
                .map(finish_reason_to_gemini)
                .map(str::to_string);
            if finish.is_some() {
                self.finish_seen = true;
            }
            if text.is_empty() && finish.is_none() {
                continue;
            }
            response.candidates.push(Candidate {
                content: Some(Content {
                    role: Some(ContentRole::Model),
                    parts: if text.is_empty() {
                        Vec::new()
                    } else {
                        vec![Part::text(text)]
                    },
                }),
                finish_reason: finish,
                index: Some(index as i64),
            });
        }

        if let Some(usage) = chunk.usage.as_ref() {
            response.usage_metadata = Some(usage_to_metadata(usage));
        }

        if response.candidates.is_empty() && response.usage_metadata.is_none() {
            return None;
        }
        Some(encode_gemini_chunk(&response))
    }

    pub fn finish_seen(&self) -> bool {
        self.finish_seen
    }
}

// Gemini streaming uses data-only SSE frames, no [DONE] sentinel.
fn encode_gemini_chunk(response: &GenerateContentResponse) -> String {
    let payload = serde_json::to_string(response).unwrap_or_else(|_| "{}".to_string());
    format!("data: {payload}\n\n")
}
