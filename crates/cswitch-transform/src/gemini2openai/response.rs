use cswitch_protocol::gemini::{
    Candidate, Content, ContentRole, FunctionCall, GenerateContentResponse, Part, UsageMetadata,
};
use cswitch_protocol::openai_chat::{ChatCompletionResponse, CompletionUsage, ToolCall};

/// Convert an OpenAI chat completion back into a Gemini generateContent
/// response.
pub fn convert_response(
    response: ChatCompletionResponse,
    model: &str,
) -> GenerateContentResponse {
    let candidates = response
        .choices
        .into_iter()
        .enumerate()
        .map(|(index, choice)| {
            let mut parts = Vec::new();
            if let Some(text) = choice.message.content
                && !text.is_empty()
            {
                parts.push(Part::text(text));
            }
            for call in choice.message.tool_calls {
                parts.push(tool_call_part(call));
            }
            Candidate {
                content: Some(Content {
                    role: Some(ContentRole::Model),
                    parts,
                }),
                finish_reason: choice
                    .finish_reason
                    .as_deref()
                    .map(finish_reason_to_gemini)
                    .map(str::to_string),
                index: Some(index as i64),
            }
        })
        .collect();

    GenerateContentResponse {
        candidates,
        usage_metadata: response.usage.as_ref().map(usage_to_metadata),
        model_version: Some(model.to_string()),
    }
}

pub fn finish_reason_to_gemini(reason: &str) -> &'static str {
    match reason {
        "length" => "MAX_TOKENS",
        "content_filter" => "SAFETY",
        // tool_calls and stop both terminate the turn normally.
        _ => "STOP",
    }
}

pub(super) fn usage_to_metadata(usage: &CompletionUsage) -> UsageMetadata {
    UsageMetadata {
        prompt_token_count: Some(usage.prompt_tokens),
        candidates_token_count: Some(usage.completion_tokens),
        total_token_count: Some(usage.total_tokens),
        cached_content_token_count: usage
            .prompt_tokens_details
            .as_ref()
            .map(|details| details.cached_tokens),
        thoughts_token_count: usage
            .completion_tokens_details
            .as_ref()
            .map(|details| details.reasoning_tokens),
    }
}

fn tool_call_part(call: ToolCall) -> Part {
    let args = serde_json::from_str(&call.function.arguments).ok();
    Part {
        function_call: Some(FunctionCall {
            name: call.function.name,
            args,
        }),
        ..Default::default()
    }
}
