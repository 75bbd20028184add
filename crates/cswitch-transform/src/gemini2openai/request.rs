use cswitch_protocol::gemini::{
    Content, ContentRole, GenerateContentRequest, Part, Tool as GeminiTool,
};
use cswitch_protocol::openai_chat::{
    ChatCompletionRequest, ChatMessage, ChatRole, FunctionObject, StreamOptions, ToolCall,
    ToolCallFunction, ToolDefinition,
};

/// Convert a Gemini generateContent request into an OpenAI chat-completions
/// request for `model`. The model name comes from the route path, already
/// rewritten by the provider's model mapping.
pub fn convert_request(
    request: GenerateContentRequest,
    model: &str,
    stream: bool,
) -> ChatCompletionRequest {
    let mut messages = Vec::new();
    let mut call_index = 0usize;

    if let Some(system) = request.system_instruction {
        let text = system.joined_text();
        if !text.is_empty() {
            messages.push(ChatMessage::text(ChatRole::System, text));
        }
    }

    for content in request.contents {
        append_content(content, &mut messages, &mut call_index);
    }

    ChatCompletionRequest {
        model: model.strip_prefix("models/").unwrap_or(model).to_string(),
        messages,
        stream: stream.then_some(true),
        // Ask streamed upstreams to append a usage chunk so accounting
        // survives the conversion.
        stream_options: stream.then_some(StreamOptions {
            include_usage: true,
        }),
        temperature: request
            .generation_config
            .as_ref()
            .and_then(|config| config.temperature),
        top_p: request
            .generation_config
            .as_ref()
            .and_then(|config| config.top_p),
        max_completion_tokens: request
            .generation_config
            .as_ref()
            .and_then(|config| config.max_output_tokens),
        stop: request
            .generation_config
            .as_ref()
            .and_then(|config| config.stop_sequences.clone()),
        tools: convert_tools(request.tools),
    }
}

fn append_content(content: Content, messages: &mut Vec<ChatMessage>, call_index: &mut usize) {
    match content.role {
        Some(ContentRole::Model) => append_model_turn(content, messages, call_index),
        _ => append_user_turn(content, messages, call_index),
    }
}

fn append_model_turn(content: Content, messages: &mut Vec<ChatMessage>, call_index: &mut usize) {
    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();
    for part in content.parts {
        if let Some(text) = part.text {
            texts.push(text);
        }
        if let Some(call) = part.function_call {
            let arguments = call
                .args
                .map(|args| args.to_string())
                .unwrap_or_else(|| "{}".to_string());
            tool_calls.push(ToolCall {
                id: next_call_id(call_index),
                kind: "function".to_string(),
                function: ToolCallFunction {
                    name: call.name,
                    arguments,
                },
            });
        }
    }
    if texts.is_empty() && tool_calls.is_empty() {
        return;
    }
    messages.push(ChatMessage {
        role: ChatRole::Assistant,
        content: (!texts.is_empty()).then(|| texts.join("\n")),
        tool_calls,
        tool_call_id: None,
    });
}

fn append_user_turn(content: Content, messages: &mut Vec<ChatMessage>, call_index: &mut usize) {
    let mut texts = Vec::new();
    for part in content.parts {
        if let Some(text) = part.text {
            texts.push(text);
        }
        if let Some(response) = part.function_response {
            // Function results pair with the most recently issued call id.
            let id = current_call_id(*call_index);
            messages.push(ChatMessage {
                role: ChatRole::Tool,
                content: Some(
                    response
                        .response
                        .map(|value| value.to_string())
                        .unwrap_or_default(),
                ),
                tool_calls: Vec::new(),
                tool_call_id: Some(id),
            });
        }
    }
    if !texts.is_empty() {
        messages.push(ChatMessage::text(ChatRole::User, texts.join("\n")));
    }
}

fn convert_tools(tools: Vec<GeminiTool>) -> Vec<ToolDefinition> {
    tools
        .into_iter()
        .flat_map(|tool| tool.function_declarations)
        .map(|declaration| ToolDefinition {
            kind: "function".to_string(),
            function: FunctionObject {
                name: declaration.name,
                description: declaration.description,
                parameters: declaration.parameters,
            },
        })
        .collect()
}

fn next_call_id(index: &mut usize) -> String {
    let id = format!("call_{index}");
    *index += 1;
    id
}

fn current_call_id(index: usize) -> String {
    format!("call_{}", index.saturating_sub(1))
}
