//! Conversions between the Gemini native schema and OpenAI chat
//! completions, used when a Gemini-route request is served by an
//! openai-compatible upstream.

pub mod gemini2openai;

pub use gemini2openai::{
    convert_request, convert_response, finish_reason_to_gemini, StreamConverter,
};
