mod request;
mod response;
mod stream;

pub use request::convert_request;
pub use response::{convert_response, finish_reason_to_gemini};
pub use stream::StreamConverter;
