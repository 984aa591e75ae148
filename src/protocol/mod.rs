pub mod chat;
pub mod content;
pub mod mapping;
pub mod request_encoder;
pub mod response_decoder;
