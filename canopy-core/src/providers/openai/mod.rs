//! OpenAI adapter
//!
//! Translates between the canonical protocol and the Chat Completions API.
//! Works against any OpenAI-compatible server by pointing `base_url` at it.

mod client;
pub mod converter;
mod streaming;
pub mod types;

pub use client::OpenAIAdapter;
pub use types::{OpenAIRequest, OpenAIResponse, OpenAIStreamChunk};
