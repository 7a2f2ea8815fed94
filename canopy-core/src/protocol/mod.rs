//! Protocol module for the canonical request/response structures
//!
//! These structures are designed to be:
//! - Provider-agnostic
//! - Stable across backends, so they can be hashed and cached
//! - Serializable

pub mod types;

pub use types::{
    FinishReason, ImageAttachment, Message, MessageRole, ModelRequest, ModelResponse,
    RequestKind, ResponseFormat, ResponseMetadata, StreamEvent, TokenUsage,
};
