// LLM abstraction layer

pub mod provider;
pub mod sambanova;
pub mod client;

pub use provider::*;
pub use client::*;
pub use crate::types::{LLMMessage, LLMRequest, LLMResponse, TokenUsage};
