use async_trait::async_trait;
use crate::types::{LLMRequest, LLMResponse, AppResult};

/// A remote chat-completion endpoint
#[async_trait]
pub trait LLMAdapter: Send + Sync {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse>;

    /// Check that the endpoint accepts the adapter's credential.
    async fn verify(&self) -> AppResult<()>;
}
