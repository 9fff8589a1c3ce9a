// SambaNova Cloud adapter (OpenAI-compatible chat completions)
// Documentation: https://docs.sambanova.ai/cloud/docs/get-started/overview
//
// Any endpoint speaking the OpenAI `/chat/completions` and `/models` dialect
// works here; the base URL comes from configuration.

use crate::llm::provider::LLMAdapter;
use crate::types::{AppError, AppResult, LLMMessage, LLMRequest, LLMResponse, TokenUsage};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub struct SambaNovaAdapter {
    client: Client,
    api_key: String,
    base_url: String,
}

// Request types
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [LLMMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

// Response types
#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

impl SambaNovaAdapter {
    pub fn new(api_key: &str, base_url: &str) -> Self {
        Self::with_client(Client::new(), api_key, base_url)
    }

    /// Share a connection pool across adapters
    pub fn with_client(client: Client, api_key: &str, base_url: &str) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Pull the most useful message out of an error body
    fn describe_error(status: StatusCode, body: &str) -> String {
        match serde_json::from_str::<ErrorResponse>(body) {
            Ok(parsed) => match parsed.error.code {
                Some(code) => format!("API error ({}): {} (code: {})", status, parsed.error.message, code),
                None => format!("API error ({}): {}", status, parsed.error.message),
            },
            Err(_) if body.trim().is_empty() => format!("API error ({})", status),
            Err(_) => format!("API error ({}): {}", status, body.trim()),
        }
    }
}

#[async_trait]
impl LLMAdapter for SambaNovaAdapter {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = ChatRequest {
            model: &request.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: false,
        };

        debug!(model = %request.model, messages = request.messages.len(), "Sending chat completion");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Query(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Query(Self::describe_error(status, &error_text)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::Query(format!("failed to parse response: {}", e)))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Query("model returned no choices".to_string()))?;

        Ok(LLMResponse {
            content: choice.message.content.unwrap_or_default(),
            finish_reason: choice.finish_reason,
            usage: parsed.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        })
    }

    async fn verify(&self) -> AppResult<()> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| AppError::Authentication(format!("connection failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let error_text = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AppError::Authentication(
                format!("invalid API key ({})", status),
            )),
            _ => Err(AppError::Authentication(Self::describe_error(status, &error_text))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> LLMRequest {
        LLMRequest {
            model: "DeepSeek-R1-Distill-Llama-70B".to_string(),
            messages: vec![LLMMessage::system("be brief"), LLMMessage::user("hi")],
            max_tokens: None,
            temperature: Some(0.0),
        }
    }

    #[test]
    fn test_base_url_is_normalized() {
        let adapter = SambaNovaAdapter::new("key", "https://api.sambanova.ai/v1/");
        assert_eq!(adapter.base_url(), "https://api.sambanova.ai/v1");
    }

    #[tokio::test]
    async fn test_chat_completion_parses_first_choice() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "model": "DeepSeek-R1-Distill-Llama-70B",
                "stream": false,
                "messages": [{"role": "system", "content": "be brief"}, {"role": "user", "content": "hi"}],
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"hello"},"finish_reason":"stop"}],
                   "usage":{"prompt_tokens":5,"completion_tokens":1,"total_tokens":6}}"#,
            )
            .create_async()
            .await;

        let adapter = SambaNovaAdapter::new("sk-test", &server.url());
        let response = adapter.create_chat_completion(&request()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.content, "hello");
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.usage.map(|u| u.total_tokens), Some(6));
    }

    #[tokio::test]
    async fn test_chat_completion_surfaces_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body(r#"{"error":{"message":"rate limit exceeded","code":"rate_limit"}}"#)
            .create_async()
            .await;

        let adapter = SambaNovaAdapter::new("sk-test", &server.url());
        let err = adapter.create_chat_completion(&request()).await.unwrap_err();
        match err {
            AppError::Query(msg) => assert!(msg.contains("rate limit exceeded"), "{}", msg),
            other => panic!("expected query error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_choices_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;

        let adapter = SambaNovaAdapter::new("sk-test", &server.url());
        let err = adapter.create_chat_completion(&request()).await.unwrap_err();
        assert!(matches!(err, AppError::Query(_)));
    }

    #[tokio::test]
    async fn test_verify_accepts_valid_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/models")
            .match_header("authorization", "Bearer sk-good")
            .with_status(200)
            .with_body(r#"{"data":[]}"#)
            .create_async()
            .await;

        let adapter = SambaNovaAdapter::new("sk-good", &server.url());
        adapter.verify().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_verify_rejects_bad_key() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/models")
            .with_status(401)
            .create_async()
            .await;

        let adapter = SambaNovaAdapter::new("sk-bad", &server.url());
        let err = adapter.verify().await.unwrap_err();
        assert!(matches!(err, AppError::Authentication(msg) if msg.contains("invalid API key")));
    }

    #[tokio::test]
    async fn test_verify_reports_unreachable_endpoint() {
        // nothing listens on port 9 locally
        let adapter = SambaNovaAdapter::new("sk-test", "http://127.0.0.1:9/v1");
        let err = adapter.verify().await.unwrap_err();
        assert!(matches!(err, AppError::Authentication(msg) if msg.contains("connection failed")));
    }
}
