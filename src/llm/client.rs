//! Model client construction
//!
//! A [`ClientFactory`] turns a user-supplied [`Credential`] into a
//! [`ModelClient`], building at most one client per distinct credential.
//! Construction goes through a [`Connector`] so the remote handshake can be
//! swapped out.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::LLMConfig;
use crate::llm::provider::LLMAdapter;
use crate::llm::sambanova::SambaNovaAdapter;
use crate::types::{AppError, AppResult, LLMMessage, LLMRequest, LLMResponse};

/// An API key held in memory for the lifetime of a session
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Rejects empty and whitespace-only keys.
    pub fn new(raw: impl Into<String>) -> AppResult<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppError::InvalidRequest("Please enter an API Key".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Masked form safe for display, e.g. `••••1234`
    pub fn hint(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() > 4 {
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("••••{}", tail)
        } else {
            "••••".to_string()
        }
    }

    /// Cache key that never holds the raw secret
    fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_bytes()))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.hint()).finish()
    }
}

/// Builds an authenticated adapter for a credential
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, credential: &Credential) -> AppResult<Arc<dyn LLMAdapter>>;
}

/// Connects to the configured OpenAI-compatible endpoint
pub struct SambaNovaConnector {
    http: reqwest::Client,
    config: LLMConfig,
}

impl SambaNovaConnector {
    pub fn new(config: LLMConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl Connector for SambaNovaConnector {
    async fn connect(&self, credential: &Credential) -> AppResult<Arc<dyn LLMAdapter>> {
        let adapter = SambaNovaAdapter::with_client(
            self.http.clone(),
            credential.expose(),
            &self.config.base_url,
        );
        if self.config.verify_credentials {
            adapter.verify().await?;
        }
        Ok(Arc::new(adapter))
    }
}

/// A handle to the remote model: one credential, one endpoint, one model.
pub struct ModelClient {
    adapter: Arc<dyn LLMAdapter>,
    base_url: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl ModelClient {
    pub fn new(adapter: Arc<dyn LLMAdapter>, config: &LLMConfig) -> Self {
        Self {
            adapter,
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// One non-streaming completion
    pub async fn complete(&self, messages: Vec<LLMMessage>) -> AppResult<LLMResponse> {
        let request = LLMRequest {
            model: self.model.clone(),
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        self.adapter.create_chat_completion(&request).await
    }
}

impl fmt::Debug for ModelClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

/// Lazily populated map from credential to client
pub struct ClientFactory {
    connector: Arc<dyn Connector>,
    config: LLMConfig,
    clients: HashMap<String, Arc<ModelClient>>,
}

impl ClientFactory {
    pub fn new(connector: Arc<dyn Connector>, config: LLMConfig) -> Self {
        Self {
            connector,
            config,
            clients: HashMap::new(),
        }
    }

    /// Return the cached client for this credential, connecting on first use.
    /// Failed connections are not cached.
    pub async fn get_client(&mut self, credential: &Credential) -> AppResult<Arc<ModelClient>> {
        let key = credential.fingerprint();
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        let adapter = match self.connector.connect(credential).await {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!(key_hint = %credential.hint(), "Authentication failed: {}", e);
                return Err(match e {
                    AppError::Authentication(_) => e,
                    other => AppError::Authentication(other.to_string()),
                });
            }
        };

        info!(key_hint = %credential.hint(), model = %self.config.model, "Model client created");
        let client = Arc::new(ModelClient::new(adapter, &self.config));
        self.clients.insert(key, client.clone());
        Ok(client)
    }

    pub fn cached_clients(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted adapter: replies are popped in order, the last one repeats.
    pub struct ScriptedAdapter {
        replies: Mutex<Vec<AppResult<String>>>,
        pub requests: Mutex<Vec<LLMRequest>>,
    }

    impl ScriptedAdapter {
        pub fn new(replies: Vec<AppResult<String>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn replying(text: &str) -> Self {
            Self::new(vec![Ok(text.to_string())])
        }
    }

    fn clone_result(r: &AppResult<String>) -> AppResult<String> {
        match r {
            Ok(s) => Ok(s.clone()),
            Err(e) => Err(AppError::Query(e.to_string())),
        }
    }

    #[async_trait]
    impl LLMAdapter for ScriptedAdapter {
        async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
            self.requests.lock().unwrap().push(request.clone());
            let mut replies = self.replies.lock().unwrap();
            let reply = if replies.len() > 1 {
                replies.remove(0)
            } else {
                replies
                    .first()
                    .map(clone_result)
                    .unwrap_or_else(|| Ok(String::new()))
            };
            reply.map(|content| LLMResponse {
                content,
                finish_reason: Some("stop".to_string()),
                usage: None,
            })
        }

        async fn verify(&self) -> AppResult<()> {
            Ok(())
        }
    }

    /// Accepts every key except `rejected`, counting connections.
    pub struct CountingConnector {
        pub connects: AtomicUsize,
        pub rejected: Option<String>,
        pub adapter: Arc<ScriptedAdapter>,
    }

    impl CountingConnector {
        pub fn new(adapter: ScriptedAdapter) -> Self {
            Self {
                connects: AtomicUsize::new(0),
                rejected: None,
                adapter: Arc::new(adapter),
            }
        }

        pub fn rejecting(mut self, key: &str) -> Self {
            self.rejected = Some(key.to_string());
            self
        }

        pub fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(&self, credential: &Credential) -> AppResult<Arc<dyn LLMAdapter>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.rejected.as_deref() == Some(credential.expose()) {
                return Err(AppError::Authentication("invalid API key (401 Unauthorized)".to_string()));
            }
            Ok(self.adapter.clone())
        }
    }
}
