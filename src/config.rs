use anyhow::Result;
use serde::Deserialize;
use std::env;

pub const DEFAULT_LLM_BASE_URL: &str = "https://api.sambanova.ai/v1";
pub const DEFAULT_SESSION_TTL_SECS: u64 = 60 * 60;
pub const DEFAULT_LLM_MODEL: &str = "DeepSeek-R1-Distill-Llama-70B";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LLMConfig,
    pub data: DataConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub cors_allowed_origins: Vec<String>,
    /// Sessions idle this long are dropped along with their datasets
    pub session_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LLMConfig {
    pub base_url: String,
    pub model: String,
    /// Probe `GET {base_url}/models` before accepting a credential
    pub verify_credentials: bool,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    pub max_upload_bytes: usize,
    pub preview_rows: usize,
    pub max_prompt_rows: usize,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            verify_credentials: true,
            temperature: None,
            max_tokens: None,
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 200 * 1024 * 1024,
            preview_rows: 5,
            max_prompt_rows: 500,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                port: 8501,
                host: "0.0.0.0".to_string(),
                cors_allowed_origins: Vec::new(),
                session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            },
            llm: LLMConfig::default(),
            data: DataConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let data_defaults = DataConfig::default();

        Ok(Self {
            server: ServerConfig {
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8501".to_string())
                    .parse()?,
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                cors_allowed_origins: env::var("ALLOWED_ORIGINS")
                    .unwrap_or_default()
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                session_ttl_secs: env::var("SESSION_TTL_SECS")
                    .map(|v| v.parse())
                    .unwrap_or(Ok(DEFAULT_SESSION_TTL_SECS))?,
            },
            llm: LLMConfig {
                base_url: env::var("LLM_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_LLM_BASE_URL.to_string())
                    .trim_end_matches('/')
                    .to_string(),
                model: env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_LLM_MODEL.to_string()),
                verify_credentials: env::var("LLM_VERIFY_CREDENTIALS")
                    .unwrap_or_else(|_| "true".to_string())
                    .parse()?,
                temperature: env::var("LLM_TEMPERATURE").ok().map(|v| v.parse()).transpose()?,
                max_tokens: env::var("LLM_MAX_TOKENS").ok().map(|v| v.parse()).transpose()?,
            },
            data: DataConfig {
                max_upload_bytes: env::var("MAX_UPLOAD_BYTES")
                    .map(|v| v.parse())
                    .unwrap_or(Ok(data_defaults.max_upload_bytes))?,
                preview_rows: env::var("PREVIEW_ROWS")
                    .map(|v| v.parse())
                    .unwrap_or(Ok(data_defaults.preview_rows))?,
                max_prompt_rows: env::var("MAX_PROMPT_ROWS")
                    .map(|v| v.parse())
                    .unwrap_or(Ok(data_defaults.max_prompt_rows))?,
            },
        })
    }
}
