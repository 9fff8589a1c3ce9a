use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::dataset::{Dataset, DatasetSummary, FileFormat, Value};
use crate::llm::{ClientFactory, Connector};
use crate::query::Answer;
use crate::session::{Session, SessionPhase, SessionStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub sessions: SessionStore,
    pub connector: Arc<dyn Connector>,
}

impl AppState {
    pub fn new(config: Config, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            sessions: SessionStore::default(),
            connector,
        }
    }

    /// A fresh session with its own client cache
    pub fn new_session(&self) -> Session {
        let factory = ClientFactory::new(self.connector.clone(), self.config.llm.clone());
        Session::new(factory, self.config.data.clone())
    }
}

// Requests

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialRequest {
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FormatRequest {
    pub format: FileFormat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeKeysRequest {
    /// `null` restores the default join on every shared column
    pub keys: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

// Responses

#[derive(Debug, Clone, Serialize)]
pub struct ActionResponse {
    pub message: String,
    pub session: SessionView,
}

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub answer: Answer,
    pub message: String,
    pub session: SessionView,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub state: SessionPhase,
    pub credential_hint: Option<String>,
    pub model: Option<String>,
    pub format: FileFormat,
    pub merge_keys: Option<Vec<String>>,
    pub primary: Option<DatasetView>,
    pub secondary: Option<DatasetView>,
    pub merge: Option<MergeView>,
    /// `primary` or `merged`, whichever questions are answered against
    pub active_dataset: Option<String>,
    pub exchanges: Vec<Answer>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetView {
    pub filename: String,
    pub loaded_at: DateTime<Utc>,
    pub summary: DatasetSummary,
    pub preview: PreviewView,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MergeView {
    Merged {
        keys: Vec<String>,
        summary: DatasetSummary,
        preview: PreviewView,
    },
    NoCommonColumns {
        warning: String,
    },
}

/// First rows of a dataset for display
#[derive(Debug, Clone, Serialize)]
pub struct PreviewView {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl PreviewView {
    pub fn of(dataset: &Dataset, rows: usize) -> Self {
        Self {
            columns: dataset.column_names().map(str::to_string).collect(),
            rows: dataset.head(rows).to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub sessions: usize,
}
