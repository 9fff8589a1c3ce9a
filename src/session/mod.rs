//! Per-session state machine
//!
//! A [`Session`] is what one browser tab sees: a credential, up to two uploaded
//! datasets, their merge and the question history. The four reachable phases
//! are modelled by [`SessionState`]; every transition is a method on
//! [`Session`] driven by one user action.

pub mod store;

pub use store::*;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::DataConfig;
use crate::dataset::{self, Dataset, FileFormat, MergeOutcome};
use crate::llm::{ClientFactory, Credential, ModelClient};
use crate::models::{DatasetView, MergeView, PreviewView, SessionView};
use crate::query::{Answer, QueryEngine};
use crate::types::{AppError, AppResult};

pub const NO_COMMON_COLUMNS_WARNING: &str = "No common columns found. Unable to merge datasets.";

/// Upload slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Primary,
    Secondary,
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Slot::Primary => write!(f, "primary"),
            Slot::Secondary => write!(f, "secondary"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedDataset {
    pub filename: String,
    pub dataset: Arc<Dataset>,
    pub loaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MergedDataset {
    pub dataset: Arc<Dataset>,
    pub keys: Vec<String>,
}

/// Phase tag reported to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    NoCredential,
    NoData,
    SingleDataset,
    MergedDataset,
}

#[derive(Debug, Default)]
pub enum SessionState {
    /// Nothing but the credential form is usable
    #[default]
    NoCredential,
    NoData {
        client: Arc<ModelClient>,
    },
    /// Questions go to `primary`. A `secondary` that failed to merge is kept
    /// alongside its warning.
    SingleDataset {
        client: Arc<ModelClient>,
        primary: LoadedDataset,
        secondary: Option<LoadedDataset>,
        warning: Option<String>,
    },
    /// Questions go to `merged`
    MergedDataset {
        client: Arc<ModelClient>,
        primary: LoadedDataset,
        secondary: LoadedDataset,
        merged: MergedDataset,
    },
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        match self {
            SessionState::NoCredential => SessionPhase::NoCredential,
            SessionState::NoData { .. } => SessionPhase::NoData,
            SessionState::SingleDataset { .. } => SessionPhase::SingleDataset,
            SessionState::MergedDataset { .. } => SessionPhase::MergedDataset,
        }
    }

    fn client(&self) -> Option<&Arc<ModelClient>> {
        match self {
            SessionState::NoCredential => None,
            SessionState::NoData { client }
            | SessionState::SingleDataset { client, .. }
            | SessionState::MergedDataset { client, .. } => Some(client),
        }
    }

    fn primary(&self) -> Option<&LoadedDataset> {
        match self {
            SessionState::SingleDataset { primary, .. } | SessionState::MergedDataset { primary, .. } => {
                Some(primary)
            }
            _ => None,
        }
    }

    fn secondary(&self) -> Option<&LoadedDataset> {
        match self {
            SessionState::SingleDataset { secondary, .. } => secondary.as_ref(),
            SessionState::MergedDataset { secondary, .. } => Some(secondary),
            _ => None,
        }
    }
}

pub struct Session {
    id: Uuid,
    created_at: DateTime<Utc>,
    factory: ClientFactory,
    credential: Option<Credential>,
    format: FileFormat,
    merge_keys: Option<Vec<String>>,
    state: SessionState,
    exchanges: Vec<Answer>,
    data_config: DataConfig,
}

impl Session {
    pub fn new(factory: ClientFactory, data_config: DataConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            factory,
            credential: None,
            format: FileFormat::default(),
            merge_keys: None,
            state: SessionState::NoCredential,
            exchanges: Vec::new(),
            data_config,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    pub fn exchanges(&self) -> &[Answer] {
        &self.exchanges
    }

    /// Save a credential and authenticate it. On any failure the session is
    /// left exactly as it was.
    pub async fn save_credential(&mut self, raw: &str) -> AppResult<()> {
        let credential = Credential::new(raw)?;
        let client = self.factory.get_client(&credential).await?;

        self.state = match std::mem::take(&mut self.state) {
            SessionState::NoCredential | SessionState::NoData { .. } => SessionState::NoData { client },
            SessionState::SingleDataset {
                primary,
                secondary,
                warning,
                ..
            } => SessionState::SingleDataset {
                client,
                primary,
                secondary,
                warning,
            },
            SessionState::MergedDataset {
                primary,
                secondary,
                merged,
                ..
            } => SessionState::MergedDataset {
                client,
                primary,
                secondary,
                merged,
            },
        };
        info!(session_id = %self.id, key_hint = %credential.hint(), "API Key Saved Successfully");
        self.credential = Some(credential);
        Ok(())
    }

    /// Switch the CSV/Excel toggle used for later uploads.
    pub fn set_format(&mut self, format: FileFormat) {
        self.format = format;
    }

    /// Load a file into `slot`. A failed load leaves every dataset untouched.
    pub fn upload(&mut self, slot: Slot, filename: &str, bytes: &[u8]) -> AppResult<()> {
        if self.state.client().is_none() {
            return Err(AppError::InvalidRequest("Enter API key to proceed".to_string()));
        }
        if slot == Slot::Secondary && self.state.primary().is_none() {
            return Err(AppError::InvalidRequest(
                "Upload the first file before the second".to_string(),
            ));
        }

        dataset::check_extension(filename)?;
        let data = dataset::load(bytes, self.format)?;
        info!(
            session_id = %self.id,
            slot = %slot,
            filename,
            rows = data.row_count(),
            columns = data.column_count(),
            "Dataset uploaded"
        );

        let loaded = LoadedDataset {
            filename: filename.to_string(),
            dataset: Arc::new(data),
            loaded_at: Utc::now(),
        };

        let (client, primary, secondary) = match (std::mem::take(&mut self.state), slot) {
            (SessionState::NoData { client }, Slot::Primary) => (client, loaded, None),
            (SessionState::SingleDataset { client, secondary, .. }, Slot::Primary) => {
                (client, loaded, secondary)
            }
            (SessionState::MergedDataset { client, secondary, .. }, Slot::Primary) => {
                (client, loaded, Some(secondary))
            }
            (SessionState::SingleDataset { client, primary, .. }, Slot::Secondary)
            | (SessionState::MergedDataset { client, primary, .. }, Slot::Secondary) => {
                (client, primary, Some(loaded))
            }
            (state, _) => {
                // guarded above
                self.state = state;
                return Err(AppError::Internal("upload in unexpected session state".to_string()));
            }
        };
        self.settle(client, primary, secondary);
        Ok(())
    }

    /// Drop the dataset in `slot`. Removing the primary clears both.
    pub fn remove(&mut self, slot: Slot) -> AppResult<()> {
        let client = match self.state.client() {
            Some(client) => client.clone(),
            None => return Err(AppError::InvalidRequest("Enter API key to proceed".to_string())),
        };
        match (std::mem::take(&mut self.state), slot) {
            (SessionState::SingleDataset { .. } | SessionState::MergedDataset { .. }, Slot::Primary) => {
                self.state = SessionState::NoData { client };
            }
            (SessionState::SingleDataset { primary, .. }, Slot::Secondary)
            | (SessionState::MergedDataset { primary, .. }, Slot::Secondary) => {
                self.state = SessionState::SingleDataset {
                    client,
                    primary,
                    secondary: None,
                    warning: None,
                };
            }
            (state, _) => self.state = state,
        }
        info!(session_id = %self.id, slot = %slot, "Dataset removed");
        Ok(())
    }

    /// Choose which shared columns join the datasets; `None` restores the
    /// default of every shared column.
    pub fn set_merge_keys(&mut self, keys: Option<Vec<String>>) -> AppResult<()> {
        if let (Some(keys), Some(primary), Some(secondary)) =
            (&keys, self.state.primary(), self.state.secondary())
        {
            dataset::merge_on(&primary.dataset, &secondary.dataset, keys)?;
        }
        self.merge_keys = keys;

        let state = std::mem::take(&mut self.state);
        match state {
            SessionState::SingleDataset {
                client,
                primary,
                secondary: Some(secondary),
                ..
            }
            | SessionState::MergedDataset {
                client,
                primary,
                secondary,
                ..
            } => self.settle(client, primary, Some(secondary)),
            other => self.state = other,
        }
        Ok(())
    }

    /// Recompute the merge and land in Single or Merged.
    fn settle(&mut self, client: Arc<ModelClient>, primary: LoadedDataset, secondary: Option<LoadedDataset>) {
        let Some(secondary) = secondary else {
            self.state = SessionState::SingleDataset {
                client,
                primary,
                secondary: None,
                warning: None,
            };
            return;
        };

        let outcome = match self.merge_keys.clone() {
            Some(keys) => match dataset::merge_on(&primary.dataset, &secondary.dataset, &keys) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(session_id = %self.id, "Ignoring saved merge keys: {}", e);
                    self.merge_keys = None;
                    dataset::merge(&primary.dataset, &secondary.dataset)
                }
            },
            None => dataset::merge(&primary.dataset, &secondary.dataset),
        };

        self.state = match outcome {
            MergeOutcome::Merged { dataset, keys } => {
                info!(
                    session_id = %self.id,
                    keys = ?keys,
                    rows = dataset.row_count(),
                    columns = dataset.column_count(),
                    "Datasets merged"
                );
                SessionState::MergedDataset {
                    client,
                    primary,
                    secondary,
                    merged: MergedDataset {
                        dataset: Arc::new(dataset),
                        keys,
                    },
                }
            }
            MergeOutcome::NoCommonColumns => {
                warn!(session_id = %self.id, "{}", NO_COMMON_COLUMNS_WARNING);
                SessionState::SingleDataset {
                    client,
                    primary,
                    secondary: Some(secondary),
                    warning: Some(NO_COMMON_COLUMNS_WARNING.to_string()),
                }
            }
        };
    }

    /// The binding questions are answered against: merged beats primary.
    pub fn active_engine(&self) -> AppResult<QueryEngine> {
        let max_rows = self.data_config.max_prompt_rows;
        match &self.state {
            SessionState::NoCredential => {
                Err(AppError::InvalidRequest("Enter API key to proceed".to_string()))
            }
            SessionState::NoData { .. } => {
                Err(AppError::InvalidRequest("Upload a data file first".to_string()))
            }
            SessionState::SingleDataset { client, primary, .. } => Ok(QueryEngine::new(
                primary.dataset.clone(),
                client.clone(),
                max_rows,
            )),
            SessionState::MergedDataset { client, merged, .. } => Ok(QueryEngine::new(
                merged.dataset.clone(),
                client.clone(),
                max_rows,
            )),
        }
    }

    pub async fn ask(&mut self, question: &str) -> AppResult<Answer> {
        let engine = self.active_engine()?;
        let answer = engine.ask(question).await?;
        self.exchanges.push(answer.clone());
        Ok(answer)
    }

    pub fn view(&self) -> SessionView {
        let preview_rows = self.data_config.preview_rows;
        let dataset_view = |loaded: &LoadedDataset| DatasetView {
            filename: loaded.filename.clone(),
            loaded_at: loaded.loaded_at,
            summary: loaded.dataset.summary(),
            preview: PreviewView::of(&loaded.dataset, preview_rows),
        };

        let (merge, active_dataset) = match &self.state {
            SessionState::NoCredential | SessionState::NoData { .. } => (None, None),
            SessionState::SingleDataset { warning, .. } => (
                warning.as_ref().map(|w| MergeView::NoCommonColumns { warning: w.clone() }),
                Some(Slot::Primary.to_string()),
            ),
            SessionState::MergedDataset { merged, .. } => (
                Some(MergeView::Merged {
                    keys: merged.keys.clone(),
                    summary: merged.dataset.summary(),
                    preview: PreviewView::of(&merged.dataset, preview_rows),
                }),
                Some("merged".to_string()),
            ),
        };

        SessionView {
            session_id: self.id,
            created_at: self.created_at,
            state: self.phase(),
            credential_hint: self.credential.as_ref().map(Credential::hint),
            model: self.state.client().map(|c| c.model().to_string()),
            format: self.format,
            merge_keys: self.merge_keys.clone(),
            primary: self.state.primary().map(dataset_view),
            secondary: self.state.secondary().map(dataset_view),
            merge,
            active_dataset,
            exchanges: self.exchanges.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LLMConfig;
    use crate::dataset::Value;
    use crate::llm::client::testing::{CountingConnector, ScriptedAdapter};

    fn session_with(connector: Arc<CountingConnector>) -> Session {
        let factory = ClientFactory::new(connector, LLMConfig::default());
        Session::new(factory, DataConfig::default())
    }

    fn session() -> (Session, Arc<CountingConnector>) {
        let connector = Arc::new(
            CountingConnector::new(ScriptedAdapter::replying("The answer")).rejecting("sk-bad"),
        );
        (session_with(connector.clone()), connector)
    }

    async fn authenticated() -> (Session, Arc<CountingConnector>) {
        let (mut session, connector) = session();
        session.save_credential("sk-test").await.unwrap();
        (session, connector)
    }

    const JAN: &[u8] = b"id,amount\n1,100\n2,200\n3,300\n";
    const FEB: &[u8] = b"id,amount\n2,200\n3,310\n";

    #[tokio::test]
    async fn test_empty_credential_constructs_nothing() {
        let (mut session, connector) = session();
        let err = session.save_credential("").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
        assert_eq!(connector.connects(), 0);
        assert_eq!(session.phase(), SessionPhase::NoCredential);

        assert!(session.upload(Slot::Primary, "sales_jan.csv", JAN).is_err());
        assert!(matches!(session.ask("anything").await, Err(AppError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_rejected_credential_keeps_state() {
        let (mut session, _) = session();
        let err = session.save_credential("sk-bad").await.unwrap_err();
        assert!(matches!(err, AppError::Authentication(_)));
        assert_eq!(session.phase(), SessionPhase::NoCredential);
        assert!(session.view().credential_hint.is_none());
    }

    #[tokio::test]
    async fn test_resaving_same_credential_reuses_client() {
        let (mut session, connector) = authenticated().await;
        session.save_credential("sk-test").await.unwrap();
        assert_eq!(connector.connects(), 1);
        assert_eq!(session.phase(), SessionPhase::NoData);
    }

    #[tokio::test]
    async fn test_single_dataset_flow() {
        let (mut session, _) = authenticated().await;
        session.upload(Slot::Primary, "sales_jan.csv", JAN).unwrap();
        assert_eq!(session.phase(), SessionPhase::SingleDataset);

        let view = session.view();
        let primary = view.primary.unwrap();
        assert_eq!(primary.summary.rows, 3);
        assert_eq!(primary.summary.columns, 2);
        assert_eq!(primary.preview.rows.len(), 3);
        assert_eq!(view.active_dataset.as_deref(), Some("primary"));

        let answer = session.ask("total?").await.unwrap();
        assert_eq!(answer.text, "The answer");
        assert_eq!(session.exchanges().len(), 1);
    }

    #[tokio::test]
    async fn test_second_file_merges_on_common_columns() {
        let (mut session, _) = authenticated().await;
        session.upload(Slot::Primary, "sales_jan.csv", JAN).unwrap();
        session.upload(Slot::Secondary, "sales_feb.csv", FEB).unwrap();
        assert_eq!(session.phase(), SessionPhase::MergedDataset);

        let engine = session.active_engine().unwrap();
        let merged = engine.dataset();
        let names: Vec<&str> = merged.column_names().collect();
        assert_eq!(names, vec!["id", "amount"]);
        // only (2, 200) appears in both files
        assert_eq!(merged.row_count(), 1);
        assert_eq!(merged.rows()[0], vec![Value::Int(2), Value::Int(200)]);

        let view = session.view();
        assert_eq!(view.active_dataset.as_deref(), Some("merged"));
        assert!(matches!(view.merge, Some(MergeView::Merged { .. })));
    }

    #[tokio::test]
    async fn test_merge_keys_subset() {
        let (mut session, _) = authenticated().await;
        session.upload(Slot::Primary, "sales_jan.csv", JAN).unwrap();
        session.upload(Slot::Secondary, "sales_feb.csv", FEB).unwrap();
        session.set_merge_keys(Some(vec!["id".to_string()])).unwrap();

        let engine = session.active_engine().unwrap();
        let names: Vec<&str> = engine.dataset().column_names().collect();
        assert_eq!(names, vec!["id", "amount_x", "amount_y"]);
        assert_eq!(engine.dataset().row_count(), 2);

        assert!(session.set_merge_keys(Some(vec!["nope".to_string()])).is_err());
        assert_eq!(session.view().merge_keys, Some(vec!["id".to_string()]));

        session.set_merge_keys(None).unwrap();
        assert_eq!(session.active_engine().unwrap().dataset().row_count(), 1);
    }

    #[tokio::test]
    async fn test_disjoint_files_warn_and_stay_on_first() {
        let (mut session, _) = authenticated().await;
        session.upload(Slot::Primary, "sales_jan.csv", JAN).unwrap();
        session
            .upload(Slot::Secondary, "cities.csv", b"city,country\nOslo,NO\n")
            .unwrap();

        assert_eq!(session.phase(), SessionPhase::SingleDataset);
        let view = session.view();
        match view.merge {
            Some(MergeView::NoCommonColumns { warning }) => assert_eq!(warning, NO_COMMON_COLUMNS_WARNING),
            other => panic!("expected warning, got {:?}", other),
        }
        assert!(view.secondary.is_some());
        let engine = session.active_engine().unwrap();
        assert_eq!(engine.dataset().column_count(), 2);
        assert_eq!(engine.dataset().row_count(), 3);
    }

    #[tokio::test]
    async fn test_failed_load_leaves_datasets_untouched() {
        let (mut session, _) = authenticated().await;
        session.upload(Slot::Primary, "sales_jan.csv", JAN).unwrap();
        session.upload(Slot::Secondary, "sales_feb.csv", FEB).unwrap();

        let err = session
            .upload(Slot::Primary, "broken.csv", b"id,amount\n1,2,3\n")
            .unwrap_err();
        assert!(matches!(err, AppError::Load(_)));
        assert!(matches!(
            session.upload(Slot::Secondary, "notes.txt", b"hello"),
            Err(AppError::Load(_))
        ));

        assert_eq!(session.phase(), SessionPhase::MergedDataset);
        assert_eq!(session.view().primary.unwrap().filename, "sales_jan.csv");
    }

    #[tokio::test]
    async fn test_secondary_requires_primary() {
        let (mut session, _) = authenticated().await;
        let err = session.upload(Slot::Secondary, "sales_feb.csv", FEB).unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
        assert_eq!(session.phase(), SessionPhase::NoData);
    }

    #[tokio::test]
    async fn test_replacing_primary_remerges() {
        let (mut session, _) = authenticated().await;
        session.upload(Slot::Primary, "sales_jan.csv", JAN).unwrap();
        session.upload(Slot::Secondary, "sales_feb.csv", FEB).unwrap();
        session
            .upload(Slot::Primary, "other.csv", b"sku\nA\n")
            .unwrap();
        assert_eq!(session.phase(), SessionPhase::SingleDataset);
        assert!(matches!(session.view().merge, Some(MergeView::NoCommonColumns { .. })));
    }

    #[tokio::test]
    async fn test_remove_datasets() {
        let (mut session, _) = authenticated().await;
        session.upload(Slot::Primary, "sales_jan.csv", JAN).unwrap();
        session.upload(Slot::Secondary, "sales_feb.csv", FEB).unwrap();

        session.remove(Slot::Secondary).unwrap();
        assert_eq!(session.phase(), SessionPhase::SingleDataset);
        assert!(session.view().merge.is_none());

        session.remove(Slot::Primary).unwrap();
        assert_eq!(session.phase(), SessionPhase::NoData);
    }

    #[tokio::test]
    async fn test_new_credential_keeps_datasets() {
        let (mut session, connector) = authenticated().await;
        session.upload(Slot::Primary, "sales_jan.csv", JAN).unwrap();
        session.save_credential("sk-other").await.unwrap();
        assert_eq!(session.phase(), SessionPhase::SingleDataset);
        assert_eq!(connector.connects(), 2);
        assert_eq!(session.view().credential_hint.as_deref(), Some("••••ther"));
    }

    #[tokio::test]
    async fn test_query_error_is_isolated() {
        let connector = Arc::new(CountingConnector::new(ScriptedAdapter::new(vec![
            Err(AppError::Query("API error (500 Internal Server Error)".to_string())),
            Ok("second try".to_string()),
        ])));
        let mut session = session_with(connector);
        session.save_credential("sk-test").await.unwrap();
        session.upload(Slot::Primary, "sales_jan.csv", JAN).unwrap();

        assert!(matches!(session.ask("q1").await, Err(AppError::Query(_))));
        assert_eq!(session.phase(), SessionPhase::SingleDataset);
        assert_eq!(session.ask("q2").await.unwrap().text, "second try");
        assert_eq!(session.exchanges().len(), 1);
    }

    #[tokio::test]
    async fn test_excel_toggle_applies_to_uploads() {
        let (mut session, _) = authenticated().await;
        session.set_format(FileFormat::Excel);
        let err = session.upload(Slot::Primary, "sales_jan.csv", JAN).unwrap_err();
        assert!(matches!(err, AppError::Load(_)));
        assert_eq!(session.phase(), SessionPhase::NoData);
    }
}
