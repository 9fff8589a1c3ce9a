//! Natural-language questions against a dataset
//!
//! A [`QueryEngine`] binds one dataset to one model client. Each call to
//! [`QueryEngine::ask`] sends a single non-streaming completion carrying the
//! dataset's schema, a column profile and the rows as CSV.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::dataset::Dataset;
use crate::llm::ModelClient;
use crate::types::{AppError, AppResult, LLMMessage, TokenUsage};

const SYSTEM_PROMPT: &str = "You are a mid-senior level data analyst. \
Answer the user's question using only the dataset provided below. \
Compute figures exactly from the data; if the question cannot be answered \
from the data, say so plainly. Prefer short answers; use a markdown table \
when the answer is tabular.";

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub question: String,
    pub text: String,
    /// Reasoning trace emitted by reasoning models, split from the answer
    pub reasoning: Option<String>,
    pub elapsed_secs: f64,
    pub model: String,
    pub usage: Option<TokenUsage>,
    pub asked_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct QueryEngine {
    dataset: Arc<Dataset>,
    client: Arc<ModelClient>,
    max_prompt_rows: usize,
}

impl QueryEngine {
    pub fn new(dataset: Arc<Dataset>, client: Arc<ModelClient>, max_prompt_rows: usize) -> Self {
        Self {
            dataset,
            client,
            max_prompt_rows,
        }
    }

    pub fn dataset(&self) -> &Arc<Dataset> {
        &self.dataset
    }

    pub fn client(&self) -> &Arc<ModelClient> {
        &self.client
    }

    /// Ask one question. Failures are returned as `AppError::Query`, never retried.
    pub async fn ask(&self, question: &str) -> AppResult<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::InvalidRequest("Please enter a question".to_string()));
        }

        let messages = vec![
            LLMMessage::system(self.build_context()?),
            LLMMessage::user(question),
        ];

        let started = Instant::now();
        let result = self.client.complete(messages).await;
        let elapsed = started.elapsed();

        let response = result.map_err(|e| {
            warn!(elapsed_ms = elapsed.as_millis() as u64, "Query failed: {}", e);
            match e {
                AppError::Query(_) => e,
                other => AppError::Query(other.to_string()),
            }
        })?;

        let (text, reasoning) = split_reasoning(&response.content);
        info!(
            elapsed_ms = elapsed.as_millis() as u64,
            model = %self.client.model(),
            "Query processed"
        );

        Ok(Answer {
            question: question.to_string(),
            text,
            reasoning,
            elapsed_secs: elapsed.as_secs_f64(),
            model: self.client.model().to_string(),
            usage: response.usage,
            asked_at: Utc::now(),
        })
    }

    fn build_context(&self) -> AppResult<String> {
        let data = &self.dataset;
        let mut out = String::from(SYSTEM_PROMPT);
        let (rows, cols) = data.shape();

        // writing into a String cannot fail
        let _ = write!(out, "\n\nThe dataset has {} rows and {} columns.\n\nColumns:\n", rows, cols);
        for p in data.profile() {
            let _ = write!(out, "- {} ({}, {} non-null", p.name, p.dtype, p.non_null);
            if let (Some(min), Some(max), Some(mean)) = (p.min, p.max, p.mean) {
                let _ = write!(out, ", min {}, max {}, mean {:.4}", min, max, mean);
            }
            out.push_str(")\n");
        }

        let csv = data
            .to_csv(self.max_prompt_rows)
            .map_err(|e| AppError::Internal(format!("failed to render dataset: {}", e)))?;
        if rows > self.max_prompt_rows {
            let _ = write!(
                out,
                "\nOnly the first {} of {} rows are included below; the column statistics above cover every row.\n",
                self.max_prompt_rows, rows
            );
        }
        out.push_str("\nData (CSV):\n");
        out.push_str(&csv);
        Ok(out)
    }
}

/// Separate a leading `<think>...</think>` block from the answer text.
pub fn split_reasoning(content: &str) -> (String, Option<String>) {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";

    let trimmed = content.trim_start();
    let body = trimmed.strip_prefix(OPEN).unwrap_or(trimmed);
    match body.find(CLOSE) {
        Some(end) => {
            let reasoning = body[..end].trim();
            let answer = body[end + CLOSE.len()..].trim().to_string();
            let reasoning = (!reasoning.is_empty()).then(|| reasoning.to_string());
            (answer, reasoning)
        }
        None => (content.trim().to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LLMConfig;
    use crate::dataset::{load, FileFormat};
    use crate::llm::client::testing::ScriptedAdapter;

    fn engine(adapter: Arc<ScriptedAdapter>, csv: &str, max_rows: usize) -> QueryEngine {
        let dataset = Arc::new(load(csv.as_bytes(), FileFormat::Csv).unwrap());
        let client = Arc::new(ModelClient::new(adapter, &LLMConfig::default()));
        QueryEngine::new(dataset, client, max_rows)
    }

    #[test]
    fn test_split_reasoning() {
        let (text, reasoning) = split_reasoning("<think>\nsum the column\n</think>\n\nThe total is 60.");
        assert_eq!(text, "The total is 60.");
        assert_eq!(reasoning.as_deref(), Some("sum the column"));

        let (text, reasoning) = split_reasoning("  plain answer ");
        assert_eq!(text, "plain answer");
        assert!(reasoning.is_none());

        // some endpoints drop the opening tag
        let (text, reasoning) = split_reasoning("thinking...</think>42");
        assert_eq!(text, "42");
        assert_eq!(reasoning.as_deref(), Some("thinking..."));
    }

    #[tokio::test]
    async fn test_ask_sends_dataset_and_question() {
        let adapter = Arc::new(ScriptedAdapter::replying("<think>easy</think>The total is 60."));
        let engine = engine(adapter.clone(), "id,amount\n1,10\n2,20\n3,30\n", 500);

        let answer = engine.ask("What is the total amount?").await.unwrap();
        assert_eq!(answer.text, "The total is 60.");
        assert_eq!(answer.reasoning.as_deref(), Some("easy"));
        assert_eq!(answer.model, "DeepSeek-R1-Distill-Llama-70B");
        assert!(answer.elapsed_secs >= 0.0);

        let requests = adapter.requests.lock().unwrap();
        let messages = &requests[0].messages;
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("3 rows and 2 columns"));
        assert!(messages[0].content.contains("- amount (int64, 3 non-null, min 10, max 30, mean 20.0000)"));
        assert!(messages[0].content.contains("id,amount\n1,10\n2,20\n3,30\n"));
        assert_eq!(messages[1], LLMMessage::user("What is the total amount?"));
    }

    #[tokio::test]
    async fn test_large_dataset_is_truncated_in_prompt() {
        let adapter = Arc::new(ScriptedAdapter::replying("ok"));
        let engine = engine(adapter.clone(), "n\n1\n2\n3\n4\n", 2);

        engine.ask("how many rows?").await.unwrap();
        let requests = adapter.requests.lock().unwrap();
        let context = &requests[0].messages[0].content;
        assert!(context.contains("Only the first 2 of 4 rows"));
        assert!(context.ends_with("n\n1\n2\n"));
    }

    #[tokio::test]
    async fn test_empty_question_is_rejected_without_a_call() {
        let adapter = Arc::new(ScriptedAdapter::replying("ok"));
        let engine = engine(adapter.clone(), "a\n1\n", 10);

        assert!(matches!(engine.ask("   ").await, Err(AppError::InvalidRequest(_))));
        assert!(adapter.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_a_query_error_and_engine_stays_usable() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![
            Err(AppError::Query("API error (503 Service Unavailable)".to_string())),
            Ok("recovered".to_string()),
        ]));
        let engine = engine(adapter.clone(), "a\n1\n", 10);

        let err = engine.ask("first").await.unwrap_err();
        assert!(matches!(err, AppError::Query(msg) if msg.contains("503")));

        let answer = engine.ask("second").await.unwrap();
        assert_eq!(answer.text, "recovered");
        assert_eq!(adapter.requests.lock().unwrap().len(), 2);
    }
}
