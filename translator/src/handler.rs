use crate::history::{HistoryError, HistoryStore, RowKeyGenerator, TranslationRecord};
use crate::metrics_defs::{HISTORY_WRITE_FAILURE, HISTORY_WRITE_SUCCESS};
use crate::provider::{ProviderError, TranslationProvider, translate_text};
use chrono::Utc;
use serde_json::Value;
use shared::counter;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum TranslateError {
    #[error("Invalid JSON body.")]
    InvalidJson,

    #[error("Please pass 'text' in the request body.")]
    MissingText,

    #[error(
        "Authentication Error: The Translator API key is likely invalid or expired. Please check your Azure configuration."
    )]
    Unauthorized(#[source] ProviderError),

    #[error("Error: {0}")]
    Upstream(#[source] ProviderError),
}

impl From<ProviderError> for TranslateError {
    fn from(err: ProviderError) -> Self {
        if err.is_auth_failure() {
            TranslateError::Unauthorized(err)
        } else {
            TranslateError::Upstream(err)
        }
    }
}

/// Extracts the `text` field from a JSON request body.
///
/// The body must be a JSON object. A missing, empty or non-string `text` is
/// reported separately from a body that does not parse.
pub fn text_from_body(body: &[u8]) -> Result<String, TranslateError> {
    let value: Value = serde_json::from_slice(body).map_err(|_| TranslateError::InvalidJson)?;
    let object = value.as_object().ok_or(TranslateError::InvalidJson)?;

    match object.get("text") {
        Some(Value::String(text)) if !text.is_empty() => Ok(text.clone()),
        _ => Err(TranslateError::MissingText),
    }
}

/// Writes translation records to a history store under one partition.
pub struct HistoryWriter {
    store: Arc<dyn HistoryStore>,
    partition_key: String,
    row_keys: RowKeyGenerator,
}

impl HistoryWriter {
    pub fn new(store: Arc<dyn HistoryStore>, partition_key: String) -> Self {
        HistoryWriter {
            store,
            partition_key,
            row_keys: RowKeyGenerator::new(),
        }
    }

    async fn write(&self, original: &str, translated: &str) -> Result<(), HistoryError> {
        self.store.ensure_table().await?;

        let now = Utc::now();
        let record = TranslationRecord::new(
            self.partition_key.as_str(),
            self.row_keys.next_key(now),
            original,
            translated,
            now,
        );
        self.store.insert(&record).await
    }

    /// Persists one pair. Failures are logged and dropped.
    pub async fn record(&self, original: &str, translated: &str) {
        match self.write(original, translated).await {
            Ok(()) => {
                counter!(HISTORY_WRITE_SUCCESS).increment(1);
                tracing::info!("saved translation history");
            }
            Err(e) => {
                counter!(HISTORY_WRITE_FAILURE).increment(1);
                tracing::error!(error = %e, "failed to save translation history");
            }
        }
    }
}

/// Translates Japanese text to English and records the pair when a history
/// writer is configured.
#[derive(Clone)]
pub struct TranslateHandler {
    provider: Arc<dyn TranslationProvider>,
    history: Option<Arc<HistoryWriter>>,
}

impl TranslateHandler {
    pub fn new(provider: Arc<dyn TranslationProvider>, history: Option<HistoryWriter>) -> Self {
        TranslateHandler {
            provider,
            history: history.map(Arc::new),
        }
    }

    pub async fn translate(&self, text: &str) -> Result<String, TranslateError> {
        let translated = translate_text(self.provider.as_ref(), text)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "translation failed"))?;

        if let Some(history) = &self.history {
            history.record(text, &translated).await;
        }

        Ok(translated)
    }
}
