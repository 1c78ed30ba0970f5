use crate::history::{HistoryError, HistoryStore, TranslationRecord};
use crate::provider::{
    ProviderError, TranslateItem, Translation, TranslationProvider, TranslationResult,
};
use async_trait::async_trait;
use axum::Router;
use parking_lot::Mutex;
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Serves `router` on an ephemeral local port and returns its address.
pub async fn spawn_router(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to address");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    addr
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCall {
    pub texts: Vec<String>,
    pub from: String,
    pub to: String,
}

/// Provider returning a canned translation or a canned error message.
pub struct FakeProvider {
    result: Result<String, (Option<u16>, String)>,
    pub calls: Mutex<Vec<ProviderCall>>,
}

impl FakeProvider {
    pub fn returning(text: &str) -> Self {
        FakeProvider {
            result: Ok(text.into()),
            calls: Mutex::new(vec![]),
        }
    }

    pub fn failing(status: Option<u16>, message: &str) -> Self {
        FakeProvider {
            result: Err((status, message.into())),
            calls: Mutex::new(vec![]),
        }
    }
}

#[async_trait]
impl TranslationProvider for FakeProvider {
    async fn translate(
        &self,
        items: &[TranslateItem],
        from: &str,
        to: &str,
    ) -> Result<Vec<TranslationResult>, ProviderError> {
        self.calls.lock().push(ProviderCall {
            texts: items.iter().map(|i| i.text.clone()).collect(),
            from: from.into(),
            to: to.into(),
        });

        match &self.result {
            Ok(text) => Ok(vec![TranslationResult {
                translations: vec![Translation { text: text.clone() }],
            }]),
            Err((status, message)) => Err(ProviderError::Api {
                status: *status,
                code: None,
                message: message.clone(),
            }),
        }
    }
}

/// History store that counts calls and can be told to fail either step.
#[derive(Default)]
pub struct RecordingStore {
    pub fail_ensure: Option<String>,
    pub fail_insert: Option<String>,
    pub ensure_calls: Mutex<usize>,
    pub inserted: Mutex<Vec<TranslationRecord>>,
}

#[async_trait]
impl HistoryStore for RecordingStore {
    async fn ensure_table(&self) -> Result<(), HistoryError> {
        *self.ensure_calls.lock() += 1;
        match &self.fail_ensure {
            Some(message) => Err(HistoryError::Other(message.clone())),
            None => Ok(()),
        }
    }

    async fn insert(&self, record: &TranslationRecord) -> Result<(), HistoryError> {
        self.inserted.lock().push(record.clone());
        match &self.fail_insert {
            Some(message) => Err(HistoryError::Other(message.clone())),
            None => Ok(()),
        }
    }
}
