//! Azure Table Storage client authorised with Shared Key Lite.
use crate::history::{HistoryError, HistoryStore, TranslationRecord};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use serde_json::json;
use sha2::Sha256;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

const STORAGE_API_VERSION: &str = "2019-02-02";
const ACCEPT_NO_METADATA: &str = "application/json;odata=nometadata";

// Well-known credentials of the local storage emulator.
const DEV_ACCOUNT_NAME: &str = "devstoreaccount1";
const DEV_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_TABLE_ENDPOINT: &str = "http://127.0.0.1:10002/devstoreaccount1";

/// Account name, key and table endpoint extracted from a connection string.
#[derive(Clone, Debug, PartialEq)]
pub struct StorageAccount {
    pub name: String,
    key: Vec<u8>,
    pub table_endpoint: Url,
}

impl StorageAccount {
    pub fn from_connection_string(conn_str: &str) -> Result<Self, HistoryError> {
        let mut protocol = "https";
        let mut endpoint_suffix = "core.windows.net";
        let mut account_name = None;
        let mut account_key = None;
        let mut table_endpoint = None;

        for part in conn_str.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                HistoryError::InvalidConnectionString(format!("malformed segment {part:?}"))
            })?;

            match key {
                "UseDevelopmentStorage" if value.eq_ignore_ascii_case("true") => {
                    return StorageAccount::new(DEV_ACCOUNT_NAME, DEV_ACCOUNT_KEY, DEV_TABLE_ENDPOINT);
                }
                "DefaultEndpointsProtocol" => protocol = value,
                "EndpointSuffix" => endpoint_suffix = value,
                "AccountName" => account_name = Some(value),
                "AccountKey" => account_key = Some(value),
                "TableEndpoint" => table_endpoint = Some(value.to_string()),
                _ => {}
            }
        }

        let name = account_name
            .ok_or_else(|| HistoryError::InvalidConnectionString("missing AccountName".into()))?;
        let key = account_key
            .ok_or_else(|| HistoryError::InvalidConnectionString("missing AccountKey".into()))?;
        let endpoint = table_endpoint
            .unwrap_or_else(|| format!("{protocol}://{name}.table.{endpoint_suffix}"));

        StorageAccount::new(name, key, &endpoint)
    }

    fn new(name: &str, key: &str, endpoint: &str) -> Result<Self, HistoryError> {
        let key = STANDARD
            .decode(key)
            .map_err(|e| HistoryError::InvalidConnectionString(format!("AccountKey: {e}")))?;

        // Trailing slash so that joining a table name keeps any account path segment.
        let table_endpoint = Url::parse(&format!("{}/", endpoint.trim_end_matches('/')))
            .map_err(|e| HistoryError::InvalidConnectionString(format!("endpoint: {e}")))?;

        Ok(StorageAccount {
            name: name.to_string(),
            key,
            table_endpoint,
        })
    }

    /// Shared Key Lite signature for the table service:
    /// HMAC-SHA256 over `date + "\n" + "/" + account + path`.
    fn sign(&self, date: &str, url: &Url) -> String {
        let string_to_sign = format!("{date}\n/{}{}", self.name, url.path());
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC can take key of any size");
        mac.update(string_to_sign.as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }

    fn authorization(&self, date: &str, url: &Url) -> String {
        format!("SharedKeyLite {}:{}", self.name, self.sign(date, url))
    }
}

fn rfc1123(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub struct AzureTableStore {
    client: reqwest::Client,
    account: StorageAccount,
    table_name: String,
}

impl AzureTableStore {
    pub fn new(client: reqwest::Client, account: StorageAccount, table_name: String) -> Self {
        AzureTableStore {
            client,
            account,
            table_name,
        }
    }

    fn url(&self, path: &str) -> Result<Url, HistoryError> {
        self.account
            .table_endpoint
            .join(path)
            .map_err(|e| HistoryError::Other(format!("invalid table URL: {e}")))
    }

    async fn post_json(
        &self,
        url: Url,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, HistoryError> {
        let date = rfc1123(Utc::now());
        let authorization = self.account.authorization(&date, &url);

        let response = self
            .client
            .post(url)
            .header("x-ms-date", &date)
            .header("x-ms-version", STORAGE_API_VERSION)
            .header("Accept", ACCEPT_NO_METADATA)
            .header("DataServiceVersion", "3.0;NetFx")
            .header("Prefer", "return-no-content")
            .header("Authorization", authorization)
            .json(body)
            .send()
            .await?;

        Ok(response)
    }
}

async fn status_error(response: reqwest::Response) -> HistoryError {
    HistoryError::Status {
        status: response.status().as_u16(),
        body: response.text().await.unwrap_or_default(),
    }
}

#[async_trait]
impl HistoryStore for AzureTableStore {
    async fn ensure_table(&self) -> Result<(), HistoryError> {
        let url = self.url("Tables")?;
        let response = self
            .post_json(url, &json!({ "TableName": self.table_name }))
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::NO_CONTENT => {
                tracing::info!(table = %self.table_name, "created history table");
                Ok(())
            }
            // TableAlreadyExists
            StatusCode::CONFLICT => Ok(()),
            _ => Err(status_error(response).await),
        }
    }

    async fn insert(&self, record: &TranslationRecord) -> Result<(), HistoryError> {
        let url = self.url(&self.table_name)?;
        let body = serde_json::to_value(record)
            .map_err(|e| HistoryError::Other(format!("could not encode record: {e}")))?;
        let response = self.post_json(url, &body).await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::NO_CONTENT => Ok(()),
            _ => Err(status_error(response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::spawn_router;
    use axum::body::Bytes;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::post;
    use axum::{Json, Router};
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::Arc;

    const TEST_KEY: &str = "dGVzdC1hY2NvdW50LWtleQ==";

    #[test]
    fn test_parse_connection_string() {
        let account = StorageAccount::from_connection_string(&format!(
            "DefaultEndpointsProtocol=https;AccountName=myaccount;AccountKey={TEST_KEY};EndpointSuffix=core.windows.net"
        ))
        .unwrap();

        assert_eq!(account.name, "myaccount");
        assert_eq!(account.key, b"test-account-key");
        assert_eq!(
            account.table_endpoint.as_str(),
            "https://myaccount.table.core.windows.net/"
        );
    }

    #[test]
    fn test_parse_connection_string_with_table_endpoint() {
        let account = StorageAccount::from_connection_string(&format!(
            "AccountName=myaccount;AccountKey={TEST_KEY};TableEndpoint=http://localhost:9999/myaccount;"
        ))
        .unwrap();
        assert_eq!(
            account.table_endpoint.as_str(),
            "http://localhost:9999/myaccount/"
        );
    }

    #[test]
    fn test_parse_development_storage() {
        let account =
            StorageAccount::from_connection_string("UseDevelopmentStorage=true").unwrap();
        assert_eq!(account.name, DEV_ACCOUNT_NAME);
        assert_eq!(
            account.table_endpoint.as_str(),
            "http://127.0.0.1:10002/devstoreaccount1/"
        );
    }

    #[test]
    fn test_parse_invalid_connection_strings() {
        let key_only = format!("AccountKey={TEST_KEY}");
        for conn_str in [
            "AccountName=myaccount",
            key_only.as_str(),
            "AccountName=myaccount;AccountKey=not base64!",
            "garbage",
        ] {
            assert!(
                matches!(
                    StorageAccount::from_connection_string(conn_str),
                    Err(HistoryError::InvalidConnectionString(_))
                ),
                "{conn_str}"
            );
        }
    }

    #[test]
    fn test_shared_key_lite_signature() {
        let account = StorageAccount::from_connection_string(&format!(
            "AccountName=myaccount;AccountKey={TEST_KEY}"
        ))
        .unwrap();
        let date = rfc1123(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        assert_eq!(date, "Tue, 14 Nov 2023 22:13:20 GMT");

        let url = account.table_endpoint.join("Tables").unwrap();

        let mut mac = HmacSha256::new_from_slice(b"test-account-key").unwrap();
        mac.update(b"Tue, 14 Nov 2023 22:13:20 GMT\n/myaccount/Tables");
        let expected = STANDARD.encode(mac.finalize().into_bytes());

        assert_eq!(
            account.authorization(&date, &url),
            format!("SharedKeyLite myaccount:{expected}")
        );
    }

    #[derive(Clone, Default)]
    struct FakeTableService {
        tables: Arc<Mutex<Vec<String>>>,
        entities: Arc<Mutex<HashMap<String, Vec<Value>>>>,
    }

    fn check_auth(headers: &HeaderMap, path: &str) -> bool {
        let account = StorageAccount::from_connection_string(&format!(
            "AccountName=myaccount;AccountKey={TEST_KEY}"
        ))
        .unwrap();
        let date = headers.get("x-ms-date").unwrap().to_str().unwrap();
        let url = Url::parse(&format!("http://localhost{path}")).unwrap();
        headers.get("authorization").unwrap().to_str().unwrap()
            == account.authorization(date, &url)
    }

    fn fake_table_service(state: FakeTableService) -> Router {
        Router::new()
            .route(
                "/myaccount/Tables",
                post(
                    |State(state): State<FakeTableService>, headers: HeaderMap, body: Bytes| async move {
                        if !check_auth(&headers, "/myaccount/Tables") {
                            return AxumStatus::FORBIDDEN;
                        }
                        let body: Value = serde_json::from_slice(&body).unwrap();
                        let name = body["TableName"].as_str().unwrap().to_string();
                        let mut tables = state.tables.lock();
                        if tables.contains(&name) {
                            return AxumStatus::CONFLICT;
                        }
                        tables.push(name);
                        AxumStatus::NO_CONTENT
                    },
                ),
            )
            .route(
                "/myaccount/{table}",
                post(
                    |State(state): State<FakeTableService>,
                     Path(table): Path<String>,
                     headers: HeaderMap,
                     Json(entity): Json<Value>| async move {
                        if !check_auth(&headers, &format!("/myaccount/{table}")) {
                            return AxumStatus::FORBIDDEN;
                        }
                        if !state.tables.lock().contains(&table) {
                            return AxumStatus::NOT_FOUND;
                        }
                        state.entities.lock().entry(table).or_default().push(entity);
                        AxumStatus::NO_CONTENT
                    },
                ),
            )
            .with_state(state)
    }

    async fn store_for(state: FakeTableService, table_name: &str) -> AzureTableStore {
        let addr = spawn_router(fake_table_service(state)).await;
        let account = StorageAccount::from_connection_string(&format!(
            "AccountName=myaccount;AccountKey={TEST_KEY};TableEndpoint=http://{addr}/myaccount"
        ))
        .unwrap();
        AzureTableStore::new(reqwest::Client::new(), account, table_name.into())
    }

    #[tokio::test]
    async fn test_ensure_table_and_insert() {
        let state = FakeTableService::default();
        let store = store_for(state.clone(), "TranslationHistory").await;

        store.ensure_table().await.unwrap();
        // Second call hits the conflict path and is still a success.
        store.ensure_table().await.unwrap();
        assert_eq!(*state.tables.lock(), vec!["TranslationHistory".to_string()]);

        let record = TranslationRecord::new(
            "ja-en",
            "1700000000000000".into(),
            "こんにちは、世界！",
            "Hello, world!",
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        );
        store.insert(&record).await.unwrap();

        let entities = state.entities.lock();
        let stored = &entities["TranslationHistory"];
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["PartitionKey"], "ja-en");
        assert_eq!(stored[0]["OriginalText"], "こんにちは、世界！");
        assert_eq!(stored[0]["TranslatedText"], "Hello, world!");
    }

    #[tokio::test]
    async fn test_insert_without_table() {
        let store = store_for(FakeTableService::default(), "Missing").await;
        let record = TranslationRecord::new("ja-en", "1".into(), "a", "b", Utc::now());

        let err = store.insert(&record).await.unwrap_err();
        assert!(matches!(err, HistoryError::Status { status: 404, .. }));
    }
}
