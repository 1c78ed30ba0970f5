pub mod api;
pub mod config;
pub mod handler;
pub mod history;
pub mod metrics_defs;
pub mod provider;
pub mod schedule;
pub mod secrets;
pub mod table_storage;

#[cfg(test)]
mod testutils;

use config::{Config, HistoryConfig, HistoryStoreType};
use handler::{HistoryWriter, TranslateHandler};
use history::{HistoryError, HistoryStore, MemoryHistoryStore};
use provider::{AzureTranslator, ProviderError, TranslationProvider};
use schedule::ScheduledJob;
use secrets::{ManagedIdentity, SecretError, SecretResolver};
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use table_storage::{AzureTableStore, StorageAccount};

#[derive(thiserror::Error, Debug)]
pub enum TranslatorError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Validation(#[from] config::ValidationError),
    #[error("could not resolve secret: {0}")]
    Secret(#[from] SecretError),
    #[error("could not build translation provider: {0}")]
    Provider(#[from] ProviderError),
    #[error("could not build history store: {0}")]
    History(#[from] HistoryError),
    #[error("no schedule configured")]
    NoSchedule,
}

/// Serves the translate endpoint and the admin endpoints. Also runs the
/// scheduled job when one is configured.
pub async fn run(config: Config) -> Result<(), TranslatorError> {
    config.validate()?;

    let ready = Arc::new(AtomicBool::new(false));
    let ready_clone = ready.clone();
    let admin_service: AdminService<_, TranslatorError> =
        AdminService::new(move || ready_clone.load(Ordering::Relaxed));
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );

    let api_task = serve_api(&config, &ready);

    tokio::try_join!(api_task, admin_task)?;
    Ok(())
}

/// Builds the translate endpoint and serves it. `ready` is set once the
/// listener is bound.
async fn serve_api(config: &Config, ready: &AtomicBool) -> Result<(), TranslatorError> {
    let client = reqwest::Client::new();
    let resolver = secret_resolver(&client);
    let provider = build_provider(config, &resolver, &client).await?;
    let history = match &config.history {
        Some(history_config) => Some(build_history(history_config, &resolver, &client).await?),
        None => {
            tracing::info!("translation history disabled");
            None
        }
    };

    let listener = api::bind(&config.listener).await?;

    if let Some(schedule) = &config.schedule {
        let job = ScheduledJob::new(
            provider.clone(),
            schedule.text.clone(),
            Duration::from_secs(schedule.interval_secs),
        );
        tokio::spawn(async move { job.run().await });
    }

    let handler = TranslateHandler::new(provider, history);
    ready.store(true, Ordering::Relaxed);
    api::serve(listener, handler).await?;
    Ok(())
}

/// Runs only the scheduled job, without any listener.
pub async fn run_scheduled_job(config: Config) -> Result<(), TranslatorError> {
    config.validate()?;
    let schedule = config.schedule.as_ref().ok_or(TranslatorError::NoSchedule)?;

    let client = reqwest::Client::new();
    let resolver = secret_resolver(&client);
    let provider = build_provider(&config, &resolver, &client).await?;

    let job = ScheduledJob::new(
        provider,
        schedule.text.clone(),
        Duration::from_secs(schedule.interval_secs),
    );
    job.run().await;
    Ok(())
}

fn secret_resolver(client: &reqwest::Client) -> SecretResolver {
    let identity = match ManagedIdentity::from_env() {
        Ok(identity) => Some(identity),
        Err(e) => {
            tracing::debug!(error = %e, "managed identity unavailable");
            None
        }
    };
    SecretResolver::new(client.clone(), identity)
}

async fn build_provider(
    config: &Config,
    resolver: &SecretResolver,
    client: &reqwest::Client,
) -> Result<Arc<dyn TranslationProvider>, TranslatorError> {
    let api_key = resolver.resolve(&config.provider.api_key).await?;
    let translator = AzureTranslator::new(
        client.clone(),
        &config.provider.endpoint,
        config.provider.region.clone(),
        api_key,
    )?;
    Ok(Arc::new(translator))
}

async fn build_history(
    config: &HistoryConfig,
    resolver: &SecretResolver,
    client: &reqwest::Client,
) -> Result<HistoryWriter, TranslatorError> {
    let store: Arc<dyn HistoryStore> = match &config.store {
        HistoryStoreType::AzureTable { connection_string } => {
            let conn_str = resolver.resolve(connection_string).await?;
            let account = StorageAccount::from_connection_string(&conn_str)?;
            tracing::info!(
                account = %account.name,
                table = %config.table_name,
                "recording translation history to table storage"
            );
            Arc::new(AzureTableStore::new(
                client.clone(),
                account,
                config.table_name.clone(),
            ))
        }
        HistoryStoreType::Memory => {
            tracing::warn!("recording translation history in memory only");
            Arc::new(MemoryHistoryStore::new())
        }
    };

    Ok(HistoryWriter::new(store, config.partition_key.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_PARTITION_KEY, Secret};
    use crate::testutils::spawn_router;
    use axum::Json;
    use axum::routing::post;
    use serde_json::{Value, json};

    fn config_for(endpoint: &str) -> Config {
        serde_yaml::from_str(&format!(
            r#"
provider:
    endpoint: "{endpoint}"
    api_key: {{type: static, value: key-123}}
history:
    store: {{type: memory}}
"#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_scheduled_job_requires_schedule() {
        let config = config_for("http://127.0.0.1:1");
        assert!(matches!(
            run_scheduled_job(config).await,
            Err(TranslatorError::NoSchedule)
        ));
    }

    #[tokio::test]
    async fn test_run_rejects_invalid_config() {
        let mut config = config_for("http://127.0.0.1:1");
        config.listener.port = 0;
        assert!(matches!(
            run(config).await,
            Err(TranslatorError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_not_ready_when_bind_fails() {
        let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = config_for("http://127.0.0.1:1");
        config.listener.host = "127.0.0.1".into();
        config.listener.port = occupied.local_addr().unwrap().port();

        let ready = AtomicBool::new(false);
        let result = serve_api(&config, &ready).await;

        assert!(matches!(result, Err(TranslatorError::Io(_))));
        assert!(!ready.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_build_components() {
        let router = axum::Router::new().route(
            "/translate",
            post(|Json(body): Json<Value>| async move {
                let text = body[0]["Text"].as_str().unwrap_or_default().to_string();
                Json(json!([{"translations": [{"text": format!("en:{text}"), "to": "en"}]}]))
            }),
        );
        let addr = spawn_router(router).await;
        let config = config_for(&format!("http://{addr}"));

        let client = reqwest::Client::new();
        let resolver = SecretResolver::new(client.clone(), None);
        let provider = build_provider(&config, &resolver, &client).await.unwrap();
        let history = build_history(config.history.as_ref().unwrap(), &resolver, &client)
            .await
            .unwrap();

        let handler = TranslateHandler::new(provider, Some(history));
        assert_eq!(handler.translate("テスト").await.unwrap(), "en:テスト");
        assert_eq!(config.history.unwrap().partition_key, DEFAULT_PARTITION_KEY);
    }

    #[tokio::test]
    async fn test_build_history_rejects_bad_connection_string() {
        let mut history_config = config_for("http://127.0.0.1:1").history.unwrap();
        history_config.store = HistoryStoreType::AzureTable {
            connection_string: Secret::Static {
                value: "AccountName=only".into(),
            },
        };

        let client = reqwest::Client::new();
        let resolver = SecretResolver::new(client.clone(), None);
        let err = build_history(&history_config, &resolver, &client)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TranslatorError::History(_)));
    }
}
