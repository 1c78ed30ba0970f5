use serde::Deserialize;
use thiserror::Error;
use url::Url;

pub const DEFAULT_TABLE_NAME: &str = "TranslationHistory";
pub const DEFAULT_PARTITION_KEY: &str = "ja-en";
pub const DEFAULT_SCHEDULED_TEXT: &str = "こんにちは、世界！";

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Schedule interval cannot be 0")]
    InvalidInterval,

    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    #[error("Partition key cannot be empty")]
    EmptyPartitionKey,

    #[error("Scheduled text cannot be empty")]
    EmptyScheduledText,

    #[error("Secret reference is incomplete: {0}")]
    EmptySecret(&'static str),
}

/// Translator configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener serving the translate endpoint
    #[serde(default)]
    pub listener: Listener,
    /// Listener serving health and readiness probes
    #[serde(default = "Listener::default_admin")]
    pub admin_listener: Listener,
    /// Translation provider connection settings
    pub provider: ProviderConfig,
    /// Translation history persistence. Disabled when absent.
    pub history: Option<HistoryConfig>,
    /// Periodic translation of a fixed string. Disabled when absent.
    pub schedule: Option<ScheduleConfig>,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        self.provider.api_key.validate()?;

        if let Some(history) = &self.history {
            history.validate()?;
        }

        if let Some(schedule) = &self.schedule {
            schedule.validate()?;
        }

        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "0.0.0.0".into(),
            port: 7071,
        }
    }
}

impl Listener {
    fn default_admin() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 7072,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// Base URL of the translator resource, e.g. https://api.cognitive.microsofttranslator.com
    pub endpoint: Url,
    /// Region of the translator resource. Omitted for global resources.
    pub region: Option<String>,
    pub api_key: Secret,
}

/// Where a credential is read from. Resolved once at startup.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
#[serde(tag = "type")]
pub enum Secret {
    Static { value: String },
    Env { name: String },
    KeyVault { vault_url: Url, secret_name: String },
}

impl Secret {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Secret::Static { value } if value.is_empty() => {
                Err(ValidationError::EmptySecret("value"))
            }
            Secret::Env { name } if name.is_empty() => Err(ValidationError::EmptySecret("name")),
            Secret::KeyVault { secret_name, .. } if secret_name.is_empty() => {
                Err(ValidationError::EmptySecret("secret_name"))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
#[serde(tag = "type")]
pub enum HistoryStoreType {
    AzureTable { connection_string: Secret },
    Memory,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct HistoryConfig {
    pub store: HistoryStoreType,
    #[serde(default = "default_table_name")]
    pub table_name: String,
    #[serde(default = "default_partition_key")]
    pub partition_key: String,
}

impl HistoryConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        // Azure table names: 3-63 alphanumeric characters, starting with a letter.
        let name = &self.table_name;
        let valid_name = (3..=63).contains(&name.len())
            && name.starts_with(|c: char| c.is_ascii_alphabetic())
            && name.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid_name {
            return Err(ValidationError::InvalidTableName(name.clone()));
        }

        if self.partition_key.is_empty() {
            return Err(ValidationError::EmptyPartitionKey);
        }

        if let HistoryStoreType::AzureTable { connection_string } = &self.store {
            connection_string.validate()?;
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ScheduleConfig {
    pub interval_secs: u64,
    #[serde(default = "default_scheduled_text")]
    pub text: String,
}

impl ScheduleConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.interval_secs == 0 {
            return Err(ValidationError::InvalidInterval);
        }
        if self.text.is_empty() {
            return Err(ValidationError::EmptyScheduledText);
        }
        Ok(())
    }
}

fn default_table_name() -> String {
    DEFAULT_TABLE_NAME.into()
}

fn default_partition_key() -> String {
    DEFAULT_PARTITION_KEY.into()
}

fn default_scheduled_text() -> String {
    DEFAULT_SCHEDULED_TEXT.into()
}
