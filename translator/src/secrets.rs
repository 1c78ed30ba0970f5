//! Resolves configured credentials into plain strings at startup.
//!
//! Key Vault secrets are read with a token issued by the App Service managed
//! identity endpoint (`IDENTITY_ENDPOINT` / `IDENTITY_HEADER`).
use crate::config::Secret;
use serde::Deserialize;
use url::Url;

const KEY_VAULT_API_VERSION: &str = "7.4";
const KEY_VAULT_RESOURCE: &str = "https://vault.azure.net";
const IDENTITY_API_VERSION: &str = "2019-08-01";

#[derive(thiserror::Error, Debug)]
pub enum SecretError {
    #[error("environment variable {0} is not set")]
    MissingEnv(String),
    #[error("managed identity is not available: {0} is not set")]
    NoManagedIdentity(&'static str),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("HTTP client error: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },
}

/// Token endpoint of the hosting platform's managed identity.
#[derive(Clone, Debug)]
pub struct ManagedIdentity {
    pub endpoint: Url,
    pub header: String,
}

impl ManagedIdentity {
    pub fn from_env() -> Result<Self, SecretError> {
        let endpoint = std::env::var("IDENTITY_ENDPOINT")
            .map_err(|_| SecretError::NoManagedIdentity("IDENTITY_ENDPOINT"))?;
        let header = std::env::var("IDENTITY_HEADER")
            .map_err(|_| SecretError::NoManagedIdentity("IDENTITY_HEADER"))?;

        Ok(ManagedIdentity {
            endpoint: Url::parse(&endpoint).map_err(|e| SecretError::InvalidUrl(e.to_string()))?,
            header,
        })
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct SecretBundle {
    value: String,
}

pub struct SecretResolver {
    client: reqwest::Client,
    identity: Option<ManagedIdentity>,
}

impl SecretResolver {
    pub fn new(client: reqwest::Client, identity: Option<ManagedIdentity>) -> Self {
        SecretResolver { client, identity }
    }

    pub async fn resolve(&self, secret: &Secret) -> Result<String, SecretError> {
        match secret {
            Secret::Static { value } => Ok(value.clone()),
            Secret::Env { name } => {
                std::env::var(name).map_err(|_| SecretError::MissingEnv(name.clone()))
            }
            Secret::KeyVault {
                vault_url,
                secret_name,
            } => self.fetch_key_vault_secret(vault_url, secret_name).await,
        }
    }

    async fn fetch_key_vault_secret(
        &self,
        vault_url: &Url,
        secret_name: &str,
    ) -> Result<String, SecretError> {
        let token = self.fetch_token(KEY_VAULT_RESOURCE).await?;

        let url = vault_url
            .join(&format!("secrets/{secret_name}"))
            .map_err(|e| SecretError::InvalidUrl(e.to_string()))?;

        let response = self
            .client
            .get(url)
            .query(&[("api-version", KEY_VAULT_API_VERSION)])
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SecretError::Status {
                service: "key vault",
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        tracing::info!(secret_name, "resolved secret from key vault");
        Ok(response.json::<SecretBundle>().await?.value)
    }

    async fn fetch_token(&self, resource: &str) -> Result<String, SecretError> {
        let identity = match &self.identity {
            Some(identity) => identity.clone(),
            None => ManagedIdentity::from_env()?,
        };

        let response = self
            .client
            .get(identity.endpoint)
            .query(&[("resource", resource), ("api-version", IDENTITY_API_VERSION)])
            .header("X-IDENTITY-HEADER", identity.header)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SecretError::Status {
                service: "managed identity",
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        Ok(response.json::<TokenResponse>().await?.access_token)
    }
}
