use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

pub const SOURCE_LANGUAGE: &str = "ja";
pub const TARGET_LANGUAGE: &str = "en";

const API_VERSION: &str = "3.0";

#[derive(thiserror::Error, Debug)]
pub enum ProviderError {
    #[error("{message}")]
    Api {
        status: Option<u16>,
        code: Option<i64>,
        message: String,
    },
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("translation response contained no translations")]
    EmptyResponse,
}

impl ProviderError {
    /// Whether the provider rejected our credentials.
    ///
    /// The HTTP status is authoritative when present. Without one, the message
    /// is searched for the phrases the provider uses for credential errors;
    /// this fallback depends on upstream wording and may miss cases.
    pub fn is_auth_failure(&self) -> bool {
        if let ProviderError::Api {
            status: Some(status),
            ..
        } = self
        {
            return matches!(*status, 401 | 403);
        }

        let message = self.to_string();
        message.contains("Access denied") || message.contains("Authentication")
    }
}

/// One text item sent for translation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TranslateItem {
    #[serde(rename = "Text")]
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Translation {
    pub text: String,
}

/// Result for one input item, with one candidate per target language.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct TranslationResult {
    pub translations: Vec<Translation>,
}

#[async_trait]
pub trait TranslationProvider: Send + Sync {
    async fn translate(
        &self,
        items: &[TranslateItem],
        from: &str,
        to: &str,
    ) -> Result<Vec<TranslationResult>, ProviderError>;
}

/// Translates a single text from Japanese to English and returns the first
/// candidate of the first result.
pub async fn translate_text(
    provider: &dyn TranslationProvider,
    text: &str,
) -> Result<String, ProviderError> {
    let items = [TranslateItem { text: text.into() }];
    let results = provider
        .translate(&items, SOURCE_LANGUAGE, TARGET_LANGUAGE)
        .await?;

    results
        .into_iter()
        .next()
        .and_then(|result| result.translations.into_iter().next())
        .map(|translation| translation.text)
        .ok_or(ProviderError::EmptyResponse)
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: Option<i64>,
    message: String,
}

/// Client for the Azure Translator text API (v3).
pub struct AzureTranslator {
    client: reqwest::Client,
    translate_url: Url,
    region: Option<String>,
    api_key: String,
}

impl AzureTranslator {
    pub fn new(
        client: reqwest::Client,
        endpoint: &Url,
        region: Option<String>,
        api_key: String,
    ) -> Result<Self, ProviderError> {
        let base = format!("{}/", endpoint.as_str().trim_end_matches('/'));
        let translate_url = Url::parse(&base)
            .and_then(|base| base.join("translate"))
            .map_err(|e| ProviderError::InvalidUrl(e.to_string()))?;

        Ok(AzureTranslator {
            client,
            translate_url,
            region,
            api_key,
        })
    }
}

#[async_trait]
impl TranslationProvider for AzureTranslator {
    async fn translate(
        &self,
        items: &[TranslateItem],
        from: &str,
        to: &str,
    ) -> Result<Vec<TranslationResult>, ProviderError> {
        let mut request = self
            .client
            .post(self.translate_url.clone())
            .query(&[("api-version", API_VERSION), ("from", from), ("to", to)])
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .json(items);

        if let Some(region) = &self.region {
            request = request.header("Ocp-Apim-Subscription-Region", region);
        }

        let response = request.send().await?;
        let status = response.status();

        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            let (code, message) = match serde_json::from_str::<ErrorEnvelope>(&body) {
                Ok(envelope) => (envelope.error.code, envelope.error.message),
                Err(_) if body.is_empty() => (
                    None,
                    status.canonical_reason().unwrap_or("request failed").into(),
                ),
                Err(_) => (None, body),
            };

            return Err(ProviderError::Api {
                status: Some(status.as_u16()),
                code,
                message,
            });
        }

        Ok(response.json::<Vec<TranslationResult>>().await?)
    }
}
