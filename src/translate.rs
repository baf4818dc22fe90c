//! Text translation through a Google Translate v2 compatible endpoint

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error};

use crate::config::TranslationConfig;
use crate::error::{guard_text, CallError, CallResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "en")]
    English,
    #[serde(rename = "zh-CN")]
    Mandarin,
    #[serde(rename = "ms")]
    Malay,
    #[serde(rename = "ta")]
    Tamil,
    #[serde(rename = "hi")]
    Hindi,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::English,
        Language::Mandarin,
        Language::Malay,
        Language::Tamil,
        Language::Hindi,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Mandarin => "zh-CN",
            Language::Malay => "ms",
            Language::Tamil => "ta",
            Language::Hindi => "hi",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Mandarin => "Mandarin",
            Language::Malay => "Bahasa Malaysia",
            Language::Tamil => "Tamil",
            Language::Hindi => "Hindi",
        }
    }
}

impl FromStr for Language {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .into_iter()
            .find(|lang| lang.code().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("Unsupported language: {}", s))
    }
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    target: &'a str,
    format: &'a str,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    data: TranslateData,
}

#[derive(Debug, Deserialize)]
struct TranslateData {
    translations: Vec<Translation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Translation {
    translated_text: String,
}

#[derive(Clone)]
pub struct Translator {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl Translator {
    pub fn new(config: &TranslationConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
        }
    }

    /// Translate `text` into `target`. Oversized text is refused before any request.
    pub async fn translate(&self, text: &str, target: Language) -> CallResult<Option<String>> {
        guard_text(text)?;

        let mut request = self.client.post(&self.url).json(&TranslateRequest {
            q: text,
            target: target.code(),
            format: "text",
        });
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            error!("Translation endpoint returned {}", status);
            return Err(CallError::BackendStatus(status.as_u16()));
        }

        let body: TranslateResponse = response.json().await?;
        let translated = body.data.translations.into_iter().next().map(|t| t.translated_text);
        debug!("Translated into {}: {:?}", target.code(), translated);
        Ok(translated)
    }
}
