//! Text-to-emotion classification.
//!
//! Message text maps to one of the 28 fixed labels. The real classifier is
//! an external endpoint; a keyword matcher covers the local fallback. Any
//! failure anywhere resolves to the neutral label — classification is never
//! allowed to propagate an error into the message pipeline.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::{ClassifyConfig, CLASSIFY_LABELS, FALLBACK_LABEL};
use crate::error::{ClassifyError, Result};

/// Classifies message text into one emotion label
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<String>;
}

/// Run a classifier, collapsing every failure to the neutral label
pub async fn classify_or_neutral(classifier: &dyn Classifier, text: &str) -> String {
    match classifier.classify(text).await {
        Ok(label) => label,
        Err(e) => {
            tracing::warn!("Classification failed, falling back to neutral: {}", e);
            FALLBACK_LABEL.to_string()
        }
    }
}

/// Whether a label belongs to the fixed set
pub fn is_known_label(label: &str) -> bool {
    CLASSIFY_LABELS.contains(&label)
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    classification: Vec<ScoredLabel>,
}

#[derive(Debug, Deserialize)]
struct ScoredLabel {
    label: String,
}

/// Remote classification endpoint
pub struct HttpClassifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpClassifier {
    pub fn new(config: &ClassifyConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .unwrap_or_default();

        Self {
            client,
            endpoint: config.endpoint.clone(),
        }
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, text: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| ClassifyError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ClassifyError::Request(format!(
                "endpoint returned {}",
                response.status()
            ))
            .into());
        }

        let parsed: ClassifyResponse = response
            .json()
            .await
            .map_err(|e| ClassifyError::Request(e.to_string()))?;

        let label = parsed
            .classification
            .first()
            .map(|s| s.label.to_lowercase())
            .ok_or_else(|| ClassifyError::Request("empty classification".to_string()))?;

        if !is_known_label(&label) {
            return Err(ClassifyError::UnknownLabel(label).into());
        }
        Ok(label)
    }
}

/// Local keyword matcher used when no endpoint is configured. First label
/// whose keyword appears in the lowercased text wins; otherwise neutral.
pub struct KeywordClassifier;

const KEYWORDS: [(&str, &str); 12] = [
    ("joy", "happy"),
    ("joy", "glad"),
    ("amusement", "haha"),
    ("amusement", "lol"),
    ("sadness", "sad"),
    ("grief", "cry"),
    ("anger", "angry"),
    ("annoyance", "ugh"),
    ("fear", "scared"),
    ("surprise", "wow"),
    ("love", "love"),
    ("gratitude", "thank"),
];

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, text: &str) -> Result<String> {
        let lowered = text.to_lowercase();
        for (label, keyword) in KEYWORDS {
            if lowered.contains(keyword) {
                return Ok(label.to_string());
            }
        }
        Ok(FALLBACK_LABEL.to_string())
    }
}
