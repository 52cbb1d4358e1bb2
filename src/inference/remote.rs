//! HTTP-backed classifier
//!
//! Talks to a text-classification inference server (one per device) that
//! accepts `{"inputs": "..."}` and answers with `[{"label", "score"}]`.

use crate::inference::classifier::{
    Classification, ClassifierError, ClassifierLoader, SentimentClassifier,
};
use crate::inference::device::Device;
use crate::infrastructure::config::ClassifierConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    inputs: &'a str,
}

#[derive(Debug, Deserialize)]
struct LabelScore {
    label: String,
    score: f64,
}

/// Servers answer either a flat list or one list per input
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PredictResponse {
    Flat(Vec<LabelScore>),
    Batched(Vec<Vec<LabelScore>>),
}

impl PredictResponse {
    fn into_scores(self) -> Result<Vec<LabelScore>, ClassifierError> {
        match self {
            PredictResponse::Flat(scores) => Ok(scores),
            PredictResponse::Batched(mut batches) => {
                if batches.is_empty() {
                    return Err(ClassifierError::Malformed("empty batch".to_string()));
                }
                Ok(batches.swap_remove(0))
            }
        }
    }
}

/// Classifier that delegates to a remote inference server
pub struct RemoteClassifier {
    client: reqwest::Client,
    url: String,
}

impl RemoteClassifier {
    pub fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl SentimentClassifier for RemoteClassifier {
    async fn classify(&self, text: &str) -> Result<Classification, ClassifierError> {
        let response = self
            .client
            .post(&self.url)
            .json(&PredictRequest { inputs: text })
            .send()
            .await
            .map_err(|e| ClassifierError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ClassifierError::Http(response.status().as_u16()));
        }

        let body: PredictResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::Malformed(e.to_string()))?;

        let scores = body.into_scores()?;
        Classification::from_scores(scores.into_iter().map(|s| (s.label, s.score)))
    }
}

/// Builds one [`RemoteClassifier`] per device
///
/// `endpoints` is indexed by device ordinal; a single endpoint serves every
/// device.
pub struct RemoteClassifierLoader {
    client: reqwest::Client,
    endpoints: Vec<String>,
}

impl RemoteClassifierLoader {
    pub fn new(config: &ClassifierConfig) -> Result<Self, ClassifierError> {
        if config.endpoints.is_empty() {
            return Err(ClassifierError::Load {
                device: "any".to_string(),
                message: "no classifier endpoints configured".to_string(),
            });
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("sociolens/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClassifierError::Load {
                device: "any".to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            endpoints: config.endpoints.clone(),
        })
    }

    fn endpoint_for(&self, device: Device) -> Option<&String> {
        if self.endpoints.len() == 1 {
            self.endpoints.first()
        } else {
            self.endpoints.get(device.ordinal)
        }
    }
}

impl ClassifierLoader for RemoteClassifierLoader {
    fn load(&self, device: Device) -> Result<Box<dyn SentimentClassifier>, ClassifierError> {
        let url = self.endpoint_for(device).ok_or_else(|| ClassifierError::Load {
            device: device.to_string(),
            message: format!(
                "no endpoint for ordinal {} ({} configured)",
                device.ordinal,
                self.endpoints.len()
            ),
        })?;

        tracing::info!(target: "pool", "Binding {} to inference server {}", device, url);

        Ok(Box::new(RemoteClassifier::new(self.client.clone(), url.clone())))
    }
}
