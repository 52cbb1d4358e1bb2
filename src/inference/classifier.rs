//! Sentiment classifier interface
//!
//! The model lives outside this crate. Workers hold one loaded
//! [`SentimentClassifier`] each, produced by a [`ClassifierLoader`] during
//! pool initialization.

use crate::inference::device::Device;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;

/// Errors raised by a classifier backend
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Failed to load model on {device}: {message}")]
    Load { device: String, message: String },
    #[error("Inference request failed: {0}")]
    Request(String),
    #[error("Inference backend returned HTTP {0}")]
    Http(u16),
    #[error("Malformed inference response: {0}")]
    Malformed(String),
}

/// Outcome of classifying one text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub label: String,
    /// Score of `label`, in `[0, 1]`
    pub confidence: f64,
    /// Score for every label the model knows
    pub scores: BTreeMap<String, f64>,
}

impl Classification {
    /// Build from `(label, score)` pairs in model order
    ///
    /// Picks the highest score (first wins on ties). Scores are rounded to
    /// four decimals, so they need not sum exactly to one.
    pub fn from_scores<I, S>(scores: I) -> Result<Self, ClassifierError>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut best: Option<(String, f64)> = None;
        let mut all = BTreeMap::new();

        for (label, score) in scores {
            if !score.is_finite() {
                return Err(ClassifierError::Malformed(format!("non-finite score {}", score)));
            }
            let label = label.into();
            if best.as_ref().map_or(true, |(_, s)| score > *s) {
                best = Some((label.clone(), score));
            }
            all.insert(label, round4(score));
        }

        let (label, confidence) =
            best.ok_or_else(|| ClassifierError::Malformed("no labels returned".to_string()))?;

        Ok(Self {
            label,
            confidence: round4(confidence),
            scores: all,
        })
    }

    /// Build from raw logits and the model's `id -> label` mapping
    pub fn from_logits(labels: &[String], logits: &[f64]) -> Result<Self, ClassifierError> {
        if labels.len() != logits.len() {
            return Err(ClassifierError::Malformed(format!(
                "{} labels for {} logits",
                labels.len(),
                logits.len()
            )));
        }
        let probs = softmax(logits);
        Self::from_scores(labels.iter().cloned().zip(probs))
    }
}

/// Numerically stable softmax
pub fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|x| (x - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

#[inline]
fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// A loaded model instance pinned to one device
///
/// Must be callable repeatedly without re-initialization. Implementations
/// need not be safe for concurrent use on the same instance; the worker pool
/// guarantees exclusive access.
#[async_trait]
pub trait SentimentClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Classification, ClassifierError>;
}

/// Loads one classifier per worker at startup
pub trait ClassifierLoader: Send + Sync {
    fn load(&self, device: Device) -> Result<Box<dyn SentimentClassifier>, ClassifierError>;
}
