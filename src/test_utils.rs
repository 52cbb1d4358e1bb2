//! Test doubles for the external collaborators
//!
//! The mock classifier records how many inferences overlap so tests can
//! assert that a worker is never shared.

use crate::captions::{CaptionError, CaptionFetcher, CaptionRewriter, RewriteError};
use crate::inference::classifier::{Classification, ClassifierError, ClassifierLoader, SentimentClassifier};
use crate::inference::device::{Device, DeviceFamily, DeviceInventory};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn cuda_inventory(count: usize) -> DeviceInventory {
    DeviceInventory {
        family: DeviceFamily::Cuda,
        count,
    }
}

pub fn cpu_inventory() -> DeviceInventory {
    DeviceInventory {
        family: DeviceFamily::Cpu,
        count: 1,
    }
}

/// Call counters shared by every classifier a loader produced
#[derive(Debug, Default)]
pub struct MockStats {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockStats {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of inferences observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a MockStats);

impl<'a> InFlight<'a> {
    fn enter(stats: &'a MockStats) -> Self {
        stats.calls.fetch_add(1, Ordering::SeqCst);
        let now = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        stats.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct MockLoader {
    scores: Vec<(String, f64)>,
    fail_ordinal: Option<usize>,
    fail_text: Option<String>,
    delay: Option<Duration>,
    stats: Arc<MockStats>,
}

impl MockLoader {
    /// Every text scores `{positive: 0.9, negative: 0.1}`
    pub fn positive() -> Self {
        Self::with_scores(&[("positive", 0.9), ("negative", 0.1)])
    }

    pub fn with_scores(scores: &[(&str, f64)]) -> Self {
        Self {
            scores: scores.iter().map(|(l, s)| (l.to_string(), *s)).collect(),
            fail_ordinal: None,
            fail_text: None,
            delay: None,
            stats: Arc::new(MockStats::default()),
        }
    }

    /// Loading on this ordinal fails
    pub fn fail_on_ordinal(mut self, ordinal: usize) -> Self {
        self.fail_ordinal = Some(ordinal);
        self
    }

    /// Classifying exactly this text fails
    pub fn fail_on_text(mut self, text: &str) -> Self {
        self.fail_text = Some(text.to_string());
        self
    }

    /// Each inference takes this long
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn stats(&self) -> Arc<MockStats> {
        Arc::clone(&self.stats)
    }
}

impl ClassifierLoader for MockLoader {
    fn load(&self, device: Device) -> Result<Box<dyn SentimentClassifier>, ClassifierError> {
        if self.fail_ordinal == Some(device.ordinal) {
            return Err(ClassifierError::Load {
                device: device.to_string(),
                message: "out of memory".to_string(),
            });
        }
        Ok(Box::new(MockClassifier {
            scores: self.scores.clone(),
            fail_text: self.fail_text.clone(),
            delay: self.delay,
            stats: Arc::clone(&self.stats),
        }))
    }
}

pub struct MockClassifier {
    scores: Vec<(String, f64)>,
    fail_text: Option<String>,
    delay: Option<Duration>,
    stats: Arc<MockStats>,
}

#[async_trait]
impl SentimentClassifier for MockClassifier {
    async fn classify(&self, text: &str) -> Result<Classification, ClassifierError> {
        let _in_flight = InFlight::enter(&self.stats);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_text.as_deref() == Some(text) {
            return Err(ClassifierError::Request("injected failure".to_string()));
        }
        Classification::from_scores(self.scores.iter().cloned())
    }
}

/// Returns a fixed caption, or `NotFound` when none is set
pub struct MockFetcher {
    caption: Option<String>,
}

impl MockFetcher {
    pub fn returning(caption: &str) -> Self {
        Self {
            caption: Some(caption.to_string()),
        }
    }

    pub fn empty() -> Self {
        Self { caption: None }
    }
}

#[async_trait]
impl CaptionFetcher for MockFetcher {
    async fn fetch_caption(&self, _url: &str) -> Result<String, CaptionError> {
        self.caption.clone().ok_or(CaptionError::NotFound)
    }
}

/// Echoes the input tagged with the requested sentiment, or always fails
pub struct MockRewriter {
    fail: bool,
}

impl MockRewriter {
    pub fn echo() -> Self {
        Self { fail: false }
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }
}

#[async_trait]
impl CaptionRewriter for MockRewriter {
    async fn rewrite(&self, caption: &str, sentiment: &str) -> Result<String, RewriteError> {
        if self.fail {
            return Err(RewriteError::Provider {
                status: 500,
                message: "provider down".to_string(),
            });
        }
        Ok(format!("{} #{}", caption, sentiment))
    }
}
