//! Health monitoring
//!
//! A single background task samples every monitored service on a fixed
//! interval and appends the result to a bounded history. HTTP handlers only
//! read the latest snapshot; they never trigger a sample.

use crate::core::humanize::time_ago_or_placeholder;
use crate::inference::WorkerPool;
use crate::infrastructure::ring_buffer::RingBuffer;
use crate::log_health;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::Level;

/// Default number of samples retained per service
pub const DEFAULT_HISTORY_LEN: usize = 90;

/// Name of the core classification service
pub const CORE_SERVICE: &str = "SocioLens API";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Readiness {
    #[serde(rename = "Ready")]
    Ready,
    #[serde(rename = "Not ready")]
    NotReady,
}

impl Readiness {
    pub fn from_ready(ready: bool) -> Self {
        if ready {
            Readiness::Ready
        } else {
            Readiness::NotReady
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Readiness::Ready => "Ready",
            Readiness::NotReady => "Not ready",
        }
    }
}

/// Something that can report whether it is able to serve requests
pub trait ReadinessProbe: Send + Sync {
    /// # Errors
    /// An error means the probe itself failed; the service is then reported
    /// as not ready.
    fn readiness(&self) -> Result<Readiness, String>;
}

impl ReadinessProbe for WorkerPool {
    fn readiness(&self) -> Result<Readiness, String> {
        Ok(Readiness::from_ready(self.is_ready()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HealthSample {
    pub status: Readiness,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

struct ServiceEntry {
    name: &'static str,
    route: &'static str,
    probe: Arc<dyn ReadinessProbe>,
    status: Readiness,
    last_checked: Option<OffsetDateTime>,
    history: RingBuffer<HealthSample>,
}

/// Read-only view of one service for HTTP handlers
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealthView {
    pub route: &'static str,
    pub status: Readiness,
    /// Humanized time since the last sample
    pub last_checked: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_checked_at: Option<OffsetDateTime>,
    pub history: Vec<HealthSample>,
}

/// Statically declared monitored services and their latest samples
///
/// Written only by the monitor task.
pub struct HealthRegistry {
    services: RwLock<Vec<ServiceEntry>>,
    history_len: usize,
}

impl HealthRegistry {
    pub fn new(history_len: usize) -> Self {
        Self {
            services: RwLock::new(Vec::new()),
            history_len,
        }
    }

    /// Registry monitoring the core service through the worker pool
    pub fn for_pool(pool: Arc<WorkerPool>, history_len: usize) -> Self {
        let registry = Self::new(history_len);
        registry.register(CORE_SERVICE, "service", pool);
        registry
    }

    /// Declare a service; it starts as not ready and unchecked
    pub fn register(&self, name: &'static str, route: &'static str, probe: Arc<dyn ReadinessProbe>) {
        self.services.write().push(ServiceEntry {
            name,
            route,
            probe,
            status: Readiness::NotReady,
            last_checked: None,
            history: RingBuffer::new(self.history_len),
        });
    }

    /// Probe every service once
    pub fn sample(&self) {
        self.sample_at(OffsetDateTime::now_utc());
    }

    pub fn sample_at(&self, now: OffsetDateTime) {
        let mut services = self.services.write();
        for service in services.iter_mut() {
            let status = match service.probe.readiness() {
                Ok(status) => status,
                Err(e) => {
                    log_health!(Level::ERROR, "Health probe for {} failed: {}", service.name, e);
                    Readiness::NotReady
                }
            };

            service.status = status;
            service.last_checked = Some(now);
            service.history.push(HealthSample { status, timestamp: now });

            log_health!(Level::INFO, "Health check: {} - {}", service.name, status.as_str());
        }
    }

    /// Latest snapshot of every service, keyed by name
    pub fn snapshot(&self) -> BTreeMap<String, ServiceHealthView> {
        let now = OffsetDateTime::now_utc();
        self.services
            .read()
            .iter()
            .map(|service| {
                let view = ServiceHealthView {
                    route: service.route,
                    status: service.status,
                    last_checked: time_ago_or_placeholder(service.last_checked, now),
                    last_checked_at: service.last_checked,
                    history: service.history.to_vec(),
                };
                (service.name.to_string(), view)
            })
            .collect()
    }

    /// Current status of one service
    pub fn status(&self, name: &str) -> Option<Readiness> {
        self.services
            .read()
            .iter()
            .find(|service| service.name == name)
            .map(|service| service.status)
    }

    /// Number of retained samples for one service
    pub fn history_len(&self, name: &str) -> usize {
        self.services
            .read()
            .iter()
            .find(|service| service.name == name)
            .map_or(0, |service| service.history.len())
    }
}

/// Periodic sampler over a [`HealthRegistry`]
pub struct HealthMonitor {
    registry: Arc<HealthRegistry>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(registry: Arc<HealthRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Start sampling; the first tick fires immediately
    pub fn spawn(self) -> MonitorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            log_health!(Level::INFO, "Starting background health checker (every {:?})", self.interval);

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => self.registry.sample(),
                }
            }

            log_health!(Level::INFO, "Background health checker stopped");
        });

        MonitorHandle { shutdown_tx, task }
    }
}

/// Owner of the running monitor task
pub struct MonitorHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signal the monitor and wait up to `grace` for it to finish
    ///
    /// Returns `false` when the task had to be aborted.
    pub async fn shutdown(self, grace: Duration) -> bool {
        let _ = self.shutdown_tx.send(true);

        let mut task = self.task;
        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                log_health!(Level::ERROR, "Health checker task failed: {}", e);
                true
            }
            Err(_) => {
                log_health!(Level::WARN, "Health checker did not stop within {:?}, aborting", grace);
                task.abort();
                false
            }
        }
    }
}
