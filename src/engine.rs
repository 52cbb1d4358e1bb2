//! Core Application Engine
//!
//! Builds the shared context (worker pool, tracker, health registry and
//! caption collaborators), runs the health monitor next to the HTTP server
//! and tears both down on shutdown.

use crate::captions::{CaptionFetcher, CaptionRewriter, GroqRewriter, InstagramScraper};
use crate::inference::device::{self, DeviceInventory};
use crate::inference::{ClassifierLoader, RemoteClassifierLoader, WorkerPool};
use crate::infrastructure::api::{self, AppState};
use crate::infrastructure::config::Config;
use crate::infrastructure::health::{HealthMonitor, HealthRegistry};
use crate::infrastructure::metrics::ResponseTimeTracker;
use crate::{Result, SocioLensError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Main engine managing the service lifecycle
pub struct AppEngine {
    state: AppState,
}

impl AppEngine {
    /// Detect devices, load one worker per device and create the collaborators
    ///
    /// # Errors
    /// Any failure here is fatal: no partial pool is ever served.
    pub fn build(config: Config) -> Result<Self> {
        let inventory = device::detect(config.pool.device);
        let loader = RemoteClassifierLoader::new(&config.classifier)?;
        let fetcher = InstagramScraper::new(&config.caption)
            .map_err(|e| SocioLensError::Collaborator(e.to_string()))?;
        let rewriter = GroqRewriter::new(&config.rewrite)
            .map_err(|e| SocioLensError::Collaborator(e.to_string()))?;

        Self::with_parts(config, inventory, &loader, Arc::new(fetcher), Arc::new(rewriter))
    }

    /// Assemble the engine from explicit collaborators
    pub fn with_parts(
        config: Config,
        inventory: DeviceInventory,
        loader: &dyn ClassifierLoader,
        fetcher: Arc<dyn CaptionFetcher>,
        rewriter: Arc<dyn CaptionRewriter>,
    ) -> Result<Self> {
        let pool = Arc::new(WorkerPool::initialize(&config.pool, inventory, loader)?);
        let tracker = Arc::new(ResponseTimeTracker::with_capacity(
            config.metrics.max_records_per_endpoint,
        ));
        let health = Arc::new(HealthRegistry::for_pool(
            Arc::clone(&pool),
            config.health.history_len,
        ));

        tracing::info!(
            "Context ready: {} worker(s) on {}",
            pool.size(),
            pool.family()
        );

        Ok(Self {
            state: AppState {
                pool,
                tracker,
                health,
                fetcher,
                rewriter,
                config: Arc::new(config),
            },
        })
    }

    /// Shared context handed to every handler
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve on the configured address until Ctrl-C or SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = self.state.config.bind_address();
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!(target: "api", "API Server listening on {}", addr);

        self.run_until(listener, shutdown_signal()).await
    }

    /// Serve on `listener` until `shutdown` resolves, then stop the monitor
    pub async fn run_until<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let config = Arc::clone(&self.state.config);

        let monitor = HealthMonitor::new(
            Arc::clone(&self.state.health),
            Duration::from_secs(config.health.interval_secs),
        )
        .spawn();

        let served = api::serve(listener, self.state.clone(), shutdown).await;

        tracing::info!("Shutting down...");
        self.state.pool.close();

        let grace = Duration::from_secs(config.health.shutdown_grace_secs);
        if !monitor.shutdown(grace).await {
            tracing::warn!("Health monitor aborted after {:?}", grace);
        }

        served
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
