//! Infrastructure - everything around the inference path
//!
//! This module contains:
//! - HTTP API and request timing
//! - Response-time metrics
//! - Health monitoring
//! - Configuration and logging

pub mod api;
pub mod config;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod ring_buffer;
pub mod timing;

pub use api::{build_router, serve, AppState};
pub use health::{HealthMonitor, HealthRegistry, MonitorHandle, Readiness};
pub use metrics::ResponseTimeTracker;
pub use ring_buffer::RingBuffer;
