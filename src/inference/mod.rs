//! Inference: devices, classifier contract and the worker pool
//!
//! - **device**: accelerator family and device count detection
//! - **classifier**: model collaborator traits and result type
//! - **remote**: HTTP-backed classifier bundled with the server
//! - **pool**: exclusive worker pool with async acquire/release

pub mod classifier;
pub mod device;
pub mod pool;
pub mod remote;

pub use classifier::{Classification, ClassifierError, ClassifierLoader, SentimentClassifier};
pub use device::{Device, DeviceFamily, DeviceInventory};
pub use pool::{PoolError, PoolStats, Worker, WorkerGuard, WorkerPool};
pub use remote::{RemoteClassifier, RemoteClassifierLoader};
