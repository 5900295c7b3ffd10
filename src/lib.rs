//! # Netscribe
//!
//! Concurrent SSH capture pipeline for network device fleets.
//!
//! Netscribe discovers and fingerprints switches, routers, and firewalls
//! over SSH, captures the output of operational commands at scale, and
//! loads both the raw captures and the derived inventory into a SQLite
//! store with temporal history and change detection.
//!
//! ## Pipeline
//!
//! ```text
//! inventory (filtered)
//!    -> scheduler -> device runner -> ssh session -> raw text on disk
//!                                                        |
//!                                                 fingerprint engine
//!                                                        |
//!                                                     loader -> store
//!                                                        |
//!                                                 change detector
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use netscribe::context::CoreContext;
//! use netscribe::scheduler::{BatchConfig, Scheduler};
//! use netscribe::cancel::CancelToken;
//!
//! # async fn example(jobs: Vec<netscribe::runner::DeviceJob>) {
//! let ctx = CoreContext::bootstrap();
//! let scheduler = Scheduler::new(Arc::new(ctx.runner()), BatchConfig::default());
//! let (progress, _rx) = tokio::sync::mpsc::unbounded_channel();
//! let batch = scheduler.run_batch(jobs, CancelToken::never(), progress).await;
//! println!("{} ok, {} failed", batch.ok, batch.failed);
//! # }
//! ```

pub mod cancel;
pub mod capture;
pub mod channel;
pub mod context;
pub mod credentials;
pub mod error;
pub mod fingerprint;
pub mod inventory;
pub mod loader;
pub mod platform;
pub mod runner;
pub mod sanitize;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod template;
pub mod transport;

// Re-export main types for convenience
pub use cancel::{CancelSource, CancelToken};
pub use context::CoreContext;
pub use error::{Error, Result};
pub use fingerprint::{DeviceRecord, FingerprintEngine, FingerprintRecord};
pub use loader::{Loader, LoaderConfig, Severity};
pub use runner::{DeviceJob, DeviceResult, DeviceRunner, JobStatus};
pub use scheduler::{BatchConfig, BatchResult, Scheduler};
pub use store::Store;
