//! fxrefresh service
//!
//! Asynchronous exchange-rate refresh pipeline. Callers ask the [`Recorder`]
//! for a refresh and get an identifier back immediately; the record is
//! persisted, queued, and resolved to `updated` or `failed` by a pool of
//! workers calling the rate provider.

pub mod config;
pub mod consumer;
pub mod metrics;
pub mod queue;
pub mod recorder;
pub mod service;
pub mod state;

pub use config::ServiceConfig;
pub use metrics::{Metrics, MetricsSnapshot};
pub use recorder::{Recorder, StatusTransitions};
pub use service::RefreshService;
pub use state::ServiceState;
