pub mod backup;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod storage;

pub use cancel::CancelToken;
pub use config::{ConfigError, Configuration};
pub use error::{ErrorClass, ServiceError, ServiceErrorKind, SweepError};
pub use metrics::{RetryMetrics, RetrySummary};
pub use retry::{RetryDriver, RetryPolicy};
