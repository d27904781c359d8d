//! Error taxonomy shared by the table and log engines.
//!
//! Service adapters translate SDK failures into [`ServiceError`], whose
//! [`ServiceErrorKind`] decides whether the [`RetryDriver`](crate::retry::RetryDriver)
//! may try again. Everything that escapes a component is a [`SweepError`], which
//! the driver maps onto a process exit code.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;

/// Process exit codes.
pub mod exit {
    pub const SUCCESS: i32 = 0;
    pub const ABORTED: i32 = 1;
    pub const CONFIGURATION: i32 = 2;
    pub const SERVICE: i32 = 3;
    pub const PARTIAL: i32 = 4;
    pub const CANCELLED: i32 = 130;
}

/// What went wrong with a single service call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ServiceErrorKind {
    Throttle,
    Transient,
    AccessDenied,
    NotFound,
    Validation,
    Cancelled,
    Other,
}

impl fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceErrorKind::Throttle => "throttle",
            ServiceErrorKind::Transient => "transient",
            ServiceErrorKind::AccessDenied => "access-denied",
            ServiceErrorKind::NotFound => "not-found",
            ServiceErrorKind::Validation => "validation",
            ServiceErrorKind::Cancelled => "cancelled",
            ServiceErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Retry classification of a [`ServiceErrorKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    RetryableThrottle,
    RetryableTransient,
    Fatal,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorClass::Fatal)
    }
}

/// Error codes the managed services use for capacity and busy conditions.
const THROTTLE_CODES: &[&str] = &[
    "ProvisionedThroughputExceededException",
    "ThrottlingException",
    "Throttling",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    "LimitExceededException",
    "ServiceUnavailable",
    "ServiceUnavailableException",
    "SlowDown",
];

const TRANSIENT_CODES: &[&str] = &[
    "InternalServerError",
    "InternalFailure",
    "InternalServerException",
    "ServiceException",
    "RequestTimeout",
    "RequestTimeoutException",
    "TransactionInProgressException",
];

const ACCESS_CODES: &[&str] = &[
    "AccessDeniedException",
    "AccessDenied",
    "UnrecognizedClientException",
    "ExpiredTokenException",
    "InvalidSignatureException",
    "MissingAuthenticationToken",
];

const NOT_FOUND_CODES: &[&str] = &["ResourceNotFoundException", "TableNotFoundException"];

const VALIDATION_CODES: &[&str] = &[
    "ValidationException",
    "InvalidParameterException",
    "InvalidParameterValueException",
    "SerializationException",
    "InvalidOperationException",
];

/// A failed call against one of the managed services.
#[derive(Debug, Clone, Error)]
#[error("{operation} failed ({kind}): {message}")]
pub struct ServiceError {
    pub kind: ServiceErrorKind,
    pub operation: String,
    pub message: String,
}

impl ServiceError {
    pub fn new(
        kind: ServiceErrorKind,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn throttle(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Throttle, operation, message)
    }

    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Transient, operation, message)
    }

    pub fn not_found(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::NotFound, operation, message)
    }

    pub fn access_denied(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::AccessDenied, operation, message)
    }

    pub fn validation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Validation, operation, message)
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Cancelled, operation, "cancelled")
    }

    /// Classify a raw service failure.
    ///
    /// `code` is the service error code when the service answered, `status`
    /// the HTTP status, and `transport` is set when the request never got a
    /// well-formed answer (connect failure, timeout, truncated response).
    pub fn classify(
        operation: impl Into<String>,
        code: Option<&str>,
        status: Option<u16>,
        transport: bool,
        message: impl Into<String>,
    ) -> Self {
        let kind = match code {
            Some(c) if THROTTLE_CODES.contains(&c) => ServiceErrorKind::Throttle,
            Some(c) if TRANSIENT_CODES.contains(&c) => ServiceErrorKind::Transient,
            Some(c) if ACCESS_CODES.contains(&c) => ServiceErrorKind::AccessDenied,
            Some(c) if NOT_FOUND_CODES.contains(&c) => ServiceErrorKind::NotFound,
            Some(c) if VALIDATION_CODES.contains(&c) => ServiceErrorKind::Validation,
            _ if transport => ServiceErrorKind::Transient,
            _ => match status {
                Some(429) | Some(503) => ServiceErrorKind::Throttle,
                Some(s) if s >= 500 => ServiceErrorKind::Transient,
                Some(401) | Some(403) => ServiceErrorKind::AccessDenied,
                Some(404) => ServiceErrorKind::NotFound,
                Some(400) => ServiceErrorKind::Validation,
                _ => ServiceErrorKind::Other,
            },
        };
        Self::new(kind, operation, message)
    }

    pub fn class(&self) -> ErrorClass {
        match self.kind {
            ServiceErrorKind::Throttle => ErrorClass::RetryableThrottle,
            ServiceErrorKind::Transient => ErrorClass::RetryableTransient,
            _ => ErrorClass::Fatal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ServiceErrorKind::NotFound
    }
}

/// Every failure an operation can surface to the orchestrator.
#[derive(Debug, Clone, Error)]
pub enum SweepError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("access denied: {0}")]
    AccessDenied(ServiceError),

    #[error("not found: {0}")]
    NotFound(ServiceError),

    #[error("capacity still exceeded after retries: {0}")]
    Throttle(ServiceError),

    #[error("service still failing after retries: {0}")]
    Transient(ServiceError),

    #[error("service error: {0}")]
    Service(ServiceError),

    #[error("{unprocessed} requests against {table} did not drain")]
    PartialBatch {
        table: String,
        unprocessed: usize,
        keys: Vec<String>,
    },

    #[error("{table} still holds {remaining} items after clearing")]
    Incomplete { table: String, remaining: u64 },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("{failed} of {total} {entity} failed")]
    Partial {
        entity: &'static str,
        failed: usize,
        total: usize,
    },

    #[error("confirmation for {0} was not given")]
    Aborted(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation exceeded its deadline of {0:?}")]
    Timeout(Duration),
}

impl From<ServiceError> for SweepError {
    fn from(err: ServiceError) -> Self {
        match err.kind {
            ServiceErrorKind::AccessDenied => SweepError::AccessDenied(err),
            ServiceErrorKind::NotFound => SweepError::NotFound(err),
            ServiceErrorKind::Throttle => SweepError::Throttle(err),
            ServiceErrorKind::Transient => SweepError::Transient(err),
            ServiceErrorKind::Cancelled => SweepError::Cancelled,
            ServiceErrorKind::Validation | ServiceErrorKind::Other => SweepError::Service(err),
        }
    }
}

impl SweepError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SweepError::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            SweepError::Aborted(_) => exit::ABORTED,
            SweepError::Configuration(_) => exit::CONFIGURATION,
            SweepError::PartialBatch { .. }
            | SweepError::Partial { .. }
            | SweepError::Incomplete { .. } => exit::PARTIAL,
            SweepError::Cancelled | SweepError::Timeout(_) => exit::CANCELLED,
            SweepError::AccessDenied(_)
            | SweepError::NotFound(_)
            | SweepError::Throttle(_)
            | SweepError::Transient(_)
            | SweepError::Service(_)
            | SweepError::Io { .. } => exit::SERVICE,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SweepError::Cancelled | SweepError::Timeout(_))
    }

    /// The error a step ends with when `failures` of its `total` units failed.
    ///
    /// Cancellation wins; a step whose only unit failed reports that failure;
    /// anything else is a partial failure.
    pub fn from_failures<'a>(
        entity: &'static str,
        failures: impl IntoIterator<Item = &'a SweepError>,
        total: usize,
    ) -> Option<SweepError> {
        let failures: Vec<&SweepError> = failures.into_iter().collect();
        if let Some(cancelled) = failures.iter().find(|e| e.is_cancelled()) {
            return Some((*cancelled).clone());
        }
        match failures.as_slice() {
            [] => None,
            [only] if total <= 1 => Some((*only).clone()),
            _ => Some(SweepError::Partial {
                entity,
                failed: failures.len(),
                total: total.max(failures.len()),
            }),
        }
    }
}

/// Find the exit code for an error chain, falling back to the service code.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<SweepError>())
        .map(SweepError::exit_code)
        .unwrap_or(exit::SERVICE)
}
