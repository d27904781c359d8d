use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogGroup {
    pub name: String,
    pub retention_days: Option<i32>,
    /// Milliseconds since the epoch
    pub created_at: Option<i64>,
    pub stored_bytes: Option<i64>,
}

impl LogGroup {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            retention_days: None,
            created_at: None,
            stored_bytes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogStream {
    pub name: String,
    pub first_event_at: Option<i64>,
    pub last_event_at: Option<i64>,
}

impl LogStream {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            first_event_at: None,
            last_event_at: None,
        }
    }
}

/// One log event, archived verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Milliseconds since the epoch
    pub timestamp: i64,
    pub message: String,
}

impl LogEvent {
    pub fn new(timestamp: i64, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            message: message.into(),
        }
    }
}

/// A page of a listing plus the token of the next one.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            next: None,
        }
    }
}

/// One forward window of a stream's events.
#[derive(Debug, Clone, Default)]
pub struct EventPage {
    pub events: Vec<LogEvent>,
    /// Repeats the request token once the end of the stream is reached
    pub next_forward_token: Option<String>,
}
