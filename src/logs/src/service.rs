use async_trait::async_trait;
use common::ServiceError;

use crate::model::{EventPage, LogGroup, LogStream, Page};

/// Calls the log service exposes.
#[async_trait]
pub trait LogService: Send + Sync {
    async fn list_groups(&self, next: Option<String>) -> Result<Page<LogGroup>, ServiceError>;

    async fn list_streams(
        &self,
        group: &str,
        next: Option<String>,
    ) -> Result<Page<LogStream>, ServiceError>;

    /// Events of one stream, oldest first, starting at `token` (or the head).
    async fn get_events(
        &self,
        group: &str,
        stream: &str,
        token: Option<String>,
        limit: Option<i32>,
    ) -> Result<EventPage, ServiceError>;

    async fn delete_group(&self, group: &str) -> Result<(), ServiceError>;
}
