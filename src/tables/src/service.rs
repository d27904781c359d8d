use async_trait::async_trait;
use common::ServiceError;
use serde::Serialize;

use crate::item::{Item, KeySchema, describe};

/// Lifecycle state reported for a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TableStatus {
    Active,
    Creating,
    Updating,
    Deleting,
    Other(String),
}

impl TableStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "ACTIVE" => TableStatus::Active,
            "CREATING" => TableStatus::Creating,
            "UPDATING" => TableStatus::Updating,
            "DELETING" => TableStatus::Deleting,
            other => TableStatus::Other(other.to_string()),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, TableStatus::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableDescriptor {
    pub name: String,
    pub key_schema: KeySchema,
    pub status: TableStatus,
    /// The service's approximate item count; may lag behind reality
    pub item_count_estimate: Option<i64>,
}

/// One page of table names.
#[derive(Debug, Clone, Default)]
pub struct TableNamePage {
    pub names: Vec<String>,
    pub next: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    pub table: String,
    /// Only these attributes are returned when set
    pub projection: Option<Vec<String>>,
    /// Opaque continuation from the previous page
    pub exclusive_start_key: Option<Item>,
    pub limit: Option<i32>,
}

impl ScanRequest {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            projection: None,
            exclusive_start_key: None,
            limit: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub items: Vec<Item>,
    pub last_evaluated_key: Option<Item>,
}

#[derive(Debug, Clone, Default)]
pub struct CountPage {
    pub count: u64,
    pub last_evaluated_key: Option<Item>,
}

/// One element of a batch write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequest {
    Put(Item),
    /// Carries only the key attributes
    Delete(Item),
}

impl WriteRequest {
    pub fn describe(&self) -> String {
        match self {
            WriteRequest::Put(item) => format!("put {}", describe(item)),
            WriteRequest::Delete(key) => format!("delete {}", describe(key)),
        }
    }
}

/// Calls the key-value table service exposes.
#[async_trait]
pub trait TableService: Send + Sync {
    async fn list_tables(&self, start: Option<String>) -> Result<TableNamePage, ServiceError>;

    async fn describe_table(&self, table: &str) -> Result<TableDescriptor, ServiceError>;

    async fn scan(&self, request: ScanRequest) -> Result<ScanPage, ServiceError>;

    /// Count items without returning them, one page at a time.
    async fn count(&self, table: &str, start: Option<Item>) -> Result<CountPage, ServiceError>;

    /// Apply up to 25 writes; returns the requests the service left unprocessed.
    async fn batch_write(
        &self,
        table: &str,
        requests: Vec<WriteRequest>,
    ) -> Result<Vec<WriteRequest>, ServiceError>;
}
