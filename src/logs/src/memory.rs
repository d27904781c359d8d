//! In-memory [`LogService`] for tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use common::ServiceError;

use crate::model::{EventPage, LogEvent, LogGroup, LogStream, Page};
use crate::service::LogService;

#[derive(Debug, Clone, Default)]
pub struct LogFaultPlan {
    /// Every n-th call fails with a throttle error
    pub throttle_every: Option<u64>,
    /// Groups whose deletion is denied
    pub denied_deletes: HashSet<String>,
    /// Groups whose event reads are denied
    pub denied_reads: HashSet<String>,
}

type Streams = BTreeMap<String, Vec<LogEvent>>;

pub struct InMemoryLogService {
    groups: Mutex<BTreeMap<String, Streams>>,
    faults: Mutex<LogFaultPlan>,
    event_page_size: usize,
    list_page_size: usize,
    calls: AtomicU64,
    event_calls: AtomicU64,
    deletes: AtomicU64,
}

impl Default for InMemoryLogService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLogService {
    pub fn new() -> Self {
        Self {
            groups: Mutex::new(BTreeMap::new()),
            faults: Mutex::new(LogFaultPlan::default()),
            event_page_size: 50,
            list_page_size: 50,
            calls: AtomicU64::new(0),
            event_calls: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    pub fn with_event_page_size(mut self, size: usize) -> Self {
        self.event_page_size = size.max(1);
        self
    }

    pub fn with_list_page_size(mut self, size: usize) -> Self {
        self.list_page_size = size.max(1);
        self
    }

    pub fn set_faults(&self, faults: LogFaultPlan) {
        *self.faults.lock().unwrap_or_else(|p| p.into_inner()) = faults;
    }

    pub fn create_group(&self, group: &str) {
        self.lock().entry(group.to_string()).or_default();
    }

    /// Append events to a stream, creating group and stream as needed.
    pub fn put_events(&self, group: &str, stream: &str, events: impl IntoIterator<Item = LogEvent>) {
        self.lock()
            .entry(group.to_string())
            .or_default()
            .entry(stream.to_string())
            .or_default()
            .extend(events);
    }

    pub fn group_names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.lock().contains_key(group)
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn event_calls(&self) -> u64 {
        self.event_calls.load(Ordering::Relaxed)
    }

    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Streams>> {
        self.groups.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn faults(&self) -> LogFaultPlan {
        self.faults.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn admit(&self, operation: &str) -> Result<LogFaultPlan, ServiceError> {
        let n = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        let faults = self.faults();
        if faults.throttle_every.is_some_and(|every| every > 0 && n % every == 0) {
            return Err(ServiceError::throttle(operation, format!("injected throttle on call {n}")));
        }
        Ok(faults)
    }

    fn paginate<T: Clone>(items: Vec<T>, next: Option<String>, size: usize) -> Result<Page<T>, String> {
        let offset = match next {
            Some(token) => token.parse::<usize>().map_err(|_| format!("bad token {token}"))?,
            None => 0,
        };
        let end = (offset + size).min(items.len());
        Ok(Page {
            items: items.get(offset..end).map(<[T]>::to_vec).unwrap_or_default(),
            next: (end < items.len()).then(|| end.to_string()),
        })
    }
}

#[async_trait]
impl LogService for InMemoryLogService {
    async fn list_groups(&self, next: Option<String>) -> Result<Page<LogGroup>, ServiceError> {
        self.admit("DescribeLogGroups")?;
        let groups: Vec<LogGroup> = self.lock().keys().map(LogGroup::named).collect();
        Self::paginate(groups, next, self.list_page_size)
            .map_err(|e| ServiceError::validation("DescribeLogGroups", e))
    }

    async fn list_streams(
        &self,
        group: &str,
        next: Option<String>,
    ) -> Result<Page<LogStream>, ServiceError> {
        const OP: &str = "DescribeLogStreams";
        self.admit(OP)?;
        let streams: Vec<LogStream> = {
            let groups = self.lock();
            let streams = groups
                .get(group)
                .ok_or_else(|| ServiceError::not_found(OP, format!("log group {group} not found")))?;
            streams
                .iter()
                .map(|(name, events)| LogStream {
                    name: name.clone(),
                    first_event_at: events.first().map(|e| e.timestamp),
                    last_event_at: events.last().map(|e| e.timestamp),
                })
                .collect()
        };
        Self::paginate(streams, next, self.list_page_size).map_err(|e| ServiceError::validation(OP, e))
    }

    async fn get_events(
        &self,
        group: &str,
        stream: &str,
        token: Option<String>,
        limit: Option<i32>,
    ) -> Result<EventPage, ServiceError> {
        const OP: &str = "GetLogEvents";
        self.event_calls.fetch_add(1, Ordering::Relaxed);
        let faults = self.admit(OP)?;
        if faults.denied_reads.contains(group) {
            return Err(ServiceError::access_denied(OP, format!("not authorized to read {group}")));
        }

        let groups = self.lock();
        let events = groups
            .get(group)
            .and_then(|streams| streams.get(stream))
            .ok_or_else(|| ServiceError::not_found(OP, format!("log stream {group}/{stream} not found")))?;

        let offset = match &token {
            Some(token) => token
                .strip_prefix("f/")
                .and_then(|t| t.parse::<usize>().ok())
                .ok_or_else(|| ServiceError::validation(OP, format!("bad token {token}")))?,
            None => 0,
        };
        let size = limit
            .map(|l| (l.max(1) as usize).min(self.event_page_size))
            .unwrap_or(self.event_page_size);
        let end = (offset + size).min(events.len());

        Ok(EventPage {
            events: events.get(offset..end).map(<[LogEvent]>::to_vec).unwrap_or_default(),
            next_forward_token: Some(format!("f/{end}")),
        })
    }

    async fn delete_group(&self, group: &str) -> Result<(), ServiceError> {
        const OP: &str = "DeleteLogGroup";
        let faults = self.admit(OP)?;
        if faults.denied_deletes.contains(group) {
            return Err(ServiceError::access_denied(OP, format!("not authorized to delete {group}")));
        }
        self.lock()
            .remove(group)
            .ok_or_else(|| ServiceError::not_found(OP, format!("log group {group} not found")))?;
        self.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_token_repeats_at_end() {
        let service = InMemoryLogService::new().with_event_page_size(4);
        service.put_events("/aws/lambda/a-dev", "s", (0..6).map(|i| LogEvent::new(i, "m")));

        let first = service.get_events("/aws/lambda/a-dev", "s", None, None).await.unwrap();
        assert_eq!(first.events.len(), 4);
        let second = service
            .get_events("/aws/lambda/a-dev", "s", first.next_forward_token.clone(), None)
            .await
            .unwrap();
        assert_eq!(second.events.len(), 2);
        let third = service
            .get_events("/aws/lambda/a-dev", "s", second.next_forward_token.clone(), None)
            .await
            .unwrap();
        assert!(third.events.is_empty());
        assert_eq!(third.next_forward_token, second.next_forward_token);
    }

    #[tokio::test]
    async fn test_group_listing_pages() {
        let service = InMemoryLogService::new().with_list_page_size(2);
        for name in ["a", "b", "c"] {
            service.create_group(name);
        }
        let first = service.list_groups(None).await.unwrap();
        assert_eq!(first.items.len(), 2);
        let second = service.list_groups(first.next).await.unwrap();
        assert_eq!(second.items.len(), 1);
        assert!(second.next.is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_group_is_not_found() {
        let service = InMemoryLogService::new();
        let err = service.delete_group("gone").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
