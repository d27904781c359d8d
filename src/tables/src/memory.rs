//! In-memory [`TableService`] with fault injection, for tests.
//!
//! Items are kept ordered by their rendered key, so scans are deterministic
//! and a continuation key stays valid after the item it names is deleted.

use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use common::ServiceError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::item::{Item, KeySchema, describe};
use crate::service::{
    CountPage, ScanPage, ScanRequest, TableDescriptor, TableNamePage, TableService, TableStatus,
    WriteRequest,
};

/// Failures the fake injects into otherwise successful calls.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Every n-th call (of any kind) fails with a throttle error
    pub throttle_every: Option<u64>,
    /// Probability that a batch write call fails with a throttle error
    pub write_throttle_ratio: f64,
    /// Probability that each request of a batch comes back unprocessed
    pub unprocessed_ratio: f64,
    /// Tables every call against fails with access denied
    pub denied_tables: HashSet<String>,
    /// Tables whose deletes are denied while reads still work
    pub denied_writes: HashSet<String>,
    pub seed: u64,
}

struct FakeTable {
    schema: KeySchema,
    status: TableStatus,
    items: BTreeMap<String, Item>,
}

struct State {
    tables: BTreeMap<String, FakeTable>,
    faults: FaultPlan,
    rng: StdRng,
}

pub struct InMemoryTableService {
    state: Mutex<State>,
    page_size: usize,
    list_page_size: usize,
    calls: AtomicU64,
    write_calls: AtomicU64,
    scan_calls: AtomicU64,
}

impl Default for InMemoryTableService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTableService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                tables: BTreeMap::new(),
                faults: FaultPlan::default(),
                rng: StdRng::seed_from_u64(0),
            }),
            page_size: 100,
            list_page_size: 100,
            calls: AtomicU64::new(0),
            write_calls: AtomicU64::new(0),
            scan_calls: AtomicU64::new(0),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_list_page_size(mut self, page_size: usize) -> Self {
        self.list_page_size = page_size.max(1);
        self
    }

    pub fn set_faults(&self, faults: FaultPlan) {
        let mut state = self.lock();
        state.rng = StdRng::seed_from_u64(faults.seed);
        state.faults = faults;
    }

    pub fn create_table(&self, name: &str, schema: KeySchema) {
        self.lock().tables.insert(
            name.to_string(),
            FakeTable {
                schema,
                status: TableStatus::Active,
                items: BTreeMap::new(),
            },
        );
    }

    pub fn set_status(&self, name: &str, status: TableStatus) {
        if let Some(table) = self.lock().tables.get_mut(name) {
            table.status = status;
        }
    }

    /// Store items directly, bypassing fault injection.
    pub fn insert_items(&self, name: &str, items: impl IntoIterator<Item = Item>) {
        let mut state = self.lock();
        let Some(table) = state.tables.get_mut(name) else {
            panic!("table {name} does not exist");
        };
        for item in items {
            let key = table
                .schema
                .extract_key(&item)
                .unwrap_or_else(|| panic!("item without key attributes: {}", describe(&item)));
            table.items.insert(describe(&key), item);
        }
    }

    pub fn item_count(&self, name: &str) -> usize {
        self.lock()
            .tables
            .get(name)
            .map(|t| t.items.len())
            .unwrap_or_default()
    }

    /// Items of `name` in scan order.
    pub fn items(&self, name: &str) -> Vec<Item> {
        self.lock()
            .tables
            .get(name)
            .map(|t| t.items.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.lock().tables.keys().cloned().collect()
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn write_calls(&self) -> u64 {
        self.write_calls.load(Ordering::Relaxed)
    }

    pub fn scan_calls(&self) -> u64 {
        self.scan_calls.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Count the call and apply the faults common to every operation.
    fn admit(&self, state: &State, operation: &str, table: Option<&str>) -> Result<(), ServiceError> {
        let n = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(table) = table {
            if state.faults.denied_tables.contains(table) {
                return Err(ServiceError::access_denied(
                    operation,
                    format!("not authorized to access {table}"),
                ));
            }
        }
        if state.faults.throttle_every.is_some_and(|every| every > 0 && n % every == 0) {
            return Err(ServiceError::throttle(operation, format!("injected throttle on call {n}")));
        }
        Ok(())
    }

    fn table<'a>(state: &'a State, operation: &str, name: &str) -> Result<&'a FakeTable, ServiceError> {
        state
            .tables
            .get(name)
            .ok_or_else(|| ServiceError::not_found(operation, format!("table {name} not found")))
    }

    fn range_after<'a>(
        table: &'a FakeTable,
        start: Option<&Item>,
    ) -> impl Iterator<Item = (&'a String, &'a Item)> + 'a {
        let lower = match start.and_then(|item| table.schema.extract_key(item)) {
            Some(key) => Bound::Excluded(describe(&key)),
            None => Bound::Unbounded,
        };
        table.items.range((lower, Bound::Unbounded))
    }
}

#[async_trait]
impl TableService for InMemoryTableService {
    async fn list_tables(&self, start: Option<String>) -> Result<TableNamePage, ServiceError> {
        let state = self.lock();
        self.admit(&state, "ListTables", None)?;

        let lower = match start {
            Some(name) => Bound::Excluded(name),
            None => Bound::Unbounded,
        };
        let mut names: Vec<String> = state
            .tables
            .range((lower, Bound::Unbounded))
            .take(self.list_page_size + 1)
            .map(|(name, _)| name.clone())
            .collect();

        let next = if names.len() > self.list_page_size {
            names.truncate(self.list_page_size);
            names.last().cloned()
        } else {
            None
        };
        Ok(TableNamePage { names, next })
    }

    async fn describe_table(&self, name: &str) -> Result<TableDescriptor, ServiceError> {
        let state = self.lock();
        self.admit(&state, "DescribeTable", Some(name))?;
        let table = Self::table(&state, "DescribeTable", name)?;
        Ok(TableDescriptor {
            name: name.to_string(),
            key_schema: table.schema.clone(),
            status: table.status.clone(),
            item_count_estimate: Some(table.items.len() as i64),
        })
    }

    async fn scan(&self, request: ScanRequest) -> Result<ScanPage, ServiceError> {
        let state = self.lock();
        self.scan_calls.fetch_add(1, Ordering::Relaxed);
        self.admit(&state, "Scan", Some(&request.table))?;
        let table = Self::table(&state, "Scan", &request.table)?;

        let limit = request
            .limit
            .map(|l| (l.max(1) as usize).min(self.page_size))
            .unwrap_or(self.page_size);

        let mut page: Vec<&Item> = Self::range_after(table, request.exclusive_start_key.as_ref())
            .take(limit + 1)
            .map(|(_, item)| item)
            .collect();

        let more = page.len() > limit;
        page.truncate(limit);

        let last_evaluated_key = if more {
            page.last().and_then(|item| table.schema.extract_key(item))
        } else {
            None
        };

        let items = page
            .into_iter()
            .map(|item| match &request.projection {
                Some(attrs) => item
                    .iter()
                    .filter(|(name, _)| attrs.contains(name))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                None => item.clone(),
            })
            .collect();

        Ok(ScanPage {
            items,
            last_evaluated_key,
        })
    }

    async fn count(&self, name: &str, start: Option<Item>) -> Result<CountPage, ServiceError> {
        let state = self.lock();
        self.admit(&state, "Scan", Some(name))?;
        let table = Self::table(&state, "Scan", name)?;

        let keys: Vec<&String> = Self::range_after(table, start.as_ref())
            .take(self.page_size + 1)
            .map(|(key, _)| key)
            .collect();
        let more = keys.len() > self.page_size;
        let counted = keys.len().min(self.page_size);

        let last_evaluated_key = if more {
            Self::range_after(table, start.as_ref())
                .nth(counted - 1)
                .and_then(|(_, item)| table.schema.extract_key(item))
        } else {
            None
        };

        Ok(CountPage {
            count: counted as u64,
            last_evaluated_key,
        })
    }

    async fn batch_write(
        &self,
        name: &str,
        requests: Vec<WriteRequest>,
    ) -> Result<Vec<WriteRequest>, ServiceError> {
        const OP: &str = "BatchWriteItem";
        let mut state = self.lock();
        self.write_calls.fetch_add(1, Ordering::Relaxed);
        self.admit(&state, OP, Some(name))?;
        Self::table(&state, OP, name)?;

        if requests.is_empty() || requests.len() > 25 {
            return Err(ServiceError::validation(
                OP,
                format!("batch must hold 1 to 25 requests, got {}", requests.len()),
            ));
        }
        if state.faults.denied_writes.contains(name) {
            return Err(ServiceError::access_denied(
                OP,
                format!("not authorized to write {name}"),
            ));
        }

        let State {
            tables,
            faults,
            rng,
        } = &mut *state;

        if faults.write_throttle_ratio > 0.0 && rng.gen_bool(faults.write_throttle_ratio.min(1.0)) {
            return Err(ServiceError::throttle(OP, "injected write throttle"));
        }

        let table = tables
            .get_mut(name)
            .ok_or_else(|| ServiceError::not_found(OP, format!("table {name} not found")))?;

        let mut unprocessed = Vec::new();
        let mut seen = HashSet::new();
        for request in requests {
            if faults.unprocessed_ratio > 0.0 && rng.gen_bool(faults.unprocessed_ratio.min(1.0)) {
                unprocessed.push(request);
                continue;
            }
            let item = match &request {
                WriteRequest::Put(item) | WriteRequest::Delete(item) => item,
            };
            let key = table.schema.extract_key(item).ok_or_else(|| {
                ServiceError::validation(OP, format!("missing key attributes in {}", describe(item)))
            })?;
            let rendered = describe(&key);
            if !seen.insert(rendered.clone()) {
                return Err(ServiceError::validation(
                    OP,
                    format!("duplicate key {rendered} in one batch"),
                ));
            }
            match request {
                WriteRequest::Put(item) => {
                    table.items.insert(rendered, item);
                }
                WriteRequest::Delete(_) => {
                    table.items.remove(&rendered);
                }
            }
        }

        Ok(unprocessed)
    }
}
