use std::sync::Arc;

use common::{RetryDriver, ServiceError};

use crate::service::{TableDescriptor, TableService};

/// Which physical tables belong to one environment.
///
/// Physical names look like `<Model>-<apiId>-<env>`; a table is selected when
/// it ends with `-<env>`, contains the API prefix when one is given and starts
/// with the name prefix when one is given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFilter {
    pub environment: String,
    pub api_prefix: Option<String>,
    pub name_prefix: Option<String>,
}

impl TableFilter {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            api_prefix: None,
            name_prefix: None,
        }
    }

    pub fn with_api_prefix(mut self, api_prefix: Option<String>) -> Self {
        self.api_prefix = api_prefix.filter(|p| !p.is_empty());
        self
    }

    pub fn with_name_prefix(mut self, name_prefix: Option<String>) -> Self {
        self.name_prefix = name_prefix.filter(|p| !p.is_empty());
        self
    }

    pub fn matches(&self, table: &str) -> bool {
        table.ends_with(&format!("-{}", self.environment))
            && self.api_prefix.as_ref().is_none_or(|p| table.contains(p.as_str()))
            && self.name_prefix.as_ref().is_none_or(|p| table.starts_with(p.as_str()))
    }

    /// Whether `table` is the physical table of `model`.
    pub fn is_model_table(&self, model: &str, table: &str) -> bool {
        self.matches(table) && (table == model || table.starts_with(&format!("{model}-")))
    }
}

/// A declared model name together with the table it resolved to.
#[derive(Debug, Clone)]
pub struct ResolvedTable {
    pub model: String,
    pub table: Option<TableDescriptor>,
}

/// Lists and describes the tables of an environment.
#[derive(Clone)]
pub struct TableCatalog {
    service: Arc<dyn TableService>,
    retry: RetryDriver,
}

impl TableCatalog {
    pub fn new(service: Arc<dyn TableService>, retry: RetryDriver) -> Self {
        Self { service, retry }
    }

    /// Every table name matching `filter`, in listing order.
    pub async fn list_names(&self, filter: &TableFilter) -> Result<Vec<String>, ServiceError> {
        let mut names = Vec::new();
        let mut start: Option<String> = None;
        loop {
            let page = self
                .retry
                .execute("ListTables", || self.service.list_tables(start.clone()))
                .await?;

            names.extend(page.names.into_iter().filter(|name| filter.matches(name)));

            match page.next {
                Some(next) if Some(&next) != start.as_ref() => start = Some(next),
                _ => break,
            }
        }

        tracing::debug!(
            environment = %filter.environment,
            tables = names.len(),
            "Listed environment tables"
        );
        Ok(names)
    }

    pub async fn describe(&self, table: &str) -> Result<TableDescriptor, ServiceError> {
        self.retry
            .execute("DescribeTable", || self.service.describe_table(table))
            .await
    }

    /// Describe every table matching `filter`.
    pub async fn list(&self, filter: &TableFilter) -> Result<Vec<TableDescriptor>, ServiceError> {
        let mut tables = Vec::new();
        for name in self.list_names(filter).await? {
            tables.push(self.describe(&name).await?);
        }
        Ok(tables)
    }

    /// Resolve declared model names to tables, keeping the declared order.
    ///
    /// A model without a table resolves to `None`; a table that disappears
    /// between listing and describing does too.
    pub async fn resolve(
        &self,
        filter: &TableFilter,
        models: &[String],
    ) -> Result<Vec<ResolvedTable>, ServiceError> {
        let names = self.list_names(filter).await?;
        let mut resolved = Vec::with_capacity(models.len());

        for model in models {
            let table = match names.iter().find(|name| filter.is_model_table(model, name)) {
                Some(name) => match self.describe(name).await {
                    Ok(descriptor) => Some(descriptor),
                    Err(err) if err.is_not_found() => None,
                    Err(err) => return Err(err),
                },
                None => None,
            };

            if table.is_none() {
                tracing::warn!(model = %model, environment = %filter.environment, "No table found for model");
            }
            resolved.push(ResolvedTable {
                model: model.clone(),
                table,
            });
        }

        Ok(resolved)
    }
}
