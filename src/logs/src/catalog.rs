use std::sync::Arc;

use common::{RetryDriver, ServiceError};

use crate::model::{LogGroup, LogStream};
use crate::service::LogService;

/// Which log groups belong to one environment.
///
/// A group matches when its name ends with `/<env>` or contains the suffix,
/// which defaults to `-<env>` (function log groups such as
/// `/aws/lambda/fetchTournament-dev`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupFilter {
    pub environment: String,
    pub suffix: String,
}

impl GroupFilter {
    pub fn new(environment: impl Into<String>) -> Self {
        let environment = environment.into();
        Self {
            suffix: format!("-{environment}"),
            environment,
        }
    }

    pub fn with_suffix(mut self, suffix: Option<String>) -> Self {
        if let Some(suffix) = suffix.filter(|s| !s.is_empty()) {
            self.suffix = suffix;
        }
        self
    }

    pub fn matches(&self, group: &str) -> bool {
        group.ends_with(&format!("/{}", self.environment)) || group.contains(self.suffix.as_str())
    }
}

/// Lists log groups and their streams.
#[derive(Clone)]
pub struct LogCatalog {
    service: Arc<dyn LogService>,
    retry: RetryDriver,
}

impl LogCatalog {
    pub fn new(service: Arc<dyn LogService>, retry: RetryDriver) -> Self {
        Self { service, retry }
    }

    pub async fn list_groups(&self, filter: &GroupFilter) -> Result<Vec<LogGroup>, ServiceError> {
        let mut groups = Vec::new();
        let mut next: Option<String> = None;
        loop {
            let page = self
                .retry
                .execute("DescribeLogGroups", || self.service.list_groups(next.clone()))
                .await?;
            groups.extend(page.items.into_iter().filter(|g| filter.matches(&g.name)));
            match page.next {
                Some(token) if Some(&token) != next.as_ref() => next = Some(token),
                _ => break,
            }
        }

        tracing::debug!(suffix = %filter.suffix, groups = groups.len(), "Listed log groups");
        Ok(groups)
    }

    pub async fn list_streams(&self, group: &str) -> Result<Vec<LogStream>, ServiceError> {
        let mut streams = Vec::new();
        let mut next: Option<String> = None;
        loop {
            let page = self
                .retry
                .execute("DescribeLogStreams", || {
                    self.service.list_streams(group, next.clone())
                })
                .await?;
            streams.extend(page.items);
            match page.next {
                Some(token) if Some(&token) != next.as_ref() => next = Some(token),
                _ => break,
            }
        }
        Ok(streams)
    }

    /// Stream count for the pre-flight summary.
    pub async fn count_streams(&self, group: &str) -> Result<usize, ServiceError> {
        Ok(self.list_streams(group).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryLogService;
    use common::{RetryMetrics, RetryPolicy};

    #[test]
    fn test_group_filter() {
        let filter = GroupFilter::new("dev");
        assert!(filter.matches("/aws/lambda/fetchTournament-dev"));
        assert!(filter.matches("/ecs/scraper/dev"));
        assert!(!filter.matches("/aws/lambda/fetchTournament-prod"));

        let filter = GroupFilter::new("dev").with_suffix(Some("kingsroom".into()));
        assert!(filter.matches("/aws/lambda/kingsroom-publisher"));
        assert!(filter.matches("/ecs/scraper/dev"));
        assert!(!filter.matches("/aws/lambda/fetchTournament-dev"));
    }

    #[tokio::test]
    async fn test_lists_across_pages() {
        let service = InMemoryLogService::new().with_list_page_size(2);
        for group in [
            "/aws/lambda/a-dev",
            "/aws/lambda/a-prod",
            "/aws/lambda/b-dev",
            "/aws/lambda/c-dev",
        ] {
            service.create_group(group);
        }
        for stream in ["s1", "s2", "s3"] {
            service.put_events("/aws/lambda/b-dev", stream, []);
        }

        let catalog = LogCatalog::new(
            Arc::new(service),
            RetryDriver::new(RetryPolicy::standard(), RetryMetrics::new()),
        );
        let names: Vec<String> = catalog
            .list_groups(&GroupFilter::new("dev"))
            .await
            .unwrap()
            .into_iter()
            .map(|g| g.name)
            .collect();
        assert_eq!(names, vec!["/aws/lambda/a-dev", "/aws/lambda/b-dev", "/aws/lambda/c-dev"]);
        assert_eq!(catalog.count_streams("/aws/lambda/b-dev").await.unwrap(), 3);
    }
}
