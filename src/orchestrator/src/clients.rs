use std::sync::Arc;

use aws_config::{BehaviorVersion, Region, SdkConfig};
use common::config::AwsConfig;
use logs::{CloudWatchLogService, LogService};
use tables::{DynamoDbTableService, TableService};

/// Build the shared SDK configuration. Credentials always come from the
/// SDK's default provider chain.
pub async fn load_sdk_config(config: &AwsConfig) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = &config.region {
        loader = loader.region(Region::new(region.clone()));
    }
    if let Some(endpoint) = &config.endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }
    loader.load().await
}

/// Service handles shared by every step of a run.
#[derive(Clone)]
pub struct Services {
    pub tables: Arc<dyn TableService>,
    pub logs: Arc<dyn LogService>,
}

impl Services {
    pub fn new(tables: Arc<dyn TableService>, logs: Arc<dyn LogService>) -> Self {
        Self { tables, logs }
    }

    pub async fn aws(config: &AwsConfig) -> Self {
        let sdk = load_sdk_config(config).await;
        tracing::debug!(
            region = ?sdk.region(),
            endpoint = ?config.endpoint_url,
            "Service clients initialized"
        );
        Self::new(
            Arc::new(DynamoDbTableService::new(&sdk)),
            Arc::new(CloudWatchLogService::new(&sdk)),
        )
    }
}
