//! CloudWatch Logs implementation of [`LogService`].

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_cloudwatchlogs::Client;
use aws_sdk_cloudwatchlogs::config::http::HttpResponse;
use aws_sdk_cloudwatchlogs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use common::ServiceError;

use crate::model::{EventPage, LogEvent, LogGroup, LogStream, Page};
use crate::service::LogService;

pub struct CloudWatchLogService {
    client: Client,
}

impl CloudWatchLogService {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn service_error<E>(operation: &'static str, err: SdkError<E, HttpResponse>) -> ServiceError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let transport = matches!(
        err,
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_)
    );
    let code = err.code().map(str::to_string);
    ServiceError::classify(
        operation,
        code.as_deref(),
        status,
        transport,
        DisplayErrorContext(&err).to_string(),
    )
}

#[async_trait]
impl LogService for CloudWatchLogService {
    async fn list_groups(&self, next: Option<String>) -> Result<Page<LogGroup>, ServiceError> {
        let out = self
            .client
            .describe_log_groups()
            .set_next_token(next)
            .send()
            .await
            .map_err(|e| service_error("DescribeLogGroups", e))?;

        Ok(Page {
            items: out
                .log_groups
                .unwrap_or_default()
                .into_iter()
                .filter_map(|g| {
                    Some(LogGroup {
                        name: g.log_group_name?,
                        retention_days: g.retention_in_days,
                        created_at: g.creation_time,
                        stored_bytes: g.stored_bytes,
                    })
                })
                .collect(),
            next: out.next_token,
        })
    }

    async fn list_streams(
        &self,
        group: &str,
        next: Option<String>,
    ) -> Result<Page<LogStream>, ServiceError> {
        let out = self
            .client
            .describe_log_streams()
            .log_group_name(group)
            .set_next_token(next)
            .send()
            .await
            .map_err(|e| service_error("DescribeLogStreams", e))?;

        Ok(Page {
            items: out
                .log_streams
                .unwrap_or_default()
                .into_iter()
                .filter_map(|s| {
                    Some(LogStream {
                        name: s.log_stream_name?,
                        first_event_at: s.first_event_timestamp,
                        last_event_at: s.last_event_timestamp,
                    })
                })
                .collect(),
            next: out.next_token,
        })
    }

    async fn get_events(
        &self,
        group: &str,
        stream: &str,
        token: Option<String>,
        limit: Option<i32>,
    ) -> Result<EventPage, ServiceError> {
        let out = self
            .client
            .get_log_events()
            .log_group_name(group)
            .log_stream_name(stream)
            .start_from_head(true)
            .set_next_token(token)
            .set_limit(limit)
            .send()
            .await
            .map_err(|e| service_error("GetLogEvents", e))?;

        Ok(EventPage {
            events: out
                .events
                .unwrap_or_default()
                .into_iter()
                .map(|e| LogEvent {
                    timestamp: e.timestamp.unwrap_or_default(),
                    message: e.message.unwrap_or_default(),
                })
                .collect(),
            next_forward_token: out.next_forward_token,
        })
    }

    async fn delete_group(&self, group: &str) -> Result<(), ServiceError> {
        self.client
            .delete_log_group()
            .log_group_name(group)
            .send()
            .await
            .map_err(|e| service_error("DeleteLogGroup", e))?;
        Ok(())
    }
}
