//! DynamoDB implementation of [`TableService`].

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::config::http::HttpResponse;
use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::{
    AttributeValue, DeleteRequest, KeyType, PutRequest, Select, WriteRequest as SdkWriteRequest,
};
use common::ServiceError;

use crate::item::{Item, ItemValue, KeySchema};
use crate::service::{
    CountPage, ScanPage, ScanRequest, TableDescriptor, TableNamePage, TableService, TableStatus,
    WriteRequest,
};

pub struct DynamoDbTableService {
    client: Client,
}

impl DynamoDbTableService {
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

fn to_attribute(value: &ItemValue) -> AttributeValue {
    match value {
        ItemValue::S(s) => AttributeValue::S(s.clone()),
        ItemValue::N(n) => AttributeValue::N(n.clone()),
        ItemValue::B(b) => AttributeValue::B(Blob::new(b.clone())),
        ItemValue::Bool(b) => AttributeValue::Bool(*b),
        ItemValue::Null => AttributeValue::Null(true),
        ItemValue::L(items) => AttributeValue::L(items.iter().map(to_attribute).collect()),
        ItemValue::M(map) => AttributeValue::M(to_attribute_map(map)),
        ItemValue::Ss(items) => AttributeValue::Ss(items.clone()),
        ItemValue::Ns(items) => AttributeValue::Ns(items.clone()),
        ItemValue::Bs(items) => {
            AttributeValue::Bs(items.iter().map(|b| Blob::new(b.clone())).collect())
        }
    }
}

fn to_attribute_map(item: &BTreeMap<String, ItemValue>) -> HashMap<String, AttributeValue> {
    item.iter()
        .map(|(k, v)| (k.clone(), to_attribute(v)))
        .collect()
}

fn from_attribute(operation: &'static str, value: AttributeValue) -> Result<ItemValue, ServiceError> {
    Ok(match value {
        AttributeValue::S(s) => ItemValue::S(s),
        AttributeValue::N(n) => ItemValue::N(n),
        AttributeValue::B(b) => ItemValue::B(b.into_inner()),
        AttributeValue::Bool(b) => ItemValue::Bool(b),
        AttributeValue::Null(_) => ItemValue::Null,
        AttributeValue::L(items) => ItemValue::L(
            items
                .into_iter()
                .map(|v| from_attribute(operation, v))
                .collect::<Result<_, _>>()?,
        ),
        AttributeValue::M(map) => ItemValue::M(from_attribute_map(operation, map)?),
        AttributeValue::Ss(items) => ItemValue::Ss(items),
        AttributeValue::Ns(items) => ItemValue::Ns(items),
        AttributeValue::Bs(items) => ItemValue::Bs(items.into_iter().map(Blob::into_inner).collect()),
        other => {
            return Err(ServiceError::validation(
                operation,
                format!("unsupported attribute value {other:?}"),
            ));
        }
    })
}

fn from_attribute_map(
    operation: &'static str,
    map: HashMap<String, AttributeValue>,
) -> Result<Item, ServiceError> {
    map.into_iter()
        .map(|(k, v)| from_attribute(operation, v).map(|v| (k, v)))
        .collect()
}

/// An empty continuation key means the scan is complete.
fn continuation(
    operation: &'static str,
    key: Option<HashMap<String, AttributeValue>>,
) -> Result<Option<Item>, ServiceError> {
    match key {
        Some(key) if !key.is_empty() => Ok(Some(from_attribute_map(operation, key)?)),
        _ => Ok(None),
    }
}

fn to_sdk_write(request: &WriteRequest) -> Result<SdkWriteRequest, ServiceError> {
    let built = match request {
        WriteRequest::Put(item) => PutRequest::builder()
            .set_item(Some(to_attribute_map(item)))
            .build()
            .map(|put| SdkWriteRequest::builder().put_request(put).build()),
        WriteRequest::Delete(key) => DeleteRequest::builder()
            .set_key(Some(to_attribute_map(key)))
            .build()
            .map(|delete| SdkWriteRequest::builder().delete_request(delete).build()),
    };
    built.map_err(|e| ServiceError::validation("BatchWriteItem", e.to_string()))
}

fn from_sdk_write(request: SdkWriteRequest) -> Result<WriteRequest, ServiceError> {
    const OP: &str = "BatchWriteItem";
    if let Some(put) = request.put_request {
        return Ok(WriteRequest::Put(from_attribute_map(OP, put.item)?));
    }
    if let Some(delete) = request.delete_request {
        return Ok(WriteRequest::Delete(from_attribute_map(OP, delete.key)?));
    }
    Err(ServiceError::validation(
        OP,
        "unprocessed request carries neither put nor delete",
    ))
}

#[async_trait]
impl TableService for DynamoDbTableService {
    async fn list_tables(&self, start: Option<String>) -> Result<TableNamePage, ServiceError> {
        let out = self
            .client
            .list_tables()
            .set_exclusive_start_table_name(start)
            .send()
            .await
            .map_err(|e| service_error("ListTables", e))?;

        Ok(TableNamePage {
            names: out.table_names.unwrap_or_default(),
            next: out.last_evaluated_table_name,
        })
    }

    async fn describe_table(&self, table: &str) -> Result<TableDescriptor, ServiceError> {
        const OP: &str = "DescribeTable";
        let out = self
            .client
            .describe_table()
            .table_name(table)
            .send()
            .await
            .map_err(|e| service_error(OP, e))?;

        let description = out
            .table
            .ok_or_else(|| ServiceError::not_found(OP, format!("no description for {table}")))?;

        let mut partition_key = None;
        let mut sort_key = None;
        for element in description.key_schema.unwrap_or_default() {
            match element.key_type {
                KeyType::Hash => partition_key = Some(element.attribute_name),
                KeyType::Range => sort_key = Some(element.attribute_name),
                _ => {}
            }
        }
        let partition_key = partition_key
            .ok_or_else(|| ServiceError::validation(OP, format!("{table} has no partition key")))?;

        Ok(TableDescriptor {
            name: description.table_name.unwrap_or_else(|| table.to_string()),
            key_schema: KeySchema {
                partition_key,
                sort_key,
            },
            status: description
                .table_status
                .map(|s| TableStatus::parse(s.as_str()))
                .unwrap_or_else(|| TableStatus::Other("UNKNOWN".to_string())),
            item_count_estimate: description.item_count,
        })
    }

    async fn scan(&self, request: ScanRequest) -> Result<ScanPage, ServiceError> {
        const OP: &str = "Scan";
        let mut builder = self
            .client
            .scan()
            .table_name(&request.table)
            .set_limit(request.limit)
            .set_exclusive_start_key(request.exclusive_start_key.as_ref().map(to_attribute_map));

        // Placeholders keep reserved words such as `name` usable as key attributes
        if let Some(projection) = &request.projection {
            let placeholders: Vec<String> =
                (0..projection.len()).map(|i| format!("#p{i}")).collect();
            builder = builder.projection_expression(placeholders.join(", "));
            for (placeholder, attribute) in placeholders.iter().zip(projection) {
                builder = builder.expression_attribute_names(placeholder, attribute);
            }
        }

        let out = builder.send().await.map_err(|e| service_error(OP, e))?;

        Ok(ScanPage {
            items: out
                .items
                .unwrap_or_default()
                .into_iter()
                .map(|item| from_attribute_map(OP, item))
                .collect::<Result<_, _>>()?,
            last_evaluated_key: continuation(OP, out.last_evaluated_key)?,
        })
    }

    async fn count(&self, table: &str, start: Option<Item>) -> Result<CountPage, ServiceError> {
        const OP: &str = "Scan";
        let out = self
            .client
            .scan()
            .table_name(table)
            .select(Select::Count)
            .set_exclusive_start_key(start.as_ref().map(to_attribute_map))
            .send()
            .await
            .map_err(|e| service_error(OP, e))?;

        Ok(CountPage {
            count: out.count.max(0) as u64,
            last_evaluated_key: continuation(OP, out.last_evaluated_key)?,
        })
    }

    async fn batch_write(
        &self,
        table: &str,
        requests: Vec<WriteRequest>,
    ) -> Result<Vec<WriteRequest>, ServiceError> {
        let sdk_requests = requests
            .iter()
            .map(to_sdk_write)
            .collect::<Result<Vec<_>, _>>()?;

        let out = self
            .client
            .batch_write_item()
            .request_items(table, sdk_requests)
            .send()
            .await
            .map_err(|e| service_error("BatchWriteItem", e))?;

        out.unprocessed_items
            .unwrap_or_default()
            .remove(table)
            .unwrap_or_default()
            .into_iter()
            .map(from_sdk_write)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_conversion_keeps_nesting() {
        let item = Item::from([
            ("id".to_string(), ItemValue::string("v-1")),
            (
                "meta".to_string(),
                ItemValue::M(BTreeMap::from([(
                    "ids".to_string(),
                    ItemValue::Ns(vec!["1".into(), "2".into()]),
                )])),
            ),
            ("gone".to_string(), ItemValue::Null),
        ]);

        let back = from_attribute_map("Scan", to_attribute_map(&item)).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn test_write_request_conversion() {
        let key = Item::from([("id".to_string(), ItemValue::string("v-1"))]);
        let sdk = to_sdk_write(&WriteRequest::Delete(key.clone())).unwrap();
        assert!(sdk.put_request.is_none());
        assert_eq!(from_sdk_write(sdk).unwrap(), WriteRequest::Delete(key));
    }

    #[test]
    fn test_empty_continuation_ends_scan() {
        assert!(continuation("Scan", Some(HashMap::new())).unwrap().is_none());
        assert!(continuation("Scan", None).unwrap().is_none());
    }
}
