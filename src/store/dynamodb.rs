//! DynamoDB store client
//!
//! Implements `StoreClient` over `aws-sdk-dynamodb`. Typed conditions,
//! key conditions, and update actions are rendered to expression strings
//! with placeholder maps here; nothing above this module handles the
//! expression grammar. SDK-level retries are disabled: the retry wrapper
//! owns the retry policy, so every SDK call is a single attempt.

use super::{
    BatchGetOutcome, BatchWriteOutcome, BatchWriteRequest, FailureCode, Item, Key, QueryPage,
    QueryRequest, StoreClient, StoreFailure, StoreResult, TransactWriteOp, WriteCondition,
};
use crate::schema::{ATTR_PK, ATTR_SK};
use async_trait::async_trait;
use aws_sdk_dynamodb::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{
    AttributeValue, Delete, Get, KeysAndAttributes, Put, TransactGetItem, TransactWriteItem,
    Update as UpdateItem, WriteRequest,
};
use aws_sdk_dynamodb::Client;
use aws_smithy_types::retry::RetryConfig;
use aws_smithy_types::timeout::TimeoutConfig;
use std::collections::HashMap;
use std::time::Duration;

/// DynamoDB client configuration
#[derive(Debug, Clone, Default)]
pub struct DynamoConfig {
    /// AWS region override (uses SDK default if not specified)
    pub region: Option<String>,
    /// Optional endpoint override (e.g. LocalStack)
    pub endpoint: Option<String>,
    /// Per-request timeout in milliseconds applied at the SDK layer
    pub timeout_ms: Option<u64>,
}

/// DynamoDB-backed store client
#[derive(Clone)]
pub struct DynamoStoreClient {
    client: Client,
}

impl std::fmt::Debug for DynamoStoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoStoreClient").finish()
    }
}

impl DynamoStoreClient {
    /// Create a new DynamoDB store client
    ///
    /// Builds the DynamoDB config by inheriting from `SdkConfig`
    /// (preserves HTTP client, endpoints, sleep impl) then applies the
    /// overrides. SDK retries are disabled; the layer above classifies
    /// and retries.
    pub fn new(sdk_config: &aws_config::SdkConfig, config: DynamoConfig) -> Self {
        let mut builder = aws_sdk_dynamodb::config::Builder::from(sdk_config)
            .retry_config(RetryConfig::disabled());

        if let Some(region) = config.region {
            builder = builder.region(aws_sdk_dynamodb::config::Region::new(region));
        }

        if let Some(endpoint) = config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        if let Some(timeout_ms) = config.timeout_ms {
            let timeout_config = TimeoutConfig::builder()
                .operation_attempt_timeout(Duration::from_millis(timeout_ms))
                .build();
            builder = builder.timeout_config(timeout_config);
        }

        Self {
            client: Client::from_conf(builder.build()),
        }
    }

    /// Create from a pre-built client (for testing)
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

/// Map a service error code string to the enumerable failure code
///
/// Covers both the long exception names the service reports on whole
/// requests and the short reason codes it reports per cancelled
/// transaction item.
fn failure_code_from_str(code: &str) -> FailureCode {
    match code {
        "ConditionalCheckFailedException" | "ConditionalCheckFailed" => {
            FailureCode::ConditionalCheckFailed
        }
        "ValidationException" | "ValidationError" => FailureCode::ValidationFailed,
        "SerializationException" | "InvalidParameterValueException"
        | "MissingParameterException" => FailureCode::MalformedRequest,
        "ResourceNotFoundException" => FailureCode::ResourceNotFound,
        "ResourceInUseException" => FailureCode::ResourceInUse,
        "TransactionConflictException" | "TransactionConflict" => FailureCode::TransactionConflict,
        "TransactionCanceledException" => FailureCode::TransactionCanceled,
        "TransactionInProgressException" => FailureCode::TransactionInProgress,
        "IdempotentParameterMismatchException" => FailureCode::IdempotencyMismatch,
        "ProvisionedThroughputExceededException" | "ProvisionedThroughputExceeded" => {
            FailureCode::ProvisionedThroughputExceeded
        }
        "RequestLimitExceeded" => FailureCode::RequestLimitExceeded,
        "LimitExceededException" => FailureCode::LimitExceeded,
        "ItemCollectionSizeLimitExceededException" | "ItemCollectionSizeLimitExceeded" => {
            FailureCode::ItemCollectionSizeLimitExceeded
        }
        "ThrottlingException"
        | "ThrottlingError"
        | "Throttling"
        | "RequestThrottled"
        | "RequestThrottledException"
        | "TooManyRequestsException"
        | "SlowDown" => FailureCode::Throttling,
        "InternalServerError" | "InternalFailure" | "InternalError" => {
            FailureCode::InternalServerError
        }
        "ServiceUnavailable" | "ServiceUnavailableException" => FailureCode::ServiceUnavailable,
        "RequestTimeout" | "RequestTimeoutException" => FailureCode::Timeout,
        "None" => FailureCode::None,
        _ => FailureCode::Unknown,
    }
}

/// Map an SDK error into a store failure
fn map_sdk_error<E>(operation: &str, err: &SdkError<E>) -> StoreFailure
where
    E: ProvideErrorMetadata,
{
    match err {
        SdkError::ServiceError(service_err) => {
            let meta = service_err.err().meta();
            let code = meta.code().unwrap_or("Unknown");
            let message = meta.message().unwrap_or("no message");
            StoreFailure::new(
                failure_code_from_str(code),
                format!("DynamoDB {operation} failed: {code}: {message}"),
            )
        }
        SdkError::TimeoutError(_) => StoreFailure::new(
            FailureCode::Timeout,
            format!("DynamoDB {operation} timed out"),
        ),
        SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => StoreFailure::new(
            FailureCode::Connection,
            format!("DynamoDB {operation} connection failure"),
        ),
        SdkError::ConstructionFailure(_) => StoreFailure::new(
            FailureCode::MalformedRequest,
            format!("DynamoDB {operation} request could not be constructed"),
        ),
        _ => StoreFailure::new(
            FailureCode::Unknown,
            format!("DynamoDB {operation} failed unexpectedly"),
        ),
    }
}

/// Failure for a request the SDK refused to build client-side
fn build_failure(operation: &str, err: impl std::fmt::Display) -> StoreFailure {
    StoreFailure::new(
        FailureCode::MalformedRequest,
        format!("DynamoDB {operation} request invalid: {err}"),
    )
}

fn key_map(key: &Key) -> Item {
    let mut map = Item::with_capacity(2);
    map.insert(ATTR_PK.to_string(), AttributeValue::S(key.pk.clone()));
    map.insert(ATTR_SK.to_string(), AttributeValue::S(key.sk.clone()));
    map
}

fn extract_key(item: &Item) -> Key {
    let pk = item
        .get(ATTR_PK)
        .and_then(|v| v.as_s().ok())
        .cloned()
        .unwrap_or_default();
    let sk = item
        .get(ATTR_SK)
        .and_then(|v| v.as_s().ok())
        .cloned()
        .unwrap_or_default();
    Key::new(pk, sk)
}

/// Render a write condition with `#c`-prefixed placeholders so it merges
/// cleanly with update/projection placeholder maps
fn render_condition(
    condition: &WriteCondition,
) -> (String, HashMap<String, String>, HashMap<String, AttributeValue>) {
    match condition {
        WriteCondition::NotExists => (
            "attribute_not_exists(#c_pk)".to_string(),
            HashMap::from([("#c_pk".to_string(), ATTR_PK.to_string())]),
            HashMap::new(),
        ),
        WriteCondition::Exists => (
            "attribute_exists(#c_pk)".to_string(),
            HashMap::from([("#c_pk".to_string(), ATTR_PK.to_string())]),
            HashMap::new(),
        ),
        WriteCondition::Expression {
            expression,
            names,
            values,
        } => (expression.clone(), names.clone(), values.clone()),
    }
}

/// Render a projection list with `#p`-prefixed placeholders
fn render_projection(names: &mut HashMap<String, String>, attrs: &[String]) -> String {
    attrs
        .iter()
        .enumerate()
        .map(|(i, attr)| {
            let placeholder = format!("#p{i}");
            names.insert(placeholder.clone(), attr.clone());
            placeholder
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn optional<K, V>(map: HashMap<K, V>) -> Option<HashMap<K, V>> {
    if map.is_empty() {
        None
    } else {
        Some(map)
    }
}

#[async_trait]
impl StoreClient for DynamoStoreClient {
    async fn conditional_put(
        &self,
        table: &str,
        item: Item,
        condition: Option<&WriteCondition>,
    ) -> StoreResult<()> {
        let mut request = self
            .client
            .put_item()
            .table_name(table)
            .set_item(Some(item));

        if let Some(condition) = condition {
            let (expression, names, values) = render_condition(condition);
            request = request
                .condition_expression(expression)
                .set_expression_attribute_names(optional(names))
                .set_expression_attribute_values(optional(values));
        }

        request
            .send()
            .await
            .map_err(|e| map_sdk_error("PutItem", &e))?;
        Ok(())
    }

    async fn update(
        &self,
        table: &str,
        key: &Key,
        update: &crate::expr::Update,
        condition: Option<&WriteCondition>,
    ) -> StoreResult<()> {
        let rendered = update.render();
        let mut names = rendered.names;
        let mut values = rendered.values;

        let mut request = self
            .client
            .update_item()
            .table_name(table)
            .set_key(Some(key_map(key)))
            .update_expression(rendered.expression);

        if let Some(condition) = condition {
            let (expression, cond_names, cond_values) = render_condition(condition);
            names.extend(cond_names);
            values.extend(cond_values);
            request = request.condition_expression(expression);
        }

        request
            .set_expression_attribute_names(optional(names))
            .set_expression_attribute_values(optional(values))
            .send()
            .await
            .map_err(|e| map_sdk_error("UpdateItem", &e))?;
        Ok(())
    }

    async fn delete(&self, table: &str, key: &Key) -> StoreResult<()> {
        self.client
            .delete_item()
            .table_name(table)
            .set_key(Some(key_map(key)))
            .send()
            .await
            .map_err(|e| map_sdk_error("DeleteItem", &e))?;
        Ok(())
    }

    async fn get(
        &self,
        table: &str,
        key: &Key,
        consistent: bool,
        projection: Option<&[String]>,
    ) -> StoreResult<Option<Item>> {
        let mut request = self
            .client
            .get_item()
            .table_name(table)
            .set_key(Some(key_map(key)))
            .consistent_read(consistent);

        if let Some(attrs) = projection {
            let mut names = HashMap::new();
            let expression = render_projection(&mut names, attrs);
            request = request
                .projection_expression(expression)
                .set_expression_attribute_names(optional(names));
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_sdk_error("GetItem", &e))?;
        Ok(response.item)
    }

    async fn query(&self, table: &str, request: &QueryRequest) -> StoreResult<QueryPage> {
        let rendered = request.key.render();
        let mut names = rendered.names;
        let mut values = rendered.values;

        let mut builder = self
            .client
            .query()
            .table_name(table)
            .key_condition_expression(rendered.expression)
            .consistent_read(request.consistent)
            .set_index_name(request.index.clone())
            .set_limit(request.limit)
            .set_exclusive_start_key(request.start_key.clone());

        if let Some(filter) = &request.filter {
            names.extend(filter.names.clone());
            values.extend(filter.values.clone());
            builder = builder.filter_expression(filter.expression.clone());
        }

        if let Some(attrs) = &request.projection {
            let expression = render_projection(&mut names, attrs);
            builder = builder.projection_expression(expression);
        }

        let response = builder
            .set_expression_attribute_names(optional(names))
            .set_expression_attribute_values(optional(values))
            .send()
            .await
            .map_err(|e| map_sdk_error("Query", &e))?;

        let last_key = response
            .last_evaluated_key
            .filter(|key| !key.is_empty());
        Ok(QueryPage {
            items: response.items.unwrap_or_default(),
            last_key,
        })
    }

    async fn batch_write(
        &self,
        table: &str,
        request: &BatchWriteRequest,
    ) -> StoreResult<BatchWriteOutcome> {
        let mut writes = Vec::with_capacity(request.len());
        for item in &request.puts {
            let put = aws_sdk_dynamodb::types::PutRequest::builder()
                .set_item(Some(item.clone()))
                .build()
                .map_err(|e| build_failure("BatchWriteItem", e))?;
            writes.push(WriteRequest::builder().put_request(put).build());
        }
        for key in &request.deletes {
            let delete = aws_sdk_dynamodb::types::DeleteRequest::builder()
                .set_key(Some(key_map(key)))
                .build()
                .map_err(|e| build_failure("BatchWriteItem", e))?;
            writes.push(WriteRequest::builder().delete_request(delete).build());
        }

        let response = self
            .client
            .batch_write_item()
            .request_items(table, writes)
            .send()
            .await
            .map_err(|e| map_sdk_error("BatchWriteItem", &e))?;

        let mut outcome = BatchWriteOutcome::default();
        if let Some(unprocessed) = response.unprocessed_items {
            for write in unprocessed.into_values().flatten() {
                if let Some(put) = write.put_request {
                    outcome.unprocessed_puts.push(extract_key(put.item()));
                }
                if let Some(delete) = write.delete_request {
                    outcome.unprocessed_deletes.push(extract_key(delete.key()));
                }
            }
        }
        Ok(outcome)
    }

    async fn batch_get(
        &self,
        table: &str,
        keys: &[Key],
        consistent: bool,
        projection: Option<&[String]>,
    ) -> StoreResult<BatchGetOutcome> {
        let mut builder = KeysAndAttributes::builder()
            .set_keys(Some(keys.iter().map(key_map).collect()))
            .consistent_read(consistent);

        if let Some(attrs) = projection {
            let mut names = HashMap::new();
            let expression = render_projection(&mut names, attrs);
            builder = builder
                .projection_expression(expression)
                .set_expression_attribute_names(optional(names));
        }

        let keys_and_attributes = builder
            .build()
            .map_err(|e| build_failure("BatchGetItem", e))?;

        let response = self
            .client
            .batch_get_item()
            .request_items(table, keys_and_attributes)
            .send()
            .await
            .map_err(|e| map_sdk_error("BatchGetItem", &e))?;

        let mut outcome = BatchGetOutcome::default();
        if let Some(responses) = response.responses {
            for items in responses.into_values() {
                outcome.items.extend(items);
            }
        }
        if let Some(unprocessed) = response.unprocessed_keys {
            for keys_and_attrs in unprocessed.into_values() {
                for key in keys_and_attrs.keys() {
                    outcome.unprocessed.push(extract_key(key));
                }
            }
        }
        Ok(outcome)
    }

    async fn transact_get(&self, table: &str, keys: &[Key]) -> StoreResult<Vec<Option<Item>>> {
        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            let get = Get::builder()
                .table_name(table)
                .set_key(Some(key_map(key)))
                .build()
                .map_err(|e| build_failure("TransactGetItems", e))?;
            items.push(TransactGetItem::builder().get(get).build());
        }

        let response = self
            .client
            .transact_get_items()
            .set_transact_items(Some(items))
            .send()
            .await
            .map_err(|e| map_sdk_error("TransactGetItems", &e))?;

        Ok(response
            .responses
            .unwrap_or_default()
            .into_iter()
            .map(|r| r.item)
            .collect())
    }

    async fn transact_write(&self, table: &str, ops: &[TransactWriteOp]) -> StoreResult<()> {
        let mut items = Vec::with_capacity(ops.len());
        for op in ops {
            let item = match op {
                TransactWriteOp::Put { item, condition } => {
                    let mut builder = Put::builder().table_name(table).set_item(Some(item.clone()));
                    if let Some(condition) = condition {
                        let (expression, names, values) = render_condition(condition);
                        builder = builder
                            .condition_expression(expression)
                            .set_expression_attribute_names(optional(names))
                            .set_expression_attribute_values(optional(values));
                    }
                    let put = builder
                        .build()
                        .map_err(|e| build_failure("TransactWriteItems", e))?;
                    TransactWriteItem::builder().put(put).build()
                }
                TransactWriteOp::Update {
                    key,
                    update,
                    condition,
                } => {
                    let rendered = update.render();
                    let mut names = rendered.names;
                    let mut values = rendered.values;
                    let mut builder = UpdateItem::builder()
                        .table_name(table)
                        .set_key(Some(key_map(key)))
                        .update_expression(rendered.expression);
                    if let Some(condition) = condition {
                        let (expression, cond_names, cond_values) = render_condition(condition);
                        names.extend(cond_names);
                        values.extend(cond_values);
                        builder = builder.condition_expression(expression);
                    }
                    let update = builder
                        .set_expression_attribute_names(optional(names))
                        .set_expression_attribute_values(optional(values))
                        .build()
                        .map_err(|e| build_failure("TransactWriteItems", e))?;
                    TransactWriteItem::builder().update(update).build()
                }
                TransactWriteOp::Delete { key, condition } => {
                    let mut builder = Delete::builder()
                        .table_name(table)
                        .set_key(Some(key_map(key)));
                    if let Some(condition) = condition {
                        let (expression, names, values) = render_condition(condition);
                        builder = builder
                            .condition_expression(expression)
                            .set_expression_attribute_names(optional(names))
                            .set_expression_attribute_values(optional(values));
                    }
                    let delete = builder
                        .build()
                        .map_err(|e| build_failure("TransactWriteItems", e))?;
                    TransactWriteItem::builder().delete(delete).build()
                }
            };
            items.push(item);
        }

        let result = self
            .client
            .transact_write_items()
            .set_transact_items(Some(items))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let mut failure = map_sdk_error("TransactWriteItems", &e);
                // Per-item cancellation reasons let the composer tell a
                // unique-value collision apart from a generic abort.
                if let Some(TransactWriteItemsError::TransactionCanceledException(cancelled)) =
                    e.as_service_error()
                {
                    failure.cancellation = cancelled
                        .cancellation_reasons()
                        .iter()
                        .map(|reason| failure_code_from_str(reason.code().unwrap_or("None")))
                        .collect();
                }
                Err(failure)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_code_mapping_covers_service_names() {
        assert_eq!(
            failure_code_from_str("ConditionalCheckFailedException"),
            FailureCode::ConditionalCheckFailed
        );
        assert_eq!(
            failure_code_from_str("ProvisionedThroughputExceededException"),
            FailureCode::ProvisionedThroughputExceeded
        );
        assert_eq!(
            failure_code_from_str("ThrottlingException"),
            FailureCode::Throttling
        );
        assert_eq!(
            failure_code_from_str("TransactionCanceledException"),
            FailureCode::TransactionCanceled
        );
        assert_eq!(failure_code_from_str("None"), FailureCode::None);
        assert_eq!(failure_code_from_str("SomethingNew"), FailureCode::Unknown);
    }

    #[test]
    fn test_render_condition_placeholders() {
        let (expr, names, values) = render_condition(&WriteCondition::NotExists);
        assert_eq!(expr, "attribute_not_exists(#c_pk)");
        assert_eq!(names["#c_pk"], ATTR_PK);
        assert!(values.is_empty());
    }

    #[test]
    fn test_render_projection() {
        let mut names = HashMap::new();
        let expr = render_projection(
            &mut names,
            &["email".to_string(), "created_at".to_string()],
        );
        assert_eq!(expr, "#p0, #p1");
        assert_eq!(names["#p1"], "created_at");
    }

    #[test]
    fn test_extract_key_round_trip() {
        let key = Key::new("ORG#1", "PROFILE");
        assert_eq!(extract_key(&key_map(&key)), key);
    }
}
