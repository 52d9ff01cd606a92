//! Store client seam
//!
//! `StoreClient` is the boundary between the CRUD layer and the underlying
//! partition/sort-key store. The production implementation talks to
//! DynamoDB; `MemoryStoreClient` backs tests and local runs, and
//! `AcceleratedStoreClient` wraps any client with a read-through item
//! cache (the cache-accelerated execution path).
//!
//! Requests cross this seam as typed structures (`KeyCondition`, `Update`,
//! `WriteCondition`), not rendered expression strings; each backend renders
//! or evaluates them natively. Failures cross it as `StoreFailure` with an
//! enumerable `FailureCode`, which is all the retry classifier looks at.

pub mod cache;
pub mod dynamodb;
pub mod memory;

use crate::error::StoreError;
use crate::expr::{KeyCondition, Update};
use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use std::collections::HashMap;
use std::fmt::Debug;
use thiserror::Error;

pub use cache::{AcceleratedStoreClient, CacheStats};
pub use dynamodb::{DynamoConfig, DynamoStoreClient};
pub use memory::MemoryStoreClient;

/// A stored item: named attributes
pub type Item = HashMap<String, AttributeValue>;

/// Result type for store client operations
pub type StoreResult<T> = std::result::Result<T, StoreFailure>;

/// Two-part primary key addressing a record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    pub pk: String,
    pub sk: String,
}

impl Key {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }
}

/// Server-evaluated predicate attached to a write
#[derive(Debug, Clone)]
pub enum WriteCondition {
    /// Accept only if no record exists at the key
    NotExists,
    /// Accept only if a record exists at the key
    Exists,
    /// Caller-supplied condition expression with placeholder maps
    Expression {
        expression: String,
        names: HashMap<String, String>,
        values: HashMap<String, AttributeValue>,
    },
}

/// One page request against a table or index
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub key: KeyCondition,
    /// Secondary index to query instead of the table
    pub index: Option<String>,
    /// Post-read filter, passed through to the store
    pub filter: Option<crate::expr::FilterExpression>,
    pub projection: Option<Vec<String>>,
    /// Page size; `None` lets the store choose
    pub limit: Option<i32>,
    pub consistent: bool,
    /// Native last-key to resume from
    pub start_key: Option<Item>,
}

impl QueryRequest {
    pub fn new(key: KeyCondition) -> Self {
        Self {
            key,
            index: None,
            filter: None,
            projection: None,
            limit: None,
            consistent: false,
            start_key: None,
        }
    }
}

/// One page of query results plus the native resume position
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub items: Vec<Item>,
    /// Present when more pages remain
    pub last_key: Option<Item>,
}

/// One operation inside a transactional write
#[derive(Debug, Clone)]
pub enum TransactWriteOp {
    Put {
        item: Item,
        condition: Option<WriteCondition>,
    },
    Update {
        key: Key,
        update: Update,
        condition: Option<WriteCondition>,
    },
    Delete {
        key: Key,
        condition: Option<WriteCondition>,
    },
}

/// Independent puts and deletes for one best-effort batch write
#[derive(Debug, Clone, Default)]
pub struct BatchWriteRequest {
    pub puts: Vec<Item>,
    pub deletes: Vec<Key>,
}

impl BatchWriteRequest {
    pub fn len(&self) -> usize {
        self.puts.len() + self.deletes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.puts.is_empty() && self.deletes.is_empty()
    }
}

/// Keys the store did not process in a batch write
#[derive(Debug, Clone, Default)]
pub struct BatchWriteOutcome {
    pub unprocessed_puts: Vec<Key>,
    pub unprocessed_deletes: Vec<Key>,
}

/// Items found by a batch get plus the keys the store did not process
#[derive(Debug, Clone, Default)]
pub struct BatchGetOutcome {
    pub items: Vec<Item>,
    pub unprocessed: Vec<Key>,
}

/// Enumerable failure condition reported by a store client
///
/// This is the complete classification input: the retry wrapper decides
/// what to do with a failed attempt from this code alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCode {
    /// Request rejected as invalid by the store
    ValidationFailed,
    /// Request could not be serialized or was structurally malformed
    MalformedRequest,
    /// Table or index does not exist
    ResourceNotFound,
    /// Table is being created, updated, or deleted
    ResourceInUse,
    /// A conditional write's predicate did not hold
    ConditionalCheckFailed,
    /// Item is contended by another in-flight transaction
    TransactionConflict,
    /// A transactional batch was cancelled; see `StoreFailure::cancellation`
    TransactionCanceled,
    /// An idempotent transaction with this token is still running
    TransactionInProgress,
    /// Request token reused with a different payload
    IdempotencyMismatch,
    /// Provisioned table throughput exceeded
    ProvisionedThroughputExceeded,
    /// Account-level request rate exceeded
    RequestLimitExceeded,
    /// Account or table limit exceeded
    LimitExceeded,
    /// Local secondary index item-collection size exceeded
    ItemCollectionSizeLimitExceeded,
    /// Request throttled
    Throttling,
    /// Store-internal server fault
    InternalServerError,
    /// Store temporarily unavailable
    ServiceUnavailable,
    /// Attempt exceeded the per-call timeout
    Timeout,
    /// Connection could not be established or was dropped
    Connection,
    /// Placeholder for "this transaction item did not fail"
    None,
    /// Unrecognized failure
    Unknown,
}

/// A failed store operation
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StoreFailure {
    pub code: FailureCode,
    pub message: String,
    /// For cancelled transactions: per-item failure codes in operation
    /// order (`FailureCode::None` for items that did not fail)
    pub cancellation: Vec<FailureCode>,
}

impl StoreFailure {
    pub fn new(code: FailureCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cancellation: Vec::new(),
        }
    }

    /// Timeout failure for a named operation
    pub fn timeout(operation: &str) -> Self {
        Self::new(
            FailureCode::Timeout,
            format!("{operation} timed out before the store responded"),
        )
    }
}

impl From<StoreFailure> for StoreError {
    fn from(failure: StoreFailure) -> Self {
        match failure.code {
            FailureCode::ConditionalCheckFailed => StoreError::conflict(failure.message),
            FailureCode::ValidationFailed
            | FailureCode::MalformedRequest
            | FailureCode::IdempotencyMismatch => StoreError::validation(failure.message),
            FailureCode::ResourceNotFound => StoreError::not_found(failure.message),
            FailureCode::TransactionConflict
            | FailureCode::TransactionCanceled
            | FailureCode::TransactionInProgress => {
                StoreError::transaction_aborted(failure.message)
            }
            FailureCode::ProvisionedThroughputExceeded
            | FailureCode::RequestLimitExceeded
            | FailureCode::LimitExceeded
            | FailureCode::ItemCollectionSizeLimitExceeded
            | FailureCode::Throttling => StoreError::capacity(failure.message),
            FailureCode::InternalServerError
            | FailureCode::ServiceUnavailable
            | FailureCode::Timeout
            | FailureCode::Connection => StoreError::transient(failure.message),
            FailureCode::ResourceInUse | FailureCode::None | FailureCode::Unknown => {
                StoreError::storage(failure.message)
            }
        }
    }
}

/// Generic single-item and batch primitives of the underlying store
///
/// The CRUD layer composes these; it never reimplements them. Batch and
/// transaction size ceilings are validated by the caller before any of
/// these methods are invoked.
#[async_trait]
pub trait StoreClient: Debug + Send + Sync {
    /// Put an item, optionally guarded by a condition
    async fn conditional_put(
        &self,
        table: &str,
        item: Item,
        condition: Option<&WriteCondition>,
    ) -> StoreResult<()>;

    /// Apply update actions to one item
    async fn update(
        &self,
        table: &str,
        key: &Key,
        update: &Update,
        condition: Option<&WriteCondition>,
    ) -> StoreResult<()>;

    /// Delete one item
    async fn delete(&self, table: &str, key: &Key) -> StoreResult<()>;

    /// Read one item
    async fn get(
        &self,
        table: &str,
        key: &Key,
        consistent: bool,
        projection: Option<&[String]>,
    ) -> StoreResult<Option<Item>>;

    /// Run one page of a query
    async fn query(&self, table: &str, request: &QueryRequest) -> StoreResult<QueryPage>;

    /// Best-effort batch of independent puts and deletes (≤25 items)
    async fn batch_write(
        &self,
        table: &str,
        request: &BatchWriteRequest,
    ) -> StoreResult<BatchWriteOutcome>;

    /// Batch read (≤100 keys)
    async fn batch_get(
        &self,
        table: &str,
        keys: &[Key],
        consistent: bool,
        projection: Option<&[String]>,
    ) -> StoreResult<BatchGetOutcome>;

    /// Isolated read of up to 25 items
    async fn transact_get(&self, table: &str, keys: &[Key]) -> StoreResult<Vec<Option<Item>>>;

    /// All-or-nothing write of up to 25 operations
    async fn transact_write(&self, table: &str, ops: &[TransactWriteOp]) -> StoreResult<()>;
}
