//! CRUD layer over DynamoDB-style partition/sort-key stores
//!
//! This crate layers the guarantees the raw store lacks on top of its
//! generic primitives:
//!
//! - **Unique secondary indexes**, emulated with sentinel records and
//!   conditional writes, reconciled transactionally with the owning
//!   record (`unique`, `compose`)
//! - **Classified bounded retry** with backoff, mapping every store
//!   failure into safe/unsafe-to-retry buckets (`retry`)
//! - **Transactional write composition** under the store's 25-item
//!   ceiling, validated client-side (`compose`)
//! - **Opaque pagination cursors** that round-trip the store's native
//!   last-key exactly (`cursor`)
//! - **A dual execution path**: direct, or accelerated through a
//!   read-through item cache (`store::cache`)
//!
//! ## Usage
//!
//! ```ignore
//! use dynastore::{Store, StoreConfig, ReadOptions};
//!
//! let store = Store::new();
//! store.open(StoreConfig::new("accounts")).await?;
//!
//! store.set(&profile, None).await?;
//! let item = store.get("APP#SVC#TENANT#42", "PROFILE", ReadOptions::default()).await?;
//! ```
//!
//! Domain types implement [`Record`] to describe their key pair, payload
//! attributes, and unique-field declarations. A record declaring unique
//! fields is always written transactionally together with its index
//! sentinels; a second writer claiming the same value gets a
//! duplicate-marked [`StoreError::Conflict`].

pub mod client;
pub mod compose;
pub mod cursor;
pub mod error;
pub mod expr;
pub mod record;
pub mod retry;
pub mod schema;
pub mod store;
pub mod unique;

// Re-export main types
pub use client::{BatchWriteReport, ReadOptions, Store, StoreConfig};
pub use error::{Result, StoreError};
pub use expr::{FilterExpression, KeyCondition, SortCondition, Update, UpdateAction};
pub use record::{Record, UniqueFieldSpec};
pub use retry::{OpClass, RetryPolicy, SuppressionPolicy};
pub use store::{
    AcceleratedStoreClient, BatchGetOutcome, DynamoConfig, DynamoStoreClient, FailureCode, Item,
    Key, MemoryStoreClient, QueryRequest, StoreClient, StoreFailure, WriteCondition,
};
pub use unique::UniqueFieldDescriptor;
