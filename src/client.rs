//! CRUD facade
//!
//! `Store` owns the lock-guarded connection state and exposes the public
//! operation set. Every operation snapshots the connection and settings
//! under a shared lock before executing, so `open`/`close` (which take
//! the exclusive lock) never race in-flight operations. All store calls
//! run through the retry wrapper; unique-field handling routes writes
//! through the transactional composer when descriptors are involved.

use crate::compose::{self, TransactionPlan};
use crate::cursor::{decode_cursor, encode_cursor};
use crate::error::{Result, StoreError};
use crate::expr::{Update, UpdateAction};
use crate::record::Record;
use crate::retry::{self, OpClass, RetryPolicy, SuppressionPolicy};
use crate::schema::{
    ATTR_CREATED_AT, ATTR_ORIGIN, ATTR_PK, ATTR_SK, ATTR_UNIQUE_FIELDS, ATTR_UPDATED_AT,
    ATTR_UPDATED_BY, AUDIT_ATTRIBUTES, MAX_BATCH_GET_ITEMS, MAX_TRANSACT_GET_ITEMS,
};
use crate::store::{
    AcceleratedStoreClient, BatchGetOutcome, DynamoConfig, DynamoStoreClient, Item, Key,
    QueryRequest, StoreClient, WriteCondition,
};
use crate::unique::{self, DescriptorMap};
use aws_sdk_dynamodb::types::AttributeValue;
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Global AWS SDK config cache
///
/// Caches the SDK config to avoid repeated credential resolution in
/// short-lived environments where cold start latency matters.
static SDK_CONFIG: OnceCell<aws_config::SdkConfig> = OnceCell::new();

async fn sdk_config() -> &'static aws_config::SdkConfig {
    if let Some(config) = SDK_CONFIG.get() {
        return config;
    }
    let loaded = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    SDK_CONFIG.get_or_init(|| loaded)
}

/// Regions where the cache-accelerated path is available
///
/// Built once at first use and never mutated afterwards.
static ACCELERATED_REGIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "us-east-1",
        "us-east-2",
        "us-west-1",
        "us-west-2",
        "ca-central-1",
        "sa-east-1",
        "eu-west-1",
        "eu-west-2",
        "eu-west-3",
        "eu-central-1",
        "eu-north-1",
        "ap-northeast-1",
        "ap-northeast-2",
        "ap-northeast-3",
        "ap-southeast-1",
        "ap-southeast-2",
        "ap-south-1",
        "ap-east-1",
    ]
    .into_iter()
    .collect()
});

/// True when the accelerated path can be opened in `region`
pub fn region_supports_acceleration(region: &str) -> bool {
    ACCELERATED_REGIONS.contains(region)
}

/// Connection settings for [`Store::open`]
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// AWS region (required for the accelerated path)
    pub region: Option<String>,
    /// Table name
    pub table: String,
    /// Optional endpoint override (e.g. LocalStack)
    pub endpoint: Option<String>,
    /// `Some(n)` opens the cache-accelerated path with an n-entry item
    /// cache; `None` opens the direct path
    pub accelerated_cache_entries: Option<usize>,
    /// Requested per-call timeout (clamped per operation class)
    pub timeout: Duration,
    /// Retries after the initial attempt, clamped to `[0, 10]`
    pub retries: u32,
    /// Whether suppressed failure classes really vanish on exhaustion
    pub suppression: SuppressionPolicy,
    /// Actor stamped into audit attributes on writes
    pub actor: String,
    /// Originating system stamped into audit attributes on writes
    pub origin: String,
}

impl StoreConfig {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            region: None,
            table: table.into(),
            endpoint: None,
            accelerated_cache_entries: None,
            timeout: Duration::from_secs(10),
            retries: retry::MAX_RETRIES,
            suppression: SuppressionPolicy::Default,
            actor: "system".to_string(),
            origin: "dynastore".to_string(),
        }
    }
}

/// Read options for `get` and `batch_get`
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub consistent: bool,
    /// Explicit projection; the audit attribute set is auto-appended
    pub projection: Option<Vec<String>>,
}

/// Outcome of a best-effort batch write
#[derive(Debug, Clone, Default)]
pub struct BatchWriteReport {
    /// Items the store applied
    pub succeeded: usize,
    /// Keys of puts to resubmit
    pub failed_puts: Vec<Key>,
    /// Keys of deletes to resubmit
    pub failed_deletes: Vec<Key>,
}

/// Snapshot of the active connection, cloned out under the shared lock
#[derive(Clone)]
struct ConnectionState {
    client: Arc<dyn StoreClient>,
    table: String,
    policy: RetryPolicy,
    actor: String,
    origin: String,
}

/// CRUD facade over a partition/sort-key store
///
/// Create with [`Store::new`], connect with [`Store::open`] (or
/// [`Store::open_with_client`] for a custom backend), then call the
/// operation methods. All methods are cheap to call concurrently; the
/// connection state is only locked long enough to snapshot it.
#[derive(Default)]
pub struct Store {
    state: RwLock<Option<ConnectionState>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let open = self.state.read().is_some();
        f.debug_struct("Store").field("open", &open).finish()
    }
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection against DynamoDB
    ///
    /// Chooses the direct or cache-accelerated execution path from the
    /// config. Acceleration requires an explicit region in the supported
    /// set.
    pub async fn open(&self, config: StoreConfig) -> Result<()> {
        if config.table.is_empty() {
            return Err(StoreError::validation("table name must not be empty"));
        }

        if config.accelerated_cache_entries.is_some() {
            let region = config.region.as_deref().ok_or_else(|| {
                StoreError::validation("the accelerated path requires an explicit region")
            })?;
            if !region_supports_acceleration(region) {
                return Err(StoreError::validation(format!(
                    "the accelerated path is not available in region '{region}'"
                )));
            }
        }

        let sdk = sdk_config().await;
        let dynamo = DynamoStoreClient::new(
            sdk,
            DynamoConfig {
                region: config.region.clone(),
                endpoint: config.endpoint.clone(),
                timeout_ms: None,
            },
        );
        let client: Arc<dyn StoreClient> = match config.accelerated_cache_entries {
            Some(entries) => Arc::new(AcceleratedStoreClient::new(Arc::new(dynamo), entries)),
            None => Arc::new(dynamo),
        };

        self.install(client, &config);
        tracing::info!(
            table = %config.table,
            accelerated = config.accelerated_cache_entries.is_some(),
            "store connection opened"
        );
        Ok(())
    }

    /// Open with a caller-provided store client (tests, custom backends)
    pub fn open_with_client(&self, client: Arc<dyn StoreClient>, config: StoreConfig) -> Result<()> {
        if config.table.is_empty() {
            return Err(StoreError::validation("table name must not be empty"));
        }
        self.install(client, &config);
        Ok(())
    }

    fn install(&self, client: Arc<dyn StoreClient>, config: &StoreConfig) {
        let policy = RetryPolicy::new(config.retries, config.timeout)
            .with_suppression(config.suppression);
        let mut state = self.state.write();
        *state = Some(ConnectionState {
            client,
            table: config.table.clone(),
            policy,
            actor: config.actor.clone(),
            origin: config.origin.clone(),
        });
    }

    /// Close the connection; subsequent operations fail with
    /// [`StoreError::NotConnected`]
    pub fn close(&self) {
        let mut state = self.state.write();
        if state.take().is_some() {
            tracing::info!("store connection closed");
        }
    }

    fn snapshot(&self) -> Result<ConnectionState> {
        self.state.read().clone().ok_or(StoreError::NotConnected)
    }

    // -----------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------

    /// Read one record
    pub async fn get(&self, pk: &str, sk: &str, options: ReadOptions) -> Result<Option<Item>> {
        let state = self.snapshot()?;
        validate_key(pk, sk).map_err(|e| e.with_context("Get"))?;

        let projection = options.projection.map(append_audit_attributes);
        let key = Key::new(pk, sk);
        let item = retry::execute(&state.policy, OpClass::Read, "Get", || {
            state
                .client
                .get(&state.table, &key, options.consistent, projection.as_deref())
        })
        .await
        .map_err(|f| StoreError::from(f).with_context("Get"))?;
        Ok(item.flatten())
    }

    /// Read up to 100 records best-effort
    ///
    /// Keys the store did not process are returned for resubmission.
    pub async fn batch_get(&self, keys: &[Key], options: ReadOptions) -> Result<BatchGetOutcome> {
        let state = self.snapshot()?;
        validate_keys(keys, MAX_BATCH_GET_ITEMS).map_err(|e| e.with_context("BatchGet"))?;

        let projection = options.projection.map(append_audit_attributes);
        let outcome = retry::execute(&state.policy, OpClass::Read, "BatchGet", || {
            state.client.batch_get(
                &state.table,
                keys,
                options.consistent,
                projection.as_deref(),
            )
        })
        .await
        .map_err(|f| StoreError::from(f).with_context("BatchGet"))?;

        // Suppressed exhaustion: report every key as unprocessed so the
        // caller can resubmit.
        Ok(outcome.unwrap_or_else(|| BatchGetOutcome {
            items: Vec::new(),
            unprocessed: keys.to_vec(),
        }))
    }

    /// Read up to 25 records in one isolated snapshot
    pub async fn transaction_get(&self, keys: &[Key]) -> Result<Vec<Option<Item>>> {
        let state = self.snapshot()?;
        validate_keys(keys, MAX_TRANSACT_GET_ITEMS).map_err(|e| e.with_context("TransactionGet"))?;

        let items = retry::execute(&state.policy, OpClass::Read, "TransactionGet", || {
            state.client.transact_get(&state.table, keys)
        })
        .await
        .map_err(|f| StoreError::from(f).with_context("TransactionGet"))?;
        Ok(items.unwrap_or_default())
    }

    // -----------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------

    /// Create one record (default condition: must not already exist)
    ///
    /// Records with unique-field declarations are written transactionally
    /// together with their index sentinels; a collision surfaces as a
    /// duplicate-marked conflict.
    pub async fn set(&self, record: &dyn Record, condition: Option<WriteCondition>) -> Result<()> {
        let state = self.snapshot()?;
        let op = "Set";
        let pk = record.partition_key();
        let sk = record.sort_key();
        validate_key(&pk, &sk).map_err(|e| e.with_context(op))?;

        let descriptors = unique::describe_unique(record).map_err(|e| e.with_context(op))?;
        let mut item = record.attributes();
        validate_reserved_attributes(&item).map_err(|e| e.with_context(op))?;
        item.insert(ATTR_PK.to_string(), AttributeValue::S(pk));
        item.insert(ATTR_SK.to_string(), AttributeValue::S(sk));
        stamp_audit(&mut item, &state.actor, &state.origin, true);

        let condition = condition.unwrap_or(WriteCondition::NotExists);

        if descriptors.is_empty() {
            retry::execute(&state.policy, OpClass::Write, op, || {
                state
                    .client
                    .conditional_put(&state.table, item.clone(), Some(&condition))
            })
            .await
            .map_err(|f| StoreError::from(f).with_context(op))?;
            return Ok(());
        }

        item.insert(
            ATTR_UNIQUE_FIELDS.to_string(),
            unique::manifest_value(descriptors.values()),
        );
        let created: Vec<String> = descriptors
            .values()
            .map(|d| d.index_value.clone())
            .collect();
        let plan = compose::plan_set(item, Some(condition), &created, &[])
            .map_err(|e| e.with_context(op))?;
        self.run_transaction(&state, op, &plan).await
    }

    /// Update one record with typed actions
    ///
    /// SET and REMOVE actions participate in unique-field reconciliation
    /// against the persisted manifest; ADD and DELETE actions pass
    /// through without reconciliation. Updates touching unique fields
    /// run transactionally with the sentinel deltas and a manifest
    /// refresh.
    pub async fn update(
        &self,
        pk: &str,
        sk: &str,
        update: Update,
        condition: Option<WriteCondition>,
    ) -> Result<()> {
        let state = self.snapshot()?;
        let op = "Update";
        validate_key(pk, sk).map_err(|e| e.with_context(op))?;
        validate_update(&update).map_err(|e| e.with_context(op))?;

        let mut update = update;
        stamp_update_audit(&mut update, &state.actor, &state.origin);

        let manifest =
            unique::load_unique(state.client.as_ref(), &state.table, &state.policy, pk, sk)
                .await
                .map_err(|e| e.with_context(op))?;

        let Some(old) = manifest.filter(|m| !m.is_empty()) else {
            return self.plain_update(&state, op, pk, sk, &update, condition.as_ref()).await;
        };

        let whole_manifest_removed = update
            .removed_attrs()
            .iter()
            .any(|attr| *attr == ATTR_UNIQUE_FIELDS);
        let set_changes = update.set_changes();
        let (changed, full) =
            unique::reconcile(&old, &set_changes).map_err(|e| e.with_context(op))?;
        let removed_unique: Vec<String> = update
            .removed_attrs()
            .iter()
            .filter(|attr| old.contains_key(**attr))
            .map(|attr| attr.to_string())
            .collect();

        if !changed && removed_unique.is_empty() && !whole_manifest_removed {
            return self.plain_update(&state, op, pk, sk, &update, condition.as_ref()).await;
        }

        let mut created = Vec::new();
        let mut retired = Vec::new();

        if whole_manifest_removed {
            // The record keeps its attribute values but stops claiming
            // them; every live sentinel is released.
            retired.extend(old.values().map(|d| d.index_value.clone()));
        } else {
            let mut final_manifest = DescriptorMap::new();
            for descriptor in full.values() {
                if removed_unique.contains(&descriptor.attribute) {
                    retired.push(old[&descriptor.attribute].index_value.clone());
                    continue;
                }
                if let Some(prior) = &descriptor.prior_index_value {
                    created.push(descriptor.index_value.clone());
                    retired.push(prior.clone());
                }
                final_manifest.insert(descriptor.attribute.clone(), descriptor.clone());
            }
            if final_manifest.is_empty() {
                update.push(UpdateAction::Remove {
                    attr: ATTR_UNIQUE_FIELDS.to_string(),
                });
            } else {
                update.push(UpdateAction::Set {
                    attr: ATTR_UNIQUE_FIELDS.to_string(),
                    value: unique::manifest_value(final_manifest.values()),
                });
            }
        }

        let condition = condition.unwrap_or(WriteCondition::Exists);
        let plan = compose::plan_update(
            Key::new(pk, sk),
            update,
            Some(condition),
            &created,
            &retired,
        )
        .map_err(|e| e.with_context(op))?;
        self.run_transaction(&state, op, &plan).await
    }

    /// Delete one record and any unique index sentinels it holds
    pub async fn delete(&self, pk: &str, sk: &str) -> Result<()> {
        let state = self.snapshot()?;
        let op = "Delete";
        validate_key(pk, sk).map_err(|e| e.with_context(op))?;

        let manifest =
            unique::load_unique(state.client.as_ref(), &state.table, &state.policy, pk, sk)
                .await
                .map_err(|e| e.with_context(op))?;

        match manifest.filter(|m| !m.is_empty()) {
            Some(old) => {
                let retired: Vec<String> =
                    old.values().map(|d| d.index_value.clone()).collect();
                let plan = compose::plan_delete(Key::new(pk, sk), &retired)
                    .map_err(|e| e.with_context(op))?;
                self.run_transaction(&state, op, &plan).await
            }
            None => {
                let key = Key::new(pk, sk);
                retry::execute(&state.policy, OpClass::Write, op, || {
                    state.client.delete(&state.table, &key)
                })
                .await
                .map_err(|f| StoreError::from(f).with_context(op))?;
                Ok(())
            }
        }
    }

    /// Best-effort batch of independent creates and deletes (≤25 items)
    ///
    /// Records with unique-field declarations are rejected: uniqueness
    /// needs the transactional path. Partial failure is expected and is
    /// reported per key, never rolled back.
    pub async fn batch_set(
        &self,
        records: &[&dyn Record],
        delete_keys: &[Key],
    ) -> Result<BatchWriteReport> {
        let state = self.snapshot()?;
        let op = "BatchSet";

        let mut puts = Vec::with_capacity(records.len());
        for record in records {
            if !record.unique_fields().is_empty() {
                return Err(StoreError::validation(
                    "records with unique fields require TransactionSet",
                )
                .with_context(op));
            }
            let pk = record.partition_key();
            let sk = record.sort_key();
            validate_key(&pk, &sk).map_err(|e| e.with_context(op))?;
            let mut item = record.attributes();
            validate_reserved_attributes(&item).map_err(|e| e.with_context(op))?;
            item.insert(ATTR_PK.to_string(), AttributeValue::S(pk));
            item.insert(ATTR_SK.to_string(), AttributeValue::S(sk));
            stamp_audit(&mut item, &state.actor, &state.origin, true);
            puts.push(item);
        }

        let request = compose::plan_batch_write(puts, delete_keys.to_vec())
            .map_err(|e| e.with_context(op))?;
        let total = request.len();

        let outcome = retry::execute(&state.policy, OpClass::Write, op, || {
            state.client.batch_write(&state.table, &request)
        })
        .await
        .map_err(|f| StoreError::from(f).with_context(op))?;

        let report = match outcome {
            Some(outcome) => {
                let failed = outcome.unprocessed_puts.len() + outcome.unprocessed_deletes.len();
                BatchWriteReport {
                    succeeded: total - failed,
                    failed_puts: outcome.unprocessed_puts,
                    failed_deletes: outcome.unprocessed_deletes,
                }
            }
            // Suppressed exhaustion: nothing is known to have applied.
            None => BatchWriteReport {
                succeeded: 0,
                failed_puts: request.puts.iter().map(extract_item_key).collect(),
                failed_deletes: request.deletes.clone(),
            },
        };
        Ok(report)
    }

    /// Atomically create up to 25 records (counting their sentinels)
    ///
    /// Returns the number of records applied. All records are created
    /// under "must not already exist" unless a condition is supplied.
    pub async fn transaction_set(
        &self,
        records: &[&dyn Record],
        condition: Option<WriteCondition>,
    ) -> Result<usize> {
        let state = self.snapshot()?;
        let op = "TransactionSet";
        if records.is_empty() {
            return Err(StoreError::validation("no records to write").with_context(op));
        }

        let mut planned = Vec::with_capacity(records.len());
        for record in records {
            let pk = record.partition_key();
            let sk = record.sort_key();
            validate_key(&pk, &sk).map_err(|e| e.with_context(op))?;
            let descriptors = unique::describe_unique(*record).map_err(|e| e.with_context(op))?;
            let mut item = record.attributes();
            validate_reserved_attributes(&item).map_err(|e| e.with_context(op))?;
            item.insert(ATTR_PK.to_string(), AttributeValue::S(pk));
            item.insert(ATTR_SK.to_string(), AttributeValue::S(sk));
            stamp_audit(&mut item, &state.actor, &state.origin, true);

            let created: Vec<String> = descriptors
                .values()
                .map(|d| d.index_value.clone())
                .collect();
            if !descriptors.is_empty() {
                item.insert(
                    ATTR_UNIQUE_FIELDS.to_string(),
                    unique::manifest_value(descriptors.values()),
                );
            }
            planned.push((
                item,
                Some(condition.clone().unwrap_or(WriteCondition::NotExists)),
                created,
            ));
        }

        let plan = compose::plan_multi_set(planned).map_err(|e| e.with_context(op))?;
        self.run_transaction(&state, op, &plan).await?;
        Ok(records.len())
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    /// Run a query, draining every page
    pub async fn query(&self, request: QueryRequest) -> Result<Vec<Item>> {
        let state = self.snapshot()?;
        let op = "Query";
        validate_query(&request).map_err(|e| e.with_context(op))?;

        let mut request = request;
        if let Some(projection) = request.projection.take() {
            request.projection = Some(append_audit_attributes(projection));
        }

        let mut items = Vec::new();
        loop {
            let page = retry::execute(&state.policy, OpClass::Read, op, || {
                state.client.query(&state.table, &request)
            })
            .await
            .map_err(|f| StoreError::from(f).with_context(op))?;

            let Some(page) = page else {
                // Suppressed exhaustion mid-walk: return what was read.
                break;
            };
            items.extend(page.items);
            match page.last_key {
                Some(last_key) => request.start_key = Some(last_key),
                None => break,
            }
        }
        Ok(items)
    }

    /// Run one page of a query, resuming from an opaque cursor
    ///
    /// Returns the page plus the cursor of the next page (empty when the
    /// walk is complete).
    pub async fn query_by_page(
        &self,
        request: QueryRequest,
        page_size: i32,
        cursor: &str,
    ) -> Result<(Vec<Item>, String)> {
        let state = self.snapshot()?;
        let op = "QueryByPage";
        validate_query(&request).map_err(|e| e.with_context(op))?;
        validate_page_size(page_size).map_err(|e| e.with_context(op))?;

        let mut request = request;
        if let Some(projection) = request.projection.take() {
            request.projection = Some(append_audit_attributes(projection));
        }
        request.limit = Some(page_size);
        request.start_key = decode_cursor(cursor).map_err(|e| e.with_context(op))?;

        let page = retry::execute(&state.policy, OpClass::Read, op, || {
            state.client.query(&state.table, &request)
        })
        .await
        .map_err(|f| StoreError::from(f).with_context(op))?;

        let Some(page) = page else {
            return Ok((Vec::new(), String::new()));
        };
        let next = encode_cursor(page.last_key.as_ref()).map_err(|e| e.with_context(op))?;
        Ok((page.items, next))
    }

    /// Pre-walk a query once, returning the cursor of every page
    ///
    /// The first element is always the empty cursor (first page), so the
    /// result has one entry per page for the given page size.
    pub async fn query_pagination_data(
        &self,
        request: QueryRequest,
        page_size: i32,
    ) -> Result<Vec<String>> {
        let state = self.snapshot()?;
        let op = "QueryPaginationData";
        validate_query(&request).map_err(|e| e.with_context(op))?;
        validate_page_size(page_size).map_err(|e| e.with_context(op))?;

        let mut request = request;
        request.limit = Some(page_size);
        // Only the page boundaries matter; read as little as possible.
        request.projection = Some(vec![ATTR_PK.to_string(), ATTR_SK.to_string()]);

        let mut cursors = vec![String::new()];
        loop {
            let page = retry::execute(&state.policy, OpClass::Read, op, || {
                state.client.query(&state.table, &request)
            })
            .await
            .map_err(|f| StoreError::from(f).with_context(op))?;

            let Some(page) = page else {
                break;
            };
            match page.last_key {
                Some(last_key) => {
                    cursors.push(
                        encode_cursor(Some(&last_key)).map_err(|e| e.with_context(op))?,
                    );
                    request.start_key = Some(last_key);
                }
                None => break,
            }
        }
        Ok(cursors)
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    async fn plain_update(
        &self,
        state: &ConnectionState,
        op: &str,
        pk: &str,
        sk: &str,
        update: &Update,
        condition: Option<&WriteCondition>,
    ) -> Result<()> {
        let key = Key::new(pk, sk);
        retry::execute(&state.policy, OpClass::Write, op, || {
            state.client.update(&state.table, &key, update, condition)
        })
        .await
        .map_err(|f| StoreError::from(f).with_context(op))?;
        Ok(())
    }

    async fn run_transaction(
        &self,
        state: &ConnectionState,
        op: &str,
        plan: &TransactionPlan,
    ) -> Result<()> {
        retry::execute(&state.policy, OpClass::Write, op, || {
            state.client.transact_write(&state.table, plan.ops())
        })
        .await
        .map_err(|f| plan.refine_failure(f).with_context(op))?;
        Ok(())
    }
}

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn validate_key(pk: &str, sk: &str) -> Result<()> {
    if pk.is_empty() {
        return Err(StoreError::validation("partition key must not be empty"));
    }
    if sk.is_empty() {
        return Err(StoreError::validation("sort key must not be empty"));
    }
    Ok(())
}

fn validate_keys(keys: &[Key], ceiling: usize) -> Result<()> {
    if keys.is_empty() {
        return Err(StoreError::validation("no keys supplied"));
    }
    if keys.len() > ceiling {
        return Err(StoreError::validation(format!(
            "{} keys supplied, exceeding the {ceiling}-key ceiling",
            keys.len()
        )));
    }
    for key in keys {
        validate_key(&key.pk, &key.sk)?;
    }
    Ok(())
}

fn validate_query(request: &QueryRequest) -> Result<()> {
    if request.key.partition_value.is_empty() {
        return Err(StoreError::validation(
            "query partition key value must not be empty",
        ));
    }
    Ok(())
}

fn validate_page_size(page_size: i32) -> Result<()> {
    if page_size < 1 {
        return Err(StoreError::validation("page size must be positive"));
    }
    Ok(())
}

/// Reject records that claim attributes this layer manages
fn validate_reserved_attributes(item: &Item) -> Result<()> {
    for reserved in [ATTR_PK, ATTR_SK, ATTR_UNIQUE_FIELDS] {
        if item.contains_key(reserved) {
            return Err(StoreError::validation(format!(
                "record attributes must not claim the managed '{reserved}' attribute"
            )));
        }
    }
    Ok(())
}

/// Reject updates that touch the key pair or rewrite the manifest by hand
fn validate_update(update: &Update) -> Result<()> {
    if update.is_empty() {
        return Err(StoreError::validation("update has no actions"));
    }
    for action in update.actions() {
        let attr = action.attribute();
        if attr == ATTR_PK || attr == ATTR_SK {
            return Err(StoreError::validation(
                "updates must not touch the key attributes",
            ));
        }
        // Removing the whole manifest is allowed (it releases every
        // sentinel); writing it directly is not.
        if attr == ATTR_UNIQUE_FIELDS && !matches!(action, UpdateAction::Remove { .. }) {
            return Err(StoreError::validation(format!(
                "updates must not write the managed '{ATTR_UNIQUE_FIELDS}' attribute"
            )));
        }
    }
    let removed = update.removed_attrs();
    for (attr, _) in update.set_changes() {
        if removed.contains(&attr) {
            return Err(StoreError::validation(format!(
                "attribute '{attr}' is both set and removed in one update"
            )));
        }
    }
    Ok(())
}

/// Append the audit attributes to an explicit projection, deduplicating
/// while preserving the caller's order
fn append_audit_attributes(mut projection: Vec<String>) -> Vec<String> {
    for attr in AUDIT_ATTRIBUTES {
        if !projection.iter().any(|p| p == attr) {
            projection.push(attr.to_string());
        }
    }
    projection
}

/// Stamp the audit attribute set on an outgoing item
fn stamp_audit(item: &mut Item, actor: &str, origin: &str, create: bool) {
    let now = AttributeValue::N(now_epoch().to_string());
    if create {
        item.insert(ATTR_CREATED_AT.to_string(), now.clone());
    }
    item.insert(ATTR_UPDATED_AT.to_string(), now);
    item.insert(
        ATTR_UPDATED_BY.to_string(),
        AttributeValue::S(actor.to_string()),
    );
    item.insert(
        ATTR_ORIGIN.to_string(),
        AttributeValue::S(origin.to_string()),
    );
}

/// Append audit stamps to an update, skipping attributes the caller
/// already targets
fn stamp_update_audit(update: &mut Update, actor: &str, origin: &str) {
    let stamps = [
        (
            ATTR_UPDATED_AT,
            AttributeValue::N(now_epoch().to_string()),
        ),
        (ATTR_UPDATED_BY, AttributeValue::S(actor.to_string())),
        (ATTR_ORIGIN, AttributeValue::S(origin.to_string())),
    ];
    for (attr, value) in stamps {
        if !update.actions().iter().any(|a| a.attribute() == attr) {
            update.push(UpdateAction::Set {
                attr: attr.to_string(),
                value,
            });
        }
    }
}

fn extract_item_key(item: &Item) -> Key {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_audit_attributes_dedups_preserving_order() {
        let projection = vec!["email".to_string(), "updated_at".to_string()];
        let appended = append_audit_attributes(projection);
        assert_eq!(
            appended,
            vec![
                "email".to_string(),
                "updated_at".to_string(),
                "created_at".to_string(),
                "updated_by".to_string(),
                "origin".to_string(),
            ]
        );
    }

    #[test]
    fn test_validate_update_rejects_key_writes() {
        let update = Update::new().set(ATTR_PK, AttributeValue::S("X".to_string()));
        assert!(validate_update(&update).is_err());
        let update = Update::new().set(
            ATTR_UNIQUE_FIELDS,
            AttributeValue::S("tampered".to_string()),
        );
        assert!(validate_update(&update).is_err());
        let update = Update::new().remove(ATTR_UNIQUE_FIELDS);
        assert!(validate_update(&update).is_ok());
    }

    #[test]
    fn test_validate_update_rejects_set_and_remove_collision() {
        let update = Update::new()
            .set("email", AttributeValue::S("x".to_string()))
            .remove("email");
        assert!(validate_update(&update).is_err());
    }

    #[test]
    fn test_region_lookup() {
        assert!(region_supports_acceleration("us-east-1"));
        assert!(!region_supports_acceleration("mars-north-1"));
    }

    #[tokio::test]
    async fn test_operations_require_open_connection() {
        let store = Store::new();
        let err = store
            .get("PK", "SK", ReadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotConnected));
    }
}
