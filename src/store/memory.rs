//! In-memory store client
//!
//! A table-per-name, BTreeMap-backed twin of the DynamoDB client for
//! tests and local runs. It evaluates the same typed conditions, key
//! conditions, and update actions the production client renders to
//! expression strings. Caller-supplied expression conditions and filter
//! expressions are not evaluated here and fail with a validation code.

use super::{
    BatchGetOutcome, BatchWriteOutcome, BatchWriteRequest, FailureCode, Item, Key, QueryPage,
    QueryRequest, StoreClient, StoreFailure, StoreResult, TransactWriteOp, WriteCondition,
};
use crate::expr::{SortCondition, Update, UpdateAction};
use crate::schema::{ATTR_PK, ATTR_SK};
use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};

type Table = BTreeMap<(String, String), Item>;

/// In-memory store client
#[derive(Debug, Default)]
pub struct MemoryStoreClient {
    tables: Mutex<HashMap<String, Table>>,
    /// Failure codes consumed one per operation, for retry-path tests
    injected_failures: Mutex<VecDeque<FailureCode>>,
}

impl MemoryStoreClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `count` failures with the given code; subsequent operations
    /// consume one each before touching the data
    pub fn inject_failures(&self, code: FailureCode, count: usize) {
        let mut queue = self.injected_failures.lock();
        for _ in 0..count {
            queue.push_back(code);
        }
    }

    /// Number of items currently stored in a table
    pub fn table_len(&self, table: &str) -> usize {
        self.tables
            .lock()
            .get(table)
            .map(|t| t.len())
            .unwrap_or(0)
    }

    /// Read an item directly, bypassing the client seam (test assertions)
    pub fn raw_get(&self, table: &str, pk: &str, sk: &str) -> Option<Item> {
        self.tables
            .lock()
            .get(table)
            .and_then(|t| t.get(&(pk.to_string(), sk.to_string())).cloned())
    }

    fn take_injected(&self) -> Option<StoreFailure> {
        self.injected_failures
            .lock()
            .pop_front()
            .map(|code| StoreFailure::new(code, format!("injected failure {code:?}")))
    }
}

fn item_key(item: &Item) -> StoreResult<(String, String)> {
    let pk = item
        .get(ATTR_PK)
        .and_then(|v| v.as_s().ok())
        .ok_or_else(|| {
            StoreFailure::new(FailureCode::ValidationFailed, "item is missing its partition key")
        })?;
    let sk = item
        .get(ATTR_SK)
        .and_then(|v| v.as_s().ok())
        .ok_or_else(|| {
            StoreFailure::new(FailureCode::ValidationFailed, "item is missing its sort key")
        })?;
    Ok((pk.clone(), sk.clone()))
}

/// Evaluate a write condition against the current entry
fn check_condition(
    condition: Option<&WriteCondition>,
    exists: bool,
) -> StoreResult<bool> {
    match condition {
        None => Ok(true),
        Some(WriteCondition::NotExists) => Ok(!exists),
        Some(WriteCondition::Exists) => Ok(exists),
        Some(WriteCondition::Expression { .. }) => Err(StoreFailure::new(
            FailureCode::ValidationFailed,
            "expression conditions are not supported by the in-memory client",
        )),
    }
}

fn conditional_check_failed() -> StoreFailure {
    StoreFailure::new(
        FailureCode::ConditionalCheckFailed,
        "the conditional request failed",
    )
}

fn add_values(existing: Option<&AttributeValue>, delta: &AttributeValue) -> StoreResult<AttributeValue> {
    match (existing, delta) {
        (None, _) => Ok(delta.clone()),
        (Some(AttributeValue::N(a)), AttributeValue::N(b)) => {
            let sum = match (a.parse::<i64>(), b.parse::<i64>()) {
                (Ok(x), Ok(y)) => (x + y).to_string(),
                _ => {
                    let x: f64 = a.parse().map_err(|_| bad_number(a))?;
                    let y: f64 = b.parse().map_err(|_| bad_number(b))?;
                    (x + y).to_string()
                }
            };
            Ok(AttributeValue::N(sum))
        }
        (Some(AttributeValue::Ss(a)), AttributeValue::Ss(b)) => {
            let mut merged = a.clone();
            for v in b {
                if !merged.contains(v) {
                    merged.push(v.clone());
                }
            }
            Ok(AttributeValue::Ss(merged))
        }
        _ => Err(StoreFailure::new(
            FailureCode::ValidationFailed,
            "ADD supports numbers and string sets",
        )),
    }
}

fn bad_number(raw: &str) -> StoreFailure {
    StoreFailure::new(
        FailureCode::ValidationFailed,
        format!("'{raw}' is not a number"),
    )
}

fn apply_update(item: &mut Item, update: &Update) -> StoreResult<()> {
    for action in update.actions() {
        match action {
            UpdateAction::Set { attr, value } => {
                item.insert(attr.clone(), value.clone());
            }
            UpdateAction::Remove { attr } => {
                item.remove(attr);
            }
            UpdateAction::Add { attr, value } => {
                let merged = add_values(item.get(attr), value)?;
                item.insert(attr.clone(), merged);
            }
            UpdateAction::Delete { attr, value } => {
                let emptied = match (item.get_mut(attr), value) {
                    (Some(AttributeValue::Ss(existing)), AttributeValue::Ss(remove)) => {
                        existing.retain(|v| !remove.contains(v));
                        existing.is_empty()
                    }
                    (None, _) => false,
                    _ => {
                        return Err(StoreFailure::new(
                            FailureCode::ValidationFailed,
                            "DELETE supports string sets",
                        ))
                    }
                };
                if emptied {
                    item.remove(attr);
                }
            }
        }
    }
    Ok(())
}

fn project(item: &Item, projection: Option<&[String]>) -> Item {
    match projection {
        None => item.clone(),
        Some(attrs) => attrs
            .iter()
            .filter_map(|attr| item.get(attr).map(|v| (attr.clone(), v.clone())))
            .collect(),
    }
}

fn sort_value(value: &AttributeValue) -> StoreResult<&str> {
    value.as_s().map(String::as_str).map_err(|_| {
        StoreFailure::new(
            FailureCode::ValidationFailed,
            "the in-memory client only compares string sort keys",
        )
    })
}

fn matches_sort(sk: &str, condition: &SortCondition) -> StoreResult<bool> {
    Ok(match condition {
        SortCondition::Eq(v) => sk == sort_value(v)?,
        SortCondition::Lt(v) => sk < sort_value(v)?,
        SortCondition::Le(v) => sk <= sort_value(v)?,
        SortCondition::Gt(v) => sk > sort_value(v)?,
        SortCondition::Ge(v) => sk >= sort_value(v)?,
        SortCondition::Between(lo, hi) => sk >= sort_value(lo)? && sk <= sort_value(hi)?,
        SortCondition::BeginsWith(prefix) => sk.starts_with(prefix.as_str()),
    })
}

#[async_trait]
impl StoreClient for MemoryStoreClient {
    async fn conditional_put(
        &self,
        table: &str,
        item: Item,
        condition: Option<&WriteCondition>,
    ) -> StoreResult<()> {
        if let Some(failure) = self.take_injected() {
            return Err(failure);
        }
        let key = item_key(&item)?;
        let mut tables = self.tables.lock();
        let table = tables.entry(table.to_string()).or_default();
        if !check_condition(condition, table.contains_key(&key))? {
            return Err(conditional_check_failed());
        }
        table.insert(key, item);
        Ok(())
    }

    async fn update(
        &self,
        table: &str,
        key: &Key,
        update: &Update,
        condition: Option<&WriteCondition>,
    ) -> StoreResult<()> {
        if let Some(failure) = self.take_injected() {
            return Err(failure);
        }
        let entry_key = (key.pk.clone(), key.sk.clone());
        let mut tables = self.tables.lock();
        let table = tables.entry(table.to_string()).or_default();
        let exists = table.contains_key(&entry_key);
        if !check_condition(condition, exists)? {
            return Err(conditional_check_failed());
        }
        let item = table.entry(entry_key).or_insert_with(|| {
            // Updates upsert: a fresh item starts as just its key pair.
            let mut item = Item::new();
            item.insert(ATTR_PK.to_string(), AttributeValue::S(key.pk.clone()));
            item.insert(ATTR_SK.to_string(), AttributeValue::S(key.sk.clone()));
            item
        });
        apply_update(item, update)
    }

    async fn delete(&self, table: &str, key: &Key) -> StoreResult<()> {
        if let Some(failure) = self.take_injected() {
            return Err(failure);
        }
        let mut tables = self.tables.lock();
        if let Some(table) = tables.get_mut(table) {
            table.remove(&(key.pk.clone(), key.sk.clone()));
        }
        Ok(())
    }

    async fn get(
        &self,
        table: &str,
        key: &Key,
        _consistent: bool,
        projection: Option<&[String]>,
    ) -> StoreResult<Option<Item>> {
        if let Some(failure) = self.take_injected() {
            return Err(failure);
        }
        let tables = self.tables.lock();
        Ok(tables
            .get(table)
            .and_then(|t| t.get(&(key.pk.clone(), key.sk.clone())))
            .map(|item| project(item, projection)))
    }

    async fn query(&self, table: &str, request: &QueryRequest) -> StoreResult<QueryPage> {
        if let Some(failure) = self.take_injected() {
            return Err(failure);
        }
        if request.index.is_some() {
            return Err(StoreFailure::new(
                FailureCode::ValidationFailed,
                "secondary indexes are not supported by the in-memory client",
            ));
        }
        if request.filter.is_some() {
            return Err(StoreFailure::new(
                FailureCode::ValidationFailed,
                "filter expressions are not supported by the in-memory client",
            ));
        }

        let resume_after: Option<String> = match &request.start_key {
            Some(start) => Some(
                start
                    .get(ATTR_SK)
                    .and_then(|v| v.as_s().ok())
                    .cloned()
                    .ok_or_else(|| {
                        StoreFailure::new(
                            FailureCode::ValidationFailed,
                            "start key is missing its sort key",
                        )
                    })?,
            ),
            None => None,
        };

        let tables = self.tables.lock();
        let Some(table) = tables.get(table) else {
            return Ok(QueryPage::default());
        };

        let pk = &request.key.partition_value;
        let mut matched = Vec::new();
        for ((item_pk, item_sk), item) in table.range((pk.clone(), String::new())..) {
            if item_pk != pk {
                break;
            }
            if let Some(resume) = &resume_after {
                if item_sk <= resume {
                    continue;
                }
            }
            if let Some(sort) = &request.key.sort {
                if !matches_sort(item_sk, sort)? {
                    continue;
                }
            }
            matched.push((item_sk.clone(), item));
        }

        let limit = request.limit.map(|l| l.max(0) as usize);
        let page_len = limit.unwrap_or(matched.len()).min(matched.len());
        let has_more = matched.len() > page_len;
        let last_key = if has_more && page_len > 0 {
            let (last_sk, _) = &matched[page_len - 1];
            let mut key = Item::new();
            key.insert(ATTR_PK.to_string(), AttributeValue::S(pk.clone()));
            key.insert(ATTR_SK.to_string(), AttributeValue::S(last_sk.clone()));
            Some(key)
        } else {
            None
        };

        let items = matched
            .into_iter()
            .take(page_len)
            .map(|(_, item)| project(item, request.projection.as_deref()))
            .collect();

        Ok(QueryPage { items, last_key })
    }

    async fn batch_write(
        &self,
        table_name: &str,
        request: &BatchWriteRequest,
    ) -> StoreResult<BatchWriteOutcome> {
        if let Some(failure) = self.take_injected() {
            return Err(failure);
        }
        let mut tables = self.tables.lock();
        let table = tables.entry(table_name.to_string()).or_default();
        for item in &request.puts {
            let key = item_key(item)?;
            table.insert(key, item.clone());
        }
        for key in &request.deletes {
            table.remove(&(key.pk.clone(), key.sk.clone()));
        }
        Ok(BatchWriteOutcome::default())
    }

    async fn batch_get(
        &self,
        table: &str,
        keys: &[Key],
        _consistent: bool,
        projection: Option<&[String]>,
    ) -> StoreResult<BatchGetOutcome> {
        if let Some(failure) = self.take_injected() {
            return Err(failure);
        }
        let tables = self.tables.lock();
        let mut outcome = BatchGetOutcome::default();
        if let Some(table) = tables.get(table) {
            for key in keys {
                if let Some(item) = table.get(&(key.pk.clone(), key.sk.clone())) {
                    outcome.items.push(project(item, projection));
                }
            }
        }
        Ok(outcome)
    }

    async fn transact_get(&self, table: &str, keys: &[Key]) -> StoreResult<Vec<Option<Item>>> {
        if let Some(failure) = self.take_injected() {
            return Err(failure);
        }
        let tables = self.tables.lock();
        let table = tables.get(table);
        Ok(keys
            .iter()
            .map(|key| {
                table.and_then(|t| t.get(&(key.pk.clone(), key.sk.clone())).cloned())
            })
            .collect())
    }

    async fn transact_write(&self, table_name: &str, ops: &[TransactWriteOp]) -> StoreResult<()> {
        if let Some(failure) = self.take_injected() {
            return Err(failure);
        }
        let mut tables = self.tables.lock();
        let table = tables.entry(table_name.to_string()).or_default();

        // Phase 1: evaluate every condition against the current state so
        // the batch applies all-or-nothing.
        let mut reasons = Vec::with_capacity(ops.len());
        let mut any_failed = false;
        for op in ops {
            let (key, condition) = match op {
                TransactWriteOp::Put { item, condition } => (item_key(item)?, condition.as_ref()),
                TransactWriteOp::Update { key, condition, .. }
                | TransactWriteOp::Delete { key, condition } => {
                    ((key.pk.clone(), key.sk.clone()), condition.as_ref())
                }
            };
            if check_condition(condition, table.contains_key(&key))? {
                reasons.push(FailureCode::None);
            } else {
                any_failed = true;
                reasons.push(FailureCode::ConditionalCheckFailed);
            }
        }

        if any_failed {
            let mut failure = StoreFailure::new(
                FailureCode::TransactionCanceled,
                "transaction cancelled by a failed condition",
            );
            failure.cancellation = reasons;
            return Err(failure);
        }

        // Phase 2: apply.
        for op in ops {
            match op {
                TransactWriteOp::Put { item, .. } => {
                    table.insert(item_key(item)?, item.clone());
                }
                TransactWriteOp::Update { key, update, .. } => {
                    let entry = table
                        .entry((key.pk.clone(), key.sk.clone()))
                        .or_insert_with(|| {
                            let mut item = Item::new();
                            item.insert(ATTR_PK.to_string(), AttributeValue::S(key.pk.clone()));
                            item.insert(ATTR_SK.to_string(), AttributeValue::S(key.sk.clone()));
                            item
                        });
                    apply_update(entry, update)?;
                }
                TransactWriteOp::Delete { key, .. } => {
                    table.remove(&(key.pk.clone(), key.sk.clone()));
                }
            }
        }
        Ok(())
    }
}
