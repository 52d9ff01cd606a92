//! Write composition
//!
//! Builds the multi-item requests the facade submits: transactional plans
//! that mutate an owning record and its unique index sentinels
//! all-or-nothing, and best-effort batches of independent puts and
//! deletes. The 25-item transaction ceiling is enforced here, before any
//! network call.

use crate::error::{Result, StoreError};
use crate::expr::Update;
use crate::schema::{ATTR_PK, ATTR_SK, MAX_BATCH_WRITE_ITEMS, MAX_TRANSACT_WRITE_ITEMS};
use crate::store::{
    BatchWriteRequest, FailureCode, Item, Key, StoreFailure, TransactWriteOp, WriteCondition,
};
use crate::unique;

/// An assembled transactional write
///
/// Tracks which operations are sentinel puts so a cancellation can be
/// refined into a duplicate-marked conflict instead of a generic
/// transaction failure.
#[derive(Debug, Clone, Default)]
pub struct TransactionPlan {
    ops: Vec<TransactWriteOp>,
    sentinel_put_indices: Vec<usize>,
}

impl TransactionPlan {
    pub fn ops(&self) -> &[TransactWriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn push(&mut self, op: TransactWriteOp) {
        self.ops.push(op);
    }

    fn push_sentinel_put(&mut self, index_value: &str) {
        self.sentinel_put_indices.push(self.ops.len());
        self.ops.push(TransactWriteOp::Put {
            item: unique::sentinel_item(index_value),
            condition: Some(WriteCondition::NotExists),
        });
    }

    fn push_sentinel_delete(&mut self, index_value: &str) {
        self.ops.push(TransactWriteOp::Delete {
            key: unique::sentinel_key(index_value),
            condition: None,
        });
    }

    /// Reject plans that exceed the store's transaction ceiling
    fn check_ceiling(self) -> Result<Self> {
        if self.ops.len() > MAX_TRANSACT_WRITE_ITEMS {
            return Err(StoreError::validation(format!(
                "transaction would contain {} items, exceeding the {MAX_TRANSACT_WRITE_ITEMS}-item ceiling",
                self.ops.len()
            )));
        }
        Ok(self)
    }

    /// Refine a transactional failure using per-item cancellation codes
    ///
    /// A conditional-check failure on a sentinel put means the unique
    /// value was already claimed; on any other operation it is the owning
    /// record's condition. Everything else stays a transaction abort.
    pub fn refine_failure(&self, failure: StoreFailure) -> StoreError {
        if failure.code == FailureCode::TransactionCanceled && !failure.cancellation.is_empty() {
            let failed_sentinel = self
                .sentinel_put_indices
                .iter()
                .any(|&i| failure.cancellation.get(i) == Some(&FailureCode::ConditionalCheckFailed));
            if failed_sentinel {
                return StoreError::duplicate(format!(
                    "unique value already claimed: {}",
                    failure.message
                ));
            }
            if failure
                .cancellation
                .iter()
                .any(|&c| c == FailureCode::ConditionalCheckFailed)
            {
                return StoreError::conflict(format!(
                    "owning record condition failed: {}",
                    failure.message
                ));
            }
        }
        StoreError::from(failure)
    }
}

/// Plan a create/replace of one owning record with unique sentinels
///
/// New sentinels are put under "must not already exist"; retired
/// sentinels are deleted unconditionally; the owning put carries the
/// caller's condition (the facade defaults it to "must not exist").
pub fn plan_set(
    owner_item: Item,
    condition: Option<WriteCondition>,
    created: &[String],
    retired: &[String],
) -> Result<TransactionPlan> {
    let mut plan = TransactionPlan::default();
    for index_value in created {
        plan.push_sentinel_put(index_value);
    }
    for index_value in retired {
        plan.push_sentinel_delete(index_value);
    }
    plan.push(TransactWriteOp::Put {
        item: owner_item,
        condition,
    });
    plan.check_ceiling()
}

/// Plan an update of one owning record alongside its sentinel deltas
pub fn plan_update(
    key: Key,
    update: Update,
    condition: Option<WriteCondition>,
    created: &[String],
    retired: &[String],
) -> Result<TransactionPlan> {
    let mut plan = TransactionPlan::default();
    for index_value in created {
        plan.push_sentinel_put(index_value);
    }
    for index_value in retired {
        plan.push_sentinel_delete(index_value);
    }
    plan.push(TransactWriteOp::Update {
        key,
        update,
        condition,
    });
    plan.check_ceiling()
}

/// Plan a delete of one owning record and all of its sentinels
pub fn plan_delete(key: Key, retired: &[String]) -> Result<TransactionPlan> {
    let mut plan = TransactionPlan::default();
    for index_value in retired {
        plan.push_sentinel_delete(index_value);
    }
    plan.push(TransactWriteOp::Delete {
        key,
        condition: None,
    });
    plan.check_ceiling()
}

/// Plan an atomic multi-record create, each record with its sentinels
pub fn plan_multi_set(
    records: Vec<(Item, Option<WriteCondition>, Vec<String>)>,
) -> Result<TransactionPlan> {
    let mut plan = TransactionPlan::default();
    for (owner_item, condition, created) in records {
        for index_value in &created {
            plan.push_sentinel_put(index_value);
        }
        plan.push(TransactWriteOp::Put {
            item: owner_item,
            condition,
        });
    }
    plan.check_ceiling()
}

/// Assemble a best-effort batch of independent puts and deletes
///
/// No uniqueness semantics: callers with unique-indexed records must use
/// the transactional path. Every put must already carry its key pair.
pub fn plan_batch_write(puts: Vec<Item>, deletes: Vec<Key>) -> Result<BatchWriteRequest> {
    let total = puts.len() + deletes.len();
    if total == 0 {
        return Err(StoreError::validation("batch write is empty"));
    }
    if total > MAX_BATCH_WRITE_ITEMS {
        return Err(StoreError::validation(format!(
            "batch write would contain {total} items, exceeding the {MAX_BATCH_WRITE_ITEMS}-item ceiling"
        )));
    }
    for item in &puts {
        if !item.contains_key(ATTR_PK) || !item.contains_key(ATTR_SK) {
            return Err(StoreError::validation(
                "every batched put must carry both key attributes",
            ));
        }
    }
    Ok(BatchWriteRequest { puts, deletes })
}
