//! Typed key-condition and update-expression builders
//!
//! Callers describe queries and updates with tagged values instead of raw
//! expression strings; rendering to the store's expression grammar (with
//! `#name`/`:value` placeholders) happens in one place, in the DynamoDB
//! client. The in-memory client evaluates the same structures directly.

use crate::schema::{ATTR_PK, ATTR_SK};
use aws_sdk_dynamodb::types::AttributeValue;
use std::collections::HashMap;

/// Comparator applied to the sort key of a query
#[derive(Debug, Clone, PartialEq)]
pub enum SortCondition {
    Eq(AttributeValue),
    Lt(AttributeValue),
    Le(AttributeValue),
    Gt(AttributeValue),
    Ge(AttributeValue),
    Between(AttributeValue, AttributeValue),
    BeginsWith(String),
}

/// Structured key condition: partition-key equality plus an optional
/// sort-key comparator
#[derive(Debug, Clone)]
pub struct KeyCondition {
    /// Partition key attribute (defaults to `PK`; indexes may differ)
    pub partition_attr: String,
    /// Partition key value
    pub partition_value: String,
    /// Sort key attribute (defaults to `SK`)
    pub sort_attr: String,
    /// Optional sort-key comparator
    pub sort: Option<SortCondition>,
}

impl KeyCondition {
    /// Partition-key equality on the table's primary key
    pub fn partition(value: impl Into<String>) -> Self {
        Self {
            partition_attr: ATTR_PK.to_string(),
            partition_value: value.into(),
            sort_attr: ATTR_SK.to_string(),
            sort: None,
        }
    }

    /// Override the key attribute names (for querying a secondary index)
    pub fn on_attributes(
        mut self,
        partition_attr: impl Into<String>,
        sort_attr: impl Into<String>,
    ) -> Self {
        self.partition_attr = partition_attr.into();
        self.sort_attr = sort_attr.into();
        self
    }

    /// Add a sort-key comparator
    pub fn sort(mut self, condition: SortCondition) -> Self {
        self.sort = Some(condition);
        self
    }

    /// Render to a key-condition expression with placeholder maps
    pub fn render(&self) -> RenderedExpression {
        let mut out = RenderedExpression::default();
        let pk_name = out.name(&self.partition_attr);
        let pk_value = out.value(AttributeValue::S(self.partition_value.clone()));
        out.expression = format!("{pk_name} = {pk_value}");

        if let Some(sort) = &self.sort {
            let sk_name = out.name(&self.sort_attr);
            let clause = match sort {
                SortCondition::Eq(v) => format!("{sk_name} = {}", out.value(v.clone())),
                SortCondition::Lt(v) => format!("{sk_name} < {}", out.value(v.clone())),
                SortCondition::Le(v) => format!("{sk_name} <= {}", out.value(v.clone())),
                SortCondition::Gt(v) => format!("{sk_name} > {}", out.value(v.clone())),
                SortCondition::Ge(v) => format!("{sk_name} >= {}", out.value(v.clone())),
                SortCondition::Between(lo, hi) => {
                    let lo = out.value(lo.clone());
                    let hi = out.value(hi.clone());
                    format!("{sk_name} BETWEEN {lo} AND {hi}")
                }
                SortCondition::BeginsWith(prefix) => {
                    let p = out.value(AttributeValue::S(prefix.clone()));
                    format!("begins_with({sk_name}, {p})")
                }
            };
            out.expression = format!("{} AND {}", out.expression, clause);
        }

        out
    }
}

/// Caller-supplied filter expression, passed through to the store
#[derive(Debug, Clone, Default)]
pub struct FilterExpression {
    pub expression: String,
    pub names: HashMap<String, String>,
    pub values: HashMap<String, AttributeValue>,
}

/// One tagged update action
#[derive(Debug, Clone)]
pub enum UpdateAction {
    /// `SET attr = value`
    Set {
        attr: String,
        value: AttributeValue,
    },
    /// `REMOVE attr`
    Remove { attr: String },
    /// `ADD attr value` (numbers and sets)
    Add {
        attr: String,
        value: AttributeValue,
    },
    /// `DELETE attr value` (set elements)
    Delete {
        attr: String,
        value: AttributeValue,
    },
}

impl UpdateAction {
    /// Attribute this action targets
    pub fn attribute(&self) -> &str {
        match self {
            UpdateAction::Set { attr, .. }
            | UpdateAction::Remove { attr }
            | UpdateAction::Add { attr, .. }
            | UpdateAction::Delete { attr, .. } => attr,
        }
    }
}

/// Ordered collection of update actions with builder-style constructors
#[derive(Debug, Clone, Default)]
pub struct Update {
    actions: Vec<UpdateAction>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, attr: impl Into<String>, value: AttributeValue) -> Self {
        self.actions.push(UpdateAction::Set {
            attr: attr.into(),
            value,
        });
        self
    }

    pub fn remove(mut self, attr: impl Into<String>) -> Self {
        self.actions.push(UpdateAction::Remove { attr: attr.into() });
        self
    }

    pub fn add(mut self, attr: impl Into<String>, value: AttributeValue) -> Self {
        self.actions.push(UpdateAction::Add {
            attr: attr.into(),
            value,
        });
        self
    }

    pub fn delete(mut self, attr: impl Into<String>, value: AttributeValue) -> Self {
        self.actions.push(UpdateAction::Delete {
            attr: attr.into(),
            value,
        });
        self
    }

    /// Append an already-built action
    pub fn push(&mut self, action: UpdateAction) {
        self.actions.push(action);
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> &[UpdateAction] {
        &self.actions
    }

    /// Attribute/value pairs from SET actions, in declaration order
    pub fn set_changes(&self) -> Vec<(&str, &AttributeValue)> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                UpdateAction::Set { attr, value } => Some((attr.as_str(), value)),
                _ => None,
            })
            .collect()
    }

    /// Attributes targeted by REMOVE actions, in declaration order
    pub fn removed_attrs(&self) -> Vec<&str> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                UpdateAction::Remove { attr } => Some(attr.as_str()),
                _ => None,
            })
            .collect()
    }

    /// True when any ADD or DELETE action is present
    pub fn has_arithmetic_actions(&self) -> bool {
        self.actions
            .iter()
            .any(|a| matches!(a, UpdateAction::Add { .. } | UpdateAction::Delete { .. }))
    }

    /// Render to an update expression with placeholder maps
    ///
    /// Actions are grouped into at most one SET, REMOVE, ADD, and DELETE
    /// clause each, in that order.
    pub fn render(&self) -> RenderedExpression {
        let mut out = RenderedExpression::default();
        let mut set_parts = Vec::new();
        let mut remove_parts = Vec::new();
        let mut add_parts = Vec::new();
        let mut delete_parts = Vec::new();

        for action in &self.actions {
            match action {
                UpdateAction::Set { attr, value } => {
                    let name = out.name(attr);
                    let value = out.value(value.clone());
                    set_parts.push(format!("{name} = {value}"));
                }
                UpdateAction::Remove { attr } => {
                    remove_parts.push(out.name(attr));
                }
                UpdateAction::Add { attr, value } => {
                    let name = out.name(attr);
                    let value = out.value(value.clone());
                    add_parts.push(format!("{name} {value}"));
                }
                UpdateAction::Delete { attr, value } => {
                    let name = out.name(attr);
                    let value = out.value(value.clone());
                    delete_parts.push(format!("{name} {value}"));
                }
            }
        }

        let mut clauses = Vec::new();
        if !set_parts.is_empty() {
            clauses.push(format!("SET {}", set_parts.join(", ")));
        }
        if !remove_parts.is_empty() {
            clauses.push(format!("REMOVE {}", remove_parts.join(", ")));
        }
        if !add_parts.is_empty() {
            clauses.push(format!("ADD {}", add_parts.join(", ")));
        }
        if !delete_parts.is_empty() {
            clauses.push(format!("DELETE {}", delete_parts.join(", ")));
        }
        out.expression = clauses.join(" ");
        out
    }
}

/// A rendered expression plus its placeholder maps
#[derive(Debug, Clone, Default)]
pub struct RenderedExpression {
    pub expression: String,
    pub names: HashMap<String, String>,
    pub values: HashMap<String, AttributeValue>,
}

impl RenderedExpression {
    /// Register an attribute name, returning its `#n` placeholder
    fn name(&mut self, attr: &str) -> String {
        let placeholder = format!("#n{}", self.names.len());
        self.names.insert(placeholder.clone(), attr.to_string());
        placeholder
    }

    /// Register a value, returning its `:v` placeholder
    fn value(&mut self, value: AttributeValue) -> String {
        let placeholder = format!(":v{}", self.values.len());
        self.values.insert(placeholder.clone(), value);
        placeholder
    }
}
