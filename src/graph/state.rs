// SPDX-License-Identifier: MIT

//! Workflow state, partial updates, and the per-field reducer registry.
//!
//! State is a flat map from field key to JSON value. Nodes never mutate it:
//! they receive a snapshot and return a [`StateUpdate`] holding only the
//! fields they changed. The executor folds updates into the state through
//! each field's registered [`Reducer`]; unregistered fields overwrite.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Merge function applied when a value lands on a field that already holds one.
///
/// Reducers are expected to be associative; `Sum` and `Union` are commutative
/// as well, so they are safe for fields written by concurrent branches whose
/// completion order is unspecified.
#[derive(Clone)]
pub enum Reducer {
    /// Replace the value (default for unregistered fields).
    Overwrite,
    /// Ordered concatenation onto an array.
    Append,
    /// Numeric addition; stays integral while both sides are integral.
    Sum,
    /// Array-as-set union, first-seen order preserved.
    Union,
    /// Shallow object merge, incoming keys win.
    Merge,
    /// Caller-supplied merge function.
    Custom(Arc<dyn Fn(Option<Value>, Value) -> Value + Send + Sync>),
}

impl fmt::Debug for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Reducer::Overwrite => "Overwrite",
            Reducer::Append => "Append",
            Reducer::Sum => "Sum",
            Reducer::Union => "Union",
            Reducer::Merge => "Merge",
            Reducer::Custom(_) => "Custom",
        };
        f.write_str(name)
    }
}

impl Reducer {
    /// Merge `incoming` into `existing`, producing the field's new value.
    pub fn apply(&self, existing: Option<Value>, incoming: Value) -> Value {
        match self {
            Reducer::Overwrite => incoming,
            Reducer::Append => {
                let mut items = match existing {
                    Some(Value::Array(a)) => a,
                    Some(other) => vec![other],
                    None => Vec::new(),
                };
                match incoming {
                    Value::Array(new_items) => items.extend(new_items),
                    other => items.push(other),
                }
                Value::Array(items)
            }
            Reducer::Sum => match existing {
                None => incoming,
                Some(prev) => {
                    if let (Some(a), Some(b)) = (prev.as_i64(), incoming.as_i64()) {
                        Value::from(a + b)
                    } else if let (Some(a), Some(b)) = (prev.as_f64(), incoming.as_f64()) {
                        Value::from(a + b)
                    } else {
                        incoming
                    }
                }
            },
            Reducer::Union => {
                let mut items = match existing {
                    Some(Value::Array(a)) => a,
                    Some(other) => vec![other],
                    None => Vec::new(),
                };
                let incoming_items = match incoming {
                    Value::Array(a) => a,
                    other => vec![other],
                };
                for item in incoming_items {
                    if !items.contains(&item) {
                        items.push(item);
                    }
                }
                Value::Array(items)
            }
            Reducer::Merge => {
                let mut obj = match existing {
                    Some(Value::Object(o)) => o,
                    _ => Map::new(),
                };
                if let Value::Object(new_obj) = incoming {
                    for (k, v) in new_obj {
                        obj.insert(k, v);
                    }
                }
                Value::Object(obj)
            }
            Reducer::Custom(f) => f(existing, incoming),
        }
    }
}

/// Field key → reducer map consulted by the executor at merge time.
#[derive(Debug, Clone, Default)]
pub struct ReducerRegistry {
    reducers: BTreeMap<String, Reducer>,
}

impl ReducerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reducer for a field. Re-registering replaces the previous one.
    pub fn register(&mut self, field: impl Into<String>, reducer: Reducer) {
        self.reducers.insert(field.into(), reducer);
    }

    /// Chainable form of [`register`](Self::register).
    pub fn with(mut self, field: impl Into<String>, reducer: Reducer) -> Self {
        self.register(field, reducer);
        self
    }

    /// The reducer for a field; `Overwrite` when none is registered.
    pub fn reducer_for(&self, field: &str) -> &Reducer {
        self.reducers.get(field).unwrap_or(&Reducer::Overwrite)
    }
}

/// The fields a node changed, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    fields: BTreeMap<String, Value>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-field update.
    pub fn of(field: impl Into<String>, value: Value) -> Self {
        Self::new().with(field, value)
    }

    pub fn with(mut self, field: impl Into<String>, value: Value) -> Self {
        self.fields.insert(field.into(), value);
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub(crate) fn into_fields(self) -> BTreeMap<String, Value> {
        self.fields
    }
}

/// The merged workflow state.
///
/// Ordered maps keep every iteration deterministic, which the merge protocol
/// relies on: identical runs produce byte-identical final states.
#[derive(Debug, Clone, Default)]
pub struct State {
    fields: BTreeMap<String, Value>,
    visits: BTreeMap<String, u32>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chainable insert for building an initial state.
    pub fn with(mut self, field: impl Into<String>, value: Value) -> Self {
        self.insert(field, value);
        self
    }

    /// Direct insert, bypassing reducers. Intended for initial-state setup;
    /// during a run all writes go through [`apply`](Self::apply).
    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Deserialize a field into a typed value. Returns `None` when the field
    /// is absent or does not match the expected shape.
    pub fn get_as<T: DeserializeOwned>(&self, field: &str) -> Option<T> {
        let value = self.fields.get(field)?;
        match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                log::warn!("state field '{}' has unexpected shape: {}", field, e);
                None
            }
        }
    }

    /// How many times a node has executed in this run.
    pub fn visits(&self, node: &str) -> u32 {
        self.visits.get(node).copied().unwrap_or(0)
    }

    pub(crate) fn record_visit(&mut self, node: &str) {
        *self.visits.entry(node.to_string()).or_insert(0) += 1;
    }

    /// Fold one node's update into the state through the registry.
    pub(crate) fn apply(&mut self, registry: &ReducerRegistry, update: StateUpdate) {
        for (field, incoming) in update.into_fields() {
            let existing = self.fields.remove(&field);
            let merged = registry.reducer_for(&field).apply(existing, incoming);
            self.fields.insert(field, merged);
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    /// The fields as a JSON object.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}
