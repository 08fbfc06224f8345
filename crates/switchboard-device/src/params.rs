//! Local parameters a device serves to its peers.

use serde_json::Value;
use std::collections::BTreeMap;

/// Named values a device exposes to GET and SET.
pub trait ParamStore: Send {
    /// Current value of `name`, if the parameter exists.
    fn get(&self, name: &str) -> Option<Value>;

    /// Overwrite an existing parameter. Returns `false` when `name` is not a
    /// parameter of this store; unknown names are never created.
    fn set(&mut self, name: &str, value: Value) -> bool;

    /// All parameter names.
    fn names(&self) -> Vec<String>;
}

/// Ordered in-memory parameter store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: BTreeMap<String, Value>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style declaration of a parameter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.declare(name, value);
        self
    }

    /// Declare a parameter, replacing its value if it already exists.
    pub fn declare(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl ParamStore for Params {
    fn get(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }

    fn set(&mut self, name: &str, value: Value) -> bool {
        match self.values.get_mut(name) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    fn names(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
