use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum JobInputValue {
    Long(i64),
    TextList(Vec<String>),
}

/// Opaque key/value payload handed to a worker at submission time.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobInput {
    values: BTreeMap<String, JobInputValue>,
}

impl JobInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_long(mut self, key: impl Into<String>, value: i64) -> Self {
        self.values.insert(key.into(), JobInputValue::Long(value));
        self
    }

    pub fn with_text_list(mut self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.values
            .insert(key.into(), JobInputValue::TextList(values));
        self
    }

    /// Returns `default` when the key is missing or holds a non-long value.
    pub fn get_long(&self, key: &str, default: i64) -> i64 {
        match self.values.get(key) {
            Some(JobInputValue::Long(value)) => *value,
            _ => default,
        }
    }

    pub fn get_text_list(&self, key: &str) -> Option<&[String]> {
        match self.values.get(key) {
            Some(JobInputValue::TextList(values)) => Some(values),
            _ => None,
        }
    }
}
