//! Typed job parameters.
//!
//! A job instance is identified by its name plus its parameter set. Parameters
//! are typed scalars; the type is part of the identity, so `"1"` and `1` are
//! different parameter values.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A single typed job parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobParameter {
    String(String),
    Long(i64),
    Double(f64),
    Date(DateTime<Utc>),
}

impl JobParameter {
    pub fn type_name(&self) -> &'static str {
        match self {
            JobParameter::String(_) => "STRING",
            JobParameter::Long(_) => "LONG",
            JobParameter::Double(_) => "DOUBLE",
            JobParameter::Date(_) => "DATE",
        }
    }

    /// Canonical `TYPE:value` rendering used for identity hashing.
    pub fn canonical(&self) -> String {
        let value = match self {
            JobParameter::String(s) => s.clone(),
            JobParameter::Long(v) => v.to_string(),
            // -0.0 == 0.0, so both must render alike.
            JobParameter::Double(v) if *v == 0.0 => 0.0_f64.to_string(),
            JobParameter::Double(v) => v.to_string(),
            JobParameter::Date(d) => d.to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        format!("{}:{}", self.type_name(), value)
    }
}

impl From<&str> for JobParameter {
    fn from(value: &str) -> Self {
        JobParameter::String(value.to_string())
    }
}

impl From<String> for JobParameter {
    fn from(value: String) -> Self {
        JobParameter::String(value)
    }
}

impl From<i64> for JobParameter {
    fn from(value: i64) -> Self {
        JobParameter::Long(value)
    }
}

impl From<f64> for JobParameter {
    fn from(value: f64) -> Self {
        JobParameter::Double(value)
    }
}

impl From<DateTime<Utc>> for JobParameter {
    fn from(value: DateTime<Utc>) -> Self {
        JobParameter::Date(value)
    }
}

/// Unordered set of named job parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobParameters {
    params: HashMap<String, JobParameter>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<JobParameter>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<JobParameter>) {
        self.params.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&JobParameter> {
        self.params.get(key)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JobParameter)> {
        self.params.iter()
    }
}

impl FromIterator<(String, JobParameter)> for JobParameters {
    fn from_iter<T: IntoIterator<Item = (String, JobParameter)>>(iter: T) -> Self {
        Self {
            params: iter.into_iter().collect(),
        }
    }
}
