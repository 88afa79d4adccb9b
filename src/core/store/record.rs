use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single durable record: opaque JSON payload plus the instant it was
/// written. Both tiers persist exactly this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub key: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl StoredRecord {
    /// Builds a record stamped with the current time.
    pub fn new(key: impl Into<String>, data: Value) -> Self {
        Self {
            key: key.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}
