//! Schema-less records exchanged between the local and remote stores.
//!
//! A [`Record`] is one row of a table: a map of field name to a small
//! [`FieldValue`] variant. Every synchronizable record carries an `id` field;
//! an optional `updated_at` timestamp breaks ties between the two stores and
//! `_deleted: true` marks a tombstone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Field holding the record's unique identifier.
pub const ID_FIELD: &str = "id";
/// Field holding the record's last-modified timestamp.
pub const UPDATED_AT_FIELD: &str = "updated_at";
/// Field marking a record as deleted on the side it came from.
pub const TOMBSTONE_FIELD: &str = "_deleted";

/// Errors raised when a record cannot take part in sync.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("record has no 'id' field")]
    MissingId,

    #[error("record field 'id' must be text or integer, got {0}")]
    InvalidId(&'static str),

    #[error("record must be a JSON object")]
    NotAnObject,
}

/// A single field value.
///
/// Serialized untagged so records travel as plain JSON objects. Strings that
/// parse as RFC 3339 come back as [`FieldValue::Timestamp`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl FieldValue {
    fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Bool(_) => "bool",
            FieldValue::Integer(_) => "integer",
            FieldValue::Float(_) => "float",
            FieldValue::Timestamp(_) => "timestamp",
            FieldValue::Text(_) => "text",
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value)
    }
}

/// One row of a synchronized table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, FieldValue>);

impl Record {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style field setter.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the record's identifier as a string.
    ///
    /// Integer ids are rendered in decimal so both stores key on the same text.
    pub fn id(&self) -> Result<String, RecordError> {
        match self.0.get(ID_FIELD) {
            Some(FieldValue::Text(id)) if !id.is_empty() => Ok(id.clone()),
            Some(FieldValue::Text(_)) | None | Some(FieldValue::Null) => {
                Err(RecordError::MissingId)
            }
            Some(FieldValue::Integer(id)) => Ok(id.to_string()),
            Some(other) => Err(RecordError::InvalidId(other.type_name())),
        }
    }

    /// Last-modified timestamp, if the record carries one.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        match self.0.get(UPDATED_AT_FIELD) {
            Some(FieldValue::Timestamp(ts)) => Some(*ts),
            Some(FieldValue::Text(s)) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok(),
            _ => None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self.0.get(TOMBSTONE_FIELD), Some(FieldValue::Bool(true)))
    }

    /// Whether `self` should be replaced by `incoming`.
    ///
    /// When both sides carry `updated_at` the strictly newer one wins;
    /// otherwise the incoming write wins.
    pub fn is_superseded_by(&self, incoming: &Record) -> bool {
        match (self.updated_at(), incoming.updated_at()) {
            (Some(current), Some(next)) => next >= current,
            _ => true,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl TryFrom<serde_json::Value> for Record {
    type Error = RecordError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        if !value.is_object() {
            return Err(RecordError::NotAnObject);
        }
        serde_json::from_value(value).map_err(|_| RecordError::NotAnObject)
    }
}

impl FromIterator<(String, FieldValue)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// What happened to a record in the store it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOperation::Create => write!(f, "create"),
            SyncOperation::Update => write!(f, "update"),
            SyncOperation::Delete => write!(f, "delete"),
        }
    }
}

impl FromStr for SyncOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(SyncOperation::Create),
            "update" => Ok(SyncOperation::Update),
            "delete" => Ok(SyncOperation::Delete),
            _ => Err(format!(
                "Invalid sync operation '{}'. Valid options: create, update, delete",
                s
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_text_and_integer_ids() {
        let record = Record::new().with("id", "p1");
        assert_eq!(record.id().unwrap(), "p1");

        let record = Record::new().with("id", 42i64);
        assert_eq!(record.id().unwrap(), "42");
    }

    #[test]
    fn test_missing_or_invalid_id() {
        assert_eq!(Record::new().id(), Err(RecordError::MissingId));
        assert_eq!(
            Record::new().with("id", "").id(),
            Err(RecordError::MissingId)
        );
        assert_eq!(
            Record::new().with("id", true).id(),
            Err(RecordError::InvalidId("bool"))
        );
    }

    #[test]
    fn test_json_is_a_plain_object() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let record = Record::new()
            .with("id", "p1")
            .with("name", "Aspirin")
            .with("stock", 12i64)
            .with("price", 4.5)
            .with("active", true)
            .with("updated_at", ts);

        let json: serde_json::Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();
        assert_eq!(json["name"], "Aspirin");
        assert_eq!(json["stock"], 12);
        assert_eq!(json["active"], true);

        let parsed = Record::try_from(json).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(parsed.updated_at(), Some(ts));
    }

    #[test]
    fn test_non_object_rejected() {
        let result = Record::try_from(serde_json::json!([1, 2, 3]));
        assert_eq!(result, Err(RecordError::NotAnObject));
    }

    #[test]
    fn test_newer_timestamp_wins() {
        let older = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let newer = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        let current = Record::new().with("id", "c1").with("updated_at", newer);
        let stale = Record::new().with("id", "c1").with("updated_at", older);
        assert!(!current.is_superseded_by(&stale));
        assert!(stale.is_superseded_by(&current));

        // Without timestamps the incoming write always wins
        let untimed = Record::new().with("id", "c1");
        assert!(current.is_superseded_by(&untimed));
    }

    #[test]
    fn test_tombstone() {
        assert!(Record::new().with("_deleted", true).is_tombstone());
        assert!(!Record::new().with("_deleted", false).is_tombstone());
    }

    #[test]
    fn test_sync_operation_from_str() {
        assert_eq!(
            SyncOperation::from_str("CREATE").unwrap(),
            SyncOperation::Create
        );
        assert!(SyncOperation::from_str("merge").is_err());
        assert_eq!(SyncOperation::Delete.to_string(), "delete");
    }
}
