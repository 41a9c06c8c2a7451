//! Record kinds stored by Bulwark and their document representation.
//!
//! Records are persisted as camelCase JSON documents keyed by a store-assigned
//! identifier. The identifier is not part of the record itself; it is the key
//! under which the document lives in its collection.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

/// A stored document: field name to JSON value.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// The kinds of record Bulwark knows how to store, trash and restore.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Alert,
    Statistic,
    Log,
}

impl RecordKind {
    /// Every known record kind.
    pub const ALL: [RecordKind; 3] = [Self::Alert, Self::Statistic, Self::Log];

    /// Tag written into trash entries (`type` field).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alert => "alert",
            Self::Statistic => "statistic",
            Self::Log => "log",
        }
    }

    /// Name of the collection holding live records of this kind.
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Alert => "alerts",
            Self::Statistic => "statistics",
            Self::Log => "logs",
        }
    }

    /// Resolve the record kind owning a collection.
    ///
    /// Only allow-listed collections resolve; anything else is rejected so that
    /// restores can never write into an arbitrary collection.
    pub fn from_collection(collection: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.collection() == collection)
            .ok_or_else(|| Error::UnknownCollection(collection.to_string()))
    }

    /// Check whether a collection name is one of the record collections.
    pub fn is_record_collection(collection: &str) -> bool {
        Self::from_collection(collection).is_ok()
    }
}

impl FromStr for RecordKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::UnknownKind(s.to_string()))
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Nested geo sub-object carried by alerts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoLocation {
    pub country: String,
    pub city: String,
}

/// A security alert.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Alert {
    pub status: String,
    pub verification_status: String,
    pub alert_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub tenant: String,
    pub kill_chain_stage: String,
    pub technique: String,
    pub src_ip: String,
    pub src_ip_type: String,
    pub source_geo: GeoLocation,
    pub destination_ip: String,
    pub dst_ip_type: String,
    pub destination_geo: GeoLocation,
    pub source_host: String,
    pub description: String,
    pub remarks: String,
    pub links: String,
}

impl Alert {
    /// Status given to alerts that do not carry one.
    pub const DEFAULT_STATUS: &'static str = "New";

    /// Verification status given to alerts that do not carry one.
    pub const DEFAULT_VERIFICATION_STATUS: &'static str = "To Be Confirmed";

    /// Create an alert with every field at its default and the given timestamp.
    pub fn new(timestamp: OffsetDateTime) -> Self {
        Self {
            timestamp,
            ..Self::default()
        }
    }
}

impl Default for Alert {
    fn default() -> Self {
        Self {
            status: Self::DEFAULT_STATUS.to_string(),
            verification_status: Self::DEFAULT_VERIFICATION_STATUS.to_string(),
            alert_name: String::new(),
            timestamp: OffsetDateTime::UNIX_EPOCH,
            tenant: String::new(),
            kill_chain_stage: String::new(),
            technique: String::new(),
            src_ip: String::new(),
            src_ip_type: String::new(),
            source_geo: GeoLocation::default(),
            destination_ip: String::new(),
            dst_ip_type: String::new(),
            destination_geo: GeoLocation::default(),
            source_host: String::new(),
            description: String::new(),
            remarks: String::new(),
            links: String::new(),
        }
    }
}

/// An aggregated statistic for a tenant and period.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticEntry {
    #[serde(default)]
    pub tenant: String,
    #[serde(default)]
    pub metric: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub period: String,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

/// A raw log line attached to a tenant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    #[serde(default)]
    pub tenant: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(default = "default_severity")]
    pub severity: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub message: String,
}

fn default_severity() -> String {
    "info".to_string()
}

/// A persisted domain entity of one of the known kinds.
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    Alert(Alert),
    Statistic(StatisticEntry),
    Log(LogEntry),
}

impl Record {
    /// The kind of this record.
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Alert(_) => RecordKind::Alert,
            Self::Statistic(_) => RecordKind::Statistic,
            Self::Log(_) => RecordKind::Log,
        }
    }

    /// The collection this record is stored in.
    pub fn collection(&self) -> &'static str {
        self.kind().collection()
    }

    /// Serialize into a store document.
    pub fn to_document(&self) -> Result<Document> {
        let value = match self {
            Self::Alert(alert) => serde_json::to_value(alert)?,
            Self::Statistic(entry) => serde_json::to_value(entry)?,
            Self::Log(entry) => serde_json::to_value(entry)?,
        };
        match value {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(Error::Serialization(format!(
                "record did not serialize to an object: {other}"
            ))),
        }
    }

    /// Decode a store document of the given kind.
    ///
    /// Fields that are not part of the record (for example restore stamps)
    /// are ignored.
    pub fn from_document(kind: RecordKind, document: Document) -> Result<Self> {
        let value = serde_json::Value::Object(document);
        let record = match kind {
            RecordKind::Alert => Self::Alert(decode(kind, value)?),
            RecordKind::Statistic => Self::Statistic(decode(kind, value)?),
            RecordKind::Log => Self::Log(decode(kind, value)?),
        };
        Ok(record)
    }
}

fn decode<T: DeserializeOwned>(kind: RecordKind, value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| invalid(kind, e))
}

fn invalid(kind: RecordKind, err: serde_json::Error) -> Error {
    Error::InvalidRecord {
        collection: kind.collection().to_string(),
        message: err.to_string(),
    }
}

impl From<Alert> for Record {
    fn from(alert: Alert) -> Self {
        Self::Alert(alert)
    }
}
