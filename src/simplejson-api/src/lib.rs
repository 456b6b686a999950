use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of POST /query
///
/// Example:
/// {
///   "intervalMs": 1000,
///   "range": { "from": "2024-01-01T00:00:00.000Z", "to": "2024-01-01T06:00:00.000Z" },
///   "targets": [ { "target": "cpu", "type": "timeseries" } ]
/// }
///
/// Grafana sends a number of extra fields (`panelId`, `maxDataPoints`,
/// `scopedVars`, ...). They are ignored.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QueryRequest {
    #[serde(rename = "intervalMs")]
    pub interval_ms: i64,
    pub range: Range,
    pub targets: Vec<Target>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Range {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

/// A single requested metric
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Target {
    pub target: String,
    #[serde(rename = "type")]
    pub target_type: TargetType,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    /// The legacy simple-json-datasource plugin spells it `timeserie`.
    #[serde(rename = "timeseries", alias = "timeserie")]
    Timeseries,
    #[serde(rename = "table")]
    Table,
}

/// `[value, timestamp]`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Datapoint(pub Value, pub Value);

/// `[timestamp, value]`, matching the declared column order of a table
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TableRow(pub Value, pub Value);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Column {
    pub text: String,
}

impl Column {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TimeseriesFragment {
    pub target: String,
    pub datapoints: Vec<Datapoint>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TableFragment {
    pub target: String,
    pub columns: Vec<Column>,
    pub rows: Vec<TableRow>,
}

/// One element of the POST /query response array
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ResponseFragment {
    #[serde(rename = "timeseries")]
    Timeseries(TimeseriesFragment),
    #[serde(rename = "table")]
    Table(TableFragment),
}

/// Result of GET /
#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct SelfTestResponse {
    pub ok: bool,
}

/// Error body for rejected requests
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ApiError {
    /// Error category
    pub error: String,
    /// Human-readable error description
    pub message: String,
}

impl ApiError {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}
