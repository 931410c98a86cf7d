use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

pub const NO_RESULT_MESSAGE: &str = "Query executed successfully (no result).";
pub const NOTHING_USABLE_MESSAGE: &str = "No usable result to display.";
pub const NO_TABLES_MESSAGE: &str = "No tables found in the database.";

/// A single column value, keeping the scalar type the driver reported.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    Json(serde_json::Value),
    Array(Vec<Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(n) => serializer.serialize_i64(*n),
            Value::Float(n) => serializer.serialize_f64(*n),
            // Decimal has an inherent `serialize` returning raw bytes
            Value::Decimal(d) => Serialize::serialize(d, serializer),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Timestamp(dt) => {
                serializer.collect_str(&dt.format("%Y-%m-%d %H:%M:%S%.f"))
            }
            Value::TimestampTz(dt) => serializer.serialize_str(&dt.to_rfc3339()),
            Value::Date(d) => serializer.collect_str(d),
            Value::Time(t) => serializer.collect_str(&t.format("%H:%M:%S%.f")),
            Value::Json(v) => v.serialize(serializer),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

/// One row, as `(column name, value)` pairs in driver column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new(fields: Vec<(String, Value)>) -> Self {
        Record { fields }
    }

    /// First value reported under `column`
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Raw tabular output of one statement, before normalization.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// What a single statement produced on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementOutput {
    /// The statement described a row shape (possibly with zero rows)
    Rows(ResultSet),
    /// DDL/DML without a returning clause
    Done { rows_affected: u64 },
}

/// The single value handed back for one query batch.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    /// Result set of the last data-producing statement. Zero rows is valid.
    Rows {
        columns: Vec<String>,
        records: Vec<Record>,
    },
    /// Success without tabular data
    Message(String),
    /// Sanitized cause of the failure that aborted the batch
    Error(String),
}

impl ExecutionResult {
    pub fn no_result() -> Self {
        ExecutionResult::Message(NO_RESULT_MESSAGE.to_string())
    }

    pub fn nothing_usable() -> Self {
        ExecutionResult::Message(NOTHING_USABLE_MESSAGE.to_string())
    }

    pub fn records(&self) -> Option<&[Record]> {
        match self {
            ExecutionResult::Rows { records, .. } => Some(records),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ExecutionResult::Error(_))
    }
}

impl Serialize for ExecutionResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ExecutionResult::Rows { records, .. } => records.serialize(serializer),
            ExecutionResult::Message(message) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("message", message)?;
                map.end()
            }
            ExecutionResult::Error(error) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("error", error)?;
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes_in_column_order() {
        let record = Record::new(vec![
            ("zeta".into(), Value::Int(1)),
            ("alpha".into(), Value::Null),
            ("mid".into(), Value::from("x")),
        ]);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"zeta":1,"alpha":null,"mid":"x"}"#);
    }

    #[test]
    fn status_records_serialize_as_single_key_objects() {
        let ok = serde_json::to_value(ExecutionResult::no_result()).unwrap();
        assert_eq!(ok, serde_json::json!({ "message": NO_RESULT_MESSAGE }));

        let err = serde_json::to_value(ExecutionResult::Error("boom".into())).unwrap();
        assert_eq!(err, serde_json::json!({ "error": "boom" }));
    }

    #[test]
    fn zero_rows_serialize_as_empty_array() {
        let empty = ExecutionResult::Rows {
            columns: vec!["id".into()],
            records: vec![],
        };
        assert_eq!(serde_json::to_string(&empty).unwrap(), "[]");
        assert_eq!(empty.records().map(|r| r.len()), Some(0));
    }

    #[test]
    fn temporal_values_render_as_strings() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let ts = date.and_hms_opt(13, 5, 0).unwrap();
        assert_eq!(
            serde_json::to_string(&Value::Timestamp(ts)).unwrap(),
            "\"2024-02-29 13:05:00\""
        );
        assert_eq!(
            serde_json::to_string(&Value::Date(date)).unwrap(),
            "\"2024-02-29\""
        );
    }

    #[test]
    fn decimals_keep_their_exact_text() {
        let price = Value::Decimal(Decimal::new(1250, 2));
        assert_eq!(serde_json::to_string(&price).unwrap(), "\"12.50\"");

        let record = Record::new(vec![("total".into(), Value::Decimal(Decimal::new(-5, 1)))]);
        assert_eq!(serde_json::to_string(&record).unwrap(), r#"{"total":"-0.5"}"#);
    }
}
