//! Loosely-typed tables for remote artifacts whose column sets are only known
//! at runtime (metadata, dictionaries, tract lookups, time series, schedules).
//!
//! Cells are SQLite storage classes so rows can be handed straight to
//! [`crate::db::store::Store::upsert`].

use crate::error::{Error, Result};
use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type};
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

const NULL_MARKERS: [&str; 7] = ["", "NA", "N/A", "NaN", "nan", "NULL", "null"];

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    /// Infer a cell from delimited text the same way for every reader.
    pub fn parse(raw: &str) -> Value {
        let trimmed = raw.trim();
        if NULL_MARKERS.contains(&trimmed) {
            return Value::Null;
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Value::Integer(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            return Value::Real(f).normalized();
        }
        Value::Text(trimmed.to_string())
    }

    /// NaN is not a value SQLite can store meaningfully.
    pub fn normalized(self) -> Value {
        match self {
            Value::Real(f) if f.is_nan() => Value::Null,
            other => other,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Real(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Real(f) => Some(*f),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Null => None,
        }
    }

    /// Text rendering used for joins and grouping keys.
    pub fn render(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Integer(i) => Some(i.to_string()),
            Value::Real(f) => Some(f.to_string()),
            Value::Text(s) => Some(s.clone()),
        }
    }

    pub fn from_json(value: serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Integer(i64::from(b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => n.as_f64().map(Value::Real).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s),
            other => Value::Text(other.to_string()),
        }
    }

    /// Compare against an allow-list entry from a filter document.
    /// Numbers compare numerically, everything else by text.
    pub fn matches(&self, allowed: &serde_json::Value) -> bool {
        match allowed {
            serde_json::Value::Null => self.is_null(),
            serde_json::Value::Number(n) => match (self.as_f64(), n.as_f64()) {
                (Some(lhs), Some(rhs)) => lhs == rhs,
                _ => false,
            },
            serde_json::Value::String(s) => self.render().as_deref() == Some(s.as_str()),
            serde_json::Value::Bool(b) => self.as_i64() == Some(i64::from(*b)),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Frame {
    pub fn new(columns: Vec<String>) -> Self {
        Frame {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn require_column(&self, artifact: &str, name: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| Error::decode(artifact, format!("missing column '{}'", name)))
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// `in.county` -> `in_county`, `Field Name` -> `field_name`.
    pub fn normalize_column_names(&mut self) {
        for c in &mut self.columns {
            *c = crate::utils::normalize_column_name(c);
        }
    }

    /// Set (or append) a column holding the same value on every row.
    pub fn set_constant(&mut self, name: &str, value: Value) {
        match self.column_index(name) {
            Some(idx) => {
                for row in &mut self.rows {
                    row[idx] = value.clone();
                }
            }
            None => {
                self.columns.push(name.to_string());
                for row in &mut self.rows {
                    row.push(value.clone());
                }
            }
        }
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&[Value]) -> bool) {
        self.rows.retain(|r| keep(r));
    }

    pub fn from_delimited(artifact: &str, data: &[u8], delimiter: u8) -> Result<Frame> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(false)
            .from_reader(data);
        let headers = reader.headers().map_err(|e| Error::decode(artifact, e))?;
        let mut frame = Frame::new(headers.iter().map(|h| h.trim().to_string()).collect());
        for record in reader.records() {
            let record = record.map_err(|e| Error::decode(artifact, e))?;
            frame.rows.push(record.iter().map(Value::parse).collect());
        }
        Ok(frame)
    }

    pub fn from_parquet(artifact: &str, data: Bytes) -> Result<Frame> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(data)
            .map_err(|e| Error::decode(artifact, format!("parquet reader init failed: {e}")))?;
        // Columns come from the file schema so a zero-row file still yields its header.
        let mut frame = Frame::new(builder.schema().fields().iter().map(|f| f.name().clone()).collect());
        let reader = builder
            .build()
            .map_err(|e| Error::decode(artifact, format!("parquet reader build failed: {e}")))?;

        for batch in reader {
            let batch = batch.map_err(|e| Error::decode(artifact, format!("parquet read batch failed: {e}")))?;
            let columns = batch
                .columns()
                .iter()
                .map(|array| column_values(artifact, array))
                .collect::<Result<Vec<_>>>()?;
            for row in 0..batch.num_rows() {
                frame.rows.push(columns.iter().map(|c| c[row].clone()).collect());
            }
        }
        Ok(frame)
    }

    /// Decode by path extension: `.parquet`, `.tsv`, anything else as CSV.
    pub fn from_artifact(artifact: &str, data: Vec<u8>) -> Result<Frame> {
        if artifact.ends_with(".parquet") {
            Frame::from_parquet(artifact, Bytes::from(data))
        } else if artifact.ends_with(".tsv") {
            Frame::from_delimited(artifact, &data, b'\t')
        } else {
            Frame::from_delimited(artifact, &data, b',')
        }
    }
}

fn column_values(artifact: &str, array: &ArrayRef) -> Result<Vec<Value>> {
    let cast_to = |target: &DataType| cast(array, target).map_err(|e| Error::decode(artifact, e));
    let values = match array.data_type() {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => {
            let ints = cast_to(&DataType::Int64)?;
            let ints = ints.as_primitive::<Int64Type>();
            (0..ints.len())
                .map(|i| if ints.is_null(i) { Value::Null } else { Value::Integer(ints.value(i)) })
                .collect()
        }
        DataType::Float16 | DataType::Float32 | DataType::Float64 => {
            let reals = cast_to(&DataType::Float64)?;
            let reals = reals.as_primitive::<Float64Type>();
            (0..reals.len())
                .map(|i| {
                    if reals.is_null(i) {
                        Value::Null
                    } else {
                        Value::Real(reals.value(i)).normalized()
                    }
                })
                .collect()
        }
        DataType::Boolean => {
            let flags = array.as_boolean();
            (0..flags.len())
                .map(|i| {
                    if flags.is_null(i) {
                        Value::Null
                    } else {
                        Value::Integer(i64::from(flags.value(i)))
                    }
                })
                .collect()
        }
        other => {
            let is_temporal = matches!(other, DataType::Timestamp(..) | DataType::Date32 | DataType::Date64);
            let text = cast_to(&DataType::Utf8)?;
            let text = text.as_string::<i32>();
            (0..text.len())
                .map(|i| {
                    if text.is_null(i) {
                        Value::Null
                    } else if is_temporal {
                        Value::Text(text.value(i).replacen('T', " ", 1))
                    } else {
                        Value::Text(text.value(i).to_string())
                    }
                })
                .collect()
        }
    };
    Ok(values)
}
