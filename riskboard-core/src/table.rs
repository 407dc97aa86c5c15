//! Metric tables - typed in-memory datasets
//!
//! Global invariants enforced:
//! - Every record carries exactly the table schema
//! - Tables are never mutated in place (filter returns a new table)
//! - Grouping output iterates in deterministic (sorted key) order

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A single cell: numeric measure, categorical label, or an empty cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Label(String),
    Missing,
}

impl Value {
    /// Parse a raw text cell (numbers first, empty as missing)
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Value::Missing;
        }
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => Value::Number(n),
            _ => Value::Label(trimmed.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Render the value as a grouping key component
    pub fn as_key(&self) -> String {
        match self {
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Value::Number(n) => n.to_string(),
            Value::Label(s) => s.clone(),
            Value::Missing => String::new(),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(f64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Label(value.to_string())
    }
}

/// One row of a metric table, keyed by dimension name
pub type Record = BTreeMap<String, Value>;

/// Aggregation applied to a measure within each group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Sum,
    Mean,
    Max,
    Min,
    Count,
}

/// Running state for one group
#[derive(Default)]
struct Accumulator {
    rows: usize,
    numeric: usize,
    sum: f64,
    max: Option<f64>,
    min: Option<f64>,
}

impl Accumulator {
    fn push(&mut self, value: Option<f64>) {
        self.rows += 1;
        if let Some(v) = value {
            self.numeric += 1;
            self.sum += v;
            self.max = Some(self.max.map_or(v, |m| m.max(v)));
            self.min = Some(self.min.map_or(v, |m| m.min(v)));
        }
    }

    fn finish(&self, aggregation: Aggregation) -> Option<f64> {
        match aggregation {
            Aggregation::Sum => Some(self.sum),
            Aggregation::Count => Some(self.rows as f64),
            Aggregation::Mean if self.numeric > 0 => Some(self.sum / self.numeric as f64),
            Aggregation::Mean => None,
            Aggregation::Max => self.max,
            Aggregation::Min => self.min,
        }
    }
}

/// Ordered sequence of records sharing one schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricTable {
    schema: Vec<String>,
    records: Vec<Record>,
}

impl MetricTable {
    /// Build a table, checking every record against the schema
    pub fn new(schema: Vec<String>, records: Vec<Record>) -> EngineResult<Self> {
        let unique: BTreeSet<&String> = schema.iter().collect();
        if unique.len() != schema.len() {
            return Err(EngineError::Schema {
                reason: format!("duplicate dimension in schema [{}]", schema.join(", ")),
            });
        }

        for (index, record) in records.iter().enumerate() {
            if record.len() != schema.len() || !schema.iter().all(|d| record.contains_key(d)) {
                let keys: Vec<&str> = record.keys().map(String::as_str).collect();
                return Err(EngineError::Schema {
                    reason: format!(
                        "record {} has dimensions [{}], expected [{}]",
                        index,
                        keys.join(", "),
                        schema.join(", ")
                    ),
                });
            }
        }

        Ok(MetricTable { schema, records })
    }

    /// Build a table from positional rows (one value per schema entry)
    pub fn from_rows<S: AsRef<str>>(schema: &[S], rows: Vec<Vec<Value>>) -> EngineResult<Self> {
        let schema: Vec<String> = schema.iter().map(|s| s.as_ref().to_string()).collect();
        let mut records = Vec::with_capacity(rows.len());
        for (index, row) in rows.into_iter().enumerate() {
            if row.len() != schema.len() {
                return Err(EngineError::Schema {
                    reason: format!(
                        "row {} has {} values, expected {}",
                        index,
                        row.len(),
                        schema.len()
                    ),
                });
            }
            records.push(schema.iter().cloned().zip(row).collect());
        }
        MetricTable::new(schema, records)
    }

    pub fn schema(&self) -> &[String] {
        &self.schema
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.schema.iter().any(|d| d == name)
    }

    fn require(&self, name: &str) -> EngineResult<()> {
        if self.has_column(name) {
            Ok(())
        } else {
            Err(EngineError::missing_column(name, &self.schema))
        }
    }

    /// All values of one column, in record order
    pub fn column(&self, name: &str) -> EngineResult<Vec<&Value>> {
        self.require(name)?;
        Ok(self
            .records
            .iter()
            .filter_map(|record| record.get(name))
            .collect())
    }

    /// Numeric view of a column; non-numeric cells become `None`
    pub fn numeric_column(&self, name: &str) -> EngineResult<Vec<Option<f64>>> {
        Ok(self.column(name)?.into_iter().map(Value::as_f64).collect())
    }

    /// Distinct key values of a dimension, sorted
    pub fn distinct(&self, dim: &str) -> EngineResult<Vec<String>> {
        let values: BTreeSet<String> = self.column(dim)?.into_iter().map(Value::as_key).collect();
        Ok(values.into_iter().collect())
    }

    /// New table holding the records that satisfy `predicate`
    pub fn filter<F>(&self, predicate: F) -> MetricTable
    where
        F: Fn(&Record) -> bool,
    {
        MetricTable {
            schema: self.schema.clone(),
            records: self
                .records
                .iter()
                .filter(|record| predicate(record))
                .cloned()
                .collect(),
        }
    }

    /// New table holding records whose `dim` renders to `key`
    pub fn filter_eq(&self, dim: &str, key: &str) -> EngineResult<MetricTable> {
        self.require(dim)?;
        Ok(self.filter(|record| record.get(dim).map(Value::as_key).as_deref() == Some(key)))
    }

    /// Aggregate `measure` over each distinct tuple of `dims`
    ///
    /// Non-numeric measure cells are ignored by numeric aggregations. A group
    /// without numeric cells sums to 0 and is omitted for mean/min/max.
    pub fn group_by(
        &self,
        dims: &[&str],
        measure: &str,
        aggregation: Aggregation,
    ) -> EngineResult<BTreeMap<Vec<String>, f64>> {
        for dim in dims {
            self.require(dim)?;
        }
        self.require(measure)?;

        let mut groups: BTreeMap<Vec<String>, Accumulator> = BTreeMap::new();
        for record in &self.records {
            let key: Vec<String> = dims
                .iter()
                .map(|dim| record.get(*dim).map(Value::as_key).unwrap_or_default())
                .collect();
            let value = record.get(measure).and_then(Value::as_f64);
            groups.entry(key).or_default().push(value);
        }

        Ok(groups
            .into_iter()
            .filter_map(|(key, acc)| acc.finish(aggregation).map(|v| (key, v)))
            .collect())
    }

    /// Single-dimension grouping keyed by the plain label
    pub fn group_by_one(
        &self,
        dim: &str,
        measure: &str,
        aggregation: Aggregation,
    ) -> EngineResult<BTreeMap<String, f64>> {
        Ok(self
            .group_by(&[dim], measure, aggregation)?
            .into_iter()
            .filter_map(|(mut key, value)| key.pop().map(|k| (k, value)))
            .collect())
    }
}
