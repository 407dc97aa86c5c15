//! Segment views - label distributions and memberships
//!
//! Summarizes externally produced classification and clustering tables.
//! Labels are opaque: nothing here interprets what a label means.
//!
//! Global invariants enforced:
//! - Views are strictly derived (never stored, always computed)
//! - Deterministic ordering

use crate::error::EngineResult;
use crate::table::{MetricTable, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of entities carrying one label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LabelCount {
    pub label: String,
    pub count: usize,
}

/// Count records per label of `label_dim`, largest first then by label
pub fn distribution(table: &MetricTable, label_dim: &str) -> EngineResult<Vec<LabelCount>> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for value in table.column(label_dim)? {
        *counts.entry(value.as_key()).or_default() += 1;
    }

    let mut out: Vec<LabelCount> = counts
        .into_iter()
        .map(|(label, count)| LabelCount { label, count })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));
    Ok(out)
}

/// Entities of `entity_dim` grouped by the label in `group_dim`
///
/// Each member list is sorted and deduplicated.
pub fn members_by(
    table: &MetricTable,
    group_dim: &str,
    entity_dim: &str,
) -> EngineResult<BTreeMap<String, Vec<String>>> {
    let groups = table.column(group_dim)?;
    let entities = table.column(entity_dim)?;

    let mut members: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (group, entity) in groups.into_iter().zip(entities) {
        members
            .entry(group.as_key())
            .or_default()
            .push(entity.as_key());
    }
    for list in members.values_mut() {
        list.sort();
        list.dedup();
    }
    Ok(members)
}

/// Mean of the `n` largest numeric values of `measure`
///
/// Returns `None` when the column has no numeric values or `n` is 0.
pub fn top_mean(table: &MetricTable, measure: &str, n: usize) -> EngineResult<Option<f64>> {
    let mut values: Vec<f64> = table
        .column(measure)?
        .into_iter()
        .filter_map(Value::as_f64)
        .collect();
    values.sort_by(|a, b| b.total_cmp(a));
    values.truncate(n);

    if values.is_empty() {
        return Ok(None);
    }
    Ok(Some(values.iter().sum::<f64>() / values.len() as f64))
}
