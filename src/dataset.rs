//! Inspection of persisted artifacts (`df` command).

use anyhow::Result;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::models::ExtractionMode;
use crate::storage::ArtifactStore;

/// Every row persisted for `mode`, duplicates dropped, optionally projected onto `columns`.
///
/// A projection is deduplicated again and sorted by its first column; missing columns read
/// as `null`. Without a projection rows keep their stored order.
pub async fn collect_rows<S>(store: &S, mode: ExtractionMode, columns: &[String]) -> Result<Vec<Value>>
where
    S: ArtifactStore + ?Sized,
{
    let rows = drop_duplicates(store.read_rows(mode).await?);
    if columns.is_empty() {
        return Ok(rows);
    }

    let mut projected = drop_duplicates(rows.iter().map(|row| project(row, columns)).collect());
    let first = &columns[0];
    projected.sort_by(|a, b| compare(&a[first], &b[first]));
    Ok(projected)
}

fn drop_duplicates(rows: Vec<Value>) -> Vec<Value> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| seen.insert(row.to_string()))
        .collect()
}

fn project(row: &Value, columns: &[String]) -> Value {
    let mut out = Map::new();
    for column in columns {
        out.insert(column.clone(), row.get(column).cloned().unwrap_or(Value::Null));
    }
    Value::Object(out)
}

/// Nulls first, then numbers, then strings, then anything else by its JSON text
fn compare(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Number(_) => 1,
            Value::String(_) => 2,
            _ => 3,
        }
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ if rank(a) != rank(b) => rank(a).cmp(&rank(b)),
        _ => a.to_string().cmp(&b.to_string()),
    }
}
