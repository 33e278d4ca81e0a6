use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{EngineError, Result};
use crate::row::{Row, Value};

/// One component of a partition key. Restricted to scalars that are `Eq` and
/// `Hash`; floats and nulls are rejected at extraction time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl KeyValue {
    fn render(&self) -> String {
        match self {
            KeyValue::Str(s) => s.clone(),
            KeyValue::Int(i) => i.to_string(),
            KeyValue::Bool(b) => b.to_string(),
        }
    }
}

/// Ordered tuple of key column values identifying one physical storage unit
/// (Explicit layout) or one predicate scope (Predicate layout). Immutable
/// once a batch is formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey(pub Vec<KeyValue>);

impl PartitionKey {
    /// Extract the key from a row. Null or float components abort the whole
    /// ingest upstream; the error names the offending column and row.
    pub fn extract(row: &Row, row_idx: usize, key_columns: &[String]) -> Result<Self> {
        let mut components = Vec::with_capacity(key_columns.len());
        for column in key_columns {
            let component = match row.get(column) {
                Some(Value::String(s)) => KeyValue::Str(s.clone()),
                Some(Value::Int64(i)) => KeyValue::Int(*i),
                Some(Value::Bool(b)) => KeyValue::Bool(*b),
                Some(Value::Float64(_)) => {
                    return Err(EngineError::KeyExtraction {
                        column: column.clone(),
                        row: row_idx,
                        found: "a float (not hashable)".to_string(),
                    })
                }
                Some(Value::Null) | None => {
                    return Err(EngineError::KeyExtraction {
                        column: column.clone(),
                        row: row_idx,
                        found: "null".to_string(),
                    })
                }
            };
            components.push(component);
        }
        Ok(PartitionKey(components))
    }

    /// Human-readable `col=value` rendering, e.g. `day=2024-01-05`.
    pub fn render(&self, key_columns: &[String]) -> String {
        key_columns
            .iter()
            .zip(&self.0)
            .map(|(c, v)| format!("{c}={}", v.render()))
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// How the target table maps keys to physical storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    /// Disjoint storage segments addressed by exact key equality.
    Explicit,
    /// Clustered storage; operation scope is an equality predicate over the
    /// cluster key column(s).
    Predicate,
}

/// A physical storage unit resolved for one key. Each variant carries only
/// what its replacement strategy needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhysicalUnit {
    /// A disjoint partition file; overwriting it never affects another key.
    Explicit { id: String, key: PartitionKey },
    /// An equality-predicate region over the shared clustered segment.
    Predicate {
        id: String,
        predicate: Vec<(String, KeyValue)>,
    },
}

impl PhysicalUnit {
    pub fn id(&self) -> &str {
        match self {
            PhysicalUnit::Explicit { id, .. } => id,
            PhysicalUnit::Predicate { id, .. } => id,
        }
    }
}

/// Typed description of a target table's physical layout: layout kind plus
/// the partition/cluster key columns. Fixed at table creation, never mixed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionModel {
    pub layout: LayoutKind,
    pub key_columns: Vec<String>,
}

impl PartitionModel {
    pub fn new(layout: LayoutKind, key_columns: Vec<String>) -> Self {
        Self {
            layout,
            key_columns,
        }
    }

    pub fn layout_kind(&self) -> LayoutKind {
        self.layout
    }

    /// Resolve the physical unit for a key. Fails with `LayoutMismatch` when
    /// the key arity does not match the configured key columns.
    pub fn unit_for(&self, key: &PartitionKey) -> Result<PhysicalUnit> {
        if key.0.len() != self.key_columns.len() {
            return Err(EngineError::LayoutMismatch {
                expected: self.key_columns.clone(),
                got: key.0.len(),
            });
        }

        let id = self.unit_id(key);
        Ok(match self.layout {
            LayoutKind::Explicit => PhysicalUnit::Explicit {
                id,
                key: key.clone(),
            },
            LayoutKind::Predicate => PhysicalUnit::Predicate {
                id,
                predicate: self
                    .key_columns
                    .iter()
                    .cloned()
                    .zip(key.0.iter().cloned())
                    .collect(),
            },
        })
    }

    /// Deterministic, filesystem-safe unit identifier. The sanitized
    /// `col=value` rendering keeps ids readable; the hash suffix keeps them
    /// collision-free after sanitization.
    pub fn unit_id(&self, key: &PartitionKey) -> String {
        let rendered = key.render(&self.key_columns);
        let sanitized: String = rendered
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '=' | '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let hash = xxh3_64(rendered.as_bytes());
        format!("{sanitized}-{hash:08x}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> PartitionModel {
        PartitionModel::new(LayoutKind::Explicit, vec!["day".to_string()])
    }

    #[test]
    fn extract_rejects_null_and_float_components() {
        let key_columns = vec!["day".to_string()];

        let mut null_row = Row::new();
        null_row.set("day", Value::Null);
        assert!(matches!(
            PartitionKey::extract(&null_row, 3, &key_columns),
            Err(EngineError::KeyExtraction { row: 3, .. })
        ));

        let mut float_row = Row::new();
        float_row.set("day", Value::Float64(1.5));
        assert!(PartitionKey::extract(&float_row, 0, &key_columns).is_err());
    }

    #[test]
    fn unit_for_checks_key_arity() {
        let key = PartitionKey(vec![
            KeyValue::Str("2024-01-05".into()),
            KeyValue::Int(7),
        ]);
        assert!(matches!(
            model().unit_for(&key),
            Err(EngineError::LayoutMismatch { got: 2, .. })
        ));
    }

    #[test]
    fn unit_ids_are_deterministic_and_distinct() {
        let m = model();
        let k1 = PartitionKey(vec![KeyValue::Str("2024-01-05".into())]);
        let k2 = PartitionKey(vec![KeyValue::Str("2024-01-06".into())]);

        assert_eq!(m.unit_id(&k1), m.unit_id(&k1));
        assert_ne!(m.unit_id(&k1), m.unit_id(&k2));
        assert!(m.unit_id(&k1).starts_with("day=2024-01-05"));
    }

    #[test]
    fn predicate_layout_resolves_equality_predicate() {
        let m = PartitionModel::new(LayoutKind::Predicate, vec!["day".to_string()]);
        let key = PartitionKey(vec![KeyValue::Str("2024-01-05".into())]);
        match m.unit_for(&key).unwrap() {
            PhysicalUnit::Predicate { predicate, .. } => {
                assert_eq!(
                    predicate,
                    vec![("day".to_string(), KeyValue::Str("2024-01-05".into()))]
                );
            }
            other => panic!("expected predicate unit, got {other:?}"),
        }
    }
}
