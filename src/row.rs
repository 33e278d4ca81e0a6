use arrow::array::*;
use arrow::datatypes::*;
use arrow::record_batch::RecordBatch;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{EngineError, Result};

/// A single input row: the configured key column(s) plus payload columns.
/// Provides a simple interface to access column values without dealing with
/// the Arrow API directly.
#[derive(Debug, Clone, Default)]
pub struct Row {
    pub(crate) values: HashMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int64(i64),
    Float64(f64),
    Bool(bool),
    Null,
}

impl Row {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    pub fn set(&mut self, column: impl Into<String>, value: Value) {
        self.values.insert(column.into(), value);
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn get_string(&self, column: &str) -> Option<&str> {
        match self.values.get(column)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        match self.values.get(column)? {
            Value::Int64(i) => Some(*i),
            _ => None,
        }
    }

    pub fn get_f64(&self, column: &str) -> Option<f64> {
        match self.values.get(column)? {
            Value::Float64(f) => Some(*f),
            _ => None,
        }
    }

    pub fn get_bool(&self, column: &str) -> Option<bool> {
        match self.values.get(column)? {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Parse one JSONL object into a Row. Non-object values and nested
    /// structures are rejected; the engine's schema is flat.
    pub fn from_json(row_idx: usize, value: &serde_json::Value) -> Result<Self> {
        let obj = value.as_object().ok_or_else(|| EngineError::SchemaMismatch {
            row: row_idx,
            detail: "input line is not a JSON object".to_string(),
        })?;

        let mut row = Row::new();
        for (k, v) in obj {
            let value = match v {
                serde_json::Value::Null => Value::Null,
                serde_json::Value::Bool(b) => Value::Bool(*b),
                serde_json::Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        Value::Int64(i)
                    } else if let Some(f) = n.as_f64() {
                        Value::Float64(f)
                    } else {
                        return Err(EngineError::SchemaMismatch {
                            row: row_idx,
                            detail: format!("column '{k}' holds an unrepresentable number"),
                        });
                    }
                }
                serde_json::Value::String(s) => Value::String(s.clone()),
                other => {
                    return Err(EngineError::SchemaMismatch {
                        row: row_idx,
                        detail: format!("column '{k}' holds a nested value: {other}"),
                    })
                }
            };
            row.set(k.clone(), value);
        }
        Ok(row)
    }

    /// Validate this row against the fixed table schema: every schema column
    /// must be present (null only if nullable), and no extra columns allowed.
    pub fn validate(&self, row_idx: usize, schema: &Schema) -> Result<()> {
        for field in schema.fields() {
            match self.values.get(field.name()) {
                None => {
                    return Err(EngineError::SchemaMismatch {
                        row: row_idx,
                        detail: format!("missing column '{}'", field.name()),
                    })
                }
                Some(Value::Null) if !field.is_nullable() => {
                    return Err(EngineError::SchemaMismatch {
                        row: row_idx,
                        detail: format!("null in non-nullable column '{}'", field.name()),
                    })
                }
                Some(Value::Null) => {}
                Some(value) => {
                    if !value_matches_type(value, field.data_type()) {
                        return Err(EngineError::SchemaMismatch {
                            row: row_idx,
                            detail: format!(
                                "column '{}' expected {:?}, got {}",
                                field.name(),
                                field.data_type(),
                                value.type_name()
                            ),
                        });
                    }
                }
            }
        }
        for name in self.values.keys() {
            if schema.field_with_name(name).is_err() {
                return Err(EngineError::SchemaMismatch {
                    row: row_idx,
                    detail: format!("unexpected column '{name}'"),
                });
            }
        }
        Ok(())
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Int64(_) => "int",
            Value::Float64(_) => "float",
            Value::Bool(_) => "bool",
            Value::Null => "null",
        }
    }

    /// Canonical rendering used for content checksums. Stable across runs.
    pub(crate) fn canonical(&self) -> String {
        match self {
            Value::String(s) => format!("s:{s}"),
            Value::Int64(i) => format!("i:{i}"),
            Value::Float64(f) => format!("f:{}", f.to_bits()),
            Value::Bool(b) => format!("b:{b}"),
            Value::Null => "n:".to_string(),
        }
    }
}

fn value_matches_type(value: &Value, data_type: &DataType) -> bool {
    matches!(
        (value, data_type),
        (Value::String(_), DataType::Utf8)
            | (Value::Int64(_), DataType::Int64)
            | (Value::Float64(_), DataType::Float64)
            | (Value::Bool(_), DataType::Boolean)
    )
}

/// Convert a RecordBatch back to rows, e.g. when reading a clustered segment
/// before a predicate replace.
pub fn batch_to_rows(batch: &RecordBatch) -> Result<Vec<Row>> {
    let schema = batch.schema();
    let mut rows = Vec::with_capacity(batch.num_rows());

    for row_idx in 0..batch.num_rows() {
        let mut values = HashMap::new();
        for col_idx in 0..batch.num_columns() {
            let field = schema.field(col_idx);
            let column = batch.column(col_idx);
            values.insert(field.name().clone(), extract_value(column, row_idx)?);
        }
        rows.push(Row { values });
    }

    Ok(rows)
}

/// Convert rows to a RecordBatch in the exact column order of the table
/// schema. Rows must already be validated.
pub fn rows_to_batch(rows: &[Row], schema: &SchemaRef) -> Result<RecordBatch> {
    if rows.is_empty() {
        return Ok(RecordBatch::new_empty(Arc::clone(schema)));
    }

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
    for field in schema.fields() {
        columns.push(build_array(rows, field.name(), field.data_type())?);
    }

    Ok(RecordBatch::try_new(Arc::clone(schema), columns)?)
}

fn extract_value(array: &ArrayRef, row_idx: usize) -> Result<Value> {
    if !array.is_valid(row_idx) {
        return Ok(Value::Null);
    }

    match array.data_type() {
        DataType::Utf8 => {
            let a = array
                .as_any()
                .downcast_ref::<StringArray>()
                .expect("Utf8 array");
            Ok(Value::String(a.value(row_idx).to_string()))
        }
        DataType::Int64 => {
            let a = array
                .as_any()
                .downcast_ref::<Int64Array>()
                .expect("Int64 array");
            Ok(Value::Int64(a.value(row_idx)))
        }
        DataType::Float64 => {
            let a = array
                .as_any()
                .downcast_ref::<Float64Array>()
                .expect("Float64 array");
            Ok(Value::Float64(a.value(row_idx)))
        }
        DataType::Boolean => {
            let a = array
                .as_any()
                .downcast_ref::<BooleanArray>()
                .expect("Boolean array");
            Ok(Value::Bool(a.value(row_idx)))
        }
        other => Err(EngineError::SchemaMismatch {
            row: row_idx,
            detail: format!("unsupported column type in stored unit: {other:?}"),
        }),
    }
}

fn build_array(rows: &[Row], field_name: &str, data_type: &DataType) -> Result<ArrayRef> {
    match data_type {
        DataType::Utf8 => {
            let values: Vec<Option<String>> = rows
                .iter()
                .map(|row| row.get_string(field_name).map(|s| s.to_string()))
                .collect();
            Ok(Arc::new(StringArray::from_iter(values)))
        }
        DataType::Int64 => {
            let values: Vec<Option<i64>> = rows.iter().map(|row| row.get_i64(field_name)).collect();
            Ok(Arc::new(Int64Array::from_iter(values)))
        }
        DataType::Float64 => {
            let values: Vec<Option<f64>> = rows.iter().map(|row| row.get_f64(field_name)).collect();
            Ok(Arc::new(Float64Array::from_iter(values)))
        }
        DataType::Boolean => {
            let values: Vec<Option<bool>> =
                rows.iter().map(|row| row.get_bool(field_name)).collect();
            Ok(Arc::new(BooleanArray::from_iter(values)))
        }
        other => Err(EngineError::SchemaMismatch {
            row: 0,
            detail: format!("unsupported schema column type: {other:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_schema() -> Schema {
        Schema::new(vec![
            Field::new("day", DataType::Utf8, false),
            Field::new("clicks", DataType::Int64, true),
        ])
    }

    #[test]
    fn validate_rejects_missing_and_extra_columns() {
        let schema = test_schema();

        let mut missing = Row::new();
        missing.set("day", Value::String("2024-01-05".into()));
        assert!(matches!(
            missing.validate(0, &schema),
            Err(EngineError::SchemaMismatch { .. })
        ));

        let mut extra = Row::new();
        extra.set("day", Value::String("2024-01-05".into()));
        extra.set("clicks", Value::Int64(3));
        extra.set("surprise", Value::Bool(true));
        assert!(matches!(
            extra.validate(0, &schema),
            Err(EngineError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn validate_rejects_wrong_type_and_nonnullable_null() {
        let schema = test_schema();

        let mut wrong = Row::new();
        wrong.set("day", Value::Int64(20240105));
        wrong.set("clicks", Value::Int64(3));
        assert!(wrong.validate(0, &schema).is_err());

        let mut null_key = Row::new();
        null_key.set("day", Value::Null);
        null_key.set("clicks", Value::Int64(3));
        assert!(null_key.validate(0, &schema).is_err());
    }

    #[test]
    fn batch_round_trip_preserves_values() {
        let schema: SchemaRef = Arc::new(test_schema());
        let mut a = Row::new();
        a.set("day", Value::String("2024-01-05".into()));
        a.set("clicks", Value::Int64(10));
        let mut b = Row::new();
        b.set("day", Value::String("2024-01-06".into()));
        b.set("clicks", Value::Null);

        let batch = rows_to_batch(&[a, b], &schema).unwrap();
        assert_eq!(batch.num_rows(), 2);

        let back = batch_to_rows(&batch).unwrap();
        assert_eq!(back[0].get_string("day"), Some("2024-01-05"));
        assert_eq!(back[0].get_i64("clicks"), Some(10));
        assert_eq!(back[1].get("clicks"), Some(&Value::Null));
    }

    #[test]
    fn from_json_rejects_nested_values() {
        let v: serde_json::Value =
            serde_json::from_str(r#"{"day": "2024-01-05", "tags": ["a"]}"#).unwrap();
        assert!(Row::from_json(0, &v).is_err());
    }
}
