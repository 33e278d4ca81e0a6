use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::partition::LayoutKind;
use crate::table::{ColumnKind, ColumnSpec};

/// One overwrite job: a target table plus the freshly computed input that
/// replaces the units represented in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    pub table: TableConfig,
    pub input: InputConfig,
    /// Skip the idempotency shortcut and rebuild every unit in the batch set.
    /// The overwrite scope is unchanged: only units present in the input.
    #[serde(default)]
    pub force_full_rebuild: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    pub path: String,
    pub layout: LayoutKind,
    pub key_columns: Vec<String>,
    pub columns: Vec<ColumnSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// "jsonl" or "parquet"
    pub kind: String,
    pub path: String,
}

impl JobConfig {
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: JobConfig =
            serde_yaml::from_str(content).context("Failed to parse YAML configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.table.key_columns.is_empty() {
            anyhow::bail!("table '{}' must configure at least one key column", self.name);
        }

        for key in &self.table.key_columns {
            let column = self
                .table
                .columns
                .iter()
                .find(|c| &c.name == key)
                .with_context(|| format!("key column '{key}' is not in the table schema"))?;
            if column.kind == ColumnKind::Float {
                anyhow::bail!("key column '{key}' is a float; keys must be hashable scalars");
            }
        }

        if !matches!(self.input.kind.as_str(), "jsonl" | "parquet") {
            anyhow::bail!("unsupported input kind: {}", self.input.kind);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
name: daily-clicks
table:
  path: /tmp/clicks
  layout: explicit
  key_columns: [day]
  columns:
    - { name: day, type: string }
    - { name: clicks, type: int, nullable: true }
input:
  kind: jsonl
  path: /tmp/new_rows.jsonl
force_full_rebuild: true
"#;

    #[test]
    fn parses_valid_config() {
        let config = JobConfig::from_yaml_str(VALID).unwrap();
        assert_eq!(config.table.layout, LayoutKind::Explicit);
        assert_eq!(config.table.key_columns, vec!["day".to_string()]);
        assert!(config.force_full_rebuild);
    }

    #[test]
    fn rejects_unknown_key_column() {
        let bad = VALID.replace("key_columns: [day]", "key_columns: [date]");
        assert!(JobConfig::from_yaml_str(&bad).is_err());
    }

    #[test]
    fn rejects_float_key_column() {
        let bad = VALID.replace("name: day, type: string", "name: day, type: float");
        assert!(JobConfig::from_yaml_str(&bad).is_err());
    }

    #[test]
    fn rejects_unknown_input_kind() {
        let bad = VALID.replace("kind: jsonl", "kind: csv");
        assert!(JobConfig::from_yaml_str(&bad).is_err());
    }
}
