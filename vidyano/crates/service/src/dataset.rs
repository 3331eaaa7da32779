//! JSON datasets served by [`crate::MemoryDataSource`].
//!
//! ```json
//! {
//!   "id": "people",
//!   "columns": [{ "name": "Name", "type": "String", "caps": "CAN_FILTER | CAN_SORT" }],
//!   "rows": [{ "id": "1", "values": { "Name": "Ada" } }]
//! }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result, bail, ensure};
use core_types::Value;
use protocol::{ColumnDefinition, QueryDefinition, SortOption};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatasetRow {
    pub id: String,
    /// Cells in service string form, keyed by column name. Missing keys are null.
    #[serde(default)]
    pub values: BTreeMap<String, Option<String>>,
}

impl DatasetRow {
    pub fn cell(&self, column: &str) -> Option<&str> {
        self.values.get(column).and_then(|v| v.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    #[serde(default)]
    pub sort_options: String,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub can_reorder: bool,
    #[serde(default)]
    pub rows: Vec<DatasetRow>,
}

impl Dataset {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read dataset {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("load dataset {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let dataset: Self = serde_json::from_str(text).context("parse dataset json")?;
        dataset.validate()?;
        Ok(dataset)
    }

    /// Check ids are unique, cells name known columns and every cell parses
    /// as its column's type.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.id.trim().is_empty(), "dataset id must not be empty");
        ensure!(!self.columns.is_empty(), "dataset {} has no columns", self.id);
        if self.page_size == Some(0) {
            bail!("dataset {} page_size must be > 0", self.id);
        }

        let mut names = HashSet::new();
        for column in &self.columns {
            ensure!(
                names.insert(column.name.as_str()),
                "duplicate column {}",
                column.name
            );
        }
        for option in SortOption::parse_list(&self.sort_options) {
            ensure!(
                names.contains(option.column.as_str()),
                "sort option names unknown column {}",
                option.column
            );
        }

        let mut ids = HashSet::new();
        for row in &self.rows {
            ensure!(ids.insert(row.id.as_str()), "duplicate row id {}", row.id);
            for key in row.values.keys() {
                ensure!(
                    names.contains(key.as_str()),
                    "row {} has a value for unknown column {key}",
                    row.id
                );
            }
            for column in &self.columns {
                Value::from_service_string(row.cell(&column.name), column.data_type)
                    .with_context(|| format!("row {} column {}", row.id, column.name))?;
            }
        }
        Ok(())
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Definition a client query is built from. No initial result is
    /// shipped, so the first search goes through the source.
    pub fn definition(&self) -> QueryDefinition {
        let mut definition = QueryDefinition::new(&self.id, self.columns.clone());
        definition.name = if self.name.is_empty() {
            self.id.clone()
        } else {
            self.name.clone()
        };
        definition.sort_options = self.sort_options.clone();
        definition.page_size = self.page_size;
        definition.can_reorder = self.can_reorder;
        definition
    }
}
