//! Storage input/output mapping declared in a configuration's `storage` block.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Value of `changed_since` that resolves against the stored input state.
pub const ADAPTIVE_INPUT: &str = "adaptive";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhereOperator {
    #[default]
    Eq,
    Ne,
}

/// One table copied into the container before it runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputTableMapping {
    pub source: String,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub where_column: Option<String>,
    #[serde(default)]
    pub where_values: Vec<String>,
    #[serde(default)]
    pub where_operator: WhereOperator,
    #[serde(default)]
    pub changed_since: Option<String>,
    #[serde(default)]
    pub limit: Option<u64>,
}

impl InputTableMapping {
    /// File name inside `in/tables`.
    pub fn destination_name(&self) -> String {
        self.destination
            .clone()
            .unwrap_or_else(|| format!("{}.csv", self.source))
    }

    pub fn is_adaptive(&self) -> bool {
        self.changed_since.as_deref() == Some(ADAPTIVE_INPUT)
    }
}

/// A set of files selected by tags and/or a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputFileMapping {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub limit: Option<u64>,
    /// Tags added to every downloaded file after a successful run.
    #[serde(default)]
    pub processed_tags: Vec<String>,
    #[serde(default)]
    pub changed_since: Option<String>,
}

impl InputFileMapping {
    pub fn is_adaptive(&self) -> bool {
        self.changed_since.as_deref() == Some(ADAPTIVE_INPUT)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputMapping {
    #[serde(default)]
    pub tables: Vec<InputTableMapping>,
    #[serde(default)]
    pub files: Vec<InputFileMapping>,
}

/// Table produced by the component, declared in the configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputTableMapping {
    pub source: String,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub incremental: Option<bool>,
    #[serde(default)]
    pub primary_key: Option<Vec<String>>,
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub delete_where_column: Option<String>,
    #[serde(default)]
    pub delete_where_values: Option<Vec<String>>,
    #[serde(default)]
    pub delete_where_operator: Option<WhereOperator>,
    #[serde(default)]
    pub delimiter: Option<String>,
    #[serde(default)]
    pub enclosure: Option<String>,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, String>>,
}

/// File produced by the component, declared in the configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputFileMapping {
    pub source: String,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub is_public: Option<bool>,
    #[serde(default)]
    pub is_permanent: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputMapping {
    #[serde(default)]
    pub tables: Vec<OutputTableMapping>,
    #[serde(default)]
    pub files: Vec<OutputFileMapping>,
}

/// The `storage` block of a configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageMapping {
    #[serde(default)]
    pub input: InputMapping,
    #[serde(default)]
    pub output: OutputMapping,
}

/// Last import date seen for one input table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputTableState {
    pub source: String,
    pub last_import_date: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputTableStateList {
    #[serde(default)]
    pub tables: Vec<InputTableState>,
}

impl InputTableStateList {
    pub fn last_import_date(&self, source: &str) -> Option<&str> {
        self.tables
            .iter()
            .find(|t| t.source == source)
            .map(|t| t.last_import_date.as_str())
    }

    pub fn upsert(&mut self, source: &str, last_import_date: &str) {
        match self.tables.iter_mut().find(|t| t.source == source) {
            Some(existing) => existing.last_import_date = last_import_date.to_string(),
            None => self.tables.push(InputTableState {
                source: source.to_string(),
                last_import_date: last_import_date.to_string(),
            }),
        }
    }
}

/// Highest file id seen for one tag set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputFileState {
    pub tags: Vec<String>,
    pub last_imported_id: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputFileStateList {
    #[serde(default)]
    pub files: Vec<InputFileState>,
}

impl InputFileStateList {
    pub fn last_imported_id(&self, tags: &[String]) -> Option<u64> {
        let key = sorted(tags);
        self.files
            .iter()
            .find(|f| sorted(&f.tags) == key)
            .map(|f| f.last_imported_id)
    }

    pub fn upsert(&mut self, tags: &[String], last_imported_id: u64) {
        let key = sorted(tags);
        match self.files.iter_mut().find(|f| sorted(&f.tags) == key) {
            Some(existing) => existing.last_imported_id = last_imported_id,
            None => self.files.push(InputFileState {
                tags: key,
                last_imported_id,
            }),
        }
    }
}

fn sorted(tags: &[String]) -> Vec<String> {
    let mut v = tags.to_vec();
    v.sort();
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_mapping_defaults() {
        let m: StorageMapping = serde_json::from_str("{}").unwrap();
        assert!(m.input.tables.is_empty());
        assert!(m.output.files.is_empty());
    }

    #[test]
    fn input_table_destination_defaults_to_source() {
        let m: InputTableMapping =
            serde_json::from_str(r#"{"source": "in.c-main.users"}"#).unwrap();
        assert_eq!(m.destination_name(), "in.c-main.users.csv");
        assert!(!m.is_adaptive());

        let m: InputTableMapping = serde_json::from_str(
            r#"{"source": "in.c-main.users", "destination": "users.csv", "changed_since": "adaptive"}"#,
        )
        .unwrap();
        assert_eq!(m.destination_name(), "users.csv");
        assert!(m.is_adaptive());
    }

    #[test]
    fn table_state_upsert() {
        let mut state = InputTableStateList::default();
        state.upsert("in.c-a.t", "2024-01-01T00:00:00+0000");
        state.upsert("in.c-a.t", "2024-02-01T00:00:00+0000");
        assert_eq!(state.tables.len(), 1);
        assert_eq!(
            state.last_import_date("in.c-a.t"),
            Some("2024-02-01T00:00:00+0000")
        );
        assert_eq!(state.last_import_date("missing"), None);
    }

    #[test]
    fn file_state_ignores_tag_order() {
        let mut state = InputFileStateList::default();
        state.upsert(&["b".to_string(), "a".to_string()], 10);
        assert_eq!(state.last_imported_id(&["a".to_string(), "b".to_string()]), Some(10));
        state.upsert(&["a".to_string(), "b".to_string()], 12);
        assert_eq!(state.files.len(), 1);
        assert_eq!(state.last_imported_id(&["b".to_string(), "a".to_string()]), Some(12));
    }
}
