//! Storage object descriptions and the `.manifest` sidecars exchanged with components.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::mapping::{OutputFileMapping, OutputTableMapping, WhereOperator};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub provider: Option<String>,
}

/// A table as reported by the storage service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub last_import_date: Option<String>,
    #[serde(default)]
    pub last_change_date: Option<String>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub metadata: Vec<MetadataEntry>,
    #[serde(default)]
    pub column_metadata: BTreeMap<String, Vec<MetadataEntry>>,
}

/// A file as reported by the storage service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub is_encrypted: bool,
    #[serde(default)]
    pub is_permanent: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub max_age_days: Option<u32>,
    #[serde(default)]
    pub size_bytes: u64,
}

/// Location of an exported table in cloud staging storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudLocation {
    pub is_sliced: bool,
    pub region: Option<String>,
    pub bucket: String,
    pub key: String,
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,
}

/// Sidecar written next to every input table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputTableManifest {
    #[serde(flatten)]
    pub table: TableInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<CloudLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abs: Option<CloudLocation>,
}

/// Sidecar written next to every input file.
pub type InputFileManifest = FileInfo;

/// Sidecar a component may write next to an output table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputTableManifest {
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

/// Sidecar a component may write next to an output file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputFileManifest {
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub is_public: Option<bool>,
    #[serde(default)]
    pub is_permanent: Option<bool>,
    #[serde(default)]
    pub is_encrypted: Option<bool>,
    #[serde(default)]
    pub notify: Option<bool>,
}

/// Effective upload options for one output table after merging mapping and manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct TableUpload {
    pub source: String,
    pub destination: String,
    pub incremental: bool,
    pub primary_key: Vec<String>,
    pub columns: Vec<String>,
    pub delete_where_column: Option<String>,
    pub delete_where_values: Vec<String>,
    pub delete_where_operator: WhereOperator,
    pub delimiter: String,
    pub enclosure: String,
    pub metadata: BTreeMap<String, String>,
}

/// Effective upload options for one output file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileUpload {
    pub name: String,
    pub tags: Vec<String>,
    pub is_public: bool,
    pub is_permanent: bool,
    pub is_encrypted: bool,
    pub notify: bool,
}

impl OutputTableManifest {
    /// Merge a mapping-declared entry with this manifest. The manifest wins on overlap.
    pub fn merge_over(self, mapping: Option<&OutputTableMapping>) -> OutputTableManifest {
        let base = mapping.cloned().unwrap_or_default();
        OutputTableManifest {
            destination: self.destination.or(base.destination),
            incremental: self.incremental.or(base.incremental),
            primary_key: self.primary_key.or(base.primary_key),
            columns: self.columns.or(base.columns),
            delete_where_column: self.delete_where_column.or(base.delete_where_column),
            delete_where_values: self.delete_where_values.or(base.delete_where_values),
            delete_where_operator: self.delete_where_operator.or(base.delete_where_operator),
            delimiter: self.delimiter.or(base.delimiter),
            enclosure: self.enclosure.or(base.enclosure),
            metadata: self.metadata.or(base.metadata),
        }
    }
}

impl OutputFileManifest {
    /// Merge a mapping-declared entry with this manifest. The manifest wins on overlap.
    pub fn merge_over(self, mapping: Option<&OutputFileMapping>) -> OutputFileManifest {
        let base = mapping.cloned().unwrap_or_default();
        OutputFileManifest {
            tags: self.tags.or(base.tags),
            is_public: self.is_public.or(base.is_public),
            is_permanent: self.is_permanent.or(base.is_permanent),
            is_encrypted: self.is_encrypted,
            notify: self.notify,
        }
    }
}
