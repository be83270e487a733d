//! Domain configuration: per-table canonical strings and parameter value
//! files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::debug;

use crate::error::AnnotatorError;

/// table name → canonical form and parameter value files. Loaded once at
/// startup, immutable thereafter.
pub type Domain = IndexMap<String, TableConfig>;

/// Canonical form and parameter value file paths for one table.
#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    pub canonical: String,
    #[serde(default)]
    pub params: IndexMap<String, PathBuf>,
}

/// Load the allowed values for a parameter from a tab-delimited file.
///
/// Column 2 holds the value string; rows with fewer than two columns are
/// skipped. Open and parse failures propagate.
pub fn load_values(path: &Path) -> Result<HashSet<String>, AnnotatorError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut values = HashSet::new();
    for record in reader.records() {
        let record = record?;
        if let Some(value) = record.get(1) {
            values.insert(value.to_string());
        }
    }

    debug!("Loaded {} values from {}", values.len(), path.display());
    Ok(values)
}
