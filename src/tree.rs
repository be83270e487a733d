//! Example tree data model.
//!
//! The tree arrives on stdin, is mutated in place by prediction (the
//! `candidates` fields), and is the output artifact. All maps preserve the
//! input document's key order so runs are deterministic given deterministic
//! model output.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// table → argument → grammar position → group of annotated examples.
pub type ExampleTree = IndexMap<String, IndexMap<String, IndexMap<String, PositionGroup>>>;

/// The examples for one (table, argument, grammar position) triple, plus the
/// candidate frequency tally populated by prediction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionGroup {
    pub examples: Vec<Example>,
    /// Occurrence count of each distinct candidate across the group.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub candidates: IndexMap<String, u32>,
}

/// One annotated example sentence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Example {
    /// Space-tokenized sentence; mask indices address its words.
    pub query: String,
    pub masks: MaskIndices,
    /// Generated canonical phrases, populated by prediction.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,
}

/// Word indices to predict at, split between the main phrase and the
/// optional trailing clause.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaskIndices {
    pub prefix: Vec<usize>,
    pub suffix: Vec<usize>,
}
