//! Canonical Phrase Synonym Generator
//!
//! Queries a pretrained masked language model for plausible word
//! substitutions at annotated positions in example sentences, reconstructs
//! full candidate canonical phrases from the surviving predictions, and
//! probes which entity properties can be used as adjectival modifiers.
//!
//! # Architecture
//!
//! ```text
//! stdin JSON (example tree + domain)
//!       │
//!       ▼
//! ┌─────────────────────────────────────────┐
//! │  CandidateGenerator                     │
//! │  canonicals + parameter value sets      │
//! └─────────────────────────────────────────┘
//!       │  per masked word index
//!       ▼
//! ┌─────────────────────────────────────────┐
//! │  MaskedLanguageModel (BERT via Candle)  │
//! │  "show me a [MASK] car" → ranked tokens │
//! └─────────────────────────────────────────┘
//!       │  filter: stop words, known values,
//!       │  canonical matches, non-alphabetic
//!       ▼
//! ┌─────────────────────────────────────────┐
//! │  Canonical reconstruction + tallying    │
//! │  "list affordable # here" → counts      │
//! └─────────────────────────────────────────┘
//!       │
//!       ▼
//! stdout JSON { synonyms, adjectives }
//! ```

pub mod domain;
pub mod error;
pub mod generator;
pub mod model;
pub mod tree;

pub use domain::{load_values, Domain, TableConfig};
pub use error::AnnotatorError;
pub use generator::{construct_canonical, CandidateGenerator};
pub use model::{BertMaskedLm, MaskedLanguageModel, RankedToken};
pub use tree::{Example, ExampleTree, MaskIndices, PositionGroup};
