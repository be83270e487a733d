//! Error type for the annotation pipeline.
//!
//! There is no recovery policy: every failure aborts the whole batch and
//! propagates to the process boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnnotatorError {
    #[error("failed to read value file: {0}")]
    Values(#[from] csv::Error),

    #[error("tokenization failed: {0}")]
    Tokenization(String),

    #[error("model inference failed: {0}")]
    Inference(#[from] candle_core::Error),

    #[error("example tree references unknown table {0:?}")]
    UnknownTable(String),

    #[error("word index {index} is out of range for query {query:?}")]
    WordIndex { index: usize, query: String },

    /// Subword tokenization desynchronized the word-level mask index from
    /// the model's token positions.
    #[error(
        "word {word:?} at index {index} of {query:?} spans {token_count} model tokens; \
         mask indices must align with a single token"
    )]
    Misaligned {
        word: String,
        index: usize,
        query: String,
        token_count: usize,
    },
}
