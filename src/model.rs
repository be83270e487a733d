//! Masked token prediction using Candle and BERT.
//!
//! This module loads a BERT-family masked language model and ranks the
//! vocabulary at a single word position. The model and tokenizer are loaded
//! once and injected into the generator, never held as globals, so tests can
//! substitute a deterministic ranking.
//!
//! The fragile part is aligning a word-level index (the annotation format
//! counts words split on spaces) with the model's token positions: subword
//! tokenization can split one word into several wordpieces. The alignment is
//! explicit here ([`word_span`] and [`tokens_in_span`]), and a word that
//! does not map to exactly one token fails loudly instead of silently
//! mislocating a repeated word.

use anyhow::{Context, Result};
use candle_core::{Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertForMaskedLM, Config, DTYPE};
use hf_hub::{api::sync::Api, Repo, RepoType};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::error::AnnotatorError;

/// Default model repository on HuggingFace Hub.
const MODEL_REPO: &str = "bert-large-uncased";

/// Mask placeholder in BERT vocabularies.
const MASK_TOKEN: &str = "[MASK]";

/// A candidate token with its model score.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedToken {
    pub token: String,
    pub score: f32,
}

/// Ranked token prediction at a word position.
///
/// The seam between the generator and the pretrained model: given a
/// space-tokenized sentence and the index of one of its words,
/// implementations return the model's candidate tokens for that position in
/// confidence order.
pub trait MaskedLanguageModel {
    /// The placeholder the model predicts through, e.g. `[MASK]`.
    fn mask_token(&self) -> &str;

    /// Top `n` candidate tokens for the word at `word_index` in `sentence`,
    /// ranked by model confidence.
    fn rank_substitutes(
        &self,
        sentence: &str,
        word_index: usize,
        n: usize,
    ) -> Result<Vec<RankedToken>, AnnotatorError>;
}

/// Byte span of the `word_index`-th space-delimited word of `sentence`, or
/// `None` when the index is out of range.
pub fn word_span(sentence: &str, word_index: usize) -> Option<(usize, usize)> {
    let mut start = 0;
    for (i, word) in sentence.split(' ').enumerate() {
        if i == word_index {
            return Some((start, start + word.len()));
        }
        start += word.len() + 1;
    }
    None
}

/// Indices of tokens whose offsets fall entirely inside `[start, end)`.
///
/// Special tokens inserted by the tokenizer ([CLS], [SEP]) carry empty
/// offsets and never match.
pub fn tokens_in_span(offsets: &[(usize, usize)], start: usize, end: usize) -> Vec<usize> {
    offsets
        .iter()
        .enumerate()
        .filter(|&(_, &(s, e))| s < e && s >= start && e <= end)
        .map(|(i, _)| i)
        .collect()
}

/// Masked language model backed by Candle.
///
/// Weights, config, and tokenizer are fetched from the HuggingFace Hub and
/// cached in the HuggingFace cache directory (~/.cache/huggingface).
pub struct BertMaskedLm {
    model: BertForMaskedLM,
    tokenizer: Tokenizer,
    device: Device,
}

impl BertMaskedLm {
    /// Load the default model, downloading it if needed. First download is
    /// ~1.3GB for bert-large-uncased.
    pub fn new() -> Result<Self> {
        Self::with_model(MODEL_REPO)
    }

    /// Load a specific BERT-family masked LM by Hub repository name.
    pub fn with_model(model_name: &str) -> Result<Self> {
        info!("Loading masked language model: {}", model_name);

        let device = Device::Cpu; // Use CPU for portability; GPU can be added later

        let api = Api::new().context("Failed to create HuggingFace API client")?;
        let repo = api.repo(Repo::new(model_name.to_string(), RepoType::Model));

        let config_path = repo
            .get("config.json")
            .context("Failed to download config.json")?;
        let tokenizer_path = repo
            .get("tokenizer.json")
            .context("Failed to download tokenizer.json")?;
        let weights_path = repo
            .get("model.safetensors")
            .context("Failed to download model.safetensors")?;

        debug!("Model files downloaded to cache");

        let config: Config = serde_json::from_str(
            &std::fs::read_to_string(&config_path).context("Failed to read config.json")?,
        )
        .context("Failed to parse config.json")?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;
        if tokenizer.token_to_id(MASK_TOKEN).is_none() {
            anyhow::bail!("tokenizer for {} has no {} token", model_name, MASK_TOKEN);
        }

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, &device)
                .context("Failed to load model weights")?
        };

        let model = BertForMaskedLM::load(vb, &config).context("Failed to build BERT model")?;

        info!("Masked language model loaded successfully ({})", model_name);

        Ok(Self {
            model,
            tokenizer,
            device,
        })
    }
}

impl MaskedLanguageModel for BertMaskedLm {
    fn mask_token(&self) -> &str {
        MASK_TOKEN
    }

    fn rank_substitutes(
        &self,
        sentence: &str,
        word_index: usize,
        n: usize,
    ) -> Result<Vec<RankedToken>, AnnotatorError> {
        let (start, end) = word_span(sentence, word_index).ok_or_else(|| {
            AnnotatorError::WordIndex {
                index: word_index,
                query: sentence.to_string(),
            }
        })?;

        let encoding = self
            .tokenizer
            .encode(sentence, true)
            .map_err(|e| AnnotatorError::Tokenization(e.to_string()))?;

        let span = tokens_in_span(encoding.get_offsets(), start, end);
        let &[token_index] = span.as_slice() else {
            return Err(AnnotatorError::Misaligned {
                word: sentence[start..end].to_string(),
                index: word_index,
                query: sentence.to_string(),
                token_count: span.len(),
            });
        };

        let ids = encoding.get_ids().to_vec();
        let type_ids = encoding.get_type_ids().to_vec();
        let attention = encoding.get_attention_mask().to_vec();
        let seq_len = ids.len();

        let input_ids = Tensor::from_vec(ids, (1, seq_len), &self.device)?;
        let token_type_ids = Tensor::from_vec(type_ids, (1, seq_len), &self.device)?;
        let attention_mask = Tensor::from_vec(attention, (1, seq_len), &self.device)?;

        let output = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        // Logits over the full vocabulary at the target position
        let logits = output.i((0, token_index))?.to_vec1::<f32>()?;

        let mut ranked: Vec<(usize, f32)> = logits.into_iter().enumerate().collect();
        ranked.sort_unstable_by(|a, b| b.1.total_cmp(&a.1));

        let mut top = Vec::with_capacity(n);
        for (id, score) in ranked.into_iter().take(n) {
            if let Some(token) = self.tokenizer.id_to_token(id as u32) {
                top.push(RankedToken { token, score });
            }
        }

        debug!(
            "Ranked {} substitutes for word {} of {:?}",
            top.len(),
            word_index,
            sentence
        );
        Ok(top)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_span_addresses_each_word() {
        let query = "show the red car";
        assert_eq!(word_span(query, 0), Some((0, 4)));
        assert_eq!(word_span(query, 2), Some((9, 12)));
        assert_eq!(&query[9..12], "red");
        assert_eq!(word_span(query, 3), Some((13, 16)));
    }

    #[test]
    fn word_span_rejects_out_of_range() {
        assert_eq!(word_span("show me", 2), None);
    }

    #[test]
    fn tokens_in_span_skips_special_tokens() {
        // [CLS] show the red [SEP] over "show the red"
        let offsets = [(0, 0), (0, 4), (5, 8), (9, 12), (0, 0)];
        assert_eq!(tokens_in_span(&offsets, 5, 8), vec![2]);
    }

    #[test]
    fn tokens_in_span_reports_subword_splits() {
        // "affordable" split into two wordpieces
        let offsets = [(0, 0), (0, 4), (5, 11), (11, 15), (0, 0)];
        assert_eq!(tokens_in_span(&offsets, 5, 15), vec![2, 3]);
    }

    #[test]
    #[ignore] // Requires model download
    fn bert_ranks_mask_position() {
        let model = BertMaskedLm::with_model("bert-base-uncased").expect("Failed to load model");
        let ranked = model
            .rank_substitutes("show me a [MASK] restaurant", 3, 10)
            .expect("Failed to rank");
        assert_eq!(ranked.len(), 10);
        // Scores come back in descending order
        for pair in ranked.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }
}
