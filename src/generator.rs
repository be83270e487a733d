//! Candidate generation: masked prediction, filtering, and canonical
//! reconstruction.

use std::collections::HashSet;
use std::time::Instant;

use indexmap::IndexMap;
use tracing::{debug, info, instrument};

use crate::domain::{load_values, Domain};
use crate::error::AnnotatorError;
use crate::model::MaskedLanguageModel;
use crate::tree::{ExampleTree, MaskIndices};

/// Words never offered as candidates: articles and possessive pronouns.
const STOP_WORDS: &[&str] = &["a", "an", "the", "its", "their", "his", "her"];

/// Floor on how many ranked candidates to fetch per query. Filtering rejects
/// some, so over-fetching guards against returning fewer than `k` survivors.
const MIN_FETCH: usize = 100;

/// Canonical string and allowed parameter values for one table.
#[derive(Debug)]
struct TableEntry {
    canonical: String,
    values: IndexMap<String, HashSet<String>>,
}

/// Generates candidate synonym forms for canonical command phrases by
/// querying a masked language model at annotated word positions.
///
/// The model is injected at construction; the rest of the state (canonicals
/// and value sets) is loaded once from the domain configuration and
/// read-only thereafter.
pub struct CandidateGenerator<M> {
    model: M,
    tables: IndexMap<String, TableEntry>,
    mask: bool,
    k: usize,
}

impl<M: MaskedLanguageModel> CandidateGenerator<M> {
    /// Build a generator from the domain configuration, loading every
    /// parameter's value file.
    ///
    /// `mask` blanks the target word before prediction; `k` is the default
    /// number of candidates kept per prediction.
    pub fn new(model: M, domain: &Domain, mask: bool, k: usize) -> Result<Self, AnnotatorError> {
        let mut tables = IndexMap::new();
        for (name, table) in domain {
            let mut values = IndexMap::new();
            for (param, path) in &table.params {
                values.insert(param.clone(), load_values(path)?);
            }
            tables.insert(
                name.clone(),
                TableEntry {
                    canonical: table.canonical.clone(),
                    values,
                },
            );
        }
        info!("Loaded domain configuration for {} tables", tables.len());
        Ok(Self {
            model,
            tables,
            mask,
            k,
        })
    }

    /// Top-k substitute predictions for the word at `word_index` in `query`.
    ///
    /// Fetches at least 100 ranked candidates from the model and returns the
    /// first `k` (defaulting to the generator's `k` when absent) that survive
    /// filtering, in ranked order. The result is never padded; fewer than
    /// `k` come back when the ranked list exhausts first.
    pub fn predict_one(
        &self,
        table: &str,
        arg: Option<&str>,
        query: &str,
        word_index: usize,
        k: Option<usize>,
    ) -> Result<Vec<String>, AnnotatorError> {
        let k = k.unwrap_or(self.k);
        let entry = self
            .tables
            .get(table)
            .ok_or_else(|| AnnotatorError::UnknownTable(table.to_string()))?;

        let words: Vec<&str> = query.split(' ').collect();
        let word = *words
            .get(word_index)
            .ok_or_else(|| AnnotatorError::WordIndex {
                index: word_index,
                query: query.to_string(),
            })?;

        // Blank the target by index; replacing the first textual occurrence
        // would mislocate a repeated word.
        let mask_token = self.model.mask_token();
        let masked;
        let sentence = if self.mask && word != mask_token {
            let mut replaced = words.clone();
            replaced[word_index] = mask_token;
            masked = replaced.join(" ");
            masked.as_str()
        } else {
            query
        };

        let ranked = self
            .model
            .rank_substitutes(sentence, word_index, k.max(MIN_FETCH))?;

        let known = arg.and_then(|a| entry.values.get(a));
        let mut survivors = Vec::with_capacity(k);
        for ranked_token in ranked {
            let token = ranked_token.token;
            if token == word {
                continue;
            }
            if STOP_WORDS.contains(&token.as_str()) {
                continue;
            }
            if token.is_empty() || !token.chars().all(char::is_alphabetic) {
                continue;
            }
            if token.contains(&entry.canonical) || entry.canonical.contains(&token) {
                continue;
            }
            if known.is_some_and(|values| values.contains(&token)) {
                continue;
            }
            survivors.push(token);
            if survivors.len() == k {
                break;
            }
        }
        Ok(survivors)
    }

    /// Candidate canonical phrases for one example: predictions at every
    /// prefix index, then every suffix index, each reconstructed into a full
    /// phrase. Duplicates are kept; tallying counts them later.
    pub fn predict_position(
        &self,
        table: &str,
        arg: Option<&str>,
        query: &str,
        masks: &MaskIndices,
    ) -> Result<Vec<String>, AnnotatorError> {
        let mut candidates = Vec::new();
        for &index in masks.prefix.iter().chain(masks.suffix.iter()) {
            for token in self.predict_one(table, arg, query, index, None)? {
                candidates.push(construct_canonical(query, masks, index, &token)?);
            }
        }
        Ok(candidates)
    }

    /// Run prediction over every example in the tree, storing per-example
    /// candidates and per-group frequency tallies in place.
    ///
    /// Groups are processed in input document order; tallies are rebuilt
    /// from scratch, so re-running over the same tree is idempotent.
    #[instrument(skip_all)]
    pub fn predict(&self, tree: &mut ExampleTree) -> Result<(), AnnotatorError> {
        let started = Instant::now();
        let mut groups = 0usize;

        for (table, args) in tree.iter_mut() {
            for (arg, positions) in args.iter_mut() {
                for group in positions.values_mut() {
                    let mut tally: IndexMap<String, u32> = IndexMap::new();
                    for example in &mut group.examples {
                        let candidates = self.predict_position(
                            table,
                            Some(arg.as_str()),
                            &example.query,
                            &example.masks,
                        )?;
                        for candidate in &candidates {
                            *tally.entry(candidate.clone()).or_insert(0) += 1;
                        }
                        example.candidates = candidates;
                    }
                    debug!(
                        "{}.{}: {} distinct candidates over {} examples",
                        table,
                        arg,
                        tally.len(),
                        group.examples.len()
                    );
                    group.candidates = tally;
                    groups += 1;
                }
            }
        }

        info!(
            "Generated candidates for {} groups in {:.2}s",
            groups,
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Detect which parameters can be used as adjectival modifiers.
    ///
    /// Probes `"show me a [MASK] <canonical>"` once per table and flags
    /// every parameter whose known values overlap the top-k predictions.
    /// First match wins, so each (table, parameter) pair appears at most
    /// once, in table-then-parameter document order.
    #[instrument(skip(self))]
    pub fn predict_adjectives(&self, k: usize) -> Result<Vec<String>, AnnotatorError> {
        let mut properties = Vec::new();
        for (table, entry) in &self.tables {
            let query = format!("show me a {} {}", self.model.mask_token(), entry.canonical);
            let predictions = self.predict_one(table, None, &query, 3, Some(k))?;
            for (param, values) in &entry.values {
                if predictions.iter().any(|p| values.contains(p)) {
                    properties.push(format!("{table}.{param}"));
                }
            }
        }
        info!("Found {} adjective-capable properties", properties.len());
        Ok(properties)
    }
}

/// Rebuild the full candidate phrase after a prediction.
///
/// Words at the mask indices are copied from the query, except the replaced
/// index, which takes the predicted token. A non-empty suffix is joined on
/// after a `#` marker, which encodes an optional trailing clause distinct
/// from the main phrase.
pub fn construct_canonical(
    query: &str,
    masks: &MaskIndices,
    replaced: usize,
    replacement: &str,
) -> Result<String, AnnotatorError> {
    let words: Vec<&str> = query.split(' ').collect();
    let render = |indices: &[usize]| -> Result<String, AnnotatorError> {
        let mut parts = Vec::with_capacity(indices.len());
        for &i in indices {
            if i == replaced {
                parts.push(replacement);
            } else {
                parts.push(*words.get(i).ok_or_else(|| AnnotatorError::WordIndex {
                    index: i,
                    query: query.to_string(),
                })?);
            }
        }
        Ok(parts.join(" "))
    };

    let prefix = render(&masks.prefix)?;
    let suffix = render(&masks.suffix)?;

    Ok(if masks.suffix.is_empty() {
        prefix
    } else {
        format!("{prefix} # {suffix}")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RankedToken;
    use crate::tree::PositionGroup;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    /// Deterministic stand-in for the pretrained model: always returns the
    /// same ranking, truncated to the requested length.
    struct ScriptedModel {
        ranking: Vec<&'static str>,
    }

    impl MaskedLanguageModel for ScriptedModel {
        fn mask_token(&self) -> &str {
            "[MASK]"
        }

        fn rank_substitutes(
            &self,
            _sentence: &str,
            _word_index: usize,
            n: usize,
        ) -> Result<Vec<RankedToken>, AnnotatorError> {
            Ok(self
                .ranking
                .iter()
                .take(n)
                .enumerate()
                .map(|(i, token)| RankedToken {
                    token: token.to_string(),
                    score: 100.0 - i as f32,
                })
                .collect())
        }
    }

    fn color_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "q1\tred").unwrap();
        writeln!(file, "q2\tblue").unwrap();
        file.flush().unwrap();
        file
    }

    fn car_domain(values: &NamedTempFile) -> Domain {
        let mut params = IndexMap::new();
        params.insert("color".to_string(), PathBuf::from(values.path()));
        let mut domain = Domain::new();
        domain.insert(
            "car".to_string(),
            crate::domain::TableConfig {
                canonical: "car".to_string(),
                params,
            },
        );
        domain
    }

    fn generator(ranking: Vec<&'static str>, values: &NamedTempFile) -> CandidateGenerator<ScriptedModel> {
        CandidateGenerator::new(ScriptedModel { ranking }, &car_domain(values), true, 5).unwrap()
    }

    #[test]
    fn filters_original_word_stop_words_and_non_alphabetic() {
        let values = color_file();
        let gen = generator(
            vec!["red", "the", "##ing", "123", "shiny", "fast"],
            &values,
        );
        // "red" is the original word here, not a value lookup hit
        let out = gen
            .predict_one("car", None, "show red car", 1, None)
            .unwrap();
        assert_eq!(out, vec!["shiny", "fast"]);
    }

    #[test]
    fn filters_known_argument_values() {
        let values = color_file();
        let gen = generator(vec!["blue", "shiny", "fast"], &values);
        let out = gen
            .predict_one("car", Some("color"), "show crimson car", 1, None)
            .unwrap();
        // "blue" is a known color value; it must never come back for color
        assert_eq!(out, vec!["shiny", "fast"]);
    }

    #[test]
    fn filters_canonical_matches_both_directions() {
        let values = color_file();
        let gen = generator(vec!["car", "racecar", "ca", "shiny"], &values);
        let out = gen
            .predict_one("car", None, "show red thing", 2, None)
            .unwrap();
        // "racecar" contains the canonical, "ca" is contained in it
        assert_eq!(out, vec!["shiny"]);
    }

    #[test]
    fn returns_at_most_k_without_padding() {
        let values = color_file();
        let gen = generator(vec!["shiny", "fast", "cheap", "loud", "slow", "big"], &values);
        let out = gen
            .predict_one("car", None, "show red thing", 1, Some(3))
            .unwrap();
        assert_eq!(out.len(), 3);

        let short = gen
            .predict_one("car", None, "show red thing", 1, Some(50))
            .unwrap();
        // Ranked list exhausts before 50; no placeholder padding
        assert_eq!(short.len(), 6);
    }

    #[test]
    fn unknown_table_is_an_error() {
        let values = color_file();
        let gen = generator(vec!["shiny"], &values);
        let err = gen
            .predict_one("boat", None, "show red thing", 1, None)
            .unwrap_err();
        assert!(matches!(err, AnnotatorError::UnknownTable(_)));
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let values = color_file();
        let gen = generator(vec!["shiny"], &values);
        let err = gen
            .predict_one("car", None, "show red thing", 9, None)
            .unwrap_err();
        assert!(matches!(err, AnnotatorError::WordIndex { index: 9, .. }));
    }

    #[test]
    fn reconstructs_prefix_only() {
        let masks = MaskIndices {
            prefix: vec![1, 2],
            suffix: vec![],
        };
        let out = construct_canonical("show the red car", &masks, 2, "blue").unwrap();
        assert_eq!(out, "the blue");
    }

    #[test]
    fn reconstructs_with_suffix_clause() {
        let masks = MaskIndices {
            prefix: vec![0, 1],
            suffix: vec![3],
        };
        let out = construct_canonical("list cheap items here", &masks, 1, "affordable").unwrap();
        assert_eq!(out, "list affordable # here");
    }

    #[test]
    fn prefix_indices_run_before_suffix_indices() {
        let values = color_file();
        let gen = generator(vec!["shiny"], &values);
        let masks = MaskIndices {
            prefix: vec![1],
            suffix: vec![3],
        };
        let out = gen
            .predict_position("car", None, "list cheap items here", &masks)
            .unwrap();
        assert_eq!(out, vec!["shiny # here", "cheap # shiny"]);
    }

    #[test]
    fn batch_predict_tallies_and_is_idempotent() {
        let values = color_file();
        let gen = generator(vec!["shiny", "fast"], &values);

        let group = PositionGroup {
            examples: vec![
                crate::tree::Example {
                    query: "show crimson car".to_string(),
                    masks: MaskIndices {
                        prefix: vec![1],
                        suffix: vec![],
                    },
                    candidates: vec![],
                },
                crate::tree::Example {
                    query: "find crimson car".to_string(),
                    masks: MaskIndices {
                        prefix: vec![1],
                        suffix: vec![],
                    },
                    candidates: vec![],
                },
            ],
            candidates: IndexMap::new(),
        };
        let mut positions = IndexMap::new();
        positions.insert("property".to_string(), group);
        let mut args = IndexMap::new();
        args.insert("color".to_string(), positions);
        let mut tree = ExampleTree::new();
        tree.insert("car".to_string(), args);

        gen.predict(&mut tree).unwrap();
        let first = serde_json::to_string(&tree).unwrap();

        let tally = &tree["car"]["color"]["property"].candidates;
        assert_eq!(tally["shiny"], 2);
        assert_eq!(tally["fast"], 2);

        gen.predict(&mut tree).unwrap();
        let second = serde_json::to_string(&tree).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn adjectives_flag_each_parameter_at_most_once() {
        let values = color_file();
        // Two known colors in the predictions; the parameter is still
        // reported a single time.
        let gen = generator(vec!["red", "blue", "shiny"], &values);
        let out = gen.predict_adjectives(500).unwrap();
        assert_eq!(out, vec!["car.color"]);
    }

    #[test]
    fn adjectives_skip_tables_without_matches() {
        let values = color_file();
        let gen = generator(vec!["shiny", "fast"], &values);
        let out = gen.predict_adjectives(500).unwrap();
        assert!(out.is_empty());
    }
}
