//! Canonical Annotator CLI
//!
//! Reads one JSON document on stdin carrying the example tree and the domain
//! configuration, queries a pretrained masked language model for candidate
//! synonym forms and adjective-capable properties, and writes the result as
//! one JSON document on stdout. Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Generate synonyms and detect adjectives in one run
//! canonical-annotator all < input.json > output.json
//!
//! # Synonyms only, without masking the target token
//! canonical-annotator synonyms --no-mask --k-synonyms 10 < input.json
//!
//! # Adjective detection only
//! canonical-annotator adjectives --k-adjectives 300 < input.json
//! ```

use std::io::{self, Read};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing::info;

use canonical_annotator::{BertMaskedLm, CandidateGenerator, Domain, ExampleTree};

#[derive(Parser)]
#[command(name = "canonical-annotator")]
#[command(version = "0.1.0")]
#[command(about = "Generate canonical phrase synonyms with a masked language model")]
struct Cli {
    /// Which command to run
    #[arg(value_enum)]
    command: Command,

    /// Mask the target token before predicting (default)
    #[arg(long, overrides_with = "no_mask")]
    mask: bool,

    /// Predict without masking the target token
    #[arg(long)]
    no_mask: bool,

    /// Top-k candidates per example when generating synonyms
    #[arg(long, default_value_t = 5)]
    k_synonyms: usize,

    /// Top-k candidates when detecting adjectives
    #[arg(long, default_value_t = 500)]
    k_adjectives: usize,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Command {
    Adjectives,
    Synonyms,
    All,
}

#[derive(Serialize)]
struct Output {
    #[serde(skip_serializing_if = "Option::is_none")]
    synonyms: Option<ExampleTree>,
    #[serde(skip_serializing_if = "Option::is_none")]
    adjectives: Option<Vec<String>>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mask = cli.mask || !cli.no_mask;

    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read stdin")?;

    // Two top-level values, unpacked in document order: the example tree
    // first, the domain configuration second. Key names are not interpreted.
    let document: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&input).context("Input is not a JSON object")?;
    let mut values = document.into_iter().map(|(_, value)| value);

    let tree_value = values.next().context("Input is missing the example tree")?;
    let mut examples: ExampleTree =
        serde_json::from_value(tree_value).context("Malformed example tree")?;

    let domain_value = values
        .next()
        .context("Input is missing the domain configuration")?;
    let domain: Domain =
        serde_json::from_value(domain_value).context("Malformed domain configuration")?;

    info!("Loading masked language model (this may download weights on first run)...");
    let model = BertMaskedLm::new().context("Failed to load masked language model")?;

    let generator = CandidateGenerator::new(model, &domain, mask, cli.k_synonyms)
        .context("Failed to load domain configuration")?;

    let mut output = Output {
        synonyms: None,
        adjectives: None,
    };
    if matches!(cli.command, Command::Synonyms | Command::All) {
        generator
            .predict(&mut examples)
            .context("Synonym generation failed")?;
        output.synonyms = Some(examples);
    }
    if matches!(cli.command, Command::Adjectives | Command::All) {
        output.adjectives = Some(
            generator
                .predict_adjectives(cli.k_adjectives)
                .context("Adjective detection failed")?,
        );
    }

    println!(
        "{}",
        serde_json::to_string(&output).context("Failed to serialize output")?
    );
    Ok(())
}
