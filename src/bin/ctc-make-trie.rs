use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::Level;

use rustfst_ctcdecode::{make_trie, Labels, NGramModel};

/// Build a vocabulary trie for CTC decoding with an N-Gram model.
#[derive(Debug, Parser)]
#[command(name = "ctc-make-trie")]
struct Args {
    /// Output labels, one character per class
    #[arg(long)]
    alphabet: String,
    #[arg(long, default_value_t = 0)]
    blank_index: u32,
    #[arg(long)]
    space_index: u32,
    /// Binary N-Gram FST with its symbol table
    #[arg(long)]
    lm: PathBuf,
    /// Whitespace-separated vocabulary words
    #[arg(long)]
    vocab: PathBuf,
    #[arg(long, short)]
    output: PathBuf,
    /// Log skipped words
    #[arg(long, short)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    let labels = Labels::new(&args.alphabet, args.blank_index, args.space_index).context("invalid alphabet")?;
    let lm = NGramModel::read(&args.lm).with_context(|| format!("failed to load {}", args.lm.display()))?;
    let report = make_trie(&labels, &lm, &args.vocab, &args.output)
        .with_context(|| format!("failed to build {}", args.output.display()))?;
    println!(
        "{} words ({} unknown to the model), {} skipped ({} unknown symbols, {} duplicates)",
        report.inserted,
        report.unknown_to_model,
        report.skipped(),
        report.unknown_symbols,
        report.duplicates
    );
    Ok(())
}
