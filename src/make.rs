use std::fs::File;
use std::io::prelude::*;
use std::io::BufReader;
use std::path::Path;

use crate::error::{CtcError, Result};
use crate::labels::Labels;
use crate::lm::LanguageModel;
use crate::trie::{Trie, TrieWord};

/// What [`make_trie`] did with each vocabulary word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MakeTrieReport {
    pub inserted: usize,
    /// Words with characters outside the alphabet
    pub unknown_symbols: usize,
    /// Inserted words the language model has no entry for
    pub unknown_to_model: usize,
    pub duplicates: usize,
}

impl MakeTrieReport {
    pub fn skipped(&self) -> usize {
        self.unknown_symbols + self.duplicates
    }
}

/// Read whitespace-separated words from `input`.
fn read_words(input: &Path) -> Result<Vec<String>> {
    let fh = File::open(input).map_err(|e| CtcError::open(input, e))?;
    let mut words = Vec::new();
    for line in BufReader::new(fh).lines() {
        let line = line.map_err(|e| CtcError::open(input, e))?;
        words.extend(line.split_whitespace().map(String::from));
    }
    Ok(words)
}

/// Build a trie holding every word of `vocab_path` spelled with the
/// alphabet, with its language model index and unigram score, and save it
/// to `output_path`. Words the model does not know get its unknown word, or
/// [`TrieWord::UNKNOWN_INDEX`] and the out-of-vocabulary score. Nothing is
/// written if reading or saving fails.
pub fn make_trie(
    labels: &Labels,
    lm: &dyn LanguageModel,
    vocab_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
) -> Result<MakeTrieReport> {
    let words = read_words(vocab_path.as_ref())?;
    let mut trie = Trie::new(labels.len())?;
    let mut report = MakeTrieReport::default();
    for word in &words {
        let encoded = match labels.encode(word) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::debug!(%word, error = %e, "skipping word");
                report.unknown_symbols += 1;
                continue;
            }
        };
        let known = lm.word_id(word);
        let (index, score) = match known.or_else(|| lm.unknown_word()) {
            Some(id) => (id, lm.unigram(id)),
            None => (TrieWord::UNKNOWN_INDEX, lm.score(lm.null_context(), None).0),
        };
        match trie.insert(&encoded, index, score) {
            Ok(_) => {
                report.inserted += 1;
                if known.is_none() {
                    tracing::debug!(%word, "word unknown to the language model");
                    report.unknown_to_model += 1;
                }
            }
            Err(CtcError::DuplicateWord { .. }) => {
                tracing::debug!(%word, "skipping duplicate word");
                report.duplicates += 1;
            }
            Err(e) => return Err(e),
        }
    }
    trie.save(output_path.as_ref())?;

    if report.skipped() > 0 {
        tracing::warn!(
            unknown_symbols = report.unknown_symbols,
            duplicates = report.duplicates,
            "skipped vocabulary words"
        );
    }
    tracing::info!(
        words = report.inserted,
        unknown_to_model = report.unknown_to_model,
        nodes = trie.num_nodes(),
        output = %output_path.as_ref().display(),
        "wrote trie"
    );
    Ok(report)
}
