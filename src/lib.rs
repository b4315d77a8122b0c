//! CTC beam search decoding, optionally guided by a word-level N-Gram
//! model stored as an FST and a vocabulary trie over the label alphabet.

#[cfg(feature = "ngram")]
use rustfst::fst_impls::VectorFst;
#[cfg(feature = "ngram")]
use rustfst::semirings::TropicalWeight;

/// rustfst does not define this but we will
#[cfg(feature = "ngram")]
pub(crate) type StdVectorFst = VectorFst<TropicalWeight>;

/// Error type and result alias
pub mod error;
/// Alphabet of output labels
pub mod labels;
/// Language model interface used by the scorer
pub mod lm;
/// Vocabulary trie and its file format
pub mod trie;
/// Backoff N-Gram models stored as FSTs
#[cfg(feature = "ngram")]
pub mod model;
/// Beam scoring strategies
pub mod scorer;
/// Prefix beam search
pub mod search;
/// Batched decoding into caller buffers
pub mod batch;
/// Building tries from a vocabulary file
pub mod make;

pub use batch::{BatchDecoder, DecodeOutputs};
pub use error::{CtcError, Result};
pub use labels::{Label, Labels};
pub use lm::{LanguageModel, LmState, WordId};
pub use make::{make_trie, MakeTrieReport};
#[cfg(feature = "ngram")]
pub use model::NGramModel;
pub use scorer::{AcousticScorer, BeamScorer, DecodeType, NGramScorer, Scorer, ScorerWeights};
pub use search::{BeamSearchDecoder, DecodedPath, DecoderConfig};
pub use trie::Trie;

/// Whether this build can load N-Gram models.
pub fn language_model_available() -> bool {
    cfg!(feature = "ngram")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_reports_language_model_support() {
        assert_eq!(language_model_available(), cfg!(feature = "ngram"));
        let scorer = Scorer::from_files("_ ab", 0, 1, "testdata/missing.fst", "testdata/missing.trie");
        if language_model_available() {
            assert!(matches!(scorer, Err(CtcError::FileNotFound { .. })));
        } else {
            assert!(matches!(scorer, Err(CtcError::Unavailable { .. })));
        }
    }
}
