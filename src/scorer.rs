use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::{CtcError, Result};
use crate::labels::{Label, Labels};
use crate::lm::{LanguageModel, LmState};
use crate::trie::{NodeId, Trie};

/// Scoring strategy consulted by the beam search whenever a beam emits a
/// new label.
///
/// States are values: expanding never mutates the parent state, and the
/// state reached for a label sequence depends only on that sequence.
pub trait BeamScorer: Send + Sync {
    type State: Clone + PartialEq + fmt::Debug + Send;

    fn initial_state(&self) -> Self::State;

    /// State after emitting `label`, and the score to add to the beam.
    fn expand_state(&self, state: &Self::State, label: Label, is_word_boundary: bool) -> (Self::State, f32);

    /// Score to add once the input is exhausted.
    fn expand_state_end(&self, state: &Self::State) -> f32;

    /// Label which separates words, if the scorer cares about words.
    fn word_boundary(&self) -> Option<Label> {
        None
    }
}

/// Scorer that ranks beams on acoustic probability alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcousticScorer;

impl BeamScorer for AcousticScorer {
    type State = ();

    fn initial_state(&self) {}

    fn expand_state(&self, _state: &(), _label: Label, _is_word_boundary: bool) -> ((), f32) {
        ((), 0.0)
    }

    fn expand_state_end(&self, _state: &()) -> f32 {
        0.0
    }
}

/// Weights of the language model terms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScorerWeights {
    /// Multiplies the language model log probability of each word.
    pub lm_weight: f32,
    /// Added for every word.
    pub word_count_weight: f32,
    /// Added for every word found in the vocabulary trie.
    pub valid_word_count_weight: f32,
}

impl Default for ScorerWeights {
    fn default() -> Self {
        Self {
            lm_weight: 1.0,
            word_count_weight: 0.0,
            valid_word_count_weight: 0.0,
        }
    }
}

/// Beam state of the [`NGramScorer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NGramState {
    /// Trie node reached by the word in progress; `None` once the word has
    /// left the vocabulary.
    pub node: Option<NodeId>,
    /// Labels of the word in progress.
    pub word: Vec<Label>,
    /// Language model context of the completed words.
    pub context: LmState,
    /// Number of completed words.
    pub words: u32,
    /// Number of completed words found in the trie.
    pub valid_words: u32,
}

impl NGramState {
    fn in_word(&self) -> bool {
        !self.word.is_empty()
    }
}

/// Scorer adding language model and vocabulary terms at word boundaries.
///
/// Words that leave the trie are not pruned: the language model still
/// scores them, they just do not count as valid.
pub struct NGramScorer {
    labels: Labels,
    trie: Arc<Trie>,
    lm: Arc<dyn LanguageModel>,
    weights: ScorerWeights,
}

impl fmt::Debug for NGramScorer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NGramScorer")
            .field("labels", &self.labels)
            .field("trie_words", &self.trie.num_words())
            .field("weights", &self.weights)
            .finish()
    }
}

impl NGramScorer {
    pub fn new(labels: Labels, trie: Arc<Trie>, lm: Arc<dyn LanguageModel>) -> Result<Self> {
        if trie.num_labels() != labels.len() {
            return Err(CtcError::invalid_config(format!(
                "trie built for {} labels, alphabet has {}",
                trie.num_labels(),
                labels.len()
            )));
        }
        Ok(Self {
            labels,
            trie,
            lm,
            weights: ScorerWeights::default(),
        })
    }

    pub fn with_weights(mut self, weights: ScorerWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn trie(&self) -> &Trie {
        &self.trie
    }

    pub fn weights(&self) -> ScorerWeights {
        self.weights
    }

    pub fn set_lm_weight(&mut self, weight: f32) {
        self.weights.lm_weight = weight;
    }

    pub fn set_word_count_weight(&mut self, weight: f32) {
        self.weights.word_count_weight = weight;
    }

    pub fn set_valid_word_count_weight(&mut self, weight: f32) {
        self.weights.valid_word_count_weight = weight;
    }

    /// Close the word in progress.
    fn finish_word(&self, state: &NGramState) -> (NGramState, f32) {
        let entry = state.node.and_then(|n| self.trie.word(n));
        let word_id = match entry {
            Some(w) if w.is_known() => Some(w.vocab_index),
            _ => self.lm.word_id(&self.labels.decode(&state.word)),
        };
        let (lm_score, context) = self.lm.score(state.context, word_id);
        let valid = entry.is_some();
        let next = NGramState {
            node: Some(Trie::ROOT),
            word: Vec::new(),
            context,
            words: state.words + 1,
            valid_words: state.valid_words + u32::from(valid),
        };
        let mut delta = self.weights.lm_weight * lm_score + self.weights.word_count_weight;
        if valid {
            delta += self.weights.valid_word_count_weight;
        }
        (next, delta)
    }
}

impl BeamScorer for NGramScorer {
    type State = NGramState;

    fn initial_state(&self) -> NGramState {
        NGramState {
            node: Some(Trie::ROOT),
            word: Vec::new(),
            context: self.lm.begin_sentence(),
            words: 0,
            valid_words: 0,
        }
    }

    fn expand_state(&self, state: &NGramState, label: Label, is_word_boundary: bool) -> (NGramState, f32) {
        if is_word_boundary {
            if state.in_word() {
                self.finish_word(state)
            } else {
                (state.clone(), 0.0)
            }
        } else {
            let node = state.node.and_then(|n| self.trie.lookup_child(n, label));
            let mut word = Vec::with_capacity(state.word.len() + 1);
            word.extend_from_slice(&state.word);
            word.push(label);
            (NGramState { node, word, ..*state }, 0.0)
        }
    }

    fn expand_state_end(&self, state: &NGramState) -> f32 {
        let (context, delta) = if state.in_word() {
            let (next, delta) = self.finish_word(state);
            (next.context, delta)
        } else {
            (state.context, 0.0)
        };
        delta + self.weights.lm_weight * self.lm.end_sentence(context)
    }

    fn word_boundary(&self) -> Option<Label> {
        Some(self.labels.space())
    }
}

/// Decoder flavour, one per [`Scorer`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeType {
    Ctc,
    CtcNGram,
}

/// The scorers a decoder can be built with.
#[derive(Debug)]
pub enum Scorer {
    Acoustic(AcousticScorer),
    NGram(NGramScorer),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScorerState {
    Acoustic,
    NGram(NGramState),
}

impl Scorer {
    pub fn acoustic() -> Self {
        Self::Acoustic(AcousticScorer)
    }

    /// Language model scorer from a binary N-Gram FST and a trie file.
    #[cfg(feature = "ngram")]
    pub fn from_files(
        alphabet: &str,
        blank_index: Label,
        space_index: Label,
        lm_path: impl AsRef<Path>,
        trie_path: impl AsRef<Path>,
    ) -> Result<Self> {
        let labels = Labels::new(alphabet, blank_index, space_index)?;
        let lm = crate::model::NGramModel::read(lm_path)?;
        let trie = Trie::load(trie_path)?;
        Ok(Self::NGram(NGramScorer::new(labels, Arc::new(trie), Arc::new(lm))?))
    }

    #[cfg(not(feature = "ngram"))]
    pub fn from_files(
        _alphabet: &str,
        _blank_index: Label,
        _space_index: Label,
        _lm_path: impl AsRef<Path>,
        _trie_path: impl AsRef<Path>,
    ) -> Result<Self> {
        Err(CtcError::Unavailable { feature: "ngram" })
    }

    pub fn decode_type(&self) -> DecodeType {
        match self {
            Self::Acoustic(_) => DecodeType::Ctc,
            Self::NGram(_) => DecodeType::CtcNGram,
        }
    }

    pub fn as_ngram_mut(&mut self) -> Option<&mut NGramScorer> {
        match self {
            Self::NGram(scorer) => Some(scorer),
            Self::Acoustic(_) => None,
        }
    }
}

impl From<NGramScorer> for Scorer {
    fn from(scorer: NGramScorer) -> Self {
        Self::NGram(scorer)
    }
}

impl BeamScorer for Scorer {
    type State = ScorerState;

    fn initial_state(&self) -> ScorerState {
        match self {
            Self::Acoustic(_) => ScorerState::Acoustic,
            Self::NGram(scorer) => ScorerState::NGram(scorer.initial_state()),
        }
    }

    // States only ever come from `initial_state` of the same scorer, so the
    // variants always agree.
    fn expand_state(&self, state: &ScorerState, label: Label, is_word_boundary: bool) -> (ScorerState, f32) {
        match (self, state) {
            (Self::NGram(scorer), ScorerState::NGram(state)) => {
                let (next, delta) = scorer.expand_state(state, label, is_word_boundary);
                (ScorerState::NGram(next), delta)
            }
            _ => (state.clone(), 0.0),
        }
    }

    fn expand_state_end(&self, state: &ScorerState) -> f32 {
        match (self, state) {
            (Self::NGram(scorer), ScorerState::NGram(state)) => scorer.expand_state_end(state),
            _ => 0.0,
        }
    }

    fn word_boundary(&self) -> Option<Label> {
        match self {
            Self::Acoustic(scorer) => scorer.word_boundary(),
            Self::NGram(scorer) => scorer.word_boundary(),
        }
    }
}
