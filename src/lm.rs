/// Word index in a language model vocabulary.
pub type WordId = u32;

/// Opaque language model context, only interpreted by the model that
/// produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LmState(pub u32);

/// Word-level N-Gram language model as seen by the decoder.
///
/// Scores are natural-log probabilities. Implementations are read-only
/// after construction and may be shared between decoding threads.
pub trait LanguageModel: Send + Sync {
    /// Context at the start of a sentence.
    fn begin_sentence(&self) -> LmState;

    /// Context with no history.
    fn null_context(&self) -> LmState;

    fn word_id(&self, word: &str) -> Option<WordId>;

    /// Word standing in for every word the model does not know, if any.
    fn unknown_word(&self) -> Option<WordId> {
        None
    }

    /// Score `word` following `context`; `None` is an out-of-vocabulary
    /// word. Returns the log probability and the next context.
    fn score(&self, context: LmState, word: Option<WordId>) -> (f32, LmState);

    /// Log probability of ending the sentence after `context`.
    fn end_sentence(&self, context: LmState) -> f32;

    /// Log probability of `word` with no history.
    fn unigram(&self, word: WordId) -> f32 {
        self.score(self.null_context(), Some(word)).0
    }
}
