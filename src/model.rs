use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use rustfst::prelude::*;

use crate::error::{CtcError, Result};
use crate::lm::{LanguageModel, LmState, WordId};
use crate::StdVectorFst;

/// Cost (negative log) of a word the model cannot score at all
const KINFBACKOFF: f32 = 99.00;
/// Symbol for out-of-vocabulary words
pub const UNK_SYMBOL: &str = "<unk>";

/// Backoff N-Gram model stored as an FST.
///
/// Follows the OpenGrm conventions: arc weights are negative log
/// probabilities, each state except the unigram state has an epsilon
/// backoff arc to its lower order state, final weights score the end of
/// the sentence, and the start state holds the `<s>` context.
pub struct NGramModel {
    /// Underlying FST, arcs sorted by input label
    fst: StdVectorFst,
    /// Vocabulary
    symbols: Arc<SymbolTable>,
    /// `<s>` context
    start: StateId,
    /// State with no backoff arc
    unigram: StateId,
    /// Highest order in the model
    hi_order: u8,
    /// Order of each state
    state_orders: Vec<u8>,
    /// Label of `<unk>`, if the model has one
    unk: Option<Label>,
}

impl NGramModel {
    pub fn from_fst(mut fst: StdVectorFst) -> anyhow::Result<Self> {
        let symbols = fst
            .input_symbols()
            .cloned()
            .ok_or_else(|| anyhow!("N-Gram FST has no input symbol table"))?;
        let start = fst
            .start()
            .ok_or_else(|| anyhow!("N-Gram FST has no start state"))?;
        tr_sort(&mut fst, ILabelCompare {});

        let num_states = fst.num_states();
        let mut state_orders = Vec::with_capacity(num_states);
        let mut unigram = None;
        for s in 0..num_states as StateId {
            let mut depth: usize = 1;
            let mut state = s;
            while let Some((_, next)) = backoff_tr(&fst, state)? {
                if depth > num_states {
                    return Err(anyhow!("backoff cycle through state {}", s));
                }
                depth += 1;
                state = next;
            }
            match unigram {
                None => unigram = Some(state),
                Some(u) if u != state => {
                    return Err(anyhow!("states {} and {} both lack a backoff arc", u, state))
                }
                _ => {}
            }
            state_orders.push(depth.min(u8::MAX as usize) as u8);
        }
        let unigram = unigram.ok_or_else(|| anyhow!("N-Gram FST has no states"))?;
        let hi_order = state_orders.iter().copied().max().unwrap_or(1);
        let unk = symbols.get_label(UNK_SYMBOL);
        Ok(Self {
            fst,
            symbols,
            start,
            unigram,
            hi_order,
            state_orders,
            unk,
        })
    }

    /// Read a binary FST with its symbol table.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| CtcError::open(path, e))?;
        let model = Self::from_fst(StdVectorFst::load(&data)?)?;
        tracing::info!(
            path = %path.display(),
            order = model.hi_order,
            states = model.state_orders.len(),
            words = model.symbols.len(),
            "loaded N-Gram model"
        );
        Ok(model)
    }

    pub fn order(&self) -> u8 {
        self.hi_order
    }

    pub fn state_order(&self, state: LmState) -> Option<u8> {
        self.state_orders.get(state.0 as usize).copied()
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    fn find_tr(&self, state: StateId, label: Label) -> Option<(f32, StateId)> {
        let trs = self.fst.get_trs(state).ok()?;
        let trs = trs.trs();
        let idx = trs.binary_search_by_key(&label, |tr| tr.ilabel).ok()?;
        Some((*trs[idx].weight.value(), trs[idx].nextstate))
    }

    fn backoff(&self, state: StateId) -> Option<(f32, StateId)> {
        backoff_tr(&self.fst, state).ok().flatten()
    }
}

/// Epsilon arc of `state`; arcs must already be sorted by input label.
fn backoff_tr(fst: &StdVectorFst, state: StateId) -> anyhow::Result<Option<(f32, StateId)>> {
    let trs = fst.get_trs(state)?;
    Ok(trs
        .trs()
        .first()
        .filter(|tr| tr.ilabel == EPS_LABEL)
        .map(|tr| (*tr.weight.value(), tr.nextstate)))
}

impl LanguageModel for NGramModel {
    fn begin_sentence(&self) -> LmState {
        LmState(self.start)
    }

    fn null_context(&self) -> LmState {
        LmState(self.unigram)
    }

    fn word_id(&self, word: &str) -> Option<WordId> {
        self.symbols.get_label(word).filter(|&l| l != EPS_LABEL)
    }

    fn unknown_word(&self) -> Option<WordId> {
        self.unk
    }

    fn score(&self, context: LmState, word: Option<WordId>) -> (f32, LmState) {
        let mut cost = 0.0;
        if let Some(label) = word.or(self.unk) {
            let mut state = context.0;
            loop {
                if let Some((w, next)) = self.find_tr(state, label) {
                    return (-(cost + w), LmState(next));
                }
                match self.backoff(state) {
                    Some((w, next)) => {
                        cost += w;
                        state = next;
                    }
                    None => break,
                }
            }
        }
        (-(cost + KINFBACKOFF), LmState(self.unigram))
    }

    fn end_sentence(&self, context: LmState) -> f32 {
        let mut cost = 0.0;
        let mut state = context.0;
        loop {
            if let Some(w) = self.fst.final_weight(state).ok().flatten() {
                if !w.is_zero() {
                    return -(cost + *w.value());
                }
            }
            match self.backoff(state) {
                Some((w, next)) => {
                    cost += w;
                    state = next;
                }
                None => return -(cost + KINFBACKOFF),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn cost(p: f32) -> f32 {
        -p.ln()
    }

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-4, "{} != {}", a, b);
    }

    /// Bigram model over {a, b}: state 0 is the unigram state, 1 is `<s>`,
    /// 2 follows "a".
    pub(crate) fn bigram_fst() -> StdVectorFst {
        let mut syms = SymbolTable::new();
        let a = syms.add_symbol("a");
        let b = syms.add_symbol("b");
        let mut fst = StdVectorFst::new();
        let unigram = fst.add_state();
        let bos = fst.add_state();
        let after_a = fst.add_state();
        fst.set_start(bos).unwrap();
        fst.add_tr(unigram, Tr::new(a, a, cost(0.5), after_a)).unwrap();
        fst.add_tr(unigram, Tr::new(b, b, cost(0.3), unigram)).unwrap();
        fst.set_final(unigram, cost(0.2)).unwrap();
        fst.add_tr(bos, Tr::new(EPS_LABEL, EPS_LABEL, cost(0.4), unigram)).unwrap();
        fst.add_tr(bos, Tr::new(a, a, cost(0.6), after_a)).unwrap();
        fst.add_tr(after_a, Tr::new(b, b, cost(0.7), unigram)).unwrap();
        fst.add_tr(after_a, Tr::new(EPS_LABEL, EPS_LABEL, cost(0.3), unigram)).unwrap();
        let syms = Arc::new(syms);
        fst.set_input_symbols(Arc::clone(&syms));
        fst.set_output_symbols(syms);
        fst
    }

    #[test]
    fn it_reads_the_structure() {
        let model = NGramModel::from_fst(bigram_fst()).unwrap();
        assert_eq!(model.order(), 2);
        assert_eq!(model.begin_sentence(), LmState(1));
        assert_eq!(model.null_context(), LmState(0));
        assert_eq!(model.state_order(LmState(0)), Some(1));
        assert_eq!(model.state_order(LmState(2)), Some(2));
        assert_eq!(model.word_id("a"), Some(1));
        assert_eq!(model.word_id("b"), Some(2));
        assert_eq!(model.word_id("<eps>"), None);
        assert_eq!(model.word_id("c"), None);
    }

    #[test]
    fn it_scores_with_backoff() {
        let model = NGramModel::from_fst(bigram_fst()).unwrap();
        let (a, b) = (Some(1), Some(2));
        let bos = model.begin_sentence();

        let (p, after_a) = model.score(bos, a);
        assert_close(p, 0.6f32.ln());
        assert_eq!(after_a, LmState(2));

        let (p, next) = model.score(bos, b);
        assert_close(p, 0.4f32.ln() + 0.3f32.ln());
        assert_eq!(next, LmState(0));

        let (p, _) = model.score(after_a, b);
        assert_close(p, 0.7f32.ln());
        let (p, next) = model.score(after_a, a);
        assert_close(p, 0.3f32.ln() + 0.5f32.ln());
        assert_eq!(next, after_a);

        assert_close(model.unigram(2), 0.3f32.ln());
        assert_close(model.end_sentence(LmState(0)), 0.2f32.ln());
        assert_close(model.end_sentence(after_a), 0.3f32.ln() + 0.2f32.ln());
    }

    #[test]
    fn it_penalizes_unknown_words() {
        let model = NGramModel::from_fst(bigram_fst()).unwrap();
        let (p, next) = model.score(LmState(2), None);
        assert_close(p, -KINFBACKOFF);
        assert_eq!(next, model.null_context());
    }

    #[test]
    fn it_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bigram.fst");
        bigram_fst().write(&path).unwrap();
        let model = NGramModel::read(&path).unwrap();
        assert_close(model.score(model.begin_sentence(), Some(1)).0, 0.6f32.ln());
        assert!(matches!(
            NGramModel::read(dir.path().join("missing.fst")),
            Err(CtcError::FileNotFound { .. })
        ));
    }

    #[test]
    fn it_reports_unreadable_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            NGramModel::read(dir.path()),
            Err(CtcError::FileUnreadable { .. })
        ));
    }

    #[test]
    fn it_uses_the_unknown_word() {
        let mut fst = bigram_fst();
        let mut syms = (**fst.input_symbols().unwrap()).clone();
        let unk = syms.add_symbol(UNK_SYMBOL);
        fst.add_tr(0, Tr::new(unk, unk, cost(0.1), 0)).unwrap();
        let syms = Arc::new(syms);
        fst.set_input_symbols(Arc::clone(&syms));
        fst.set_output_symbols(syms);

        let model = NGramModel::from_fst(fst).unwrap();
        assert_eq!(model.unknown_word(), Some(unk));
        let (p, next) = model.score(LmState(2), None);
        assert_close(p, 0.3f32.ln() + 0.1f32.ln());
        assert_eq!(next, model.null_context());
        assert_eq!(NGramModel::from_fst(bigram_fst()).unwrap().unknown_word(), None);
    }

    #[test]
    fn it_needs_symbols() {
        let mut fst = StdVectorFst::new();
        let s = fst.add_state();
        fst.set_start(s).unwrap();
        assert!(NGramModel::from_fst(fst).is_err());
    }
}
