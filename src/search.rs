use std::collections::HashMap;

use ndarray::ArrayView2;
use ordered_float::OrderedFloat;

use crate::error::{CtcError, Result};
use crate::labels::Label;
use crate::scorer::BeamScorer;

/// ID of a label prefix in the [`PrefixArena`]
type PrefixId = u32;

/// Compute `ln(exp(a) + exp(b))`.
pub(crate) fn log_sum_exp(a: f32, b: f32) -> f32 {
    // Keep -inf + -inf from turning into NaN
    if a == f32::NEG_INFINITY {
        return b;
    }
    if b == f32::NEG_INFINITY {
        return a;
    }
    let max = a.max(b);
    max + ((a - max).exp() + (b - max).exp()).ln()
}

/// Decoder parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Number of classes in each probability row, blank included
    pub num_classes: usize,
    /// Number of prefixes kept after each timestep
    pub beam_width: usize,
    /// Number of paths returned per sequence
    pub top_paths: usize,
    /// Class index of the CTC blank
    pub blank_index: Label,
    /// Collapse repeated labels not separated by a blank
    pub merge_repeated: bool,
}

impl DecoderConfig {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            beam_width: 100,
            top_paths: 1,
            blank_index: 0,
            merge_repeated: true,
        }
    }

    pub fn beam_width(mut self, beam_width: usize) -> Self {
        self.beam_width = beam_width;
        self
    }

    pub fn top_paths(mut self, top_paths: usize) -> Self {
        self.top_paths = top_paths;
        self
    }

    pub fn blank_index(mut self, blank_index: Label) -> Self {
        self.blank_index = blank_index;
        self
    }

    pub fn merge_repeated(mut self, merge_repeated: bool) -> Self {
        self.merge_repeated = merge_repeated;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_classes == 0 {
            return Err(CtcError::invalid_config("no classes"));
        }
        if self.blank_index as usize >= self.num_classes {
            return Err(CtcError::invalid_config(format!(
                "blank index {} out of range for {} classes",
                self.blank_index, self.num_classes
            )));
        }
        if self.top_paths == 0 {
            return Err(CtcError::invalid_config("top paths must be at least 1"));
        }
        if self.beam_width < self.top_paths {
            return Err(CtcError::InvalidBeamWidth {
                beam_width: self.beam_width,
                top_paths: self.top_paths,
            });
        }
        Ok(())
    }
}

/// One of the best label sequences found for an input.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPath {
    /// Labels with blanks and merged repeats removed
    pub labels: Vec<Label>,
    /// Acoustic log probability plus scorer contributions
    pub score: f32,
}

#[derive(Debug)]
struct PrefixNode {
    parent: PrefixId,
    label: Label,
    len: u32,
}

/// Label prefixes of all beams of one decode call, stored as a tree so
/// that beams share their common history.
#[derive(Debug)]
struct PrefixArena {
    nodes: Vec<PrefixNode>,
    /// Map (parent, label) pairs to prefix IDs.
    children: HashMap<(PrefixId, Label), PrefixId>,
}

impl PrefixArena {
    const ROOT: PrefixId = 0;

    fn new() -> Self {
        Self {
            nodes: vec![PrefixNode {
                parent: Self::ROOT,
                label: 0,
                len: 0,
            }],
            children: HashMap::new(),
        }
    }

    fn child(&self, parent: PrefixId, label: Label) -> Option<PrefixId> {
        self.children.get(&(parent, label)).copied()
    }

    fn find_or_add(&mut self, parent: PrefixId, label: Label) -> PrefixId {
        if let Some(id) = self.child(parent, label) {
            return id;
        }
        let id = self.nodes.len() as PrefixId;
        let len = self.nodes[parent as usize].len + 1;
        self.nodes.push(PrefixNode { parent, label, len });
        self.children.insert((parent, label), id);
        id
    }

    fn len(&self, id: PrefixId) -> u32 {
        self.nodes[id as usize].len
    }

    fn last_label(&self, id: PrefixId) -> Option<Label> {
        let node = &self.nodes[id as usize];
        (node.len > 0).then_some(node.label)
    }

    fn labels(&self, mut id: PrefixId) -> Vec<Label> {
        let mut labels = Vec::with_capacity(self.len(id) as usize);
        while id != Self::ROOT {
            let node = &self.nodes[id as usize];
            labels.push(node.label);
            id = node.parent;
        }
        labels.reverse();
        labels
    }
}

/// A live prefix and its probabilities at the current timestep.
#[derive(Debug, Clone)]
struct BeamEntry<T> {
    prefix: PrefixId,
    /// Log probability of paths ending in blank.
    log_prob_blank: f32,
    /// Log probability of paths ending in the last label.
    log_prob_label: f32,
    state: T,
    /// Sum of scorer contributions along the prefix.
    scorer_score: f32,
}

impl<T> BeamEntry<T> {
    fn total(&self) -> f32 {
        log_sum_exp(self.log_prob_blank, self.log_prob_label)
    }

    fn combined(&self) -> f32 {
        self.total() + self.scorer_score
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CandidateKey {
    /// Prefix already in the arena.
    Existing(PrefixId),
    /// New prefix, created only if the candidate survives pruning.
    Extend(PrefixId, Label),
}

#[derive(Debug)]
struct Candidate<T> {
    key: CandidateKey,
    len: u32,
    entry: BeamEntry<T>,
}

/// CTC prefix beam search driven by a [`BeamScorer`].
#[derive(Debug)]
pub struct BeamSearchDecoder<S> {
    config: DecoderConfig,
    scorer: S,
}

impl<S: BeamScorer> BeamSearchDecoder<S> {
    pub fn new(config: DecoderConfig, scorer: S) -> Result<Self> {
        config.validate()?;
        if let Some(boundary) = scorer.word_boundary() {
            if boundary as usize >= config.num_classes || boundary == config.blank_index {
                return Err(CtcError::invalid_config(format!(
                    "word boundary {} is not a usable class",
                    boundary
                )));
            }
        }
        tracing::debug!(
            num_classes = config.num_classes,
            beam_width = config.beam_width,
            top_paths = config.top_paths,
            merge_repeated = config.merge_repeated,
            "created beam search decoder"
        );
        Ok(Self { config, scorer })
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn scorer(&self) -> &S {
        &self.scorer
    }

    /// Scorer weights may be changed between decode calls.
    pub fn scorer_mut(&mut self) -> &mut S {
        &mut self.scorer
    }

    /// Decode the first `seq_len` rows of a `[time, class]` probability
    /// matrix. Returns at most `top_paths` paths, best first; fewer when
    /// fewer label sequences have non-zero probability.
    pub fn decode(&self, probs: ArrayView2<f32>, seq_len: usize) -> Result<Vec<DecodedPath>> {
        let (max_time, num_classes) = probs.dim();
        if num_classes != self.config.num_classes {
            return Err(CtcError::shape(format!(
                "{} classes in input, decoder expects {}",
                num_classes, self.config.num_classes
            )));
        }
        if seq_len > max_time {
            return Err(CtcError::SequenceLengthExceeded {
                length: seq_len,
                max_time,
            });
        }
        let blank = self.config.blank_index;
        let boundary = self.scorer.word_boundary();

        let mut arena = PrefixArena::new();
        let mut beam = vec![BeamEntry {
            prefix: PrefixArena::ROOT,
            log_prob_blank: 0.0,
            log_prob_label: f32::NEG_INFINITY,
            state: self.scorer.initial_state(),
            scorer_score: 0.0,
        }];
        let mut log_probs = vec![0.0f32; num_classes];
        let mut candidates: Vec<Candidate<S::State>> = Vec::new();
        let mut index: HashMap<CandidateKey, usize> = HashMap::new();

        for t in 0..seq_len {
            let mut mass = 0.0f32;
            for (lp, &p) in log_probs.iter_mut().zip(probs.row(t).iter()) {
                if !(p >= 0.0 && p.is_finite()) {
                    return Err(CtcError::InvalidProbabilities { time: t });
                }
                mass += p;
                *lp = p.ln();
            }
            if mass <= 0.0 {
                return Err(CtcError::InvalidProbabilities { time: t });
            }

            candidates.clear();
            index.clear();
            for entry in &beam {
                let total = entry.total();
                let len = arena.len(entry.prefix);
                let last = arena.last_label(entry.prefix);

                // Same prefix: a blank, or a repeat of the last label.
                let repeat = match last {
                    Some(l) if self.config.merge_repeated => entry.log_prob_label + log_probs[l as usize],
                    _ => f32::NEG_INFINITY,
                };
                merge_candidate(
                    &mut candidates,
                    &mut index,
                    CandidateKey::Existing(entry.prefix),
                    len,
                    total + log_probs[blank as usize],
                    repeat,
                    || (entry.state.clone(), entry.scorer_score),
                );

                for c in 0..num_classes as Label {
                    let lp = log_probs[c as usize];
                    if c == blank || lp == f32::NEG_INFINITY {
                        continue;
                    }
                    // A repeat only starts a new label after a blank.
                    let from = if self.config.merge_repeated && last == Some(c) {
                        entry.log_prob_blank
                    } else {
                        total
                    };
                    if from == f32::NEG_INFINITY {
                        continue;
                    }
                    let key = match arena.child(entry.prefix, c) {
                        Some(id) => CandidateKey::Existing(id),
                        None => CandidateKey::Extend(entry.prefix, c),
                    };
                    merge_candidate(
                        &mut candidates,
                        &mut index,
                        key,
                        len + 1,
                        f32::NEG_INFINITY,
                        from + lp,
                        || {
                            let (state, delta) =
                                self.scorer.expand_state(&entry.state, c, boundary == Some(c));
                            (state, entry.scorer_score + delta)
                        },
                    );
                }
            }

            // Stable sort: equal candidates stay in creation order.
            candidates.sort_by(|a, b| {
                OrderedFloat(b.entry.combined())
                    .cmp(&OrderedFloat(a.entry.combined()))
                    .then(a.len.cmp(&b.len))
            });
            beam = candidates
                .drain(..)
                .filter(|c| c.entry.total() > f32::NEG_INFINITY && !c.entry.combined().is_nan())
                .take(self.config.beam_width)
                .map(|c| {
                    let prefix = match c.key {
                        CandidateKey::Existing(id) => id,
                        CandidateKey::Extend(parent, label) => arena.find_or_add(parent, label),
                    };
                    BeamEntry { prefix, ..c.entry }
                })
                .collect();
            if beam.is_empty() {
                return Err(CtcError::InvalidProbabilities { time: t });
            }
        }

        let mut finals: Vec<(f32, u32, PrefixId)> = beam
            .iter()
            .map(|e| {
                let score = e.combined() + self.scorer.expand_state_end(&e.state);
                (score, arena.len(e.prefix), e.prefix)
            })
            .collect();
        finals.sort_by(|a, b| OrderedFloat(b.0).cmp(&OrderedFloat(a.0)).then(a.1.cmp(&b.1)));
        finals.truncate(self.config.top_paths);
        tracing::trace!(
            seq_len,
            prefixes = arena.nodes.len(),
            best = ?finals.first().map(|f| f.0),
            "decoded sequence"
        );
        Ok(finals
            .into_iter()
            .map(|(score, _, prefix)| DecodedPath {
                labels: arena.labels(prefix),
                score,
            })
            .collect())
    }
}

/// Add probability mass to the candidate for `key`, creating it with the
/// state from `expand` on first sight.
fn merge_candidate<T>(
    candidates: &mut Vec<Candidate<T>>,
    index: &mut HashMap<CandidateKey, usize>,
    key: CandidateKey,
    len: u32,
    log_prob_blank: f32,
    log_prob_label: f32,
    expand: impl FnOnce() -> (T, f32),
) {
    match index.get(&key) {
        Some(&i) => {
            let entry = &mut candidates[i].entry;
            entry.log_prob_blank = log_sum_exp(entry.log_prob_blank, log_prob_blank);
            entry.log_prob_label = log_sum_exp(entry.log_prob_label, log_prob_label);
        }
        None => {
            let (state, scorer_score) = expand();
            index.insert(key, candidates.len());
            candidates.push(Candidate {
                key,
                len,
                entry: BeamEntry {
                    prefix: PrefixArena::ROOT,
                    log_prob_blank,
                    log_prob_label,
                    state,
                    scorer_score,
                },
            });
        }
    }
}
