#![cfg(feature = "ngram")]

use std::path::Path;
use std::sync::Arc;

use ndarray::{arr2, Array2, Array3, Axis};
use rustfst::prelude::*;

use rustfst_ctcdecode::{
    make_trie, AcousticScorer, BatchDecoder, BeamScorer, BeamSearchDecoder, DecodeOutputs, DecodeType,
    DecoderConfig, LanguageModel, Labels, NGramModel, NGramScorer, Scorer, Trie,
};

const ALPHABET: &str = "_ ab";

fn cost(p: f32) -> TropicalWeight {
    TropicalWeight::new(-p.ln())
}

/// Unigram model over "ab" and "ba" with a `<s>` state backing off to it.
fn unigram_fst() -> VectorFst<TropicalWeight> {
    let mut syms = SymbolTable::new();
    let ab = syms.add_symbol("ab");
    let ba = syms.add_symbol("ba");
    let mut fst = VectorFst::<TropicalWeight>::new();
    let unigram = fst.add_state();
    let bos = fst.add_state();
    fst.set_start(bos).unwrap();
    fst.add_tr(unigram, Tr::new(ab, ab, cost(0.6), unigram)).unwrap();
    fst.add_tr(unigram, Tr::new(ba, ba, cost(0.2), unigram)).unwrap();
    fst.set_final(unigram, cost(0.2)).unwrap();
    fst.add_tr(bos, Tr::new(EPS_LABEL, EPS_LABEL, cost(1.0), unigram)).unwrap();
    let syms = Arc::new(syms);
    fst.set_input_symbols(Arc::clone(&syms));
    fst.set_output_symbols(syms);
    fst
}

/// Write the model and its trie under `dir`, returning their paths.
fn write_model(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let lm_path = dir.join("unigram.fst");
    unigram_fst().write(&lm_path).unwrap();
    let vocab_path = dir.join("vocab.txt");
    std::fs::write(&vocab_path, "ab ba\naa\n").unwrap();
    let trie_path = dir.join("vocab.trie");
    let labels = Labels::new(ALPHABET, 0, 1).unwrap();
    let lm = NGramModel::read(&lm_path).unwrap();
    let report = make_trie(&labels, &lm, &vocab_path, &trie_path).unwrap();
    assert_eq!(report.inserted, 3);
    assert_eq!(report.unknown_to_model, 1);
    (lm_path, trie_path)
}

/// Acoustically "b" beats "ab", which is the only likely vocabulary word.
fn ambiguous() -> Array2<f32> {
    // classes: blank, space, a, b
    arr2(&[[0.0, 0.0, 0.45, 0.55], [0.0, 0.0, 0.4, 0.6]])
}

#[test]
fn it_rescores_with_the_language_model() {
    let dir = tempfile::tempdir().unwrap();
    let (lm_path, trie_path) = write_model(dir.path());
    let config = DecoderConfig::new(4).beam_width(8).top_paths(3);

    let acoustic = BeamSearchDecoder::new(config, AcousticScorer).unwrap();
    let paths = acoustic.decode(ambiguous().view(), 2).unwrap();
    assert_eq!(paths[0].labels, vec![3]);

    let scorer = Scorer::from_files(ALPHABET, 0, 1, &lm_path, &trie_path).unwrap();
    assert_eq!(scorer.decode_type(), DecodeType::CtcNGram);
    let decoder = BeamSearchDecoder::new(config, scorer).unwrap();
    let paths = decoder.decode(ambiguous().view(), 2).unwrap();
    assert_eq!(paths[0].labels, vec![2, 3]);
    let expected = (0.45f32 * 0.6).ln() + 0.6f32.ln() + 0.2f32.ln();
    assert!((paths[0].score - expected).abs() < 1e-4);
}

#[test]
fn it_weights_the_language_model() {
    let dir = tempfile::tempdir().unwrap();
    let (lm_path, trie_path) = write_model(dir.path());
    let mut scorer = Scorer::from_files(ALPHABET, 0, 1, &lm_path, &trie_path).unwrap();
    scorer.as_ngram_mut().unwrap().set_lm_weight(0.0);
    let decoder = BeamSearchDecoder::new(DecoderConfig::new(4).beam_width(8), scorer).unwrap();
    assert_eq!(decoder.decode(ambiguous().view(), 2).unwrap()[0].labels, vec![3]);
}

#[test]
fn it_decodes_batches_deterministically() {
    let dir = tempfile::tempdir().unwrap();
    let (lm_path, trie_path) = write_model(dir.path());
    let scorer = Scorer::from_files(ALPHABET, 0, 1, &lm_path, &trie_path).unwrap();
    let decoder = BatchDecoder::new(DecoderConfig::new(4).beam_width(6).top_paths(2), scorer).unwrap();

    // "ab ba" spoken slowly, then the ambiguous pair
    let sentence = arr2(&[
        [0.1, 0.0, 0.8, 0.1],
        [0.1, 0.1, 0.1, 0.7],
        [0.2, 0.7, 0.05, 0.05],
        [0.1, 0.0, 0.1, 0.8],
        [0.5, 0.0, 0.4, 0.1],
        [0.1, 0.0, 0.8, 0.1],
    ]);
    let mut short = Array2::from_elem((6, 4), 0.25);
    short.slice_mut(ndarray::s![..2, ..]).assign(&ambiguous());
    let probs = ndarray::stack(Axis(1), &[sentence.view(), short.view()]).unwrap();

    let first = decoder.decode_batch(probs.view(), &[6, 2]).unwrap();
    for _ in 0..4 {
        assert_eq!(decoder.decode_batch(probs.view(), &[6, 2]).unwrap(), first);
    }
    let labels = Labels::new(ALPHABET, 0, 1).unwrap();
    assert_eq!(labels.decode(&first[0][0].labels), "ab ba");
    assert_eq!(labels.decode(&first[1][0].labels), "ab");

    let mut out_labels = Array3::from_elem((2, 2, 8), -1);
    let mut out_lengths = Array2::from_elem((2, 2), -1);
    let mut out_scores = Array2::from_elem((2, 2), 0.0);
    decoder
        .decode(
            probs.view(),
            &[6, 2],
            DecodeOutputs {
                labels: out_labels.view_mut(),
                lengths: out_lengths.view_mut(),
                scores: out_scores.view_mut(),
            },
        )
        .unwrap();
    assert_eq!(out_lengths[[0, 0]], 5);
    assert_eq!(out_lengths[[0, 1]], 2);
    assert_eq!(out_scores[[0, 0]], first[0][0].score);
    assert_eq!(out_labels[[0, 1, 0]], 2);
    assert_eq!(out_labels[[0, 1, 1]], 3);
}

#[test]
fn it_scores_unknown_words_with_the_backoff_penalty() {
    let lm = NGramModel::from_fst(unigram_fst()).unwrap();
    let (known, _) = lm.score(lm.begin_sentence(), lm.word_id("ab"));
    let (unknown, next) = lm.score(lm.begin_sentence(), lm.word_id("aa"));
    assert!((known - 0.6f32.ln()).abs() < 1e-5);
    assert_eq!(unknown, -99.0);
    assert_eq!(next, lm.null_context());
}

#[test]
fn it_reports_missing_files() {
    let dir = tempfile::tempdir().unwrap();
    let (lm_path, _) = write_model(dir.path());
    let missing = dir.path().join("missing.trie");
    assert!(matches!(
        Scorer::from_files(ALPHABET, 0, 1, &lm_path, &missing),
        Err(rustfst_ctcdecode::CtcError::FileNotFound { .. })
    ));
}

#[test]
fn it_scores_model_words_the_trie_lacks() {
    let labels = Labels::new(ALPHABET, 0, 1).unwrap();
    let lm = NGramModel::from_fst(unigram_fst()).unwrap();
    let mut trie = Trie::new(labels.len()).unwrap();
    let ab = lm.word_id("ab").unwrap();
    trie.insert(&labels.encode("ab").unwrap(), ab, lm.unigram(ab)).unwrap();
    let mut scorer = NGramScorer::new(labels.clone(), Arc::new(trie), Arc::new(lm)).unwrap();
    scorer.set_valid_word_count_weight(1.0);

    let mut state = scorer.initial_state();
    let mut total = 0.0;
    for label in labels.encode("ba ").unwrap() {
        let (next, delta) = scorer.expand_state(&state, label, labels.is_space(label));
        state = next;
        total += delta;
    }
    assert!((total - 0.2f32.ln()).abs() < 1e-5);
    assert_eq!((state.words, state.valid_words), (1, 0));
}

#[test]
fn it_keeps_words_unknown_to_the_model() {
    let dir = tempfile::tempdir().unwrap();
    let (_, trie_path) = write_model(dir.path());
    let labels = Labels::new(ALPHABET, 0, 1).unwrap();
    let trie = Trie::load(&trie_path).unwrap();
    let aa = trie.find(&labels.encode("aa").unwrap()).unwrap();
    let word = trie.word(aa).unwrap();
    assert!(!word.is_known());
    assert_eq!(word.unigram_score, -99.0);
}
