use ndarray::{ArrayView3, ArrayViewMut2, ArrayViewMut3, Axis};
use rayon::prelude::*;

use crate::error::{CtcError, Result};
use crate::scorer::BeamScorer;
use crate::search::{BeamSearchDecoder, DecodedPath, DecoderConfig};

/// Caller-owned result buffers.
#[derive(Debug)]
pub struct DecodeOutputs<'a> {
    /// Labels, `[top_paths, batch, max_label_len]`
    pub labels: ArrayViewMut3<'a, i32>,
    /// Number of labels of each path, `[top_paths, batch]`
    pub lengths: ArrayViewMut2<'a, i32>,
    /// Score of each path, `[top_paths, batch]`
    pub scores: ArrayViewMut2<'a, f32>,
}

/// Decodes every sequence of a batch, in parallel, with one
/// [`BeamSearchDecoder`].
#[derive(Debug)]
pub struct BatchDecoder<S> {
    decoder: BeamSearchDecoder<S>,
}

impl<S: BeamScorer> BatchDecoder<S> {
    pub fn new(config: DecoderConfig, scorer: S) -> Result<Self> {
        Ok(Self {
            decoder: BeamSearchDecoder::new(config, scorer)?,
        })
    }

    pub fn decoder(&self) -> &BeamSearchDecoder<S> {
        &self.decoder
    }

    pub fn decoder_mut(&mut self) -> &mut BeamSearchDecoder<S> {
        &mut self.decoder
    }

    /// Decode each sequence `b` of a `[time, batch, class]` probability
    /// tensor over its first `seq_lens[b]` steps. Any failure fails the
    /// whole batch and lists the failing entries.
    pub fn decode_batch(&self, probs: ArrayView3<f32>, seq_lens: &[usize]) -> Result<Vec<Vec<DecodedPath>>> {
        let (_, batch_size, _) = probs.dim();
        if seq_lens.len() != batch_size {
            return Err(CtcError::shape(format!(
                "{} sequence lengths for a batch of {}",
                seq_lens.len(),
                batch_size
            )));
        }
        let results: Vec<Result<Vec<DecodedPath>>> = (0..batch_size)
            .into_par_iter()
            .map(|b| self.decoder.decode(probs.index_axis(Axis(1), b), seq_lens[b]))
            .collect();

        let failed: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_err())
            .map(|(b, _)| b)
            .collect();
        let mut paths = Vec::with_capacity(batch_size);
        let mut first_error = None;
        for result in results {
            match result {
                Ok(p) => paths.push(p),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(source) = first_error {
            tracing::warn!(?failed, error = %source, "batch decode failed");
            return Err(CtcError::DecodeFailed {
                failed,
                source: Box::new(source),
            });
        }
        tracing::debug!(batch_size, "decoded batch");
        Ok(paths)
    }

    /// Decode a batch into caller-owned buffers. Nothing is written unless
    /// every sequence decodes; paths that were not found get length 0 and
    /// score `-inf`.
    pub fn decode(&self, probs: ArrayView3<f32>, seq_lens: &[usize], outputs: DecodeOutputs<'_>) -> Result<()> {
        let DecodeOutputs {
            mut labels,
            mut lengths,
            mut scores,
        } = outputs;
        let (_, batch_size, _) = probs.dim();
        let top_paths = self.decoder.config().top_paths;
        let (label_paths, label_batch, max_label_len) = labels.dim();
        if (label_paths, label_batch) != (top_paths, batch_size) {
            return Err(CtcError::shape(format!(
                "label buffer is {:?}, expected [{}, {}, _]",
                labels.dim(),
                top_paths,
                batch_size
            )));
        }
        for (name, dim) in [("length", lengths.dim()), ("score", scores.dim())] {
            if dim != (top_paths, batch_size) {
                return Err(CtcError::shape(format!(
                    "{} buffer is {:?}, expected [{}, {}]",
                    name, dim, top_paths, batch_size
                )));
            }
        }

        let results = self.decode_batch(probs, seq_lens)?;
        if let Some(longest) = results.iter().flatten().map(|p| p.labels.len()).max() {
            if longest > max_label_len {
                return Err(CtcError::shape(format!(
                    "decoded {} labels, label buffer holds {}",
                    longest, max_label_len
                )));
            }
        }

        for (b, paths) in results.iter().enumerate() {
            for p in 0..top_paths {
                match paths.get(p) {
                    Some(path) => {
                        lengths[[p, b]] = path.labels.len() as i32;
                        scores[[p, b]] = path.score;
                        for (t, &label) in path.labels.iter().enumerate() {
                            labels[[p, b, t]] = label as i32;
                        }
                    }
                    None => {
                        lengths[[p, b]] = 0;
                        scores[[p, b]] = f32::NEG_INFINITY;
                    }
                }
            }
        }
        Ok(())
    }
}
