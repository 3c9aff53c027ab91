use std::sync::Arc;
use std::time::Instant;

use ndarray::{s, ArrayView3};
use rayon::prelude::*;

use super::output::Output;
use super::search::ctc_beam_search_decoder;
use super::DecoderError;
use crate::alphabet::Alphabet;
use crate::config::DecoderConfig;
use crate::scorer::Scorer;

/// Decodes independent utterances on a fixed-size worker pool.
///
/// Each utterance gets its own decoder; only the alphabet and scorer are
/// shared, read-only. The first failing utterance fails the whole batch.
#[derive(Debug)]
pub struct BatchDecoder {
    pool: rayon::ThreadPool,
    config: DecoderConfig,
    alphabet: Alphabet,
    scorer: Option<Arc<Scorer>>,
}

impl BatchDecoder {
    pub fn new(
        config: &DecoderConfig,
        alphabet: Alphabet,
        scorer: Option<Arc<Scorer>>,
    ) -> Result<Self, DecoderError> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_processes)
            .thread_name(|i| format!("ctc-decode-{i}"))
            .build()?;
        log::debug!("Batch decoder pool started with {} workers", config.num_processes);
        Ok(Self {
            pool,
            config: config.clone(),
            alphabet,
            scorer,
        })
    }

    pub fn num_processes(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// `probs` is `[batch][time][class]`; utterance `i` uses its first
    /// `seq_lengths[i]` frames.
    pub fn decode(
        &self,
        probs: ArrayView3<'_, f64>,
        seq_lengths: &[usize],
    ) -> Result<Vec<Vec<Output>>, DecoderError> {
        let (batch_size, time_dim, _) = probs.dim();
        if seq_lengths.len() != batch_size {
            return Err(DecoderError::BatchLength {
                batch_size,
                seq_lengths: seq_lengths.len(),
            });
        }
        if let Some((index, &length)) = seq_lengths
            .iter()
            .enumerate()
            .find(|&(_, &length)| length > time_dim)
        {
            return Err(DecoderError::SeqLength {
                index,
                length,
                time_dim,
            });
        }

        let started = Instant::now();
        let results = self.pool.install(|| {
            seq_lengths
                .par_iter()
                .enumerate()
                .map(|(i, &length)| {
                    ctc_beam_search_decoder(
                        probs.slice(s![i, ..length, ..]),
                        &self.alphabet,
                        &self.config,
                        self.scorer.clone(),
                    )
                })
                .collect::<Result<Vec<_>, _>>()
        })?;

        log::debug!(
            "Batch of {} utterances decoded in {:?}",
            batch_size,
            started.elapsed()
        );
        Ok(results)
    }
}

pub fn ctc_beam_search_decoder_batch(
    probs: ArrayView3<'_, f64>,
    seq_lengths: &[usize],
    alphabet: &Alphabet,
    config: &DecoderConfig,
    scorer: Option<Arc<Scorer>>,
) -> Result<Vec<Vec<Output>>, DecoderError> {
    BatchDecoder::new(config, alphabet.clone(), scorer)?.decode(probs, seq_lengths)
}
