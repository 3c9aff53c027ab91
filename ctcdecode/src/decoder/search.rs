use std::sync::Arc;
use std::time::Instant;

use ndarray::ArrayView2;

use super::output::Output;
use super::path_trie::{log_sum_exp, NodeId, PathTrie, TrieNode};
use super::state::{get_pruned_log_probs, prefix_compare, DecoderState};
use super::DecoderError;
use crate::alphabet::Alphabet;
use crate::config::DecoderConfig;
use crate::scorer::Scorer;

/// Streaming CTC prefix beam search over chunks of per-frame probabilities.
#[derive(Debug, Clone)]
pub struct BeamSearchDecoder {
    state: DecoderState,
    class_dim: usize,
    config: DecoderConfig,
    scorer: Option<Arc<Scorer>>,
}

impl BeamSearchDecoder {
    pub fn new(
        alphabet: &Alphabet,
        class_dim: usize,
        config: &DecoderConfig,
        scorer: Option<Arc<Scorer>>,
    ) -> Result<Self, DecoderError> {
        config.validate()?;
        let expected = alphabet.size() + 1;
        if class_dim != expected {
            log::error!(
                "class_dim {} does not match alphabet size {} + blank",
                class_dim,
                alphabet.size()
            );
            return Err(DecoderError::ClassDimMismatch {
                expected,
                actual: class_dim,
            });
        }
        if let Some(scorer) = scorer.as_deref().filter(|s| s.alphabet() != alphabet) {
            log::error!("scorer alphabet does not match the decoder alphabet");
            return Err(DecoderError::ScorerAlphabetMismatch {
                decoder: alphabet.size(),
                scorer: scorer.alphabet().size(),
            });
        }

        let dictionary_start = scorer
            .as_deref()
            .and_then(Scorer::dictionary)
            .map(|d| d.start_state());
        let state = DecoderState::new(
            alphabet.size() as u32,
            alphabet.space_label(),
            dictionary_start,
        );

        Ok(Self {
            state,
            class_dim,
            config: config.clone(),
            scorer,
        })
    }

    pub fn state(&self) -> &DecoderState {
        &self.state
    }

    pub fn trie(&self) -> &PathTrie {
        &self.state.trie
    }

    pub fn time_step(&self) -> usize {
        self.state.time_step
    }

    /// Live prefixes currently in the beam.
    pub fn beam(&self) -> impl Iterator<Item = &TrieNode> + '_ {
        self.state
            .prefixes
            .iter()
            .map(move |&id| self.state.trie.node(id))
    }

    /// Advances the search by every row of `probs` (`[time][class]`, linear
    /// probabilities).
    pub fn next(&mut self, probs: ArrayView2<'_, f64>) -> Result<(), DecoderError> {
        let (time_dim, class_dim) = probs.dim();
        if class_dim != self.class_dim {
            return Err(DecoderError::ClassDimMismatch {
                expected: self.class_dim,
                actual: class_dim,
            });
        }

        let started = Instant::now();
        let beam_size = self.config.beam_size;
        let scorer = self.scorer.as_deref();
        let dictionary = scorer.and_then(Scorer::dictionary);
        let state = &mut self.state;
        let blank_id = state.blank_id;

        for row in probs.outer_iter() {
            let t = state.time_step;

            // The cutoff uses scores from the previous timestep.
            let mut min_cutoff = f32::NEG_INFINITY;
            let mut full_beam = false;
            if let Some(scorer) = scorer {
                let num_prefixes = state.prefixes.len().min(beam_size);
                if num_prefixes > 0 {
                    let trie = &state.trie;
                    state
                        .prefixes
                        .sort_by(|&a, &b| prefix_compare(trie, a, b));
                    let last = trie.node(state.prefixes[num_prefixes - 1]).score;
                    min_cutoff = last + row[blank_id as usize].ln() as f32
                        - scorer.beta.max(0.0) as f32;
                    full_beam = num_prefixes == beam_size;
                }
            }

            let candidates =
                get_pruned_log_probs(row, self.config.cutoff_prob, self.config.cutoff_top_n);

            for &(c, log_prob_c) in &candidates {
                for i in 0..state.prefixes.len().min(beam_size) {
                    let prefix = state.prefixes[i];
                    let node = state.trie.node(prefix);
                    let (p_score, p_char, p_b_prev, p_nb_prev) = (
                        node.score,
                        node.character,
                        node.log_prob_b_prev,
                        node.log_prob_nb_prev,
                    );
                    if full_beam && log_prob_c + p_score < min_cutoff {
                        break;
                    }

                    if c == blank_id {
                        let node = state.trie.node_mut(prefix);
                        node.log_prob_b_cur = log_sum_exp(node.log_prob_b_cur, log_prob_c + p_score);
                        continue;
                    }

                    let repeat = p_char == Some(c);
                    if repeat {
                        let node = state.trie.node_mut(prefix);
                        node.log_prob_nb_cur =
                            log_sum_exp(node.log_prob_nb_cur, log_prob_c + p_nb_prev);
                    }

                    let Some(child) =
                        state
                            .trie
                            .get_path_trie(prefix, c, t, log_prob_c, true, dictionary)
                    else {
                        continue;
                    };

                    let mut log_p = if repeat {
                        log_prob_c + p_b_prev
                    } else {
                        log_prob_c + p_score
                    };

                    if let Some(scorer) = scorer {
                        if let Some(scored) = scorer.scoring_node(&state.trie, prefix, child, c) {
                            let ngram = scorer.make_ngram(&state.trie, scored);
                            log_p += scorer.lm_bonus(&ngram) as f32;
                        }
                    }

                    let child = state.trie.node_mut(child);
                    child.log_prob_nb_cur = log_sum_exp(child.log_prob_nb_cur, log_p);
                }
            }

            state.prefixes.clear();
            state.trie.iterate_to_vec(&mut state.prefixes);

            if state.prefixes.len() > beam_size {
                let trie = &state.trie;
                state
                    .prefixes
                    .select_nth_unstable_by(beam_size, |&a, &b| prefix_compare(trie, a, b));
                for pruned in state.prefixes.split_off(beam_size) {
                    state.trie.remove(pruned);
                }
            }

            state.time_step += 1;
        }

        log::debug!(
            "next completed in {:?} (frames: {}, beam: {}, trie nodes: {})",
            started.elapsed(),
            time_dim,
            state.prefixes.len(),
            state.trie.len()
        );
        Ok(())
    }

    /// Best `config.top_paths` hypotheses so far.
    pub fn decode(&self) -> Vec<Output> {
        self.decode_top(self.config.top_paths)
    }

    /// Best `top_paths` hypotheses so far, best first. Leaves the search
    /// state untouched so decoding can continue with further chunks.
    pub fn decode_top(&self, top_paths: usize) -> Vec<Output> {
        let trie = &self.state.trie;
        let scorer = self.scorer.as_deref();

        let mut scored: Vec<(NodeId, f32)> = self
            .state
            .prefixes
            .iter()
            .take(self.config.beam_size)
            .map(|&id| (id, trie.node(id).score))
            .collect();

        // Trailing partial words have not been scored yet.
        if let Some(scorer) = scorer.filter(|s| !s.is_character_based()) {
            for (id, score) in &mut scored {
                let node = trie.node(*id);
                if !node.is_root() && node.character != self.state.space_id {
                    let ngram = scorer.make_ngram(trie, *id);
                    *score += scorer.lm_bonus(&ngram) as f32;
                }
            }
        }

        scored.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| trie.node(a.0).character.cmp(&trie.node(b.0).character))
        });
        scored.truncate(top_paths);

        scored
            .into_iter()
            .map(|(id, _)| {
                let mut tokens = Vec::new();
                let mut timesteps = Vec::new();
                trie.get_path_vec(id, &mut tokens, &mut timesteps, None, usize::MAX);

                let mut approx_ctc = trie.node(id).score as f64;
                if let Some(scorer) = scorer {
                    let words = scorer.split_labels(&tokens);
                    approx_ctc -= tokens.len() as f64 * scorer.beta;
                    approx_ctc -= scorer.get_sent_log_prob(&words) * scorer.alpha;
                }

                Output {
                    confidence: approx_ctc,
                    tokens,
                    timesteps,
                }
            })
            .collect()
    }
}

/// Decodes one complete utterance.
pub fn ctc_beam_search_decoder(
    probs: ArrayView2<'_, f64>,
    alphabet: &Alphabet,
    config: &DecoderConfig,
    scorer: Option<Arc<Scorer>>,
) -> Result<Vec<Output>, DecoderError> {
    let mut decoder = BeamSearchDecoder::new(alphabet, probs.ncols(), config, scorer)?;
    decoder.next(probs)?;
    Ok(decoder.decode())
}
