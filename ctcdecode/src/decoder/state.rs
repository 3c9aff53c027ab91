use std::cmp::Ordering;

use ndarray::ArrayView1;

use super::path_trie::{NodeId, PathTrie};
use crate::automaton::AutomatonState;

/// The trie plus the current beam of live prefixes.
#[derive(Debug, Clone)]
pub struct DecoderState {
    pub(crate) time_step: usize,
    pub(crate) blank_id: u32,
    pub(crate) space_id: Option<u32>,
    pub(crate) trie: PathTrie,
    pub(crate) prefixes: Vec<NodeId>,
}

impl DecoderState {
    pub fn new(
        blank_id: u32,
        space_id: Option<u32>,
        dictionary_start: Option<AutomatonState>,
    ) -> Self {
        let mut trie = PathTrie::new();
        let root = trie.root();
        trie.node_mut(root).dictionary_state = dictionary_start;
        Self {
            time_step: 0,
            blank_id,
            space_id,
            trie,
            prefixes: vec![root],
        }
    }

    pub fn time_step(&self) -> usize {
        self.time_step
    }

    pub fn blank_id(&self) -> u32 {
        self.blank_id
    }

    pub fn space_id(&self) -> Option<u32> {
        self.space_id
    }

    pub fn trie(&self) -> &PathTrie {
        &self.trie
    }

    pub fn prefixes(&self) -> &[NodeId] {
        &self.prefixes
    }
}

/// Higher score first; ties broken by ascending label, root first.
pub fn prefix_compare(trie: &PathTrie, a: NodeId, b: NodeId) -> Ordering {
    let (x, y) = (trie.node(a), trie.node(b));
    y.score
        .total_cmp(&x.score)
        .then_with(|| x.character.cmp(&y.character))
}

/// Candidate labels for one timestep with their log probabilities.
///
/// Keeps the `cutoff_top_n` most probable labels, or fewer once their
/// cumulative probability reaches `cutoff_prob`.
pub fn get_pruned_log_probs(
    probs: ArrayView1<'_, f64>,
    cutoff_prob: f64,
    cutoff_top_n: usize,
) -> Vec<(u32, f32)> {
    let mut candidates: Vec<(u32, f64)> = probs
        .iter()
        .enumerate()
        .map(|(i, &p)| (i as u32, p))
        .collect();

    if cutoff_prob < 1.0 || cutoff_top_n < candidates.len() {
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
        let mut cutoff_len = cutoff_top_n.min(candidates.len());
        if cutoff_prob < 1.0 {
            let mut cum_prob = 0.0;
            for (i, &(_, p)) in candidates.iter().take(cutoff_len).enumerate() {
                cum_prob += p;
                if cum_prob >= cutoff_prob {
                    cutoff_len = i + 1;
                    break;
                }
            }
        }
        candidates.truncate(cutoff_len);
    }

    candidates
        .into_iter()
        .map(|(label, p)| (label, (p + f32::MIN_POSITIVE as f64).ln() as f32))
        .collect()
}
