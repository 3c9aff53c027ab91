use crate::config::ConfigError;

pub(crate) mod batch;
pub(crate) mod output;
pub(crate) mod path_trie;
pub(crate) mod search;
pub(crate) mod state;

pub use batch::{ctc_beam_search_decoder_batch, BatchDecoder};
pub use output::Output;
pub use path_trie::{log_sum_exp, NodeId, PathTrie, TrieNode, LOG_ZERO};
pub use search::{ctc_beam_search_decoder, BeamSearchDecoder};
pub use state::{get_pruned_log_probs, prefix_compare, DecoderState};

#[derive(thiserror::Error, Debug)]
pub enum DecoderError {
    #[error("class dimension {actual} does not match alphabet size + blank ({expected})")]
    ClassDimMismatch { expected: usize, actual: usize },
    #[error("scorer alphabet ({scorer} labels) differs from the decoder alphabet ({decoder} labels)")]
    ScorerAlphabetMismatch { decoder: usize, scorer: usize },
    #[error("invalid decoder config: {0}")]
    Config(#[from] ConfigError),
    #[error("batch holds {batch_size} utterances but {seq_lengths} sequence lengths were given")]
    BatchLength {
        batch_size: usize,
        seq_lengths: usize,
    },
    #[error("sequence length {length} of utterance {index} exceeds {time_dim} frames")]
    SeqLength {
        index: usize,
        length: usize,
        time_dim: usize,
    },
    #[error("worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
    #[error("ndarray shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}
