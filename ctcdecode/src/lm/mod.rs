mod arpa;

pub use arpa::ArpaModel;

pub type WordIndex = u32;

pub const START_TOKEN: &str = "<s>";
pub const END_TOKEN: &str = "</s>";
pub const UNK_TOKEN: &str = "<unk>";

#[derive(thiserror::Error, Debug)]
pub enum LmError {
    #[error("cannot read language model {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("ARPA parse error on line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("ARPA {order}-gram section declares {declared} entries but holds {found}")]
    CountMismatch {
        order: usize,
        declared: usize,
        found: usize,
    },
    #[error("language model has no unigrams")]
    Empty,
}

/// History carried between successive word queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LmState(pub Vec<WordIndex>);

/// An n-gram model queried one word at a time.
pub trait LanguageModel: Send + Sync {
    fn order(&self) -> usize;

    fn vocabulary(&self) -> &[String];

    /// `None` when `word` is out of vocabulary.
    fn word_index(&self, word: &str) -> Option<WordIndex>;

    fn null_context(&self) -> LmState {
        LmState::default()
    }

    /// Log10 probability of `word` following `state`, and the state after it.
    fn base_score(&self, state: &LmState, word: WordIndex) -> (f32, LmState);
}
