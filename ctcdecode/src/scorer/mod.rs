//! External scorer: an n-gram language model plus an optional dictionary
//! automaton, weighted by `alpha` (LM weight) and `beta` (insertion bonus).

mod package;

pub use package::{FILE_VERSION, MAGIC};

use std::collections::HashMap;
use std::path::Path;

use crate::alphabet::Alphabet;
use crate::automaton::{AutomatonError, WordAutomaton};
use crate::decoder::{NodeId, PathTrie};
use crate::lm::{ArpaModel, LanguageModel, LmError, END_TOKEN, START_TOKEN, UNK_TOKEN};

/// Natural-log score of an out-of-vocabulary word.
pub const OOV_SCORE: f64 = -1000.0;

#[derive(thiserror::Error, Debug)]
pub enum ScorerError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("bad scorer package magic {0:#010x}")]
    BadMagic(u32),
    #[error("unsupported scorer package version {found}, expected {expected}")]
    BadVersion { found: u32, expected: u32 },
    #[error("scorer package truncated ({0} bytes)")]
    Truncated(usize),
    #[error(transparent)]
    Automaton(#[from] AutomatonError),
    #[error(transparent)]
    Lm(#[from] LmError),
}

pub struct Scorer {
    pub alpha: f64,
    pub beta: f64,
    alphabet: Alphabet,
    char_map: HashMap<Vec<u8>, u32>,
    space_id: Option<u32>,
    lm: Box<dyn LanguageModel>,
    dictionary: Option<WordAutomaton>,
    is_character_based: bool,
    max_order: usize,
}

impl std::fmt::Debug for Scorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scorer")
            .field("alpha", &self.alpha)
            .field("beta", &self.beta)
            .field("max_order", &self.max_order)
            .field("is_character_based", &self.is_character_based)
            .field(
                "dictionary_states",
                &self.dictionary.as_ref().map(WordAutomaton::num_states),
            )
            .finish_non_exhaustive()
    }
}

fn is_meta_token(word: &str) -> bool {
    word == START_TOKEN || word == END_TOKEN || word == UNK_TOKEN
}

impl Scorer {
    /// Scorer whose dictionary is built from the language model's own vocabulary.
    pub fn new(
        alpha: f64,
        beta: f64,
        lm: Box<dyn LanguageModel>,
        alphabet: Alphabet,
    ) -> Result<Self, ScorerError> {
        let mut scorer = Self::bare(alpha, beta, lm, alphabet);
        scorer.is_character_based = scorer
            .lm
            .vocabulary()
            .iter()
            .all(|word| word.chars().count() <= 1 || is_meta_token(word));
        if !scorer.is_character_based {
            let vocabulary = scorer.lm.vocabulary().to_vec();
            scorer.fill_dictionary(vocabulary.iter().map(String::as_str))?;
        }
        scorer.log_loaded();
        Ok(scorer)
    }

    /// Scorer whose mode and dictionary come from a serialized package.
    pub fn with_package(
        alpha: f64,
        beta: f64,
        lm: Box<dyn LanguageModel>,
        alphabet: Alphabet,
        bytes: &[u8],
    ) -> Result<Self, ScorerError> {
        let (is_character_based, dictionary) = package::read(bytes)?;
        let mut scorer = Self::bare(alpha, beta, lm, alphabet);
        scorer.is_character_based = is_character_based;
        scorer.dictionary = (!is_character_based).then_some(dictionary);
        scorer.log_loaded();
        Ok(scorer)
    }

    /// Loads an ARPA model and, when given, a scorer package.
    pub fn from_files(
        alpha: f64,
        beta: f64,
        lm_path: impl AsRef<Path>,
        package_path: Option<&Path>,
        alphabet: Alphabet,
    ) -> Result<Self, ScorerError> {
        let lm = Box::new(ArpaModel::read(lm_path)?);
        match package_path {
            Some(path) => {
                let bytes = std::fs::read(path).map_err(|source| ScorerError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                Self::with_package(alpha, beta, lm, alphabet, &bytes)
            }
            None => Self::new(alpha, beta, lm, alphabet),
        }
    }

    fn bare(alpha: f64, beta: f64, lm: Box<dyn LanguageModel>, alphabet: Alphabet) -> Self {
        let char_map = (0..alphabet.size() as u32)
            .filter_map(|label| {
                alphabet
                    .token_bytes(label)
                    .map(|bytes| (bytes.to_vec(), label + 1))
            })
            .collect();
        Self {
            alpha,
            beta,
            space_id: alphabet.space_label(),
            char_map,
            max_order: lm.order(),
            lm,
            dictionary: None,
            is_character_based: false,
            alphabet,
        }
    }

    fn log_loaded(&self) {
        log::info!(
            "External scorer ready: order {}, {} words, {} mode, dictionary {}",
            self.max_order,
            self.lm.vocabulary().len(),
            if self.is_character_based { "character" } else { "word" },
            match &self.dictionary {
                Some(d) => format!("{} states", d.num_states()),
                None => "none".to_string(),
            }
        );
    }

    pub fn reset_params(&mut self, alpha: f64, beta: f64) {
        self.alpha = alpha;
        self.beta = beta;
    }

    pub fn is_character_based(&self) -> bool {
        self.is_character_based
    }

    pub fn set_character_based(&mut self, is_character_based: bool) {
        self.is_character_based = is_character_based;
    }

    pub fn max_order(&self) -> usize {
        self.max_order
    }

    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    /// Dictionary used to gate word-mode extensions; always `None` in character mode.
    pub fn dictionary(&self) -> Option<&WordAutomaton> {
        if self.is_character_based {
            None
        } else {
            self.dictionary.as_ref()
        }
    }

    /// Rebuilds the dictionary from `words`. In word mode every word is
    /// followed by the space label so that completed words end in an
    /// accepting state.
    pub fn fill_dictionary<'a, I>(&mut self, words: I) -> Result<(), ScorerError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let separator = if self.is_character_based {
            None
        } else {
            self.space_id.map(|id| id + 1)
        };
        let mut skipped = 0usize;
        let mut sequences = Vec::new();
        for word in words {
            if is_meta_token(word) {
                continue;
            }
            let labels: Option<Vec<u32>> = self
                .alphabet
                .split_units(word)
                .iter()
                .map(|unit| self.char_map.get(&**unit).copied())
                .chain(separator.map(Some))
                .collect();
            match labels {
                Some(labels) => sequences.push(labels),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            log::warn!("{skipped} vocabulary words contain units missing from the alphabet; skipped");
        }
        self.dictionary = Some(WordAutomaton::build(&sequences)?);
        Ok(())
    }

    pub fn serialize_package(&self) -> Result<Vec<u8>, ScorerError> {
        let dictionary = match &self.dictionary {
            Some(d) => d.clone(),
            None => WordAutomaton::build(std::iter::empty::<Vec<u32>>())?,
        };
        Ok(package::write(self.is_character_based, &dictionary))
    }

    pub fn save_package(&self, path: impl AsRef<Path>) -> Result<(), ScorerError> {
        let path = path.as_ref();
        let bytes = self.serialize_package()?;
        std::fs::write(path, &bytes).map_err(|source| ScorerError::Io {
            path: path.display().to_string(),
            source,
        })?;
        log::info!("Saved scorer package to {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }

    /// Natural-log probability of the last word given the preceding ones.
    pub fn get_log_cond_prob<S: AsRef<str>>(&self, words: &[S]) -> f64 {
        let mut state = self.lm.null_context();
        let mut cond_prob = 0.0f32;
        for word in words {
            let Some(index) = self.lm.word_index(word.as_ref()) else {
                return OOV_SCORE;
            };
            let (score, next) = self.lm.base_score(&state, index);
            cond_prob = score;
            state = next;
        }
        cond_prob as f64 / std::f64::consts::LOG10_E
    }

    /// Natural-log probability of a whole sentence, padded with start and end tokens.
    pub fn get_sent_log_prob<S: AsRef<str>>(&self, words: &[S]) -> f64 {
        let order = self.max_order.max(1);
        let mut sentence: Vec<&str> = Vec::with_capacity(words.len() + order + 1);
        let pad = if words.is_empty() { order } else { order - 1 };
        sentence.extend(std::iter::repeat(START_TOKEN).take(pad));
        sentence.extend(words.iter().map(|word| word.as_ref()));
        sentence.push(END_TOKEN);

        sentence
            .windows(order)
            .map(|ngram| self.get_log_cond_prob(ngram))
            .sum()
    }

    /// Splits decoded labels into LM words: codepoints in character mode,
    /// space-separated groups in word mode.
    pub fn split_labels(&self, labels: &[u32]) -> Vec<String> {
        if labels.is_empty() {
            return Vec::new();
        }
        if self.is_character_based {
            return self
                .alphabet
                .decode(labels)
                .chars()
                .map(String::from)
                .collect();
        }
        labels
            .split(|&label| Some(label) == self.space_id)
            .filter(|group| !group.is_empty())
            .map(|group| self.alphabet.decode(group))
            .collect()
    }

    /// Reconstructs up to `max_order` trailing words (or characters) ending at
    /// `node`, oldest first, padded with start tokens at the trie root.
    pub fn make_ngram(&self, trie: &PathTrie, node: NodeId) -> Vec<String> {
        let order = self.max_order;
        let mut ngram = Vec::with_capacity(order);
        let mut tokens = Vec::new();
        let mut timesteps = Vec::new();
        let mut current = node;

        while ngram.len() < order {
            if trie.node(current).is_root() {
                ngram.resize(order, START_TOKEN.to_string());
                break;
            }
            tokens.clear();
            timesteps.clear();
            let (boundary, next) = if self.is_character_based {
                let steps = self.unit_len(trie, current);
                let boundary = trie.get_path_vec(current, &mut tokens, &mut timesteps, None, steps);
                (boundary, Some(boundary))
            } else {
                let boundary =
                    trie.get_path_vec(current, &mut tokens, &mut timesteps, self.space_id, usize::MAX);
                (boundary, trie.node(boundary).parent())
            };
            if !tokens.is_empty() {
                ngram.push(self.alphabet.decode(&tokens));
            }
            match next {
                Some(next) if !trie.node(boundary).is_root() => current = next,
                _ => {
                    ngram.resize(order, START_TOKEN.to_string());
                    break;
                }
            }
        }
        ngram.reverse();
        ngram
    }

    /// The node whose trailing word or character should be scored after
    /// extending `prefix` with `label` into `child`, if this is a scoring point.
    pub fn scoring_node(
        &self,
        trie: &PathTrie,
        prefix: NodeId,
        child: NodeId,
        label: u32,
    ) -> Option<NodeId> {
        if self.is_character_based {
            self.completes_unit(trie, child).then_some(child)
        } else if Some(label) == self.space_id {
            Some(prefix)
        } else {
            None
        }
    }

    /// `alpha * log P(ngram) + beta`.
    pub fn lm_bonus<S: AsRef<str>>(&self, ngram: &[S]) -> f64 {
        self.alpha * self.get_log_cond_prob(ngram) + self.beta
    }

    fn unit_len(&self, trie: &PathTrie, node: NodeId) -> usize {
        if !self.alphabet.is_raw_bytes() {
            return 1;
        }
        let mut steps = 0;
        let mut current = node;
        while let Some(label) = trie.node(current).character {
            steps += 1;
            if !is_continuation_byte(label) {
                break;
            }
            match trie.node(current).parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        steps.max(1)
    }

    fn completes_unit(&self, trie: &PathTrie, node: NodeId) -> bool {
        if !self.alphabet.is_raw_bytes() {
            return true;
        }
        let steps = self.unit_len(trie, node);
        let mut lead = node;
        for _ in 1..steps {
            if let Some(parent) = trie.node(lead).parent() {
                lead = parent;
            }
        }
        match trie.node(lead).character {
            Some(label) if !is_continuation_byte(label) => utf8_width(label_byte(label)) == steps,
            _ => false,
        }
    }
}

fn label_byte(label: u32) -> u8 {
    (label + 1) as u8
}

fn is_continuation_byte(label: u32) -> bool {
    label_byte(label) & 0xC0 == 0x80
}

fn utf8_width(lead: u8) -> usize {
    match lead {
        b if b & 0x80 == 0 => 1,
        b if b & 0xE0 == 0xC0 => 2,
        b if b & 0xF0 == 0xE0 => 3,
        b if b & 0xF8 == 0xF0 => 4,
        _ => 1,
    }
}
