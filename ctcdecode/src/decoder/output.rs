use serde::{Deserialize, Serialize};

use crate::alphabet::Alphabet;

/// One decoded hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    /// Approximate CTC log probability: the prefix score with the language
    /// model contribution removed.
    pub confidence: f64,
    pub tokens: Vec<u32>,
    pub timesteps: Vec<usize>,
}

impl Output {
    pub fn approx_ctc(&self) -> f64 {
        self.confidence
    }

    pub fn text(&self, alphabet: &Alphabet) -> String {
        alphabet.decode(&self.tokens)
    }
}
