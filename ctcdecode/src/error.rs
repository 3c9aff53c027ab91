use thiserror::Error;

use crate::alphabet::AlphabetError;
use crate::automaton::AutomatonError;
use crate::config::ConfigError;
use crate::decoder::DecoderError;
use crate::lm::LmError;
use crate::scorer::ScorerError;

/// Unified crate errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Alphabet: {0}")]
    Alphabet(#[from] AlphabetError),

    #[error("Automaton: {0}")]
    Automaton(#[from] AutomatonError),

    #[error("Language model: {0}")]
    Lm(#[from] LmError),

    #[error("Scorer: {0}")]
    Scorer(#[from] ScorerError),

    #[error("Decoder: {0}")]
    Decoder(#[from] DecoderError),

    #[error("Config: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Alphabet(AlphabetError::Io { .. }) => {
                "The alphabet file could not be read. Check the path and permissions."
            }
            Self::Alphabet(_) => "The alphabet is malformed or truncated.",
            Self::Automaton(_) => "The dictionary automaton could not be built or loaded.",
            Self::Lm(_) => "The language model file could not be read or parsed.",
            Self::Scorer(ScorerError::BadMagic(_)) | Self::Scorer(ScorerError::BadVersion { .. }) => {
                "The scorer package is not a valid package for this decoder. Regenerate it."
            }
            Self::Scorer(_) => "The external scorer could not be loaded.",
            Self::Decoder(DecoderError::ScorerAlphabetMismatch { .. }) => {
                "The scorer was built for a different alphabet. Load it with the decoder's alphabet."
            }
            Self::Decoder(DecoderError::ClassDimMismatch { .. }) => {
                "The probability matrix does not match the alphabet. Check that the model and alphabet belong together."
            }
            Self::Decoder(_) => "Decoding failed. Check the input probabilities and decoder settings.",
            Self::Config(_) => "The decoder configuration is invalid.",
        }
    }
}

impl serde::Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
