pub mod alphabet;
pub mod automaton;
pub mod config;
pub mod decoder;
pub mod error;
pub mod lm;
pub mod scorer;

pub use alphabet::Alphabet;
pub use config::DecoderConfig;
pub use decoder::{BatchDecoder, BeamSearchDecoder, Output};
pub use error::Error;
pub use scorer::Scorer;
