use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use ndarray::{s, Array2, Array3};
use serde::Serialize;

use ctcdecode_lib::alphabet::AlphabetError;
use ctcdecode_lib::config::ConfigError;
use ctcdecode_lib::decoder::DecoderError;
use ctcdecode_lib::lm::ArpaModel;
use ctcdecode_lib::scorer::ScorerError;
use ctcdecode_lib::{Alphabet, BatchDecoder, DecoderConfig, Scorer};

#[derive(thiserror::Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Lib(#[from] ctcdecode_lib::Error),
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Usage(String),
}

impl CliError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Lib(e) => e.user_message(),
            Self::Io { .. } => "An input file could not be read. Check the path and permissions.",
            Self::Json(_) => "The probabilities file is not valid JSON.",
            Self::Usage(_) => "The command-line arguments are inconsistent.",
        }
    }
}

impl From<AlphabetError> for CliError {
    fn from(e: AlphabetError) -> Self {
        Self::Lib(e.into())
    }
}

impl From<ScorerError> for CliError {
    fn from(e: ScorerError) -> Self {
        Self::Lib(e.into())
    }
}

impl From<DecoderError> for CliError {
    fn from(e: DecoderError) -> Self {
        Self::Lib(e.into())
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self::Lib(e.into())
    }
}

impl From<ndarray::ShapeError> for CliError {
    fn from(e: ndarray::ShapeError) -> Self {
        DecoderError::from(e).into()
    }
}

#[derive(Args)]
pub struct DecodeArgs {
    /// Alphabet file, one token per line.
    #[arg(long, required_unless_present = "raw_bytes")]
    alphabet: Option<PathBuf>,

    /// Use the 255-label byte alphabet instead of an alphabet file.
    #[arg(long)]
    raw_bytes: bool,

    /// JSON list of utterances, each a `[time][class]` probability matrix.
    #[arg(long)]
    probs: PathBuf,

    /// ARPA language model for the external scorer.
    #[arg(long)]
    lm: Option<PathBuf>,

    /// Scorer package with a prebuilt dictionary; requires --lm.
    #[arg(long, requires = "lm")]
    package: Option<PathBuf>,

    /// JSON decoder config; defaults plus CTCDECODE_* environment overrides otherwise.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
pub struct PackageArgs {
    /// Alphabet file, one token per line.
    #[arg(long, required_unless_present = "raw_bytes")]
    alphabet: Option<PathBuf>,

    /// Use the 255-label byte alphabet instead of an alphabet file.
    #[arg(long)]
    raw_bytes: bool,

    /// ARPA language model.
    #[arg(long)]
    lm: PathBuf,

    /// Whitespace-separated vocabulary used to build the dictionary.
    #[arg(long)]
    vocab: PathBuf,

    /// Where to write the package.
    #[arg(long)]
    output: PathBuf,

    /// Override the detected scoring mode.
    #[arg(long)]
    character_based: Option<bool>,
}

#[derive(Serialize)]
struct DecodedPath {
    text: String,
    confidence: f64,
    tokens: Vec<u32>,
    timesteps: Vec<usize>,
}

fn load_alphabet(path: Option<&Path>, raw_bytes: bool) -> Result<Alphabet, CliError> {
    match (path, raw_bytes) {
        (_, true) => Ok(Alphabet::raw_bytes()),
        (Some(path), false) => Ok(Alphabet::from_config_file(path)?),
        (None, false) => Err(CliError::Usage(
            "either --alphabet or --raw-bytes is required".to_string(),
        )),
    }
}

fn read_file(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Packs ragged utterances into one zero-padded `[batch][time][class]` array.
fn pack_batch(utterances: &[Vec<Vec<f64>>]) -> Result<(Array3<f64>, Vec<usize>), CliError> {
    let class_dim = utterances
        .iter()
        .flat_map(|u| u.first())
        .map(Vec::len)
        .next()
        .ok_or_else(|| CliError::Usage("no probabilities to decode".to_string()))?;
    let max_time = utterances.iter().map(Vec::len).max().unwrap_or(0);

    let mut batch = Array3::<f64>::zeros((utterances.len(), max_time, class_dim));
    let mut seq_lengths = Vec::with_capacity(utterances.len());
    for (i, rows) in utterances.iter().enumerate() {
        if let Some(bad) = rows.iter().find(|row| row.len() != class_dim) {
            return Err(CliError::Usage(format!(
                "utterance {i} has a row of {} classes, expected {class_dim}",
                bad.len()
            )));
        }
        let utterance = Array2::from_shape_vec((rows.len(), class_dim), rows.concat())?;
        batch.slice_mut(s![i, ..rows.len(), ..]).assign(&utterance);
        seq_lengths.push(rows.len());
    }
    Ok((batch, seq_lengths))
}

pub fn decode(args: DecodeArgs) -> Result<(), CliError> {
    let alphabet = load_alphabet(args.alphabet.as_deref(), args.raw_bytes)?;
    let config = match &args.config {
        Some(path) => DecoderConfig::from_json_file(path)?,
        None => DecoderConfig::from_env(),
    };

    let scorer = match &args.lm {
        Some(lm) => Some(Arc::new(Scorer::from_files(
            config.lm_alpha,
            config.lm_beta,
            lm,
            args.package.as_deref(),
            alphabet.clone(),
        )?)),
        None => None,
    };

    let utterances: Vec<Vec<Vec<f64>>> = serde_json::from_str(&read_file(&args.probs)?)?;
    let (batch, seq_lengths) = pack_batch(&utterances)?;
    log::info!(
        "Decoding {} utterances (beam {}, {} workers, scorer: {})",
        seq_lengths.len(),
        config.beam_size,
        config.num_processes,
        scorer.is_some()
    );

    let decoder = BatchDecoder::new(&config, alphabet.clone(), scorer)?;
    let results: Vec<Vec<DecodedPath>> = decoder
        .decode(batch.view(), &seq_lengths)?
        .into_iter()
        .map(|outputs| {
            outputs
                .into_iter()
                .map(|output| DecodedPath {
                    text: output.text(&alphabet),
                    confidence: output.confidence,
                    tokens: output.tokens,
                    timesteps: output.timesteps,
                })
                .collect()
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

pub fn package(args: PackageArgs) -> Result<(), CliError> {
    let alphabet = load_alphabet(args.alphabet.as_deref(), args.raw_bytes)?;
    let config = DecoderConfig::from_env();
    let lm = ArpaModel::read(&args.lm).map_err(ScorerError::from)?;
    let mut scorer = Scorer::new(config.lm_alpha, config.lm_beta, Box::new(lm), alphabet)?;

    if let Some(character_based) = args.character_based {
        if character_based != scorer.is_character_based() {
            log::info!("Overriding detected mode: character_based = {character_based}");
        }
        scorer.set_character_based(character_based);
    }

    let vocab = read_file(&args.vocab)?;
    scorer.fill_dictionary(vocab.split_whitespace())?;
    scorer.save_package(&args.output)?;
    Ok(())
}
