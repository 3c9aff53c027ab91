use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Decoding hyperparameters, built once and handed to the decoder by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub beam_size: usize,
    pub cutoff_prob: f64,
    pub cutoff_top_n: usize,
    pub lm_alpha: f64,
    pub lm_beta: f64,
    pub top_paths: usize,
    pub num_processes: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            beam_size: 500,
            cutoff_prob: 1.0,
            cutoff_top_n: 40,
            lm_alpha: 0.931289039105002,
            lm_beta: 1.1834137581510284,
            top_paths: 1,
            num_processes: num_cpus::get_physical().max(1),
        }
    }
}

impl DecoderConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides("CTCDECODE_");
        config
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };

        if self.beam_size == 0 {
            return invalid("beam_size", "must be at least 1");
        }
        if self.top_paths == 0 {
            return invalid("top_paths", "must be at least 1");
        }
        if self.num_processes == 0 {
            return invalid("num_processes", "must be at least 1");
        }
        if self.cutoff_top_n == 0 {
            return invalid("cutoff_top_n", "must be at least 1");
        }
        if !(self.cutoff_prob > 0.0 && self.cutoff_prob <= 1.0) {
            return invalid("cutoff_prob", "must be in (0, 1]");
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self, prefix: &str) {
        let parse_env = |suffix: &str| std::env::var(format!("{prefix}{suffix}")).ok();
        let apply_f64 = |suffix: &str, target: &mut f64| {
            if let Some(v) = parse_env(suffix).and_then(|s| s.trim().parse().ok()) {
                *target = v;
            }
        };
        let apply_usize = |suffix: &str, target: &mut usize| {
            if let Some(v) = parse_env(suffix).and_then(|s| s.trim().parse::<usize>().ok()) {
                *target = v.max(1);
            }
        };

        apply_f64("CUTOFF_PROB", &mut self.cutoff_prob);
        apply_f64("LM_ALPHA", &mut self.lm_alpha);
        apply_f64("LM_BETA", &mut self.lm_beta);

        apply_usize("BEAM_SIZE", &mut self.beam_size);
        apply_usize("CUTOFF_TOP_N", &mut self.cutoff_top_n);
        apply_usize("TOP_PATHS", &mut self.top_paths);
        apply_usize("NUM_PROCESSES", &mut self.num_processes);
    }
}
