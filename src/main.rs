use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;

/// CTC beam search decoding with an optional n-gram scorer.
#[derive(Parser)]
#[command(name = "ctcdecode", version)]
struct Cli {
    /// Enable debug-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode acoustic model probabilities into ranked transcripts.
    Decode(commands::DecodeArgs),

    /// Build a scorer package from an ARPA model and a vocabulary.
    Package(commands::PackageArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let result = match cli.command {
        Commands::Decode(args) => commands::decode(args),
        Commands::Package(args) => commands::package(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.user_message());
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
