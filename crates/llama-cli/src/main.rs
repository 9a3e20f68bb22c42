use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use llama_cli::{generate, init_tracing, write_demo_model, GenerateArgs};

/// llama-stream: streaming single-model generation
#[derive(Parser)]
#[command(name = "llama-stream")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Stream a reply to `--text` from a model file.
    Generate {
        /// Directory holding model files.
        #[arg(long)]
        models_dir: PathBuf,

        /// Model file name inside `--models-dir`.
        #[arg(short, long)]
        model: String,

        /// Input text.
        #[arg(short, long)]
        text: String,

        /// JSON engine configuration.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the maximum number of generated tokens.
        #[arg(long)]
        max_tokens: Option<usize>,
    },
    /// Write the small deterministic demo model.
    DemoModel {
        /// Output path.
        #[arg(short, long)]
        out: PathBuf,

        /// Weight seed.
        #[arg(short, long, default_value_t = 7)]
        seed: u64,
    },
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Generate {
            models_dir,
            model,
            text,
            config,
            max_tokens,
        } => {
            let args = GenerateArgs {
                models_dir,
                model,
                text,
                config,
                max_tokens,
            };
            generate(&args, io::stdout().lock()).and_then(|(report, mut out)| {
                writeln!(out)?;
                tracing::info!(
                    generated = report.generated_tokens,
                    stop = %report.stop,
                    "done"
                );
                Ok(())
            })
        }
        Command::DemoModel { out, seed } => write_demo_model(&out, seed).map(|()| {
            eprintln!("wrote {}", out.display());
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
