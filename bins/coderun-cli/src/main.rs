mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "coderun")]
#[command(about = "coderun - Run source snippets with locally installed toolchains", long_about = None)]
struct Cli {
    /// JSON engine configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for temporary sources and compiled binaries
    #[arg(long, global = true)]
    scratch_dir: Option<PathBuf>,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value = "false")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List toolchains that resolve in your login shell
    Detect {
        /// Print the detection result as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// List every supported language and the toolchain it needs
    Languages,

    /// Run a snippet and print its output
    Run {
        /// Language id (e.g., python, java, cpp)
        #[arg(short, long)]
        lang: String,

        /// Source file (reads stdin when omitted)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Wall-clock limit for compile and run, in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        /// Print the full execution result as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Remove the scratch directory if it is idle and empty
    Sweep,
}

fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // Logs go to stderr; stdout belongs to the snippet's output.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_line_number(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config = commands::load_config(cli.config.as_deref(), cli.scratch_dir)?;

    match cli.command {
        Commands::Detect { json } => {
            commands::detect(&config, json).await?;
        }
        Commands::Languages => {
            commands::list_languages();
        }
        Commands::Run {
            lang,
            file,
            timeout_ms,
            json,
        } => {
            let success = commands::run_snippet(config, &lang, file.as_deref(), timeout_ms, json).await?;
            if !success {
                std::process::exit(1);
            }
        }
        Commands::Sweep => {
            commands::sweep(&config);
        }
    }

    Ok(())
}
