use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};

use volley::config::RunSpec;
use volley::engine::RunConfig;
use volley::Engine;

#[derive(Parser)]
#[command(name = "volley", version, about = "Staged-load HTTP benchmarking engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a run specification and evaluate its thresholds.
    Run {
        /// Path to a YAML or JSON run specification.
        config: PathBuf,
        /// Print the final report as JSON instead of the console summary.
        #[arg(long)]
        json: bool,
        /// Also write the final report as JSON to this path.
        #[arg(long, value_name = "PATH")]
        export_json: Option<PathBuf>,
        /// Suppress the live progress line.
        #[arg(long)]
        quiet: bool,
    },
}

fn load_config(path: &Path) -> anyhow::Result<RunConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let spec: RunSpec = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid JSON in {}", path.display()))?
    } else {
        serde_yaml::from_str(&raw)
            .with_context(|| format!("invalid YAML in {}", path.display()))?
    };
    Ok(spec.into_config()?)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            config,
            json,
            export_json,
            quiet,
        } => run(&config, json, export_json.as_deref(), quiet).await,
    }
}

async fn run(path: &Path, json: bool, export_json: Option<&Path>, quiet: bool) -> ExitCode {
    let mut config = match load_config(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return ExitCode::from(2);
        }
    };
    config.quiet = quiet || json;

    let report = match Engine::new(config).run().await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(2);
        }
    };

    if json {
        println!("{}", report.to_json());
    } else {
        report.print();
    }
    if let Some(path) = export_json {
        if let Err(e) = std::fs::write(path, report.to_json()) {
            eprintln!("error: cannot write {}: {}", path.display(), e);
            return ExitCode::from(2);
        }
    }

    if report.passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}
