//! Guardian CLI - inspect and drive the model orchestrator

mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{Cli, Commands};
use colored::Colorize;
use guardian_inference::{GuardianConfig, ModelOrchestrator};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so JSON output stays parseable. RUST_LOG wins over -v.
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    if let Err(e) = rt.block_on(run_command_async(cli)) {
        eprintln!("{} {e:#}", "error:".red().bold());
        std::process::exit(1);
    }
    Ok(())
}

async fn run_command_async(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;

    if let Commands::Config = cli.command {
        return commands::config::run(&config, cli.output);
    }

    let orchestrator = ModelOrchestrator::new(config)?;
    orchestrator.warm_up().await;

    let outcome = match cli.command {
        Commands::Models => commands::models::run(&orchestrator, cli.output),
        Commands::Ask {
            prompt,
            age,
            category,
            repeat,
            stats,
        } => {
            let args = commands::ask::AskArgs {
                prompt,
                age,
                category,
                repeat,
                stats,
            };
            commands::ask::run(&orchestrator, args, cli.output).await
        }
        Commands::Benchmark => commands::benchmark::run(&orchestrator, cli.output).await,
        Commands::Config => Ok(()),
    };

    orchestrator.shutdown().await;
    outcome
}

fn load_config(cli: &Cli) -> anyhow::Result<GuardianConfig> {
    let mut config = match &cli.config {
        Some(path) => GuardianConfig::load(path)
            .map_err(|e| anyhow::anyhow!("loading {}: {e}", path.display()))?,
        None => GuardianConfig::default(),
    };
    if let Some(dir) = &cli.models_dir {
        config = config.with_models_dir(dir);
    }
    config.validate()?;
    Ok(config)
}
