//! CLI command definitions using clap

use crate::output::OutputFormat;
use clap::{Parser, Subcommand};
use guardian_inference::{AgeGroup, QueryCategory};
use std::path::PathBuf;

/// Guardian CLI - inspect and drive the model orchestrator
#[derive(Parser)]
#[command(name = "guardian")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json)
    #[arg(short = 'o', long, global = true, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    /// Configuration file path (TOML, YAML or JSON)
    #[arg(short = 'c', long, global = true, env = "GUARDIAN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Models directory, overriding the configuration
    #[arg(short = 'm', long, global = true, env = "GUARDIAN_MODELS_DIR")]
    pub models_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// List discovered models and their residency
    Models,

    /// Answer a prompt through the fallback chain
    Ask {
        /// Prompt text
        prompt: String,

        /// Age group of the asker (child, teen, adult)
        #[arg(short, long, default_value = "adult")]
        age: AgeGroup,

        /// Query category (general, security, education, threat)
        #[arg(short = 'k', long, default_value = "general")]
        category: QueryCategory,

        /// Ask the same prompt this many times
        #[arg(short = 'n', long, default_value_t = 1)]
        repeat: u32,

        /// Print per-model statistics afterwards
        #[arg(long)]
        stats: bool,
    },

    /// Benchmark every model and print the ranking
    Benchmark,

    /// Print the effective configuration
    Config,
}
