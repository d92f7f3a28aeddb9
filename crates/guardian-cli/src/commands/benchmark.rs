//! `guardian benchmark` command implementation

use colored::Colorize;
use guardian_inference::ModelOrchestrator;
use serde::Serialize;

use crate::output::{OutputFormat, print_json, table};

#[derive(Debug, Serialize)]
struct Ranked {
    rank: usize,
    model_id: String,
    quality_score: f64,
    latency_ms: u64,
}

/// Execute the `guardian benchmark` command
pub async fn run(orchestrator: &ModelOrchestrator, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Text {
        println!(
            "{} Benchmarking {} model(s) with {} prompt(s)",
            "→".green(),
            orchestrator.registry().len(),
            orchestrator.config().benchmark.prompts.len()
        );
    }

    let ranked: Vec<Ranked> = orchestrator
        .refresh_benchmarks()
        .await
        .into_iter()
        .enumerate()
        .map(|(i, (model_id, score))| Ranked {
            rank: i + 1,
            model_id,
            quality_score: score.quality_score,
            latency_ms: score.latency_ms,
        })
        .collect();

    if format == OutputFormat::Json {
        return print_json(&ranked);
    }
    if ranked.is_empty() {
        println!("  No models could be benchmarked.");
        return Ok(());
    }

    let rows = ranked
        .iter()
        .map(|r| {
            vec![
                r.rank.to_string(),
                r.model_id.clone(),
                format!("{:.2}", r.quality_score),
                r.latency_ms.to_string(),
            ]
        })
        .collect();
    println!("{}", table(&["#", "Model", "Quality", "Latency ms"], rows));
    Ok(())
}
