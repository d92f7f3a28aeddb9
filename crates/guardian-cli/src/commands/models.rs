//! `guardian models` command implementation

use colored::Colorize;
use guardian_inference::ModelOrchestrator;

use super::{age_tags, category_tags};
use crate::output::{OutputFormat, print_json, table};

/// Execute the `guardian models` command
pub fn run(orchestrator: &ModelOrchestrator, format: OutputFormat) -> anyhow::Result<()> {
    let models = orchestrator.list_models();

    if format == OutputFormat::Json {
        return print_json(&models);
    }

    println!("{} Listing models", "→".green());
    if models.is_empty() {
        println!("  No models found.");
        return Ok(());
    }

    let rows = models
        .iter()
        .map(|status| {
            let d = &status.descriptor;
            vec![
                d.id.clone(),
                d.backend_kind().to_string(),
                status.residency.to_string(),
                age_tags(&d.age_groups),
                category_tags(&d.categories),
                size_mb(d.size_bytes),
                d.benchmark
                    .map(|b| format!("{:.2} / {} ms", b.quality_score, b.latency_ms))
                    .unwrap_or_else(|| "-".to_string()),
                d.location.to_string(),
            ]
        })
        .collect();

    println!(
        "{}",
        table(
            &["ID", "Backend", "State", "Ages", "Categories", "Size", "Benchmark", "Location"],
            rows,
        )
    );
    println!(
        "  {} of {} slots in use",
        orchestrator.resident_count(),
        orchestrator.config().orchestrator.capacity
    );
    Ok(())
}

fn size_mb(bytes: u64) -> String {
    if bytes == 0 {
        return "-".to_string();
    }
    format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
}
