//! `guardian ask` command implementation

use colored::Colorize;
use guardian_inference::{AgeGroup, ModelOrchestrator, QueryCategory, RequestContext};
use serde::Serialize;

use crate::output::{OutputFormat, print_json, table};

pub struct AskArgs {
    pub prompt: String,
    pub age: AgeGroup,
    pub category: QueryCategory,
    pub repeat: u32,
    pub stats: bool,
}

#[derive(Debug, Serialize)]
struct StatsRow {
    model_id: String,
    calls: u64,
    failures: u64,
    success_rate: f64,
    mean_latency_ms: f64,
}

/// Execute the `guardian ask` command
pub async fn run(
    orchestrator: &ModelOrchestrator,
    args: AskArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let ctx = RequestContext::new(args.age, args.category, args.prompt);

    let mut results = Vec::new();
    for _ in 0..args.repeat.max(1) {
        let result = orchestrator.execute_with_fallback(&ctx).await;
        if format == OutputFormat::Text {
            let model = if result.degraded {
                result.model_id.yellow()
            } else {
                result.model_id.green()
            };
            println!(
                "{} {} ({} ms, {} attempt(s))",
                "→".green(),
                model,
                result.latency_ms,
                result.attempts
            );
            println!("{}", result.text);
        }
        results.push(result);
    }

    let stats: Vec<StatsRow> = orchestrator
        .get_stats()
        .into_iter()
        .map(|(model_id, r)| StatsRow {
            success_rate: r.success_rate(),
            mean_latency_ms: r.mean_latency_ms(),
            calls: r.call_count,
            failures: r.failure_count,
            model_id,
        })
        .collect();

    match format {
        OutputFormat::Json if args.stats => {
            print_json(&serde_json::json!({ "results": results, "stats": stats }))
        }
        OutputFormat::Json => print_json(&results),
        OutputFormat::Text if args.stats => {
            let rows = stats
                .iter()
                .map(|s| {
                    vec![
                        s.model_id.clone(),
                        s.calls.to_string(),
                        s.failures.to_string(),
                        format!("{:.0}%", s.success_rate * 100.0),
                        format!("{:.1}", s.mean_latency_ms),
                    ]
                })
                .collect();
            println!();
            println!(
                "{}",
                table(&["Model", "Calls", "Failures", "Success", "Mean ms"], rows)
            );
            Ok(())
        }
        OutputFormat::Text => Ok(()),
    }
}
