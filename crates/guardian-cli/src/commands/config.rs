//! `guardian config` command implementation

use guardian_inference::GuardianConfig;

use crate::output::{OutputFormat, print_json};

/// Execute the `guardian config` command
pub fn run(config: &GuardianConfig, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => print_json(config),
        OutputFormat::Text => {
            println!("capacity:      {}", config.orchestrator.capacity);
            println!("max attempts:  {}", config.orchestrator.max_attempts);
            println!(
                "models dir:    {}",
                config
                    .discovery
                    .models_dir
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
            println!(
                "endpoint:      {}",
                config.backends.authorized_endpoint.as_deref().unwrap_or("-")
            );
            println!("remote models: {}", config.remote_models.len());
            println!("rules:         {}", config.capability_rules.len());
            Ok(())
        }
    }
}
