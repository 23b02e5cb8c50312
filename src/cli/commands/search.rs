//! Search CLI command.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use std::sync::{Arc, Mutex};
use tracing::info;

use super::StoreHandle;
use crate::cli::output::progress::{create_hidden_progress_bar, create_progress_bar, iteration_message};
use crate::cli::output::{format_value, output, CommandOutput};
use crate::domain::models::{Config, SamplerKind};
use crate::infrastructure::environment::HttpEnvironment;
use crate::infrastructure::llm::HttpModelClient;
use crate::services::{
    build_sampler, CompletionExtractor, IterationReport, OrchestratorDeps, ProgressCallback,
    SearchOrchestrator, SearchSettings, SearchSummary,
};

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Number of iterations (overrides search.iterations)
    #[arg(short, long)]
    pub iterations: Option<u32>,

    /// Candidates generated per iteration (overrides search.samples_per_iteration)
    #[arg(short, long)]
    pub samples: Option<u32>,

    /// Version to extend; defaults to a new version after the largest stored one
    #[arg(short, long)]
    pub version: Option<i64>,

    /// Description recorded for a new version
    #[arg(short, long)]
    pub description: Option<String>,

    /// Parent selection policy
    #[arg(long, value_enum)]
    pub sampler: Option<SamplerChoice>,

    /// Store only programs that received a value
    #[arg(long)]
    pub skip_failures: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplerChoice {
    RewardWeighted,
    Diversity,
}

impl From<SamplerChoice> for SamplerKind {
    fn from(choice: SamplerChoice) -> Self {
        match choice {
            SamplerChoice::RewardWeighted => Self::RewardWeighted,
            SamplerChoice::Diversity => Self::Diversity,
        }
    }
}

impl SearchArgs {
    /// Fold command-line overrides into the loaded configuration
    pub fn apply(&self, config: &mut Config) {
        if let Some(iterations) = self.iterations {
            config.search.iterations = iterations;
        }
        if let Some(samples) = self.samples {
            config.search.samples_per_iteration = samples;
        }
        if self.version.is_some() {
            config.search.version = self.version;
        }
        if let Some(description) = &self.description {
            config.search.version_description.clone_from(description);
        }
        if let Some(sampler) = self.sampler {
            config.sampler.kind = sampler.into();
        }
        if self.skip_failures {
            config.search.skip_failures = true;
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct SearchOutput {
    pub run_id: String,
    pub version: i64,
    pub version_description: String,
    pub iterations_completed: u32,
    pub failed_attempts: u32,
    pub programs_persisted: usize,
    pub best_value: Option<f64>,
}

impl SearchOutput {
    fn new(summary: &SearchSummary, version_description: &str) -> Self {
        Self {
            run_id: summary.run_id.to_string(),
            version: summary.version,
            version_description: version_description.to_string(),
            iterations_completed: summary.iterations_completed,
            failed_attempts: summary.failed_attempts,
            programs_persisted: summary.programs_persisted,
            best_value: summary.best_value,
        }
    }
}

impl CommandOutput for SearchOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Search run {}", self.run_id),
            format!("Version:            {}", self.version),
        ];
        if !self.version_description.is_empty() {
            lines.push(format!("Description:        {}", self.version_description));
        }
        lines.push(format!("Iterations:         {}", self.iterations_completed));
        lines.push(format!("Retried attempts:   {}", self.failed_attempts));
        lines.push(format!("Programs stored:    {}", self.programs_persisted));
        lines.push(format!("Best value:         {}", format_value(self.best_value)));
        lines.join("\n")
    }
}

pub async fn execute(args: SearchArgs, mut config: Config, json_mode: bool) -> Result<()> {
    args.apply(&mut config);

    let handle = StoreHandle::open(&config);
    let result = run(&handle, &config, json_mode).await;
    handle.close().await;

    let (summary, version_description) = result?;
    output(&SearchOutput::new(&summary, &version_description), json_mode);
    Ok(())
}

async fn run(handle: &StoreHandle, config: &Config, json_mode: bool) -> Result<(SearchSummary, String)> {
    let model = HttpModelClient::new(&config.model, &config.retry)
        .context("Failed to build model client")?;
    let environment =
        HttpEnvironment::new(&config.environment).context("Failed to build environment client")?;
    let extractor = CompletionExtractor::new(&config.extraction)
        .context("Failed to build completion extractor")?;
    let sampler = build_sampler(&config.sampler, handle.store.clone())
        .context("Invalid sampler configuration")?;

    let deps = OrchestratorDeps {
        store: handle.store.clone(),
        sampler,
        model: Arc::new(model),
        environment: Arc::new(environment),
        extractor,
    };

    let iterations = config.search.iterations;
    let progress_bar = if json_mode {
        create_hidden_progress_bar(u64::from(iterations))
    } else {
        create_progress_bar(u64::from(iterations))
    };

    let best = Arc::new(Mutex::new(None::<f64>));
    let callback: ProgressCallback = {
        let progress_bar = progress_bar.clone();
        Arc::new(move |report: &IterationReport| {
            let best_so_far = match best.lock() {
                Ok(mut best) => {
                    if let Some(value) = report.best_value {
                        *best = Some(best.map_or(value, |b: f64| b.max(value)));
                    }
                    *best
                }
                Err(_) => report.best_value,
            };
            progress_bar.set_message(iteration_message(report, best_so_far));
            progress_bar.inc(1);
        })
    };

    let mut orchestrator = SearchOrchestrator::new(deps, SearchSettings::from_config(config))
        .await
        .context("Failed to resolve search version")?
        .with_progress(callback);
    let version_description = orchestrator.version_description().to_string();

    info!(
        version = orchestrator.version(),
        sampler = ?config.sampler.kind,
        model = %config.model.model,
        "starting search"
    );

    let summary = orchestrator
        .run_search(
            iterations,
            config.search.samples_per_iteration,
            config.search.skip_failures,
        )
        .await;

    match summary {
        Ok(summary) => {
            progress_bar.finish_with_message(format!(
                "done: {} programs stored",
                summary.programs_persisted
            ));
            Ok((summary, version_description))
        }
        Err(err) => {
            progress_bar.abandon_with_message("search aborted");
            Err(err).context("Search failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> SearchArgs {
        SearchArgs {
            iterations: None,
            samples: None,
            version: None,
            description: None,
            sampler: None,
            skip_failures: false,
        }
    }

    #[test]
    fn test_apply_without_overrides_keeps_config() {
        let mut config = Config::default();
        config.search.version = Some(7);
        config.search.skip_failures = true;
        args().apply(&mut config);

        assert_eq!(config.search.version, Some(7));
        assert!(config.search.skip_failures);
        assert_eq!(config.search.iterations, 1000);
        assert_eq!(config.sampler.kind, SamplerKind::RewardWeighted);
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = Config::default();
        let args = SearchArgs {
            iterations: Some(5),
            samples: Some(8),
            version: Some(2),
            description: Some("smelting".to_string()),
            sampler: Some(SamplerChoice::Diversity),
            skip_failures: true,
        };
        args.apply(&mut config);

        assert_eq!(config.search.iterations, 5);
        assert_eq!(config.search.samples_per_iteration, 8);
        assert_eq!(config.search.version, Some(2));
        assert_eq!(config.search.version_description, "smelting");
        assert_eq!(config.sampler.kind, SamplerKind::Diversity);
        assert!(config.search.skip_failures);
    }

    #[test]
    fn test_output_human() {
        let output = SearchOutput {
            run_id: "run".to_string(),
            version: 3,
            version_description: String::new(),
            iterations_completed: 10,
            failed_attempts: 1,
            programs_persisted: 31,
            best_value: Some(12.0),
        };
        let text = output.to_human();
        assert!(text.contains("Version:            3"));
        assert!(text.contains("Programs stored:    31"));
        assert!(text.contains("12.000"));
        assert!(!text.contains("Description"));
    }
}
