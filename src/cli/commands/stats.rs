//! Stats CLI command.

use anyhow::{Context, Result};
use clap::Args;

use super::{resolve_report_version, StoreHandle};
use crate::cli::output::{format_value, output, CommandOutput, TableFormatter};
use crate::domain::models::Config;
use crate::domain::ports::ProgramStore;

#[derive(Args, Debug)]
pub struct StatsArgs {
    /// Version to summarize; defaults to the latest one
    #[arg(short, long)]
    pub version: Option<i64>,

    /// Summarize rewards across every version
    #[arg(long, conflicts_with = "version")]
    pub all: bool,
}

/// Distribution of stored values
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct RewardSummary {
    pub count: usize,
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl RewardSummary {
    pub fn from_values(values: &[f64]) -> Self {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return Self {
                count: values.len(),
                ..Self::default()
            };
        }

        #[allow(clippy::cast_precision_loss)]
        let n = finite.len() as f64;
        let mean = finite.iter().sum::<f64>() / n;
        let variance = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            count: values.len(),
            mean: Some(mean),
            std_dev: Some(variance.sqrt()),
            min: finite.iter().copied().reduce(f64::min),
            max: finite.iter().copied().reduce(f64::max),
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct StatsOutput {
    pub largest_version: Option<i64>,
    /// Version the depth and advantage figures refer to
    pub version: Option<i64>,
    pub version_description: Option<String>,
    pub largest_depth: Option<u32>,
    pub programs_with_advantage: Option<u64>,
    /// `None` when rewards span every version
    pub reward_scope: Option<i64>,
    pub rewards: RewardSummary,
}

impl CommandOutput for StatsOutput {
    fn to_human(&self) -> String {
        if self.largest_version.is_none() {
            return "No programs stored yet.".to_string();
        }

        let opt = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());
        let scope = self
            .reward_scope
            .map_or_else(|| "all versions".to_string(), |v| format!("version {v}"));
        let rows = [
            ("Largest version", opt(self.largest_version.map(|v| v.to_string()))),
            ("Version", opt(self.version.map(|v| v.to_string()))),
            ("Description", opt(self.version_description.clone())),
            ("Largest depth", opt(self.largest_depth.map(|d| d.to_string()))),
            (
                "Programs with advantage",
                opt(self.programs_with_advantage.map(|c| c.to_string())),
            ),
            ("Reward scope", scope),
            ("Evaluated programs", self.rewards.count.to_string()),
            ("Mean value", format_value(self.rewards.mean)),
            ("Std dev", format_value(self.rewards.std_dev)),
            ("Min value", format_value(self.rewards.min)),
            ("Max value", format_value(self.rewards.max)),
        ];
        TableFormatter::new().format_key_values(&rows)
    }
}

pub async fn execute(args: StatsArgs, config: Config, json_mode: bool) -> Result<()> {
    let handle = StoreHandle::open(&config);
    let result = collect(&handle, &args).await;
    handle.close().await;

    output(&result?, json_mode);
    Ok(())
}

async fn collect(handle: &StoreHandle, args: &StatsArgs) -> Result<StatsOutput> {
    let store = &handle.store;
    let largest_version = store
        .get_largest_version()
        .await
        .context("Failed to look up the latest version")?;
    let version = if args.all {
        largest_version
    } else {
        resolve_report_version(store, args.version).await?
    };

    let (version_description, largest_depth, programs_with_advantage) = match version {
        Some(version) => {
            let metadata = store
                .get_version_metadata(version)
                .await
                .context("Failed to load version metadata")?;
            let depth = store
                .get_largest_depth(version)
                .await
                .context("Failed to load tree depth")?;
            let with_advantage = store
                .count_with_advantage(version)
                .await
                .context("Failed to count programs")?;
            (
                metadata.map(|m| m.version_description),
                depth,
                Some(with_advantage),
            )
        }
        None => (None, None, None),
    };

    let reward_scope = if args.all { None } else { version };
    let rewards = if largest_version.is_some() {
        store
            .get_all_rewards(reward_scope)
            .await
            .context("Failed to load rewards")?
    } else {
        Vec::new()
    };

    Ok(StatsOutput {
        largest_version,
        version,
        version_description,
        largest_depth,
        programs_with_advantage,
        reward_scope,
        rewards: RewardSummary::from_values(&rewards),
    })
}
