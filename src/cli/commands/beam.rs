//! Beam CLI command.

use anyhow::{Context, Result};
use clap::Args;

use super::{resolve_report_version, StoreHandle};
use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::domain::models::{Config, Program};
use crate::domain::ports::ProgramStore;

#[derive(Args, Debug)]
pub struct BeamArgs {
    /// Version to inspect; defaults to the latest one
    #[arg(short, long)]
    pub version: Option<i64>,

    /// Number of heads to show (overrides search.beam_width)
    #[arg(short, long)]
    pub width: Option<u32>,

    /// Include each head's full code
    #[arg(long)]
    pub code: bool,
}

#[derive(Debug, serde::Serialize)]
pub struct BeamHeadOutput {
    pub id: Option<i64>,
    pub parent_id: Option<i64>,
    pub depth: u32,
    pub value: Option<f64>,
    pub advantage: Option<f64>,
    pub raw_reward: Option<f64>,
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl BeamHeadOutput {
    fn new(program: &Program, with_code: bool) -> Self {
        Self {
            id: program.id,
            parent_id: program.parent_id,
            depth: program.depth,
            value: program.value,
            advantage: program.advantage,
            raw_reward: program.raw_reward,
            created_at: program.created_at.map(|t| t.to_rfc3339()),
            code: with_code.then(|| program.code.clone()),
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct BeamOutput {
    pub version: Option<i64>,
    pub width: u32,
    pub heads: Vec<BeamHeadOutput>,
    #[serde(skip)]
    programs: Vec<Program>,
    #[serde(skip)]
    show_code: bool,
}

impl CommandOutput for BeamOutput {
    fn to_human(&self) -> String {
        let Some(version) = self.version else {
            return "No programs stored yet.".to_string();
        };
        if self.programs.is_empty() {
            return format!("No evaluated programs in version {version}.");
        }

        let mut text = format!(
            "Beam heads for version {version} ({} of {}):\n{}",
            self.programs.len(),
            self.width,
            TableFormatter::new().format_programs(&self.programs)
        );
        if self.show_code {
            for program in &self.programs {
                let id = program.id.map_or_else(|| "-".to_string(), |id| id.to_string());
                text.push_str(&format!("\n\n--- program {id} ---\n{}", program.code));
            }
        }
        text
    }
}

pub async fn execute(args: BeamArgs, config: Config, json_mode: bool) -> Result<()> {
    let handle = StoreHandle::open(&config);
    let result = collect(&handle, &args, &config).await;
    handle.close().await;

    output(&result?, json_mode);
    Ok(())
}

async fn collect(handle: &StoreHandle, args: &BeamArgs, config: &Config) -> Result<BeamOutput> {
    let width = args.width.unwrap_or(config.search.beam_width);
    let version = resolve_report_version(&handle.store, args.version).await?;

    let programs = match version {
        Some(version) => handle
            .store
            .get_beam_heads(version, width)
            .await
            .with_context(|| format!("Failed to load beam heads for version {version}"))?,
        None => Vec::new(),
    };

    Ok(BeamOutput {
        version,
        width,
        heads: programs
            .iter()
            .map(|p| BeamHeadOutput::new(p, args.code))
            .collect(),
        programs,
        show_code: args.code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Conversation, EnvState};

    fn head(id: i64, value: f64) -> Program {
        let mut p = Program::new("print('hi')", Conversation::default(), 2, "v2");
        p.id = Some(id);
        p.state = Some(EnvState::new("{}"));
        p.value = Some(value);
        p
    }

    fn beam(version: Option<i64>, programs: Vec<Program>, show_code: bool) -> BeamOutput {
        BeamOutput {
            version,
            width: 4,
            heads: programs
                .iter()
                .map(|p| BeamHeadOutput::new(p, show_code))
                .collect(),
            programs,
            show_code,
        }
    }

    #[test]
    fn test_empty_store_message() {
        assert_eq!(beam(None, vec![], false).to_human(), "No programs stored yet.");
        assert_eq!(
            beam(Some(3), vec![], false).to_human(),
            "No evaluated programs in version 3."
        );
    }

    #[test]
    fn test_json_omits_code_unless_requested() {
        let without = beam(Some(2), vec![head(1, 4.0)], false).to_json();
        assert_eq!(without["heads"][0]["id"], 1);
        assert!(without["heads"][0].get("code").is_none());
        assert!(without.get("programs").is_none());

        let with = beam(Some(2), vec![head(1, 4.0)], true).to_json();
        assert_eq!(with["heads"][0]["code"], "print('hi')");
    }

    #[test]
    fn test_human_output_lists_code_when_requested() {
        let text = beam(Some(2), vec![head(5, 1.0)], true).to_human();
        assert!(text.contains("Beam heads for version 2 (1 of 4)"));
        assert!(text.contains("--- program 5 ---"));
    }
}
