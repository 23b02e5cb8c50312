use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::domain::models::{EnvState, EnvironmentConfig, Evaluation, Program};
use crate::domain::ports::errors::EnvironmentError;
use crate::domain::ports::{Environment, Observation};

#[derive(Debug, Serialize)]
struct ObserveRequest<'a> {
    state: &'a EnvState,
}

#[derive(Debug, Serialize)]
struct EvaluateRequest<'a> {
    programs: Vec<ProgramPayload<'a>>,
    start_state: &'a EnvState,
}

#[derive(Debug, Serialize)]
struct ProgramPayload<'a> {
    code: &'a str,
}

#[derive(Debug, Deserialize)]
struct EvaluateResponse {
    results: Vec<EvaluationResult>,
}

#[derive(Debug, Deserialize)]
struct EvaluationResult {
    #[serde(flatten)]
    evaluation: Evaluation,
    /// What the environment printed while running the program
    #[serde(default)]
    output: String,
}

/// Environment reached as JSON over HTTP
///
/// - `POST {base}/observe` with `{state}` answers `{probe, output}`
/// - `POST {base}/evaluate` with `{programs: [{code}], start_state}` answers
///   `{results: [...]}`, one result per program in request order
pub struct HttpEnvironment {
    http_client: ReqwestClient,
    base_url: String,
}

impl HttpEnvironment {
    pub fn new(config: &EnvironmentConfig) -> Result<Self> {
        let http_client = ReqwestClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<B: Serialize + Sync, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, EnvironmentError> {
        let response = self
            .http_client
            .post(format!("{}/{path}", self.base_url))
            .json(body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(EnvironmentError::Status(status, text));
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl Environment for HttpEnvironment {
    #[instrument(skip_all, err)]
    async fn observe(&self, state: &EnvState) -> Result<Observation, EnvironmentError> {
        self.post("observe", &ObserveRequest { state }).await
    }

    #[instrument(skip_all, fields(batch = programs.len()), err)]
    async fn evaluate_batch(
        &self,
        programs: Vec<Program>,
        start_state: &EnvState,
    ) -> Result<Vec<Program>, EnvironmentError> {
        if programs.is_empty() {
            return Ok(programs);
        }

        let request = EvaluateRequest {
            programs: programs
                .iter()
                .map(|p| ProgramPayload { code: &p.code })
                .collect(),
            start_state,
        };
        let response: EvaluateResponse = self.post("evaluate", &request).await?;

        if response.results.len() != programs.len() {
            return Err(EnvironmentError::BatchSizeMismatch {
                expected: programs.len(),
                actual: response.results.len(),
            });
        }

        let evaluated: Vec<Program> = programs
            .into_iter()
            .zip(response.results)
            .map(|(mut program, result)| {
                program.apply_evaluation(result.evaluation);
                program.conversation = program.conversation.with_turn(&program.code, &result.output);
                program
            })
            .collect();

        debug!(
            succeeded = evaluated.iter().filter(|p| p.is_evaluated()).count(),
            "batch evaluated"
        );
        Ok(evaluated)
    }
}
