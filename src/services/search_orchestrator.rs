//! Search loop: sample a parent, generate, extract, evaluate, persist
//!
//! One orchestrator drives one search version. Every iteration either
//! completes all five steps or fails as a whole; a failed iteration is retried
//! a bounded number of times before the run is aborted. Programs persisted by
//! earlier iterations stay valid tree state either way.

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::completion_extractor::CompletionExtractor;
use crate::domain::models::{
    Completion, CompletionRequest, Config, Conversation, EnvState, Program, ProgramId,
};
use crate::domain::ports::{
    Environment, EnvironmentError, ModelError, ModelService, ParentSampler, ProgramStore,
    SamplerError, StoreError,
};

/// Search errors
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Parent sampling failed: {0}")]
    Sampler(#[from] SamplerError),

    #[error("Program store failed: {0}")]
    Store(#[from] StoreError),

    #[error("Environment failed: {0}")]
    Environment(#[from] EnvironmentError),

    #[error("Model service failed: {0}")]
    Model(#[from] ModelError),

    /// An iteration kept failing past the retry bound
    #[error("Search aborted at iteration {iteration} after {attempts} failed attempts: {source}")]
    Fatal {
        iteration: u32,
        attempts: u32,
        #[source]
        source: Box<SearchError>,
    },
}

/// Collaborators of the search loop
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub store: Arc<dyn ProgramStore>,
    pub sampler: Arc<dyn ParentSampler>,
    pub model: Arc<dyn ModelService>,
    pub environment: Arc<dyn Environment>,
    pub extractor: CompletionExtractor,
}

/// Tunables of the search loop
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSettings {
    /// Version to extend; `None` starts the version after the largest stored one
    pub version: Option<i64>,
    pub version_description: String,
    pub system_prompt: String,
    /// State used when a fresh root is needed
    pub initial_state: EnvState,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub stop_sequences: Vec<String>,
    pub logit_bias: BTreeMap<String, f64>,
    pub presence_penalty: f64,
    pub frequency_penalty: f64,
    /// In-flight bound for single-sample calls
    pub n_parallel: usize,
    /// Pause after each single-sample call
    pub request_delay: Duration,
    /// Failed attempts tolerated per iteration before aborting
    pub max_iteration_retries: u32,
}

impl SearchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            version: config.search.version,
            version_description: config.search.version_description.clone(),
            system_prompt: config.search.system_prompt.clone(),
            initial_state: EnvState::new(config.search.initial_state.clone()),
            model: config.model.model.clone(),
            temperature: config.model.temperature,
            max_tokens: config.model.max_tokens,
            stop_sequences: config.model.stop_sequences.clone(),
            logit_bias: config.model.logit_bias.clone(),
            presence_penalty: config.model.presence_penalty,
            frequency_penalty: config.model.frequency_penalty,
            n_parallel: config.search.n_parallel,
            request_delay: Duration::from_millis(config.model.request_delay_ms),
            max_iteration_retries: config.search.max_iteration_retries,
        }
    }
}

/// Outcome of one successful iteration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IterationReport {
    pub iteration: u32,
    /// `None` when the iteration started a fresh root
    pub parent_id: Option<ProgramId>,
    /// Completions returned by the model service
    pub generated: usize,
    /// Completions that yielded executable code
    pub extracted: usize,
    /// Programs the environment evaluated successfully
    pub evaluated: usize,
    pub persisted: usize,
    /// Best value among this iteration's evaluated programs
    pub best_value: Option<f64>,
}

/// Outcome of a whole run
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSummary {
    pub run_id: Uuid,
    pub version: i64,
    pub iterations_completed: u32,
    /// Failed iteration attempts that were retried
    pub failed_attempts: u32,
    pub programs_persisted: usize,
    pub best_value: Option<f64>,
}

/// Called after every successful iteration
pub type ProgressCallback = Arc<dyn Fn(&IterationReport) + Send + Sync>;

/// Drives the sample → generate → extract → evaluate → persist loop
pub struct SearchOrchestrator {
    deps: OrchestratorDeps,
    settings: SearchSettings,
    version: i64,
    version_description: String,
    retry_count: u32,
    progress: Option<ProgressCallback>,
}

impl SearchOrchestrator {
    /// Resolve the search version and build the orchestrator
    ///
    /// An existing version keeps its stored description; the configured one
    /// only names new versions.
    pub async fn new(deps: OrchestratorDeps, settings: SearchSettings) -> Result<Self, SearchError> {
        let version = match settings.version {
            Some(version) => version,
            None => deps.store.get_largest_version().await?.map_or(1, |v| v + 1),
        };
        let version_description = match deps.store.get_version_metadata(version).await? {
            Some(metadata) => {
                if metadata.version_description != settings.version_description {
                    debug!(
                        version,
                        stored = %metadata.version_description,
                        "keeping stored version description"
                    );
                }
                metadata.version_description
            }
            None => settings.version_description.clone(),
        };

        Ok(Self {
            deps,
            settings,
            version,
            version_description,
            retry_count: 0,
            progress: None,
        })
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub const fn version(&self) -> i64 {
        self.version
    }

    pub fn version_description(&self) -> &str {
        &self.version_description
    }

    /// Run `iterations` iterations of `samples_per_iteration` candidates
    ///
    /// With `skip_failures`, only programs that received a value are stored.
    pub async fn run_search(
        &mut self,
        iterations: u32,
        samples_per_iteration: u32,
        skip_failures: bool,
    ) -> Result<SearchSummary, SearchError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("search", %run_id, version = self.version);
        self.run_search_inner(run_id, iterations, samples_per_iteration, skip_failures)
            .instrument(span)
            .await
    }

    async fn run_search_inner(
        &mut self,
        run_id: Uuid,
        iterations: u32,
        samples_per_iteration: u32,
        skip_failures: bool,
    ) -> Result<SearchSummary, SearchError> {
        info!(
            iterations,
            samples_per_iteration,
            skip_failures,
            description = %self.version_description,
            "search started"
        );

        let mut summary = SearchSummary {
            run_id,
            version: self.version,
            iterations_completed: 0,
            failed_attempts: 0,
            programs_persisted: 0,
            best_value: None,
        };

        let mut iteration = 0;
        while iteration < iterations {
            match self
                .run_iteration(iteration, samples_per_iteration, skip_failures)
                .await
            {
                Ok(report) => {
                    self.retry_count = 0;
                    summary.iterations_completed += 1;
                    summary.programs_persisted += report.persisted;
                    summary.best_value = max_value(summary.best_value, report.best_value);
                    if let Some(progress) = &self.progress {
                        progress(&report);
                    }
                    iteration += 1;
                }
                Err(err) => {
                    self.retry_count += 1;
                    summary.failed_attempts += 1;
                    if self.retry_count > self.settings.max_iteration_retries {
                        let attempts = self.retry_count;
                        self.retry_count = 0;
                        error!(iteration, attempts, error = %err, "iteration retries exhausted");
                        return Err(SearchError::Fatal {
                            iteration,
                            attempts,
                            source: Box::new(err),
                        });
                    }
                    warn!(
                        iteration,
                        attempt = self.retry_count,
                        max_retries = self.settings.max_iteration_retries,
                        error = %err,
                        "iteration failed, retrying"
                    );
                }
            }
        }

        info!(
            iterations = summary.iterations_completed,
            persisted = summary.programs_persisted,
            failed_attempts = summary.failed_attempts,
            best_value = ?summary.best_value,
            "search finished"
        );
        Ok(summary)
    }

    async fn run_iteration(
        &self,
        iteration: u32,
        samples: u32,
        skip_failures: bool,
    ) -> Result<IterationReport, SearchError> {
        let parent = self
            .deps
            .sampler
            .sample_parent(self.version)
            .await?
            .filter(Program::is_evaluated);

        let (conversation, start_state) = match &parent {
            Some(parent) => match &parent.state {
                Some(state) => (parent.conversation.clone(), state.clone()),
                None => self.root_context().await?,
            },
            None => self.root_context().await?,
        };

        let mut report = IterationReport {
            iteration,
            parent_id: parent.as_ref().and_then(|p| p.id),
            ..IterationReport::default()
        };

        let completions = self.generate(&conversation, samples).await;
        report.generated = completions.len();

        let candidates: Vec<Program> = completions
            .into_iter()
            .filter_map(|completion| self.build_candidate(completion, &conversation, parent.as_ref()))
            .collect();
        report.extracted = candidates.len();
        if candidates.is_empty() {
            debug!(iteration, "no executable candidates");
            return Ok(report);
        }

        let mut evaluated = self
            .deps
            .environment
            .evaluate_batch(candidates, &start_state)
            .await?;
        for program in &mut evaluated {
            program.attach_parent(parent.as_ref());
        }
        report.evaluated = evaluated.iter().filter(|p| p.is_evaluated()).count();
        report.best_value = evaluated
            .iter()
            .filter(|p| p.is_evaluated())
            .filter_map(|p| p.value)
            .fold(None, |best, v| max_value(best, Some(v)));

        let to_store: Vec<Program> = evaluated
            .into_iter()
            .filter(|p| p.is_evaluated() && (!skip_failures || p.value.is_some()))
            .collect();
        let writes = join_all(
            to_store
                .into_iter()
                .map(|program| self.deps.store.create_program(program)),
        )
        .await;
        let attempted = writes.len();
        let mut stored = 0;
        let mut first_error = None;
        for write in writes {
            match write {
                Ok(_) => stored += 1,
                Err(err) => {
                    warn!(iteration, error = %err, "program write failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_error {
            warn!(iteration, stored, attempted, "iteration persisted a partial batch");
            return Err(err.into());
        }
        report.persisted = stored;

        debug!(
            iteration,
            parent_id = ?report.parent_id,
            generated = report.generated,
            extracted = report.extracted,
            evaluated = report.evaluated,
            persisted = report.persisted,
            "iteration complete"
        );
        Ok(report)
    }

    /// Conversation and state for a fresh tree root
    async fn root_context(&self) -> Result<(Conversation, EnvState), SearchError> {
        let observation = self
            .deps
            .environment
            .observe(&self.settings.initial_state)
            .await?;
        let conversation = Conversation::root(
            &self.settings.system_prompt,
            &observation.probe,
            &observation.output,
        );
        Ok((conversation, self.settings.initial_state.clone()))
    }

    fn request(&self, conversation: &Conversation, n: u32) -> CompletionRequest {
        CompletionRequest {
            model: self.settings.model.clone(),
            messages: conversation.messages.clone(),
            n,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            stop_sequences: self.settings.stop_sequences.clone(),
            logit_bias: self.settings.logit_bias.clone(),
            presence_penalty: self.settings.presence_penalty,
            frequency_penalty: self.settings.frequency_penalty,
        }
    }

    /// Ask the model for `samples` completions
    ///
    /// Generation failures never fail the iteration: a failed batch call
    /// yields no completions and a failed single call drops one sample.
    async fn generate(&self, conversation: &Conversation, samples: u32) -> Vec<Completion> {
        let model = &self.deps.model;

        if model.supports_multi_sample() {
            let request = self.request(conversation, samples);
            return match model.complete(&request).await {
                Ok(response) => response.into_completions(),
                Err(err) => {
                    warn!(samples, error = %err, "batch generation failed");
                    Vec::new()
                }
            };
        }

        let request = self.request(conversation, 1);
        let request = &request;
        let delay = self.settings.request_delay;
        let responses: Vec<Result<_, ModelError>> = stream::iter(0..samples)
            .map(|_| async move {
                let response = model.complete(request).await;
                sleep(delay).await;
                response
            })
            .buffer_unordered(self.settings.n_parallel.max(1))
            .collect()
            .await;

        responses
            .into_iter()
            .filter_map(|response| match response {
                Ok(response) => Some(response.into_completions()),
                Err(err) => {
                    warn!(error = %err, "single generation failed, dropping sample");
                    None
                }
            })
            .flatten()
            .collect()
    }

    fn build_candidate(
        &self,
        completion: Completion,
        conversation: &Conversation,
        parent: Option<&Program>,
    ) -> Option<Program> {
        let extraction = self.deps.extractor.extract(&completion.text);
        if !extraction.executable {
            debug!(strategy = %extraction.strategy, "dropping completion without executable code");
            return None;
        }

        let mut program = Program::new(
            extraction.code,
            conversation.clone(),
            self.version,
            self.version_description.clone(),
        );
        program.attach_parent(parent);
        program.model = Some(self.settings.model.clone());
        program.response = Some(completion.text);
        program.token_usage = Some(completion.usage);
        program.set_meta("text_response", extraction.text_response);
        program.set_meta("model", self.settings.model.clone());
        program.set_meta("extraction", extraction.strategy.to_string());
        Some(program)
    }
}

fn max_value(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_value() {
        assert_eq!(max_value(None, None), None);
        assert_eq!(max_value(Some(1.0), None), Some(1.0));
        assert_eq!(max_value(None, Some(2.0)), Some(2.0));
        assert_eq!(max_value(Some(3.0), Some(2.0)), Some(3.0));
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::default();
        config.search.version = Some(4);
        config.search.initial_state = "{\"tick\": 0}".to_string();
        config.model.request_delay_ms = 250;

        let settings = SearchSettings::from_config(&config);
        assert_eq!(settings.version, Some(4));
        assert_eq!(settings.initial_state.as_str(), "{\"tick\": 0}");
        assert_eq!(settings.request_delay, Duration::from_millis(250));
        assert_eq!(settings.max_iteration_retries, 3);
        assert_eq!(settings.model, "gpt-4o");
    }
}
