//! Common test utilities for integration tests
//!
//! Provides a temporary `SQLite` store, program builders, and in-process
//! stand-ins for the model service and the environment.

#![allow(dead_code)]

use arborist::domain::models::{
    CompletionRequest, Conversation, DatabaseConfig, EnvState, Evaluation, ModelResponse, Program,
    ProgramId, RetryConfig,
};
use arborist::domain::ports::{
    AdvantageSample, Environment, EnvironmentError, ModelError, ModelService, Observation,
    ProgramStore, ProgramUpdate, StoreError, VersionMetadata,
};
use arborist::infrastructure::database::{DatabaseConnection, SqliteProgramStore};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Retry schedule fast enough for tests
pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        jitter: 0.0,
    }
}

/// A store backed by a fresh database file; the directory lives as long as this value
pub struct TestStore {
    pub dir: TempDir,
    pub db: Arc<DatabaseConnection>,
    pub store: Arc<SqliteProgramStore>,
}

impl TestStore {
    pub async fn close(&self) {
        self.db.close().await;
    }
}

pub fn setup_test_store() -> TestStore {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = DatabaseConfig {
        path: dir.path().join("test.db").to_string_lossy().into_owned(),
        min_connections: 1,
        max_connections: 5,
        acquire_timeout_secs: 5,
    };
    let db = Arc::new(DatabaseConnection::new(&config));
    let store = Arc::new(SqliteProgramStore::new(Arc::clone(&db), &fast_retry()));
    TestStore { dir, db, store }
}

pub fn root_conversation() -> Conversation {
    Conversation::root("You write factory automation code.", "print(inventory)", "{}")
}

/// An unpersisted program that has been evaluated
pub fn evaluated_program(code: &str, version: i64, value: f64, advantage: Option<f64>) -> Program {
    let mut program = Program::new(code, root_conversation(), version, format!("v{version}"));
    program.apply_evaluation(Evaluation {
        state: Some(EnvState::new(format!("{{\"after\": \"{code}\"}}"))),
        value: Some(value),
        advantage,
        raw_reward: Some(value),
        ..Evaluation::default()
    });
    program
}

/// A minimal chat-completions body with one choice per text
pub fn choices_body(texts: &[String], prompt_tokens: i64, completion_tokens: i64) -> serde_json::Value {
    let choices: Vec<serde_json::Value> = texts
        .iter()
        .map(|text| json!({"message": {"role": "assistant", "content": text}}))
        .collect();
    json!({
        "choices": choices,
        "usage": {"prompt_tokens": prompt_tokens, "completion_tokens": completion_tokens}
    })
}

/// Model service that answers with scripted completions
///
/// Completions cycle through `texts`. With `fail_every = Some(k)`, every
/// k-th call (1-based) fails with a timeout.
pub struct MockModel {
    pub multi_sample: bool,
    pub texts: Vec<String>,
    pub fail_every: Option<usize>,
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<CompletionRequest>>,
    next_text: AtomicUsize,
}

impl MockModel {
    pub fn new(multi_sample: bool, texts: &[&str]) -> Self {
        Self {
            multi_sample,
            texts: texts.iter().map(|t| (*t).to_string()).collect(),
            fail_every: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            next_text: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn failing_every(mut self, k: usize) -> Self {
        self.fail_every = Some(k);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn take_text(&self) -> String {
        let index = self.next_text.fetch_add(1, Ordering::SeqCst);
        self.texts[index % self.texts.len()].clone()
    }
}

#[async_trait]
impl ModelService for MockModel {
    fn supports_multi_sample(&self) -> bool {
        self.multi_sample
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<ModelResponse, ModelError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(request.clone());
        if self.fail_every.is_some_and(|k| call % k == 0) {
            return Err(ModelError::Timeout);
        }

        let n = usize::try_from(request.n).unwrap();
        let texts: Vec<String> = (0..n).map(|_| self.take_text()).collect();
        let n = i64::try_from(n).unwrap();
        let body = choices_body(&texts, 100 * n, 20 * n);
        Ok(serde_json::from_value(body).unwrap())
    }
}

/// Outcome the mock environment assigns to a program
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    Crash,
    NoValue,
    Value(f64),
}

/// Default scoring: programs mentioning "crash" fail, "idle" get no value,
/// everything else scores its length
pub fn score_by_code(code: &str) -> Outcome {
    if code.contains("crash") {
        Outcome::Crash
    } else if code.contains("idle") {
        Outcome::NoValue
    } else {
        #[allow(clippy::cast_precision_loss)]
        let length = code.len() as f64;
        Outcome::Value(length)
    }
}

/// Environment that scores programs with a plain function
pub struct MockEnvironment {
    pub outcome: fn(&str) -> Outcome,
    /// Number of upcoming `evaluate_batch` calls that fail outright
    pub failures_remaining: AtomicUsize,
    pub observe_calls: AtomicUsize,
    pub evaluate_calls: AtomicUsize,
    pub start_states: Mutex<Vec<EnvState>>,
}

impl MockEnvironment {
    pub fn new() -> Self {
        Self {
            outcome: score_by_code,
            failures_remaining: AtomicUsize::new(0),
            observe_calls: AtomicUsize::new(0),
            evaluate_calls: AtomicUsize::new(0),
            start_states: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn failing_first(self, n: usize) -> Self {
        self.failures_remaining.store(n, Ordering::SeqCst);
        self
    }

    pub fn evaluate_count(&self) -> usize {
        self.evaluate_calls.load(Ordering::SeqCst)
    }

    pub fn observe_count(&self) -> usize {
        self.observe_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Environment for MockEnvironment {
    async fn observe(&self, state: &EnvState) -> Result<Observation, EnvironmentError> {
        self.observe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Observation {
            probe: "print(inspect_inventory())".to_string(),
            output: format!("inventory at {}", state.as_str()),
        })
    }

    async fn evaluate_batch(
        &self,
        programs: Vec<Program>,
        start_state: &EnvState,
    ) -> Result<Vec<Program>, EnvironmentError> {
        self.evaluate_calls.fetch_add(1, Ordering::SeqCst);
        self.start_states.lock().unwrap().push(start_state.clone());

        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(EnvironmentError::Status(
                StatusCode::SERVICE_UNAVAILABLE,
                "server restarting".to_string(),
            ));
        }

        Ok(programs
            .into_iter()
            .map(|mut program| {
                let evaluation = match (self.outcome)(&program.code) {
                    Outcome::Crash => Evaluation::default(),
                    Outcome::NoValue => Evaluation {
                        state: Some(EnvState::new("{\"idle\": true}")),
                        ..Evaluation::default()
                    },
                    Outcome::Value(value) => Evaluation {
                        state: Some(EnvState::new(format!("{{\"value\": {value}}}"))),
                        value: Some(value),
                        raw_reward: Some(value),
                        advantage: Some(value / 10.0),
                        ..Evaluation::default()
                    },
                };
                program.apply_evaluation(evaluation);
                program.conversation = program.conversation.with_turn(&program.code, "ok");
                program
            })
            .collect())
    }
}

/// Store that refuses to insert programs whose code contains `marker`
///
/// The refusal happens before any I/O; every other call goes to `inner`.
pub struct RejectingStore {
    pub inner: Arc<SqliteProgramStore>,
    pub marker: String,
}

#[async_trait]
impl ProgramStore for RejectingStore {
    async fn create_program(&self, program: Program) -> Result<Program, StoreError> {
        if program.code.contains(&self.marker) {
            return Err(StoreError::ConstraintViolation(format!("rejected {}", program.code)));
        }
        self.inner.create_program(program).await
    }

    async fn update_program(
        &self,
        id: ProgramId,
        update: ProgramUpdate,
    ) -> Result<Program, StoreError> {
        self.inner.update_program(id, update).await
    }

    async fn get_by_id(&self, id: ProgramId) -> Result<Option<Program>, StoreError> {
        self.inner.get_by_id(id).await
    }

    async fn get_beam_heads(&self, version: i64, beam_width: u32) -> Result<Vec<Program>, StoreError> {
        self.inner.get_beam_heads(version, beam_width).await
    }

    async fn version_exists(&self, version: i64) -> Result<bool, StoreError> {
        self.inner.version_exists(version).await
    }

    async fn get_version_metadata(&self, version: i64) -> Result<Option<VersionMetadata>, StoreError> {
        self.inner.get_version_metadata(version).await
    }

    async fn get_all_rewards(&self, version: Option<i64>) -> Result<Vec<f64>, StoreError> {
        self.inner.get_all_rewards(version).await
    }

    async fn get_largest_version(&self) -> Result<Option<i64>, StoreError> {
        self.inner.get_largest_version().await
    }

    async fn get_largest_depth(&self, version: i64) -> Result<Option<u32>, StoreError> {
        self.inner.get_largest_depth(version).await
    }

    async fn sample_recent_with_advantage(
        &self,
        version: i64,
        limit: u32,
        max_messages: Option<usize>,
    ) -> Result<Vec<AdvantageSample>, StoreError> {
        self.inner
            .sample_recent_with_advantage(version, limit, max_messages)
            .await
    }

    async fn count_with_advantage(&self, version: i64) -> Result<u64, StoreError> {
        self.inner.count_with_advantage(version).await
    }

    async fn recent_evaluated(&self, version: i64, limit: u32) -> Result<Vec<Program>, StoreError> {
        self.inner.recent_evaluated(version, limit).await
    }
}
