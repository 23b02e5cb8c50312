use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::conversation::Conversation;

/// Store-assigned program identifier
pub type ProgramId = i64;

/// Opaque serialized environment snapshot
///
/// The search never looks inside a state; it only hands it back to the
/// environment as the starting point for a child's evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvState(String);

impl EnvState {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

/// Token counters reported by the model service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
}

impl TokenUsage {
    pub const fn new(prompt_tokens: i64, completion_tokens: i64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub const fn total(&self) -> i64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Split a batch-level usage evenly across `n` samples.
    #[must_use]
    pub fn split(&self, n: usize) -> Self {
        let n = i64::try_from(n.max(1)).unwrap_or(i64::MAX);
        Self {
            prompt_tokens: self.prompt_tokens / n,
            completion_tokens: self.completion_tokens / n,
        }
    }
}

/// Outcome of evaluating one program in the environment
///
/// A `None` state marks a failed evaluation; in that case any reward fields
/// are discarded when the evaluation is applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub state: Option<EnvState>,
    pub value: Option<f64>,
    pub holdout_value: Option<f64>,
    pub raw_reward: Option<f64>,
    pub advantage: Option<f64>,
    #[serde(default)]
    pub achievements: BTreeMap<String, f64>,
}

/// One node of the search tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Assigned by the store on insert
    pub id: Option<ProgramId>,
    pub parent_id: Option<ProgramId>,
    pub code: String,
    pub conversation: Conversation,
    pub state: Option<EnvState>,
    pub value: Option<f64>,
    pub holdout_value: Option<f64>,
    pub raw_reward: Option<f64>,
    pub advantage: Option<f64>,
    pub depth: u32,
    pub version: i64,
    pub version_description: String,
    pub model: Option<String>,
    /// Raw completion text the code was extracted from
    pub response: Option<String>,
    pub token_usage: Option<TokenUsage>,
    pub meta: Map<String, Value>,
    pub achievements: BTreeMap<String, f64>,
    /// Assigned by the store on insert
    pub created_at: Option<DateTime<Utc>>,
}

impl Program {
    /// Create an unevaluated, unpersisted root-level program.
    pub fn new(
        code: impl Into<String>,
        conversation: Conversation,
        version: i64,
        version_description: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            parent_id: None,
            code: code.into(),
            conversation,
            state: None,
            value: None,
            holdout_value: None,
            raw_reward: None,
            advantage: None,
            depth: 0,
            version,
            version_description: version_description.into(),
            model: None,
            response: None,
            token_usage: None,
            meta: Map::new(),
            achievements: BTreeMap::new(),
            created_at: None,
        }
    }

    /// Make this program a child of `parent`, fixing `parent_id` and `depth`.
    pub fn attach_parent(&mut self, parent: Option<&Self>) {
        match parent {
            Some(parent) => {
                self.parent_id = parent.id;
                self.depth = parent.depth + 1;
            }
            None => {
                self.parent_id = None;
                self.depth = 0;
            }
        }
    }

    /// Record an environment outcome, keeping state and rewards in step.
    pub fn apply_evaluation(&mut self, evaluation: Evaluation) {
        if evaluation.state.is_none() {
            self.state = None;
            self.value = None;
            self.holdout_value = None;
            self.raw_reward = None;
            self.advantage = None;
            return;
        }

        self.state = evaluation.state;
        self.value = evaluation.value;
        self.holdout_value = evaluation.holdout_value;
        self.raw_reward = evaluation.raw_reward;
        self.advantage = evaluation.advantage;
        self.achievements = evaluation.achievements;
    }

    pub const fn is_evaluated(&self) -> bool {
        self.state.is_some()
    }

    /// Check the state/reward atomicity rule.
    ///
    /// Returns a description of the violation, if any.
    pub fn reward_consistency_violation(&self) -> Option<String> {
        if self.state.is_some() {
            return None;
        }
        if self.value.is_some() || self.advantage.is_some() {
            return Some("value/advantage present without an environment state".to_string());
        }
        None
    }

    pub fn set_meta(&mut self, key: &str, value: impl Into<Value>) {
        self.meta.insert(key.to_string(), value.into());
    }
}
