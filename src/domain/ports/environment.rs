use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::errors::EnvironmentError;
use crate::domain::models::{EnvState, Program};

/// What the environment reports about a state before any program runs in it
///
/// `probe` is the code that produced the report and `output` is its result;
/// together they seed the first exchange of a root conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub probe: String,
    pub output: String,
}

/// Stateful environment that executes candidate programs
#[async_trait]
pub trait Environment: Send + Sync {
    /// Describe `state` for a fresh root conversation
    async fn observe(&self, state: &EnvState) -> Result<Observation, EnvironmentError>;

    /// Run every program from `start_state`.
    ///
    /// Returns the programs in the same order with `state`, `value`,
    /// `advantage` and `raw_reward` filled in, or `state` left `None` where
    /// the program failed. A failed program is not an error.
    async fn evaluate_batch(
        &self,
        programs: Vec<Program>,
        start_state: &EnvState,
    ) -> Result<Vec<Program>, EnvironmentError>;
}
