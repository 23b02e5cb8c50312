use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::errors::StoreError;
use crate::domain::models::{EnvState, Program, ProgramId};

/// Identifier and advantage of one sampling candidate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdvantageSample {
    pub id: ProgramId,
    pub advantage: f64,
}

/// Descriptive fields shared by every program of a version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMetadata {
    pub version_description: String,
    pub model: Option<String>,
}

/// Field updates for a corrective write
///
/// Only the fields set to `Some` are written. Identity and tree-shape fields
/// (`parent_id`, `depth`, `version`) cannot be changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgramUpdate {
    pub code: Option<String>,
    pub state: Option<EnvState>,
    pub value: Option<f64>,
    pub holdout_value: Option<f64>,
    pub raw_reward: Option<f64>,
    pub advantage: Option<f64>,
    pub meta: Option<Map<String, Value>>,
    pub achievements: Option<BTreeMap<String, f64>>,
}

impl ProgramUpdate {
    pub const fn is_empty(&self) -> bool {
        self.code.is_none()
            && self.state.is_none()
            && self.value.is_none()
            && self.holdout_value.is_none()
            && self.raw_reward.is_none()
            && self.advantage.is_none()
            && self.meta.is_none()
            && self.achievements.is_none()
    }
}

/// Persistent store of search-tree nodes, partitioned by version
#[async_trait]
pub trait ProgramStore: Send + Sync {
    /// Insert a program and return it with its id, depth and timestamp set.
    ///
    /// The parent, if any, must already exist in the same version; the stored
    /// depth is always derived from it.
    async fn create_program(&self, program: Program) -> Result<Program, StoreError>;

    /// Apply a corrective write and return the updated row
    async fn update_program(
        &self,
        id: ProgramId,
        update: ProgramUpdate,
    ) -> Result<Program, StoreError>;

    async fn get_by_id(&self, id: ProgramId) -> Result<Option<Program>, StoreError>;

    /// Top-value, depth-diverse evaluated programs of a version
    async fn get_beam_heads(
        &self,
        version: i64,
        beam_width: u32,
    ) -> Result<Vec<Program>, StoreError>;

    async fn version_exists(&self, version: i64) -> Result<bool, StoreError>;

    async fn get_version_metadata(
        &self,
        version: i64,
    ) -> Result<Option<VersionMetadata>, StoreError>;

    /// Values of every evaluated program, optionally limited to one version
    async fn get_all_rewards(&self, version: Option<i64>) -> Result<Vec<f64>, StoreError>;

    async fn get_largest_version(&self) -> Result<Option<i64>, StoreError>;

    async fn get_largest_depth(&self, version: i64) -> Result<Option<u32>, StoreError>;

    /// Most recent evaluated programs with an advantage, newest first.
    ///
    /// With `max_messages`, programs whose conversation is longer are skipped.
    async fn sample_recent_with_advantage(
        &self,
        version: i64,
        limit: u32,
        max_messages: Option<usize>,
    ) -> Result<Vec<AdvantageSample>, StoreError>;

    /// Number of evaluated programs with an advantage in a version
    async fn count_with_advantage(&self, version: i64) -> Result<u64, StoreError>;

    /// Most recent evaluated programs (state and value present), newest first
    async fn recent_evaluated(&self, version: i64, limit: u32)
        -> Result<Vec<Program>, StoreError>;

    /// Release pooled resources. Further calls may reopen them.
    async fn close(&self) {}
}
