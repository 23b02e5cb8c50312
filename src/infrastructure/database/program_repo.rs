use async_trait::async_trait;
use sqlx::{FromRow, Sqlite, Transaction};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::domain::models::{
    Conversation, EnvState, Program, ProgramId, RetryConfig, TokenUsage,
};
use crate::domain::ports::errors::StoreError;
use crate::domain::ports::{AdvantageSample, ProgramStore, ProgramUpdate, VersionMetadata};
use crate::infrastructure::database::connection::DatabaseConnection;
use crate::infrastructure::database::utils::{from_json, parse_datetime, to_json};
use crate::infrastructure::retry::RetryPolicy;

const PROGRAM_COLUMNS: &str = "id, parent_id, code, conversation_json, state_json, value, \
     holdout_value, raw_reward, advantage, depth, version, version_description, model, \
     response, prompt_token_usage, completion_token_usage, meta, achievements_json, \
     created_at";

/// Raw `programs` row
#[derive(Debug, FromRow)]
struct ProgramRow {
    id: i64,
    parent_id: Option<i64>,
    code: String,
    conversation_json: String,
    state_json: Option<String>,
    value: Option<f64>,
    holdout_value: Option<f64>,
    raw_reward: Option<f64>,
    advantage: Option<f64>,
    depth: i64,
    version: i64,
    version_description: String,
    model: Option<String>,
    response: Option<String>,
    prompt_token_usage: Option<i64>,
    completion_token_usage: Option<i64>,
    meta: Option<String>,
    achievements_json: Option<String>,
    created_at: String,
}

impl TryFrom<ProgramRow> for Program {
    type Error = StoreError;

    fn try_from(row: ProgramRow) -> Result<Self, Self::Error> {
        let depth = u32::try_from(row.depth).map_err(|_| {
            StoreError::ConstraintViolation(format!(
                "program {} has invalid depth {}",
                row.id, row.depth
            ))
        })?;
        let conversation: Conversation = serde_json::from_str(&row.conversation_json)?;
        let token_usage = match (row.prompt_token_usage, row.completion_token_usage) {
            (None, None) => None,
            (prompt, completion) => Some(TokenUsage::new(
                prompt.unwrap_or_default(),
                completion.unwrap_or_default(),
            )),
        };

        Ok(Self {
            id: Some(row.id),
            parent_id: row.parent_id,
            code: row.code,
            conversation,
            state: row.state_json.map(EnvState::new),
            value: row.value,
            holdout_value: row.holdout_value,
            raw_reward: row.raw_reward,
            advantage: row.advantage,
            depth,
            version: row.version,
            version_description: row.version_description,
            model: row.model,
            response: row.response,
            token_usage,
            meta: from_json(row.meta.as_deref())?,
            achievements: from_json(row.achievements_json.as_deref())?,
            created_at: Some(parse_datetime(&row.created_at)?),
        })
    }
}

/// Merge the best-per-depth set with the global top set into the beam.
///
/// Rows are deduplicated by id, ordered by value descending (ties by id
/// ascending) and cut to `beam_width`. Rows without a value are ignored.
pub fn rank_beam_heads(
    best_per_depth: Vec<Program>,
    top_overall: Vec<Program>,
    beam_width: usize,
) -> Vec<Program> {
    let mut seen = HashSet::new();
    let mut heads: Vec<Program> = best_per_depth
        .into_iter()
        .chain(top_overall)
        .filter(|p| p.value.is_some())
        .filter(|p| p.id.is_none_or(|id| seen.insert(id)))
        .collect();

    heads.sort_by(|a, b| {
        let va = a.value.unwrap_or(f64::NEG_INFINITY);
        let vb = b.value.unwrap_or(f64::NEG_INFINITY);
        vb.total_cmp(&va).then_with(|| a.id.cmp(&b.id))
    });
    heads.truncate(beam_width);
    heads
}

/// `SQLite` implementation of [`ProgramStore`]
///
/// Every public operation is one unit of work on a pooled connection, wrapped
/// in the retry policy so lock contention and pool timeouts are absorbed.
/// Writes that check invariants run inside a transaction.
pub struct SqliteProgramStore {
    db: Arc<DatabaseConnection>,
    retry: RetryPolicy<StoreError>,
}

impl SqliteProgramStore {
    pub fn new(db: Arc<DatabaseConnection>, retry: &RetryConfig) -> Self {
        Self {
            db,
            retry: RetryPolicy::from_config(retry, StoreError::is_transient),
        }
    }

    pub fn with_retry_policy(db: Arc<DatabaseConnection>, retry: RetryPolicy<StoreError>) -> Self {
        Self { db, retry }
    }

    fn select_programs(clause: &str) -> String {
        format!("SELECT {PROGRAM_COLUMNS} FROM programs {clause}")
    }

    async fn fetch_program(
        tx: &mut Transaction<'_, Sqlite>,
        id: ProgramId,
    ) -> Result<Option<Program>, StoreError> {
        let row: Option<ProgramRow> = sqlx::query_as(&Self::select_programs("WHERE id = ?"))
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        row.map(Program::try_from).transpose()
    }

    /// The parent check, the depth derivation and the write are one statement,
    /// run to completion and committed before the row is returned.
    ///
    /// Rows are never deleted and their depth never changes after insert.
    async fn insert_once(&self, program: &Program) -> Result<Program, StoreError> {
        let pool = self.db.pool().await?;
        let mut tx = pool.begin().await?;

        let usage = program.token_usage;
        let sql = format!(
            "INSERT INTO programs (parent_id, code, conversation_json, state_json, value, \
             holdout_value, raw_reward, advantage, depth, version, version_description, model, \
             response, token_usage, prompt_token_usage, completion_token_usage, meta, \
             achievements_json) \
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, \
             CASE WHEN ?1 IS NULL THEN 0 \
             ELSE (SELECT p.depth + 1 FROM programs p WHERE p.id = ?1 AND p.version = ?9) END, \
             ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17 \
             WHERE ?1 IS NULL \
             OR EXISTS (SELECT 1 FROM programs p WHERE p.id = ?1 AND p.version = ?9) \
             RETURNING {PROGRAM_COLUMNS}"
        );
        let rows: Vec<ProgramRow> = sqlx::query_as(&sql)
            .bind(program.parent_id)
            .bind(&program.code)
            .bind(to_json(&program.conversation)?)
            .bind(program.state.as_ref().map(EnvState::as_str))
            .bind(program.value)
            .bind(program.holdout_value)
            .bind(program.raw_reward)
            .bind(program.advantage)
            .bind(program.version)
            .bind(&program.version_description)
            .bind(program.model.as_deref())
            .bind(program.response.as_deref())
            .bind(usage.map(|u| u.total()))
            .bind(usage.map(|u| u.prompt_tokens))
            .bind(usage.map(|u| u.completion_tokens))
            .bind(to_json(&program.meta)?)
            .bind(to_json(&program.achievements)?)
            .fetch_all(&mut *tx)
            .await?;

        let Some(row) = rows.into_iter().next() else {
            return Err(match program.parent_id {
                Some(parent_id) => StoreError::ParentNotFound {
                    parent_id,
                    version: program.version,
                },
                None => StoreError::ConstraintViolation("root insert returned no row".to_string()),
            });
        };

        let stored = Program::try_from(row)?;
        tx.commit().await?;
        if stored.depth != program.depth {
            debug!(
                supplied = program.depth,
                derived = stored.depth,
                "replaced supplied depth with parent-derived depth"
            );
        }
        Ok(stored)
    }

    async fn update_once(
        &self,
        id: ProgramId,
        update: &ProgramUpdate,
    ) -> Result<Program, StoreError> {
        let pool = self.db.pool().await?;
        let mut tx = pool.begin().await?;

        let mut program = Self::fetch_program(&mut tx, id)
            .await?
            .ok_or(StoreError::ProgramNotFound(id))?;
        if update.is_empty() {
            return Ok(program);
        }

        let update = update.clone();
        if let Some(code) = update.code {
            program.code = code;
        }
        if let Some(state) = update.state {
            program.state = Some(state);
        }
        if let Some(value) = update.value {
            program.value = Some(value);
        }
        if let Some(holdout_value) = update.holdout_value {
            program.holdout_value = Some(holdout_value);
        }
        if let Some(raw_reward) = update.raw_reward {
            program.raw_reward = Some(raw_reward);
        }
        if let Some(advantage) = update.advantage {
            program.advantage = Some(advantage);
        }
        if let Some(meta) = update.meta {
            program.meta = meta;
        }
        if let Some(achievements) = update.achievements {
            program.achievements = achievements;
        }
        if let Some(violation) = program.reward_consistency_violation() {
            return Err(StoreError::ConstraintViolation(format!("program {id}: {violation}")));
        }

        let sql = format!(
            "UPDATE programs SET code = ?, state_json = ?, value = ?, holdout_value = ?, \
             raw_reward = ?, advantage = ?, meta = ?, achievements_json = ? \
             WHERE id = ? RETURNING {PROGRAM_COLUMNS}"
        );
        let rows: Vec<ProgramRow> = sqlx::query_as(&sql)
            .bind(&program.code)
            .bind(program.state.as_ref().map(EnvState::as_str))
            .bind(program.value)
            .bind(program.holdout_value)
            .bind(program.raw_reward)
            .bind(program.advantage)
            .bind(to_json(&program.meta)?)
            .bind(to_json(&program.achievements)?)
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;
        let row = rows.into_iter().next().ok_or(StoreError::ProgramNotFound(id))?;

        tx.commit().await?;
        Program::try_from(row)
    }

    async fn get_by_id_once(&self, id: ProgramId) -> Result<Option<Program>, StoreError> {
        let pool = self.db.pool().await?;
        let row: Option<ProgramRow> = sqlx::query_as(&Self::select_programs("WHERE id = ?"))
            .bind(id)
            .fetch_optional(pool)
            .await?;
        row.map(Program::try_from).transpose()
    }

    async fn beam_heads_once(&self, version: i64, beam_width: u32) -> Result<Vec<Program>, StoreError> {
        let pool = self.db.pool().await?;
        let width = i64::from(beam_width);

        let best_per_depth: Vec<ProgramRow> = sqlx::query_as(&format!(
            "SELECT {PROGRAM_COLUMNS} FROM ( \
                 SELECT *, ROW_NUMBER() OVER (PARTITION BY depth ORDER BY value DESC, id ASC) AS depth_rank \
                 FROM programs \
                 WHERE version = ? AND state_json IS NOT NULL AND value IS NOT NULL \
             ) WHERE depth_rank = 1 \
             ORDER BY value DESC, id ASC LIMIT ?"
        ))
        .bind(version)
        .bind(width)
        .fetch_all(pool)
        .await?;

        let top_overall: Vec<ProgramRow> = sqlx::query_as(&Self::select_programs(
            "WHERE version = ? AND state_json IS NOT NULL AND value IS NOT NULL \
             ORDER BY value DESC, id ASC LIMIT ?",
        ))
        .bind(version)
        .bind(width * 2)
        .fetch_all(pool)
        .await?;

        let best_per_depth = best_per_depth
            .into_iter()
            .map(Program::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let top_overall = top_overall
            .into_iter()
            .map(Program::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rank_beam_heads(
            best_per_depth,
            top_overall,
            usize::try_from(beam_width).unwrap_or(usize::MAX),
        ))
    }

    async fn version_exists_once(&self, version: i64) -> Result<bool, StoreError> {
        let pool = self.db.pool().await?;
        let (exists,): (i64,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM programs WHERE version = ?)")
                .bind(version)
                .fetch_one(pool)
                .await?;
        Ok(exists != 0)
    }

    async fn version_metadata_once(
        &self,
        version: i64,
    ) -> Result<Option<VersionMetadata>, StoreError> {
        let pool = self.db.pool().await?;
        let row: Option<(String, Option<String>)> = sqlx::query_as(
            "SELECT version_description, model FROM programs \
             WHERE version = ? ORDER BY id ASC LIMIT 1",
        )
        .bind(version)
        .fetch_optional(pool)
        .await?;
        Ok(row.map(|(version_description, model)| VersionMetadata {
            version_description,
            model,
        }))
    }

    async fn all_rewards_once(&self, version: Option<i64>) -> Result<Vec<f64>, StoreError> {
        let pool = self.db.pool().await?;
        let rows: Vec<(f64,)> = sqlx::query_as(
            "SELECT value FROM programs \
             WHERE value IS NOT NULL AND state_json IS NOT NULL \
             AND (?1 IS NULL OR version = ?1) \
             ORDER BY id ASC",
        )
        .bind(version)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(|(value,)| value).collect())
    }

    async fn largest_version_once(&self) -> Result<Option<i64>, StoreError> {
        let pool = self.db.pool().await?;
        let (version,): (Option<i64>,) = sqlx::query_as("SELECT MAX(version) FROM programs")
            .fetch_one(pool)
            .await?;
        Ok(version)
    }

    async fn largest_depth_once(&self, version: i64) -> Result<Option<u32>, StoreError> {
        let pool = self.db.pool().await?;
        let (depth,): (Option<i64>,) =
            sqlx::query_as("SELECT MAX(depth) FROM programs WHERE version = ?")
                .bind(version)
                .fetch_one(pool)
                .await?;
        depth
            .map(|d| {
                u32::try_from(d).map_err(|_| {
                    StoreError::ConstraintViolation(format!("invalid depth {d} in version {version}"))
                })
            })
            .transpose()
    }

    async fn recent_with_advantage_once(
        &self,
        version: i64,
        limit: u32,
        max_messages: Option<usize>,
    ) -> Result<Vec<AdvantageSample>, StoreError> {
        let pool = self.db.pool().await?;
        let max_messages = max_messages.map(|m| i64::try_from(m).unwrap_or(i64::MAX));
        let rows: Vec<(i64, f64)> = sqlx::query_as(
            "SELECT id, advantage FROM programs \
             WHERE version = ?1 AND advantage IS NOT NULL AND state_json IS NOT NULL \
             AND (?2 IS NULL OR json_array_length(conversation_json, '$.messages') <= ?2) \
             ORDER BY created_at DESC, id DESC LIMIT ?3",
        )
        .bind(version)
        .bind(max_messages)
        .bind(i64::from(limit))
        .fetch_all(pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, advantage)| AdvantageSample { id, advantage })
            .collect())
    }

    async fn count_with_advantage_once(&self, version: i64) -> Result<u64, StoreError> {
        let pool = self.db.pool().await?;
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM programs \
             WHERE version = ? AND advantage IS NOT NULL AND state_json IS NOT NULL",
        )
        .bind(version)
        .fetch_one(pool)
        .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn recent_evaluated_once(
        &self,
        version: i64,
        limit: u32,
    ) -> Result<Vec<Program>, StoreError> {
        let pool = self.db.pool().await?;
        let rows: Vec<ProgramRow> = sqlx::query_as(&Self::select_programs(
            "WHERE version = ? AND state_json IS NOT NULL AND value IS NOT NULL \
             ORDER BY created_at DESC, id DESC LIMIT ?",
        ))
        .bind(version)
        .bind(i64::from(limit))
        .fetch_all(pool)
        .await?;
        rows.into_iter().map(Program::try_from).collect()
    }
}

#[async_trait]
impl ProgramStore for SqliteProgramStore {
    #[instrument(skip(self, program), fields(version = program.version, parent_id = ?program.parent_id), err)]
    async fn create_program(&self, program: Program) -> Result<Program, StoreError> {
        if let Some(violation) = program.reward_consistency_violation() {
            return Err(StoreError::ConstraintViolation(violation));
        }
        let created = self
            .retry
            .execute("create_program", || self.insert_once(&program))
            .await?;
        debug!(id = ?created.id, depth = created.depth, "program created");
        Ok(created)
    }

    #[instrument(skip(self, update), err)]
    async fn update_program(
        &self,
        id: ProgramId,
        update: ProgramUpdate,
    ) -> Result<Program, StoreError> {
        self.retry
            .execute("update_program", || self.update_once(id, &update))
            .await
    }

    #[instrument(skip(self), err)]
    async fn get_by_id(&self, id: ProgramId) -> Result<Option<Program>, StoreError> {
        self.retry
            .execute("get_by_id", || self.get_by_id_once(id))
            .await
    }

    #[instrument(skip(self), err)]
    async fn get_beam_heads(
        &self,
        version: i64,
        beam_width: u32,
    ) -> Result<Vec<Program>, StoreError> {
        self.retry
            .execute("get_beam_heads", || self.beam_heads_once(version, beam_width))
            .await
    }

    async fn version_exists(&self, version: i64) -> Result<bool, StoreError> {
        self.retry
            .execute("version_exists", || self.version_exists_once(version))
            .await
    }

    async fn get_version_metadata(
        &self,
        version: i64,
    ) -> Result<Option<VersionMetadata>, StoreError> {
        self.retry
            .execute("get_version_metadata", || self.version_metadata_once(version))
            .await
    }

    async fn get_all_rewards(&self, version: Option<i64>) -> Result<Vec<f64>, StoreError> {
        self.retry
            .execute("get_all_rewards", || self.all_rewards_once(version))
            .await
    }

    async fn get_largest_version(&self) -> Result<Option<i64>, StoreError> {
        self.retry
            .execute("get_largest_version", || self.largest_version_once())
            .await
    }

    async fn get_largest_depth(&self, version: i64) -> Result<Option<u32>, StoreError> {
        self.retry
            .execute("get_largest_depth", || self.largest_depth_once(version))
            .await
    }

    #[instrument(skip(self), err)]
    async fn sample_recent_with_advantage(
        &self,
        version: i64,
        limit: u32,
        max_messages: Option<usize>,
    ) -> Result<Vec<AdvantageSample>, StoreError> {
        self.retry
            .execute("sample_recent_with_advantage", || {
                self.recent_with_advantage_once(version, limit, max_messages)
            })
            .await
    }

    async fn count_with_advantage(&self, version: i64) -> Result<u64, StoreError> {
        self.retry
            .execute("count_with_advantage", || self.count_with_advantage_once(version))
            .await
    }

    #[instrument(skip(self), err)]
    async fn recent_evaluated(
        &self,
        version: i64,
        limit: u32,
    ) -> Result<Vec<Program>, StoreError> {
        self.retry
            .execute("recent_evaluated", || self.recent_evaluated_once(version, limit))
            .await
    }

    async fn close(&self) {
        self.db.close().await;
    }
}
