use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::weighting::{adaptive_strength, choose_index, compressed_weights};
use crate::domain::models::{Program, SamplerConfig};
use crate::domain::ports::{ParentSampler, ProgramStore, SamplerError};

/// Number of recent candidates considered per draw
pub const RECENT_WINDOW: u32 = 300;

/// Samples parents in proportion to their compressed advantage
///
/// Advantages in the recent window are standardized, squashed with `tanh`
/// and drawn from. The squashing strength is either fixed or follows a sine
/// wave over the number of eligible programs, so the search alternates
/// between exploiting the best branches and spreading out.
pub struct RewardWeightedSampler {
    store: Arc<dyn ProgramStore>,
    compression_strength: Option<f64>,
    adaptive_period: u32,
    max_conversation_length: Option<usize>,
}

impl RewardWeightedSampler {
    pub fn new(store: Arc<dyn ProgramStore>, config: &SamplerConfig) -> Result<Self, SamplerError> {
        if let Some(strength) = config.compression_strength {
            if !(0.0..=1.0).contains(&strength) {
                return Err(SamplerError::InvalidParameter(format!(
                    "compression_strength must be in [0, 1], got {strength}"
                )));
            }
        }
        if config.adaptive_period == 0 {
            return Err(SamplerError::InvalidParameter(
                "adaptive_period must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            store,
            compression_strength: config.compression_strength,
            adaptive_period: config.adaptive_period,
            max_conversation_length: config.max_conversation_length,
        })
    }

    /// Longest conversation, in messages, a parent may carry
    ///
    /// A conversation of `n` exchanges holds a system message plus `2n`
    /// messages.
    pub fn max_messages(&self) -> Option<usize> {
        self.max_conversation_length
            .map(|length| length.saturating_mul(2).saturating_add(1))
    }

    async fn strength(&self, version: i64) -> Result<f64, SamplerError> {
        match self.compression_strength {
            Some(strength) => Ok(strength),
            None => {
                let count = self.store.count_with_advantage(version).await?;
                Ok(adaptive_strength(count, self.adaptive_period))
            }
        }
    }
}

/// Pick one of `advantages` after compression at `strength`
pub fn select_by_advantage<R: Rng + ?Sized>(
    advantages: &[f64],
    strength: f64,
    rng: &mut R,
) -> Option<usize> {
    choose_index(&compressed_weights(advantages, strength), rng)
}

#[async_trait]
impl ParentSampler for RewardWeightedSampler {
    #[instrument(skip(self), err)]
    async fn sample_parent(&self, version: i64) -> Result<Option<Program>, SamplerError> {
        let candidates = self
            .store
            .sample_recent_with_advantage(version, RECENT_WINDOW, self.max_messages())
            .await?;
        if candidates.is_empty() {
            debug!("no candidates with an advantage yet");
            return Ok(None);
        }

        let strength = self.strength(version).await?;
        let advantages: Vec<f64> = candidates.iter().map(|c| c.advantage).collect();
        let selected = {
            let mut rng = rand::thread_rng();
            select_by_advantage(&advantages, strength, &mut rng)
        };
        let Some(index) = selected else {
            return Ok(None);
        };
        let chosen = candidates[index];

        debug!(
            candidates = candidates.len(),
            strength,
            adaptive = self.compression_strength.is_none(),
            program_id = chosen.id,
            advantage = chosen.advantage,
            "parent sampled"
        );

        let parent = self.store.get_by_id(chosen.id).await?;
        if parent.is_none() {
            warn!(program_id = chosen.id, "sampled program vanished before re-fetch");
        }
        Ok(parent)
    }
}
