//! Parent-selection policies
//!
//! - `RewardWeightedSampler`: advantage-weighted draw with adaptive compression
//! - `DiversitySampler`: softmax over outcome-diversity scores

pub mod diversity;
pub mod reward_weighted;
pub mod weighting;

pub use diversity::{AchievementRarityScorer, DiversitySampler, OutcomeScorer};
pub use reward_weighted::RewardWeightedSampler;

use std::sync::Arc;

use crate::domain::models::{SamplerConfig, SamplerKind};
use crate::domain::ports::{ParentSampler, ProgramStore, SamplerError};

/// Build the sampler selected by `config.kind`
pub fn build_sampler(
    config: &SamplerConfig,
    store: Arc<dyn ProgramStore>,
) -> Result<Arc<dyn ParentSampler>, SamplerError> {
    Ok(match config.kind {
        SamplerKind::RewardWeighted => Arc::new(RewardWeightedSampler::new(store, config)?),
        SamplerKind::Diversity => Arc::new(DiversitySampler::new(store, config)?),
    })
}
