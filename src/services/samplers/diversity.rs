use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::weighting::{argmax, choose_index, softmax, z_scores};
use crate::domain::models::{Program, SamplerConfig};
use crate::domain::ports::{ParentSampler, ProgramStore, SamplerError};

/// Temperatures at or below this select greedily
pub const GREEDY_TEMPERATURE: f64 = 1e-6;

/// Scores each program of a window; higher is more worth extending
pub trait OutcomeScorer: Send + Sync {
    /// One score per program, in window order
    fn score(&self, window: &[Program]) -> Vec<f64>;
}

/// Rewards rare achievements on top of standardized value
///
/// A program scores its value's z-score within the window plus the mean
/// surprisal `-ln(frequency)` of the achievements it reached, where frequency
/// is the share of window programs that reached the same achievement.
#[derive(Debug, Clone, Copy, Default)]
pub struct AchievementRarityScorer;

impl OutcomeScorer for AchievementRarityScorer {
    fn score(&self, window: &[Program]) -> Vec<f64> {
        if window.is_empty() {
            return Vec::new();
        }

        let values: Vec<f64> = window.iter().map(|p| p.value.unwrap_or(0.0)).collect();
        let z = z_scores(&values);

        let mut reached: HashMap<&str, usize> = HashMap::new();
        for program in window {
            for name in achieved(program) {
                *reached.entry(name).or_default() += 1;
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let total = window.len() as f64;
        window
            .iter()
            .zip(z)
            .map(|(program, z)| {
                let surprisals: Vec<f64> = achieved(program)
                    .filter_map(|name| reached.get(name))
                    .map(|&count| {
                        #[allow(clippy::cast_precision_loss)]
                        let frequency = count as f64 / total;
                        -frequency.ln()
                    })
                    .collect();
                if surprisals.is_empty() {
                    z
                } else {
                    #[allow(clippy::cast_precision_loss)]
                    let mean = surprisals.iter().sum::<f64>() / surprisals.len() as f64;
                    z + mean
                }
            })
            .collect()
    }
}

fn achieved(program: &Program) -> impl Iterator<Item = &str> {
    program
        .achievements
        .iter()
        .filter(|(_, count)| **count > 0.0)
        .map(|(name, _)| name.as_str())
}

/// Pick an index from `scores`: softmax draw, or argmax when nearly cold
pub fn select_by_score<R: Rng + ?Sized>(
    scores: &[f64],
    temperature: f64,
    rng: &mut R,
) -> Option<usize> {
    if temperature <= GREEDY_TEMPERATURE {
        return argmax(scores);
    }
    choose_index(&softmax(scores, temperature), rng)
}

/// Samples parents to broaden the set of outcomes reached
///
/// High temperature approaches a uniform draw over the window; temperature
/// near zero always takes the best-scoring program.
pub struct DiversitySampler {
    store: Arc<dyn ProgramStore>,
    scorer: Arc<dyn OutcomeScorer>,
    window_size: u32,
    temperature: f64,
}

impl DiversitySampler {
    pub fn new(store: Arc<dyn ProgramStore>, config: &SamplerConfig) -> Result<Self, SamplerError> {
        Self::with_scorer(store, Arc::new(AchievementRarityScorer), config)
    }

    pub fn with_scorer(
        store: Arc<dyn ProgramStore>,
        scorer: Arc<dyn OutcomeScorer>,
        config: &SamplerConfig,
    ) -> Result<Self, SamplerError> {
        if config.window_size == 0 {
            return Err(SamplerError::InvalidParameter(
                "window_size must be at least 1".to_string(),
            ));
        }
        if !config.temperature.is_finite() || config.temperature < 0.0 {
            return Err(SamplerError::InvalidParameter(format!(
                "temperature must be a non-negative number, got {}",
                config.temperature
            )));
        }

        Ok(Self {
            store,
            scorer,
            window_size: config.window_size,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl ParentSampler for DiversitySampler {
    #[instrument(skip(self), err)]
    async fn sample_parent(&self, version: i64) -> Result<Option<Program>, SamplerError> {
        let mut window = self.store.recent_evaluated(version, self.window_size).await?;
        if window.is_empty() {
            debug!("no evaluated programs yet");
            return Ok(None);
        }

        let scores = self.scorer.score(&window);
        let selected = {
            let mut rng = rand::thread_rng();
            select_by_score(&scores, self.temperature, &mut rng)
        };
        let Some(index) = selected.filter(|&i| i < window.len()) else {
            return Ok(None);
        };

        let parent = window.swap_remove(index);
        debug!(
            window = scores.len(),
            temperature = self.temperature,
            program_id = ?parent.id,
            score = scores[index],
            "parent sampled"
        );
        Ok(Some(parent))
    }
}
