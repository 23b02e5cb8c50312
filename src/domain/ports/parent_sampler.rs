use async_trait::async_trait;

use super::errors::SamplerError;
use crate::domain::models::Program;

/// Strategy for choosing which persisted program to extend next
///
/// Implementations only read from the store. `Ok(None)` means no eligible
/// parent exists yet and the caller should start a fresh root.
#[async_trait]
pub trait ParentSampler: Send + Sync {
    async fn sample_parent(&self, version: i64) -> Result<Option<Program>, SamplerError>;
}
