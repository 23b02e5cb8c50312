use async_trait::async_trait;

use super::errors::ModelError;
use crate::domain::models::{CompletionRequest, ModelResponse};

/// Language-model completion service
#[async_trait]
pub trait ModelService: Send + Sync {
    /// Whether one call can return `request.n` samples
    fn supports_multi_sample(&self) -> bool;

    /// Request completions for a conversation
    async fn complete(&self, request: &CompletionRequest) -> Result<ModelResponse, ModelError>;
}
