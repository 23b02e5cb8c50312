pub mod config;
pub mod conversation;
pub mod generation;
pub mod program;

pub use config::{
    Config, DatabaseConfig, EnvironmentConfig, ExtractionConfig, LogConfig, LogFormat,
    ModelConfig, ModelProvider, RetryConfig, RotationPolicy, SamplerConfig, SamplerKind,
    SearchConfig,
};
pub use conversation::{Conversation, Message, Role};
pub use generation::{Completion, CompletionRequest, ModelResponse};
pub use program::{EnvState, Evaluation, Program, ProgramId, TokenUsage};
