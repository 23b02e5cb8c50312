pub mod completion_extractor;
pub mod python_syntax;
pub mod samplers;
pub mod search_orchestrator;

pub use completion_extractor::{CompletionExtractor, Extraction, ExtractionStrategy, ExtractorError};
pub use python_syntax::{GrammarError, PythonSyntax};
pub use samplers::{build_sampler, DiversitySampler, RewardWeightedSampler};
pub use search_orchestrator::{
    IterationReport, OrchestratorDeps, ProgressCallback, SearchError, SearchOrchestrator,
    SearchSettings, SearchSummary,
};
