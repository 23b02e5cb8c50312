//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces that infrastructure adapters must implement:
//! - ProgramStore: persistence of search-tree nodes
//! - ModelService: language-model completions
//! - Environment: evaluation of candidate programs
//! - ParentSampler: choice of the node to extend next
//!
//! These traits keep the search loop independent of specific infrastructure
//! implementations.

pub mod environment;
pub mod errors;
pub mod model_service;
pub mod parent_sampler;
pub mod program_store;

pub use environment::{Environment, Observation};
pub use errors::{EnvironmentError, ModelError, SamplerError, StoreError};
pub use model_service::ModelService;
pub use parent_sampler::ParentSampler;
pub use program_store::{AdvantageSample, ProgramStore, ProgramUpdate, VersionMetadata};
