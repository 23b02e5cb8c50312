//! Arborist - tree-structured program search
//!
//! Arborist grows a tree of candidate programs. Each iteration picks a parent
//! node, asks a language model for continuations of the parent's
//! conversation, extracts runnable Python from the completions, evaluates the
//! candidates in an external environment and stores the results as children.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models and the ports the search depends on
//! - **Service Layer** (`services`): extraction, parent sampling and the search loop
//! - **Infrastructure Layer** (`infrastructure`): `SQLite` store, HTTP clients,
//!   configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use arborist::services::{SearchOrchestrator, SearchSettings};
//!
//! let mut orchestrator = SearchOrchestrator::new(deps, SearchSettings::from_config(&config)).await?;
//! let summary = orchestrator.run_search(100, 4, false).await?;
//! ```

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::models::{Config, Conversation, EnvState, Program, ProgramId};
pub use domain::ports::{Environment, ModelService, ParentSampler, ProgramStore};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use infrastructure::database::{DatabaseConnection, SqliteProgramStore};
pub use services::{CompletionExtractor, SearchError, SearchOrchestrator, SearchSettings};
