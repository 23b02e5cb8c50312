//! Infrastructure layer module
//!
//! This module contains all infrastructure adapters and external integrations:
//! - Database implementation of the program store (`SQLite` with sqlx)
//! - Model-service HTTP client
//! - Environment HTTP adapter
//! - Configuration management
//! - Logging infrastructure
//! - Retry policy shared by the remote clients
//!
//! Infrastructure implementations satisfy the port traits defined in the domain layer.

pub mod config;
pub mod database;
pub mod environment;
pub mod llm;
pub mod logging;
pub mod retry;
