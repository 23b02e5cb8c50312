//! Domain layer for the Arborist program search
//!
//! This module contains the search-tree data model and the port traits that
//! infrastructure adapters implement.

pub mod models;
pub mod ports;

pub use ports::errors::{EnvironmentError, ModelError, SamplerError, StoreError};
