//! Adapters for the external program-execution environment

pub mod http;

pub use http::HttpEnvironment;
