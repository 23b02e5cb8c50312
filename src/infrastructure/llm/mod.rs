//! HTTP client for language-model completion services

pub mod client;
pub mod types;

pub use client::HttpModelClient;
