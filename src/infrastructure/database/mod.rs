//! `SQLite` persistence for search-tree nodes

pub mod connection;
pub mod program_repo;
pub mod utils;

pub use connection::DatabaseConnection;
pub use program_repo::{rank_beam_heads, SqliteProgramStore};
