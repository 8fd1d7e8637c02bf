//! Database repositories for the flowloom server.

pub mod run_store;

pub use run_store::PgRunStore;
