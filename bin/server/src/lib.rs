//! flowloom HTTP server.
//!
//! Wires the engine, job queue, worker, scheduler, change watcher and
//! retention sweeper together and exposes them over an axum API.

pub mod api;
pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod state;
