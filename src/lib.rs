//! stockscan: batch stock scanner.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod metrics;
pub mod scoring;
pub mod data;
pub mod engine;
pub mod export;
pub mod license;
pub mod storage;
pub mod dashboard;
