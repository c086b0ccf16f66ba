//! BOOKIE — fictional-currency sports betting ledger and settlement engine.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod odds;
pub mod provider;
pub mod market;
pub mod storage;
pub mod ledger;
pub mod engine;
