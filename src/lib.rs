//! SYNDICATE — Multi-account wager placement & settlement engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod relay;
pub mod credentials;
pub mod distribution;
pub mod platforms;
pub mod engine;
pub mod storage;
pub mod server;
