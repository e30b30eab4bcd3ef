//! Testdeck daemon library
//!
//! The orchestration core behind `testdeckd`: configuration, script
//! resolution, the execution engine, the run state machine, event fan-out,
//! and the HTTP/WebSocket surface.

pub mod broadcast;
pub mod config;
pub mod engine;
pub mod orchestrator;
pub mod resolver;
pub mod server;

pub use config::DaemonConfig;
pub use orchestrator::Orchestrator;
