//! Orchestration service for UCI chess engines
//!
//! Spawns engine child processes, speaks the UCI line protocol over their
//! standard streams, serializes concurrent requests per engine, tracks live
//! search telemetry per request, and exposes the HTTP surface for move
//! requests, status polling and MultiPV hints.

pub mod api;
pub mod error;
pub mod supervisor;
pub mod uci_client;

pub use error::ApiError;
pub use supervisor::{Supervisor, SupervisorConfig};
pub use uci_client::{UciClient, UciClientError};
