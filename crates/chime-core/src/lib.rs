//! Service plumbing shared by chime services: configuration loading, tracing
//! setup, request ids, health probes and the JSON response envelope.

pub mod config;
pub mod error;
pub mod health;
pub mod middleware;
pub mod response;
pub mod serde;
pub mod tracing;
