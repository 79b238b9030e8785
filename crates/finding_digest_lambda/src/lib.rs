//! AWS-oriented adapters and handlers for the finding digest function.
//!
//! This crate owns runtime integration details (Lambda handler, model and
//! notification adapters, environment configuration) and exposes a single
//! runtime module boundary for the contract and template primitives.

pub mod adapters;
pub mod config;
pub mod handlers;
pub mod runtime;
pub mod telemetry;
