//! Shared finding digest domain primitives.
//!
//! This crate owns the finding envelope, the model request/response contract
//! and the prompt and email templates. It intentionally excludes AWS SDK and
//! Lambda runtime concerns.

pub mod contract;
pub mod settings;
pub mod templates;
