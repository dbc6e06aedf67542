//! Core data models for llm-throttle.
//!
//! - `config`: admission limits and the validated `Policy`
//! - `error`: configuration, execution and payload errors
//! - `payload`: opaque chat payloads and client-side helpers

mod config;
mod error;
mod payload;

pub use config::*;
pub use error::*;
pub use payload::*;
