//! llm-throttle - Admission control for chat completion executors.
//!
//! ## Architecture
//!
//! ```text
//! caller ──► RateLimitManager::execute ──► admission gate ──► Executor::execute
//! ```
//!
//! A `RateLimitManager` enforces exactly one policy:
//! - **Fixed concurrency**: at most N downstream calls in flight
//! - **Fixed rate**: calls released at a steady R per second, optionally
//!   capped by a concurrency gate applied after the rate gate
//!
//! The downstream side is any `Executor`; `ChatExecutor` adapts a
//! `ChatClient` (prepare hook + send) into one.
//!
//! ## Example
//!
//! ```no_run
//! use llm_throttle::{LimitConfig, RateLimitManager, SimulatedExecutor};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = Arc::new(SimulatedExecutor::new(Duration::from_millis(200)));
//! let manager = RateLimitManager::new(executor, LimitConfig::rps(10.0))?;
//!
//! let response = manager.execute(42).await?;
//! assert_eq!(response, 42);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod models;

// Re-exports for convenience
pub use client::{
    AdmissionStats, ChatClient, ChatExecutor, Executor, RateGate, RateLimitManager,
    SimulatedExecutor, SimulatedFailure,
};
pub use models::{
    ChatPayload, ChatResult, Config, ConfigError, ExecuteError, LimitConfig, PayloadError,
    Policy, SimulationConfig,
};
