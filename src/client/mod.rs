//! Client module: executor seam, admission gates and the manager.

mod executor;
mod manager;
mod rate_limiter;
mod simulated;

pub use executor::*;
pub use manager::*;
pub use rate_limiter::*;
pub use simulated::*;
