//! Node access: rate limiting, retry policy and JSON-RPC transport

pub mod caller;
pub mod rate_limiter;
pub mod transport;

pub use caller::{ResilientCaller, RetryPolicy};
pub use rate_limiter::RateLimiter;
pub use transport::NodeClient;
