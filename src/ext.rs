//! Extension contracts invoked around agent calls: header providers for tool calls and rate limit
//! policies for model calls.
//!
//! Both traits return boxed futures and never fail, so implementations can be swapped without
//! touching the flows that consult them.

pub mod header;
pub mod rate_limit;

pub use header::*;
pub use rate_limit::*;
