//! Model-call flows: request keys, call-scoped retry state, backoff coordination, and the guard
//! that ties rate limiting and retries around a model invocation.

pub mod common;
pub mod model_call;
pub mod retry;

pub use common::*;
pub use model_call::*;
pub use retry::*;
