//! Shared request plumbing for switchyard
//!
//! Holds the per-request context threaded through the resilience layer,
//! the error-to-HTTP mapping trait, and the circuit breaker scope key format.

#![allow(clippy::must_use_candidate)]

mod context;
mod error;
mod scope;

pub use context::{RequestContext, VirtualKey};
pub use error::HttpError;
pub use scope::{SCOPE_SEPARATOR, scope_key};
