//! Seglake Gateway - S3-compatible API
//!
//! The request plane: a fixed pipeline of stages (request id,
//! maintenance gate, SigV4 auth, replay suppression, failure limiting,
//! in-flight limiting, policy) in front of a dispatch table that routes
//! each request to its operation handler.

pub mod body;
pub mod handlers;
pub mod maintenance;
pub mod metrics;
pub mod pipeline;
pub mod range;
pub mod router;
pub mod state;
pub mod xml;


pub use state::Gateway;
