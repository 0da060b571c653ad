//! Seglake metadata store
//!
//! This crate defines the metadata capability surface the request plane
//! talks to (buckets, object versions, multipart uploads, API keys, the
//! operation log, and maintenance state) plus an in-process
//! implementation with single-lock transactional commits.

pub mod memory;
pub mod store;
pub mod types;

pub use memory::MemMetaStore;
pub use store::{MetaError, MetaStore};
pub use types::*;
