//! Seglake storage engine
//!
//! The request plane consumes the [`StorageEngine`] capability surface:
//! content-addressed byte ranges keyed by version id, manifests of chunk
//! references, and commit hooks that let a metadata upsert land inside
//! the engine's own commit section.

pub mod engine;
pub mod manifest;
pub mod segment;

pub use engine::{CommitFn, EngineError, LayoutInfo, ObjectReader, PutResult, StorageEngine};
pub use manifest::{ChunkRef, Manifest};
pub use segment::SegmentEngine;
