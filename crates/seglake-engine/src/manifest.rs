//! Manifests and chunk references
//!
//! A manifest is the engine's pointer representation of an object's
//! bytes: an ordered list of `(segment, offset, length)` tuples. The
//! chunk index is globally monotonic within a manifest so multipart
//! assembly can splice part manifests without rewriting data.

use serde::{Deserialize, Serialize};

/// A reference to a contiguous byte range inside a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub segment_id: u64,
    pub offset: u64,
    pub length: u64,
    /// Position of this chunk within its manifest
    pub index: u32,
}

/// The full pointer set for one object version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Manifest {
    pub size: u64,
    pub chunks: Vec<ChunkRef>,
}

impl Manifest {
    /// Splice another manifest's chunks onto the end of this one,
    /// renumbering indices to stay globally monotonic.
    pub fn append(&mut self, other: &Manifest) {
        let base = u32::try_from(self.chunks.len()).unwrap_or(u32::MAX);
        for (i, chunk) in other.chunks.iter().enumerate() {
            self.chunks.push(ChunkRef {
                index: base + u32::try_from(i).unwrap_or(u32::MAX),
                ..*chunk
            });
        }
        self.size += other.size;
    }

    /// Chunks overlapping `[start, start + length)`, with the byte
    /// offset of each chunk within the object.
    pub fn chunks_in_range(&self, start: u64, length: u64) -> Vec<(ChunkRef, u64)> {
        let end = start.saturating_add(length);
        let mut object_offset = 0u64;
        let mut out = Vec::new();
        for chunk in &self.chunks {
            let chunk_end = object_offset + chunk.length;
            if object_offset < end && chunk_end > start {
                out.push((*chunk, object_offset));
            }
            object_offset = chunk_end;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(segment_id: u64, offset: u64, length: u64, index: u32) -> ChunkRef {
        ChunkRef {
            segment_id,
            offset,
            length,
            index,
        }
    }

    #[test]
    fn test_append_renumbers_indices() {
        let mut left = Manifest {
            size: 10,
            chunks: vec![chunk(1, 0, 10, 0)],
        };
        let right = Manifest {
            size: 7,
            chunks: vec![chunk(2, 0, 4, 0), chunk(2, 4, 3, 1)],
        };
        left.append(&right);
        assert_eq!(left.size, 17);
        assert_eq!(
            left.chunks.iter().map(|c| c.index).collect::<Vec<_>>(),
            [0, 1, 2]
        );
    }

    #[test]
    fn test_chunks_in_range() {
        let manifest = Manifest {
            size: 30,
            chunks: vec![chunk(1, 0, 10, 0), chunk(1, 10, 10, 1), chunk(2, 0, 10, 2)],
        };
        let hits = manifest.chunks_in_range(5, 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].1, 0);
        assert_eq!(hits[1].1, 10);

        let tail = manifest.chunks_in_range(25, 100);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].0.segment_id, 2);
    }
}
