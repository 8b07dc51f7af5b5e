//! Approximate backend: HNSW graph over the same position space as the
//! flat index.
//!
//! `hnsw_rs` graphs are not serializable, so persistence stores the raw
//! vectors and rebuilds the graph on load. Construction cost is paid once
//! at startup; the on-disk artifact stays an opaque blob either way.

use super::{IndexKind, Neighbor};
use crate::error::IndexError;
use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Initial capacity hint for the graph allocator. Inserts past this still
/// work; the hint only sizes the initial layout.
const GRAPH_CAPACITY: usize = 100_000;
/// hnsw_rs caps layers at 16.
const MAX_LAYER: usize = 16;

const PAYLOAD_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct HnswPayload {
    version: u32,
    dim: usize,
    vectors: Vec<Vec<f32>>,
}

/// Graph construction and search parameters.
#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    /// Max neighbors per node.
    pub m: usize,
    /// Construction-time search width.
    pub ef_construction: usize,
    /// Query-time search width.
    pub ef_search: usize,
}

pub struct HnswBackend {
    graph: Hnsw<'static, f32, DistL2>,
    vectors: Vec<Vec<f32>>,
    dim: usize,
    params: HnswParams,
}

impl HnswBackend {
    pub fn new(dim: usize, params: HnswParams) -> Self {
        let graph = Hnsw::<f32, DistL2>::new(
            params.m,
            GRAPH_CAPACITY,
            MAX_LAYER,
            params.ef_construction,
            DistL2 {},
        );
        Self {
            graph,
            vectors: Vec::new(),
            dim,
            params,
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Append one vector at the next position. The caller (IndexStore) has
    /// already validated the dimension.
    pub fn push(&mut self, vector: &[f32]) {
        debug_assert_eq!(vector.len(), self.dim);
        let position = self.vectors.len();
        self.graph.insert_slice((vector, position));
        self.vectors.push(vector.to_vec());
    }

    /// Top-k by graph distance, ascending. Fewer than `k` results when the
    /// index is smaller than `k`.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        if self.vectors.is_empty() || k == 0 {
            return Vec::new();
        }

        let ef = self.params.ef_search.max(k);
        let mut hits: Vec<Neighbor> = self
            .graph
            .search(query, k.min(self.vectors.len()), ef)
            .into_iter()
            .map(|n| Neighbor {
                position: n.d_id,
                distance: n.distance,
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits
    }

    /// Write the stored vectors to `path` via a temp file + rename.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let payload = HnswPayload {
            version: PAYLOAD_VERSION,
            dim: self.dim,
            vectors: self.vectors.clone(),
        };

        let tmp = path.with_extension("tmp");
        let io_err = |source| IndexError::Persist {
            kind: IndexKind::Approximate,
            path: path.to_path_buf(),
            source,
        };

        let file = std::fs::File::create(&tmp).map_err(io_err)?;
        bincode::serialize_into(BufWriter::new(file), &payload).map_err(|e| {
            IndexError::Persist {
                kind: IndexKind::Approximate,
                path: path.to_path_buf(),
                source: std::io::Error::other(e),
            }
        })?;
        std::fs::rename(&tmp, path).map_err(io_err)?;

        Ok(())
    }

    /// Read persisted vectors and rebuild the graph by re-inserting them in
    /// their original order, so positions are preserved.
    pub fn load(path: &Path, dim: usize, params: HnswParams) -> Result<Self, IndexError> {
        let load_err = |reason: String| IndexError::Load {
            kind: IndexKind::Approximate,
            path: path.to_path_buf(),
            reason,
        };

        let file = std::fs::File::open(path).map_err(|e| load_err(e.to_string()))?;
        let payload: HnswPayload = bincode::deserialize_from(BufReader::new(file))
            .map_err(|e| load_err(e.to_string()))?;

        if payload.version != PAYLOAD_VERSION {
            return Err(load_err(format!(
                "unsupported payload version {}",
                payload.version
            )));
        }
        if payload.dim != dim {
            return Err(load_err(format!(
                "persisted dimension {} does not match configured dimension {dim}",
                payload.dim
            )));
        }

        let mut backend = Self::new(dim, params);
        for vector in &payload.vectors {
            if vector.len() != dim {
                return Err(load_err(format!(
                    "stored vector of length {} in index of dimension {dim}",
                    vector.len()
                )));
            }
            backend.push(vector);
        }

        Ok(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> HnswParams {
        HnswParams {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
        }
    }

    #[test]
    fn finds_exact_match_first() {
        let mut backend = HnswBackend::new(3, params());
        backend.push(&[1.0, 0.0, 0.0]);
        backend.push(&[0.0, 1.0, 0.0]);
        backend.push(&[0.0, 0.0, 1.0]);

        let hits = backend.search(&[0.0, 1.0, 0.0], 2);
        assert_eq!(hits[0].position, 1);
        assert_eq!(hits[0].distance, 0.0);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn search_on_empty_index_returns_nothing() {
        let backend = HnswBackend::new(3, params());
        assert!(backend.search(&[0.0, 0.0, 0.0], 5).is_empty());
    }

    #[test]
    fn search_with_k_larger_than_index_returns_fewer() {
        let mut backend = HnswBackend::new(2, params());
        backend.push(&[1.0, 0.0]);

        let hits = backend.search(&[1.0, 0.0], 10);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn save_and_load_preserves_positions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hnsw.index");

        let mut backend = HnswBackend::new(2, params());
        backend.push(&[1.0, 0.0]);
        backend.push(&[0.0, 1.0]);
        backend.save(&path).expect("save");

        let loaded = HnswBackend::load(&path, 2, params()).expect("load");
        assert_eq!(loaded.len(), 2);
        let hits = loaded.search(&[0.0, 1.0], 1);
        assert_eq!(hits[0].position, 1);
    }

    #[test]
    fn load_corrupt_file_is_load_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hnsw.index");
        std::fs::write(&path, b"garbage").expect("write junk");

        let result = HnswBackend::load(&path, 2, params());
        assert!(matches!(result, Err(IndexError::Load { .. })));
    }
}
