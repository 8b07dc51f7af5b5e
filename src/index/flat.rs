//! Exact flat index: append-only vector table with full-scan search.

use super::{IndexKind, Neighbor};
use crate::error::IndexError;
use serde::{Deserialize, Serialize};
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// On-disk payload. Versioned so a format change fails loudly instead of
/// deserializing garbage.
#[derive(Serialize, Deserialize)]
struct FlatPayload {
    version: u32,
    dim: usize,
    vectors: Vec<Vec<f32>>,
}

const PAYLOAD_VERSION: u32 = 1;

/// Exact nearest-neighbor backend. Distances are squared L2, computed over
/// every stored vector on each search.
pub struct FlatIndex {
    dim: usize,
    vectors: Vec<Vec<f32>>,
}

impl FlatIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            vectors: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Append one vector. The caller (IndexStore) has already validated the
    /// dimension.
    pub fn push(&mut self, vector: &[f32]) {
        debug_assert_eq!(vector.len(), self.dim);
        self.vectors.push(vector.to_vec());
    }

    /// Top-k by squared L2 distance, ascending. When `k` exceeds the index
    /// size, all stored entries are returned — never sentinel padding.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        let mut hits: Vec<Neighbor> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, vector)| Neighbor {
                position,
                distance: squared_l2(query, vector),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        hits
    }

    /// Write the index to `path` via a temp file + rename, so a crash
    /// mid-write leaves the previous snapshot intact.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let payload = FlatPayload {
            version: PAYLOAD_VERSION,
            dim: self.dim,
            vectors: self.vectors.clone(),
        };

        let tmp = path.with_extension("tmp");
        let io_err = |source| IndexError::Persist {
            kind: IndexKind::Exact,
            path: path.to_path_buf(),
            source,
        };

        let file = std::fs::File::create(&tmp).map_err(io_err)?;
        bincode::serialize_into(BufWriter::new(file), &payload).map_err(|e| {
            IndexError::Persist {
                kind: IndexKind::Exact,
                path: path.to_path_buf(),
                source: std::io::Error::other(e),
            }
        })?;
        std::fs::rename(&tmp, path).map_err(io_err)?;

        Ok(())
    }

    /// Read a persisted index back. The file must exist; the caller decides
    /// whether a missing file means "create empty".
    pub fn load(path: &Path, dim: usize) -> Result<Self, IndexError> {
        let load_err = |reason: String| IndexError::Load {
            kind: IndexKind::Exact,
            path: path.to_path_buf(),
            reason,
        };

        let file = std::fs::File::open(path).map_err(|e| load_err(e.to_string()))?;
        let payload: FlatPayload = bincode::deserialize_from(BufReader::new(file))
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

        Ok(Self {
            dim,
            vectors: payload.vectors,
        })
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
