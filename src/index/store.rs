//! The dual-backend index store and its alignment contract.

use super::{FlatIndex, HnswBackend, HnswParams, IndexKind, Neighbor};
use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use std::path::PathBuf;

/// Both nearest-neighbor backends behind one append/search/persist surface.
///
/// The store guarantees the backends always hold the same vectors in the
/// same order, which is what makes a position in one structure meaningful
/// in the other. Search results against either backend therefore resolve
/// through the same position→id mapping.
pub struct IndexStore {
    flat: FlatIndex,
    hnsw: HnswBackend,
    dim: usize,
    flat_path: PathBuf,
    hnsw_path: PathBuf,
    hnsw_params: HnswParams,
}

impl IndexStore {
    /// Load both backends from the configured directory, creating empty
    /// ones where no file exists yet. A file that exists but cannot be
    /// read back fails with [`IndexError::Load`]; so does a pair of files
    /// whose sizes disagree, since that means the position spaces have
    /// diverged on disk.
    pub fn open(config: &IndexConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.dir).map_err(|e| {
            crate::error::Error::Config(format!(
                "cannot create index directory {}: {e}",
                config.dir.display()
            ))
        })?;

        let dim = config.embedding_dim;
        let flat_path = config.dir.join(&config.flat_file);
        let hnsw_path = config.dir.join(&config.hnsw_file);
        let hnsw_params = HnswParams {
            m: config.hnsw_m,
            ef_construction: config.hnsw_ef_construction,
            ef_search: config.hnsw_ef_search,
        };

        let flat = if flat_path.exists() {
            let index = FlatIndex::load(&flat_path, dim)?;
            tracing::info!(path = %flat_path.display(), entries = index.len(), "loaded exact index");
            index
        } else {
            tracing::info!(path = %flat_path.display(), "created new exact index");
            FlatIndex::new(dim)
        };

        let hnsw = if hnsw_path.exists() {
            let index = HnswBackend::load(&hnsw_path, dim, hnsw_params)?;
            tracing::info!(path = %hnsw_path.display(), entries = index.len(), "loaded approximate index");
            index
        } else {
            tracing::info!(path = %hnsw_path.display(), "created new approximate index");
            HnswBackend::new(dim, hnsw_params)
        };

        if flat.len() != hnsw.len() {
            return Err(IndexError::Load {
                kind: IndexKind::Approximate,
                path: hnsw_path,
                reason: format!(
                    "index sizes diverged on disk (exact {}, approximate {}); run a rebuild",
                    flat.len(),
                    hnsw.len()
                ),
            }
            .into());
        }

        Ok(Self {
            flat,
            hnsw,
            dim,
            flat_path,
            hnsw_path,
            hnsw_params,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    /// Number of entries, identical in both backends.
    pub fn len(&self) -> usize {
        debug_assert_eq!(self.flat.len(), self.hnsw.len());
        self.flat.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append vectors to both backends in order and persist both
    /// (write-through). Returns the position assigned to the first vector;
    /// the rest follow contiguously.
    ///
    /// Every vector's dimension is checked before either backend is
    /// touched, so a mismatch anywhere in the batch leaves both unchanged.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<usize> {
        for vector in vectors {
            if vector.len() != self.dim {
                return Err(IndexError::DimensionMismatch {
                    expected: self.dim,
                    actual: vector.len(),
                }
                .into());
            }
        }

        let start = self.flat.len();
        for vector in vectors {
            self.flat.push(vector);
            self.hnsw.push(vector);
        }

        self.persist(IndexKind::Exact)?;
        self.persist(IndexKind::Approximate)?;

        tracing::debug!(
            added = vectors.len(),
            start_position = start,
            total = self.flat.len(),
            "appended vectors to both index backends"
        );
        Ok(start)
    }

    /// Nearest neighbors from the requested backend, ascending by its
    /// native distance. When `k` exceeds the index size, fewer results
    /// come back; there is no sentinel padding.
    pub fn search(&self, query: &[f32], k: usize, kind: IndexKind) -> Result<Vec<Neighbor>> {
        if query.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            }
            .into());
        }

        let hits = match kind {
            IndexKind::Exact => self.flat.search(query, k),
            IndexKind::Approximate => self.hnsw.search(query, k),
        };
        Ok(hits)
    }

    /// Write one backend's current state to durable storage.
    pub fn persist(&self, kind: IndexKind) -> Result<()> {
        match kind {
            IndexKind::Exact => self.flat.save(&self.flat_path)?,
            IndexKind::Approximate => self.hnsw.save(&self.hnsw_path)?,
        }
        Ok(())
    }

    /// Point deletion is unsupported by both backends; entries go stale in
    /// place and are reclaimed by [`IndexStore::rebuild_from`].
    pub fn delete(&mut self, _positions: &[usize]) -> Result<()> {
        Err(IndexError::Unsupported.into())
    }

    /// Replace both backends with fresh ones built from `vectors`, then
    /// persist. Positions are reassigned densely in iteration order.
    pub fn rebuild_from<I>(&mut self, vectors: I) -> Result<usize>
    where
        I: IntoIterator<Item = Vec<f32>>,
    {
        let mut flat = FlatIndex::new(self.dim);
        let mut hnsw = HnswBackend::new(self.dim, self.hnsw_params);

        for vector in vectors {
            if vector.len() != self.dim {
                return Err(IndexError::DimensionMismatch {
                    expected: self.dim,
                    actual: vector.len(),
                }
                .into());
            }
            flat.push(&vector);
            hnsw.push(&vector);
        }

        let count = flat.len();
        self.flat = flat;
        self.hnsw = hnsw;
        self.persist(IndexKind::Exact)?;
        self.persist(IndexKind::Approximate)?;

        tracing::info!(entries = count, "rebuilt both index backends");
        Ok(count)
    }
}
