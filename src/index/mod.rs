//! Durable nearest-neighbor search over fixed-dimension vectors.
//!
//! Two backends share one position space: an exact flat index (full-scan
//! squared L2) and an approximate HNSW graph. Every append goes to both in
//! the same order, so position `i` refers to the same logical document in
//! either structure. Neither backend supports point deletion; stale entries
//! stay in place until a rebuild.

mod flat;
mod hnsw;
mod store;

pub use flat::FlatIndex;
pub use hnsw::{HnswBackend, HnswParams};
pub use store::IndexStore;

use serde::{Deserialize, Serialize};

/// Which backend a search should run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Flat scan, true distances, perfect recall.
    Exact,
    /// HNSW graph, approximate but fast at scale.
    Approximate,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Exact => "exact",
            IndexKind::Approximate => "approximate",
        }
    }
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One nearest-neighbor hit: an index position and the backend's native
/// distance (squared L2 for the flat index, graph L2 for HNSW).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub distance: f32,
}
