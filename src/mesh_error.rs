//! MeshAdaptError: Unified error type for mesh-adapt public APIs
//!
//! Every fallible operation in the crate reports through this enum. Per-element
//! defects found during refinement (see [`MeshAdaptError::DegenerateElement`])
//! are collected into the refinement report instead of aborting the call.

use thiserror::Error;

/// Unified error type for mesh-adapt operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MeshAdaptError {
    /// Target element count for metric scaling must be strictly positive.
    #[error("invalid target element count {0}: must be > 0")]
    InvalidTarget(usize),
    /// Refinement or `update_mesh` was requested before any metric was accumulated.
    #[error("metric field not initialized: accumulate a field and call update_mesh first")]
    MetricNotInitialized,
    /// A refinement template (or a new element) would have non-positive volume.
    #[error("degenerate element {element}: volume {volume:e}")]
    DegenerateElement {
        /// Element index (or `usize::MAX` for an element not yet inserted).
        element: usize,
        /// Offending signed volume.
        volume: f64,
    },
    /// A marked boundary edge is not bounded by a consistent set of surface facets.
    #[error("inconsistent surface at edge {edge:?}: incident facet tags {tags:?}")]
    InconsistentSurface {
        /// Edge endpoints (sorted).
        edge: (usize, usize),
        /// Tags of the incident boundary facets, in facet order.
        tags: Vec<u32>,
    },
    /// A vertex/element/facet index is not an active entity.
    #[error("{kind} index {index} out of range (len {len})")]
    IndexOutOfRange {
        /// Kind of entity addressed.
        kind: &'static str,
        /// Requested index.
        index: usize,
        /// Current slot count.
        len: usize,
    },
    /// Only 2D (triangles) and 3D (tetrahedra) meshes are supported.
    #[error("unsupported mesh dimension {0}: expected 2 or 3")]
    InvalidDimension(usize),
    /// Element or facet connectivity is malformed.
    #[error("invalid connectivity: {0}")]
    InvalidConnectivity(String),
    /// A vertex cannot be removed while elements still reference it.
    #[error("vertex {vertex} is still referenced by {elements} element(s)")]
    VertexInUse {
        /// Vertex index.
        vertex: usize,
        /// Number of active incident elements.
        elements: usize,
    },
    /// A per-vertex field does not match the mesh vertex slot count.
    #[error("field length mismatch: expected {expected}, found {found}")]
    FieldLengthMismatch {
        /// Expected number of values.
        expected: usize,
        /// Provided number of values.
        found: usize,
    },
    /// A numeric parameter is out of its admissible range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// A renumbering map is not a bijection over the active entities.
    #[error("invalid permutation: {0}")]
    InvalidPermutation(String),
    /// Mesh file I/O failure or parse error.
    #[error("mesh I/O error: {0}")]
    MeshIo(String),
}

impl From<std::io::Error> for MeshAdaptError {
    fn from(err: std::io::Error) -> Self {
        MeshAdaptError::MeshIo(err.to_string())
    }
}

impl MeshAdaptError {
    pub(crate) fn out_of_range(kind: &'static str, index: usize, len: usize) -> Self {
        MeshAdaptError::IndexOutOfRange { kind, index, len }
    }
}
