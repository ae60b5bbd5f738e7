//! Cell type metadata for simplex meshes.
//!
//! Local numbering used throughout the crate:
//! - Triangle `[v0, v1, v2]`, edges `01, 02, 12`.
//! - Tetrahedron `[v0, v1, v2, v3]`, edges `01, 02, 03, 12, 13, 23`;
//!   face `i` is the face opposite vertex `i`.

use static_assertions::const_assert_eq;

/// Local edges of a triangle.
pub const TRIANGLE_EDGES: [[usize; 2]; 3] = [[0, 1], [0, 2], [1, 2]];
/// Local edges of a tetrahedron.
pub const TETRAHEDRON_EDGES: [[usize; 2]; 6] = [[0, 1], [0, 2], [0, 3], [1, 2], [1, 3], [2, 3]];

const_assert_eq!(TRIANGLE_EDGES.len(), 3);
const_assert_eq!(TETRAHEDRON_EDGES.len(), 6);

/// Simplex cell types handled by the refinement engine.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum CellType {
    /// 0D vertex.
    Vertex,
    /// 1D segment/edge (boundary facet of a triangle mesh).
    Segment,
    /// 2D simplex (triangle).
    Triangle,
    /// 3D simplex (tet).
    Tetrahedron,
}

impl Default for CellType {
    fn default() -> Self {
        CellType::Vertex
    }
}

impl CellType {
    /// Returns the topological dimension of the cell.
    pub fn dimension(self) -> usize {
        match self {
            CellType::Vertex => 0,
            CellType::Segment => 1,
            CellType::Triangle => 2,
            CellType::Tetrahedron => 3,
        }
    }

    /// The simplex of topological dimension `dim`, if supported.
    pub fn simplex(dim: usize) -> Option<Self> {
        match dim {
            0 => Some(CellType::Vertex),
            1 => Some(CellType::Segment),
            2 => Some(CellType::Triangle),
            3 => Some(CellType::Tetrahedron),
            _ => None,
        }
    }

    /// Number of vertices of the simplex.
    pub fn vertex_count(self) -> usize {
        self.dimension() + 1
    }

    /// Local edge table (empty below dimension 1).
    pub fn edges(self) -> &'static [[usize; 2]] {
        match self {
            CellType::Vertex => &[],
            CellType::Segment => &[[0, 1]],
            CellType::Triangle => &TRIANGLE_EDGES,
            CellType::Tetrahedron => &TETRAHEDRON_EDGES,
        }
    }

    /// Facet type of the simplex (one dimension lower).
    pub fn facet_type(self) -> Option<Self> {
        self.dimension().checked_sub(1).and_then(CellType::simplex)
    }

    /// VTK legacy cell type id.
    pub fn vtk_id(self) -> i32 {
        match self {
            CellType::Vertex => 1,
            CellType::Segment => 3,
            CellType::Triangle => 5,
            CellType::Tetrahedron => 10,
        }
    }

    /// Inverse of [`CellType::vtk_id`].
    pub fn from_vtk_id(id: i32) -> Option<Self> {
        match id {
            1 => Some(CellType::Vertex),
            3 => Some(CellType::Segment),
            5 => Some(CellType::Triangle),
            10 => Some(CellType::Tetrahedron),
            _ => None,
        }
    }
}

/// Local facets of a simplex of dimension `dim`; facet `i` omits vertex `i`.
pub fn local_facets(dim: usize) -> &'static [&'static [usize]] {
    match dim {
        2 => &[&[1, 2], &[0, 2], &[0, 1]],
        3 => &[&[1, 2, 3], &[0, 2, 3], &[0, 1, 3], &[0, 1, 2]],
        _ => &[],
    }
}
