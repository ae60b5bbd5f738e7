//! Static refinement templates for simplices.
//!
//! A [`SplitPattern`] is the *ordered* list of marked local edges of one
//! simplex. Its [`RefinementTemplate`] is the decomposition obtained by
//! bisecting those edges in order: every child containing both endpoints of
//! the next edge is cut in two at the edge midpoint. Bisection replaces a
//! vertex in place, so each child keeps the orientation of its parent.
//!
//! # Local numbering
//! Template entries are *local ids*: `0..=D` are the simplex vertices and
//! `D + 1 + e` is the midpoint of local edge `e` (see
//! [`crate::topology::cell_type`]).
//!
//! # Conformity
//! Restricting a tetrahedron template to one of its faces gives the triangle
//! template of the face's marked edges in the same order (and a triangle
//! template restricted to an edge gives the segment template). Refinement
//! orders marked edges by one global priority, so two simplices sharing a
//! facet always subdivide it identically.
//!
//! All patterns are enumerated once into lookup tables: 2 for segments,
//! 16 for triangles and 1957 for tetrahedra.

use hashbrown::HashMap;
use itertools::Itertools;
use once_cell::sync::Lazy;
use static_assertions::const_assert;

use crate::mesh_error::MeshAdaptError;
use crate::topology::cell_type::CellType;

/// Maximum number of edges of a supported simplex.
pub const MAX_EDGES: usize = 6;
/// Maximum number of local ids (vertices plus edge midpoints).
pub const MAX_LOCAL_IDS: usize = 4 + MAX_EDGES;

const_assert!(MAX_LOCAL_IDS <= u8::MAX as usize);

/// Ordered marked-edge pattern of one simplex.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
pub struct SplitPattern {
    edges: [u8; MAX_EDGES],
    len: u8,
}

impl SplitPattern {
    /// Pattern with no marked edge.
    pub const EMPTY: SplitPattern = SplitPattern {
        edges: [0; MAX_EDGES],
        len: 0,
    };

    /// Build a pattern from local edge indices, in split order.
    pub fn new(cell_type: CellType, edges: &[usize]) -> Result<Self, MeshAdaptError> {
        let n_edges = cell_type.edges().len();
        if edges.len() > n_edges {
            return Err(MeshAdaptError::InvalidParameter(format!(
                "{} edges marked on a {cell_type:?}",
                edges.len()
            )));
        }
        let mut pattern = Self::EMPTY;
        for (k, &e) in edges.iter().enumerate() {
            if e >= n_edges || edges[..k].contains(&e) {
                return Err(MeshAdaptError::InvalidParameter(format!(
                    "invalid local edge {e} in pattern {edges:?} of a {cell_type:?}"
                )));
            }
            pattern.edges[k] = e as u8;
        }
        pattern.len = edges.len() as u8;
        Ok(pattern)
    }

    /// Marked local edges, in split order.
    #[inline]
    pub fn edges(&self) -> &[u8] {
        &self.edges[..self.len as usize]
    }

    /// Number of marked edges.
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// `true` when no edge is marked.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// `true` if local edge `e` is marked.
    #[inline]
    pub fn contains(&self, e: usize) -> bool {
        self.edges().iter().any(|&x| x as usize == e)
    }
}

/// Child decomposition of a simplex for one [`SplitPattern`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefinementTemplate {
    cell_type: CellType,
    children: Vec<[u8; 4]>,
}

impl RefinementTemplate {
    /// Cell type of the parent and children.
    #[inline]
    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    /// Number of children.
    #[inline]
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Children as local-id tuples.
    pub fn children(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let n = self.cell_type.vertex_count();
        self.children.iter().map(move |c| &c[..n])
    }

    /// Map the template to global vertex ids.
    ///
    /// `nodes` are the parent vertices; `midpoints[e]` is the vertex created on
    /// local edge `e` and must be set for every marked edge.
    pub fn instantiate(
        &self,
        nodes: &[usize],
        midpoints: &[Option<usize>],
    ) -> Result<Vec<Vec<usize>>, MeshAdaptError> {
        let n = self.cell_type.vertex_count();
        if nodes.len() != n {
            return Err(MeshAdaptError::InvalidConnectivity(format!(
                "{n} vertices expected for a {:?}, got {}",
                self.cell_type,
                nodes.len()
            )));
        }
        let resolve = |local: u8| -> Result<usize, MeshAdaptError> {
            let local = local as usize;
            if local < n {
                return Ok(nodes[local]);
            }
            midpoints.get(local - n).copied().flatten().ok_or_else(|| {
                MeshAdaptError::InvalidConnectivity(format!(
                    "missing midpoint for local edge {} of {nodes:?}",
                    local - n
                ))
            })
        };
        self.children()
            .map(|child| child.iter().map(|&l| resolve(l)).collect())
            .collect()
    }
}

/// Local id of the midpoint of local edge `edge`.
#[inline]
pub fn midpoint_local_id(cell_type: CellType, edge: usize) -> usize {
    cell_type.vertex_count() + edge
}

/// Local edge index of the vertex pair `(a, b)`, in either order.
pub fn local_edge_index(cell_type: CellType, a: usize, b: usize) -> Option<usize> {
    let key = if a < b { [a, b] } else { [b, a] };
    cell_type.edges().iter().position(|e| *e == key)
}

/// Bisect the parent simplex along `pattern`, in order.
pub fn bisect(cell_type: CellType, pattern: &SplitPattern) -> RefinementTemplate {
    let n = cell_type.vertex_count();
    let table = cell_type.edges();
    let mut root = [0u8; 4];
    for (k, slot) in root.iter_mut().enumerate().take(n) {
        *slot = k as u8;
    }
    let mut children = vec![root];
    for &e in pattern.edges() {
        let [a, b] = table[e as usize];
        let (a, b) = (a as u8, b as u8);
        let m = midpoint_local_id(cell_type, e as usize) as u8;
        let mut next = Vec::with_capacity(children.len() * 2);
        for child in children {
            let pa = child[..n].iter().position(|&x| x == a);
            let pb = child[..n].iter().position(|&x| x == b);
            match (pa, pb) {
                (Some(i), Some(j)) => {
                    let mut near_a = child;
                    near_a[j] = m;
                    let mut near_b = child;
                    near_b[i] = m;
                    next.push(near_a);
                    next.push(near_b);
                }
                _ => next.push(child),
            }
        }
        children = next;
    }
    RefinementTemplate {
        cell_type,
        children,
    }
}

fn enumerate_templates(cell_type: CellType) -> HashMap<SplitPattern, RefinementTemplate> {
    let n_edges = cell_type.edges().len();
    let mut table = HashMap::new();
    table.insert(SplitPattern::EMPTY, bisect(cell_type, &SplitPattern::EMPTY));
    for k in 1..=n_edges {
        for order in (0..n_edges).permutations(k) {
            let mut pattern = SplitPattern::EMPTY;
            for (slot, &e) in pattern.edges.iter_mut().zip(order.iter()) {
                *slot = e as u8;
            }
            pattern.len = k as u8;
            table.insert(pattern, bisect(cell_type, &pattern));
        }
    }
    table
}

static SEGMENT_TEMPLATES: Lazy<HashMap<SplitPattern, RefinementTemplate>> =
    Lazy::new(|| enumerate_templates(CellType::Segment));
static TRIANGLE_TEMPLATES: Lazy<HashMap<SplitPattern, RefinementTemplate>> =
    Lazy::new(|| enumerate_templates(CellType::Triangle));
static TETRAHEDRON_TEMPLATES: Lazy<HashMap<SplitPattern, RefinementTemplate>> =
    Lazy::new(|| enumerate_templates(CellType::Tetrahedron));

fn table(cell_type: CellType) -> Option<&'static HashMap<SplitPattern, RefinementTemplate>> {
    match cell_type {
        CellType::Segment => Some(&SEGMENT_TEMPLATES),
        CellType::Triangle => Some(&TRIANGLE_TEMPLATES),
        CellType::Tetrahedron => Some(&TETRAHEDRON_TEMPLATES),
        CellType::Vertex => None,
    }
}

/// Look up the template of `pattern`.
pub fn template(
    cell_type: CellType,
    pattern: &SplitPattern,
) -> Result<&'static RefinementTemplate, MeshAdaptError> {
    table(cell_type)
        .and_then(|t| t.get(pattern))
        .ok_or_else(|| {
            MeshAdaptError::InvalidParameter(format!(
                "no refinement template for {cell_type:?} pattern {:?}",
                pattern.edges()
            ))
        })
}

/// Number of tabulated patterns for `cell_type`.
pub fn pattern_count(cell_type: CellType) -> usize {
    table(cell_type).map_or(0, HashMap::len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::metrics::{Point, lerp, signed_measure};
    use std::collections::BTreeSet;

    fn reference(cell_type: CellType) -> Vec<Point> {
        match cell_type {
            CellType::Triangle => vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            _ => vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
            ],
        }
    }

    /// Local-id positions with midpoints placed at parameter `t` along each edge.
    fn local_points(cell_type: CellType, t: f64) -> Vec<Point> {
        let mut points = reference(cell_type);
        for &[a, b] in cell_type.edges() {
            points.push(lerp(points[a], points[b], t));
        }
        points
    }

    #[test]
    fn tables_enumerate_every_ordered_pattern() {
        assert_eq!(pattern_count(CellType::Segment), 2);
        assert_eq!(pattern_count(CellType::Triangle), 16);
        assert_eq!(pattern_count(CellType::Tetrahedron), 1957);
    }

    #[test]
    fn children_tile_the_parent_with_positive_volume() {
        for cell_type in [CellType::Triangle, CellType::Tetrahedron] {
            for t in [0.5, 0.3] {
                let points = local_points(cell_type, t);
                let parent = signed_measure(cell_type, &points[..cell_type.vertex_count()]).unwrap();
                for (pattern, tpl) in table(cell_type).unwrap() {
                    assert!(tpl.child_count() > pattern.len());
                    let mut total = 0.0;
                    for child in tpl.children() {
                        let corners: Vec<Point> =
                            child.iter().map(|&l| points[l as usize]).collect();
                        let v = signed_measure(cell_type, &corners).unwrap();
                        assert!(v > 0.0, "{cell_type:?} {:?}: child volume {v}", pattern.edges());
                        total += v;
                    }
                    assert!((total - parent).abs() < 1e-12);
                }
            }
        }
    }

    #[test]
    fn full_patterns_give_regular_child_counts() {
        let all_tri = SplitPattern::new(CellType::Triangle, &[0, 1, 2]).unwrap();
        assert_eq!(template(CellType::Triangle, &all_tri).unwrap().child_count(), 4);
        let all_tet = SplitPattern::new(CellType::Tetrahedron, &[0, 1, 2, 3, 4, 5]).unwrap();
        assert_eq!(template(CellType::Tetrahedron, &all_tet).unwrap().child_count(), 8);
        let one = SplitPattern::new(CellType::Tetrahedron, &[3]).unwrap();
        assert_eq!(template(CellType::Tetrahedron, &one).unwrap().child_count(), 2);
        assert!(SplitPattern::new(CellType::Triangle, &[0, 0]).is_err());
        assert!(SplitPattern::new(CellType::Triangle, &[3]).is_err());
    }

    /// Sorted child facets lying on parent facet `face` (given by local vertex ids).
    fn facet_restriction(cell_type: CellType, tpl: &RefinementTemplate, face: &[usize]) -> BTreeSet<Vec<u8>> {
        let mut on_face: BTreeSet<u8> = face.iter().map(|&v| v as u8).collect();
        for (e, &[a, b]) in cell_type.edges().iter().enumerate() {
            if face.contains(&a) && face.contains(&b) {
                on_face.insert(midpoint_local_id(cell_type, e) as u8);
            }
        }
        let mut out = BTreeSet::new();
        for child in tpl.children() {
            for skip in 0..child.len() {
                let mut facet: Vec<u8> = child
                    .iter()
                    .enumerate()
                    .filter(|&(k, _)| k != skip)
                    .map(|(_, &l)| l)
                    .collect();
                if facet.iter().all(|l| on_face.contains(l)) {
                    facet.sort_unstable();
                    out.insert(facet);
                }
            }
        }
        out
    }

    #[test]
    fn tetrahedron_faces_match_triangle_templates() {
        let tet = CellType::Tetrahedron;
        let tri = CellType::Triangle;
        for (pattern, tpl) in table(tet).unwrap() {
            for face in [[1usize, 2, 3], [0, 2, 3], [0, 1, 3], [0, 1, 2]] {
                // Marked face edges, in pattern order, as triangle-local edges.
                let mut tri_edges = Vec::new();
                let mut tet_of_tri_edge = [0usize; 3];
                for (te, &[a, b]) in tri.edges().iter().enumerate() {
                    let e = local_edge_index(tet, face[a], face[b]).unwrap();
                    tet_of_tri_edge[te] = e;
                }
                for &e in pattern.edges() {
                    if let Some(te) = tet_of_tri_edge.iter().position(|&x| x == e as usize) {
                        tri_edges.push(te);
                    }
                }
                let tri_pattern = SplitPattern::new(tri, &tri_edges).unwrap();
                let tri_tpl = template(tri, &tri_pattern).unwrap();
                let to_tet = |l: u8| -> u8 {
                    let l = l as usize;
                    if l < 3 {
                        face[l] as u8
                    } else {
                        midpoint_local_id(tet, tet_of_tri_edge[l - 3]) as u8
                    }
                };
                let expected: BTreeSet<Vec<u8>> = tri_tpl
                    .children()
                    .map(|c| {
                        let mut ids: Vec<u8> = c.iter().map(|&l| to_tet(l)).collect();
                        ids.sort_unstable();
                        ids
                    })
                    .collect();
                assert_eq!(
                    facet_restriction(tet, tpl, &face),
                    expected,
                    "pattern {:?} face {face:?}",
                    pattern.edges()
                );
            }
        }
    }

    #[test]
    fn instantiate_maps_local_ids() {
        let pattern = SplitPattern::new(CellType::Triangle, &[2]).unwrap();
        let tpl = template(CellType::Triangle, &pattern).unwrap();
        let children = tpl
            .instantiate(&[10, 11, 12], &[None, None, Some(20)])
            .unwrap();
        assert_eq!(children, vec![vec![10, 11, 20], vec![10, 20, 12]]);
        assert!(tpl.instantiate(&[10, 11, 12], &[None, None, None]).is_err());
    }
}
