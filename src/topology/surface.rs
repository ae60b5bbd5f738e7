//! Boundary surface of a mesh: tagged facets and edge/vertex lookups.
//!
//! A facet is a segment (2D) or triangle (3D) lying on the domain boundary,
//! oriented so its normal points out of the mesh. Tags group facets into
//! geometric patches: [`Surface::new`] flood-fills coplanar (collinear in 2D)
//! neighbouring facets into one tag, numbered from 1 in facet order;
//! [`Surface::from_facets`] takes tags from input metadata instead.
//!
//! Refinement only changes the surface by splitting facets along marked
//! edges (children keep the parent tag); defragmentation renumbers it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::algs::renumber::SlotRenumbering;
use crate::debug_invariants::DebugInvariants;
use crate::geometry::metrics::{Point, dot, facet_normal, sub};
use crate::mesh_error::MeshAdaptError;
use crate::topology::cell_type::local_facets;
use crate::topology::mesh::Mesh;
use crate::topology::slot::{Slot, active_entries};

/// Normals whose dot product exceeds `1 - COPLANAR_TOLERANCE` share a tag.
const COPLANAR_TOLERANCE: f64 = 1e-6;

/// One boundary facet; only the first `dim` vertices are used.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Facet {
    nodes: [usize; 3],
    tag: u32,
}

/// Tagged boundary facets of a mesh.
#[derive(Clone, Debug)]
pub struct Surface {
    dim: usize,
    facets: Vec<Slot<Facet>>,
    edge_facets: BTreeMap<(usize, usize), Vec<usize>>,
    facet_lookup: BTreeMap<Vec<usize>, usize>,
    vertex_tags: BTreeMap<usize, BTreeSet<u32>>,
}

#[inline]
fn edge_key(a: usize, b: usize) -> (usize, usize) {
    if a < b { (a, b) } else { (b, a) }
}

fn sorted_key(nodes: &[usize]) -> Vec<usize> {
    let mut key = nodes.to_vec();
    key.sort_unstable();
    key
}

impl Surface {
    /// Extract the boundary of `mesh`: facets incident to exactly one element.
    pub fn new(mesh: &Mesh) -> Result<Self, MeshAdaptError> {
        let dim = mesh.dim();
        let mut incidence: BTreeMap<Vec<usize>, (usize, Vec<usize>, usize)> = BTreeMap::new();
        for (_, nodes) in mesh.elements() {
            for (opposite, facet) in local_facets(dim).iter().enumerate() {
                let oriented: Vec<usize> = facet.iter().map(|&k| nodes[k]).collect();
                let entry = incidence
                    .entry(sorted_key(&oriented))
                    .or_insert((0, oriented, nodes[opposite]));
                entry.0 += 1;
            }
        }

        let mut oriented_facets = Vec::new();
        for (count, mut nodes, opposite) in incidence.into_values() {
            if count != 1 {
                continue;
            }
            let points: Vec<Point> = nodes
                .iter()
                .map(|&v| mesh.coords(v))
                .collect::<Result<_, _>>()?;
            let normal = facet_normal(dim, &points)?;
            let inward = sub(mesh.coords(opposite)?, points[0]);
            if dot(normal, inward) > 0.0 {
                nodes.swap(0, 1);
            }
            oriented_facets.push(nodes);
        }

        let tags = coplanar_tags(mesh, &oriented_facets)?;
        let mut surface = Self::empty(dim);
        for (nodes, tag) in oriented_facets.iter().zip(tags) {
            surface.insert_facet(nodes, tag)?;
        }
        log::debug!(
            "surface: {} facets, {} tags",
            surface.number_of_facets(),
            surface.tags().len()
        );
        Ok(surface)
    }

    /// Build from explicitly tagged facets (e.g. boundary metadata of an input file).
    pub fn from_facets<F>(mesh: &Mesh, facets: &[(F, u32)]) -> Result<Self, MeshAdaptError>
    where
        F: AsRef<[usize]>,
    {
        let mut surface = Self::empty(mesh.dim());
        for (nodes, tag) in facets {
            let nodes = nodes.as_ref();
            for &v in nodes {
                mesh.vertex(v)?;
            }
            surface.insert_facet(nodes, *tag)?;
        }
        Ok(surface)
    }

    fn empty(dim: usize) -> Self {
        Self {
            dim,
            facets: Vec::new(),
            edge_facets: BTreeMap::new(),
            facet_lookup: BTreeMap::new(),
            vertex_tags: BTreeMap::new(),
        }
    }

    fn insert_facet(&mut self, nodes: &[usize], tag: u32) -> Result<usize, MeshAdaptError> {
        if nodes.len() != self.dim {
            return Err(MeshAdaptError::InvalidConnectivity(format!(
                "a {}D surface facet needs {} vertices, got {}",
                self.dim,
                self.dim,
                nodes.len()
            )));
        }
        let idx = self.facets.len();
        let mut stored = [usize::MAX; 3];
        stored[..nodes.len()].copy_from_slice(nodes);
        for (k, &a) in nodes.iter().enumerate() {
            for &b in &nodes[k + 1..] {
                if a == b {
                    return Err(MeshAdaptError::InvalidConnectivity(format!(
                        "surface facet repeats vertex {a}: {nodes:?}"
                    )));
                }
                self.edge_facets.entry(edge_key(a, b)).or_default().push(idx);
            }
            self.vertex_tags.entry(a).or_default().insert(tag);
        }
        self.facet_lookup.entry(sorted_key(nodes)).or_insert(idx);
        self.facets.push(Slot::Active(Facet { nodes: stored, tag }));
        Ok(idx)
    }

    /// Spatial dimension of the owning mesh.
    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of active facets.
    pub fn number_of_facets(&self) -> usize {
        self.facets.iter().filter(|s| s.is_active()).count()
    }

    /// Iterate `(index, vertices, tag)` over active facets.
    pub fn facets(&self) -> impl Iterator<Item = (usize, &[usize], u32)> + '_ {
        let n = self.dim;
        active_entries(&self.facets).map(move |(idx, f)| (idx, &f.nodes[..n], f.tag))
    }

    /// Vertices and tag of an active facet.
    pub fn facet(&self, idx: usize) -> Result<(&[usize], u32), MeshAdaptError> {
        self.facets
            .get(idx)
            .and_then(Slot::as_active)
            .map(|f| (&f.nodes[..self.dim], f.tag))
            .ok_or_else(|| MeshAdaptError::out_of_range("facet", idx, self.facets.len()))
    }

    /// Tag of the boundary facet with exactly these vertices, if any.
    pub fn is_boundary_facet(&self, nodes: &[usize]) -> Option<u32> {
        self.facet_lookup
            .get(&sorted_key(nodes))
            .and_then(|&idx| self.facet(idx).ok())
            .map(|(_, tag)| tag)
    }

    /// Tag of a boundary edge; the smallest tag when the edge is a ridge between patches.
    pub fn is_boundary_edge(&self, a: usize, b: usize) -> Option<u32> {
        self.edge_tags(a, b).into_iter().min()
    }

    /// Tags of all facets incident to edge `(a, b)`, in facet order.
    pub fn edge_tags(&self, a: usize, b: usize) -> Vec<u32> {
        self.edge_facets(a, b)
            .iter()
            .filter_map(|&f| self.facet(f).ok().map(|(_, tag)| tag))
            .collect()
    }

    /// Active facets incident to edge `(a, b)`.
    pub fn edge_facets(&self, a: usize, b: usize) -> &[usize] {
        self.edge_facets
            .get(&edge_key(a, b))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Tags carried by a vertex (empty for interior vertices).
    pub fn vertex_tags(&self, v: usize) -> Option<&BTreeSet<u32>> {
        self.vertex_tags.get(&v)
    }

    /// `true` if `v` lies on the boundary.
    pub fn is_boundary_vertex(&self, v: usize) -> bool {
        self.vertex_tags.get(&v).is_some_and(|tags| !tags.is_empty())
    }

    /// Distinct tags of all active facets.
    pub fn tags(&self) -> BTreeSet<u32> {
        self.facets().map(|(_, _, tag)| tag).collect()
    }

    /// Record `tag` on vertex `v` (a midpoint inserted on a tagged edge).
    pub(crate) fn tag_vertex(&mut self, v: usize, tag: u32) {
        self.vertex_tags.entry(v).or_default().insert(tag);
    }

    /// Replace facet `idx` by `children`, which inherit its tag.
    pub(crate) fn split_facet(
        &mut self,
        idx: usize,
        children: &[Vec<usize>],
    ) -> Result<(), MeshAdaptError> {
        let len = self.facets.len();
        let facet = self
            .facets
            .get_mut(idx)
            .and_then(Slot::release)
            .ok_or_else(|| MeshAdaptError::out_of_range("facet", idx, len))?;
        let nodes = &facet.nodes[..self.dim];
        for (k, &a) in nodes.iter().enumerate() {
            for &b in &nodes[k + 1..] {
                let key = edge_key(a, b);
                if let Some(list) = self.edge_facets.get_mut(&key) {
                    list.retain(|&f| f != idx);
                    if list.is_empty() {
                        self.edge_facets.remove(&key);
                    }
                }
            }
        }
        self.facet_lookup.remove(&sorted_key(nodes));
        for child in children {
            self.insert_facet(child, facet.tag)?;
        }
        Ok(())
    }

    /// Rewrite facet vertices after mesh defragmentation and compact the facet arena.
    pub fn renumber(&mut self, vertices: &SlotRenumbering) -> Result<(), MeshAdaptError> {
        let dim = self.dim;
        let old_tags = std::mem::take(&mut self.vertex_tags);
        let mut facets = Vec::new();
        for (_, f) in active_entries(&self.facets) {
            let nodes: Vec<usize> = f.nodes[..dim]
                .iter()
                .map(|&v| vertices.remap_index(v))
                .collect::<Result<_, _>>()?;
            facets.push((nodes, f.tag));
        }
        *self = Self::empty(dim);
        for (nodes, tag) in &facets {
            self.insert_facet(nodes, *tag)?;
        }
        for (v, tags) in old_tags {
            if let Some(new) = vertices.new_index(v) {
                self.vertex_tags.entry(new).or_default().extend(tags);
            }
        }
        Ok(())
    }
}

/// Flood-fill tags over facets sharing a sub-facet (edge in 3D, vertex in 2D)
/// whose outward normals agree.
fn coplanar_tags(mesh: &Mesh, facets: &[Vec<usize>]) -> Result<Vec<u32>, MeshAdaptError> {
    let dim = mesh.dim();
    let normals: Vec<Point> = facets
        .iter()
        .map(|nodes| {
            let points: Vec<Point> = nodes
                .iter()
                .map(|&v| mesh.coords(v))
                .collect::<Result<_, _>>()?;
            facet_normal(dim, &points)
        })
        .collect::<Result<_, _>>()?;

    let mut by_ridge: BTreeMap<Vec<usize>, Vec<usize>> = BTreeMap::new();
    for (f, nodes) in facets.iter().enumerate() {
        for skip in 0..nodes.len() {
            let mut ridge: Vec<usize> = nodes
                .iter()
                .enumerate()
                .filter(|&(k, _)| k != skip)
                .map(|(_, &v)| v)
                .collect();
            ridge.sort_unstable();
            by_ridge.entry(ridge).or_default().push(f);
        }
    }

    let mut tags = vec![0u32; facets.len()];
    let mut next = 1u32;
    for seed in 0..facets.len() {
        if tags[seed] != 0 {
            continue;
        }
        tags[seed] = next;
        let mut stack = vec![seed];
        while let Some(f) = stack.pop() {
            let nodes = &facets[f];
            for skip in 0..nodes.len() {
                let mut ridge: Vec<usize> = nodes
                    .iter()
                    .enumerate()
                    .filter(|&(k, _)| k != skip)
                    .map(|(_, &v)| v)
                    .collect();
                ridge.sort_unstable();
                for &g in by_ridge.get(&ridge).map(Vec::as_slice).unwrap_or(&[]) {
                    if tags[g] == 0 && dot(normals[seed], normals[g]) > 1.0 - COPLANAR_TOLERANCE {
                        tags[g] = next;
                        stack.push(g);
                    }
                }
            }
        }
        next += 1;
    }
    Ok(tags)
}

impl DebugInvariants for Surface {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "Surface");
    }

    fn validate_invariants(&self) -> Result<(), MeshAdaptError> {
        for (idx, nodes, tag) in self.facets() {
            for (k, &a) in nodes.iter().enumerate() {
                for &b in &nodes[k + 1..] {
                    if !self.edge_facets(a, b).contains(&idx) {
                        return Err(MeshAdaptError::InvalidConnectivity(format!(
                            "surface edge ({a}, {b}) does not list facet {idx}"
                        )));
                    }
                }
                if !self.vertex_tags(a).is_some_and(|tags| tags.contains(&tag)) {
                    return Err(MeshAdaptError::InvalidConnectivity(format!(
                        "surface vertex {a} is missing tag {tag}"
                    )));
                }
            }
        }
        for (&(a, b), list) in &self.edge_facets {
            for &f in list {
                if self.facet(f).is_err() {
                    return Err(MeshAdaptError::InvalidConnectivity(format!(
                        "surface edge ({a}, {b}) lists freed facet {f}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::meshgen::{box_mesh, rectangle_mesh};

    #[test]
    fn square_boundary_has_four_sides() {
        let mesh = rectangle_mesh(2, 2, [0.0, 0.0], [1.0, 1.0]).unwrap();
        let surface = Surface::new(&mesh).unwrap();
        assert_eq!(surface.number_of_facets(), 8);
        assert_eq!(surface.tags(), (1..=4).collect::<BTreeSet<u32>>());
        // corner vertex sits on two sides, center vertex on none
        assert_eq!(surface.vertex_tags(0).map(BTreeSet::len), Some(2));
        assert!(!surface.is_boundary_vertex(4));
        assert!(surface.is_boundary_edge(0, 1).is_some());
        assert_eq!(surface.is_boundary_edge(0, 4), None);
        surface.validate_invariants().unwrap();
    }

    #[test]
    fn cube_boundary_has_six_faces_with_outward_normals() {
        let mesh = box_mesh([1, 1, 1], [0.0; 3], [1.0; 3]).unwrap();
        let surface = Surface::new(&mesh).unwrap();
        assert_eq!(surface.number_of_facets(), 12);
        assert_eq!(surface.tags().len(), 6);
        let center = [0.5, 0.5, 0.5];
        for (_, nodes, _) in surface.facets() {
            let points: Vec<Point> = nodes.iter().map(|&v| mesh.coords(v).unwrap()).collect();
            let n = facet_normal(3, &points).unwrap();
            assert!(dot(n, sub(points[0], center)) > 0.0);
        }
    }

    #[test]
    fn split_facet_keeps_tag_and_lookups() {
        let mesh = rectangle_mesh(1, 1, [0.0, 0.0], [1.0, 1.0]).unwrap();
        let mut surface = Surface::new(&mesh).unwrap();
        let (idx, nodes, tag) = surface
            .facets()
            .find(|(_, nodes, _)| nodes.contains(&0) && nodes.contains(&1))
            .map(|(i, n, t)| (i, n.to_vec(), t))
            .unwrap();
        surface.split_facet(idx, &[vec![nodes[0], 9], vec![9, nodes[1]]]).unwrap();
        surface.tag_vertex(9, tag);
        assert_eq!(surface.is_boundary_edge(0, 1), None);
        assert_eq!(surface.is_boundary_edge(0, 9), Some(tag));
        assert_eq!(surface.is_boundary_facet(&[9, 1]), Some(tag));
        assert_eq!(surface.number_of_facets(), 5);
        surface.validate_invariants().unwrap();
    }
}
