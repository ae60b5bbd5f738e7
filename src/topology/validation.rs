//! Topology validation helpers.
//!
//! [`Adjacency`] is the derived vertex→element / vertex→vertex store kept by
//! [`Mesh`]; the checks here rebuild it from connectivity and compare, and
//! verify that the mesh is conforming (no hanging nodes, boundary facets
//! matching the [`Surface`]).

use std::collections::{BTreeMap, BTreeSet};

use hashbrown::HashMap;

use crate::mesh_error::MeshAdaptError;
use crate::topology::cell_type::{CellType, local_facets};
use crate::topology::mesh::Mesh;
use crate::topology::surface::Surface;

/// Derived adjacency of a mesh, indexed by vertex slot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Adjacency {
    /// Active elements incident to each vertex.
    pub vertex_elements: Vec<BTreeSet<usize>>,
    /// Neighbor vertex → number of active elements containing that edge.
    pub vertex_neighbors: Vec<BTreeMap<usize, u32>>,
}

impl Adjacency {
    /// Empty adjacency for `n` vertex slots.
    pub fn with_vertices(n: usize) -> Self {
        Self {
            vertex_elements: vec![BTreeSet::new(); n],
            vertex_neighbors: vec![BTreeMap::new(); n],
        }
    }

    pub(crate) fn push_vertex(&mut self) {
        self.vertex_elements.push(BTreeSet::new());
        self.vertex_neighbors.push(BTreeMap::new());
    }

    pub(crate) fn insert_element(&mut self, element: usize, nodes: &[usize], cell_type: CellType) {
        for &v in nodes {
            self.vertex_elements[v].insert(element);
        }
        for &[i, j] in cell_type.edges() {
            let (a, b) = (nodes[i], nodes[j]);
            *self.vertex_neighbors[a].entry(b).or_insert(0) += 1;
            *self.vertex_neighbors[b].entry(a).or_insert(0) += 1;
        }
    }

    pub(crate) fn remove_element(&mut self, element: usize, nodes: &[usize], cell_type: CellType) {
        for &v in nodes {
            self.vertex_elements[v].remove(&element);
        }
        for &[i, j] in cell_type.edges() {
            let (a, b) = (nodes[i], nodes[j]);
            decrement(&mut self.vertex_neighbors[a], b);
            decrement(&mut self.vertex_neighbors[b], a);
        }
    }

    /// Rebuild adjacency from the active elements of `mesh`.
    pub fn from_mesh(mesh: &Mesh) -> Self {
        let mut adjacency = Self::with_vertices(mesh.vertex_slot_count());
        for (idx, nodes) in mesh.elements() {
            adjacency.insert_element(idx, nodes, mesh.cell_type());
        }
        adjacency
    }
}

fn decrement(counts: &mut BTreeMap<usize, u32>, key: usize) {
    if let Some(count) = counts.get_mut(&key) {
        *count -= 1;
        if *count == 0 {
            counts.remove(&key);
        }
    }
}

/// Behavior for facets shared by more than two elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonManifoldHandling {
    /// Skip non-manifold detection.
    Ignore,
    /// Log a warning on non-manifold facets.
    Warn,
    /// Return an error on non-manifold facets.
    Error,
}

/// Check that the incremental adjacency of `mesh` matches its connectivity.
pub fn check_adjacency(mesh: &Mesh) -> Result<(), MeshAdaptError> {
    let rebuilt = Adjacency::from_mesh(mesh);
    let current = mesh.adjacency();
    for v in 0..mesh.vertex_slot_count() {
        if rebuilt.vertex_elements[v] != current.vertex_elements[v] {
            return Err(MeshAdaptError::InvalidConnectivity(format!(
                "vertex {v}: incident elements {:?}, expected {:?}",
                current.vertex_elements[v], rebuilt.vertex_elements[v]
            )));
        }
        if rebuilt.vertex_neighbors[v] != current.vertex_neighbors[v] {
            return Err(MeshAdaptError::InvalidConnectivity(format!(
                "vertex {v}: neighbor counts {:?}, expected {:?}",
                current.vertex_neighbors[v], rebuilt.vertex_neighbors[v]
            )));
        }
        if !rebuilt.vertex_elements[v].is_empty() && !mesh.is_active_vertex(v) {
            return Err(MeshAdaptError::InvalidConnectivity(format!(
                "free vertex slot {v} is referenced by elements"
            )));
        }
    }
    Ok(())
}

/// Count element facets by their sorted vertex set.
pub fn facet_incidence(mesh: &Mesh) -> HashMap<Vec<usize>, usize> {
    let mut counts: HashMap<Vec<usize>, usize> = HashMap::new();
    for (_, nodes) in mesh.elements() {
        for facet in local_facets(mesh.dim()) {
            let mut key: Vec<usize> = facet.iter().map(|&k| nodes[k]).collect();
            key.sort_unstable();
            *counts.entry(key).or_insert(0) += 1;
        }
    }
    counts
}

/// Validate that `mesh` is conforming.
///
/// Every facet must be shared by at most two elements. When a surface is
/// given, the facets with a single incident element must be exactly the
/// surface facets; a hanging node shows up as an unmatched facet.
pub fn validate_conformity(
    mesh: &Mesh,
    surface: Option<&Surface>,
    non_manifold: NonManifoldHandling,
) -> Result<(), MeshAdaptError> {
    let counts = facet_incidence(mesh);
    let mut boundary: BTreeSet<Vec<usize>> = BTreeSet::new();
    for (facet, &count) in &counts {
        match count {
            1 => {
                boundary.insert(facet.clone());
            }
            2 => {}
            _ => match non_manifold {
                NonManifoldHandling::Ignore => {}
                NonManifoldHandling::Warn => {
                    log::warn!("non-manifold facet {facet:?} shared by {count} elements");
                }
                NonManifoldHandling::Error => {
                    return Err(MeshAdaptError::InvalidConnectivity(format!(
                        "facet {facet:?} shared by {count} elements"
                    )));
                }
            },
        }
    }

    if let Some(surface) = surface {
        let mut surface_facets: BTreeSet<Vec<usize>> = BTreeSet::new();
        for (_, nodes, _) in surface.facets() {
            let mut key = nodes.to_vec();
            key.sort_unstable();
            surface_facets.insert(key);
        }
        if let Some(facet) = boundary.difference(&surface_facets).next() {
            return Err(MeshAdaptError::InvalidConnectivity(format!(
                "facet {facet:?} has one incident element but is not a surface facet"
            )));
        }
        if let Some(facet) = surface_facets.difference(&boundary).next() {
            return Err(not_on_boundary(facet));
        }
    }
    Ok(())
}

fn not_on_boundary(facet: &[usize]) -> MeshAdaptError {
    MeshAdaptError::InvalidConnectivity(format!(
        "surface facet {facet:?} is not a boundary facet of the mesh"
    ))
}

/// Validate that every surface facet has exactly one incident element.
///
/// Unlike [`validate_conformity`] this accepts a surface that tags only part
/// of the boundary.
pub fn validate_surface_facets(mesh: &Mesh, surface: &Surface) -> Result<(), MeshAdaptError> {
    let counts = facet_incidence(mesh);
    for (_, nodes, _) in surface.facets() {
        let mut key = nodes.to_vec();
        key.sort_unstable();
        if counts.get(&key) != Some(&1) {
            return Err(not_on_boundary(&key));
        }
    }
    Ok(())
}
