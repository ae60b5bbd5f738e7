//! Arena-backed simplex mesh with incremental adjacency.
//!
//! Vertices and elements live in [`Slot`] arenas. Removal frees a slot but
//! never shifts indices, so a refinement sweep can hold indices across
//! mutations. [`Mesh::defragment`] compacts both arenas and returns the
//! renumbering so callers can remap surfaces and per-vertex fields.
//!
//! # Invariants
//! - Every active element references `dim + 1` distinct active vertices and has
//!   strictly positive signed volume (orientation is repaired on insertion).
//! - Every stored metric is finite and positive-definite.
//! - `vertex_elements[v]` is exactly the set of active elements containing `v`.
//! - `vertex_neighbors[v][w]` counts the active elements containing edge `(v, w)`;
//!   an entry is present iff the count is positive.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::algs::renumber::{MeshRenumbering, SlotRenumbering};
use crate::debug_invariants::DebugInvariants;
use crate::geometry::metrics::{Point, signed_measure};
use crate::mesh_error::MeshAdaptError;
use crate::metric::tensor::{MetricTensor, metric_length};
use crate::topology::cell_type::CellType;
use crate::topology::slot::{Slot, active_entries};
use crate::topology::surface::Surface;
use crate::topology::validation::{Adjacency, check_adjacency};

/// Geometric and metric data of one vertex.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    /// Position; `z = 0` in 2D.
    pub coords: Point,
    /// Target metric at the vertex.
    pub metric: MetricTensor,
}

/// Connectivity of one simplex; only the first `dim + 1` entries are used.
type ElementNodes = [usize; 4];

/// Relative size below which a metric eigenvalue counts as rounding noise.
const METRIC_ROUNDING: f64 = 1e-12;

/// Unstructured triangle (2D) or tetrahedral (3D) mesh.
#[derive(Clone, Debug)]
pub struct Mesh {
    dim: usize,
    vertices: Vec<Slot<Vertex>>,
    elements: Vec<Slot<ElementNodes>>,
    adjacency: Adjacency,
    free_vertices: Vec<usize>,
    n_vertices: usize,
    n_elements: usize,
    metric_initialized: bool,
}

impl Mesh {
    /// Empty mesh of spatial dimension `dim` (2 or 3).
    pub fn new(dim: usize) -> Result<Self, MeshAdaptError> {
        if dim != 2 && dim != 3 {
            return Err(MeshAdaptError::InvalidDimension(dim));
        }
        Ok(Self {
            dim,
            vertices: Vec::new(),
            elements: Vec::new(),
            adjacency: Adjacency::default(),
            free_vertices: Vec::new(),
            n_vertices: 0,
            n_elements: 0,
            metric_initialized: false,
        })
    }

    /// Build a mesh from coordinates and element connectivity.
    ///
    /// Every vertex gets the identity metric; the metric still counts as
    /// uninitialized until a [`crate::metric::MetricField`] writes one.
    pub fn from_connectivity<E>(
        dim: usize,
        coords: &[Point],
        elements: &[E],
    ) -> Result<Self, MeshAdaptError>
    where
        E: AsRef<[usize]>,
    {
        let mut mesh = Self::new(dim)?;
        mesh.vertices.reserve(coords.len());
        mesh.elements.reserve(elements.len());
        for &p in coords {
            mesh.add_vertex(p, MetricTensor::identity(dim))?;
        }
        for nodes in elements {
            mesh.add_element(nodes.as_ref())?;
        }
        Ok(mesh)
    }

    /// Spatial dimension.
    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Element cell type of this mesh.
    #[inline]
    pub fn cell_type(&self) -> CellType {
        if self.dim == 2 {
            CellType::Triangle
        } else {
            CellType::Tetrahedron
        }
    }

    /// Number of active vertices. O(1).
    #[inline]
    pub fn get_number_nodes(&self) -> usize {
        self.n_vertices
    }

    /// Number of active elements. O(1).
    #[inline]
    pub fn get_number_elements(&self) -> usize {
        self.n_elements
    }

    /// Number of vertex slots (active or free); the length of per-vertex fields.
    #[inline]
    pub fn vertex_slot_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of element slots (active or free).
    #[inline]
    pub fn element_slot_count(&self) -> usize {
        self.elements.len()
    }

    /// `true` once a metric field has been written with `update_mesh`.
    #[inline]
    pub fn is_metric_initialized(&self) -> bool {
        self.metric_initialized
    }

    /// Add a vertex, reusing a free slot when one exists.
    pub fn add_vertex(&mut self, coords: Point, metric: MetricTensor) -> Result<usize, MeshAdaptError> {
        let metric = self.checked_metric(metric)?;
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(MeshAdaptError::InvalidParameter(format!(
                "non-finite vertex coordinates {coords:?}"
            )));
        }
        let mut coords = coords;
        if self.dim == 2 {
            coords[2] = 0.0;
        }
        let vertex = Vertex { coords, metric };
        let idx = match self.free_vertices.pop() {
            Some(idx) => {
                self.vertices[idx] = Slot::Active(vertex);
                idx
            }
            None => {
                self.vertices.push(Slot::Active(vertex));
                self.adjacency.push_vertex();
                self.vertices.len() - 1
            }
        };
        self.n_vertices += 1;
        Ok(idx)
    }

    /// Free a vertex slot. The vertex must not be referenced by any element.
    pub fn remove_vertex(&mut self, idx: usize) -> Result<(), MeshAdaptError> {
        self.vertex(idx)?;
        let incident = self.adjacency.vertex_elements[idx].len();
        if incident > 0 {
            return Err(MeshAdaptError::VertexInUse {
                vertex: idx,
                elements: incident,
            });
        }
        self.vertices[idx].release();
        self.free_vertices.push(idx);
        self.n_vertices -= 1;
        Ok(())
    }

    /// Append an element, repairing its orientation.
    ///
    /// A negatively oriented tuple has its last two vertices swapped; a
    /// zero-volume tuple is rejected with [`MeshAdaptError::DegenerateElement`].
    pub fn add_element(&mut self, nodes: &[usize]) -> Result<usize, MeshAdaptError> {
        let n = self.dim + 1;
        if nodes.len() != n {
            return Err(MeshAdaptError::InvalidConnectivity(format!(
                "a {}D element needs {n} vertices, got {}",
                self.dim,
                nodes.len()
            )));
        }
        let mut tuple: ElementNodes = [usize::MAX; 4];
        for (k, &v) in nodes.iter().enumerate() {
            self.vertex(v)?;
            if nodes[..k].contains(&v) {
                return Err(MeshAdaptError::InvalidConnectivity(format!(
                    "element repeats vertex {v}: {nodes:?}"
                )));
            }
            tuple[k] = v;
        }
        let idx = self.elements.len();
        let volume = self.signed_volume_of(&tuple[..n])?;
        if !(volume.abs() > 0.0) {
            return Err(MeshAdaptError::DegenerateElement {
                element: idx,
                volume,
            });
        }
        if volume < 0.0 {
            tuple.swap(n - 2, n - 1);
        }
        self.adjacency.insert_element(idx, &tuple[..n], self.cell_type());
        self.elements.push(Slot::Active(tuple));
        self.n_elements += 1;
        Ok(idx)
    }

    /// Free an element slot and update adjacency.
    pub fn remove_element(&mut self, idx: usize) -> Result<(), MeshAdaptError> {
        let len = self.elements.len();
        let tuple = self
            .elements
            .get_mut(idx)
            .and_then(Slot::release)
            .ok_or_else(|| MeshAdaptError::out_of_range("element", idx, len))?;
        let n = self.dim + 1;
        self.adjacency.remove_element(idx, &tuple[..n], self.cell_type());
        self.n_elements -= 1;
        Ok(())
    }

    /// Vertex data of an active vertex.
    pub fn vertex(&self, idx: usize) -> Result<&Vertex, MeshAdaptError> {
        self.vertices
            .get(idx)
            .and_then(Slot::as_active)
            .ok_or_else(|| MeshAdaptError::out_of_range("vertex", idx, self.vertices.len()))
    }

    /// Coordinates of an active vertex.
    pub fn coords(&self, idx: usize) -> Result<Point, MeshAdaptError> {
        self.vertex(idx).map(|v| v.coords)
    }

    /// Metric tensor stored at an active vertex.
    pub fn metric(&self, idx: usize) -> Result<&MetricTensor, MeshAdaptError> {
        self.vertex(idx).map(|v| &v.metric)
    }

    /// Overwrite the metric of an active vertex.
    pub fn set_vertex_metric(&mut self, idx: usize, metric: MetricTensor) -> Result<(), MeshAdaptError> {
        let metric = self.checked_metric(metric)?;
        let len = self.vertices.len();
        let vertex = self
            .vertices
            .get_mut(idx)
            .and_then(Slot::as_active_mut)
            .ok_or_else(|| MeshAdaptError::out_of_range("vertex", idx, len))?;
        vertex.metric = metric;
        Ok(())
    }

    /// Reject tensors of the wrong dimension and tensors that are not
    /// positive-definite. Eigenvalues within rounding of zero are lifted to
    /// `METRIC_ROUNDING` times the largest one.
    fn checked_metric(&self, metric: MetricTensor) -> Result<MetricTensor, MeshAdaptError> {
        if metric.dim() != self.dim {
            return Err(MeshAdaptError::InvalidParameter(format!(
                "metric of dimension {} on a {}D mesh",
                metric.dim(),
                self.dim
            )));
        }
        if !metric.is_finite() {
            return Err(MeshAdaptError::InvalidParameter(format!(
                "non-finite metric tensor {:?}",
                metric.to_row_major()
            )));
        }
        let (lo, hi) = metric.eigenvalue_bounds();
        if !(hi > 0.0) || lo < -METRIC_ROUNDING * hi {
            return Err(MeshAdaptError::InvalidParameter(format!(
                "metric tensor is not positive-definite: eigenvalues in [{lo:e}, {hi:e}]"
            )));
        }
        if lo > 0.0 {
            Ok(metric)
        } else {
            Ok(metric.clamp_eigenvalues(METRIC_ROUNDING * hi, f64::INFINITY))
        }
    }

    pub(crate) fn mark_metric_initialized(&mut self) {
        self.metric_initialized = true;
    }

    /// Connectivity of an active element (`dim + 1` vertices, positively oriented).
    pub fn element(&self, idx: usize) -> Result<&[usize], MeshAdaptError> {
        let n = self.dim + 1;
        self.elements
            .get(idx)
            .and_then(Slot::as_active)
            .map(|tuple| &tuple[..n])
            .ok_or_else(|| MeshAdaptError::out_of_range("element", idx, self.elements.len()))
    }

    /// `true` if `idx` is an active vertex.
    pub fn is_active_vertex(&self, idx: usize) -> bool {
        self.vertices.get(idx).is_some_and(Slot::is_active)
    }

    /// `true` if `idx` is an active element.
    pub fn is_active_element(&self, idx: usize) -> bool {
        self.elements.get(idx).is_some_and(Slot::is_active)
    }

    /// Iterate `(index, vertex)` over active vertices.
    pub fn vertices(&self) -> impl Iterator<Item = (usize, &Vertex)> + '_ {
        active_entries(&self.vertices)
    }

    /// Iterate `(index, connectivity)` over active elements.
    pub fn elements(&self) -> impl Iterator<Item = (usize, &[usize])> + '_ {
        let n = self.dim + 1;
        active_entries(&self.elements).map(move |(idx, tuple)| (idx, &tuple[..n]))
    }

    /// Active elements containing vertex `v`.
    pub fn vertex_elements(&self, v: usize) -> Result<&BTreeSet<usize>, MeshAdaptError> {
        self.vertex(v)?;
        Ok(&self.adjacency.vertex_elements[v])
    }

    /// Vertices sharing an edge with `v`, in increasing order.
    pub fn vertex_neighbors(&self, v: usize) -> Result<impl Iterator<Item = usize> + '_, MeshAdaptError> {
        self.vertex(v)?;
        Ok(self.adjacency.vertex_neighbors[v].keys().copied())
    }

    /// Active elements containing both `a` and `b`.
    pub fn edge_elements(&self, a: usize, b: usize) -> Result<Vec<usize>, MeshAdaptError> {
        let ea = self.vertex_elements(a)?;
        let eb = self.vertex_elements(b)?;
        Ok(ea.intersection(eb).copied().collect())
    }

    /// All edges `(a, b)` with `a < b`, sorted.
    pub fn edges(&self) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        for (a, neighbors) in self.adjacency.vertex_neighbors.iter().enumerate() {
            out.extend(neighbors.range(a + 1..).map(|(&b, _)| (a, b)));
        }
        out
    }

    /// Metric length of edge `(a, b)` under the averaged endpoint metrics.
    pub fn metric_length(&self, a: usize, b: usize) -> Result<f64, MeshAdaptError> {
        let va = self.vertex(a)?;
        let vb = self.vertex(b)?;
        Ok(metric_length(va.coords, &va.metric, vb.coords, &vb.metric))
    }

    /// Corner points of an active element.
    pub fn element_points(&self, idx: usize) -> Result<Vec<Point>, MeshAdaptError> {
        self.element(idx)?
            .iter()
            .map(|&v| self.coords(v))
            .collect()
    }

    /// Signed volume (area in 2D) of an active element.
    pub fn element_volume(&self, idx: usize) -> Result<f64, MeshAdaptError> {
        let points = self.element_points(idx)?;
        signed_measure(self.cell_type(), &points)
    }

    /// Sum of active element volumes.
    pub fn total_volume(&self) -> f64 {
        self.elements()
            .filter_map(|(_, nodes)| self.signed_volume_of(nodes).ok())
            .sum()
    }

    fn signed_volume_of(&self, nodes: &[usize]) -> Result<f64, MeshAdaptError> {
        let points: Vec<Point> = nodes
            .iter()
            .map(|&v| self.coords(v))
            .collect::<Result<_, _>>()?;
        signed_measure(self.cell_type(), &points)
    }

    pub(crate) fn adjacency(&self) -> &Adjacency {
        &self.adjacency
    }

    /// Compact both arenas, preserving the relative order of active entities.
    ///
    /// This rewrites only the mesh. Any [`Surface`] or per-vertex array built
    /// on the old indices is stale afterwards until remapped with the returned
    /// renumbering ([`Surface::renumber`], [`SlotRenumbering::remap_field`]).
    /// Prefer [`Mesh::defragment_with`], which does both in one call.
    #[must_use = "a surface or field built on the old indices must be remapped with the renumbering"]
    pub fn defragment(&mut self) -> Result<MeshRenumbering, MeshAdaptError> {
        let vertex_map = SlotRenumbering::compact(&self.vertices);
        let element_map = SlotRenumbering::compact(&self.elements);

        let elements = element_map.remap_slots(std::mem::take(&mut self.elements))?;
        let n = self.dim + 1;
        let mut remapped = Vec::with_capacity(elements.len());
        for slot in elements {
            if let Slot::Active(mut tuple) = slot {
                for v in tuple.iter_mut().take(n) {
                    *v = vertex_map.remap_index(*v)?;
                }
                remapped.push(Slot::Active(tuple));
            }
        }
        self.elements = remapped;
        self.vertices = vertex_map.remap_slots(std::mem::take(&mut self.vertices))?;
        self.free_vertices.clear();
        self.free_vertices.shrink_to_fit();
        self.rebuild_adjacency();
        log::debug!(
            "defragment: {} vertices, {} elements",
            self.vertices.len(),
            self.elements.len()
        );
        Ok(MeshRenumbering {
            vertices: vertex_map,
            elements: element_map,
        })
    }

    /// Defragment and remap a surface plus caller-held per-vertex fields.
    ///
    /// Each field is `(values, components)` with `components` values per vertex slot.
    pub fn defragment_with(
        &mut self,
        surface: &mut Surface,
        fields: &mut [(&mut Vec<f64>, usize)],
    ) -> Result<MeshRenumbering, MeshAdaptError> {
        let slots = self.vertices.len();
        for (values, components) in fields.iter() {
            if values.len() != slots * *components {
                return Err(MeshAdaptError::FieldLengthMismatch {
                    expected: slots * *components,
                    found: values.len(),
                });
            }
        }
        let map = self.defragment()?;
        surface.renumber(&map.vertices)?;
        for (values, components) in fields.iter_mut() {
            let remapped = map.vertices.remap_field(values.as_slice(), *components)?;
            **values = remapped;
        }
        Ok(map)
    }

    fn rebuild_adjacency(&mut self) {
        let cell_type = self.cell_type();
        let n = self.dim + 1;
        let mut adjacency = Adjacency::with_vertices(self.vertices.len());
        for (idx, tuple) in active_entries(&self.elements) {
            adjacency.insert_element(idx, &tuple[..n], cell_type);
        }
        self.adjacency = adjacency;
    }
}

impl DebugInvariants for Mesh {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "Mesh");
    }

    fn validate_invariants(&self) -> Result<(), MeshAdaptError> {
        let active_vertices = self.vertices.iter().filter(|s| s.is_active()).count();
        if active_vertices != self.n_vertices {
            return Err(MeshAdaptError::InvalidConnectivity(format!(
                "vertex count {} but {} active slots",
                self.n_vertices, active_vertices
            )));
        }
        let active_elements = self.elements.iter().filter(|s| s.is_active()).count();
        if active_elements != self.n_elements {
            return Err(MeshAdaptError::InvalidConnectivity(format!(
                "element count {} but {} active slots",
                self.n_elements, active_elements
            )));
        }
        for (idx, nodes) in self.elements() {
            let volume = self.signed_volume_of(nodes)?;
            if !(volume > 0.0) {
                return Err(MeshAdaptError::DegenerateElement { element: idx, volume });
            }
        }
        check_adjacency(self)
    }
}
