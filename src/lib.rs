#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-adapt
//!
//! mesh-adapt refines unstructured triangle and tetrahedral meshes so that
//! every edge has (close to) unit length under a user-supplied anisotropic
//! metric field. It is meant to sit between a solver and its next solve:
//! derive a metric from a solution, refine, compact, export.
//!
//! ## Features
//! - Arena-backed [`Mesh`](topology::mesh::Mesh) with incremental
//!   vertex→element and vertex→vertex adjacency and explicit defragmentation
//! - Tagged boundary [`Surface`](topology::surface::Surface) that is split in
//!   lockstep with the volume mesh
//! - [`MetricField`](metric::MetricField): Hessian recovery, tensor
//!   intersection, element-count scaling, size bounds and gradation
//! - [`Refine`](adapt::Refine): deterministic, conforming edge-split sweeps
//!   with parallel scan and template phases (Rayon, optional)
//! - Legacy VTK import/export for inspection in ParaView
//!
//! ## Determinism
//!
//! Edge selection orders candidates by metric length and then by vertex pair,
//! and every parallel phase preserves input order, so a refinement produces the
//! same mesh regardless of thread count.
//!
//! ## Usage
//! ```rust
//! use mesh_adapt::prelude::*;
//!
//! let mut mesh = box_mesh([1, 1, 1], [0.0; 3], [1.0; 3])?;
//! let mut surface = Surface::new(&mesh)?;
//! let values: Vec<f64> = mesh
//!     .vertices()
//!     .map(|(_, v)| v.coords[0].powi(2) + v.coords[1].powi(2) + v.coords[2].powi(2))
//!     .collect();
//!
//! let mut field = MetricField::new(&mut mesh, &surface);
//! field.add_field(&values, 1.0)?;
//! field.apply_nelements(200)?;
//! field.update_mesh()?;
//!
//! let report = Refine::new(&mut mesh, &mut surface).run()?;
//! assert!(report.elements_added > 0);
//! mesh.defragment_with(&mut surface, &mut [])?;
//! # Ok::<(), MeshAdaptError>(())
//! ```

pub mod adapt;
pub mod algs;
pub mod debug_invariants;
pub mod geometry;
pub mod io;
pub mod mesh_error;
pub mod metric;
pub mod topology;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::adapt::{Refine, RefineOptions, RefineReport, RefineStatus};
    pub use crate::algs::meshgen::{box_mesh, rectangle_mesh};
    pub use crate::algs::renumber::{MeshRenumbering, SlotRenumbering};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::geometry::quality::QualityStats;
    pub use crate::mesh_error::MeshAdaptError;
    pub use crate::metric::{MetricField, MetricOptions, MetricTensor};
    pub use crate::topology::cell_type::CellType;
    pub use crate::topology::mesh::{Mesh, Vertex};
    pub use crate::topology::surface::Surface;
    pub use crate::topology::validation::{NonManifoldHandling, validate_conformity};
}
