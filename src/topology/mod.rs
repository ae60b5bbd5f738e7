//! Mesh storage and connectivity.
//!
//! This module holds the entity stores and the static data refinement is built on:
//! - [`mesh::Mesh`]: vertex/element arenas with vertex→element and vertex→vertex adjacency
//! - [`surface::Surface`]: tagged boundary facets
//! - [`refine`]: the refinement template tables
//! - [`validation`]: adjacency and conformity checks
//!
//! Entities are addressed by slot index; removed entities leave a
//! [`slot::Slot::Free`] hole until [`mesh::Mesh::defragment`] compacts them.

pub mod cell_type;
pub mod mesh;
pub mod refine;
pub mod slot;
pub mod surface;
pub mod validation;

pub use cell_type::CellType;
pub use mesh::{Mesh, Vertex};
pub use slot::Slot;
pub use surface::Surface;
