//! Supporting algorithms: parallel helpers, renumbering and mesh generators.

pub mod meshgen;
pub mod parallel;
pub mod renumber;

pub use meshgen::{box_mesh, rectangle_mesh};
pub use renumber::{MeshRenumbering, SlotRenumbering};
