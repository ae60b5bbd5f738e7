//! Mesh file import and export.
//!
//! The refinement core never touches files; these helpers sit at its edge and
//! move a [`Mesh`](crate::topology::mesh::Mesh) plus point fields in and out of
//! legacy VTK files.

pub mod vtk;

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::mesh_error::MeshAdaptError;
use crate::topology::mesh::Mesh;
use crate::topology::surface::Surface;

pub use vtk::{VtkMesh, read_vtk, write_vtk};

/// Write `mesh` to the VTK file at `path`.
pub fn write_vtk_file(
    path: impl AsRef<Path>,
    mesh: &Mesh,
    surface: Option<&Surface>,
    fields: &[(&str, &[f64])],
) -> Result<(), MeshAdaptError> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_vtk(&mut writer, mesh, surface, fields)?;
    writer.flush()?;
    Ok(())
}

/// Read the VTK file at `path`.
pub fn read_vtk_file(path: impl AsRef<Path>) -> Result<VtkMesh, MeshAdaptError> {
    let file = File::open(path)?;
    read_vtk(BufReader::new(file))
}
