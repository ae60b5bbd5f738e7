//! Refine a unit cube towards a sheared boundary layer and write the result
//! as legacy VTK.
//!
//! ```text
//! cargo run --example refine_3d -- out.vtk
//! ```

use std::path::PathBuf;

use mesh_adapt::io::write_vtk_file;
use mesh_adapt::prelude::*;

fn main() -> Result<(), MeshAdaptError> {
    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("refine_3d.vtk"));

    let mut mesh = box_mesh([5, 5, 5], [0.0; 3], [1.0; 3])?;
    let mut surface = Surface::new(&mesh)?;

    // tanh layer across the plane x + y = 1
    let values: Vec<f64> = mesh
        .vertices()
        .map(|(_, v)| {
            let [x, y, z] = v.coords;
            (10.0 * (x + y - 1.0)).tanh() + 0.1 * z * z
        })
        .collect();
    let mut field = MetricField::new(&mut mesh, &surface);
    field.add_field(&values, 1.0)?;
    field.apply_nelements(20_000)?;
    field.apply_max_aspect_ratio(20.0)?;
    field.apply_gradation(1.5)?;
    field.update_mesh()?;
    println!(
        "input: {} vertices, {} elements",
        mesh.get_number_nodes(),
        mesh.get_number_elements()
    );

    let report = Refine::new(&mut mesh, &mut surface).run()?;
    println!(
        "{:?} after {} sweep(s): +{} vertices, +{} / -{} elements, longest edge {:.3}",
        report.status,
        report.sweeps,
        report.vertices_added,
        report.elements_added,
        report.elements_removed,
        report.max_edge_length
    );
    for degenerate in &report.degenerate {
        println!("  skipped: {degenerate}");
    }
    println!("quality: {:?}", report.quality);

    mesh.defragment_with(&mut surface, &mut [])?;
    write_vtk_file(&path, &mesh, Some(&surface), &[])?;
    println!(
        "wrote {} vertices, {} elements to {}",
        mesh.get_number_nodes(),
        mesh.get_number_elements(),
        path.display()
    );
    Ok(())
}
