//! Legacy VTK (`.vtk`) reader/writer for simplex meshes.
//!
//! Files are ASCII `UNSTRUCTURED_GRID` datasets. Point data is stored as a
//! `FIELD` block under `POINT_DATA`:
//!
//! - `metric`: the vertex metric tensors, `dim²` row-major components;
//! - `boundary_tag`: smallest surface tag of each vertex, `0` in the interior
//!   (written only when a surface is given);
//! - any caller-supplied fields, with their component count inferred from
//!   their length.
//!
//! Only active vertices and elements are written, renumbered densely in slot
//! order; call [`Mesh::defragment`] first to make slot and file indices agree.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use crate::mesh_error::MeshAdaptError;
use crate::metric::tensor::MetricTensor;
use crate::topology::cell_type::CellType;
use crate::topology::mesh::Mesh;
use crate::topology::surface::Surface;

/// Name of the metric point field.
pub const FIELD_METRIC: &str = "metric";
/// Name of the boundary tag point field.
pub const FIELD_BOUNDARY_TAG: &str = "boundary_tag";

const LINE_WIDTH: usize = 70;
/// Cap on capacity reserved from header counts; larger inputs grow as read.
const PREALLOC_LIMIT: usize = 1 << 16;

fn reserve<T>(count: usize) -> Vec<T> {
    Vec::with_capacity(count.min(PREALLOC_LIMIT))
}

/// Mesh and point fields read from a VTK file.
#[derive(Debug)]
pub struct VtkMesh {
    pub mesh: Mesh,
    /// Point fields other than the metric, flattened per vertex.
    pub fields: BTreeMap<String, Vec<f64>>,
}

fn parse_error(message: impl Into<String>) -> MeshAdaptError {
    MeshAdaptError::MeshIo(message.into())
}

fn write_field_array<W: Write>(
    writer: &mut W,
    name: &str,
    components: usize,
    tuples: usize,
    data_type: &str,
    values: &[String],
) -> Result<(), MeshAdaptError> {
    writeln!(writer, "{name} {components} {tuples} {data_type}")?;
    let mut line_len = 0usize;
    for value in values {
        if line_len + value.len() + 1 > LINE_WIDTH {
            writeln!(writer)?;
            line_len = 0;
        }
        if line_len > 0 {
            write!(writer, " ")?;
            line_len += 1;
        }
        write!(writer, "{value}")?;
        line_len += value.len();
    }
    writeln!(writer)?;
    Ok(())
}

/// Write `mesh` with its metric, optional boundary tags and extra point fields.
///
/// Each field holds `components` values per vertex slot, so its length must be
/// a positive multiple of [`Mesh::vertex_slot_count`].
pub fn write_vtk<W: Write>(
    mut writer: W,
    mesh: &Mesh,
    surface: Option<&Surface>,
    fields: &[(&str, &[f64])],
) -> Result<(), MeshAdaptError> {
    let slots = mesh.vertex_slot_count();
    let mut index = vec![usize::MAX; slots];
    let active: Vec<usize> = mesh.vertices().map(|(v, _)| v).collect();
    for (new, &old) in active.iter().enumerate() {
        index[old] = new;
    }

    let mut arrays: Vec<(String, usize, &str, Vec<String>)> = Vec::new();
    let dim = mesh.dim();
    let mut metric = Vec::with_capacity(active.len() * dim * dim);
    for (_, vertex) in mesh.vertices() {
        metric.extend(vertex.metric.to_row_major().iter().map(|x| format!("{x:e}")));
    }
    arrays.push((FIELD_METRIC.to_string(), dim * dim, "double", metric));
    if let Some(surface) = surface {
        let tags = active
            .iter()
            .map(|&v| {
                surface
                    .vertex_tags(v)
                    .and_then(|t| t.first().copied())
                    .unwrap_or(0)
                    .to_string()
            })
            .collect();
        arrays.push((FIELD_BOUNDARY_TAG.to_string(), 1, "int", tags));
    }
    for &(name, values) in fields {
        if name.split_whitespace().count() != 1 {
            return Err(MeshAdaptError::InvalidParameter(format!(
                "field name {name:?} must be a single token"
            )));
        }
        if slots == 0 || values.is_empty() || values.len() % slots != 0 {
            return Err(MeshAdaptError::FieldLengthMismatch {
                expected: slots,
                found: values.len(),
            });
        }
        let components = values.len() / slots;
        let data = active
            .iter()
            .flat_map(|&v| &values[v * components..(v + 1) * components])
            .map(|x| format!("{x:e}"))
            .collect();
        arrays.push((name.to_string(), components, "double", data));
    }

    writeln!(writer, "# vtk DataFile Version 3.0")?;
    writeln!(writer, "mesh-adapt")?;
    writeln!(writer, "ASCII")?;
    writeln!(writer, "DATASET UNSTRUCTURED_GRID")?;
    writeln!(writer, "POINTS {} double", active.len())?;
    for (_, vertex) in mesh.vertices() {
        let [x, y, z] = vertex.coords;
        writeln!(writer, "{x:e} {y:e} {z:e}")?;
    }

    let n = mesh.cell_type().vertex_count();
    let n_elements = mesh.get_number_elements();
    writeln!(writer, "CELLS {n_elements} {}", n_elements * (n + 1))?;
    for (_, nodes) in mesh.elements() {
        write!(writer, "{n}")?;
        for &v in nodes {
            write!(writer, " {}", index[v])?;
        }
        writeln!(writer)?;
    }
    writeln!(writer, "CELL_TYPES {n_elements}")?;
    let vtk_id = mesh.cell_type().vtk_id();
    for _ in 0..n_elements {
        writeln!(writer, "{vtk_id}")?;
    }

    writeln!(writer, "POINT_DATA {}", active.len())?;
    writeln!(writer, "FIELD FieldData {}", arrays.len())?;
    for (name, components, data_type, values) in &arrays {
        write_field_array(
            &mut writer,
            name,
            *components,
            active.len(),
            data_type,
            values,
        )?;
    }
    Ok(())
}

struct Tokens<'a> {
    inner: std::str::SplitWhitespace<'a>,
}

impl<'a> Tokens<'a> {
    fn next(&mut self) -> Option<&'a str> {
        self.inner.next()
    }

    fn expect(&mut self, what: &str) -> Result<&'a str, MeshAdaptError> {
        self.inner
            .next()
            .ok_or_else(|| parse_error(format!("missing {what}")))
    }

    fn parse<T: std::str::FromStr>(&mut self, what: &str) -> Result<T, MeshAdaptError> {
        let token = self.expect(what)?;
        token
            .parse()
            .map_err(|_| parse_error(format!("invalid {what} {token:?}")))
    }

    fn keyword(&mut self, keyword: &str) -> Result<(), MeshAdaptError> {
        match self.expect(keyword)? {
            t if t == keyword => Ok(()),
            t => Err(parse_error(format!("expected {keyword}, found {t:?}"))),
        }
    }
}

struct FieldArray {
    components: usize,
    values: Vec<f64>,
}

fn parse_field_block(
    tokens: &mut Tokens<'_>,
    fields: &mut BTreeMap<String, FieldArray>,
) -> Result<(), MeshAdaptError> {
    let _block_name = tokens.expect("field block name")?;
    let num_arrays: usize = tokens.parse("field count")?;
    for _ in 0..num_arrays {
        let name = tokens.expect("field name")?.to_string();
        let components: usize = tokens.parse("field components")?;
        let tuples: usize = tokens.parse("field tuples")?;
        let _data_type = tokens.expect("field type")?;
        let total = components
            .checked_mul(tuples)
            .ok_or_else(|| parse_error(format!("field {name} is too large")))?;
        let mut values = reserve(total);
        for _ in 0..total {
            values.push(tokens.parse::<f64>("field value")?);
        }
        fields.insert(name, FieldArray { components, values });
    }
    Ok(())
}

/// Read a mesh written by [`write_vtk`] (or any ASCII unstructured grid of
/// triangles or tetrahedra).
///
/// Cells of lower dimension than the highest one present are skipped. A
/// `metric` point field, when present, is restored on the vertices and marks
/// the mesh metric as initialized.
pub fn read_vtk<R: Read>(mut reader: R) -> Result<VtkMesh, MeshAdaptError> {
    let mut input = String::new();
    reader.read_to_string(&mut input)?;
    let mut lines = input.lines();
    let _version = lines.next();
    let _title = lines.next();
    let format = lines
        .next()
        .ok_or_else(|| parse_error("missing ASCII line"))?;
    if format.trim() != "ASCII" {
        return Err(parse_error("VTK ASCII format required"));
    }
    let dataset = lines
        .next()
        .ok_or_else(|| parse_error("missing DATASET line"))?;
    if !dataset.trim().ends_with("UNSTRUCTURED_GRID") {
        return Err(parse_error("VTK UNSTRUCTURED_GRID required"));
    }
    let remaining: Vec<&str> = lines.collect();
    let remaining = remaining.join("\n");
    let mut tokens = Tokens {
        inner: remaining.split_whitespace(),
    };

    tokens.keyword("POINTS")?;
    let num_points: usize = tokens.parse("point count")?;
    let _point_type = tokens.expect("point type")?;
    let mut points = reserve(num_points);
    for _ in 0..num_points {
        let x = tokens.parse("point coordinate")?;
        let y = tokens.parse("point coordinate")?;
        let z = tokens.parse("point coordinate")?;
        points.push([x, y, z]);
    }

    tokens.keyword("CELLS")?;
    let num_cells: usize = tokens.parse("cell count")?;
    let _total_size = tokens.expect("cell list size")?;
    let mut cells = reserve(num_cells);
    for _ in 0..num_cells {
        let count: usize = tokens.parse("cell size")?;
        let mut nodes = reserve(count);
        for _ in 0..count {
            let v: usize = tokens.parse("cell vertex")?;
            if v >= num_points {
                return Err(MeshAdaptError::out_of_range("vertex", v, num_points));
            }
            nodes.push(v);
        }
        cells.push(nodes);
    }

    tokens.keyword("CELL_TYPES")?;
    let num_types: usize = tokens.parse("cell type count")?;
    if num_types != num_cells {
        return Err(parse_error(format!(
            "{num_types} cell types for {num_cells} cells"
        )));
    }
    let mut cell_types = reserve(num_cells);
    for _ in 0..num_cells {
        let id: i32 = tokens.parse("cell type")?;
        let cell_type = CellType::from_vtk_id(id)
            .ok_or_else(|| parse_error(format!("unsupported VTK cell type {id}")))?;
        cell_types.push(cell_type);
    }

    let mut fields: BTreeMap<String, FieldArray> = BTreeMap::new();
    while let Some(token) = tokens.next() {
        match token {
            "POINT_DATA" => {
                let count: usize = tokens.parse("point data count")?;
                if count != num_points {
                    return Err(parse_error(format!(
                        "POINT_DATA {count} does not match {num_points} points"
                    )));
                }
            }
            "FIELD" => parse_field_block(&mut tokens, &mut fields)?,
            "CELL_DATA" => {
                // Cell fields are not carried through refinement.
                let _count = tokens.expect("cell data count")?;
                tokens.keyword("FIELD")?;
                parse_field_block(&mut tokens, &mut BTreeMap::new())?;
            }
            other => return Err(parse_error(format!("unexpected token {other:?}"))),
        }
    }

    let dim = cell_types
        .iter()
        .map(|c| c.dimension())
        .max()
        .ok_or_else(|| parse_error("no cells"))?;
    let elements: Vec<&Vec<usize>> = cells
        .iter()
        .zip(&cell_types)
        .filter(|(_, c)| c.dimension() == dim)
        .map(|(nodes, _)| nodes)
        .collect();
    if elements.len() < cells.len() {
        log::debug!(
            "vtk: skipped {} lower-dimensional cell(s)",
            cells.len() - elements.len()
        );
    }
    let mut mesh = Mesh::from_connectivity(dim, &points, &elements)?;

    if let Some(metric) = fields.remove(FIELD_METRIC) {
        if metric.components != dim * dim {
            return Err(parse_error(format!(
                "metric field has {} components, expected {}",
                metric.components,
                dim * dim
            )));
        }
        for (v, chunk) in metric.values.chunks(metric.components).enumerate() {
            mesh.set_vertex_metric(v, MetricTensor::from_row_major(dim, chunk)?)?;
        }
        mesh.mark_metric_initialized();
    }
    let fields = fields
        .into_iter()
        .map(|(name, array)| (name, array.values))
        .collect();
    Ok(VtkMesh { mesh, fields })
}
