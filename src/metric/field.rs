//! Per-vertex metric field construction.
//!
//! A [`MetricField`] accumulates tensors for every vertex slot of a mesh:
//! Hessian-based contributions from scalar fields ([`MetricField::add_field`])
//! or explicit tensors ([`MetricField::set_metric`]), combined by tensor
//! intersection. The field is then bounded, graded and scaled to a target
//! element count before [`MetricField::update_mesh`] writes it to the mesh.
//!
//! # Element count
//! A mesh that is unit in the metric holds about
//! `N = Σ_K |K| · mean_{v ∈ K} sqrt(det M_v) / |K_ideal|` elements, where
//! `|K_ideal|` is the volume of the unit regular simplex. Scaling every tensor
//! by `s` scales `N` by `s^{D/2}`.

use serde::{Deserialize, Serialize};

use crate::geometry::metrics::{ideal_simplex_volume, sub};
use crate::mesh_error::MeshAdaptError;
use crate::metric::hessian::recover_hessians;
use crate::metric::tensor::{MetricTensor, metric_length};
use crate::topology::mesh::Mesh;
use crate::topology::surface::Surface;

/// Tunables of metric construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricOptions {
    /// Floor applied to every eigenvalue so tensors stay positive-definite.
    pub min_eigenvalue: f64,
    /// Patch size for Hessian recovery; `None` picks one per vertex.
    pub hessian_min_patch: Option<usize>,
    /// Sweep cap of [`MetricField::apply_gradation`].
    pub max_gradation_iterations: usize,
}

impl Default for MetricOptions {
    fn default() -> Self {
        Self {
            min_eigenvalue: 1e-12,
            hessian_min_patch: None,
            max_gradation_iterations: 100,
        }
    }
}

/// Metric computation context bound to a mesh and its surface.
pub struct MetricField<'a> {
    mesh: &'a mut Mesh,
    surface: &'a Surface,
    metric: Option<Vec<MetricTensor>>,
    options: MetricOptions,
}

impl<'a> MetricField<'a> {
    /// Bind a new, empty metric field to `mesh` and `surface`.
    pub fn new(mesh: &'a mut Mesh, surface: &'a Surface) -> Self {
        Self::with_options(mesh, surface, MetricOptions::default())
    }

    /// Like [`MetricField::new`] with explicit options.
    pub fn with_options(mesh: &'a mut Mesh, surface: &'a Surface, options: MetricOptions) -> Self {
        Self {
            mesh,
            surface,
            metric: None,
            options,
        }
    }

    /// Options in use.
    pub fn options(&self) -> &MetricOptions {
        &self.options
    }

    /// Accumulated tensors per vertex slot, if any field was added.
    pub fn metric(&self) -> Option<&[MetricTensor]> {
        self.metric.as_deref()
    }

    /// Add the Hessian-based metric of a scalar field sampled at vertex slots.
    ///
    /// The contribution at each vertex is `weight · |H|` with eigenvalues
    /// floored at `min_eigenvalue`; it is intersected with earlier contributions.
    pub fn add_field(&mut self, values: &[f64], weight: f64) -> Result<(), MeshAdaptError> {
        if !(weight > 0.0) || !weight.is_finite() {
            return Err(MeshAdaptError::InvalidParameter(format!(
                "field weight must be positive and finite, got {weight}"
            )));
        }
        if values.len() != self.mesh.vertex_slot_count() {
            return Err(MeshAdaptError::FieldLengthMismatch {
                expected: self.mesh.vertex_slot_count(),
                found: values.len(),
            });
        }
        if let Some((v, value)) = values
            .iter()
            .enumerate()
            .find(|&(v, x)| self.mesh.is_active_vertex(v) && !x.is_finite())
        {
            return Err(MeshAdaptError::InvalidParameter(format!(
                "non-finite field value {value} at vertex {v}"
            )));
        }
        let hessians = recover_hessians(
            self.mesh,
            self.surface,
            values,
            self.options.hessian_min_patch,
        )?;
        let floor = self.options.min_eigenvalue;
        let contribution: Vec<MetricTensor> = hessians
            .iter()
            .map(|h| {
                h.abs()
                    .scaled(weight)
                    .clamp_eigenvalues(floor, f64::INFINITY)
            })
            .collect();
        log::debug!("add_field: weight {weight}, {} vertices", contribution.len());
        self.combine(contribution);
        Ok(())
    }

    /// Add explicit tensors, one per vertex slot.
    pub fn set_metric(&mut self, tensors: &[MetricTensor]) -> Result<(), MeshAdaptError> {
        if tensors.len() != self.mesh.vertex_slot_count() {
            return Err(MeshAdaptError::FieldLengthMismatch {
                expected: self.mesh.vertex_slot_count(),
                found: tensors.len(),
            });
        }
        let dim = self.mesh.dim();
        if let Some(bad) = tensors.iter().find(|m| m.dim() != dim) {
            return Err(MeshAdaptError::InvalidParameter(format!(
                "metric of dimension {} on a {dim}D mesh",
                bad.dim()
            )));
        }
        let floor = self.options.min_eigenvalue;
        let contribution = tensors
            .iter()
            .map(|m| m.clamp_eigenvalues(floor, f64::INFINITY))
            .collect();
        self.combine(contribution);
        Ok(())
    }

    fn combine(&mut self, contribution: Vec<MetricTensor>) {
        self.metric = Some(match self.metric.take() {
            None => contribution,
            Some(current) => current
                .iter()
                .zip(&contribution)
                .map(|(a, b)| a.intersect(b))
                .collect(),
        });
    }

    fn metric_mut(&mut self) -> Result<&mut Vec<MetricTensor>, MeshAdaptError> {
        self.metric
            .as_mut()
            .ok_or(MeshAdaptError::MetricNotInitialized)
    }

    fn map_tensors(
        &mut self,
        f: impl Fn(&MetricTensor) -> MetricTensor,
    ) -> Result<(), MeshAdaptError> {
        let metric = self.metric_mut()?;
        for m in metric.iter_mut() {
            *m = f(m);
        }
        Ok(())
    }

    /// Predicted element count of a mesh that is unit in the current metric.
    pub fn predict_nelements(&self) -> Result<f64, MeshAdaptError> {
        let metric = self
            .metric
            .as_ref()
            .ok_or(MeshAdaptError::MetricNotInitialized)?;
        let ideal = ideal_simplex_volume(self.mesh.dim());
        let mut total = 0.0;
        for (e, nodes) in self.mesh.elements() {
            let volume = self.mesh.element_volume(e)?.abs();
            let density: f64 = nodes
                .iter()
                .map(|&v| metric[v].determinant().max(0.0).sqrt())
                .sum::<f64>()
                / nodes.len() as f64;
            total += volume * density;
        }
        Ok(total / ideal)
    }

    /// Scale the field so the predicted element count equals `target`.
    pub fn apply_nelements(&mut self, target: usize) -> Result<(), MeshAdaptError> {
        if target == 0 {
            return Err(MeshAdaptError::InvalidTarget(target));
        }
        let predicted = self.predict_nelements()?;
        if !(predicted > 0.0) || !predicted.is_finite() {
            return Err(MeshAdaptError::InvalidParameter(format!(
                "cannot scale a metric predicting {predicted} elements"
            )));
        }
        let dim = self.mesh.dim() as f64;
        let s = (target as f64 / predicted).powf(2.0 / dim);
        log::debug!("apply_nelements: predicted {predicted:.1}, target {target}, scale {s:e}");
        self.map_tensors(|m| m.scaled(s))
    }

    /// Coarsen the field only if it predicts more than `max` elements.
    pub fn apply_max_nelements(&mut self, max: usize) -> Result<(), MeshAdaptError> {
        if max == 0 {
            return Err(MeshAdaptError::InvalidTarget(max));
        }
        if self.predict_nelements()? > max as f64 {
            self.apply_nelements(max)?;
        }
        Ok(())
    }

    /// Refine the field only if it predicts fewer than `min` elements.
    pub fn apply_min_nelements(&mut self, min: usize) -> Result<(), MeshAdaptError> {
        if min == 0 {
            return Err(MeshAdaptError::InvalidTarget(min));
        }
        if self.predict_nelements()? < min as f64 {
            self.apply_nelements(min)?;
        }
        Ok(())
    }

    /// Bound implied edge lengths from above by `h_max`.
    pub fn apply_max_edge_length(&mut self, h_max: f64) -> Result<(), MeshAdaptError> {
        let lambda = positive_length(h_max, "max edge length")?;
        self.map_tensors(|m| m.clamp_eigenvalues(lambda, f64::INFINITY))
    }

    /// Bound implied edge lengths from below by `h_min`.
    pub fn apply_min_edge_length(&mut self, h_min: f64) -> Result<(), MeshAdaptError> {
        let lambda = positive_length(h_min, "min edge length")?;
        let floor = self.options.min_eigenvalue;
        self.map_tensors(|m| m.clamp_eigenvalues(floor, lambda.max(floor)))
    }

    /// Bound the ratio of longest to shortest implied edge length at every vertex.
    pub fn apply_max_aspect_ratio(&mut self, ratio: f64) -> Result<(), MeshAdaptError> {
        if !(ratio >= 1.0) || !ratio.is_finite() {
            return Err(MeshAdaptError::InvalidParameter(format!(
                "aspect ratio bound must be >= 1, got {ratio}"
            )));
        }
        self.map_tensors(|m| {
            let (_, hi) = m.eigenvalue_bounds();
            let floor = hi / (ratio * ratio);
            m.map_eigenvalues(|l| l.max(floor))
        })
    }

    /// Limit the growth of implied sizes along edges to a factor `gamma` per unit length.
    ///
    /// Each endpoint metric is intersected with the other endpoint's metric
    /// relaxed by `(1 + l · ln gamma)^-2`, where `l` is the edge length under the
    /// relaxed endpoint's metric, until nothing changes.
    pub fn apply_gradation(&mut self, gamma: f64) -> Result<(), MeshAdaptError> {
        if !(gamma > 1.0) || !gamma.is_finite() {
            return Err(MeshAdaptError::InvalidParameter(format!(
                "gradation factor must be > 1, got {gamma}"
            )));
        }
        let edges = self.mesh.edges();
        let coords: Vec<_> = (0..self.mesh.vertex_slot_count())
            .map(|v| self.mesh.coords(v).ok())
            .collect();
        let ln_gamma = gamma.ln();
        let max_iterations = self.options.max_gradation_iterations;
        let metric = self.metric_mut()?;
        for iteration in 0..max_iterations {
            let mut changed = 0usize;
            for &(a, b) in &edges {
                let (Some(pa), Some(pb)) = (coords[a], coords[b]) else {
                    continue;
                };
                let d = sub(pb, pa);
                for (from, to) in [(a, b), (b, a)] {
                    let l = metric[from].length(d);
                    let eta = (1.0 + l * ln_gamma).powi(-2);
                    let relaxed = metric[from].scaled(eta);
                    let graded = metric[to].intersect(&relaxed);
                    if differs(&graded, &metric[to]) {
                        metric[to] = graded;
                        changed += 1;
                    }
                }
            }
            log::debug!("gradation iteration {iteration}: {changed} tensors changed");
            if changed == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Metric length of edge `(a, b)` under the accumulated field.
    pub fn metric_length(&self, a: usize, b: usize) -> Result<f64, MeshAdaptError> {
        let metric = self
            .metric
            .as_ref()
            .ok_or(MeshAdaptError::MetricNotInitialized)?;
        let pa = self.mesh.coords(a)?;
        let pb = self.mesh.coords(b)?;
        Ok(metric_length(pa, &metric[a], pb, &metric[b]))
    }

    /// Write the accumulated tensors to the mesh vertices.
    pub fn update_mesh(&mut self) -> Result<(), MeshAdaptError> {
        let metric = self
            .metric
            .as_ref()
            .ok_or(MeshAdaptError::MetricNotInitialized)?;
        if metric.len() != self.mesh.vertex_slot_count() {
            return Err(MeshAdaptError::FieldLengthMismatch {
                expected: self.mesh.vertex_slot_count(),
                found: metric.len(),
            });
        }
        for (v, m) in metric.iter().enumerate() {
            if self.mesh.is_active_vertex(v) {
                self.mesh.set_vertex_metric(v, *m)?;
            }
        }
        self.mesh.mark_metric_initialized();
        Ok(())
    }
}

fn positive_length(h: f64, what: &str) -> Result<f64, MeshAdaptError> {
    if !(h > 0.0) || !h.is_finite() {
        return Err(MeshAdaptError::InvalidParameter(format!(
            "{what} must be positive and finite, got {h}"
        )));
    }
    Ok(1.0 / (h * h))
}

fn differs(a: &MetricTensor, b: &MetricTensor) -> bool {
    let scale = (0..a.dim())
        .map(|i| b.get(i, i).abs())
        .fold(0.0, f64::max)
        .max(f64::MIN_POSITIVE);
    (0..a.dim()).any(|i| (0..a.dim()).any(|j| (a.get(i, j) - b.get(i, j)).abs() > 1e-10 * scale))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::meshgen::rectangle_mesh;

    fn sample(mesh: &Mesh, f: impl Fn(f64, f64) -> f64) -> Vec<f64> {
        (0..mesh.vertex_slot_count())
            .map(|v| {
                let [x, y, _] = mesh.coords(v).unwrap();
                f(x, y)
            })
            .collect()
    }

    #[test]
    fn field_hessian_becomes_metric() {
        let mut mesh = rectangle_mesh(4, 4, [0.0, 0.0], [1.0, 1.0]).unwrap();
        let surface = Surface::new(&mesh).unwrap();
        let values = sample(&mesh, |x, y| x * x + 3.0 * y * y);
        let mut field = MetricField::new(&mut mesh, &surface);
        field.add_field(&values, 1.0).unwrap();
        for m in field.metric().unwrap() {
            assert!((m.get(0, 0) - 2.0).abs() < 1e-8);
            assert!((m.get(1, 1) - 6.0).abs() < 1e-8);
            assert!(m.get(0, 1).abs() < 1e-8);
        }
    }

    #[test]
    fn scaling_hits_the_predicted_count() {
        let mut mesh = rectangle_mesh(2, 2, [0.0, 0.0], [1.0, 1.0]).unwrap();
        let surface = Surface::new(&mesh).unwrap();
        let n = mesh.vertex_slot_count();
        let mut field = MetricField::new(&mut mesh, &surface);
        field.set_metric(&vec![MetricTensor::identity(2); n]).unwrap();
        let ideal = 3f64.sqrt() / 4.0;
        assert!((field.predict_nelements().unwrap() - 1.0 / ideal).abs() < 1e-9);
        field.apply_nelements(1000).unwrap();
        assert!((field.predict_nelements().unwrap() - 1000.0).abs() < 1e-6);
        assert!(matches!(
            field.apply_nelements(0),
            Err(MeshAdaptError::InvalidTarget(0))
        ));
    }

    #[test]
    fn bounds_and_aspect_ratio_clamp_eigenvalues() {
        let mut mesh = rectangle_mesh(1, 1, [0.0, 0.0], [1.0, 1.0]).unwrap();
        let surface = Surface::new(&mesh).unwrap();
        let n = mesh.vertex_slot_count();
        let mut field = MetricField::new(&mut mesh, &surface);
        field
            .set_metric(&vec![MetricTensor::new_2d(1.0, 1e4, 0.0); n])
            .unwrap();
        field.apply_max_edge_length(0.5).unwrap();
        let (lo, _) = field.metric().unwrap()[0].eigenvalue_bounds();
        assert!((lo - 4.0).abs() < 1e-9);
        field.apply_max_aspect_ratio(10.0).unwrap();
        let (lo, hi) = field.metric().unwrap()[0].eigenvalue_bounds();
        assert!((hi / lo - 100.0).abs() < 1e-6);
        field.apply_min_edge_length(0.1).unwrap();
        let (_, hi) = field.metric().unwrap()[0].eigenvalue_bounds();
        assert!((hi - 100.0).abs() < 1e-6);
    }

    #[test]
    fn operations_require_a_metric() {
        let mut mesh = rectangle_mesh(1, 1, [0.0, 0.0], [1.0, 1.0]).unwrap();
        let surface = Surface::new(&mesh).unwrap();
        let mut field = MetricField::new(&mut mesh, &surface);
        assert_eq!(field.update_mesh(), Err(MeshAdaptError::MetricNotInitialized));
        assert_eq!(field.apply_nelements(10), Err(MeshAdaptError::MetricNotInitialized));
        assert!(matches!(
            field.add_field(&[0.0; 3], 1.0),
            Err(MeshAdaptError::FieldLengthMismatch { expected: 4, found: 3 })
        ));
    }

    #[test]
    fn gradation_limits_size_jumps() {
        let mut mesh = rectangle_mesh(4, 1, [0.0, 0.0], [4.0, 1.0]).unwrap();
        let surface = Surface::new(&mesh).unwrap();
        let tensors: Vec<MetricTensor> = (0..mesh.vertex_slot_count())
            .map(|v| {
                let x = mesh.coords(v).unwrap()[0];
                MetricTensor::isotropic(2, if x == 0.0 { 100.0 } else { 1.0 })
            })
            .collect();
        let mut field = MetricField::new(&mut mesh, &surface);
        field.set_metric(&tensors).unwrap();
        field.apply_gradation(1.5).unwrap();
        let metric = field.metric().unwrap().to_vec();
        drop(field);
        for (a, b) in mesh.edges() {
            let d = sub(mesh.coords(b).unwrap(), mesh.coords(a).unwrap());
            let (ha, hb) = (
                1.0 / metric[a].eigenvalue_bounds().1.sqrt(),
                1.0 / metric[b].eigenvalue_bounds().1.sqrt(),
            );
            let l = crate::geometry::metrics::norm(d);
            // sizes may grow at most linearly with rate ln(gamma)
            assert!(hb <= ha + l * 1.5f64.ln() + 1e-6);
            assert!(ha <= hb + l * 1.5f64.ln() + 1e-6);
        }
    }
}
