//! Tightening of the accessible box on two state axes for a fixed energy.

use crate::error::{DynamicsError, Result};
use crate::traits::HamiltonianSystem;
use crate::types::Bounds;
use log::debug;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineSettings {
    /// Scan grid `n1 x n2` laid over the current box.
    pub resolution: (usize, usize),
    pub iterations: usize,
}

impl Default for RefineSettings {
    fn default() -> Self {
        Self {
            resolution: (50, 50),
            iterations: 1,
        }
    }
}

/// Builds an initial condition from `template` with the two `axes` set to
/// `point` and the missing momenta completed for `energy`.
///
/// Returns `None` when the point is not accessible at that energy. A momentum
/// component set exactly to zero is nudged to machine epsilon first.
pub fn complete_at<S: HamiltonianSystem + ?Sized>(
    system: &S,
    energy: f64,
    template: &[f64],
    axes: (usize, usize),
    point: Point2<f64>,
) -> Result<Option<Vec<f64>>> {
    check_axes(template.len(), axes)?;
    let dof = system.degrees_of_freedom();
    let mut ic = template.to_vec();
    for (axis, value) in [(axes.0, point.x), (axes.1, point.y)] {
        ic[axis] = if axis >= dof && value == 0.0 {
            f64::EPSILON
        } else {
            value
        };
    }
    if system.complete_initial_condition(&mut ic, energy)? && ic.iter().all(|v| v.is_finite()) {
        Ok(Some(ic))
    } else {
        Ok(None)
    }
}

pub(crate) fn check_axes(dim: usize, axes: (usize, usize)) -> Result<()> {
    if axes.0 >= dim || axes.1 >= dim {
        return Err(DynamicsError::config(format!(
            "Axis indices {:?} out of range for dimension {}.",
            axes, dim
        )));
    }
    if axes.0 == axes.1 {
        return Err(DynamicsError::config("The two axes must differ."));
    }
    Ok(())
}

/// Shrinks `initial` on the two `axes` to the accessible region at `energy`.
///
/// Each iteration scans a regular grid from all four sides and moves every
/// limit to the first column/row holding an accessible point, plus one cell
/// of margin. Limits only ever move inwards.
pub fn refine_bounds<S: HamiltonianSystem + ?Sized>(
    system: &S,
    energy: f64,
    template: &[f64],
    axes: (usize, usize),
    initial: &Bounds,
    settings: &RefineSettings,
) -> Result<Bounds> {
    let dim = system.dimension();
    if template.len() != dim || initial.dimension() != dim {
        return Err(DynamicsError::config(format!(
            "Template/bounds dimension mismatch with system dimension {dim}."
        )));
    }
    check_axes(dim, axes)?;
    let (n1, n2) = settings.resolution;
    if n1 < 2 || n2 < 2 {
        return Err(DynamicsError::config(
            "Refinement grid needs at least 2 points per axis.",
        ));
    }

    let mut bounds = initial.clone();
    for iteration in 0..settings.iterations {
        let (lo1, hi1) = bounds.range(axes.0);
        let (lo2, hi2) = bounds.range(axes.1);
        let d1 = (hi1 - lo1) / (n1 - 1) as f64;
        let d2 = (hi2 - lo2) / (n2 - 1) as f64;
        let u = |i: usize| lo1 + i as f64 * d1;
        let v = |j: usize| lo2 + j as f64 * d2;

        let mut cache: Vec<Option<bool>> = vec![None; n1 * n2];
        let mut accessible = |i: usize, j: usize| -> Result<bool> {
            if let Some(known) = cache[i * n2 + j] {
                return Ok(known);
            }
            let valid =
                complete_at(system, energy, template, axes, Point2::new(u(i), v(j)))?.is_some();
            cache[i * n2 + j] = Some(valid);
            Ok(valid)
        };

        let mut first_column = None;
        for i in 0..n1 {
            if any(0..n2, |j| accessible(i, j))? {
                first_column = Some(i);
                break;
            }
        }
        let Some(first_column) = first_column else {
            return Err(DynamicsError::NotAccessible(format!(
                "no accessible point at energy {energy} inside the box on axes {axes:?}"
            )));
        };
        let mut last_column = first_column;
        for i in (first_column..n1).rev() {
            if any(0..n2, |j| accessible(i, j))? {
                last_column = i;
                break;
            }
        }
        let mut first_row = 0;
        for j in 0..n2 {
            if any(first_column..=last_column, |i| accessible(i, j))? {
                first_row = j;
                break;
            }
        }
        let mut last_row = first_row;
        for j in (first_row..n2).rev() {
            if any(first_column..=last_column, |i| accessible(i, j))? {
                last_row = j;
                break;
            }
        }

        bounds.set_range(
            axes.0,
            (u(first_column) - d1).max(lo1),
            (u(last_column) + d1).min(hi1),
        );
        bounds.set_range(
            axes.1,
            (v(first_row) - d2).max(lo2),
            (v(last_row) + d2).min(hi2),
        );
        debug!(
            "refinement {}: axis {} -> [{:.6}, {:.6}], axis {} -> [{:.6}, {:.6}]",
            iteration + 1,
            axes.0,
            bounds.lower[axes.0],
            bounds.upper[axes.0],
            axes.1,
            bounds.lower[axes.1],
            bounds.upper[axes.1]
        );
    }
    Ok(bounds)
}

fn any(
    range: impl IntoIterator<Item = usize>,
    mut test: impl FnMut(usize) -> Result<bool>,
) -> Result<bool> {
    for k in range {
        if test(k)? {
            return Ok(true);
        }
    }
    Ok(false)
}
