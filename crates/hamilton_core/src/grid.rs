//! Maps over a two-axis grid of initial conditions in one energy shell.
//!
//! Every unresolved cell seeds one trajectory; its result is stamped onto
//! every cell its Poincaré section visits, so a single trajectory usually
//! resolves many cells. Values landing in the same cell are averaged.

use crate::error::{DynamicsError, Result};
use crate::liveness::Deadline;
use crate::progress::{report, Progress};
use crate::refine::{check_axes, complete_at, refine_bounds, RefineSettings};
use crate::sali::{SaliClassifier, SaliSettings, SectionVerdictSettings};
use crate::section::{Plane, SectionExtractor, SectionSettings};
use crate::solvers::IntegratorSettings;
use crate::traits::HamiltonianSystem;
use crate::types::{Bounds, PointSequence, ScalarGrid};
use log::{info, warn};
use nalgebra::{DMatrix, Point2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BATCH_SIZE: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSettings {
    /// `(n1, n2)` cells along the two section axes.
    pub resolution: (usize, usize),
    pub refine: RefineSettings,
    /// Cells integrated concurrently per batch; `1` runs strictly in raster
    /// order. Batch composition decides which cells get stamped before they
    /// are scanned, so results depend on this value but not on the pool size.
    pub batch_size: usize,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            resolution: (20, 20),
            refine: RefineSettings {
                iterations: 2,
                ..RefineSettings::default()
            },
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Accumulates averaged values per grid cell.
#[derive(Debug, Clone)]
pub struct FloodArena {
    grid: ScalarGrid,
    sums: DMatrix<f64>,
    counts: DMatrix<u32>,
    inaccessible: DMatrix<bool>,
}

impl FloodArena {
    pub fn new(grid: ScalarGrid) -> Self {
        let (n1, n2) = grid.shape();
        Self {
            grid,
            sums: DMatrix::zeros(n1, n2),
            counts: DMatrix::zeros(n1, n2),
            inaccessible: DMatrix::from_element(n1, n2, false),
        }
    }

    pub fn grid(&self) -> &ScalarGrid {
        &self.grid
    }

    pub fn is_resolved(&self, i: usize, j: usize) -> bool {
        self.counts[(i, j)] > 0 || self.inaccessible[(i, j)]
    }

    pub fn mark_inaccessible(&mut self, i: usize, j: usize) {
        self.inaccessible[(i, j)] = true;
    }

    /// Adds `value` once to the start cell and to every cell `points` fall
    /// in. Returns the number of cells touched.
    pub fn stamp(&mut self, start: (usize, usize), points: &PointSequence, value: f64) -> usize {
        let mut cells: Vec<(usize, usize)> = points
            .iter()
            .filter_map(|p| self.grid.cell_of(p))
            .collect();
        cells.push(start);
        cells.sort_unstable();
        cells.dedup();
        for &cell in &cells {
            self.sums[cell] += value;
            self.counts[cell] += 1;
        }
        cells.len()
    }

    pub fn into_grid(self) -> ScalarGrid {
        let mut grid = self.grid;
        for ((value, sum), count) in grid
            .values
            .iter_mut()
            .zip(self.sums.iter())
            .zip(self.counts.iter())
        {
            *value = if *count > 0 {
                sum / *count as f64
            } else {
                f64::NAN
            };
        }
        grid
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResult {
    pub grid: ScalarGrid,
    /// Box after refinement.
    pub bounds: Bounds,
    pub trajectories: usize,
    pub inaccessible: usize,
}

struct Shell<'a, S: ?Sized> {
    system: &'a S,
    energy: f64,
    template: &'a [f64],
    axes: (usize, usize),
}

impl<'a, S: HamiltonianSystem + Sync + ?Sized> Shell<'a, S> {
    fn new(system: &'a S, energy: f64, template: &'a [f64], axes: (usize, usize)) -> Result<Self> {
        if system.degrees_of_freedom() != 2 {
            return Err(DynamicsError::config(format!(
                "Grid sweeps need a 2-degree-of-freedom system, got {}.",
                system.degrees_of_freedom()
            )));
        }
        let dim = system.dimension();
        if template.len() != dim {
            return Err(DynamicsError::config(format!(
                "Template has {} components, system dimension is {}.",
                template.len(),
                dim
            )));
        }
        check_axes(dim, axes)?;
        Ok(Self {
            system,
            energy,
            template,
            axes,
        })
    }

    fn sweep<F>(
        &self,
        settings: &GridSettings,
        progress: Option<&dyn Progress>,
        deadline: &Deadline,
        run: F,
    ) -> Result<SweepResult>
    where
        F: Fn(&[f64]) -> Result<(f64, PointSequence)> + Sync,
    {
        let (n1, n2) = settings.resolution;
        if settings.batch_size == 0 {
            return Err(DynamicsError::config("Grid batch size must be at least 1."));
        }
        let batch_size = settings.batch_size;
        let initial = self.system.bounds(self.energy)?;
        let bounds = refine_bounds(
            self.system,
            self.energy,
            self.template,
            self.axes,
            &initial,
            &settings.refine,
        )?;
        let (lo1, hi1) = bounds.range(self.axes.0);
        let (lo2, hi2) = bounds.range(self.axes.1);
        let grid = ScalarGrid::new(
            self.axes,
            Point2::new(lo1, lo2),
            Point2::new(hi1, hi2),
            n1,
            n2,
        )?;
        let mut arena = FloodArena::new(grid);
        info!(
            "sweeping {}x{} cells on axes {:?} at energy {} (batches of {})",
            n1, n2, self.axes, self.energy, batch_size
        );

        let total = n1 * n2;
        let mut cursor = 0;
        let mut trajectories = 0;
        let mut inaccessible = 0;
        loop {
            deadline.check(0.0)?;
            let mut batch = Vec::with_capacity(batch_size);
            while batch.len() < batch_size && cursor < total {
                let (i, j) = (cursor / n2, cursor % n2);
                cursor += 1;
                if arena.is_resolved(i, j) {
                    continue;
                }
                let center = arena.grid().cell_center(i, j);
                match complete_at(self.system, self.energy, self.template, self.axes, center)? {
                    Some(ic) => batch.push(((i, j), ic)),
                    None => {
                        arena.mark_inaccessible(i, j);
                        inaccessible += 1;
                    }
                }
            }
            if batch.is_empty() {
                break;
            }

            let results: Vec<Result<(f64, PointSequence)>> =
                batch.par_iter().map(|(_, ic)| run(ic.as_slice())).collect();
            for ((cell, ic), result) in batch.iter().zip(results) {
                match result {
                    Ok((value, points)) => {
                        arena.stamp(*cell, &points, value);
                        trajectories += 1;
                    }
                    Err(DynamicsError::NoCrossing { elapsed }) => {
                        warn!(
                            "cell {:?} (ic {:?}) never crossed the plane in {:.1} time units",
                            cell, ic, elapsed
                        );
                        arena.mark_inaccessible(cell.0, cell.1);
                    }
                    Err(e) => return Err(e),
                }
            }
            report(
                progress,
                &format!("{cursor}/{total} cells scanned, {trajectories} trajectories\n"),
            );
        }

        let grid = arena.into_grid();
        info!(
            "sweep done: {} trajectories resolved {} of {} cells",
            trajectories,
            grid.resolved_cells(),
            total
        );
        Ok(SweepResult {
            grid,
            bounds,
            trajectories,
            inaccessible,
        })
    }
}

/// Regular (0) / chaotic (1) map over the section axes `verdict.axes`.
///
/// Grid initial conditions take `template` with the two axes set to the cell
/// center and the missing momentum completed at `energy`.
#[allow(clippy::too_many_arguments)]
pub fn chaos_map<S: HamiltonianSystem + Sync + ?Sized>(
    system: &S,
    energy: f64,
    template: &[f64],
    plane: &Plane,
    grid: &GridSettings,
    sali: &SaliSettings,
    verdict: &SectionVerdictSettings,
    progress: Option<&dyn Progress>,
    deadline: &Deadline,
) -> Result<SweepResult> {
    let shell = Shell::new(system, energy, template, verdict.axes)?;
    SaliClassifier::new(system, sali.clone())?;
    shell.sweep(grid, progress, deadline, |ic| {
        let classifier = SaliClassifier::new(system, sali.clone())?;
        let (outcome, section) = classifier.classify_with_section(ic, plane, verdict, deadline)?;
        Ok((outcome.verdict.as_value(), section.points))
    })
}

/// Map of the time-averaged Peres invariant over the section axes
/// `section.axes`. Each trajectory runs until `section.num_points` crossings.
#[allow(clippy::too_many_arguments)]
pub fn invariant_map<S: HamiltonianSystem + Sync + ?Sized>(
    system: &S,
    energy: f64,
    template: &[f64],
    plane: &Plane,
    grid: &GridSettings,
    integrator: &IntegratorSettings,
    section: &SectionSettings,
    progress: Option<&dyn Progress>,
    deadline: &Deadline,
) -> Result<SweepResult> {
    let shell = Shell::new(system, energy, template, section.axes)?;
    system.peres_invariant(template)?;
    SectionExtractor::new(system, integrator.clone(), plane.clone(), section.clone())?;
    shell.sweep(grid, progress, deadline, |ic| {
        let extractor =
            SectionExtractor::new(system, integrator.clone(), plane.clone(), section.clone())?;
        let mut weighted = 0.0;
        let mut elapsed = 0.0;
        let crossings = extractor.compute_with(ic, deadline, |advance, x| {
            weighted += system.peres_invariant(x)? * advance.taken;
            elapsed += advance.taken;
            Ok(())
        })?;
        Ok((weighted / elapsed, crossings.points))
    })
}
