//! Poincaré sections: crossings of a trajectory with a hyperplane in state
//! space, projected onto two state axes.

use crate::error::{DynamicsError, Result};
use crate::liveness::Deadline;
use crate::propagate::{Advance, Propagator};
use crate::refine::check_axes;
use crate::solvers::IntegratorSettings;
use crate::traits::HamiltonianSystem;
use crate::types::PointSequence;
use log::trace;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Hyperplane `normal . x = offset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub normal: Vec<f64>,
    pub offset: f64,
}

impl Plane {
    pub fn new(normal: Vec<f64>, offset: f64) -> Result<Self> {
        if normal.iter().all(|c| *c == 0.0) || normal.iter().any(|c| !c.is_finite()) {
            return Err(DynamicsError::config(
                "Plane normal must be finite and non-zero.",
            ));
        }
        if !offset.is_finite() {
            return Err(DynamicsError::config("Plane offset must be finite."));
        }
        Ok(Self { normal, offset })
    }

    /// Builds a plane from a coefficient vector: `dim` entries give the
    /// normal through the origin, `dim + 1` entries carry the offset last.
    pub fn from_coefficients(coefficients: &[f64], dim: usize) -> Result<Self> {
        if coefficients.len() == dim {
            Self::new(coefficients.to_vec(), 0.0)
        } else if coefficients.len() == dim + 1 {
            Self::new(coefficients[..dim].to_vec(), coefficients[dim])
        } else {
            Err(DynamicsError::config(format!(
                "Plane needs {} or {} coefficients, got {}.",
                dim,
                dim + 1,
                coefficients.len()
            )))
        }
    }

    /// The plane `x[index] = value`.
    pub fn coordinate(dim: usize, index: usize, value: f64) -> Result<Self> {
        if index >= dim {
            return Err(DynamicsError::config(format!(
                "Coordinate index {index} out of range for dimension {dim}."
            )));
        }
        let mut normal = vec![0.0; dim];
        normal[index] = 1.0;
        Self::new(normal, value)
    }

    pub fn dimension(&self) -> usize {
        self.normal.len()
    }

    pub fn signed_distance(&self, x: &[f64]) -> f64 {
        self.normal.iter().zip(x).map(|(n, v)| n * v).sum::<f64>() - self.offset
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    Both,
    /// `normal . x` increasing through the plane.
    Increasing,
    Decreasing,
}

impl Orientation {
    fn admits(self, increasing: bool) -> bool {
        match self {
            Orientation::Both => true,
            Orientation::Increasing => increasing,
            Orientation::Decreasing => !increasing,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SectionSettings {
    pub num_points: usize,
    pub orientation: Orientation,
    /// State components the crossings are projected on.
    pub axes: (usize, usize),
    /// Integration time allowed before the first crossing.
    pub liveness_time: f64,
    /// Longest gap tolerated between two crossings once the section has
    /// started; unbounded when `None`.
    pub max_gap: Option<f64>,
}

impl Default for SectionSettings {
    fn default() -> Self {
        Self {
            num_points: 100,
            orientation: Orientation::Both,
            axes: (0, 1),
            liveness_time: 1000.0,
            max_gap: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Crossing {
    pub time: f64,
    pub state: Vec<f64>,
}

/// Detects sign changes of the plane's signed distance between consecutive
/// states and interpolates the crossing linearly.
///
/// A step the system post-processed (e.g. wrapped an angle) never reports a
/// crossing; the reference sign is reset from the rewritten state instead.
#[derive(Debug, Clone)]
pub struct CrossingDetector {
    plane: Plane,
    orientation: Orientation,
    last: Option<f64>,
}

impl CrossingDetector {
    pub fn new(plane: Plane, orientation: Orientation) -> Self {
        Self {
            plane,
            orientation,
            last: None,
        }
    }

    pub fn reset(&mut self, x: &[f64]) {
        self.last = Some(self.plane.signed_distance(x));
    }

    pub fn observe(
        &mut self,
        previous_t: f64,
        previous: &[f64],
        t: f64,
        x: &[f64],
        post_processed: bool,
    ) -> Option<Crossing> {
        let s1 = self.plane.signed_distance(x);
        let s0 = self.last.replace(s1)?;
        if post_processed {
            return None;
        }
        let increasing = if s0 < 0.0 && s1 >= 0.0 {
            true
        } else if s0 > 0.0 && s1 <= 0.0 {
            false
        } else {
            return None;
        };
        if !self.orientation.admits(increasing) {
            return None;
        }
        let s = s0 / (s0 - s1);
        Some(Crossing {
            time: previous_t + s * (t - previous_t),
            state: previous
                .iter()
                .zip(x)
                .map(|(a, b)| a + s * (b - a))
                .collect(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Section {
    pub points: PointSequence,
    pub times: Vec<f64>,
    pub states: Vec<Vec<f64>>,
    /// Integration time spent producing the section.
    pub elapsed: f64,
}

impl Section {
    pub(crate) fn record(&mut self, crossing: Crossing, axes: (usize, usize)) {
        self.points
            .push(Point2::new(crossing.state[axes.0], crossing.state[axes.1]));
        self.times.push(crossing.time);
        self.states.push(crossing.state);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

pub struct SectionExtractor<'a, S: ?Sized> {
    system: &'a S,
    integrator: IntegratorSettings,
    plane: Plane,
    settings: SectionSettings,
}

impl<'a, S: HamiltonianSystem + ?Sized> SectionExtractor<'a, S> {
    pub fn new(
        system: &'a S,
        integrator: IntegratorSettings,
        plane: Plane,
        settings: SectionSettings,
    ) -> Result<Self> {
        let dim = system.dimension();
        if plane.dimension() != dim {
            return Err(DynamicsError::config(format!(
                "Plane dimension {} does not match system dimension {}.",
                plane.dimension(),
                dim
            )));
        }
        check_axes(dim, settings.axes)?;
        if settings.num_points == 0 {
            return Err(DynamicsError::config("Section needs at least one point."));
        }
        if !(settings.liveness_time > 0.0) {
            return Err(DynamicsError::config("Liveness time must be positive."));
        }
        if settings.max_gap.is_some_and(|gap| !(gap > 0.0)) {
            return Err(DynamicsError::config("Maximum crossing gap must be positive."));
        }
        integrator.validate()?;
        Ok(Self {
            system,
            integrator,
            plane,
            settings,
        })
    }

    pub fn plane(&self) -> &Plane {
        &self.plane
    }

    pub fn settings(&self) -> &SectionSettings {
        &self.settings
    }

    pub fn compute(&self, x0: &[f64], deadline: &Deadline) -> Result<Section> {
        self.compute_with(x0, deadline, |_, _| Ok(()))
    }

    /// Like [`compute`](Self::compute), calling `observe` with every accepted
    /// step and the state it produced.
    pub fn compute_with(
        &self,
        x0: &[f64],
        deadline: &Deadline,
        mut observe: impl FnMut(&Advance, &[f64]) -> Result<()>,
    ) -> Result<Section> {
        let mut propagator = Propagator::new(self.system, &self.integrator, x0)?;
        let mut detector = CrossingDetector::new(self.plane.clone(), self.settings.orientation);
        detector.reset(x0);
        let mut section = Section::default();
        let mut last_crossing = 0.0;

        while section.len() < self.settings.num_points {
            deadline.check(propagator.time())?;
            let advance = propagator.advance()?;
            observe(&advance, propagator.state())?;
            let crossing = detector.observe(
                propagator.previous_time(),
                propagator.previous_state(),
                propagator.time(),
                propagator.state(),
                advance.post_processed,
            );
            if let Some(crossing) = crossing {
                last_crossing = crossing.time;
                section.record(crossing, self.settings.axes);
                continue;
            }
            let limit = if section.is_empty() {
                Some(self.settings.liveness_time)
            } else {
                self.settings.max_gap
            };
            let gap = propagator.time() - last_crossing;
            if limit.is_some_and(|limit| gap > limit) {
                return Err(DynamicsError::NoCrossing { elapsed: gap });
            }
        }
        section.elapsed = propagator.time();
        trace!(
            "section: {} crossings in {:.3} time units",
            section.len(),
            section.elapsed
        );
        Ok(section)
    }

    /// Whether the trajectory from `x0` crosses the plane (respecting the
    /// orientation) within the liveness time.
    pub fn crosses(&self, x0: &[f64], deadline: &Deadline) -> Result<bool> {
        let mut propagator = Propagator::new(self.system, &self.integrator, x0)?;
        let mut detector = CrossingDetector::new(self.plane.clone(), self.settings.orientation);
        detector.reset(x0);
        while propagator.time() <= self.settings.liveness_time {
            deadline.check(propagator.time())?;
            let advance = propagator.advance()?;
            if detector
                .observe(
                    propagator.previous_time(),
                    propagator.previous_state(),
                    propagator.time(),
                    propagator.state(),
                    advance.post_processed,
                )
                .is_some()
            {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
