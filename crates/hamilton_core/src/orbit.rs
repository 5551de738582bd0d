//! Periodic-orbit location by fixed-point iteration on a Poincaré section.

use crate::error::{DynamicsError, Result};
use crate::liveness::Deadline;
use crate::progress::{report, Progress};
use crate::refine::complete_at;
use crate::section::{Orientation, Plane, SectionExtractor, SectionSettings};
use crate::solvers::IntegratorSettings;
use crate::traits::HamiltonianSystem;
use crate::trajectory::{sample_trajectory, Sampling, Trajectory};
use crate::types::PointSequence;
use log::{debug, info};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbitSettings {
    pub integrator: IntegratorSettings,
    /// Crossings collected per iteration.
    pub section_points: usize,
    /// Target extent of the section loop.
    pub precision: f64,
    pub max_iterations: usize,
    /// Must select a single crossing direction.
    pub orientation: Orientation,
    pub axes: (usize, usize),
    pub liveness_time: f64,
}

impl Default for OrbitSettings {
    fn default() -> Self {
        Self {
            integrator: IntegratorSettings::default(),
            section_points: 64,
            precision: 1e-6,
            max_iterations: 50,
            orientation: Orientation::Increasing,
            axes: (0, 1),
            liveness_time: 1000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodicOrbit {
    pub initial_condition: Vec<f64>,
    pub period: f64,
    pub iterations: usize,
    /// Section points of the last iteration, ordered around their centroid.
    pub loop_points: PointSequence,
    pub loop_extent: f64,
    pub converged: bool,
    /// One period sampled at every integrator step.
    pub orbit: Trajectory,
}

/// Refines `initial` towards a periodic orbit at `energy`.
///
/// Each iteration collects a section from the current condition and moves
/// the two section axes to the centroid of the resulting loop, completing the
/// momentum at `energy`. Stops once the loop extent drops below the precision
/// or after `max_iterations`; the period is the time between two successive
/// crossings in the same direction.
pub fn locate_periodic_orbit<S: HamiltonianSystem + ?Sized>(
    system: &S,
    energy: f64,
    initial: &[f64],
    plane: &Plane,
    settings: &OrbitSettings,
    progress: Option<&dyn Progress>,
    deadline: &Deadline,
) -> Result<PeriodicOrbit> {
    if settings.orientation == Orientation::Both {
        return Err(DynamicsError::config(
            "Orbit location needs a single crossing orientation.",
        ));
    }
    if !(settings.precision > 0.0) {
        return Err(DynamicsError::config("Orbit precision must be positive."));
    }
    if settings.max_iterations == 0 {
        return Err(DynamicsError::config("At least one iteration is required."));
    }
    if settings.section_points < 2 {
        return Err(DynamicsError::config(
            "Orbit location needs at least two crossings per section.",
        ));
    }
    let extractor = SectionExtractor::new(
        system,
        settings.integrator.clone(),
        plane.clone(),
        SectionSettings {
            num_points: settings.section_points,
            orientation: settings.orientation,
            axes: settings.axes,
            liveness_time: settings.liveness_time,
            max_gap: None,
        },
    )?;

    let mut ic = initial.to_vec();
    let mut iterations = 0;
    let (section, loop_points, loop_extent, converged) = loop {
        iterations += 1;
        let section = extractor.compute(&ic, deadline)?;
        let centroid = section.points.centroid().ok_or_else(|| {
            DynamicsError::Degenerate("section loop has no points".to_string())
        })?;
        let loop_points = section.points.ordered_around(&centroid);
        let extent = loop_points.extent();
        debug!(
            "orbit iteration {}: loop extent {:.3e}, centroid ({:.9}, {:.9})",
            iterations, extent, centroid.x, centroid.y
        );
        report(
            progress,
            &format!("iteration {iterations}: extent {extent:.3e}\n"),
        );
        if extent < settings.precision {
            break (section, loop_points, extent, true);
        }
        if iterations >= settings.max_iterations {
            break (section, loop_points, extent, false);
        }
        ic = complete_at(system, energy, &ic, settings.axes, centroid)?.ok_or_else(|| {
            DynamicsError::NotAccessible(format!(
                "loop centroid ({}, {}) at energy {}",
                centroid.x, centroid.y, energy
            ))
        })?;
    };

    // The refined condition need not lie on the plane; time the return
    // between two successive crossings instead.
    let period = section.times[1] - section.times[0];
    let orbit = sample_trajectory(
        system,
        &settings.integrator,
        &ic,
        period,
        Sampling::EveryStep,
        deadline,
    )?;
    info!(
        "periodic orbit after {} iterations (converged: {}), period {:.9}",
        iterations, converged, period
    );

    Ok(PeriodicOrbit {
        initial_condition: ic,
        period,
        iterations,
        loop_points,
        loop_extent,
        converged,
        orbit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_systems::{HarmonicOscillator, UncoupledOscillators};
    use std::f64::consts::PI;

    fn settings() -> OrbitSettings {
        OrbitSettings {
            integrator: IntegratorSettings::fixed(1e-2),
            section_points: 64,
            precision: 1e-6,
            max_iterations: 20,
            orientation: Orientation::Increasing,
            axes: (1, 3),
            liveness_time: 100.0,
        }
    }

    #[test]
    fn converges_to_the_normal_mode() {
        let system = UncoupledOscillators {
            omega: 2f64.sqrt(),
        };
        let energy = 1.0;
        let mut initial = vec![0.0, 0.3, 0.0, 0.2];
        assert!(system.complete_initial_condition(&mut initial, energy).unwrap());
        let plane = Plane::coordinate(4, 0, 0.0).unwrap();

        let orbit = locate_periodic_orbit(
            &system,
            energy,
            &initial,
            &plane,
            &settings(),
            None,
            &Deadline::none(),
        )
        .unwrap();

        assert!(orbit.converged);
        assert!(orbit.iterations > 1);
        assert!(orbit.loop_extent < 1e-6);
        assert!(orbit.initial_condition[1].abs() < 1e-5);
        assert!(orbit.initial_condition[3].abs() < 1e-5);
        assert!((system.energy(&orbit.initial_condition) - energy).abs() < 1e-9);
        assert!((orbit.period - 2.0 * PI).abs() < 1e-6);
        assert!(!orbit.orbit.is_empty());
        assert!(*orbit.orbit.times.last().unwrap() >= orbit.period);
    }

    fn locate_from(initial: [f64; 4], orientation: Orientation) -> PeriodicOrbit {
        let system = UncoupledOscillators {
            omega: 2f64.sqrt(),
        };
        let mut initial = initial.to_vec();
        assert!(system.complete_initial_condition(&mut initial, 1.0).unwrap());
        locate_periodic_orbit(
            &system,
            1.0,
            &initial,
            &Plane::coordinate(4, 0, 0.0).unwrap(),
            &OrbitSettings {
                orientation,
                ..settings()
            },
            None,
            &Deadline::none(),
        )
        .unwrap()
    }

    #[test]
    fn period_is_independent_of_the_seed_phase() {
        // q1 = 0.5 puts the seed off the section plane.
        let orbit = locate_from([0.5, 0.3, 0.0, 0.2], Orientation::Increasing);
        assert!(orbit.converged);
        assert!((orbit.initial_condition[0] - 0.5).abs() < 1e-12);
        assert!((orbit.period - 2.0 * PI).abs() < 1e-6);
        assert!(*orbit.orbit.times.last().unwrap() >= orbit.period);
    }

    #[test]
    fn decreasing_crossings_give_the_same_period() {
        for seed in [[0.0, 0.3, 0.0, 0.2], [-0.4, 0.3, 0.0, 0.2]] {
            let orbit = locate_from(seed, Orientation::Decreasing);
            assert!(orbit.converged);
            assert!((orbit.period - 2.0 * PI).abs() < 1e-6);
        }
    }

    #[test]
    fn single_crossing_sections_are_rejected() {
        let system = UncoupledOscillators {
            omega: 2f64.sqrt(),
        };
        let result = locate_periodic_orbit(
            &system,
            1.0,
            &[0.0, 0.3, 1.3, 0.2],
            &Plane::coordinate(4, 0, 0.0).unwrap(),
            &OrbitSettings {
                section_points: 1,
                ..settings()
            },
            None,
            &Deadline::none(),
        );
        assert!(matches!(result, Err(DynamicsError::Configuration(_))));
    }

    #[test]
    fn iteration_cap_reports_non_convergence() {
        let system = UncoupledOscillators {
            omega: 2f64.sqrt(),
        };
        let mut initial = vec![0.0, 0.3, 0.0, 0.2];
        assert!(system.complete_initial_condition(&mut initial, 1.0).unwrap());
        let capped = OrbitSettings {
            max_iterations: 1,
            ..settings()
        };
        let orbit = locate_periodic_orbit(
            &system,
            1.0,
            &initial,
            &Plane::coordinate(4, 0, 0.0).unwrap(),
            &capped,
            None,
            &Deadline::none(),
        )
        .unwrap();
        assert!(!orbit.converged);
        assert_eq!(orbit.iterations, 1);
        assert_eq!(orbit.loop_points.len(), 64);
    }

    #[test]
    fn both_orientations_are_rejected() {
        let both = OrbitSettings {
            orientation: Orientation::Both,
            axes: (0, 1),
            ..settings()
        };
        let result = locate_periodic_orbit(
            &HarmonicOscillator,
            0.5,
            &[0.0, 1.0],
            &Plane::coordinate(2, 0, 0.0).unwrap(),
            &both,
            None,
            &Deadline::none(),
        );
        assert!(matches!(result, Err(DynamicsError::Configuration(_))));
    }
}
