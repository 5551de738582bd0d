//! Sampling of a single trajectory for display or export.

use crate::error::{DynamicsError, Result};
use crate::liveness::Deadline;
use crate::propagate::Propagator;
use crate::solvers::IntegratorSettings;
use crate::traits::HamiltonianSystem;
use crate::types::PointSequence;
use log::debug;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Sampling {
    /// One sample per accepted integrator step.
    EveryStep,
    /// Samples at multiples of the given interval, interpolated linearly
    /// between the bracketing steps.
    Uniform(f64),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub times: Vec<f64>,
    pub states: Vec<Vec<f64>>,
}

impl Trajectory {
    fn push(&mut self, t: f64, x: Vec<f64>) {
        self.times.push(t);
        self.states.push(x);
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Projection of every sample onto two state axes.
    pub fn project(&self, axes: (usize, usize)) -> PointSequence {
        self.states
            .iter()
            .map(|x| Point2::new(x[axes.0], x[axes.1]))
            .collect()
    }
}

/// Integrates `x0` for `total_time` and records states per `sampling`.
///
/// The initial state is always the first sample.
pub fn sample_trajectory<S: HamiltonianSystem + ?Sized>(
    system: &S,
    settings: &IntegratorSettings,
    x0: &[f64],
    total_time: f64,
    sampling: Sampling,
    deadline: &Deadline,
) -> Result<Trajectory> {
    if !(total_time > 0.0 && total_time.is_finite()) {
        return Err(DynamicsError::config(
            "Total integration time must be positive and finite.",
        ));
    }
    let mut propagator = Propagator::new(system, settings, x0)?;
    let mut trajectory = Trajectory::default();
    trajectory.push(0.0, x0.to_vec());

    match sampling {
        Sampling::EveryStep => {
            while propagator.time() < total_time {
                deadline.check(propagator.time())?;
                propagator.advance()?;
                trajectory.push(propagator.time(), propagator.state().to_vec());
            }
        }
        Sampling::Uniform(interval) => {
            if !(interval > 0.0 && interval.is_finite()) {
                return Err(DynamicsError::config(
                    "Sampling interval must be positive and finite.",
                ));
            }
            let end = total_time * (1.0 + 1e-12);
            let mut wrapped = false;
            for k in 1usize.. {
                let target = k as f64 * interval;
                if target > end {
                    break;
                }
                while propagator.time() < target {
                    deadline.check(propagator.time())?;
                    wrapped = propagator.advance()?.post_processed;
                }
                let state = if wrapped {
                    propagator.state().to_vec()
                } else {
                    let (t0, t1) = (propagator.previous_time(), propagator.time());
                    let s = if t1 > t0 { (target - t0) / (t1 - t0) } else { 1.0 };
                    propagator
                        .previous_state()
                        .iter()
                        .zip(propagator.state())
                        .map(|(a, b)| a + s * (b - a))
                        .collect()
                };
                trajectory.push(target, state);
            }
        }
    }

    if let Some(last) = trajectory.states.last() {
        debug!(
            "sampled {} states to t = {:.6}, energy drift {:.3e}",
            trajectory.len(),
            propagator.time(),
            system.energy(last) - system.energy(x0)
        );
    }
    Ok(trajectory)
}
