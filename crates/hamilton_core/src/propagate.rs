//! Drivers that own a state (and optionally deviation vectors) and advance
//! it with one of the integrators.

use crate::error::{DynamicsError, Result};
use crate::memo::Memoized;
use crate::solvers::{Integrator, IntegratorKind, IntegratorSettings};
use crate::traits::{Flow, HamiltonianSystem, Linearized, Steppable};
use nalgebra::DMatrix;

/// Result of one accepted step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Advance {
    pub taken: f64,
    /// The system's post-processing rewrote the state after this step.
    pub post_processed: bool,
}

pub(crate) fn check_state<S: HamiltonianSystem + ?Sized>(system: &S, x0: &[f64]) -> Result<()> {
    let dim = system.dimension();
    if dim == 0 {
        return Err(DynamicsError::config("System has zero dimension."));
    }
    if x0.len() != dim {
        return Err(DynamicsError::config(format!(
            "Initial state dimension mismatch. Expected {}, got {}.",
            dim,
            x0.len()
        )));
    }
    if x0.iter().any(|v| !v.is_finite()) {
        return Err(DynamicsError::config("Initial state must be finite."));
    }
    Ok(())
}

/// Advances the trajectory state alone.
pub struct Propagator<'a, S: ?Sized> {
    system: &'a S,
    integrator: Integrator,
    x: Vec<f64>,
    previous: Vec<f64>,
    dx: Vec<f64>,
    t: f64,
    previous_t: f64,
    h: f64,
}

impl<'a, S: HamiltonianSystem + ?Sized> Propagator<'a, S> {
    pub fn new(system: &'a S, settings: &IntegratorSettings, x0: &[f64]) -> Result<Self> {
        check_state(system, x0)?;
        let mut integrator = settings.build(x0.len())?;
        integrator.init(&Flow::new(system), x0);
        Ok(Self {
            system,
            integrator,
            x: x0.to_vec(),
            previous: x0.to_vec(),
            dx: vec![0.0; x0.len()],
            t: 0.0,
            previous_t: 0.0,
            h: settings.initial_step,
        })
    }

    pub fn advance(&mut self) -> Result<Advance> {
        let flow = Flow::new(self.system);
        let taken = self
            .integrator
            .step(&flow, &self.x, &mut self.h, &mut self.dx);
        if !(taken > 0.0) {
            return Err(DynamicsError::Stalled { time: self.t });
        }
        self.previous.copy_from_slice(&self.x);
        self.previous_t = self.t;
        for (xi, di) in self.x.iter_mut().zip(&self.dx) {
            *xi += di;
        }
        self.t += taken;
        let post_processed = self.system.post_process(&mut self.x);
        Ok(Advance {
            taken,
            post_processed,
        })
    }

    pub fn state(&self) -> &[f64] {
        &self.x
    }

    pub fn previous_state(&self) -> &[f64] {
        &self.previous
    }

    pub fn time(&self) -> f64 {
        self.t
    }

    pub fn previous_time(&self) -> f64 {
        self.previous_t
    }

    pub fn step_size(&self) -> f64 {
        self.h
    }

    pub fn integrator(&self) -> &Integrator {
        &self.integrator
    }
}

/// Advances the trajectory together with deviation vectors solving
/// `dw/dt = J(x) w`.
///
/// Every equation proposes its own step; the smallest one is used for all of
/// them, and any equation stepped with a larger value is recomputed with it.
/// The Jacobian is memoized and invalidated whenever `x` is written.
pub struct TangentPropagator<'a, S: ?Sized> {
    system: &'a S,
    integrator: Integrator,
    deviation_integrators: Vec<Integrator>,
    x: Vec<f64>,
    previous: Vec<f64>,
    dx: Vec<f64>,
    deviations: Vec<Vec<f64>>,
    increments: Vec<Vec<f64>>,
    taken: Vec<f64>,
    jacobian: Memoized<DMatrix<f64>>,
    t: f64,
    previous_t: f64,
    h: f64,
}

impl<'a, S: HamiltonianSystem + ?Sized> TangentPropagator<'a, S> {
    pub fn new(
        system: &'a S,
        settings: &IntegratorSettings,
        x0: &[f64],
        deviations: Vec<Vec<f64>>,
    ) -> Result<Self> {
        check_state(system, x0)?;
        let dim = x0.len();
        if deviations.is_empty() {
            return Err(DynamicsError::config(
                "At least one deviation vector is required.",
            ));
        }
        if let Some(bad) = deviations.iter().find(|w| w.len() != dim) {
            return Err(DynamicsError::config(format!(
                "Deviation vector has {} components, state has {}.",
                bad.len(),
                dim
            )));
        }

        let mut jacobian = Memoized::new();
        let j0 = jacobian.get_or_try_compute(|| system.jacobian(x0))?;
        if j0.shape() != (dim, dim) {
            return Err(DynamicsError::config(format!(
                "Jacobian is {}x{}, expected {dim}x{dim}.",
                j0.nrows(),
                j0.ncols()
            )));
        }

        let mut integrator = settings.build(dim)?;
        integrator.init(&Flow::new(system), x0);

        // Variational equations conserve no energy; they follow the
        // trajectory's steps with plain RK4.
        let deviation_settings = if settings.kind == IntegratorKind::EnergyChecked {
            IntegratorSettings {
                kind: IntegratorKind::Fixed,
                ..settings.clone()
            }
        } else {
            settings.clone()
        };
        let mut deviation_integrators = Vec::with_capacity(deviations.len());
        for w in &deviations {
            let mut integ = deviation_settings.build(dim)?;
            integ.init(&Linearized { jacobian: j0 }, w);
            deviation_integrators.push(integ);
        }

        let count = deviations.len();
        Ok(Self {
            system,
            integrator,
            deviation_integrators,
            x: x0.to_vec(),
            previous: x0.to_vec(),
            dx: vec![0.0; dim],
            deviations,
            increments: vec![vec![0.0; dim]; count],
            taken: vec![0.0; count],
            jacobian,
            t: 0.0,
            previous_t: 0.0,
            h: settings.initial_step,
        })
    }

    pub fn advance(&mut self) -> Result<Advance> {
        let Self {
            system,
            integrator,
            deviation_integrators,
            x,
            previous,
            dx,
            deviations,
            increments,
            taken,
            jacobian,
            t,
            previous_t,
            h,
        } = self;
        let system: &S = *system;
        let flow = Flow::new(system);

        let mut next = *h;
        let taken_x = integrator.step(&flow, x, &mut next, dx);
        let mut step = taken_x;

        let jac = jacobian.get_or_try_compute(|| system.jacobian(&x[..]))?;
        let field = Linearized { jacobian: jac };
        for (k, integ) in deviation_integrators.iter_mut().enumerate() {
            let mut proposal = *h;
            taken[k] = integ.step(&field, &deviations[k], &mut proposal, &mut increments[k]);
            step = step.min(taken[k]);
            if integ.kind() == IntegratorKind::Adaptive {
                next = next.min(proposal);
            }
        }

        if !(step > 0.0) {
            return Err(DynamicsError::Stalled { time: *t });
        }

        if taken_x > step {
            integrator.step_exact(&flow, x, step, dx);
        }
        for (k, integ) in deviation_integrators.iter_mut().enumerate() {
            if taken[k] > step {
                integ.step_exact(&field, &deviations[k], step, &mut increments[k]);
            }
        }

        previous.copy_from_slice(x);
        *previous_t = *t;
        for (xi, di) in x.iter_mut().zip(dx.iter()) {
            *xi += di;
        }
        for (w, dw) in deviations.iter_mut().zip(increments.iter()) {
            for (wi, di) in w.iter_mut().zip(dw) {
                *wi += di;
            }
        }
        *t += step;
        *h = next;
        jacobian.invalidate();
        let post_processed = system.post_process(x);

        Ok(Advance {
            taken: step,
            post_processed,
        })
    }

    pub fn state(&self) -> &[f64] {
        &self.x
    }

    pub fn previous_state(&self) -> &[f64] {
        &self.previous
    }

    pub fn time(&self) -> f64 {
        self.t
    }

    pub fn previous_time(&self) -> f64 {
        self.previous_t
    }

    pub fn deviations(&self) -> &[Vec<f64>] {
        &self.deviations
    }

    pub fn deviations_mut(&mut self) -> &mut [Vec<f64>] {
        &mut self.deviations
    }

    /// Number of Jacobian evaluations so far.
    pub fn jacobian_evaluations(&self) -> usize {
        self.jacobian.evaluations()
    }
}

/// Standard basis vector `e_index` of length `dim`.
pub(crate) fn unit_vector(dim: usize, index: usize) -> Vec<f64> {
    let mut v = vec![0.0; dim];
    v[index] = 1.0;
    v
}

pub(crate) fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}
