use crate::error::{DynamicsError, Result};
use crate::types::Bounds;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Outcome of a regular/chaotic classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Regular,
    Chaotic,
}

impl Verdict {
    /// Numeric value stamped onto chaos maps: 0 regular, 1 chaotic.
    pub fn as_value(self) -> f64 {
        match self {
            Verdict::Regular => 0.0,
            Verdict::Chaotic => 1.0,
        }
    }
}

/// Couples a concrete Hamiltonian model to the engine.
///
/// A state vector holds `f` generalized coordinates followed by `f` momenta,
/// `f` being [`HamiltonianSystem::degrees_of_freedom`]. Only the energy and
/// the equations of motion are mandatory; the remaining capabilities fail
/// with [`DynamicsError::Unsupported`] unless the model provides them.
pub trait HamiltonianSystem {
    fn degrees_of_freedom(&self) -> usize;

    fn dimension(&self) -> usize {
        2 * self.degrees_of_freedom()
    }

    fn energy(&self, x: &[f64]) -> f64;

    /// Right-hand side of the equations of motion, written into `out`.
    fn equation(&self, x: &[f64], out: &mut [f64]);

    /// Derivative of [`HamiltonianSystem::equation`]; needed by stability analyses only.
    fn jacobian(&self, _x: &[f64]) -> Result<DMatrix<f64>> {
        Err(DynamicsError::Unsupported("jacobian"))
    }

    fn initial_condition(&self, _energy: f64) -> Result<Vec<f64>> {
        Err(DynamicsError::Unsupported("initial condition from energy"))
    }

    fn initial_condition_with_angular_momentum(
        &self,
        _energy: f64,
        _angular_momentum: f64,
    ) -> Result<Vec<f64>> {
        Err(DynamicsError::Unsupported(
            "initial condition from energy and angular momentum",
        ))
    }

    /// Fills the missing momentum components of `ic` so that its energy is
    /// `energy`. Returns `Ok(false)` when no such completion exists.
    fn complete_initial_condition(&self, _ic: &mut [f64], _energy: f64) -> Result<bool> {
        Err(DynamicsError::Unsupported("initial condition completion"))
    }

    /// Box containing every state of the given energy.
    fn bounds(&self, _energy: f64) -> Result<Bounds> {
        Err(DynamicsError::Unsupported("energy bounds"))
    }

    /// Optional normalisation (e.g. angle wrap). Returns whether `x` changed.
    fn post_process(&self, _x: &mut [f64]) -> bool {
        false
    }

    fn peres_invariant(&self, _x: &[f64]) -> Result<f64> {
        Err(DynamicsError::Unsupported("Peres invariant"))
    }

    /// Model-specific SALI decision from the windowed mean of `-log10(SALI)`
    /// at time `t`. `None` defers to the classifier's configured thresholds.
    fn sali_decision(&self, _mean: f64, _t: f64) -> Option<Verdict> {
        None
    }
}

/// Vector field advanced by the integrators.
pub trait DynamicalSystem {
    fn dimension(&self) -> usize;

    fn apply(&self, x: &[f64], out: &mut [f64]);

    /// Conserved quantity checked by the energy-controlled stepper, if any.
    fn energy(&self, _x: &[f64]) -> Option<f64> {
        None
    }

    /// Per-component magnitudes reachable from `x0`, if known in advance.
    fn scale_hint(&self, _x0: &[f64]) -> Option<Vec<f64>> {
        None
    }
}

/// Stepping contract shared by every integrator.
pub trait Steppable {
    /// Resets warm-up state (error scales, statistics) for a run starting at `x0`.
    fn init(&mut self, system: &impl DynamicalSystem, x0: &[f64]);

    /// Computes the increment `dx` of one step from `x`, starting with the
    /// step size in `h`. Returns the step actually taken and leaves the
    /// suggested next step in `h`. A returned step of zero means no admissible
    /// step was found and `dx` is zero.
    fn step(
        &mut self,
        system: &impl DynamicalSystem,
        x: &[f64],
        h: &mut f64,
        dx: &mut [f64],
    ) -> f64;

    /// Increment of one step of exactly `h`, without step-size control.
    fn step_exact(&mut self, system: &impl DynamicalSystem, x: &[f64], h: f64, dx: &mut [f64]);
}

/// Equations of motion of a [`HamiltonianSystem`] as a vector field.
pub struct Flow<'a, S: ?Sized> {
    pub system: &'a S,
}

impl<'a, S: HamiltonianSystem + ?Sized> Flow<'a, S> {
    pub fn new(system: &'a S) -> Self {
        Self { system }
    }
}

impl<S: HamiltonianSystem + ?Sized> DynamicalSystem for Flow<'_, S> {
    fn dimension(&self) -> usize {
        self.system.dimension()
    }

    fn apply(&self, x: &[f64], out: &mut [f64]) {
        self.system.equation(x, out);
    }

    fn energy(&self, x: &[f64]) -> Option<f64> {
        Some(self.system.energy(x))
    }

    fn scale_hint(&self, x0: &[f64]) -> Option<Vec<f64>> {
        self.system
            .bounds(self.system.energy(x0))
            .ok()
            .filter(|b| b.dimension() == x0.len())
            .map(|b| b.magnitudes())
    }
}

/// Variational equation `dw/dt = J w` with the Jacobian frozen for one step.
pub struct Linearized<'a> {
    pub jacobian: &'a DMatrix<f64>,
}

impl DynamicalSystem for Linearized<'_> {
    fn dimension(&self) -> usize {
        self.jacobian.nrows()
    }

    fn apply(&self, w: &[f64], out: &mut [f64]) {
        let n = self.jacobian.nrows();
        for i in 0..n {
            let mut sum = 0.0;
            for k in 0..n {
                sum += self.jacobian[(i, k)] * w[k];
            }
            out[i] = sum;
        }
    }
}
