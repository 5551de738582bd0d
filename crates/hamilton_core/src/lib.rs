/// The `hamilton_core` crate is the numerical engine for studying regular and
/// chaotic motion in Hamiltonian systems.
///
/// Key components:
/// - **Traits**: `HamiltonianSystem` (the model contract), `DynamicalSystem` and `Steppable` (integrators).
/// - **Solvers**: fixed-step RK4, adaptive Cash-Karp 5(4) and energy-checked RK4.
/// - **Analyzers**: trajectory sampling, Poincaré sections, Lyapunov spectra, SALI verdicts,
///   chaos and invariant maps over initial-condition grids, periodic-orbit location.
pub mod error;
pub mod grid;
pub mod liveness;
pub mod lyapunov;
pub mod memo;
pub mod orbit;
pub mod progress;
pub mod propagate;
pub mod refine;
pub mod sali;
pub mod section;
pub mod solvers;
pub mod traits;
pub mod trajectory;
pub mod types;

#[cfg(test)]
mod test_systems;

pub use error::{DynamicsError, Result};
pub use liveness::Deadline;
pub use traits::{HamiltonianSystem, Verdict};
