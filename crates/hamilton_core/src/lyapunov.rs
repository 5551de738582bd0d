//! Lyapunov exponents from deviation vectors carried along a trajectory and
//! periodically re-orthonormalized by QR.

use crate::error::{DynamicsError, Result};
use crate::liveness::Deadline;
use crate::propagate::{norm, unit_vector, TangentPropagator};
use crate::solvers::IntegratorSettings;
use crate::traits::HamiltonianSystem;
use log::debug;
use nalgebra::{DMatrix, QR};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LyapunovSettings {
    pub integrator: IntegratorSettings,
    /// Accepted steps between two orthonormalizations.
    pub orthonormalize_every: usize,
}

impl Default for LyapunovSettings {
    fn default() -> Self {
        Self {
            integrator: IntegratorSettings::default(),
            orthonormalize_every: 10,
        }
    }
}

/// Carries a full frame of `2f` deviation vectors along one trajectory.
///
/// Two views are accumulated at every orthonormalization:
/// - raw: `ln ||w_i||` of each vector just before the QR step,
/// - Gram-Schmidt: `ln |r_kk|` of the QR factor, whose partial sums are the
///   log-volumes of the leading `k`-dimensional subspaces.
pub struct LyapunovEstimator<'a, S: ?Sized> {
    propagator: TangentPropagator<'a, S>,
    orthonormalize_every: usize,
    pending: usize,
    raw_logs: Vec<f64>,
    stretch_logs: Vec<f64>,
    orthonormalizations: usize,
}

impl<'a, S: HamiltonianSystem + ?Sized> LyapunovEstimator<'a, S> {
    pub fn new(system: &'a S, x0: &[f64], settings: &LyapunovSettings) -> Result<Self> {
        if settings.orthonormalize_every == 0 {
            return Err(DynamicsError::config(
                "orthonormalize_every must be at least 1.",
            ));
        }
        let dim = system.dimension();
        let frame = (0..dim).map(|i| unit_vector(dim, i)).collect();
        let propagator = TangentPropagator::new(system, &settings.integrator, x0, frame)?;
        Ok(Self {
            propagator,
            orthonormalize_every: settings.orthonormalize_every,
            pending: 0,
            raw_logs: vec![0.0; dim],
            stretch_logs: vec![0.0; dim],
            orthonormalizations: 0,
        })
    }

    pub fn time(&self) -> f64 {
        self.propagator.time()
    }

    pub fn state(&self) -> &[f64] {
        self.propagator.state()
    }

    pub fn orthonormalizations(&self) -> usize {
        self.orthonormalizations
    }

    pub fn advance(&mut self) -> Result<()> {
        self.propagator.advance()?;
        self.pending += 1;
        if self.pending >= self.orthonormalize_every {
            self.orthonormalize()?;
        }
        Ok(())
    }

    pub fn advance_to(&mut self, t_end: f64, deadline: &Deadline) -> Result<()> {
        while self.time() < t_end {
            deadline.check(self.time())?;
            self.advance()?;
        }
        Ok(())
    }

    /// Replaces the frame by the orthonormal factor of its QR decomposition,
    /// with column signs chosen so that `R` has a positive diagonal.
    pub fn orthonormalize(&mut self) -> Result<()> {
        let t = self.propagator.time();
        let frame = self.propagator.deviations_mut();
        let dim = frame.len();
        for (acc, w) in self.raw_logs.iter_mut().zip(frame.iter()) {
            *acc += norm(w).ln();
        }
        let matrix = DMatrix::from_fn(dim, dim, |row, col| frame[col][row]);
        let (q, r) = QR::new(matrix).unpack();
        for k in 0..dim {
            let diag = r[(k, k)];
            if diag.abs() <= f64::EPSILON || !diag.is_finite() {
                return Err(DynamicsError::Degenerate(format!(
                    "near-singular R factor (|r_{k}{k}| = {:.3e}) at t = {}",
                    diag.abs(),
                    t
                )));
            }
            self.stretch_logs[k] += diag.abs().ln();
            let sign = diag.signum();
            for (row, value) in frame[k].iter_mut().enumerate() {
                *value = sign * q[(row, k)];
            }
        }
        self.pending = 0;
        self.orthonormalizations += 1;
        Ok(())
    }

    fn elapsed(&mut self) -> Result<f64> {
        if self.pending > 0 {
            self.orthonormalize()?;
        }
        let t = self.time();
        if !(t > 0.0) {
            return Err(DynamicsError::config(
                "Total integration time is zero; cannot normalize exponents.",
            ));
        }
        Ok(t)
    }

    /// Per-vector growth rates `sum ln ||w_i|| / t`, in frame order.
    pub fn raw_exponents(&mut self) -> Result<Vec<f64>> {
        let t = self.elapsed()?;
        Ok(self.raw_logs.iter().map(|acc| acc / t).collect())
    }

    /// Cumulative log-volumes `ln V_k = sum_{j<=k} ln |r_jj|`.
    pub fn log_volumes(&mut self) -> Result<Vec<f64>> {
        self.elapsed()?;
        Ok(self
            .stretch_logs
            .iter()
            .scan(0.0, |sum, value| {
                *sum += value;
                Some(*sum)
            })
            .collect())
    }

    /// Exponents from successive log-volume differences, largest first.
    pub fn spectrum(&mut self) -> Result<Vec<f64>> {
        let t = self.elapsed()?;
        let mut exponents: Vec<f64> = self.stretch_logs.iter().map(|acc| acc / t).collect();
        exponents.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));
        Ok(exponents)
    }
}

/// Estimates evaluated at regular sampling times.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LyapunovSeries {
    pub times: Vec<f64>,
    pub raw: Vec<Vec<f64>>,
    pub spectrum: Vec<Vec<f64>>,
    pub log_volumes: Vec<Vec<f64>>,
}

/// Records both views at every multiple of `interval` up to `horizon`.
pub fn lyapunov_series<S: HamiltonianSystem + ?Sized>(
    system: &S,
    x0: &[f64],
    settings: &LyapunovSettings,
    horizon: f64,
    interval: f64,
    deadline: &Deadline,
) -> Result<LyapunovSeries> {
    if !(interval > 0.0 && interval.is_finite()) {
        return Err(DynamicsError::config(
            "Sampling interval must be positive and finite.",
        ));
    }
    if !(horizon >= interval && horizon.is_finite()) {
        return Err(DynamicsError::config(
            "Horizon must be finite and at least one sampling interval.",
        ));
    }
    let mut estimator = LyapunovEstimator::new(system, x0, settings)?;
    let mut series = LyapunovSeries::default();
    let samples = (horizon / interval * (1.0 + 1e-12)).floor() as usize;
    for k in 1..=samples {
        estimator.advance_to(k as f64 * interval, deadline)?;
        series.times.push(estimator.time());
        series.raw.push(estimator.raw_exponents()?);
        series.spectrum.push(estimator.spectrum()?);
        series.log_volumes.push(estimator.log_volumes()?);
    }
    debug!(
        "lyapunov series: {} samples, {} orthonormalizations, final spectrum {:?}",
        samples,
        estimator.orthonormalizations(),
        series.spectrum.last()
    );
    Ok(series)
}

/// Kaplan-Yorke dimension `k + (l_1 + ... + l_k) / |l_{k+1}|`, where `k` is
/// the largest count with a non-negative partial sum.
pub fn kaplan_yorke(exponents: &[f64]) -> f64 {
    let mut sorted = exponents.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));

    let mut partial = 0.0;
    for (k, &lambda) in sorted.iter().enumerate() {
        if partial + lambda < 0.0 {
            return if lambda.abs() <= f64::EPSILON {
                k as f64
            } else {
                k as f64 + partial / lambda.abs()
            };
        }
        partial += lambda;
    }
    sorted.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_systems::{
        HarmonicOscillator, HenonHeiles, InvertedOscillator, UncoupledOscillators,
    };
    use approx::assert_abs_diff_eq;

    fn settings(step: f64) -> LyapunovSettings {
        LyapunovSettings {
            integrator: IntegratorSettings::fixed(step),
            orthonormalize_every: 10,
        }
    }

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        match result {
            Ok(v) => panic!("expected error containing {needle:?}, got {v:?}"),
            Err(e) => assert!(
                e.to_string().contains(needle),
                "error {e:?} does not mention {needle:?}"
            ),
        }
    }

    #[test]
    fn estimator_rejects_invalid_inputs() {
        let zero_stride = LyapunovSettings {
            orthonormalize_every: 0,
            ..settings(0.01)
        };
        assert_err_contains(
            LyapunovEstimator::new(&HarmonicOscillator, &[1.0, 0.0], &zero_stride).map(|_| ()),
            "orthonormalize_every",
        );
        let mut fresh = LyapunovEstimator::new(&HarmonicOscillator, &[1.0, 0.0], &settings(0.01))
            .unwrap();
        assert_err_contains(fresh.spectrum(), "zero");
    }

    #[test]
    fn oscillator_exponents_vanish() {
        let mut estimator =
            LyapunovEstimator::new(&HarmonicOscillator, &[1.0, 0.0], &settings(0.01)).unwrap();
        estimator.advance_to(200.0, &Deadline::none()).unwrap();
        for value in estimator.spectrum().unwrap() {
            assert!(value.abs() < 1e-3, "exponent {value}");
        }
        for value in estimator.raw_exponents().unwrap() {
            assert!(value.abs() < 1e-3, "raw exponent {value}");
        }
    }

    #[test]
    fn saddle_exponents_are_plus_and_minus_one() {
        let mut estimator =
            LyapunovEstimator::new(&InvertedOscillator, &[0.0, 0.0], &settings(0.01)).unwrap();
        estimator.advance_to(20.0, &Deadline::none()).unwrap();
        let spectrum = estimator.spectrum().unwrap();
        assert!(spectrum[0] >= spectrum[1]);
        assert!((spectrum[0] - 1.0).abs() < 0.05, "largest {}", spectrum[0]);
        assert_abs_diff_eq!(spectrum[0] + spectrum[1], 0.0, epsilon = 1e-6);

        // Area is preserved, so the full log-volume stays at zero.
        let volumes = estimator.log_volumes().unwrap();
        assert!(volumes[0] > 19.0);
        assert_abs_diff_eq!(volumes[1], 0.0, epsilon = 1e-4);

        // The first raw vector is never rotated away from the unstable
        // direction; the second is the QR complement.
        let raw = estimator.raw_exponents().unwrap();
        assert!((raw[0] - 1.0).abs() < 0.05);
    }

    #[test]
    fn chaotic_henon_heiles_orbit_has_positive_exponent() {
        let energy = 0.165;
        let mut largest = f64::NEG_INFINITY;
        for k in 0..8 {
            let mut ic = vec![0.0, -0.3 + 0.1 * k as f64, 0.0, 0.0];
            if !HenonHeiles.complete_initial_condition(&mut ic, energy).unwrap() {
                continue;
            }
            let mut estimator = LyapunovEstimator::new(&HenonHeiles, &ic, &settings(0.01)).unwrap();
            estimator.advance_to(500.0, &Deadline::none()).unwrap();
            let spectrum = estimator.spectrum().unwrap();
            assert!(spectrum.iter().sum::<f64>().abs() < 1e-3);
            largest = largest.max(spectrum[0]);
            if largest > 0.04 {
                break;
            }
        }
        assert!(largest > 0.04, "largest exponent {largest}");
    }

    #[test]
    fn regular_motion_has_vanishing_spectrum() {
        let system = UncoupledOscillators {
            omega: 2f64.sqrt(),
        };
        let x0 = [0.3, 0.2, 0.5, 0.1];
        let mut estimator = LyapunovEstimator::new(&system, &x0, &settings(0.01)).unwrap();
        estimator.advance_to(200.0, &Deadline::none()).unwrap();
        let spectrum = estimator.spectrum().unwrap();
        assert_eq!(spectrum.len(), 4);
        assert!(spectrum.windows(2).all(|w| w[0] >= w[1]));
        assert!(spectrum.iter().all(|l| l.abs() < 1e-2), "{spectrum:?}");
    }

    #[test]
    fn series_samples_at_regular_times() {
        let series = lyapunov_series(
            &InvertedOscillator,
            &[0.0, 0.0],
            &settings(0.01),
            5.0,
            1.0,
            &Deadline::none(),
        )
        .unwrap();
        assert_eq!(series.times.len(), 5);
        assert!(series.times.windows(2).all(|w| w[1] > w[0]));
        assert!(series.spectrum.iter().all(|s| s.len() == 2));
        // Transient estimates approach the asymptotic value from below.
        assert!(series.spectrum[4][0] > series.spectrum[0][0]);
        assert_err_contains(
            lyapunov_series(
                &InvertedOscillator,
                &[0.0, 0.0],
                &settings(0.01),
                5.0,
                0.0,
                &Deadline::none(),
            ),
            "interval",
        );
    }

    #[test]
    fn kaplan_yorke_handles_empty_and_partial_sum() {
        assert_eq!(kaplan_yorke(&[]), 0.0);
        assert_abs_diff_eq!(kaplan_yorke(&[0.1, 0.0, -1.0]), 2.1, epsilon = 1e-12);
        assert_eq!(kaplan_yorke(&[0.5, 0.2]), 2.0);
    }
}
