//! Small reference models used across the unit tests.

use crate::error::Result;
use crate::traits::HamiltonianSystem;
use crate::types::Bounds;
use nalgebra::DMatrix;
use std::f64::consts::PI;

/// `H = (p^2 + q^2) / 2`.
pub struct HarmonicOscillator;

impl HamiltonianSystem for HarmonicOscillator {
    fn degrees_of_freedom(&self) -> usize {
        1
    }

    fn energy(&self, x: &[f64]) -> f64 {
        0.5 * (x[1] * x[1] + x[0] * x[0])
    }

    fn equation(&self, x: &[f64], out: &mut [f64]) {
        out[0] = x[1];
        out[1] = -x[0];
    }

    fn jacobian(&self, _x: &[f64]) -> Result<DMatrix<f64>> {
        Ok(DMatrix::from_row_slice(2, 2, &[0.0, 1.0, -1.0, 0.0]))
    }

    fn initial_condition(&self, energy: f64) -> Result<Vec<f64>> {
        Ok(vec![(2.0 * energy).sqrt(), 0.0])
    }

    fn complete_initial_condition(&self, ic: &mut [f64], energy: f64) -> Result<bool> {
        let p2 = 2.0 * energy - ic[0] * ic[0];
        if p2 < 0.0 {
            return Ok(false);
        }
        ic[1] = p2.sqrt();
        Ok(true)
    }

    fn bounds(&self, energy: f64) -> Result<Bounds> {
        let r = (2.0 * energy).sqrt();
        Bounds::symmetric(&[r, r])
    }

    fn peres_invariant(&self, x: &[f64]) -> Result<f64> {
        Ok(x[1] * x[1])
    }
}

/// `H = (p^2 - q^2) / 2`, a hyperbolic saddle with exponents `+1` and `-1`.
pub struct InvertedOscillator;

impl HamiltonianSystem for InvertedOscillator {
    fn degrees_of_freedom(&self) -> usize {
        1
    }

    fn energy(&self, x: &[f64]) -> f64 {
        0.5 * (x[1] * x[1] - x[0] * x[0])
    }

    fn equation(&self, x: &[f64], out: &mut [f64]) {
        out[0] = x[1];
        out[1] = x[0];
    }

    fn jacobian(&self, _x: &[f64]) -> Result<DMatrix<f64>> {
        Ok(DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 1.0, 0.0]))
    }
}

/// Two independent oscillators, `x = [q1, q2, p1, p2]`,
/// `H = (p1^2 + q1^2) / 2 + (p2^2 + w^2 q2^2) / 2`.
pub struct UncoupledOscillators {
    pub omega: f64,
}

impl UncoupledOscillators {
    pub fn second_energy(&self, q2: f64, p2: f64) -> f64 {
        0.5 * (p2 * p2 + self.omega * self.omega * q2 * q2)
    }
}

impl HamiltonianSystem for UncoupledOscillators {
    fn degrees_of_freedom(&self) -> usize {
        2
    }

    fn energy(&self, x: &[f64]) -> f64 {
        0.5 * (x[2] * x[2] + x[0] * x[0]) + self.second_energy(x[1], x[3])
    }

    fn equation(&self, x: &[f64], out: &mut [f64]) {
        out[0] = x[2];
        out[1] = x[3];
        out[2] = -x[0];
        out[3] = -self.omega * self.omega * x[1];
    }

    fn jacobian(&self, _x: &[f64]) -> Result<DMatrix<f64>> {
        let mut j = DMatrix::zeros(4, 4);
        j[(0, 2)] = 1.0;
        j[(1, 3)] = 1.0;
        j[(2, 0)] = -1.0;
        j[(3, 1)] = -self.omega * self.omega;
        Ok(j)
    }

    fn complete_initial_condition(&self, ic: &mut [f64], energy: f64) -> Result<bool> {
        let p1_sq = 2.0 * (energy - self.second_energy(ic[1], ic[3])) - ic[0] * ic[0];
        if p1_sq < 0.0 {
            return Ok(false);
        }
        ic[2] = p1_sq.sqrt();
        Ok(true)
    }

    fn bounds(&self, energy: f64) -> Result<Bounds> {
        let r = (2.0 * energy).sqrt();
        Bounds::symmetric(&[r, r / self.omega, r, r])
    }

    fn peres_invariant(&self, x: &[f64]) -> Result<f64> {
        Ok(self.second_energy(x[1], x[3]))
    }
}

/// Hénon–Heiles model, `x = [x, y, px, py]`,
/// `V = (x^2 + y^2) / 2 + x^2 y - y^3 / 3`; bounded motion for `E < 1/6`.
pub struct HenonHeiles;

impl HenonHeiles {
    pub fn potential(x: f64, y: f64) -> f64 {
        0.5 * (x * x + y * y) + x * x * y - y * y * y / 3.0
    }
}

impl HamiltonianSystem for HenonHeiles {
    fn degrees_of_freedom(&self) -> usize {
        2
    }

    fn energy(&self, s: &[f64]) -> f64 {
        0.5 * (s[2] * s[2] + s[3] * s[3]) + Self::potential(s[0], s[1])
    }

    fn equation(&self, s: &[f64], out: &mut [f64]) {
        let (x, y) = (s[0], s[1]);
        out[0] = s[2];
        out[1] = s[3];
        out[2] = -x - 2.0 * x * y;
        out[3] = -y - x * x + y * y;
    }

    fn jacobian(&self, s: &[f64]) -> Result<DMatrix<f64>> {
        let (x, y) = (s[0], s[1]);
        let mut j = DMatrix::zeros(4, 4);
        j[(0, 2)] = 1.0;
        j[(1, 3)] = 1.0;
        j[(2, 0)] = -1.0 - 2.0 * y;
        j[(2, 1)] = -2.0 * x;
        j[(3, 0)] = -2.0 * x;
        j[(3, 1)] = -1.0 + 2.0 * y;
        Ok(j)
    }

    fn complete_initial_condition(&self, ic: &mut [f64], energy: f64) -> Result<bool> {
        let px_sq = 2.0 * (energy - Self::potential(ic[0], ic[1])) - ic[3] * ic[3];
        if px_sq < 0.0 {
            return Ok(false);
        }
        ic[2] = px_sq.sqrt();
        Ok(true)
    }

    fn bounds(&self, energy: f64) -> Result<Bounds> {
        let p = (2.0 * energy).sqrt();
        Bounds::symmetric(&[1.0, 1.0, p, p])
    }

    fn peres_invariant(&self, s: &[f64]) -> Result<f64> {
        Ok(0.5 * (s[2] * s[2] + s[0] * s[0]))
    }
}

/// `H = p^2 / 2 - cos q` with the angle wrapped into `[-pi, pi)`.
pub struct Pendulum;

impl HamiltonianSystem for Pendulum {
    fn degrees_of_freedom(&self) -> usize {
        1
    }

    fn energy(&self, x: &[f64]) -> f64 {
        0.5 * x[1] * x[1] - x[0].cos()
    }

    fn equation(&self, x: &[f64], out: &mut [f64]) {
        out[0] = x[1];
        out[1] = -x[0].sin();
    }

    fn jacobian(&self, x: &[f64]) -> Result<DMatrix<f64>> {
        Ok(DMatrix::from_row_slice(2, 2, &[0.0, 1.0, -x[0].cos(), 0.0]))
    }

    fn post_process(&self, x: &mut [f64]) -> bool {
        if x[0] >= PI {
            x[0] -= 2.0 * PI;
            true
        } else if x[0] < -PI {
            x[0] += 2.0 * PI;
            true
        } else {
            false
        }
    }
}
