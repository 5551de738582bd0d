use crate::error::{DynamicsError, Result};
use crate::traits::{DynamicalSystem, Steppable};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegratorKind {
    /// Classical 4-stage Runge-Kutta at a constant step.
    Fixed,
    /// Cash-Karp embedded 5(4) pair with error-controlled steps.
    Adaptive,
    /// Runge-Kutta 4 with the step halved/doubled to bound energy drift.
    EnergyChecked,
}

/// Where the adaptive integrator takes its per-component error scale from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ErrorScale {
    /// Grown online to the largest magnitude seen in each component.
    Auto,
    /// Derived once from the system's energy bounds at the initial state.
    FromBounds,
    Fixed(Vec<f64>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorSettings {
    pub kind: IntegratorKind,
    pub precision: f64,
    pub initial_step: f64,
    pub error_scale: ErrorScale,
    pub safety: f64,
    pub shrink_exponent: f64,
    pub grow_exponent: f64,
    pub max_growth: f64,
    pub min_shrink: f64,
    /// The energy-checked step doubles when the drift is below
    /// `precision * energy_growth_threshold`.
    pub energy_growth_threshold: f64,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            kind: IntegratorKind::Fixed,
            precision: 1e-10,
            initial_step: 1e-2,
            error_scale: ErrorScale::Auto,
            safety: 0.9,
            shrink_exponent: -0.25,
            grow_exponent: -0.2,
            max_growth: 5.0,
            min_shrink: 0.1,
            energy_growth_threshold: 1.0 / 32.0,
        }
    }
}

impl IntegratorSettings {
    pub fn fixed(step: f64) -> Self {
        Self {
            kind: IntegratorKind::Fixed,
            initial_step: step,
            ..Self::default()
        }
    }

    pub fn adaptive(precision: f64) -> Self {
        Self {
            kind: IntegratorKind::Adaptive,
            precision,
            ..Self::default()
        }
    }

    pub fn energy_checked(step: f64, precision: f64) -> Self {
        Self {
            kind: IntegratorKind::EnergyChecked,
            initial_step: step,
            precision,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.initial_step > 0.0) || !self.initial_step.is_finite() {
            return Err(DynamicsError::config("Initial step size must be positive."));
        }
        if self.kind != IntegratorKind::Fixed && !(self.precision > 0.0) {
            return Err(DynamicsError::config("Precision must be positive."));
        }
        if !(self.safety > 0.0 && self.safety < 1.0) {
            return Err(DynamicsError::config("Safety factor must lie in (0, 1)."));
        }
        if !(self.min_shrink > 0.0 && self.min_shrink < 1.0) {
            return Err(DynamicsError::config("min_shrink must lie in (0, 1)."));
        }
        if !(self.shrink_exponent < 0.0 && self.grow_exponent < 0.0) {
            return Err(DynamicsError::config(
                "Step-control exponents must be negative.",
            ));
        }
        Ok(())
    }

    pub fn build(&self, dim: usize) -> Result<Integrator> {
        self.validate()?;
        if dim == 0 {
            return Err(DynamicsError::config("State must have positive dimension."));
        }
        Ok(match self.kind {
            IntegratorKind::Fixed => Integrator::Fixed(Rk4::new(dim)),
            IntegratorKind::Adaptive => {
                if let ErrorScale::Fixed(scale) = &self.error_scale {
                    if scale.len() != dim {
                        return Err(DynamicsError::config(format!(
                            "Error scale has {} components, state has {}.",
                            scale.len(),
                            dim
                        )));
                    }
                }
                Integrator::Adaptive(CashKarp::new(dim, self))
            }
            IntegratorKind::EnergyChecked => {
                Integrator::EnergyChecked(EnergyChecked::new(dim, self))
            }
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StepStats {
    pub accepted: u64,
    pub rejected: u64,
    /// Normalised error of the last attempt (adaptive), or last energy drift
    /// relative to precision (energy-checked).
    pub last_error_ratio: f64,
}

/// Classic Runge-Kutta 4th Order Solver
pub struct Rk4 {
    k1: Vec<f64>,
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    tmp: Vec<f64>,
    stats: StepStats,
}

impl Rk4 {
    pub fn new(dim: usize) -> Self {
        Self {
            k1: vec![0.0; dim],
            k2: vec![0.0; dim],
            k3: vec![0.0; dim],
            k4: vec![0.0; dim],
            tmp: vec![0.0; dim],
            stats: StepStats::default(),
        }
    }
}

impl Steppable for Rk4 {
    fn init(&mut self, _system: &impl DynamicalSystem, _x0: &[f64]) {
        self.stats = StepStats::default();
    }

    fn step(
        &mut self,
        system: &impl DynamicalSystem,
        x: &[f64],
        h: &mut f64,
        dx: &mut [f64],
    ) -> f64 {
        self.step_exact(system, x, *h, dx);
        self.stats.accepted += 1;
        *h
    }

    fn step_exact(&mut self, system: &impl DynamicalSystem, x: &[f64], h: f64, dx: &mut [f64]) {
        let n = x.len();

        // k1 = f(y)
        system.apply(x, &mut self.k1);

        // k2 = f(y + h*k1/2)
        for i in 0..n {
            self.tmp[i] = x[i] + 0.5 * h * self.k1[i];
        }
        system.apply(&self.tmp, &mut self.k2);

        // k3 = f(y + h*k2/2)
        for i in 0..n {
            self.tmp[i] = x[i] + 0.5 * h * self.k2[i];
        }
        system.apply(&self.tmp, &mut self.k3);

        // k4 = f(y + h*k3)
        for i in 0..n {
            self.tmp[i] = x[i] + h * self.k3[i];
        }
        system.apply(&self.tmp, &mut self.k4);

        // dy = h/6 * (k1 + 2k2 + 2k3 + k4)
        for i in 0..n {
            dx[i] = h / 6.0 * (self.k1[i] + 2.0 * self.k2[i] + 2.0 * self.k3[i] + self.k4[i]);
        }
    }
}

// Cash-Karp tableau.
const A21: f64 = 1.0 / 5.0;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 3.0 / 10.0;
const A42: f64 = -9.0 / 10.0;
const A43: f64 = 6.0 / 5.0;
const A51: f64 = -11.0 / 54.0;
const A52: f64 = 5.0 / 2.0;
const A53: f64 = -70.0 / 27.0;
const A54: f64 = 35.0 / 27.0;
const A61: f64 = 1631.0 / 55296.0;
const A62: f64 = 175.0 / 512.0;
const A63: f64 = 575.0 / 13824.0;
const A64: f64 = 44275.0 / 110592.0;
const A65: f64 = 253.0 / 4096.0;

// 5th order weights
const B1: f64 = 37.0 / 378.0;
const B3: f64 = 250.0 / 621.0;
const B4: f64 = 125.0 / 594.0;
const B6: f64 = 512.0 / 1771.0;

// 5th minus embedded 4th order weights
const E1: f64 = B1 - 2825.0 / 27648.0;
const E3: f64 = B3 - 18575.0 / 48384.0;
const E4: f64 = B4 - 13525.0 / 55296.0;
const E5: f64 = -277.0 / 14336.0;
const E6: f64 = B6 - 0.25;

/// Embedded 5th/4th order Runge-Kutta (Cash-Karp) with error control.
pub struct CashKarp {
    k: [Vec<f64>; 6],
    tmp: Vec<f64>,
    err: Vec<f64>,
    scale: Vec<f64>,
    scale_mode: ErrorScale,
    precision: f64,
    safety: f64,
    shrink_exponent: f64,
    grow_exponent: f64,
    max_growth: f64,
    min_shrink: f64,
    stats: StepStats,
}

impl CashKarp {
    pub fn new(dim: usize, settings: &IntegratorSettings) -> Self {
        Self {
            k: std::array::from_fn(|_| vec![0.0; dim]),
            tmp: vec![0.0; dim],
            err: vec![0.0; dim],
            scale: vec![1.0; dim],
            scale_mode: settings.error_scale.clone(),
            precision: settings.precision,
            safety: settings.safety,
            shrink_exponent: settings.shrink_exponent,
            grow_exponent: settings.grow_exponent,
            max_growth: settings.max_growth,
            min_shrink: settings.min_shrink,
            stats: StepStats::default(),
        }
    }

    pub fn scale(&self) -> &[f64] {
        &self.scale
    }

    /// Factor applied to a rejected step with normalised error `ratio > 1`.
    pub fn shrink_factor(&self, ratio: f64) -> f64 {
        (self.safety * ratio.powf(self.shrink_exponent)).max(self.min_shrink)
    }

    /// Factor applied to the next step after accepting one with error `ratio <= 1`.
    pub fn growth_factor(&self, ratio: f64) -> f64 {
        let threshold = (self.max_growth / self.safety).powf(1.0 / self.grow_exponent);
        if ratio > threshold {
            self.safety * ratio.powf(self.grow_exponent)
        } else {
            self.max_growth
        }
    }

    /// One trial step of size `h`: writes the 5th order increment into `dx`
    /// and returns `max_i |err_i| / scale_i / precision`.
    pub fn attempt(
        &mut self,
        system: &impl DynamicalSystem,
        x: &[f64],
        h: f64,
        dx: &mut [f64],
    ) -> f64 {
        let n = x.len();
        let [k1, k2, k3, k4, k5, k6] = &mut self.k;

        system.apply(x, k1);
        for i in 0..n {
            self.tmp[i] = x[i] + h * A21 * k1[i];
        }
        system.apply(&self.tmp, k2);
        for i in 0..n {
            self.tmp[i] = x[i] + h * (A31 * k1[i] + A32 * k2[i]);
        }
        system.apply(&self.tmp, k3);
        for i in 0..n {
            self.tmp[i] = x[i] + h * (A41 * k1[i] + A42 * k2[i] + A43 * k3[i]);
        }
        system.apply(&self.tmp, k4);
        for i in 0..n {
            self.tmp[i] = x[i] + h * (A51 * k1[i] + A52 * k2[i] + A53 * k3[i] + A54 * k4[i]);
        }
        system.apply(&self.tmp, k5);
        for i in 0..n {
            self.tmp[i] = x[i]
                + h * (A61 * k1[i] + A62 * k2[i] + A63 * k3[i] + A64 * k4[i] + A65 * k5[i]);
        }
        system.apply(&self.tmp, k6);

        let mut ratio: f64 = 0.0;
        for i in 0..n {
            dx[i] = h * (B1 * k1[i] + B3 * k3[i] + B4 * k4[i] + B6 * k6[i]);
            self.err[i] = h * (E1 * k1[i] + E3 * k3[i] + E4 * k4[i] + E5 * k5[i] + E6 * k6[i]);
            let component = self.err[i].abs() / self.scale[i];
            if component.is_nan() {
                ratio = f64::NAN;
            } else if !ratio.is_nan() {
                ratio = ratio.max(component);
            }
        }
        ratio / self.precision
    }

    fn grow_scale(&mut self, x: &[f64], dx: &[f64]) {
        if self.scale_mode == ErrorScale::Auto {
            for i in 0..x.len() {
                self.scale[i] = self.scale[i].max((x[i] + dx[i]).abs());
            }
        }
    }
}

/// Keeps every scale entry strictly positive.
fn floor_scale(scale: &mut [f64]) {
    let largest = scale.iter().copied().fold(0.0, f64::max);
    let floor = if largest > 0.0 { largest * 1e-3 } else { 1.0 };
    for s in scale.iter_mut() {
        if !(*s >= floor) {
            *s = floor;
        }
    }
}

impl Steppable for CashKarp {
    fn init(&mut self, system: &impl DynamicalSystem, x0: &[f64]) {
        self.stats = StepStats::default();
        let from_bounds = match &self.scale_mode {
            ErrorScale::Fixed(scale) => Some(scale.clone()),
            ErrorScale::FromBounds => system.scale_hint(x0),
            ErrorScale::Auto => None,
        };
        self.scale = from_bounds.unwrap_or_else(|| x0.iter().map(|v| v.abs()).collect());
        floor_scale(&mut self.scale);
    }

    fn step(
        &mut self,
        system: &impl DynamicalSystem,
        x: &[f64],
        h: &mut f64,
        dx: &mut [f64],
    ) -> f64 {
        let mut trial = *h;
        loop {
            let ratio = self.attempt(system, x, trial, dx);
            self.stats.last_error_ratio = ratio;
            if ratio <= 1.0 {
                let next = trial * self.growth_factor(ratio);
                if !next.is_finite() {
                    dx.fill(0.0);
                    return 0.0;
                }
                self.stats.accepted += 1;
                self.grow_scale(x, dx);
                *h = next;
                return trial;
            }

            self.stats.rejected += 1;
            let shrunk = if ratio.is_nan() {
                f64::NAN
            } else {
                trial * self.shrink_factor(ratio)
            };
            if !shrunk.is_finite() || shrunk == 0.0 {
                dx.fill(0.0);
                return 0.0;
            }
            trial = shrunk;
        }
    }

    fn step_exact(&mut self, system: &impl DynamicalSystem, x: &[f64], h: f64, dx: &mut [f64]) {
        self.attempt(system, x, h, dx);
    }
}

/// Bounds the maximum number of halvings of one energy-checked step.
const MAX_HALVINGS: u32 = 64;

/// Fixed-step RK4 whose step is halved until the energy drift of a single
/// step is within precision, and doubled when the drift is far below it.
pub struct EnergyChecked {
    rk4: Rk4,
    candidate: Vec<f64>,
    precision: f64,
    growth_threshold: f64,
    stats: StepStats,
}

impl EnergyChecked {
    pub fn new(dim: usize, settings: &IntegratorSettings) -> Self {
        Self {
            rk4: Rk4::new(dim),
            candidate: vec![0.0; dim],
            precision: settings.precision,
            growth_threshold: settings.energy_growth_threshold,
            stats: StepStats::default(),
        }
    }
}

impl Steppable for EnergyChecked {
    fn init(&mut self, system: &impl DynamicalSystem, x0: &[f64]) {
        self.rk4.init(system, x0);
        self.stats = StepStats::default();
    }

    fn step(
        &mut self,
        system: &impl DynamicalSystem,
        x: &[f64],
        h: &mut f64,
        dx: &mut [f64],
    ) -> f64 {
        let Some(e0) = system.energy(x) else {
            // Nothing to conserve (e.g. variational equations).
            self.rk4.step_exact(system, x, *h, dx);
            self.stats.accepted += 1;
            return *h;
        };

        let mut trial = *h;
        for _ in 0..=MAX_HALVINGS {
            self.rk4.step_exact(system, x, trial, dx);
            for i in 0..x.len() {
                self.candidate[i] = x[i] + dx[i];
            }
            let drift = system
                .energy(&self.candidate)
                .map_or(f64::NAN, |e| (e - e0).abs());
            self.stats.last_error_ratio = drift / self.precision;
            if drift <= self.precision {
                self.stats.accepted += 1;
                *h = if drift < self.precision * self.growth_threshold {
                    2.0 * trial
                } else {
                    trial
                };
                return trial;
            }
            self.stats.rejected += 1;
            trial *= 0.5;
        }

        dx.fill(0.0);
        0.0
    }

    fn step_exact(&mut self, system: &impl DynamicalSystem, x: &[f64], h: f64, dx: &mut [f64]) {
        self.rk4.step_exact(system, x, h, dx);
    }
}

/// Closed set of integration strategies behind one stepping contract.
pub enum Integrator {
    Fixed(Rk4),
    Adaptive(CashKarp),
    EnergyChecked(EnergyChecked),
}

impl Integrator {
    pub fn kind(&self) -> IntegratorKind {
        match self {
            Integrator::Fixed(_) => IntegratorKind::Fixed,
            Integrator::Adaptive(_) => IntegratorKind::Adaptive,
            Integrator::EnergyChecked(_) => IntegratorKind::EnergyChecked,
        }
    }

    pub fn stats(&self) -> StepStats {
        match self {
            Integrator::Fixed(s) => s.stats,
            Integrator::Adaptive(s) => s.stats,
            Integrator::EnergyChecked(s) => s.stats,
        }
    }
}

impl Steppable for Integrator {
    fn init(&mut self, system: &impl DynamicalSystem, x0: &[f64]) {
        match self {
            Integrator::Fixed(s) => s.init(system, x0),
            Integrator::Adaptive(s) => s.init(system, x0),
            Integrator::EnergyChecked(s) => s.init(system, x0),
        }
    }

    fn step(
        &mut self,
        system: &impl DynamicalSystem,
        x: &[f64],
        h: &mut f64,
        dx: &mut [f64],
    ) -> f64 {
        match self {
            Integrator::Fixed(s) => s.step(system, x, h, dx),
            Integrator::Adaptive(s) => s.step(system, x, h, dx),
            Integrator::EnergyChecked(s) => s.step(system, x, h, dx),
        }
    }

    fn step_exact(&mut self, system: &impl DynamicalSystem, x: &[f64], h: f64, dx: &mut [f64]) {
        match self {
            Integrator::Fixed(s) => s.step_exact(system, x, h, dx),
            Integrator::Adaptive(s) => s.step_exact(system, x, h, dx),
            Integrator::EnergyChecked(s) => s.step_exact(system, x, h, dx),
        }
    }
}
