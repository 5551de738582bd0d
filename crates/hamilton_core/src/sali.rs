//! Regular/chaotic classification with the Smaller Alignment Index.
//!
//! Two deviation vectors are carried along the orbit and renormalized after
//! every macro-step. Their alignment index `min(||w1 - w2||, ||w1 + w2||)`
//! collapses exponentially on chaotic orbits and stays of order one on
//! regular ones; verdicts are taken on the windowed mean of `-log10(AI)`.

use crate::error::{DynamicsError, Result};
use crate::liveness::Deadline;
use crate::propagate::{norm, unit_vector, TangentPropagator};
use crate::section::{CrossingDetector, Orientation, Plane, Section};
use crate::solvers::IntegratorSettings;
use crate::traits::{HamiltonianSystem, Verdict};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SaliSettings {
    pub integrator: IntegratorSettings,
    /// Integrator steps between two renormalizations.
    pub steps_per_macro: usize,
    /// Macro-steps in the running mean.
    pub window: usize,
    /// Macro-steps before any verdict is considered.
    pub warm_up: usize,
    pub chaotic_threshold: f64,
    /// A single sample above this marks the run as confidently chaotic.
    pub confident_threshold: f64,
    /// Regular once the mean drops below `t / regular_time_scale`.
    pub regular_time_scale: f64,
    /// Replaces `regular_time_scale` after any sample above
    /// `confident_threshold`.
    pub extended_regular_time_scale: f64,
    /// Basis vectors seeding the two deviation vectors; defaults to the first
    /// coordinate and its conjugate momentum.
    pub seeds: Option<(usize, usize)>,
}

impl Default for SaliSettings {
    fn default() -> Self {
        Self {
            integrator: IntegratorSettings::default(),
            steps_per_macro: 1000,
            window: 400,
            warm_up: 100,
            chaotic_threshold: 4.0,
            confident_threshold: 4.0,
            regular_time_scale: 300.0,
            extended_regular_time_scale: 500.0,
            seeds: None,
        }
    }
}

impl SaliSettings {
    pub fn validate(&self) -> Result<()> {
        if self.steps_per_macro == 0 {
            return Err(DynamicsError::config("steps_per_macro must be at least 1."));
        }
        if self.window == 0 {
            return Err(DynamicsError::config("SALI window must hold at least one sample."));
        }
        if !(self.regular_time_scale > 0.0 && self.extended_regular_time_scale > 0.0) {
            return Err(DynamicsError::config("Regular time scales must be positive."));
        }
        if !(self.chaotic_threshold.is_finite() && self.confident_threshold.is_finite()) {
            return Err(DynamicsError::config("SALI thresholds must be finite."));
        }
        self.integrator.validate()
    }

    /// Threshold rule of the plain classifier.
    pub fn decide(&self, mean: f64, t: f64, confident: bool) -> Option<Verdict> {
        if mean > self.chaotic_threshold {
            return Some(Verdict::Chaotic);
        }
        let scale = if confident {
            self.extended_regular_time_scale
        } else {
            self.regular_time_scale
        };
        (mean < t / scale).then_some(Verdict::Regular)
    }

    fn seed_vectors(&self, dof: usize, dim: usize) -> Result<Vec<Vec<f64>>> {
        let (a, b) = self.seeds.unwrap_or((0, dof));
        if a >= dim || b >= dim || a == b {
            return Err(DynamicsError::config(format!(
                "SALI seeds ({a}, {b}) must be two distinct indices below {dim}."
            )));
        }
        Ok(vec![unit_vector(dim, a), unit_vector(dim, b)])
    }
}

/// `intercept + slope * t`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearBound {
    pub intercept: f64,
    pub slope: f64,
}

impl LinearBound {
    pub fn constant(value: f64) -> Self {
        Self {
            intercept: value,
            slope: 0.0,
        }
    }

    pub fn at(&self, t: f64) -> f64 {
        self.intercept + self.slope * t
    }
}

/// Thresholds and section geometry of the section-coupled classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SectionVerdictSettings {
    /// Chaotic once the mean exceeds this bound.
    pub chaotic: LinearBound,
    /// Regular once the mean falls below this bound.
    pub regular: LinearBound,
    pub orientation: Orientation,
    pub axes: (usize, usize),
}

impl Default for SectionVerdictSettings {
    fn default() -> Self {
        Self {
            chaotic: LinearBound::constant(4.0),
            regular: LinearBound {
                intercept: 0.0,
                slope: 1.0 / 300.0,
            },
            orientation: Orientation::Both,
            axes: (0, 1),
        }
    }
}

impl SectionVerdictSettings {
    pub fn decide(&self, mean: f64, t: f64) -> Option<Verdict> {
        if mean > self.chaotic.at(t) {
            Some(Verdict::Chaotic)
        } else if mean < self.regular.at(t) {
            Some(Verdict::Regular)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaliOutcome {
    pub verdict: Verdict,
    /// Integration time at the verdict.
    pub time: f64,
    pub macro_steps: usize,
    /// Windowed mean of `-log10(AI)` the verdict was taken on.
    pub mean: f64,
    /// Alignment index after every macro-step.
    pub alignment: Vec<f64>,
}

/// Running window of `-log10(AI)` samples.
#[derive(Debug, Clone)]
struct AlignmentWindow {
    samples: VecDeque<f64>,
    capacity: usize,
    confident: bool,
}

impl AlignmentWindow {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            confident: false,
        }
    }

    fn push(&mut self, alignment: f64, confident_threshold: f64) {
        let sample = -alignment.max(f64::MIN_POSITIVE).log10();
        if sample > confident_threshold {
            self.confident = true;
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    fn mean(&self) -> f64 {
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }
}

/// Normalizes both vectors and returns their alignment index.
fn renormalize(pair: &mut [Vec<f64>], t: f64) -> Result<f64> {
    for w in pair.iter_mut() {
        let length = norm(w);
        if !(length > 0.0 && length.is_finite()) {
            return Err(DynamicsError::Degenerate(format!(
                "deviation vector norm {length} at t = {t}"
            )));
        }
        w.iter_mut().for_each(|v| *v /= length);
    }
    let (difference, sum) = pair[0]
        .iter()
        .zip(&pair[1])
        .fold((0.0, 0.0), |(d, s), (a, b)| {
            (d + (a - b) * (a - b), s + (a + b) * (a + b))
        });
    Ok(difference.sqrt().min(sum.sqrt()))
}

struct SectionRecorder<'r> {
    detector: &'r mut CrossingDetector,
    section: &'r mut Section,
    axes: (usize, usize),
}

pub struct SaliClassifier<'a, S: ?Sized> {
    system: &'a S,
    settings: SaliSettings,
}

impl<'a, S: HamiltonianSystem + ?Sized> SaliClassifier<'a, S> {
    pub fn new(system: &'a S, settings: SaliSettings) -> Result<Self> {
        settings.validate()?;
        settings.seed_vectors(system.degrees_of_freedom(), system.dimension())?;
        Ok(Self { system, settings })
    }

    pub fn settings(&self) -> &SaliSettings {
        &self.settings
    }

    /// Runs until a verdict is reached; only `deadline` bounds the loop.
    pub fn classify(&self, x0: &[f64], deadline: &Deadline) -> Result<SaliOutcome> {
        self.run(x0, deadline, None, |mean, t, confident| {
            self.settings.decide(mean, t, confident)
        })
    }

    /// Classifies while recording the crossings with `plane`; thresholds come
    /// from `coupled`.
    pub fn classify_with_section(
        &self,
        x0: &[f64],
        plane: &Plane,
        coupled: &SectionVerdictSettings,
        deadline: &Deadline,
    ) -> Result<(SaliOutcome, Section)> {
        let dim = self.system.dimension();
        if plane.dimension() != dim {
            return Err(DynamicsError::config(format!(
                "Plane dimension {} does not match system dimension {}.",
                plane.dimension(),
                dim
            )));
        }
        crate::refine::check_axes(dim, coupled.axes)?;
        let mut detector = CrossingDetector::new(plane.clone(), coupled.orientation);
        detector.reset(x0);
        let mut section = Section::default();
        let recorder = SectionRecorder {
            detector: &mut detector,
            section: &mut section,
            axes: coupled.axes,
        };
        let outcome = self.run(x0, deadline, Some(recorder), |mean, t, _| {
            coupled.decide(mean, t)
        })?;
        section.elapsed = outcome.time;
        Ok((outcome, section))
    }

    fn run(
        &self,
        x0: &[f64],
        deadline: &Deadline,
        mut recorder: Option<SectionRecorder<'_>>,
        decide: impl Fn(f64, f64, bool) -> Option<Verdict>,
    ) -> Result<SaliOutcome> {
        let settings = &self.settings;
        let seeds =
            settings.seed_vectors(self.system.degrees_of_freedom(), self.system.dimension())?;
        let mut propagator = TangentPropagator::new(self.system, &settings.integrator, x0, seeds)?;
        let mut window = AlignmentWindow::new(settings.window);
        let mut alignment = Vec::new();

        loop {
            for _ in 0..settings.steps_per_macro {
                deadline.check(propagator.time())?;
                let advance = propagator.advance()?;
                if let Some(recorder) = recorder.as_mut() {
                    let crossing = recorder.detector.observe(
                        propagator.previous_time(),
                        propagator.previous_state(),
                        propagator.time(),
                        propagator.state(),
                        advance.post_processed,
                    );
                    if let Some(crossing) = crossing {
                        recorder.section.record(crossing, recorder.axes);
                    }
                }
            }

            let t = propagator.time();
            let index = renormalize(propagator.deviations_mut(), t)?;
            alignment.push(index);
            window.push(index, settings.confident_threshold);

            if alignment.len() < settings.warm_up {
                continue;
            }
            let mean = window.mean();
            let verdict = self
                .system
                .sali_decision(mean, t)
                .or_else(|| decide(mean, t, window.confident));
            if let Some(verdict) = verdict {
                debug!(
                    "SALI verdict {:?} at t = {:.3} after {} macro-steps (mean {:.3})",
                    verdict,
                    t,
                    alignment.len(),
                    mean
                );
                return Ok(SaliOutcome {
                    verdict,
                    time: t,
                    macro_steps: alignment.len(),
                    mean,
                    alignment,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_systems::{HarmonicOscillator, HenonHeiles, InvertedOscillator};

    fn quick(warm_up: usize) -> SaliSettings {
        SaliSettings {
            integrator: IntegratorSettings::fixed(0.01),
            steps_per_macro: 10,
            warm_up,
            ..SaliSettings::default()
        }
    }

    #[test]
    fn settings_are_validated() {
        let zero_macro = SaliSettings {
            steps_per_macro: 0,
            ..SaliSettings::default()
        };
        assert!(matches!(
            SaliClassifier::new(&HarmonicOscillator, zero_macro),
            Err(DynamicsError::Configuration(_))
        ));
        let same_seed = SaliSettings {
            seeds: Some((1, 1)),
            ..SaliSettings::default()
        };
        assert!(SaliClassifier::new(&HarmonicOscillator, same_seed).is_err());
        let out_of_range = SaliSettings {
            seeds: Some((0, 2)),
            ..SaliSettings::default()
        };
        assert!(SaliClassifier::new(&HarmonicOscillator, out_of_range).is_err());
    }

    #[test]
    fn threshold_rules() {
        let settings = SaliSettings::default();
        assert_eq!(settings.decide(4.5, 10.0, false), Some(Verdict::Chaotic));
        assert_eq!(settings.decide(0.5, 300.0, false), Some(Verdict::Regular));
        // A confident chaotic sample pushes the regular threshold out.
        assert_eq!(settings.decide(0.7, 300.0, true), None);
        assert_eq!(settings.decide(2.0, 300.0, false), None);

        let coupled = SectionVerdictSettings::default();
        assert_eq!(coupled.decide(5.0, 0.0), Some(Verdict::Chaotic));
        assert_eq!(coupled.decide(0.5, 300.0), Some(Verdict::Regular));
        assert_eq!(coupled.decide(2.0, 300.0), None);
    }

    #[test]
    fn alignment_window_drops_old_samples() {
        let mut window = AlignmentWindow::new(2);
        window.push(1e-2, 4.0);
        window.push(1e-4, 4.0);
        window.push(1e-6, 4.0);
        assert!((window.mean() - 5.0).abs() < 1e-12);
        assert!(window.confident);
        window.push(0.0, 4.0);
        assert!(window.mean().is_finite());
    }

    #[test]
    fn confident_threshold_is_independent_of_the_mean_test() {
        let mut strict = AlignmentWindow::new(4);
        strict.push(1e-6, 8.0);
        assert!(!strict.confident);
        strict.push(1e-9, 8.0);
        assert!(strict.confident);

        let settings = SaliSettings {
            confident_threshold: f64::INFINITY,
            ..SaliSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn oscillator_is_regular() {
        let classifier = SaliClassifier::new(&HarmonicOscillator, quick(100)).unwrap();
        let outcome = classifier.classify(&[1.0, 0.0], &Deadline::none()).unwrap();
        assert_eq!(outcome.verdict, Verdict::Regular);
        assert_eq!(outcome.macro_steps, 100);
        // The rotation keeps the two unit vectors orthogonal.
        for ai in &outcome.alignment {
            assert!((ai - 2f64.sqrt()).abs() < 1e-6);
        }
    }

    #[test]
    fn saddle_is_chaotic() {
        let classifier = SaliClassifier::new(&InvertedOscillator, quick(200)).unwrap();
        let outcome = classifier
            .classify(&[0.0, 0.0], &Deadline::none().with_time_limit(1000.0))
            .unwrap();
        assert_eq!(outcome.verdict, Verdict::Chaotic);
        assert!(outcome.mean > 4.0);
        assert!(outcome.alignment.last().copied().unwrap() < 1e-8);
    }

    #[test]
    fn model_hook_overrides_thresholds() {
        struct AlwaysChaotic;
        impl HamiltonianSystem for AlwaysChaotic {
            fn degrees_of_freedom(&self) -> usize {
                1
            }
            fn energy(&self, x: &[f64]) -> f64 {
                HarmonicOscillator.energy(x)
            }
            fn equation(&self, x: &[f64], out: &mut [f64]) {
                HarmonicOscillator.equation(x, out)
            }
            fn jacobian(&self, x: &[f64]) -> Result<nalgebra::DMatrix<f64>> {
                HarmonicOscillator.jacobian(x)
            }
            fn sali_decision(&self, _mean: f64, _t: f64) -> Option<Verdict> {
                Some(Verdict::Chaotic)
            }
        }
        let classifier = SaliClassifier::new(&AlwaysChaotic, quick(5)).unwrap();
        let outcome = classifier.classify(&[1.0, 0.0], &Deadline::none()).unwrap();
        assert_eq!(outcome.verdict, Verdict::Chaotic);
        assert_eq!(outcome.macro_steps, 5);
    }

    #[test]
    fn deadline_bounds_an_undecided_run() {
        let settings = SaliSettings {
            chaotic_threshold: 1e6,
            ..quick(30)
        };
        let classifier = SaliClassifier::new(&InvertedOscillator, settings).unwrap();
        let result = classifier.classify(&[0.0, 0.0], &Deadline::none().with_time_limit(5.0));
        assert!(matches!(result, Err(DynamicsError::TimeLimit { .. })));
    }

    #[test]
    fn section_coupled_run_records_crossings() {
        let classifier = SaliClassifier::new(&HarmonicOscillator, quick(100)).unwrap();
        let plane = Plane::coordinate(2, 1, 0.0).unwrap();
        let (outcome, section) = classifier
            .classify_with_section(
                &[1.0, 0.0],
                &plane,
                &SectionVerdictSettings::default(),
                &Deadline::none(),
            )
            .unwrap();
        assert_eq!(outcome.verdict, Verdict::Regular);
        // t = 10 covers three half-periods.
        assert_eq!(section.len(), 3);
        assert!(section.points.iter().all(|p| (p.x.abs() - 1.0).abs() < 1e-4));
        assert_eq!(section.elapsed, outcome.time);
    }

    #[test]
    fn henon_heiles_near_escape_has_chaotic_orbits() {
        let system = HenonHeiles;
        let energy = 0.165;
        let settings = SaliSettings {
            integrator: IntegratorSettings::fixed(0.01),
            steps_per_macro: 100,
            warm_up: 300,
            ..SaliSettings::default()
        };
        let classifier = SaliClassifier::new(&system, settings).unwrap();
        let deadline = Deadline::none().with_time_limit(3000.0);

        let mut chaotic = 0;
        for k in 0..10 {
            let mut ic = vec![0.0, -0.3 + 0.1 * k as f64, 0.0, 0.0];
            if !system.complete_initial_condition(&mut ic, energy).unwrap() {
                continue;
            }
            match classifier.classify(&ic, &deadline) {
                Ok(outcome) if outcome.verdict == Verdict::Chaotic => {
                    chaotic += 1;
                    break;
                }
                Ok(_) | Err(DynamicsError::TimeLimit { .. }) => {}
                Err(e) => panic!("unexpected error {e:?}"),
            }
        }
        assert!(chaotic > 0);
    }
}
