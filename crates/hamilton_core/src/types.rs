//! Value types shared by the analyzers: state-space boxes, 2-D point
//! sequences and dense scalar maps over two state-space axes.

use crate::error::{DynamicsError, Result};
use nalgebra::{DMatrix, Point2};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Axis-aligned box in state space, one `[lower, upper]` range per component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Result<Self> {
        if lower.len() != upper.len() {
            return Err(DynamicsError::config(format!(
                "Bounds dimension mismatch: {} lower vs {} upper limits.",
                lower.len(),
                upper.len()
            )));
        }
        for (axis, (lo, hi)) in lower.iter().zip(&upper).enumerate() {
            if !(lo <= hi) {
                return Err(DynamicsError::config(format!(
                    "Bounds axis {axis} has lower limit {lo} above upper limit {hi}."
                )));
            }
        }
        Ok(Self { lower, upper })
    }

    /// Symmetric box `[-half_width_i, half_width_i]`.
    pub fn symmetric(half_widths: &[f64]) -> Result<Self> {
        Self::new(
            half_widths.iter().map(|w| -w.abs()).collect(),
            half_widths.iter().map(|w| w.abs()).collect(),
        )
    }

    pub fn dimension(&self) -> usize {
        self.lower.len()
    }

    pub fn range(&self, axis: usize) -> (f64, f64) {
        (self.lower[axis], self.upper[axis])
    }

    pub fn set_range(&mut self, axis: usize, lower: f64, upper: f64) {
        self.lower[axis] = lower.min(upper);
        self.upper[axis] = upper.max(lower);
    }

    pub fn width(&self, axis: usize) -> f64 {
        self.upper[axis] - self.lower[axis]
    }

    pub fn is_subset_of(&self, other: &Bounds) -> bool {
        self.dimension() == other.dimension()
            && (0..self.dimension())
                .all(|i| self.lower[i] >= other.lower[i] && self.upper[i] <= other.upper[i])
    }

    /// Largest magnitude reachable on each axis; used as an error scale.
    pub fn magnitudes(&self) -> Vec<f64> {
        self.lower
            .iter()
            .zip(&self.upper)
            .map(|(lo, hi)| lo.abs().max(hi.abs()))
            .collect()
    }
}

/// Ordered sequence of 2-D points (sections, loops, projected orbits).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointSequence {
    pub points: Vec<Point2<f64>>,
}

impl PointSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, point: Point2<f64>) {
        self.points.push(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Point2<f64>> {
        self.points.iter()
    }

    pub fn bounding_box(&self) -> Option<(Point2<f64>, Point2<f64>)> {
        let first = self.points.first()?;
        let mut min = *first;
        let mut max = *first;
        for p in &self.points[1..] {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }
        Some((min, max))
    }

    /// Larger side of the bounding box; zero for fewer than two points.
    pub fn extent(&self) -> f64 {
        self.bounding_box()
            .map(|(min, max)| (max.x - min.x).max(max.y - min.y))
            .unwrap_or(0.0)
    }

    pub fn centroid(&self) -> Option<Point2<f64>> {
        if self.points.is_empty() {
            return None;
        }
        let n = self.points.len() as f64;
        let (sx, sy) = self
            .points
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Some(Point2::new(sx / n, sy / n))
    }

    /// Points sorted by polar angle around `center`, closing them into a loop.
    pub fn ordered_around(&self, center: &Point2<f64>) -> PointSequence {
        let mut points = self.points.clone();
        let angle = |p: &Point2<f64>| (p.y - center.y).atan2(p.x - center.x);
        points.sort_by(|a, b| angle(a).partial_cmp(&angle(b)).unwrap_or(Ordering::Equal));
        PointSequence { points }
    }
}

impl FromIterator<Point2<f64>> for PointSequence {
    fn from_iter<I: IntoIterator<Item = Point2<f64>>>(iter: I) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}

/// Dense `n1 x n2` map of scalars over the rectangle spanned by two state axes.
///
/// Cell `(i, j)` covers `[min.x + i*dx, min.x + (i+1)*dx) x [min.y + j*dy, ...)`.
/// Unresolved or inaccessible cells hold `NaN`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarGrid {
    pub axes: (usize, usize),
    pub min: Point2<f64>,
    pub max: Point2<f64>,
    pub values: DMatrix<f64>,
}

impl ScalarGrid {
    pub fn new(
        axes: (usize, usize),
        min: Point2<f64>,
        max: Point2<f64>,
        n1: usize,
        n2: usize,
    ) -> Result<Self> {
        if n1 == 0 || n2 == 0 {
            return Err(DynamicsError::config("Grid resolution must be positive."));
        }
        if !(max.x > min.x && max.y > min.y) {
            return Err(DynamicsError::config(
                "Grid rectangle must have positive width and height.",
            ));
        }
        Ok(Self {
            axes,
            min,
            max,
            values: DMatrix::from_element(n1, n2, f64::NAN),
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        self.values.shape()
    }

    pub fn cell_size(&self) -> (f64, f64) {
        let (n1, n2) = self.shape();
        (
            (self.max.x - self.min.x) / n1 as f64,
            (self.max.y - self.min.y) / n2 as f64,
        )
    }

    pub fn cell_center(&self, i: usize, j: usize) -> Point2<f64> {
        let (dx, dy) = self.cell_size();
        Point2::new(
            self.min.x + (i as f64 + 0.5) * dx,
            self.min.y + (j as f64 + 0.5) * dy,
        )
    }

    /// Cell containing `point`, or `None` outside the rectangle.
    pub fn cell_of(&self, point: &Point2<f64>) -> Option<(usize, usize)> {
        let (n1, n2) = self.shape();
        let (dx, dy) = self.cell_size();
        let fi = ((point.x - self.min.x) / dx).floor();
        let fj = ((point.y - self.min.y) / dy).floor();
        if !(fi >= 0.0 && fj >= 0.0) {
            return None;
        }
        let (i, j) = (fi as usize, fj as usize);
        (i < n1 && j < n2).then_some((i, j))
    }

    pub fn value(&self, i: usize, j: usize) -> f64 {
        self.values[(i, j)]
    }

    pub fn resolved_cells(&self) -> usize {
        self.values.iter().filter(|v| !v.is_nan()).count()
    }
}
