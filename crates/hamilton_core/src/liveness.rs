//! Deadlines and cancellation for the stepping loops.
//!
//! Every driver loop calls [`Deadline::check`] once per step (or macro-step),
//! which is the only place a long computation can be interrupted.

use crate::error::{DynamicsError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct Deadline {
    wall: Option<Instant>,
    cancel: Option<Arc<AtomicBool>>,
    time_limit: Option<f64>,
}

impl Deadline {
    /// A deadline that never fires.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn after(duration: Duration) -> Self {
        Self::none().with_wall_clock(Instant::now() + duration)
    }

    pub fn with_wall_clock(mut self, instant: Instant) -> Self {
        self.wall = Some(instant);
        self
    }

    /// Shares a flag that another thread may raise to stop the computation.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Caps the integration time (in system time units) of a single run.
    pub fn with_time_limit(mut self, limit: f64) -> Self {
        self.time_limit = Some(limit);
        self
    }

    pub fn time_limit(&self) -> Option<f64> {
        self.time_limit
    }

    pub fn check(&self, t: f64) -> Result<()> {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(DynamicsError::Cancelled);
            }
        }
        if let Some(limit) = self.time_limit {
            if t.abs() >= limit {
                return Err(DynamicsError::TimeLimit { limit });
            }
        }
        if let Some(wall) = self.wall {
            if Instant::now() >= wall {
                return Err(DynamicsError::DeadlineExceeded);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_deadline_never_fires() {
        assert!(Deadline::none().check(1e12).is_ok());
    }

    #[test]
    fn cancel_flag_is_observed() {
        let flag = Arc::new(AtomicBool::new(false));
        let deadline = Deadline::none().with_cancel_flag(flag.clone());
        assert!(deadline.check(0.0).is_ok());
        flag.store(true, Ordering::Relaxed);
        assert!(matches!(deadline.check(0.0), Err(DynamicsError::Cancelled)));
    }

    #[test]
    fn time_limit_trips_at_limit() {
        let deadline = Deadline::none().with_time_limit(10.0);
        assert!(deadline.check(9.99).is_ok());
        assert!(matches!(
            deadline.check(10.0),
            Err(DynamicsError::TimeLimit { limit }) if limit == 10.0
        ));
    }

    #[test]
    fn expired_wall_clock_reports_deadline() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(matches!(
            deadline.check(0.0),
            Err(DynamicsError::DeadlineExceeded)
        ));
    }
}
