use thiserror::Error;

#[derive(Error, Debug)]
pub enum DynamicsError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unsupported by this system: {0}")]
    Unsupported(&'static str),

    #[error("Trajectory did not cross the section plane within {elapsed} time units")]
    NoCrossing { elapsed: f64 },

    #[error("Computation cancelled")]
    Cancelled,

    #[error("Wall-clock deadline exceeded")]
    DeadlineExceeded,

    #[error("Integration time limit {limit} reached")]
    TimeLimit { limit: f64 },

    #[error("Integrator stalled at t = {time}: no admissible step")]
    Stalled { time: f64 },

    #[error("Not accessible: {0}")]
    NotAccessible(String),

    #[error("Degenerate deviation frame: {0}")]
    Degenerate(String),

    #[error(transparent)]
    Model(#[from] anyhow::Error),
}

impl DynamicsError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        DynamicsError::Configuration(message.into())
    }
}

pub type Result<T> = std::result::Result<T, DynamicsError>;
