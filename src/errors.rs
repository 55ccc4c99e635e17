//! All errors that can occur in the epimbp library.

use std::fmt;

pub type Result<T> = std::result::Result<T, EpiError>;

#[derive(Clone, Debug, PartialEq)]
pub enum EpiError {
    /// A candidate parameter lies outside the support of its prior.
    ParameterOutOfBounds {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },
    /// A derived quantity (branch probability, sojourn time, ...) is invalid.
    InvalidParameter(String),
    /// The proposed trajectory exceeded the infection ceiling.
    InfectionCeilingExceeded { infections: usize, ceiling: usize },
    NumericConsistencyViolation(String),
    SamplingExhaustion(String),
    InitializationError(String),
    PackError(String),
    OutputError(String),
}

impl EpiError {
    /// Errors that reject a proposal rather than abort the run.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            EpiError::ParameterOutOfBounds { .. }
                | EpiError::InvalidParameter(_)
                | EpiError::InfectionCeilingExceeded { .. }
        )
    }
}

impl fmt::Display for EpiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EpiError::ParameterOutOfBounds {
                name,
                value,
                min,
                max,
            } => write!(
                f,
                "ParameterOutOfBounds: {name}={value} not in [{min}, {max}]"
            ),
            EpiError::InvalidParameter(message) => write!(f, "InvalidParameter: {}", message),
            EpiError::InfectionCeilingExceeded {
                infections,
                ceiling,
            } => write!(
                f,
                "InfectionCeilingExceeded: {infections} infections reached ceiling {ceiling}"
            ),
            EpiError::NumericConsistencyViolation(message) => {
                write!(f, "NumericConsistencyViolation: {}", message)
            }
            EpiError::SamplingExhaustion(message) => {
                write!(f, "SamplingExhaustion: {}", message)
            }
            EpiError::InitializationError(message) => {
                write!(f, "InitializationError: {}", message)
            }
            EpiError::PackError(message) => write!(f, "PackError: {}", message),
            EpiError::OutputError(message) => write!(f, "OutputError: {}", message),
        }
    }
}

impl std::error::Error for EpiError {}
