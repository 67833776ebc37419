//! Error kinds which callers may need to tell apart.
//!
//! These are carried inside [`anyhow::Error`] like every other error in the program, so code that
//! needs to classify a failure uses `err.downcast_ref::<PlanningError>()`. Infeasibility of a stage
//! is not an error: it is an ordinary outcome of a run.
use derive_more::Display;

/// An error raised by the planning engine
#[derive(Debug, Display, Clone, PartialEq)]
pub enum PlanningError {
    /// A pathway function was evaluated before the base year of its model
    #[display("Year {year} is before the base year ({base_year}) of the {model} model")]
    Domain {
        /// The name of the model (e.g. "pv cost")
        model: String,
        /// The year requested
        year: u32,
        /// The model's base year
        base_year: u32,
    },
    /// The configuration is internally inconsistent
    #[display("Invalid configuration: {_0}")]
    Config(String),
    /// An input (scenario template or usage log) does not match the configuration
    #[display("Validation failed: {_0}")]
    Validation(String),
    /// The external optimiser did not produce the expected output
    #[display("Missing optimiser output: {_0}")]
    MissingOutput(String),
    /// The external optimiser did not finish in time
    #[display("Optimiser timed out after {secs}s for stage {year}")]
    Timeout {
        /// The stage year
        year: u32,
        /// The timeout which was exceeded
        secs: u64,
    },
    /// The external optimiser exited with a failure code
    #[display(
        "Optimiser failed for stage {year} (exit code: {})\nSTDOUT:\n{stdout}\nSTDERR:\n{stderr}",
        code.map_or_else(|| "none".to_string(), |c| c.to_string())
    )]
    OptimizerFailed {
        /// The stage year
        year: u32,
        /// Exit code, if the process was not killed by a signal
        code: Option<i32>,
        /// Captured standard output
        stdout: String,
        /// Captured standard error
        stderr: String,
    },
}

impl std::error::Error for PlanningError {}

/// Create a [`PlanningError::Config`] wrapped in an [`anyhow::Error`]
macro_rules! config_err {
    ($($arg:tt)*) => {
        anyhow::Error::new($crate::error::PlanningError::Config(format!($($arg)*)))
    };
}
pub(crate) use config_err;

/// Create a [`PlanningError::Validation`] wrapped in an [`anyhow::Error`]
macro_rules! validation_err {
    ($($arg:tt)*) => {
        anyhow::Error::new($crate::error::PlanningError::Validation(format!($($arg)*)))
    };
}
pub(crate) use validation_err;

/// Create a [`PlanningError::MissingOutput`] wrapped in an [`anyhow::Error`]
macro_rules! missing_output_err {
    ($($arg:tt)*) => {
        anyhow::Error::new($crate::error::PlanningError::MissingOutput(format!($($arg)*)))
    };
}
pub(crate) use missing_output_err;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_domain() {
        let err = PlanningError::Domain {
            model: "pv cost".into(),
            year: 2020,
            base_year: 2025,
        };
        assert_eq!(
            err.to_string(),
            "Year 2020 is before the base year (2025) of the pv cost model"
        );
    }

    #[test]
    fn test_display_optimizer_failed() {
        let err = PlanningError::OptimizerFailed {
            year: 2030,
            code: Some(2),
            stdout: "out".into(),
            stderr: "err".into(),
        };
        assert_eq!(
            err.to_string(),
            "Optimiser failed for stage 2030 (exit code: 2)\nSTDOUT:\nout\nSTDERR:\nerr"
        );
    }

    #[test]
    fn test_macros_downcast() {
        let err = config_err!("bad {}", 1);
        assert_eq!(
            err.downcast_ref::<PlanningError>(),
            Some(&PlanningError::Config("bad 1".into()))
        );
        assert_eq!(err.to_string(), "Invalid configuration: bad 1");
    }
}
