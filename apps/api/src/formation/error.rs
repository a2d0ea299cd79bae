use thiserror::Error;

use crate::formation::milp::SolveStatus;

/// Errors raised by team formation.
///
/// Input validation is fail-fast: no enumeration or solve runs once an
/// `InvalidInput` is detected. Quality-gate rejections and judge failures are
/// NOT errors: see `quality::QualityGateRejection` and `ranker`.
#[derive(Debug, Error)]
pub enum FormationError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Solver did not reach an optimal solution (status: {status:?})")]
    SolverInfeasible { status: SolveStatus },
}

impl FormationError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        FormationError::InvalidInput(msg.into())
    }
}
