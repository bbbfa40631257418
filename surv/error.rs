use thiserror::Error;

/// Errors raised by the preprocessing and assembly stages.
///
/// Every malformed input fails eagerly with a specific kind; no row is
/// silently coerced or dropped.
#[derive(Debug, Error)]
pub enum SurvError {
    #[error("data contract violation for country '{country}': {detail}")]
    DataContractViolation { country: String, detail: String },

    #[error("country '{0}' has no panel rows")]
    EmptyGroup(String),

    #[error("covariate '{0}' has zero variance across all interval rows; cannot standardize")]
    DegenerateCovariate(String),

    #[error("interval row {row} references {kind} id {id}, outside [1, {bound}]")]
    IndexMismatch {
        row: usize,
        kind: &'static str,
        id: usize,
        bound: usize,
    },

    #[error("non-finite value encountered in {context}")]
    NumericSingularity { context: String },

    #[error("country '{0}' has no region assignment")]
    UnmappedCountry(String),
}
