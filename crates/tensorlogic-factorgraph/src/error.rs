//! Error types for factor graph operations.

use thiserror::Error;

/// Errors that can occur while building, running inference on, or training
/// factor graph models.
///
/// Structural errors (duplicate names, unknown names, cardinality
/// disagreements) are programming errors on the caller's side and are
/// reported as soon as they are detected. Numerical non-convergence of the
/// trainer is not an error; see
/// [`NonConvergenceWarning`](crate::NonConvergenceWarning).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FactorGraphError {
    /// A factor type with this name is already registered in the model.
    #[error("Duplicate name: '{0}' is already registered")]
    DuplicateName(String),

    /// No factor type (or prior target) with this name exists.
    #[error("Not found: '{0}'")]
    NotFound(String),

    /// Factor and variable cardinalities disagree.
    #[error("Cardinality mismatch: {context}: expected {expected:?}, got {got:?}")]
    CardinalityMismatch {
        /// Where the mismatch was detected.
        context: String,
        /// Cardinalities required by the factor type.
        expected: Vec<usize>,
        /// Cardinalities found in the graph or factor.
        got: Vec<usize>,
    },

    /// A radial-basis factor type was used before being fitted to data.
    #[error("Uninitialized model: factor type '{0}' must be initialized from training data before use")]
    UninitializedModel(String),

    /// Tree inference was requested on a graph that contains a cycle.
    #[error("Not a tree: {0}")]
    NotATree(String),

    /// A variable index or state lies outside its valid range.
    #[error("Index out of range: {what} {index} (limit {limit})")]
    VariableOutOfRange {
        /// What kind of index was out of range.
        what: &'static str,
        /// The offending value.
        index: usize,
        /// The exclusive upper bound.
        limit: usize,
    },

    /// Vector lengths disagree.
    #[error("Dimension mismatch in {context}: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Where the mismatch was detected.
        context: String,
        /// Expected length.
        expected: usize,
        /// Actual length.
        got: usize,
    },

    /// A hyperparameter or argument is invalid.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type for factor graph operations.
pub type Result<T> = std::result::Result<T, FactorGraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FactorGraphError::DuplicateName("pairwise".to_string());
        assert_eq!(
            err.to_string(),
            "Duplicate name: 'pairwise' is already registered"
        );

        let err = FactorGraphError::CardinalityMismatch {
            context: "factor 3".to_string(),
            expected: vec![2, 2],
            got: vec![2, 3],
        };
        assert!(err.to_string().contains("[2, 3]"));
    }
}
