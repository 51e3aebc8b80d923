// Core Layer: Error Types
//
// One error enum for graph construction, rewriting and reference evaluation.

use std::fmt;

/// Fieldless discriminant of [`GraphError`], used for matching failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TypeMismatch,
    MissingInput,
    Inconsistency,
    Contract,
    UnknownVariable,
    UnknownApply,
    InvalidValue,
    UnknownProfile,
    Evaluation,
}

/// Errors raised by the graph IR, the rewrite engine and the interpreter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Operation applied to incompatible input types
    TypeMismatch { op: String, reason: String },
    /// Import reached a leaf that is neither a declared input nor a constant
    MissingInput { variable: usize, name: Option<String> },
    /// A replacement would break the DAG property or change a type signature
    Inconsistency(String),
    /// Scan roles disagree with the arity of its nested graph
    Contract(String),
    /// Variable id not present in the arena or graph
    UnknownVariable(usize),
    /// Apply id not present in the arena or graph
    UnknownApply(usize),
    /// Malformed argument
    InvalidValue(String),
    /// Rewrite profile lookup or parse failure
    UnknownProfile(String),
    /// Reference interpreter runtime failure
    Evaluation(String),
}

impl GraphError {
    pub fn type_mismatch(op: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TypeMismatch {
            op: op.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Self::MissingInput { .. } => ErrorKind::MissingInput,
            Self::Inconsistency(_) => ErrorKind::Inconsistency,
            Self::Contract(_) => ErrorKind::Contract,
            Self::UnknownVariable(_) => ErrorKind::UnknownVariable,
            Self::UnknownApply(_) => ErrorKind::UnknownApply,
            Self::InvalidValue(_) => ErrorKind::InvalidValue,
            Self::UnknownProfile(_) => ErrorKind::UnknownProfile,
            Self::Evaluation(_) => ErrorKind::Evaluation,
        }
    }
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeMismatch { op, reason } => write!(f, "Type mismatch in {}: {}", op, reason),
            Self::MissingInput { variable, name } => match name {
                Some(name) => write!(
                    f,
                    "Variable %{} ({}) is neither a declared input nor a constant",
                    variable, name
                ),
                None => write!(
                    f,
                    "Variable %{} is neither a declared input nor a constant",
                    variable
                ),
            },
            Self::Inconsistency(msg) => write!(f, "Graph inconsistency: {}", msg),
            Self::Contract(msg) => write!(f, "Scan contract violation: {}", msg),
            Self::UnknownVariable(id) => write!(f, "Unknown variable %{}", id),
            Self::UnknownApply(id) => write!(f, "Unknown apply node #{}", id),
            Self::InvalidValue(msg) => write!(f, "Invalid value: {}", msg),
            Self::UnknownProfile(msg) => write!(f, "Unknown rewrite profile: {}", msg),
            Self::Evaluation(msg) => write!(f, "Evaluation failed: {}", msg),
        }
    }
}

impl std::error::Error for GraphError {}

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        let err = GraphError::type_mismatch("dot", "rank 3 operand");
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert_eq!(
            GraphError::Contract("x".into()).kind(),
            ErrorKind::Contract
        );
    }

    #[test]
    fn test_display_messages() {
        let err = GraphError::MissingInput {
            variable: 7,
            name: Some("x".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Variable %7 (x) is neither a declared input nor a constant"
        );
        assert_eq!(
            GraphError::Inconsistency("cycle".into()).to_string(),
            "Graph inconsistency: cycle"
        );
    }
}
