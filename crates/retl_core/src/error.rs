//! Core error types for RETL.

/// Core result type
pub type RetlResult<T> = Result<T, RetlError>;

/// Every failure the engine can report.
///
/// Graph-construction kinds abort the run before any record flows.
/// Per-record kinds stay local to the stream worker that hit them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetlError {
    /// Range with start after end
    #[error("Invalid range: {start}..{end}")]
    InvalidRange {
        /// Range start
        start: u64,
        /// Range end
        end: u64,
    },

    /// Field index past the end of a record
    #[error("Field {index} out of bounds for record of length {len}")]
    FieldOutOfBounds {
        /// Requested index
        index: usize,
        /// Record length
        len: usize,
    },

    /// `{name}` placeholder with no binding
    #[error("Unresolved variable: {name}")]
    UnresolvedVariable {
        /// Variable name
        name: String,
    },

    /// Branch target naming a stream that does not exist
    #[error("Stream {stream} routes to unknown stream {dest}")]
    UnknownStreamReference {
        /// Stream holding the router
        stream: String,
        /// Missing destination
        dest: String,
    },

    /// Two streams with one name
    #[error("Duplicate stream name: {name}")]
    DuplicateStreamName {
        /// Offending name
        name: String,
    },

    /// Operator or resource kind absent from the registry
    #[error("Unknown operator: {name}")]
    UnknownOperator {
        /// Operator name as written
        name: String,
    },

    /// Record derived through too many branch routers
    #[error("Routing depth {depth} exceeds maximum {max} ({stream} -> {dest})")]
    RoutingDepthExceeded {
        /// Stream that tried to route
        stream: String,
        /// Destination stream
        dest: String,
        /// Hop count the record would have reached
        depth: u32,
        /// Configured maximum
        max: u32,
    },

    /// Failure raised inside an operator
    #[error("Operator {operator} failed: {reason}")]
    OperatorFailure {
        /// Operator name
        operator: String,
        /// Failure description
        reason: String,
    },

    /// Sink could not persist a record
    #[error("Sink {sink} write failed: {reason}")]
    SinkWriteFailure {
        /// Sink name
        sink: String,
        /// Failure description
        reason: String,
    },

    /// Structurally invalid definition or operator configuration
    #[error("Invalid definition at {location}: {reason}")]
    InvalidDefinition {
        /// Where the problem was found
        location: String,
        /// What is wrong
        reason: String,
    },

    /// Work was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal error (for unexpected errors)
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl RetlError {
    /// Shorthand for an operator failure
    pub fn operator(operator: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::OperatorFailure {
            operator: operator.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for an invalid definition
    pub fn definition(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            location: location.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error is raised while building the graph
    #[must_use]
    pub fn is_build_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRange { .. }
                | Self::UnresolvedVariable { .. }
                | Self::UnknownStreamReference { .. }
                | Self::DuplicateStreamName { .. }
                | Self::UnknownOperator { .. }
                | Self::InvalidDefinition { .. }
        )
    }

    /// Whether this error concerns a single record and may be skipped
    #[must_use]
    pub fn is_record_error(&self) -> bool {
        matches!(
            self,
            Self::FieldOutOfBounds { .. }
                | Self::OperatorFailure { .. }
                | Self::SinkWriteFailure { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RetlError::InvalidRange { start: 9, end: 5 };
        assert_eq!(format!("{}", err), "Invalid range: 9..5");

        let err = RetlError::UnknownStreamReference {
            stream: "start".to_string(),
            dest: "nameMongo".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            "Stream start routes to unknown stream nameMongo"
        );
    }

    #[test]
    fn test_error_classes() {
        assert!(RetlError::DuplicateStreamName { name: "a".into() }.is_build_error());
        assert!(!RetlError::DuplicateStreamName { name: "a".into() }.is_record_error());

        let err = RetlError::FieldOutOfBounds { index: 4, len: 2 };
        assert!(err.is_record_error());
        assert!(!err.is_build_error());

        assert!(!RetlError::Cancelled.is_record_error());
        assert!(!RetlError::Cancelled.is_build_error());
    }

    #[test]
    fn test_error_shorthands() {
        let err = RetlError::operator("GenerateUUID", "boom");
        assert_eq!(
            err,
            RetlError::OperatorFailure {
                operator: "GenerateUUID".to_string(),
                reason: "boom".to_string(),
            }
        );
        assert!(RetlError::definition("start[0]", "bad").to_string().contains("start[0]"));
    }
}
