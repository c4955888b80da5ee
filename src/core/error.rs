//! Errors surfaced to callers, with their HTTP status and response detail.

use serde::Serialize;
use thiserror::Error;

/// Characters of context shown on each side of a search syntax error.
const SYNTAX_CONTEXT_CHARS: usize = 5;

/// Every way an events query can fail.
#[derive(Error, Debug)]
pub enum DiscoverError {
    /// Field token matched nothing
    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// Unknown function or bad arguments
    #[error("{0}")]
    InvalidFunctionArguments(String),

    /// Malformed search filter
    #[error("Parse error at '{fragment}' (column {column}). This is commonly caused by unmatched parentheses. Enclose any text in double quotes.")]
    SearchSyntax {
        /// Text around the failure
        fragment: String,
        /// 1-based character column
        column: usize,
    },

    /// Well-formed but unusable request
    #[error("{0}")]
    InvalidSearchQuery(String),

    /// Empty field list
    #[error("No columns selected")]
    NoColumnsSelected,

    /// Field cap exceeded
    #[error("You can view up to {max} fields at a time. Please delete some and try again.")]
    TooManyFields {
        /// Field cap
        max: usize,
    },

    /// Several projects without multi-project access
    #[error("You cannot view events from multiple projects.")]
    MultipleProjectsDenied,

    /// Project missing or not accessible
    #[error("Invalid query. Project {0} does not exist or is not an actively selected project.")]
    ProjectNotFound(String),

    /// Range starts before the retention window
    #[error("Invalid date range. Please try a more recent date range.")]
    RetentionExceeded,

    /// Sort key not among the selected fields
    #[error("Cannot order by a field that is not selected.")]
    InvalidOrderBy {
        /// Sort token as written
        field: String,
    },

    /// Engine refused the query or it timed out
    #[error("Query timeout. Please try again. If the problem persists try a smaller date range or fewer projects.")]
    RateLimitExceeded {
        /// Engine or timeout reason, not shown to users
        reason: String,
    },

    /// Engine failed while running the query
    #[error("Internal error. Your query failed to run.")]
    QueryExecution {
        /// Engine reason, not shown to users
        reason: String,
    },

    /// Engine rejected an argument type
    #[error("Invalid query. Argument to function is wrong type.")]
    QueryIllegalTypeOfArgument {
        /// Engine reason, not shown to users
        reason: String,
    },

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for query operations
pub type Result<T> = std::result::Result<T, DiscoverError>;

impl DiscoverError {
    /// Creates a new invalid search query error
    pub fn invalid_search<S: Into<String>>(msg: S) -> Self {
        Self::InvalidSearchQuery(msg.into())
    }

    /// Creates a new invalid function arguments error
    pub fn invalid_function<S: Into<String>>(msg: S) -> Self {
        Self::InvalidFunctionArguments(msg.into())
    }

    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a syntax error pointing at a 1-based character column of `query`.
    ///
    /// The fragment shows up to five characters before and including the
    /// offending position, followed by up to five characters after it.
    pub fn syntax(query: &str, column: usize) -> Self {
        let chars: Vec<char> = query.chars().collect();
        let column = column.clamp(1, chars.len().max(1));
        let start = column.saturating_sub(SYNTAX_CONTEXT_CHARS);
        let end = (column + SYNTAX_CONTEXT_CHARS).min(chars.len());
        let fragment = chars
            .get(start..end)
            .map(|slice| slice.iter().collect())
            .unwrap_or_default();
        Self::SearchSyntax { fragment, column }
    }

    /// HTTP-equivalent status code for the error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::QueryExecution { .. }
            | Self::Config(_)
            | Self::Io(_)
            | Self::Serialization(_) => 500,
            _ => 400,
        }
    }

    /// Returns true if the caller may retry the same request
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. })
    }

    /// Returns true if the error was detected before execution
    pub fn is_validation(&self) -> bool {
        !matches!(
            self,
            Self::RateLimitExceeded { .. }
                | Self::QueryExecution { .. }
                | Self::QueryIllegalTypeOfArgument { .. }
                | Self::Config(_)
                | Self::Io(_)
                | Self::Serialization(_)
        )
    }

    /// Returns the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::UnknownField(_) => "field",
            Self::InvalidFunctionArguments(_) => "function",
            Self::SearchSyntax { .. } | Self::InvalidSearchQuery(_) => "search",
            Self::NoColumnsSelected
            | Self::TooManyFields { .. }
            | Self::InvalidOrderBy { .. } => "query_shape",
            Self::MultipleProjectsDenied | Self::ProjectNotFound(_) => "scope",
            Self::RetentionExceeded => "time_range",
            Self::RateLimitExceeded { .. }
            | Self::QueryExecution { .. }
            | Self::QueryIllegalTypeOfArgument { .. } => "execution",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
        }
    }
}

/// Failure body returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    /// User-facing message
    pub detail: String,
}

impl From<&DiscoverError> for ErrorResponse {
    fn from(err: &DiscoverError) -> Self {
        ErrorResponse {
            detail: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error_fragment() {
        let err = DiscoverError::syntax("hi \n there", 4);
        assert_eq!(
            err.to_string(),
            "Parse error at 'hi \n ther' (column 4). This is commonly caused by unmatched parentheses. Enclose any text in double quotes."
        );
    }

    #[test]
    fn test_syntax_error_near_end() {
        let err = DiscoverError::syntax("a b (", 5);
        match err {
            DiscoverError::SearchSyntax { fragment, column } => {
                assert_eq!(fragment, "a b (");
                assert_eq!(column, 5);
            },
            _ => panic!("Expected syntax error"),
        }
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(DiscoverError::NoColumnsSelected.status_code(), 400);
        assert_eq!(
            DiscoverError::QueryExecution {
                reason: "boom".to_string()
            }
            .status_code(),
            500
        );
        assert_eq!(
            DiscoverError::RateLimitExceeded {
                reason: "slow".to_string()
            }
            .status_code(),
            400
        );
    }

    #[test]
    fn test_error_recoverability() {
        assert!(DiscoverError::RateLimitExceeded {
            reason: "timeout".to_string()
        }
        .is_recoverable());
        assert!(!DiscoverError::RetentionExceeded.is_recoverable());
        assert!(DiscoverError::RetentionExceeded.is_validation());
    }

    #[test]
    fn test_too_many_fields_message() {
        let err = DiscoverError::TooManyFields { max: 20 };
        assert_eq!(
            ErrorResponse::from(&err).detail,
            "You can view up to 20 fields at a time. Please delete some and try again."
        );
    }
}
