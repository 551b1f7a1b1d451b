//! Hardware status codes and error handling.
//!
//! The programming primitives report an `AsicStatus` on failure; callers get
//! `AsicResult` values the table code can propagate with `?`.

use std::fmt;
use thiserror::Error;

/// Status codes returned by the L3 programming primitives.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AsicStatus {
    Success = 0,
    Internal = -1,
    NoMemory = -2,
    BadUnit = -3,
    InvalidParameter = -4,
    Empty = -5,
    TableFull = -6,
    NotFound = -7,
    Exists = -8,
    Timeout = -9,
    Busy = -10,
    Failure = -11,
    Disabled = -12,
    BadId = -13,
    Resource = -14,
    Config = -15,
    Unavailable = -16,
}

impl fmt::Display for AsicStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AsicStatus::Success => "E_NONE",
            AsicStatus::Internal => "E_INTERNAL",
            AsicStatus::NoMemory => "E_MEMORY",
            AsicStatus::BadUnit => "E_UNIT",
            AsicStatus::InvalidParameter => "E_PARAM",
            AsicStatus::Empty => "E_EMPTY",
            AsicStatus::TableFull => "E_FULL",
            AsicStatus::NotFound => "E_NOT_FOUND",
            AsicStatus::Exists => "E_EXISTS",
            AsicStatus::Timeout => "E_TIMEOUT",
            AsicStatus::Busy => "E_BUSY",
            AsicStatus::Failure => "E_FAIL",
            AsicStatus::Disabled => "E_DISABLED",
            AsicStatus::BadId => "E_BADID",
            AsicStatus::Resource => "E_RESOURCE",
            AsicStatus::Config => "E_CONFIG",
            AsicStatus::Unavailable => "E_UNAVAIL",
        };
        write!(f, "{}", s)
    }
}

/// Error type for hardware programming calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AsicError {
    /// The primitive returned a non-success status.
    #[error("hardware call failed: {status}")]
    Status { status: AsicStatus },

    #[error("entry not found: {item}")]
    NotFound { item: String },

    #[error("entry already exists: {item}")]
    AlreadyExists { item: String },

    #[error("table full: {table}")]
    TableFull { table: String },

    #[error("invalid parameter: {message}")]
    InvalidParameter { message: String },
}

impl AsicError {
    pub fn from_status(status: AsicStatus) -> Self {
        match status {
            AsicStatus::NotFound => AsicError::NotFound {
                item: "unknown".to_string(),
            },
            AsicStatus::Exists => AsicError::AlreadyExists {
                item: "unknown".to_string(),
            },
            AsicStatus::TableFull => AsicError::TableFull {
                table: "unknown".to_string(),
            },
            AsicStatus::InvalidParameter | AsicStatus::BadId => AsicError::InvalidParameter {
                message: format!("hardware returned {}", status),
            },
            _ => AsicError::Status { status },
        }
    }

    pub fn not_found(item: impl Into<String>) -> Self {
        AsicError::NotFound { item: item.into() }
    }

    pub fn already_exists(item: impl Into<String>) -> Self {
        AsicError::AlreadyExists { item: item.into() }
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        AsicError::InvalidParameter {
            message: message.into(),
        }
    }

    /// Returns the raw status if this error carries one.
    pub fn status(&self) -> Option<AsicStatus> {
        match self {
            AsicError::Status { status } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for hardware programming calls.
pub type AsicResult<T> = Result<T, AsicError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_status() {
        assert!(matches!(
            AsicError::from_status(AsicStatus::TableFull),
            AsicError::TableFull { .. }
        ));
        assert!(matches!(
            AsicError::from_status(AsicStatus::BadId),
            AsicError::InvalidParameter { .. }
        ));
        assert_eq!(
            AsicError::from_status(AsicStatus::Busy).status(),
            Some(AsicStatus::Busy)
        );
    }
}
