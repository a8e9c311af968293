//! Error types for directory mapping operations.
//!
//! Every failure surfaced by the DN algebra, the entry lifecycle, the directory registry and the
//! directory-access layer is one variant of [`Error`]. Validation variants are always raised
//! before any directory I/O; [`Error::DirectoryOperation`] and [`Error::PartialMove`] are the
//! only kinds that may follow an external mutation.

use thiserror::Error;

/// LDAP result code reported when the target entry does not exist.
pub const NO_SUCH_OBJECT: u32 = 32;

/// Main error type for directory mapping operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Text does not parse as a distinguished name or relative distinguished name.
    #[error("Malformed distinguished name: {0}")]
    MalformedDn(String),

    /// A location's leading component names a different attribute than the schema's naming
    /// attribute.
    #[error("Naming attribute mismatch: expected `{expected}`, found `{found}`")]
    NamingAttributeMismatch {
        /// Naming attribute fixed by the schema type
        expected: String,
        /// Attribute named by the supplied location
        found: String,
    },

    /// Attempt to overwrite an immutable naming value.
    #[error("Naming value already set: {0}")]
    NamingValueAlreadySet(String),

    /// A location was requested before a naming value exists.
    #[error("Naming value missing for naming attribute `{0}`")]
    NamingValueMissing(String),

    /// The operation requires a directory and none is set.
    #[error("No directory set")]
    NoDirectory,

    /// A directory name is not registered.
    #[error("Directory not found: {0}")]
    DirectoryNotFound(String),

    /// The operation is not allowed in the entry's current lifecycle state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A supplied location is empty or otherwise unusable.
    #[error("Invalid location: {0}")]
    InvalidLocation(String),

    /// The directory-access layer reported a failure.
    #[error("Directory operation `{operation}` failed: {message}")]
    DirectoryOperation {
        /// Directory operation that failed (e.g. `add`, `modify`, `bind`)
        operation: String,
        /// Protocol result code, when the server returned one
        result_code: Option<u32>,
        /// Error message
        message: String,
    },

    /// A move flushed pending attribute changes but the rename step failed.
    #[error("Move partially applied, attribute changes were saved but rename failed: {0}")]
    PartialMove(String),

    /// A fetched record could not be mapped onto the schema type.
    #[error("Attribute mapping failed: {0}")]
    Mapping(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Specialized result type for directory mapping operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Builds a [`Error::DirectoryOperation`] without a protocol result code.
    #[must_use]
    pub fn directory(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DirectoryOperation {
            operation: operation.into(),
            result_code: None,
            message: message.into(),
        }
    }

    /// Returns the error code for this error type.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MalformedDn(_) => "MALFORMED_DN",
            Self::NamingAttributeMismatch { .. } => "NAMING_ATTRIBUTE_MISMATCH",
            Self::NamingValueAlreadySet(_) => "NAMING_VALUE_ALREADY_SET",
            Self::NamingValueMissing(_) => "NAMING_VALUE_MISSING",
            Self::NoDirectory => "NO_DIRECTORY",
            Self::DirectoryNotFound(_) => "DIRECTORY_NOT_FOUND",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::InvalidLocation(_) => "INVALID_LOCATION",
            Self::DirectoryOperation { .. } => "DIRECTORY_OPERATION",
            Self::PartialMove(_) => "PARTIAL_MOVE",
            Self::Mapping(_) => "MAPPING",
            Self::ConfigError(_) => "CONFIG_ERROR",
        }
    }

    /// Returns true if this error should be logged as a serious error.
    #[must_use]
    pub const fn should_log(&self) -> bool {
        matches!(
            self,
            Self::DirectoryOperation { .. } | Self::PartialMove(_) | Self::ConfigError(_)
        )
    }

    /// Returns true if the directory reported that the target entry does not exist.
    #[must_use]
    pub fn is_no_such_object(&self) -> bool {
        matches!(
            self,
            Self::DirectoryOperation {
                result_code: Some(NO_SUCH_OBJECT),
                ..
            }
        )
    }
}

// Conversions from external error types
impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::ConfigError(format!("invalid directory URL: {err}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::ConfigError(format!("invalid settings document: {err}"))
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::ConfigError(err.to_string())
    }
}
