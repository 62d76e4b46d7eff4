//! Error types for certica.
//!
//! Every store operation returns [`Result`], whose error side is the closed
//! taxonomy below. Callers that only care about the category match on
//! [`CerticaError::kind`].

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, CerticaError>;

/// Category of a [`CerticaError`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AlreadyExists,
    NotFound,
    InvalidInput,
    ExternalToolFailure,
    PermissionDenied,
    UnsupportedPlatform,
    VerificationFailed,
    Io,
    Config,
}

/// Main error type for CA, certificate and trust-store operations
#[derive(thiserror::Error, Debug)]
pub enum CerticaError {
    /// An entity with the same name is already present
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A named entity is absent where its presence was required
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed SAN entry, non-positive numeric parameter or bad name
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The cryptographic toolkit or a trust-update command failed
    #[error("{tool} failed{}: {message}", .status.map(|c| format!(" (exit status {c})")).unwrap_or_default())]
    ExternalToolFailure {
        tool: String,
        status: Option<i32>,
        message: String,
    },

    /// Filesystem or privilege-elevation failure during trust-store operations
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The host OS or distribution has no known trust-store layout
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// Files are in the desired state but trust could not be confirmed
    #[error("verification failed: {0}")]
    VerificationFailed(String),

    /// Unrecoverable I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration or template file could not be parsed
    #[error("configuration error: {0}")]
    Config(String),
}

impl CerticaError {
    pub fn already_exists<S: Into<String>>(message: S) -> Self {
        Self::AlreadyExists(message.into())
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::NotFound(message.into())
    }

    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn permission_denied<S: Into<String>>(message: S) -> Self {
        Self::PermissionDenied(message.into())
    }

    pub fn unsupported_platform<S: Into<String>>(message: S) -> Self {
        Self::UnsupportedPlatform(message.into())
    }

    pub fn verification_failed<S: Into<String>>(message: S) -> Self {
        Self::VerificationFailed(message.into())
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Failure of an external tool, with an optional process exit status
    pub fn tool<T: Into<String>, M: Into<String>>(tool: T, status: Option<i32>, message: M) -> Self {
        Self::ExternalToolFailure {
            tool: tool.into(),
            status,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::ExternalToolFailure { .. } => ErrorKind::ExternalToolFailure,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::UnsupportedPlatform(_) => ErrorKind::UnsupportedPlatform,
            Self::VerificationFailed(_) => ErrorKind::VerificationFailed,
            Self::Io(_) => ErrorKind::Io,
            Self::Config(_) => ErrorKind::Config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_failure_display_includes_status() {
        let err = CerticaError::tool("update-ca-trust", Some(2), "bundle locked");
        assert_eq!(err.to_string(), "update-ca-trust failed (exit status 2): bundle locked");
        assert_eq!(err.kind(), ErrorKind::ExternalToolFailure);
    }

    #[test]
    fn test_tool_failure_without_status() {
        let err = CerticaError::tool("openssl", None, "bad key size");
        assert_eq!(err.to_string(), "openssl failed: bad key size");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: CerticaError = io.into();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
