//! Crate error type, re-exported as `cakit::CaError`.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Represents errors that can occur while operating the PKI.
///
/// Hard failures abort the pipeline they occur in. Outputs that already exist
/// are not an error: issuance is a no-op success in that case.
#[derive(Debug, Error)]
pub enum CaError {
    /// A distinguished name string is malformed.
    #[error("Invalid distinguished name: {0}")]
    FormatError(String),

    /// A configuration template file does not exist.
    #[error("Configuration template not found: {}", .0.display())]
    TemplateMissingError(PathBuf),

    /// The cryptographic engine reported a failure.
    #[error("Engine command `{command}` failed: {diagnostic}")]
    EngineError { command: String, diagnostic: String },

    /// A caller supplied an out-of-range or unsupported value.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A required file or directory is missing.
    #[error("Precondition failed: {0}")]
    PreconditionError(String),

    /// Filesystem failure.
    #[error("I/O error on {}: {source}", .path.display())]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error during data encoding.
    #[error("Failed to encode data: {0}")]
    EncodingError(String),

    /// Error during data decoding.
    #[error("Failed to decode data: {0}")]
    DecodingError(String),

    /// Error during key generation.
    #[error("Key generation error: {0}")]
    KeyGenerationError(String),

    /// Error from RSA operations.
    #[error("RSA error: {0}")]
    RsaError(String),

    /// Settings could not be read or are inconsistent.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl CaError {
    /// Wraps an I/O error with the path it happened on.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        CaError::IoError {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn engine(command: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        CaError::EngineError {
            command: command.into(),
            diagnostic: diagnostic.into(),
        }
    }
}

impl From<der::Error> for CaError {
    /// Converts a `der::Error` into a `CaError`.
    fn from(err: der::Error) -> Self {
        CaError::DecodingError(err.to_string())
    }
}

impl From<rsa::Error> for CaError {
    fn from(err: rsa::Error) -> Self {
        CaError::RsaError(err.to_string())
    }
}

impl From<rsa::pkcs1::Error> for CaError {
    fn from(err: rsa::pkcs1::Error) -> Self {
        CaError::RsaError(err.to_string())
    }
}

impl From<pkcs8::Error> for CaError {
    fn from(err: pkcs8::Error) -> Self {
        CaError::RsaError(err.to_string())
    }
}

impl From<pkcs8::spki::Error> for CaError {
    fn from(err: pkcs8::spki::Error) -> Self {
        CaError::EncodingError(err.to_string())
    }
}

impl From<pem::PemError> for CaError {
    fn from(err: pem::PemError) -> Self {
        CaError::DecodingError(err.to_string())
    }
}

impl From<toml::de::Error> for CaError {
    fn from(err: toml::de::Error) -> Self {
        CaError::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CaError>;
