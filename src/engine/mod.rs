//! Adapter toward the cryptographic engine.
//!
//! Every operation the PKI needs is one variant of [`EngineCommand`]. An
//! engine runs a command to completion, writes its output files and returns
//! the captured diagnostic text. Two engines are provided:
//!
//! * [`openssl::OpensslEngine`] drives the `openssl` command line tool.
//! * [`native::NativeEngine`] runs the same commands in process and keeps the
//!   CA database in the same on-disk format.

pub mod native;
pub mod openssl;
pub mod profile;

use std::fmt;
use std::path::PathBuf;

use time::OffsetDateTime;
use tracing::warn;

use crate::ca::database::compact_time;
use crate::cert::params::Validity;
use crate::crl::RevocationReason;
use crate::error::{CaError, Result};
use crate::key::KeySize;
use crate::subject::Subject;

/// Date encoding used on engine command lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateFormat {
    /// `YYYYMMDDHHMMSSZ`
    #[default]
    FourDigitYear,
    /// `YYMMDDHHMMSSZ`, for legacy engines.
    TwoDigitYear,
}

impl DateFormat {
    pub fn format(self, at: OffsetDateTime) -> String {
        compact_time(at, self == DateFormat::FourDigitYear)
    }
}

/// What a dump command prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpKind {
    Certificate,
    Crl,
}

/// One engine operation. Paths are used as given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    /// Writes a new RSA private key in PEM form.
    GenerateKey { output: PathBuf, key_size: KeySize },
    /// Writes the public half of a private key in PEM form.
    DerivePublicKey { private_key: PathBuf, output: PathBuf },
    /// Writes a PEM request signed by `private_key`. Without an explicit
    /// subject, the `[ req ]` distinguished name of `config` is used.
    CreateRequest {
        config: PathBuf,
        private_key: PathBuf,
        subject: Option<Subject>,
        output: PathBuf,
    },
    /// Signs a request with the CA described by `config`, allocating the next
    /// serial and recording it in the CA database. With `selfsign_key`, the
    /// request is signed by that key instead of the CA key.
    SignRequest {
        config: PathBuf,
        request: PathBuf,
        output: PathBuf,
        validity: Validity,
        selfsign_key: Option<PathBuf>,
    },
    /// Signs a request with its own key, outside any CA database, applying
    /// the `extensions` section of `config`.
    SelfSign {
        config: PathBuf,
        extensions: String,
        request: PathBuf,
        signing_key: PathBuf,
        days: u32,
        output: PathBuf,
    },
    /// Marks a certificate revoked in the CA database.
    Revoke {
        config: PathBuf,
        certificate: PathBuf,
        reason: RevocationReason,
    },
    /// Writes a PEM CRL for the CA described by `config`, consuming the next
    /// CRL number.
    GenerateCrl { config: PathBuf, output: PathBuf },
    CrlToDer { input: PathBuf, output: PathBuf },
    /// Verifies a certificate against the certificates in `ca_file`. With
    /// `crl_check`, the issuer's CRL (from `ca_file` or `crl_file`) must not
    /// list the certificate.
    Verify {
        certificate: PathBuf,
        ca_file: PathBuf,
        crl_file: Option<PathBuf>,
        crl_check: bool,
    },
    Dump { input: PathBuf, kind: DumpKind },
    /// Prints the validity dates and the SHA-1 fingerprint of a certificate.
    Fingerprint { certificate: PathBuf },
    CertificateToDer { input: PathBuf, output: PathBuf },
    Version,
}

impl EngineCommand {
    /// Short name of the operation, as used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            EngineCommand::GenerateKey { .. } => "genrsa",
            EngineCommand::DerivePublicKey { .. } => "rsa -pubout",
            EngineCommand::CreateRequest { .. } => "req -new",
            EngineCommand::SignRequest { .. } => "ca",
            EngineCommand::SelfSign { .. } => "x509 -req",
            EngineCommand::Revoke { .. } => "ca -revoke",
            EngineCommand::GenerateCrl { .. } => "ca -gencrl",
            EngineCommand::CrlToDer { .. } => "crl -outform der",
            EngineCommand::Verify { .. } => "verify",
            EngineCommand::Dump {
                kind: DumpKind::Certificate,
                ..
            } => "x509 -text",
            EngineCommand::Dump {
                kind: DumpKind::Crl, ..
            } => "crl -text",
            EngineCommand::Fingerprint { .. } => "x509 -fingerprint",
            EngineCommand::CertificateToDer { .. } => "x509 -outform der",
            EngineCommand::Version => "version",
        }
    }
}

impl fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Captured result of an engine command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl EngineOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(diagnostic: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: diagnostic.into(),
        }
    }

    /// Everything the engine printed.
    pub fn diagnostic(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            (out, "") => out.to_string(),
            ("", err) => err.to_string(),
            (out, err) => format!("{out}\n{err}"),
        }
    }

    /// Turns a failed output into an [`CaError::EngineError`].
    pub fn check(self, command: &EngineCommand) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(CaError::engine(command.name(), self.diagnostic()))
        }
    }
}

/// A cryptographic engine.
pub trait CryptoEngine: fmt::Debug + Send + Sync {
    /// Checks that the engine can run and returns its version string.
    fn ensure_available(&self) -> Result<String>;

    /// Runs a command. A command that does not succeed is an
    /// [`CaError::EngineError`] carrying the engine's diagnostic text.
    fn execute(&self, command: &EngineCommand) -> Result<EngineOutput>;

    /// Runs a command whose failure must not abort the caller. The failure is
    /// logged and reported through the returned output.
    fn execute_no_failure(&self, command: &EngineCommand) -> EngineOutput {
        match self.execute(command) {
            Ok(output) => output,
            Err(err) => {
                warn!(command = command.name(), error = %err, "engine command failed, continuing");
                EngineOutput::failed(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_date_formats() {
        let at = datetime!(2024-03-05 07:08:09 UTC);
        assert_eq!(DateFormat::FourDigitYear.format(at), "20240305070809Z");
        assert_eq!(DateFormat::TwoDigitYear.format(at), "240305070809Z");
    }

    #[test]
    fn test_output_check() {
        let command = EngineCommand::Version;
        assert!(EngineOutput::ok("v1").check(&command).is_ok());
        let err = EngineOutput::failed("boom").check(&command).unwrap_err();
        match err {
            CaError::EngineError {
                command,
                diagnostic,
            } => {
                assert_eq!(command, "version");
                assert_eq!(diagnostic, "boom");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[derive(Debug)]
    struct FailingEngine;

    impl CryptoEngine for FailingEngine {
        fn ensure_available(&self) -> Result<String> {
            Ok("failing".to_string())
        }

        fn execute(&self, command: &EngineCommand) -> Result<EngineOutput> {
            Err(CaError::engine(command.name(), "unable to load certificate"))
        }
    }

    #[test]
    fn test_execute_no_failure_reports_instead_of_failing() {
        let output = FailingEngine.execute_no_failure(&EngineCommand::Version);
        assert!(!output.success);
        assert!(output.diagnostic().contains("unable to load certificate"));
    }
}
