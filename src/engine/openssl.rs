//! Engine driving the `openssl` command line tool.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info};

use super::{CryptoEngine, DateFormat, DumpKind, EngineCommand, EngineOutput};
use crate::error::{CaError, Result};

/// Environment variable naming the `openssl` binary to use.
pub const OPENSSL_PATH_ENV: &str = "OPENSSL_PATH";

/// Runs every command as an `openssl` subprocess. The engine configuration
/// of a command is passed with `-config`/`-extfile` and as `OPENSSL_CONF`.
#[derive(Debug)]
pub struct OpensslEngine {
    program: PathBuf,
    version: OnceLock<String>,
}

impl OpensslEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            version: OnceLock::new(),
        }
    }

    /// Picks the binary from `configured`, then `$OPENSSL_PATH`, then `PATH`.
    pub fn locate(configured: Option<&Path>) -> Self {
        let program = configured
            .map(Path::to_path_buf)
            .or_else(|| env::var_os(OPENSSL_PATH_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("openssl"));
        Self::new(program)
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Legacy `OpenSSL 0.9.x` releases only accept two-digit years.
    pub fn date_format(&self) -> Result<DateFormat> {
        let version = self.ensure_available()?;
        Ok(date_format_for(&version))
    }

    /// Builds the process invocation for a command without running it.
    pub fn command_line(&self, command: &EngineCommand) -> Result<Command> {
        let mut cmd = Command::new(&self.program);
        match command {
            EngineCommand::GenerateKey { output, key_size } => {
                cmd.arg("genrsa")
                    .arg("-out")
                    .arg(output)
                    .arg(key_size.bits().to_string());
            }
            EngineCommand::DerivePublicKey {
                private_key,
                output,
            } => {
                cmd.args(["rsa", "-pubout", "-in"])
                    .arg(private_key)
                    .arg("-out")
                    .arg(output);
            }
            EngineCommand::CreateRequest {
                config,
                private_key,
                subject,
                output,
            } => {
                cmd.args(["req", "-new", "-sha256", "-batch", "-config"])
                    .arg(config)
                    .arg("-key")
                    .arg(private_key)
                    .arg("-out")
                    .arg(output)
                    .env("OPENSSL_CONF", config);
                if let Some(subject) = subject.as_ref().filter(|s| !s.is_empty()) {
                    cmd.arg("-subj").arg(subject.to_string());
                }
            }
            EngineCommand::SignRequest {
                config,
                request,
                output,
                validity,
                selfsign_key,
            } => {
                let dates = self.date_format()?;
                cmd.args(["ca", "-config"])
                    .arg(config)
                    .arg("-startdate")
                    .arg(dates.format(validity.not_before))
                    .arg("-enddate")
                    .arg(dates.format(validity.not_after))
                    .args(["-batch", "-notext", "-out"])
                    .arg(output)
                    .arg("-in")
                    .arg(request)
                    .env("OPENSSL_CONF", config);
                if let Some(key) = selfsign_key {
                    cmd.args(["-selfsign", "-keyfile"]).arg(key);
                }
            }
            EngineCommand::SelfSign {
                config,
                extensions,
                request,
                signing_key,
                days,
                output,
            } => {
                cmd.args(["x509", "-req", "-sha256", "-days"])
                    .arg(days.to_string())
                    .arg("-extensions")
                    .arg(extensions)
                    .arg("-extfile")
                    .arg(config)
                    .arg("-in")
                    .arg(request)
                    .arg("-signkey")
                    .arg(signing_key)
                    .arg("-out")
                    .arg(output);
            }
            EngineCommand::Revoke {
                config,
                certificate,
                reason,
            } => {
                cmd.args(["ca", "-config"])
                    .arg(config)
                    .arg("-revoke")
                    .arg(certificate)
                    .arg("-crl_reason")
                    .arg(reason.as_str())
                    .env("OPENSSL_CONF", config);
            }
            EngineCommand::GenerateCrl { config, output } => {
                cmd.args(["ca", "-gencrl", "-config"])
                    .arg(config)
                    .arg("-out")
                    .arg(output)
                    .env("OPENSSL_CONF", config);
            }
            EngineCommand::CrlToDer { input, output } => {
                cmd.args(["crl", "-in"])
                    .arg(input)
                    .arg("-out")
                    .arg(output)
                    .args(["-outform", "der"]);
            }
            EngineCommand::Verify {
                certificate,
                ca_file,
                crl_file,
                crl_check,
            } => {
                cmd.args(["verify", "-verbose", "-CAfile"]).arg(ca_file);
                if let Some(crl) = crl_file {
                    cmd.arg("-CRLfile").arg(crl);
                }
                if *crl_check {
                    cmd.arg("-crl_check");
                }
                cmd.arg(certificate);
            }
            EngineCommand::Dump { input, kind } => {
                let tool = match kind {
                    DumpKind::Certificate => "x509",
                    DumpKind::Crl => "crl",
                };
                cmd.args([tool, "-in"]).arg(input).args(["-text", "-noout"]);
            }
            EngineCommand::Fingerprint { certificate } => {
                cmd.args(["x509", "-in"])
                    .arg(certificate)
                    .args(["-noout", "-dates", "-fingerprint"]);
            }
            EngineCommand::CertificateToDer { input, output } => {
                cmd.args(["x509", "-outform", "der", "-in"])
                    .arg(input)
                    .arg("-out")
                    .arg(output);
            }
            EngineCommand::Version => {
                cmd.arg("version");
            }
        }
        Ok(cmd)
    }

    fn run(&self, name: &str, mut cmd: Command) -> Result<EngineOutput> {
        debug!(command = ?cmd, "openssl");
        let output = cmd.output().map_err(|e| {
            CaError::engine(
                name,
                format!("cannot run {}: {e}", self.program.display()),
            )
        })?;
        let result = EngineOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if result.success {
            Ok(result)
        } else {
            Err(CaError::engine(name, result.diagnostic()))
        }
    }
}

impl Default for OpensslEngine {
    fn default() -> Self {
        Self::locate(None)
    }
}

fn date_format_for(version: &str) -> DateFormat {
    let legacy = Regex::new(r"^OpenSSL 0\.9").map(|re| re.is_match(version));
    if matches!(legacy, Ok(true)) {
        DateFormat::TwoDigitYear
    } else {
        DateFormat::FourDigitYear
    }
}

impl CryptoEngine for OpensslEngine {
    fn ensure_available(&self) -> Result<String> {
        if let Some(version) = self.version.get() {
            return Ok(version.clone());
        }
        let command = EngineCommand::Version;
        let output = self.run(command.name(), self.command_line(&command)?)?;
        let version = output.stdout.trim().to_string();
        info!(program = %self.program.display(), %version, "OpenSSL found");
        Ok(self.version.get_or_init(|| version).clone())
    }

    fn execute(&self, command: &EngineCommand) -> Result<EngineOutput> {
        let cmd = self.command_line(command)?;
        self.run(command.name(), cmd)
    }
}
