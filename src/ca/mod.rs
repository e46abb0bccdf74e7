//! The root certificate authority.
//!
//! A [`CertificateAuthority`] is identified by its root directory. Every path
//! it uses is derived from that directory on demand:
//!
//! ```text
//! <root>/
//!   private/cakey.pem                   CA private key
//!   public/cacert.pem                   CA certificate
//!   public/cacertificate_with_crl.pem   CA certificate followed by the CRL
//!   certs/<SERIAL>.pem                  copies of issued certificates
//!   crl/revocation_list.crl, .der       current CRL
//!   conf/caconfig.cnf                   CA configuration, `.tmp` once materialized
//!   serial  crlnumber  index.txt  index.txt.attr
//! ```
//!
//! Operations against one root directory must not run concurrently: the
//! database files are shared mutable state with no locking of their own.

pub mod database;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bon::Builder;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::cert::params::IssueParams;
use crate::cert::{Certificate, CertificateStatus};
use crate::crl::{RevocationList, RevocationReason};
use crate::engine::{CryptoEngine, DumpKind, EngineCommand, EngineOutput};
use crate::error::{CaError, Result};
use crate::key::KeySize;
use crate::pipeline::{Pipeline, PipelineReport, SoftFailure};
use crate::subject::Subject;
use crate::template::{self, TemplateVars};
use database::{CaDatabase, Index};

/// Subject of the CA certificate.
pub const CA_SUBJECT: &str = "/C=FR/ST=IDF/L=Paris/O=Local PKI Authority/CN=PKI-CA";

/// Lifetime of the CA certificate, in days.
pub const CA_VALIDITY_DAYS: u32 = 3650;

/// Extension section applied to the CA certificate.
const CA_EXTENSIONS: &str = "v3_ca";

/// Result of a revocation. The ledger update and the new CRL are done when
/// this is returned; `soft_failures` lists the advisory steps that did not
/// succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevocationOutcome {
    pub reason: RevocationReason,
    pub soft_failures: Vec<SoftFailure>,
}

impl RevocationOutcome {
    /// Diagnostic of the post-revocation verification, if it failed.
    pub fn verification_failure(&self) -> Option<&str> {
        self.soft_failures
            .iter()
            .find(|failure| failure.step == STEP_VERIFY)
            .map(|failure| failure.diagnostic.as_str())
    }
}

const STEP_VERIFY: &str = "verify certificate";

/// Issues, tracks and revokes certificates.
///
/// ```no_run
/// use std::sync::Arc;
///
/// use cakit::ca::CertificateAuthority;
/// use cakit::cert::params::IssueParams;
/// use cakit::engine::native::NativeEngine;
///
/// # fn main() -> cakit::Result<()> {
/// let ca = CertificateAuthority::builder()
///     .location("/var/lib/pki/CA")
///     .engine(Arc::new(NativeEngine::new()))
///     .build();
/// ca.initialize()?;
///
/// let params = IssueParams::builder()
///     .application_uri("urn:host1:app")
///     .dns(vec!["host1".to_string()])
///     .build();
/// ca.sign_certificate_request("host1.pem".as_ref(), "host1.csr".as_ref(), &params)?;
/// ca.revoke_certificate("host1.pem".as_ref(), Some("superseded"))?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Builder)]
pub struct CertificateAuthority {
    #[builder(into)]
    location: PathBuf,
    #[builder(default = KeySize::Bits2048)]
    key_size: KeySize,
    engine: Arc<dyn CryptoEngine>,
    /// Overwrite existing outputs instead of leaving them alone.
    #[builder(default)]
    force: bool,
}

impl CertificateAuthority {
    pub fn root_dir(&self) -> &Path {
        &self.location
    }

    pub fn key_size(&self) -> KeySize {
        self.key_size
    }

    pub fn engine(&self) -> &Arc<dyn CryptoEngine> {
        &self.engine
    }

    pub fn config_file(&self) -> PathBuf {
        self.location.join("conf").join("caconfig.cnf")
    }

    /// The configuration handed to the engine, rendered from
    /// [`config_file`](Self::config_file) with the current bindings.
    pub fn materialized_config(&self) -> PathBuf {
        self.location.join("conf").join("caconfig.cnf.tmp")
    }

    pub fn private_key(&self) -> PathBuf {
        self.location.join("private").join("cakey.pem")
    }

    pub fn ca_request(&self) -> PathBuf {
        self.location.join("private").join("cakey.csr")
    }

    pub fn ca_certificate(&self) -> PathBuf {
        self.location.join("public").join("cacert.pem")
    }

    pub fn ca_certificate_with_crl(&self) -> PathBuf {
        self.location
            .join("public")
            .join("cacertificate_with_crl.pem")
    }

    pub fn revocation_list(&self) -> PathBuf {
        self.location.join("crl").join("revocation_list.crl")
    }

    pub fn revocation_list_der(&self) -> PathBuf {
        self.location.join("crl").join("revocation_list.der")
    }

    pub fn database(&self) -> CaDatabase {
        CaDatabase::new(&self.location)
    }

    pub fn index(&self) -> Result<Index> {
        self.database().load_index()
    }

    pub fn is_initialized(&self) -> bool {
        self.private_key().exists() && self.ca_certificate().exists()
    }

    /// Creates the CA if its private key does not exist yet.
    ///
    /// Every step leaves existing database files alone, so a bootstrap that
    /// failed half way can simply be run again.
    pub fn initialize(&self) -> Result<PipelineReport> {
        if self.private_key().exists() && !self.force {
            debug!(root = %self.location.display(), "certificate authority already initialized");
            return Ok(PipelineReport::default());
        }
        let version = self.engine.ensure_available()?;
        info!(root = %self.location.display(), engine = %version, "initializing certificate authority");

        let subject = Subject::parse(CA_SUBJECT)?;
        let config = self.materialized_config();
        let request = self.ca_request();

        Pipeline::new("initialize certificate authority")
            .step("create directories", || self.create_directories())
            .step("initialize database", || self.database().initialize())
            .step("write configuration", || self.write_config())
            .step("materialize configuration", || {
                self.materialize(&TemplateVars::new().with(template::ALTNAME, ""))
            })
            .step("generate CA private key", || {
                self.run(EngineCommand::GenerateKey {
                    output: self.private_key(),
                    key_size: self.key_size,
                })
            })
            .step("create CA request", || {
                self.run(EngineCommand::CreateRequest {
                    config: config.clone(),
                    private_key: self.private_key(),
                    subject: Some(subject),
                    output: request.clone(),
                })
            })
            .step("self-sign CA certificate", || {
                self.run(EngineCommand::SelfSign {
                    config: config.clone(),
                    extensions: CA_EXTENSIONS.to_string(),
                    request: request.clone(),
                    signing_key: self.private_key(),
                    days: CA_VALIDITY_DAYS,
                    output: self.ca_certificate(),
                })?;
                remove_file(&request)
            })
            .step("generate CRL", || self.generate_crl())
            .step("export CRL", || self.export_crl())
            .step("bundle CA certificate with CRL", || {
                self.construct_ca_certificate_with_crl().map(drop)
            })
            .run()
    }

    /// Signs the request at `csr` into `output`, appends the CA certificate
    /// to it and returns `output`.
    ///
    /// An existing `output` is left untouched and no serial is consumed,
    /// unless the authority was built with `force`.
    pub fn sign_certificate_request(
        &self,
        output: &Path,
        csr: &Path,
        params: &IssueParams,
    ) -> Result<PathBuf> {
        if output.exists() && !self.force {
            info!(output = %output.display(), "certificate already exists, not signing");
            return Ok(output.to_path_buf());
        }
        let (alt_names, validity) = params.prepare()?;
        if !csr.exists() {
            return Err(CaError::PreconditionError(format!(
                "certificate request {} does not exist",
                csr.display()
            )));
        }
        ensure_output_dir(output)?;
        self.ensure_initialized()?;

        let report = Pipeline::new("sign certificate request")
            .step("materialize configuration", || {
                self.materialize(&TemplateVars::new().with(template::ALTNAME, alt_names.to_string()))
            })
            .step("sign request", || {
                self.run(EngineCommand::SignRequest {
                    config: self.materialized_config(),
                    request: csr.to_path_buf(),
                    output: output.to_path_buf(),
                    validity,
                    selfsign_key: None,
                })
            })
            .soft_step("check certificate", || self.log_fingerprint(output))
            .step("bundle CA certificate with CRL", || {
                self.construct_ca_certificate_with_crl().map(drop)
            })
            .step("construct certificate chain", || {
                self.construct_certificate_chain(output)
            })
            .soft_step(STEP_VERIFY, || {
                self.run(EngineCommand::Verify {
                    certificate: output.to_path_buf(),
                    ca_file: self.ca_certificate_with_crl(),
                    crl_file: None,
                    crl_check: false,
                })
            })
            .run()?;
        debug!(soft_failures = report.soft_failures.len(), "signing done");
        Ok(output.to_path_buf())
    }

    /// Issues a certificate for `private_key` signed by that same key, going
    /// through the CA database so the serial is allocated and recorded.
    ///
    /// The intermediate request `<output>_csr` is removed whatever happens.
    pub fn create_self_signed_certificate(
        &self,
        output: &Path,
        private_key: &Path,
        params: &IssueParams,
    ) -> Result<PathBuf> {
        if output.exists() && !self.force {
            info!(output = %output.display(), "certificate already exists, not signing");
            return Ok(output.to_path_buf());
        }
        let (alt_names, validity) = params.prepare()?;
        if !private_key.exists() {
            return Err(CaError::PreconditionError(format!(
                "private key {} does not exist",
                private_key.display()
            )));
        }
        ensure_output_dir(output)?;
        self.ensure_initialized()?;

        let request = request_path(output);
        let result = Pipeline::new("create self-signed certificate")
            .step("materialize configuration", || {
                self.materialize(&TemplateVars::new().with(template::ALTNAME, alt_names.to_string()))
            })
            .step("create request", || {
                self.run(EngineCommand::CreateRequest {
                    config: self.materialized_config(),
                    private_key: private_key.to_path_buf(),
                    subject: params.subject.clone(),
                    output: request.clone(),
                })
            })
            .step("self-sign request", || {
                self.run(EngineCommand::SignRequest {
                    config: self.materialized_config(),
                    request: request.clone(),
                    output: output.to_path_buf(),
                    validity,
                    selfsign_key: Some(private_key.to_path_buf()),
                })
            })
            .soft_step("check certificate", || self.log_fingerprint(output))
            .soft_step(STEP_VERIFY, || {
                self.run(EngineCommand::Verify {
                    certificate: output.to_path_buf(),
                    ca_file: output.to_path_buf(),
                    crl_file: None,
                    crl_check: false,
                })
            })
            .run();
        let cleanup = remove_file(&request);
        result?;
        cleanup?;
        Ok(output.to_path_buf())
    }

    /// Revokes the certificate at `certificate` and publishes a new CRL.
    ///
    /// `reason` defaults to `keyCompromise`. Marking the ledger and the
    /// verification against the new CRL are advisory: their failures are
    /// returned in the outcome. Regenerating the CRL is not.
    pub fn revoke_certificate(
        &self,
        certificate: &Path,
        reason: Option<&str>,
    ) -> Result<RevocationOutcome> {
        let reason = match reason {
            Some(reason) => reason.parse::<RevocationReason>()?,
            None => RevocationReason::default(),
        };
        if !certificate.exists() {
            return Err(CaError::PreconditionError(format!(
                "certificate {} does not exist",
                certificate.display()
            )));
        }
        self.ensure_initialized()?;
        info!(certificate = %certificate.display(), %reason, "revoking certificate");

        let report = Pipeline::new("revoke certificate")
            .step("materialize configuration", || {
                self.materialize(&TemplateVars::new().with(template::ALTNAME, ""))
            })
            .soft_step("revoke", || {
                self.run(EngineCommand::Revoke {
                    config: self.materialized_config(),
                    certificate: certificate.to_path_buf(),
                    reason,
                })
            })
            .step("generate CRL", || self.generate_crl())
            .soft_step("dump CRL", || {
                let output = self.engine.execute(&EngineCommand::Dump {
                    input: self.revocation_list(),
                    kind: DumpKind::Crl,
                })?;
                debug!("{}", output.stdout.trim_end());
                Ok(())
            })
            .step("export CRL", || self.export_crl())
            .step("bundle CA certificate with CRL", || {
                self.construct_ca_certificate_with_crl().map(drop)
            })
            .soft_step(STEP_VERIFY, || {
                self.run(EngineCommand::Verify {
                    certificate: certificate.to_path_buf(),
                    ca_file: self.ca_certificate_with_crl(),
                    crl_file: None,
                    crl_check: true,
                })
            })
            .run()?;
        Ok(RevocationOutcome {
            reason,
            soft_failures: report.soft_failures,
        })
    }

    /// Writes the CA certificate followed by the current CRL (when there is
    /// one) to [`ca_certificate_with_crl`](Self::ca_certificate_with_crl).
    pub fn construct_ca_certificate_with_crl(&self) -> Result<PathBuf> {
        let mut bundle = read_text(&self.ca_certificate())?;
        let crl = self.revocation_list();
        if crl.exists() {
            append_block(&mut bundle, &read_text(&crl)?);
        }
        let output = self.ca_certificate_with_crl();
        fs::write(&output, bundle).map_err(|e| CaError::io(&output, e))?;
        Ok(output)
    }

    /// Appends the CA certificate to the certificate file at `certificate`.
    /// Running it twice on the same file appends the CA certificate twice.
    pub fn construct_certificate_chain(&self, certificate: &Path) -> Result<()> {
        let mut chain = read_text(certificate)?;
        append_block(&mut chain, &read_text(&self.ca_certificate())?);
        fs::write(certificate, chain).map_err(|e| CaError::io(certificate, e))
    }

    /// Verifies `certificate` against the CA and its current CRL. Never
    /// fails: the outcome is in the returned output.
    pub fn verify_certificate(&self, certificate: &Path) -> EngineOutput {
        self.engine.execute_no_failure(&EngineCommand::Verify {
            certificate: certificate.to_path_buf(),
            ca_file: self.ca_certificate_with_crl(),
            crl_file: None,
            crl_check: true,
        })
    }

    /// Number embedded in the current CRL.
    pub fn current_crl_number(&self) -> Result<Option<u64>> {
        Ok(RevocationList::load(&self.revocation_list())?.number())
    }

    /// Status of a certificate issued by this CA, as of now.
    pub fn certificate_status(&self, certificate: &Path) -> Result<CertificateStatus> {
        let certificate = Certificate::load(certificate)?;
        Ok(certificate.status(&self.index()?, OffsetDateTime::now_utc()))
    }

    /// Text dump of the current CRL.
    pub fn dump_crl(&self) -> Result<String> {
        let output = self.engine.execute(&EngineCommand::Dump {
            input: self.revocation_list(),
            kind: DumpKind::Crl,
        })?;
        Ok(output.stdout)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(CaError::PreconditionError(format!(
                "certificate authority at {} is not initialized",
                self.location.display()
            )))
        }
    }

    fn create_directories(&self) -> Result<()> {
        for dir in ["private", "public", "certs", "crl", "conf"] {
            let path = self.location.join(dir);
            fs::create_dir_all(&path).map_err(|e| CaError::io(&path, e))?;
        }
        Ok(())
    }

    /// Renders the built-in template for this root. `$ENV::ALTNAME` is kept
    /// for later materialization.
    fn write_config(&self) -> Result<()> {
        let vars = TemplateVars::new().with(
            template::ROOT_FOLDER,
            self.location.to_string_lossy().replace('\\', "/"),
        );
        let text = template::render(template::CA_CONFIG_TEMPLATE, &vars)?;
        let path = self.config_file();
        fs::write(&path, text).map_err(|e| CaError::io(&path, e))
    }

    fn materialize(&self, vars: &TemplateVars) -> Result<()> {
        template::materialize(&self.config_file(), vars).map(drop)
    }

    fn run(&self, command: EngineCommand) -> Result<()> {
        self.engine.execute(&command).map(drop)
    }

    fn generate_crl(&self) -> Result<()> {
        self.run(EngineCommand::GenerateCrl {
            config: self.materialized_config(),
            output: self.revocation_list(),
        })
    }

    fn export_crl(&self) -> Result<()> {
        self.run(EngineCommand::CrlToDer {
            input: self.revocation_list(),
            output: self.revocation_list_der(),
        })
    }

    fn log_fingerprint(&self, certificate: &Path) -> Result<()> {
        let output = self.engine.execute(&EngineCommand::Fingerprint {
            certificate: certificate.to_path_buf(),
        })?;
        for line in output.stdout.lines() {
            info!(certificate = %certificate.display(), "{line}");
        }
        Ok(())
    }
}

/// `<output>_csr`, the request created on the way to `output`.
pub(crate) fn request_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push("_csr");
    PathBuf::from(name)
}

/// Fails unless the directory `output` goes into exists.
pub(crate) fn ensure_output_dir(output: &Path) -> Result<()> {
    match output.parent() {
        Some(dir) if !dir.as_os_str().is_empty() && !dir.is_dir() => {
            Err(CaError::PreconditionError(format!(
                "output directory {} does not exist",
                dir.display()
            )))
        }
        _ => Ok(()),
    }
}

pub(crate) fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CaError::io(path, e)),
    }
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| CaError::io(path, e))
}

fn append_block(text: &mut String, block: &str) {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(block);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::native::NativeEngine;

    fn authority(root: &Path) -> CertificateAuthority {
        CertificateAuthority::builder()
            .location(root)
            .key_size(KeySize::Bits1024)
            .engine(Arc::new(NativeEngine::new()))
            .build()
    }

    #[test]
    fn test_paths_derive_from_root() {
        let ca = authority(Path::new("/pki/CA"));
        assert_eq!(ca.private_key(), Path::new("/pki/CA/private/cakey.pem"));
        assert_eq!(ca.ca_certificate(), Path::new("/pki/CA/public/cacert.pem"));
        assert_eq!(
            ca.materialized_config(),
            Path::new("/pki/CA/conf/caconfig.cnf.tmp")
        );
        assert_eq!(
            ca.database().index_attr_path(),
            Path::new("/pki/CA/index.txt.attr")
        );
        assert_eq!(
            request_path(Path::new("/out/cert.pem")),
            Path::new("/out/cert.pem_csr")
        );
    }

    #[test]
    fn test_operations_require_initialized_authority() {
        let dir = tempfile::tempdir().unwrap();
        let ca = authority(dir.path());
        let csr = dir.path().join("req.csr");
        fs::write(&csr, "").unwrap();
        let params = IssueParams::builder().application_uri("urn:x").build();
        let err = ca
            .sign_certificate_request(&dir.path().join("out.pem"), &csr, &params)
            .unwrap_err();
        assert!(matches!(err, CaError::PreconditionError(_)));
    }

    #[test]
    fn test_output_directory_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ensure_output_dir(&dir.path().join("cert.pem")).is_ok());
        assert!(ensure_output_dir(Path::new("cert.pem")).is_ok());
        assert!(matches!(
            ensure_output_dir(&dir.path().join("missing").join("cert.pem")),
            Err(CaError::PreconditionError(_))
        ));
    }

    #[test]
    fn test_append_block_separates_blocks() {
        let mut text = "-----END CERTIFICATE-----".to_string();
        append_block(&mut text, "-----BEGIN X509 CRL-----\n");
        assert_eq!(
            text,
            "-----END CERTIFICATE-----\n-----BEGIN X509 CRL-----\n"
        );
    }

    #[test]
    fn test_remove_missing_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        assert!(remove_file(&dir.path().join("absent")).is_ok());
    }
}
