//! End-entity identity management.
//!
//! A [`CertificateManager`] owns one key pair under its PKI directory and
//! uses it to create requests and certificates:
//!
//! ```text
//! <pki>/
//!   own/openssl.cnf                  request configuration
//!   own/private/private_key.pem      own private key
//!   own/certs/                       own certificates
//!   trusted/  rejected/
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bon::Builder;
use tracing::{debug, info};

use crate::ca::{self, CertificateAuthority};
use crate::cert::params::IssueParams;
use crate::engine::{CryptoEngine, DumpKind, EngineCommand};
use crate::error::{CaError, Result};
use crate::key::KeySize;
use crate::pipeline::{Pipeline, PipelineReport};
use crate::template::{self, TemplateVars};

/// Extension section of the manager configuration used for self-signed
/// certificates.
const SELF_SIGNED_EXTENSIONS: &str = "v3_selfsigned";

#[derive(Debug, Clone, Builder)]
pub struct CertificateManager {
    #[builder(into)]
    location: PathBuf,
    #[builder(default = KeySize::Bits2048)]
    key_size: KeySize,
    engine: Arc<dyn CryptoEngine>,
    #[builder(default)]
    force: bool,
}

impl CertificateManager {
    pub fn root_dir(&self) -> &Path {
        &self.location
    }

    pub fn own_certs_dir(&self) -> PathBuf {
        self.location.join("own").join("certs")
    }

    pub fn own_private_dir(&self) -> PathBuf {
        self.location.join("own").join("private")
    }

    pub fn trusted_dir(&self) -> PathBuf {
        self.location.join("trusted")
    }

    pub fn rejected_dir(&self) -> PathBuf {
        self.location.join("rejected")
    }

    pub fn config_file(&self) -> PathBuf {
        self.location.join("own").join("openssl.cnf")
    }

    pub fn materialized_config(&self) -> PathBuf {
        self.location.join("own").join("openssl.cnf.tmp")
    }

    pub fn private_key(&self) -> PathBuf {
        self.own_private_dir().join("private_key.pem")
    }

    /// Creates the directory layout, the configuration and the own key.
    /// Whatever already exists is kept.
    pub fn initialize(&self) -> Result<PipelineReport> {
        Pipeline::new("initialize certificate manager")
            .step("create directories", || {
                for dir in [
                    self.own_certs_dir(),
                    self.own_private_dir(),
                    self.trusted_dir(),
                    self.rejected_dir(),
                ] {
                    fs::create_dir_all(&dir).map_err(|e| CaError::io(&dir, e))?;
                }
                Ok(())
            })
            .step("write configuration", || self.write_config())
            .step("create private key", || {
                self.create_private_key(&self.private_key(), self.key_size)
                    .map(drop)
            })
            .run()
    }

    /// Generates an RSA private key at `path` unless a file is already there.
    pub fn create_private_key(&self, path: &Path, key_size: KeySize) -> Result<PathBuf> {
        if path.exists() {
            debug!(path = %path.display(), "private key already exists");
            return Ok(path.to_path_buf());
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| CaError::io(parent, e))?;
        }
        self.engine.execute(&EngineCommand::GenerateKey {
            output: path.to_path_buf(),
            key_size,
        })?;
        info!(path = %path.display(), %key_size, "private key created");
        Ok(path.to_path_buf())
    }

    /// Writes a request for `private_key` (the own key when `None`, created
    /// if missing) to `output`. The subjectAltName lists the application
    /// URI, then the DNS names, then the IP addresses.
    pub fn create_certificate_request(
        &self,
        output: &Path,
        params: &IssueParams,
        private_key: Option<&Path>,
    ) -> Result<PathBuf> {
        if output.exists() && !self.force {
            info!(output = %output.display(), "certificate request already exists");
            return Ok(output.to_path_buf());
        }
        let alt_names = params.alt_names();
        alt_names.validate()?;
        ca::ensure_output_dir(output)?;
        let private_key = match private_key {
            Some(path) if !path.exists() => {
                return Err(CaError::PreconditionError(format!(
                    "private key {} does not exist",
                    path.display()
                )));
            }
            Some(path) => path.to_path_buf(),
            None => self.create_private_key(&self.private_key(), self.key_size)?,
        };
        self.write_config()?;
        template::materialize(
            &self.config_file(),
            &TemplateVars::new().with(template::ALTNAME, alt_names.to_string()),
        )?;
        self.engine.execute(&EngineCommand::CreateRequest {
            config: self.materialized_config(),
            private_key,
            subject: params.subject.clone(),
            output: output.to_path_buf(),
        })?;
        info!(output = %output.display(), alt_names = %alt_names, "certificate request created");
        Ok(output.to_path_buf())
    }

    /// Writes a certificate for the own key, signed by that key, without any
    /// CA involved.
    pub fn create_self_signed_certificate(
        &self,
        output: &Path,
        params: &IssueParams,
    ) -> Result<PathBuf> {
        if output.exists() && !self.force {
            info!(output = %output.display(), "certificate already exists, not signing");
            return Ok(output.to_path_buf());
        }
        params.prepare()?;
        ca::ensure_output_dir(output)?;
        let request = ca::request_path(output);
        let result = Pipeline::new("create self-signed certificate")
            .step("create request", || {
                self.create_certificate_request(&request, params, None)
                    .map(drop)
            })
            .step("self-sign request", || {
                self.engine
                    .execute(&EngineCommand::SelfSign {
                        config: self.materialized_config(),
                        extensions: SELF_SIGNED_EXTENSIONS.to_string(),
                        request: request.clone(),
                        signing_key: self.private_key(),
                        days: params.validity,
                        output: output.to_path_buf(),
                    })
                    .map(drop)
            })
            .run();
        let cleanup = ca::remove_file(&request);
        result?;
        cleanup?;
        Ok(output.to_path_buf())
    }

    /// Has `authority` sign a request for the own key. The request is
    /// deleted once consumed.
    pub fn request_ca_signed_certificate(
        &self,
        authority: &CertificateAuthority,
        output: &Path,
        params: &IssueParams,
    ) -> Result<PathBuf> {
        if output.exists() && !self.force {
            info!(output = %output.display(), "certificate already exists, not requesting");
            return Ok(output.to_path_buf());
        }
        let request = ca::request_path(output);
        let result = self
            .create_certificate_request(&request, params, None)
            .and_then(|csr| authority.sign_certificate_request(output, &csr, params));
        let cleanup = ca::remove_file(&request);
        let certificate = result?;
        cleanup?;
        Ok(certificate)
    }

    /// Writes the public half of the own key to `output`.
    pub fn export_public_key(&self, output: &Path) -> Result<PathBuf> {
        self.engine.execute(&EngineCommand::DerivePublicKey {
            private_key: self.private_key(),
            output: output.to_path_buf(),
        })?;
        Ok(output.to_path_buf())
    }

    /// Writes the DER form of the PEM certificate `certificate` beside it,
    /// as `<name>.der`.
    pub fn export_der(&self, certificate: &Path) -> Result<PathBuf> {
        let output = certificate.with_extension("der");
        self.engine.execute(&EngineCommand::CertificateToDer {
            input: certificate.to_path_buf(),
            output: output.clone(),
        })?;
        Ok(output)
    }

    /// Human-readable description of a certificate.
    pub fn dump_certificate(&self, certificate: &Path) -> Result<String> {
        let output = self.engine.execute(&EngineCommand::Dump {
            input: certificate.to_path_buf(),
            kind: DumpKind::Certificate,
        })?;
        Ok(output.stdout)
    }

    /// Validity dates and SHA-1 fingerprint of a certificate.
    pub fn fingerprint(&self, certificate: &Path) -> Result<String> {
        let output = self.engine.execute(&EngineCommand::Fingerprint {
            certificate: certificate.to_path_buf(),
        })?;
        Ok(output.stdout)
    }

    fn write_config(&self) -> Result<()> {
        let path = self.config_file();
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CaError::io(parent, e))?;
        }
        fs::write(&path, template::SIMPLE_CONFIG_TEMPLATE).map_err(|e| CaError::io(&path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::native::NativeEngine;

    fn manager(root: &Path) -> CertificateManager {
        CertificateManager::builder()
            .location(root)
            .key_size(KeySize::Bits1024)
            .engine(Arc::new(NativeEngine::new()))
            .build()
    }

    #[test]
    fn test_layout() {
        let pki = manager(Path::new("/pki/PKI"));
        assert_eq!(
            pki.private_key(),
            Path::new("/pki/PKI/own/private/private_key.pem")
        );
        assert_eq!(pki.config_file(), Path::new("/pki/PKI/own/openssl.cnf"));
        assert_eq!(pki.trusted_dir(), Path::new("/pki/PKI/trusted"));
    }

    #[test]
    fn test_initialize_keeps_existing_key() {
        let dir = tempfile::tempdir().unwrap();
        let pki = manager(dir.path());
        pki.initialize().unwrap();
        let key = fs::read(pki.private_key()).unwrap();
        assert!(pki.config_file().exists());
        assert!(pki.rejected_dir().is_dir());

        pki.initialize().unwrap();
        assert_eq!(fs::read(pki.private_key()).unwrap(), key);
    }

    #[test]
    fn test_request_with_missing_key_override() {
        let dir = tempfile::tempdir().unwrap();
        let pki = manager(dir.path());
        let params = IssueParams::builder().application_uri("urn:x").build();
        let err = pki
            .create_certificate_request(
                &dir.path().join("req.csr"),
                &params,
                Some(&dir.path().join("absent.pem")),
            )
            .unwrap_err();
        assert!(matches!(err, CaError::PreconditionError(_)));
    }
}
