//! TOML settings describing a PKI: where the CA and the manager live, which
//! engine runs the commands and what a default issuance looks like.
//!
//! ```toml
//! root = "{CWD}/certificates"
//! key_size = 2048
//! engine = "openssl"
//! application_uri = "urn:{hostname}:app"
//! dns = ["{hostname}"]
//! ```
//!
//! Folder and name values may use `{CWD}`, `{root}` and `{hostname}`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::ca::CertificateAuthority;
use crate::cert::params::{DEFAULT_VALIDITY_DAYS, IssueParams};
use crate::engine::CryptoEngine;
use crate::engine::native::NativeEngine;
use crate::engine::openssl::OpensslEngine;
use crate::error::{CaError, Result};
use crate::key::KeySize;
use crate::manager::CertificateManager;
use crate::subject::Subject;

/// Which engine executes the commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Native,
    Openssl,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PkiSettings {
    #[serde(default = "default_root")]
    pub root: String,
    #[serde(default = "default_ca_folder")]
    pub ca_folder: String,
    #[serde(default = "default_pki_folder")]
    pub pki_folder: String,
    #[serde(default = "default_key_size")]
    pub key_size: u32,
    #[serde(default = "default_validity")]
    pub validity: u32,
    /// Distinguished name of issued certificates, e.g. `/CN=host1/O=Acme`.
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default = "default_application_uri")]
    pub application_uri: String,
    #[serde(default)]
    pub dns: Vec<String>,
    #[serde(default)]
    pub ip: Vec<String>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub engine: EngineKind,
    #[serde(default)]
    pub openssl_path: Option<PathBuf>,
}

fn default_root() -> String {
    "certificates".to_string()
}

fn default_ca_folder() -> String {
    "{root}/CA".to_string()
}

fn default_pki_folder() -> String {
    "{root}/PKI".to_string()
}

fn default_key_size() -> u32 {
    2048
}

fn default_validity() -> u32 {
    DEFAULT_VALIDITY_DAYS
}

fn default_application_uri() -> String {
    "urn:{hostname}:cakit".to_string()
}

impl Default for PkiSettings {
    fn default() -> Self {
        Self {
            root: default_root(),
            ca_folder: default_ca_folder(),
            pki_folder: default_pki_folder(),
            key_size: default_key_size(),
            validity: default_validity(),
            subject: None,
            application_uri: default_application_uri(),
            dns: Vec::new(),
            ip: Vec::new(),
            force: false,
            engine: EngineKind::default(),
            openssl_path: None,
        }
    }
}

impl PkiSettings {
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| CaError::io(path, e))?;
        Self::from_toml(&text)
    }

    pub fn root_dir(&self) -> Result<PathBuf> {
        Ok(PathBuf::from(expand(&self.root, None)?))
    }

    pub fn ca_location(&self) -> Result<PathBuf> {
        self.folder(&self.ca_folder)
    }

    pub fn pki_location(&self) -> Result<PathBuf> {
        self.folder(&self.pki_folder)
    }

    pub fn key_size(&self) -> Result<KeySize> {
        KeySize::try_from(self.key_size)
    }

    pub fn engine(&self) -> Arc<dyn CryptoEngine> {
        match self.engine {
            EngineKind::Native => Arc::new(NativeEngine::new()),
            EngineKind::Openssl => Arc::new(OpensslEngine::locate(self.openssl_path.as_deref())),
        }
    }

    pub fn certificate_authority(&self, engine: Arc<dyn CryptoEngine>) -> Result<CertificateAuthority> {
        Ok(CertificateAuthority::builder()
            .location(self.ca_location()?)
            .key_size(self.key_size()?)
            .engine(engine)
            .force(self.force)
            .build())
    }

    pub fn certificate_manager(&self, engine: Arc<dyn CryptoEngine>) -> Result<CertificateManager> {
        Ok(CertificateManager::builder()
            .location(self.pki_location()?)
            .key_size(self.key_size()?)
            .engine(engine)
            .force(self.force)
            .build())
    }

    /// Issuance parameters for the configured names, starting now.
    pub fn issue_params(&self) -> Result<IssueParams> {
        let subject = self
            .subject
            .as_deref()
            .map(|dn| Subject::parse(&expand(dn, None)?))
            .transpose()?;
        let dns = self
            .dns
            .iter()
            .map(|name| expand(name, None))
            .collect::<Result<Vec<_>>>()?;
        let params = IssueParams::builder()
            .application_uri(expand(&self.application_uri, None)?)
            .dns(dns)
            .ip(self.ip.clone())
            .maybe_subject(subject)
            .validity(self.validity)
            .build();
        params.alt_names().validate()?;
        Ok(params)
    }

    fn folder(&self, value: &str) -> Result<PathBuf> {
        let root = self.root_dir()?;
        Ok(PathBuf::from(expand(value, Some(&root))?))
    }
}

/// Substitutes `{CWD}`, `{hostname}` and, when given, `{root}`.
fn expand(value: &str, root: Option<&Path>) -> Result<String> {
    let mut text = value.to_string();
    if let Some(root) = root {
        text = text.replace("{root}", &root.to_string_lossy());
    }
    if text.contains("{CWD}") {
        let cwd = env::current_dir().map_err(|e| CaError::io(".", e))?;
        text = text.replace("{CWD}", &cwd.to_string_lossy());
    }
    if text.contains("{hostname}") {
        text = text.replace("{hostname}", &local_hostname());
    }
    Ok(text)
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
