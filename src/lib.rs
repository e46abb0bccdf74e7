//! # cakit - A Small Self-Hosted PKI
//!
//! cakit runs the certificate lifecycle of a private Public Key Infrastructure:
//! a root certificate authority that signs requests, revokes certificates and
//! publishes CRLs, and a certificate manager that holds an end-entity key and
//! asks for certificates on its behalf.
//!
//! The cryptographic work goes through a [`CryptoEngine`](engine::CryptoEngine).
//! Two engines are provided and share the same on-disk CA layout, so a CA
//! created with one can be operated with the other:
//!
//! - [`OpensslEngine`](engine::openssl::OpensslEngine) runs the `openssl`
//!   command line tool.
//! - [`NativeEngine`](engine::native::NativeEngine) runs everything in
//!   process with the RustCrypto crates.
//!
//! ## CA Database
//!
//! A CA keeps its state in the files the OpenSSL `ca` command uses: `serial`,
//! `crlnumber`, `index.txt` and `index.txt.attr`. Every issuance takes the
//! next serial and appends one `V` line to `index.txt`; every revocation flips
//! its line to `R` and publishes a CRL with the next CRL number.
//!
//! ## Quick Start
//!
//! ### Issuing a Certificate
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cakit::{
//!     ca::CertificateAuthority,
//!     cert::params::IssueParams,
//!     engine::native::NativeEngine,
//!     manager::CertificateManager,
//! };
//!
//! # fn main() -> cakit::Result<()> {
//! let engine = Arc::new(NativeEngine::new());
//!
//! let ca = CertificateAuthority::builder()
//!     .location("certificates/CA")
//!     .engine(engine.clone())
//!     .build();
//! ca.initialize()?;
//!
//! let pki = CertificateManager::builder()
//!     .location("certificates/PKI")
//!     .engine(engine)
//!     .build();
//! pki.initialize()?;
//!
//! let params = IssueParams::builder()
//!     .application_uri("urn:server:app")
//!     .dns(vec!["server.example.com".to_string()])
//!     .ip(vec!["10.0.0.5".to_string()])
//!     .validity(90)
//!     .build();
//! let certificate = pki.request_ca_signed_certificate(
//!     &ca,
//!     &pki.own_certs_dir().join("server.pem"),
//!     &params,
//! )?;
//!
//! let outcome = ca.revoke_certificate(&certificate, Some("superseded"))?;
//! println!("revoked ({}), CRL {:?}", outcome.reason, ca.current_crl_number()?);
//! # Ok(())
//! # }
//! ```
//!
//! ### Loading Settings
//!
//! ```rust,no_run
//! use cakit::settings::PkiSettings;
//!
//! # fn main() -> cakit::Result<()> {
//! let settings = PkiSettings::load("pki.toml".as_ref())?;
//! let engine = settings.engine();
//! let ca = settings.certificate_authority(engine.clone())?;
//! ca.initialize()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Every fallible operation returns [`Result`], whose error is [`CaError`]:
//!
//! ```rust
//! use cakit::{CaError, subject::Subject};
//!
//! match Subject::parse("/C=FR/CN") {
//!     Ok(subject) => println!("parsed {subject}"),
//!     Err(CaError::FormatError(msg)) => println!("bad distinguished name: {msg}"),
//!     Err(e) => println!("other error: {e}"),
//! }
//! ```
//!
//! An output file that already exists is not an error: issuance leaves it
//! alone and succeeds, unless the authority or manager was built with
//! `force`.
//!
//! ## Module Organization
//!
//! - [`ca`]: The certificate authority and its database
//! - [`manager`]: The certificate manager
//! - [`engine`]: Engine commands and the engines running them
//! - [`cert`]: Certificates, issuance parameters and X.509 extensions
//! - [`crl`]: Revocation reasons and certificate revocation lists
//! - [`request`]: Certificate signing requests
//! - [`key`]: RSA key generation, import/export and signatures
//! - [`subject`]: Distinguished names
//! - [`template`] and [`conf`]: Engine configuration templates and their reader
//! - [`pipeline`]: Ordered step execution
//! - [`settings`]: TOML settings
//! - [`error`]: Error types

pub mod ca;
pub mod cert;
pub mod conf;
pub mod crl;
pub mod engine;
pub mod error;
pub mod issuer;
pub mod key;
pub mod manager;
pub mod pem_utils;
pub mod pipeline;
pub mod request;
pub mod settings;
pub mod subject;
pub mod tbs_certificate;
pub mod template;

pub use error::{CaError, Result};
