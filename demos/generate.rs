//! Bootstraps a certificate authority, has it sign a host certificate and
//! then revokes that certificate.
//!
//! Runs in a temporary directory unless one is given:
//!
//! ```text
//! cargo run --example generate -- /tmp/pki
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use cakit::CaError;
use cakit::ca::CertificateAuthority;
use cakit::cert::Certificate;
use cakit::cert::params::IssueParams;
use cakit::engine::CryptoEngine;
use cakit::engine::native::NativeEngine;
use cakit::manager::CertificateManager;

fn main() -> cakit::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let scratch = tempfile::tempdir().map_err(|e| CaError::io(std::env::temp_dir(), e))?;
    let root = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| scratch.path().to_path_buf());

    let engine: Arc<dyn CryptoEngine> = Arc::new(NativeEngine::new());
    let ca = CertificateAuthority::builder()
        .location(root.join("CA"))
        .engine(engine.clone())
        .build();
    ca.initialize()?;
    println!("CA certificate: {}", ca.ca_certificate().display());

    let pki = CertificateManager::builder()
        .location(root.join("PKI"))
        .engine(engine)
        .build();
    pki.initialize()?;

    let params = IssueParams::builder()
        .application_uri("urn:demo:server")
        .dns(vec!["server.local".to_string()])
        .build();
    let issued = pki.request_ca_signed_certificate(
        &ca,
        &pki.own_certs_dir().join("server.pem"),
        &params,
    )?;
    let certificate = Certificate::load(&issued)?;
    println!(
        "issued {} with serial {}: {}",
        certificate.subject(),
        certificate.serial_hex(),
        ca.certificate_status(&issued)?
    );

    let outcome = ca.revoke_certificate(&issued, Some("superseded"))?;
    println!(
        "revoked ({}): {}, CRL number {:?}",
        outcome.reason,
        ca.certificate_status(&issued)?,
        ca.current_crl_number()?
    );
    if let Some(failure) = outcome.verification_failure() {
        println!("verification after revocation: {failure}");
    }
    Ok(())
}
