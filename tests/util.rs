#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};

use cakit::ca::CertificateAuthority;
use cakit::ca::database::Index;
use cakit::engine::CryptoEngine;
use cakit::engine::native::NativeEngine;
use cakit::key::KeySize;
use cakit::manager::CertificateManager;
use tempfile::TempDir;

static TRACING: Once = Once::new();

/// Routes `tracing` output to the test harness. `RUST_LOG` selects the level.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn native_engine() -> Arc<dyn CryptoEngine> {
    Arc::new(NativeEngine::new())
}

/// A fresh CA in its own temporary directory, not initialized yet.
pub fn new_ca(dir: &TempDir, engine: Arc<dyn CryptoEngine>) -> CertificateAuthority {
    new_ca_with_key_size(dir, engine, KeySize::Bits1024)
}

pub fn new_ca_with_key_size(
    dir: &TempDir,
    engine: Arc<dyn CryptoEngine>,
    key_size: KeySize,
) -> CertificateAuthority {
    init_tracing();
    CertificateAuthority::builder()
        .location(dir.path().join("CA"))
        .key_size(key_size)
        .engine(engine)
        .build()
}

/// An initialized CA running on the native engine.
pub fn generate_ca(dir: &TempDir) -> CertificateAuthority {
    let ca = new_ca(dir, native_engine());
    ca.initialize().unwrap();
    ca
}

pub fn new_manager(dir: &TempDir, engine: Arc<dyn CryptoEngine>) -> CertificateManager {
    new_manager_with_key_size(dir, engine, KeySize::Bits1024)
}

pub fn new_manager_with_key_size(
    dir: &TempDir,
    engine: Arc<dyn CryptoEngine>,
    key_size: KeySize,
) -> CertificateManager {
    init_tracing();
    CertificateManager::builder()
        .location(dir.path().join("PKI"))
        .key_size(key_size)
        .engine(engine)
        .build()
}

pub fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()))
}

pub fn index(ca: &CertificateAuthority) -> Index {
    ca.index().unwrap()
}

pub fn serial_file(ca: &CertificateAuthority) -> String {
    read(&ca.database().serial_path()).trim().to_string()
}

pub fn crl_number_file(ca: &CertificateAuthority) -> String {
    read(&ca.database().crl_number_path()).trim().to_string()
}

pub fn out_path(dir: &TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}
