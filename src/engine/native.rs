//! In-process engine built on the RustCrypto stack.
//!
//! Reads the same materialized configuration files the OpenSSL tool would and
//! maintains the CA database in the same format, so a CA root can be driven
//! by either engine.

use std::fs;
use std::path::{Path, PathBuf};

use rand_core::{OsRng, RngCore};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

use super::profile::{self, ProfileContext};
use super::{CryptoEngine, DumpKind, EngineCommand, EngineOutput};
use crate::ca::database::{CaDatabase, IndexEntry, format_serial};
use crate::cert::Certificate;
use crate::cert::extensions::{BasicConstraints, ExtendedKeyUsage};
use crate::cert::params::Validity;
use crate::conf::EngineConfig;
use crate::crl::{RevocationList, RevocationReason};
use crate::error::{CaError, Result};
use crate::issuer::{self, CertificateWithPrivateKey, Issuer, SelfIssuer};
use crate::key::{KeyPair, KeySize};
use crate::pem_utils;
use crate::request::CertificateRequest;
use crate::subject::Subject;

const VERSION: &str = concat!("cakit native engine ", env!("CARGO_PKG_VERSION"));
const DEFAULT_CRL_DAYS: u32 = 30;

const DISPLAY_TIME: &[FormatItem<'static>] = format_description!(
    "[month repr:short] [day padding:space] [hour]:[minute]:[second] [year] GMT"
);

/// Engine running every command in process.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeEngine;

impl NativeEngine {
    pub fn new() -> Self {
        Self
    }
}

impl CryptoEngine for NativeEngine {
    fn ensure_available(&self) -> Result<String> {
        Ok(VERSION.to_string())
    }

    fn execute(&self, command: &EngineCommand) -> Result<EngineOutput> {
        debug!(command = command.name(), "native engine");
        let result = match command {
            EngineCommand::GenerateKey { output, key_size } => generate_key(output, *key_size),
            EngineCommand::DerivePublicKey {
                private_key,
                output,
            } => derive_public_key(private_key, output),
            EngineCommand::CreateRequest {
                config,
                private_key,
                subject,
                output,
            } => create_request(config, private_key, subject.as_ref(), output),
            EngineCommand::SignRequest {
                config,
                request,
                output,
                validity,
                selfsign_key,
            } => sign_request(config, request, output, *validity, selfsign_key.as_deref()),
            EngineCommand::SelfSign {
                config,
                extensions,
                request,
                signing_key,
                days,
                output,
            } => self_sign(config, extensions, request, signing_key, *days, output),
            EngineCommand::Revoke {
                config,
                certificate,
                reason,
            } => revoke(config, certificate, *reason),
            EngineCommand::GenerateCrl { config, output } => generate_crl(config, output),
            EngineCommand::CrlToDer { input, output } => crl_to_der(input, output),
            EngineCommand::Verify {
                certificate,
                ca_file,
                crl_file,
                crl_check,
            } => verify(certificate, ca_file, crl_file.as_deref(), *crl_check),
            EngineCommand::Dump { input, kind } => dump(input, *kind),
            EngineCommand::Fingerprint { certificate } => fingerprint(certificate),
            EngineCommand::CertificateToDer { input, output } => certificate_to_der(input, output),
            EngineCommand::Version => Ok(EngineOutput::ok(VERSION)),
        };
        result.map_err(|err| match err {
            CaError::EngineError { .. } => err,
            other => CaError::engine(command.name(), other.to_string()),
        })
    }
}

/// The `[ ca ]` side of a configuration.
struct CaSection {
    name: String,
    database: CaDatabase,
    certificate: PathBuf,
    private_key: PathBuf,
    new_certs_dir: Option<PathBuf>,
}

impl CaSection {
    fn from_config(config: &EngineConfig) -> Result<Self> {
        let name = config.default_ca()?.to_string();
        Ok(Self {
            database: CaDatabase::from_paths(
                config.require_path(&name, "database")?,
                config.require_path(&name, "serial")?,
                config.require_path(&name, "crlnumber")?,
            ),
            certificate: config.require_path(&name, "certificate")?,
            private_key: config.require_path(&name, "private_key")?,
            new_certs_dir: config.get(&name, "new_certs_dir").map(PathBuf::from),
            name,
        })
    }

    fn issuer(&self) -> Result<CertificateWithPrivateKey> {
        CertificateWithPrivateKey::load(&self.certificate, &self.private_key)
    }
}

fn write_file(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    fs::write(path, contents).map_err(|e| CaError::io(path, e))
}

fn display_time(at: OffsetDateTime) -> Result<String> {
    at.format(DISPLAY_TIME)
        .map_err(|e| CaError::EncodingError(e.to_string()))
}

fn context<'a>(
    issuer: &dyn Issuer,
    subject_key: Option<&'a x509_cert::spki::SubjectPublicKeyInfoOwned>,
) -> Result<ProfileContext<'a>> {
    Ok(ProfileContext {
        subject_key,
        issuer_key_id: issuer.key_identifier()?,
        issuer_name: issuer.issuer_name(),
        issuer_serial: issuer.serial_number(),
    })
}

fn generate_key(output: &Path, key_size: KeySize) -> Result<EngineOutput> {
    let key = KeyPair::generate_rsa(key_size)?;
    write_file(output, key.to_pkcs8_pem()?)?;
    Ok(EngineOutput::ok(format!(
        "Generating RSA private key, {key_size} bit long modulus"
    )))
}

fn derive_public_key(private_key: &Path, output: &Path) -> Result<EngineOutput> {
    let key = KeyPair::load(private_key)?;
    write_file(output, key.public_key_pem()?)?;
    Ok(EngineOutput::ok("writing RSA key"))
}

fn request_subject(config: &EngineConfig) -> Result<Subject> {
    let section = config.require("req", "distinguished_name")?;
    let entries = config.section(section).unwrap_or_default();
    Ok(Subject::from_config_section(
        entries.iter().map(|(k, v)| (k.as_str(), v.as_str())),
    ))
}

fn create_request(
    config: &Path,
    private_key: &Path,
    subject: Option<&Subject>,
    output: &Path,
) -> Result<EngineOutput> {
    let config = EngineConfig::load(config)?;
    let key = KeyPair::load(private_key)?;
    let subject = match subject {
        Some(subject) => subject.clone(),
        None => request_subject(&config)?,
    };
    let spki = key.as_spki()?;
    let extensions = match config.get("req", "req_extensions") {
        Some(section) => {
            let issuer = SelfIssuer::new(subject.clone(), &key);
            profile::build_extensions(&config, section, &context(&issuer, Some(&spki))?)?
        }
        None => Vec::new(),
    };
    let request = CertificateRequest::new(&subject, &key, &extensions)?;
    write_file(output, request.to_pem()?)?;
    Ok(EngineOutput::ok(format!("subject={subject}")))
}

fn sign_request(
    config_path: &Path,
    request: &Path,
    output: &Path,
    validity: Validity,
    selfsign_key: Option<&Path>,
) -> Result<EngineOutput> {
    let config = EngineConfig::load(config_path)?;
    let ca = CaSection::from_config(&config)?;
    let csr = CertificateRequest::load(request)?;
    csr.verify()?;
    let subject = csr.subject();

    let ca_issuer;
    let self_key;
    let self_issuer;
    let issuer: &dyn Issuer = match selfsign_key {
        Some(path) => {
            self_key = KeyPair::load(path)?;
            if self_key.as_spki()? != *csr.public_key_info() {
                return Err(CaError::engine(
                    "ca -selfsign",
                    "certificate request and private key do not match",
                ));
            }
            self_issuer = SelfIssuer::new(subject.clone(), &self_key);
            &self_issuer
        }
        None => {
            ca_issuer = ca.issuer()?;
            &ca_issuer
        }
    };

    let extensions = match config.get(&ca.name, "x509_extensions") {
        Some(section) => profile::build_extensions(
            &config,
            section,
            &context(issuer, Some(csr.public_key_info()))?,
        )?,
        None => Vec::new(),
    };

    // The database only changes once the certificate is on disk.
    let serial = ca.database.next_serial()?;
    if ca.database.load_index()?.find(serial).is_some() {
        return Err(CaError::engine(
            "ca",
            format!("serial number {} has already been issued", format_serial(serial)),
        ));
    }
    let certificate = issuer.issue(&subject, csr.public_key_info(), serial, validity, extensions)?;
    let pem = certificate.to_pem()?;

    let copy = ca
        .new_certs_dir
        .as_ref()
        .map(|dir| dir.join(format!("{}.pem", format_serial(serial))));
    if let Some(copy) = &copy {
        write_file(copy, &pem)?;
    }
    if let Err(err) = write_file(output, &pem) {
        if let Some(copy) = &copy {
            let _ = fs::remove_file(copy);
        }
        return Err(err);
    }

    ca.database.allocate_serial()?;
    let mut entry = IndexEntry::valid(serial, certificate.not_after(), &subject);
    entry.file = Some(output.display().to_string());
    ca.database.append(entry)?;
    info!(serial = %format_serial(serial), %subject, "certificate signed");

    Ok(EngineOutput::ok(format!(
        "Signature ok\nCertificate Details:\n        serialNumber = {}\n        subject = {subject}\n        notBefore = {}\n        notAfter = {}\nData Base Updated",
        format_serial(serial),
        display_time(certificate.not_before())?,
        display_time(certificate.not_after())?,
    )))
}

fn self_sign(
    config: &Path,
    extensions: &str,
    request: &Path,
    signing_key: &Path,
    days: u32,
    output: &Path,
) -> Result<EngineOutput> {
    let config = EngineConfig::load(config)?;
    let csr = CertificateRequest::load(request)?;
    csr.verify()?;
    let key = KeyPair::load(signing_key)?;
    let subject = csr.subject();
    let issuer = SelfIssuer::new(subject.clone(), &key);

    // the signing key replaces the public key of the request
    let spki = key.as_spki()?;
    let extensions =
        profile::build_extensions(&config, extensions, &context(&issuer, Some(&spki))?)?;
    let serial = (OsRng.next_u64() >> 1).max(1);
    let certificate = issuer.issue(&subject, &spki, serial, Validity::for_days(days)?, extensions)?;
    write_file(output, certificate.to_pem()?)?;
    Ok(EngineOutput::ok(format!("Signature ok\nsubject={subject}")))
}

fn revoke(config: &Path, certificate: &Path, reason: RevocationReason) -> Result<EngineOutput> {
    let config = EngineConfig::load(config)?;
    let ca = CaSection::from_config(&config)?;
    let certificate = Certificate::load(certificate)?;
    let serial = certificate.serial_hex();
    ca.database
        .revoke(&certificate, reason, OffsetDateTime::now_utc())
        .map_err(|err| match err {
            CaError::PreconditionError(_) => CaError::engine(
                "ca -revoke",
                format!("ERROR:Already revoked, serial number {serial}"),
            ),
            other => other,
        })?;
    info!(%serial, %reason, "certificate revoked");
    Ok(EngineOutput::ok(format!(
        "Revoking Certificate {serial}.\nData Base Updated"
    )))
}

fn generate_crl(config: &Path, output: &Path) -> Result<EngineOutput> {
    let config = EngineConfig::load(config)?;
    let ca = CaSection::from_config(&config)?;
    let issuer = ca.issuer()?;

    let days = match config.get(&ca.name, "default_crl_days") {
        Some(days) => days
            .parse::<u32>()
            .map_err(|_| CaError::ConfigError(format!("invalid default_crl_days `{days}`")))?,
        None => DEFAULT_CRL_DAYS,
    };
    let extensions = match config.get(&ca.name, "crl_extensions") {
        Some(section) => profile::build_extensions(&config, section, &context(&issuer, None)?)?,
        None => Vec::new(),
    };

    let number = ca.database.next_crl_number()?;
    let revoked = ca.database.load_index()?.revoked_entries();
    let now = Validity::for_days(0)?.not_before;
    let crl = RevocationList::build(
        &issuer,
        number,
        now,
        now.checked_add(Duration::days(i64::from(days)))
            .ok_or_else(|| CaError::ConfigError(format!("invalid default_crl_days `{days}`")))?,
        &revoked,
        extensions,
    )?;
    write_file(output, crl.to_pem()?)?;
    ca.database.allocate_crl_number()?;
    info!(number = %format_serial(number), revoked = revoked.len(), "CRL generated");
    Ok(EngineOutput::ok(format!(
        "CRL number {} with {} revoked certificate(s)",
        format_serial(number),
        revoked.len()
    )))
}

fn crl_to_der(input: &Path, output: &Path) -> Result<EngineOutput> {
    let crl = RevocationList::load(input)?;
    write_file(output, crl.to_der()?)?;
    Ok(EngineOutput::ok(""))
}

fn verify(
    certificate_path: &Path,
    ca_file: &Path,
    crl_file: Option<&Path>,
    crl_check: bool,
) -> Result<EngineOutput> {
    let fail = |reason: &str| {
        CaError::engine(
            "verify",
            format!("{}: verification failed: {reason}", certificate_path.display()),
        )
    };

    let certificate = Certificate::load(certificate_path)?;
    let anchors_pem = fs::read_to_string(ca_file).map_err(|e| CaError::io(ca_file, e))?;
    let anchors = Certificate::chain_from_pem(&anchors_pem)?;
    let mut crls = pem_utils::blocks_with_label(&anchors_pem, pem_utils::X509_CRL)?
        .iter()
        .map(|der| RevocationList::from_der(der))
        .collect::<Result<Vec<_>>>()?;
    if let Some(path) = crl_file {
        crls.push(RevocationList::load(path)?);
    }

    let issuer_name = &certificate.inner.tbs_certificate.issuer;
    let issuer = anchors
        .iter()
        .find(|anchor| &anchor.inner.tbs_certificate.subject == issuer_name)
        .ok_or_else(|| fail("unable to get local issuer certificate"))?;
    issuer::verify_signed_by(&certificate, issuer)
        .map_err(|_| fail("certificate signature failure"))?;

    let now = OffsetDateTime::now_utc();
    for cert in [&certificate, issuer] {
        if now < cert.not_before() {
            return Err(fail("certificate is not yet valid"));
        }
        if now > cert.not_after() {
            return Err(fail("certificate has expired"));
        }
    }
    let self_signed = certificate.inner.tbs_certificate.subject == *issuer_name;
    if !self_signed && !issuer.is_ca() {
        return Err(fail("issuer certificate is not a CA"));
    }

    if crl_check {
        let crl = crls
            .iter()
            .find(|crl| crl.inner.tbs_cert_list.issuer == *issuer_name)
            .ok_or_else(|| fail("unable to get certificate CRL"))?;
        crl.verify(issuer)
            .map_err(|_| fail("CRL signature failure"))?;
        if crl.lists(&certificate) {
            return Err(fail("certificate revoked"));
        }
    }
    Ok(EngineOutput::ok(format!("{}: OK", certificate_path.display())))
}

fn dump(input: &Path, kind: DumpKind) -> Result<EngineOutput> {
    let text = match kind {
        DumpKind::Certificate => describe_certificate(&Certificate::load(input)?)?,
        DumpKind::Crl => describe_crl(&RevocationList::load(input)?)?,
    };
    Ok(EngineOutput::ok(text))
}

fn describe_certificate(certificate: &Certificate) -> Result<String> {
    let serial = match certificate.serial() {
        Ok(serial) => format!("{serial} (0x{serial:x})"),
        Err(_) => certificate.serial_hex(),
    };
    let mut lines = vec![
        "Certificate:".to_string(),
        format!("    Serial Number: {serial}"),
        format!("    Issuer: {}", certificate.issuer()),
        "    Validity".to_string(),
        format!("        Not Before: {}", display_time(certificate.not_before())?),
        format!("        Not After : {}", display_time(certificate.not_after())?),
        format!("    Subject: {}", certificate.subject()),
    ];
    if let Some(constraints) = certificate.extension::<BasicConstraints>()? {
        lines.push(format!(
            "    X509v3 Basic Constraints: CA:{}",
            if constraints.is_ca { "TRUE" } else { "FALSE" }
        ));
    }
    if let Some(usage) = certificate.extension::<ExtendedKeyUsage>()? {
        let names: Vec<&str> = usage.usage.iter().map(|option| option.name()).collect();
        lines.push(format!("    X509v3 Extended Key Usage: {}", names.join(", ")));
    }
    let alt_names = certificate.alt_names()?;
    if !alt_names.is_empty() {
        let names: Vec<String> = alt_names.iter().map(ToString::to_string).collect();
        lines.push(format!(
            "    X509v3 Subject Alternative Name: {}",
            names.join(", ")
        ));
    }
    lines.push(format!("    SHA1 Fingerprint={}", certificate.fingerprint()?));
    Ok(lines.join("\n"))
}

fn describe_crl(crl: &RevocationList) -> Result<String> {
    let issuer = Subject::from_x509_name(&crl.inner.tbs_cert_list.issuer);
    let mut lines = vec![
        "Certificate Revocation List (CRL):".to_string(),
        format!("    Issuer: {issuer}"),
        format!("    Last Update: {}", display_time(crl.this_update())?),
    ];
    if let Some(next) = crl.next_update() {
        lines.push(format!("    Next Update: {}", display_time(next)?));
    }
    if let Some(number) = crl.number() {
        lines.push(format!("    X509v3 CRL Number: {number}"));
    }
    let entries = crl.entries()?;
    if entries.is_empty() {
        lines.push("No Revoked Certificates.".to_string());
    } else {
        lines.push("Revoked Certificates:".to_string());
        for entry in entries {
            lines.push(format!("    Serial Number: {}", format_serial(entry.serial)));
            lines.push(format!(
                "        Revocation Date: {}",
                display_time(entry.revocation_date)?
            ));
            if let Some(reason) = entry.reason {
                lines.push(format!("        X509v3 CRL Reason Code: {reason}"));
            }
        }
    }
    Ok(lines.join("\n"))
}

fn fingerprint(certificate: &Path) -> Result<EngineOutput> {
    let certificate = Certificate::load(certificate)?;
    Ok(EngineOutput::ok(format!(
        "notBefore={}\nnotAfter={}\nSHA1 Fingerprint={}",
        display_time(certificate.not_before())?,
        display_time(certificate.not_after())?,
        certificate.fingerprint()?
    )))
}

fn certificate_to_der(input: &Path, output: &Path) -> Result<EngineOutput> {
    let certificate = Certificate::load(input)?;
    write_file(output, certificate.to_der()?)?;
    Ok(EngineOutput::ok(""))
}
