pub mod extensions;
pub mod params;

use std::fmt;
use std::fs;
use std::path::Path;

use der::{Decode, Encode};
use extensions::{BasicConstraints, SubjectAltName, ToAndFromX509Extension};
use params::{ExtensionParam, GeneralNameParam};
use sha1::{Digest, Sha1};
use time::OffsetDateTime;
use x509_cert::certificate::CertificateInner;

use crate::ca::database::{EntryStatus, Index};
use crate::error::{CaError, Result};
use crate::pem_utils;
use crate::subject::Subject;
use crate::tbs_certificate::{self, offset_date_time, serial_to_u64};

/// Represents the supported signature algorithms for certificates.
///
/// This enum provides a mapping to the corresponding OIDs for each algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureAlgorithm {
    /// SHA-256 with RSA encryption.
    #[default]
    Sha256WithRSA,
}

impl From<SignatureAlgorithm> for x509_cert::spki::AlgorithmIdentifierOwned {
    /// Converts a `SignatureAlgorithm` into an `AlgorithmIdentifierOwned`.
    ///
    /// RSA signature algorithms carry an explicit NULL parameter.
    fn from(value: SignatureAlgorithm) -> Self {
        match value {
            SignatureAlgorithm::Sha256WithRSA => x509_cert::spki::AlgorithmIdentifierOwned {
                oid: const_oid::db::rfc5912::SHA_256_WITH_RSA_ENCRYPTION,
                parameters: Some(der::Any::null()),
            },
        }
    }
}

/// Status of a certificate, derived from its validity window and the CA
/// ledger. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateStatus {
    NotYetValid,
    Expired,
    Revoked,
    Valid,
}

impl fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CertificateStatus::NotYetValid => "not yet valid",
            CertificateStatus::Expired => "expired",
            CertificateStatus::Revoked => "revoked",
            CertificateStatus::Valid => "valid",
        };
        f.write_str(text)
    }
}

/// Represents an X.509 certificate.
///
/// This struct provides methods to encode the certificate into DER or PEM formats
/// and to read back the fields the PKI cares about.
#[derive(Debug, Clone)]
pub struct Certificate {
    /// The inner representation of the certificate.
    pub inner: CertificateInner,
}

impl Certificate {
    pub fn from_der(der: &[u8]) -> Result<Self> {
        Ok(Self {
            inner: CertificateInner::from_der(der)?,
        })
    }

    /// Decodes the first `CERTIFICATE` block of a PEM document. For a chain
    /// file this is the leaf.
    pub fn from_pem(pem: &str) -> Result<Self> {
        Self::from_der(&pem_utils::first_block(pem, pem_utils::CERTIFICATE)?)
    }

    /// Decodes every `CERTIFICATE` block of a PEM document, in order.
    pub fn chain_from_pem(pem: &str) -> Result<Vec<Self>> {
        pem_utils::blocks_with_label(pem, pem_utils::CERTIFICATE)?
            .iter()
            .map(|der| Self::from_der(der))
            .collect()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let pem = fs::read_to_string(path).map_err(|e| CaError::io(path, e))?;
        Self::from_pem(&pem)
    }

    /// Encodes the certificate into DER format.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.inner
            .to_der()
            .map_err(|e| CaError::EncodingError(e.to_string()))
    }

    /// Encodes the certificate into PEM format.
    pub fn to_pem(&self) -> Result<String> {
        Ok(pem_utils::der_to_pem(&self.to_der()?, pem_utils::CERTIFICATE))
    }

    /// Serial number, if it fits in 64 bits. CA database serials always do.
    pub fn serial(&self) -> Result<u64> {
        serial_to_u64(&self.inner.tbs_certificate.serial_number)
    }

    /// Serial number as written in the CA database (upper-case hex, even
    /// number of digits), whatever its width.
    pub fn serial_hex(&self) -> String {
        tbs_certificate::serial_hex(&self.inner.tbs_certificate.serial_number)
    }

    pub fn subject(&self) -> Subject {
        Subject::from_x509_name(&self.inner.tbs_certificate.subject)
    }

    pub fn issuer(&self) -> Subject {
        Subject::from_x509_name(&self.inner.tbs_certificate.issuer)
    }

    pub fn not_before(&self) -> OffsetDateTime {
        offset_date_time(&self.inner.tbs_certificate.validity.not_before)
    }

    pub fn not_after(&self) -> OffsetDateTime {
        offset_date_time(&self.inner.tbs_certificate.validity.not_after)
    }

    pub fn extensions(&self) -> Vec<ExtensionParam> {
        self.inner
            .tbs_certificate
            .extensions
            .iter()
            .flatten()
            .map(ExtensionParam::from_x509)
            .collect()
    }

    /// Decodes the extension of type `E`, if the certificate carries one.
    pub fn extension<E: ToAndFromX509Extension>(&self) -> Result<Option<E>> {
        self.extensions()
            .iter()
            .find(|ext| ext.oid == E::OID)
            .map(|ext| ext.to_extension())
            .transpose()
    }

    /// Subject alternative names in certificate order.
    pub fn alt_names(&self) -> Result<Vec<GeneralNameParam>> {
        Ok(self
            .extension::<SubjectAltName>()?
            .map(|san| san.names)
            .unwrap_or_default())
    }

    pub fn is_ca(&self) -> bool {
        matches!(
            self.extension::<BasicConstraints>(),
            Ok(Some(BasicConstraints { is_ca: true, .. }))
        )
    }

    /// SHA-1 fingerprint of the DER encoding, as colon separated upper-case hex.
    pub fn fingerprint(&self) -> Result<String> {
        let digest = Sha1::digest(self.to_der()?);
        Ok(digest
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(":"))
    }

    /// Derives the status of the certificate at `now`, consulting `index` for
    /// revocations.
    pub fn status(&self, index: &Index, now: OffsetDateTime) -> CertificateStatus {
        if now < self.not_before() {
            CertificateStatus::NotYetValid
        } else if now > self.not_after() {
            CertificateStatus::Expired
        } else if self
            .serial()
            .ok()
            .and_then(|serial| index.find(serial))
            .is_some_and(|entry| entry.status == EntryStatus::Revoked)
        {
            CertificateStatus::Revoked
        } else {
            CertificateStatus::Valid
        }
    }
}
