//! Certificate revocation lists and revocation reasons.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use const_oid::ObjectIdentifier;
use der::asn1::BitString;
use der::{Decode, Encode};
use time::OffsetDateTime;
use x509_cert::Version;
use x509_cert::crl::{CertificateList, RevokedCert, TbsCertList};
use x509_cert::ext::Extension;

use crate::cert::SignatureAlgorithm;
use crate::cert::params::ExtensionParam;
use crate::error::{CaError, Result};
use crate::issuer::Issuer;
use crate::pem_utils;
use crate::tbs_certificate::{
    offset_date_time, serial_number, serial_to_u64, significant_bytes, x509_time,
};

/// `cRLNumber` CRL extension.
pub const CRL_NUMBER: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.20");
/// `cRLReason` CRL entry extension.
pub const CRL_REASON: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.21");

/// The standard CRL reasons accepted by revocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RevocationReason {
    Unspecified,
    #[default]
    KeyCompromise,
    CaCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    CertificateHold,
    RemoveFromCrl,
}

impl RevocationReason {
    pub const ALL: [RevocationReason; 8] = [
        RevocationReason::Unspecified,
        RevocationReason::KeyCompromise,
        RevocationReason::CaCompromise,
        RevocationReason::AffiliationChanged,
        RevocationReason::Superseded,
        RevocationReason::CessationOfOperation,
        RevocationReason::CertificateHold,
        RevocationReason::RemoveFromCrl,
    ];

    /// Name used on the command line and in the CA database.
    pub fn as_str(self) -> &'static str {
        match self {
            RevocationReason::Unspecified => "unspecified",
            RevocationReason::KeyCompromise => "keyCompromise",
            RevocationReason::CaCompromise => "CACompromise",
            RevocationReason::AffiliationChanged => "affiliationChanged",
            RevocationReason::Superseded => "superseded",
            RevocationReason::CessationOfOperation => "cessationOfOperation",
            RevocationReason::CertificateHold => "certificateHold",
            RevocationReason::RemoveFromCrl => "removeFromCRL",
        }
    }

    /// `CRLReason` code (RFC 5280 section 5.3.1). Code 7 is unused.
    pub fn code(self) -> u8 {
        match self {
            RevocationReason::Unspecified => 0,
            RevocationReason::KeyCompromise => 1,
            RevocationReason::CaCompromise => 2,
            RevocationReason::AffiliationChanged => 3,
            RevocationReason::Superseded => 4,
            RevocationReason::CessationOfOperation => 5,
            RevocationReason::CertificateHold => 6,
            RevocationReason::RemoveFromCrl => 8,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|reason| reason.code() == code)
    }

    fn to_extension(self) -> Result<Extension> {
        // ENUMERATED { code }
        ExtensionParam {
            oid: CRL_REASON,
            critical: false,
            value: vec![0x0a, 0x01, self.code()],
        }
        .to_x509()
    }

    fn from_extension_value(value: &[u8]) -> Option<Self> {
        match value {
            [0x0a, 0x01, code] => Self::from_code(*code),
            _ => None,
        }
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RevocationReason {
    type Err = CaError;

    /// Names match case-insensitively.
    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|reason| reason.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                CaError::InvalidArgument(format!(
                    "invalid revocation reason `{s}`, expected one of: {}",
                    Self::ALL.map(RevocationReason::as_str).join(", ")
                ))
            })
    }
}

/// One revoked certificate, as listed in a CRL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokedEntry {
    pub serial: u64,
    pub revocation_date: OffsetDateTime,
    pub reason: Option<RevocationReason>,
}

/// A signed certificate revocation list.
#[derive(Debug, Clone)]
pub struct RevocationList {
    pub inner: CertificateList,
}

impl RevocationList {
    /// Builds and signs a version 2 CRL.
    ///
    /// # Arguments
    /// * `issuer` - The CA signing the list.
    /// * `number` - Value of the `cRLNumber` extension.
    /// * `this_update` - Issue time of the list.
    /// * `next_update` - Time by which the next list will be issued.
    /// * `revoked` - Entries to list, in order.
    /// * `extensions` - Additional CRL extensions (e.g. authority key identifier).
    pub fn build(
        issuer: &impl Issuer,
        number: u64,
        this_update: OffsetDateTime,
        next_update: OffsetDateTime,
        revoked: &[RevokedEntry],
        extensions: Vec<ExtensionParam>,
    ) -> Result<Self> {
        let revoked_certificates = revoked
            .iter()
            .map(|entry| {
                Ok(RevokedCert {
                    serial_number: serial_number(entry.serial)?,
                    revocation_date: x509_time(entry.revocation_date)?,
                    crl_entry_extensions: entry
                        .reason
                        .map(|reason| reason.to_extension().map(|ext| vec![ext]))
                        .transpose()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut crl_extensions = extensions
            .iter()
            .map(ExtensionParam::to_x509)
            .collect::<Result<Vec<_>>>()?;
        crl_extensions.push(
            ExtensionParam {
                oid: CRL_NUMBER,
                critical: false,
                value: serial_number(number)?.to_der()?,
            }
            .to_x509()?,
        );

        let tbs_cert_list = TbsCertList {
            version: Version::V2,
            signature: SignatureAlgorithm::Sha256WithRSA.into(),
            issuer: issuer.issuer_name().to_x509_name()?,
            this_update: x509_time(this_update)?,
            next_update: Some(x509_time(next_update)?),
            revoked_certificates: (!revoked_certificates.is_empty())
                .then_some(revoked_certificates),
            crl_extensions: Some(crl_extensions),
        };

        let signature = issuer.signing_key().sign_data(&tbs_cert_list.to_der()?);
        Ok(Self {
            inner: CertificateList {
                tbs_cert_list,
                signature_algorithm: SignatureAlgorithm::Sha256WithRSA.into(),
                signature: BitString::from_bytes(&signature)?,
            },
        })
    }

    pub fn from_der(der: &[u8]) -> Result<Self> {
        Ok(Self {
            inner: CertificateList::from_der(der)?,
        })
    }

    pub fn from_pem(pem: &str) -> Result<Self> {
        Self::from_der(&pem_utils::first_block(pem, pem_utils::X509_CRL)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let pem = fs::read_to_string(path).map_err(|e| CaError::io(path, e))?;
        Self::from_pem(&pem)
    }

    pub fn to_der(&self) -> Result<Vec<u8>> {
        Ok(self.inner.to_der()?)
    }

    pub fn to_pem(&self) -> Result<String> {
        Ok(pem_utils::der_to_pem(&self.to_der()?, pem_utils::X509_CRL))
    }

    /// The `cRLNumber` of this list, if present.
    pub fn number(&self) -> Option<u64> {
        self.inner
            .tbs_cert_list
            .crl_extensions
            .iter()
            .flatten()
            .find(|ext| ext.extn_id == CRL_NUMBER)
            .and_then(|ext| {
                x509_cert::serial_number::SerialNumber::from_der(ext.extn_value.as_bytes()).ok()
            })
            .and_then(|number| serial_to_u64(&number).ok())
    }

    pub fn this_update(&self) -> OffsetDateTime {
        offset_date_time(&self.inner.tbs_cert_list.this_update)
    }

    pub fn next_update(&self) -> Option<OffsetDateTime> {
        self.inner
            .tbs_cert_list
            .next_update
            .as_ref()
            .map(offset_date_time)
    }

    pub fn entries(&self) -> Result<Vec<RevokedEntry>> {
        self.inner
            .tbs_cert_list
            .revoked_certificates
            .iter()
            .flatten()
            .map(|cert| {
                Ok(RevokedEntry {
                    serial: serial_to_u64(&cert.serial_number)?,
                    revocation_date: offset_date_time(&cert.revocation_date),
                    reason: cert
                        .crl_entry_extensions
                        .iter()
                        .flatten()
                        .find(|ext| ext.extn_id == CRL_REASON)
                        .and_then(|ext| {
                            RevocationReason::from_extension_value(ext.extn_value.as_bytes())
                        }),
                })
            })
            .collect()
    }

    pub fn is_revoked(&self, serial: u64) -> bool {
        self.lists_serial(&serial.to_be_bytes())
    }

    /// Whether `certificate` is listed, whatever the width of its serial.
    pub fn lists(&self, certificate: &crate::cert::Certificate) -> bool {
        self.lists_serial(certificate.inner.tbs_certificate.serial_number.as_bytes())
    }

    fn lists_serial(&self, serial: &[u8]) -> bool {
        let wanted = significant_bytes(serial);
        self.inner
            .tbs_cert_list
            .revoked_certificates
            .iter()
            .flatten()
            .any(|cert| significant_bytes(cert.serial_number.as_bytes()) == wanted)
    }

    /// Checks the list's signature against the issuing CA certificate.
    pub fn verify(&self, issuer: &crate::cert::Certificate) -> Result<()> {
        let public = crate::key::public_key_from_spki(
            &issuer.inner.tbs_certificate.subject_public_key_info,
        )?;
        let signature = self.inner.signature.as_bytes().ok_or_else(|| {
            CaError::DecodingError("signature bit string has unused bits".to_string())
        })?;
        crate::key::verify_signature(&public, &self.inner.tbs_cert_list.to_der()?, signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issuer::SelfIssuer;
    use crate::key::{KeyPair, KeySize};
    use crate::subject::Subject;
    use time::Duration;

    #[test]
    fn test_reason_names() {
        assert_eq!(
            "keyCompromise".parse::<RevocationReason>().unwrap(),
            RevocationReason::KeyCompromise
        );
        assert_eq!(
            "removeFromCRL".parse::<RevocationReason>().unwrap(),
            RevocationReason::RemoveFromCrl
        );
        assert_eq!(RevocationReason::default(), RevocationReason::KeyCompromise);
        for reason in RevocationReason::ALL {
            assert_eq!(reason.as_str().parse::<RevocationReason>().unwrap(), reason);
            assert_eq!(RevocationReason::from_code(reason.code()), Some(reason));
        }
        assert!(matches!(
            "stolen".parse::<RevocationReason>(),
            Err(CaError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_crl_build_and_read_back() {
        let key = KeyPair::generate_rsa(KeySize::Bits1024).unwrap();
        let subject = Subject::parse("/CN=CRL CA").unwrap();
        let ca = SelfIssuer::new(subject.clone(), &key);
        let ca_cert = crate::issuer::Issuer::issue(
            &ca,
            &subject,
            &key.as_spki().unwrap(),
            1,
            crate::cert::params::Validity::for_days(1).unwrap(),
            vec![],
        )
        .unwrap();

        let now = OffsetDateTime::now_utc().replace_nanosecond(0).unwrap();
        let revoked = vec![
            RevokedEntry {
                serial: 0x1000,
                revocation_date: now,
                reason: Some(RevocationReason::KeyCompromise),
            },
            RevokedEntry {
                serial: 0x1001,
                revocation_date: now,
                reason: None,
            },
        ];
        let crl =
            RevocationList::build(&ca, 0x1001, now, now + Duration::days(30), &revoked, vec![])
                .unwrap();

        let decoded = RevocationList::from_pem(&crl.to_pem().unwrap()).unwrap();
        decoded.verify(&ca_cert).unwrap();
        assert_eq!(decoded.number(), Some(0x1001));
        assert_eq!(decoded.this_update(), now);
        assert_eq!(decoded.next_update(), Some(now + Duration::days(30)));
        assert_eq!(decoded.entries().unwrap(), revoked);
        assert!(decoded.is_revoked(0x1000));
        assert!(!decoded.is_revoked(0x1002));
    }

    #[test]
    fn test_empty_crl() {
        let key = KeyPair::generate_rsa(KeySize::Bits1024).unwrap();
        let ca = SelfIssuer::new(Subject::parse("/CN=CA").unwrap(), &key);
        let now = OffsetDateTime::now_utc();
        let crl = RevocationList::build(&ca, 0x1000, now, now + Duration::days(1), &[], vec![])
            .unwrap();
        assert!(crl.inner.tbs_cert_list.revoked_certificates.is_none());
        assert!(crl.entries().unwrap().is_empty());
        assert_eq!(crl.number(), Some(0x1000));
    }
}
