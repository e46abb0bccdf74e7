use std::path::Path;

use der::Encode;
use der::asn1::BitString;
use sha1::{Digest, Sha1};
use x509_cert::certificate::CertificateInner;
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use crate::cert::params::{ExtensionParam, Validity};
use crate::cert::{Certificate, SignatureAlgorithm};
use crate::error::{CaError, Result};
use crate::key::{self, KeyPair};
use crate::subject::Subject;
use crate::tbs_certificate::TbsCertificate;

/// Represents an entity capable of issuing certificates.
///
/// This trait provides methods to retrieve issuer details and issue certificates.
pub trait Issuer {
    /// Returns the distinguished name of the issuer.
    fn issuer_name(&self) -> Subject;

    /// Returns the signing key of the issuer.
    fn signing_key(&self) -> &KeyPair;

    /// Returns the serial number of the issuer's own certificate, if it has one.
    fn serial_number(&self) -> Option<u64>;

    /// SHA-1 key identifier of the signing key.
    fn key_identifier(&self) -> Result<Vec<u8>> {
        Ok(key_identifier(&self.signing_key().as_spki()?))
    }

    /// Signs a to-be-signed certificate.
    fn sign(&self, tbs: &TbsCertificate) -> Result<Certificate> {
        let tbs_cert_inner = tbs.to_tbs_certificate_inner()?;
        let signature = self.signing_key().sign_data(&tbs_cert_inner.to_der()?);

        let cert_inner = CertificateInner {
            tbs_certificate: tbs_cert_inner,
            signature_algorithm: tbs.signature_algorithm.into(),
            signature: BitString::from_bytes(&signature)?,
        };

        Ok(Certificate { inner: cert_inner })
    }

    /// Issues a certificate for `subject` carrying exactly `extensions`.
    ///
    /// # Arguments
    /// * `subject` - The subject of the new certificate.
    /// * `subject_key` - The public key being certified.
    /// * `serial` - Serial number allocated by the caller.
    /// * `validity` - Validity window.
    /// * `extensions` - Extensions, already resolved from a profile.
    fn issue(
        &self,
        subject: &Subject,
        subject_key: &SubjectPublicKeyInfoOwned,
        serial: u64,
        validity: Validity,
        extensions: Vec<ExtensionParam>,
    ) -> Result<Certificate> {
        let tbs_cert = TbsCertificate {
            serial_number: serial,
            signature_algorithm: SignatureAlgorithm::Sha256WithRSA,
            issuer: self.issuer_name(),
            validity,
            subject: subject.clone(),
            subject_public_key: subject_key.clone(),
            extensions,
        };
        self.sign(&tbs_cert)
    }
}

/// SHA-1 hash of the subject public key bits (RFC 5280 method 1).
pub fn key_identifier(spki: &SubjectPublicKeyInfoOwned) -> Vec<u8> {
    Sha1::digest(spki.subject_public_key.raw_bytes()).to_vec()
}

/// Issuer for certificates signed by their own key.
pub struct SelfIssuer<'a> {
    name: Subject,
    key: &'a KeyPair,
}

impl<'a> SelfIssuer<'a> {
    pub fn new(name: Subject, key: &'a KeyPair) -> Self {
        Self { name, key }
    }
}

impl Issuer for SelfIssuer<'_> {
    fn issuer_name(&self) -> Subject {
        self.name.clone()
    }

    fn signing_key(&self) -> &KeyPair {
        self.key
    }

    fn serial_number(&self) -> Option<u64> {
        None
    }
}

/// A CA certificate together with its private key.
#[derive(Debug, Clone)]
pub struct CertificateWithPrivateKey {
    pub cert: Certificate,
    pub key: KeyPair,
}

impl CertificateWithPrivateKey {
    pub fn load(certificate: &Path, private_key: &Path) -> Result<Self> {
        Ok(Self {
            cert: Certificate::load(certificate)?,
            key: KeyPair::load(private_key)?,
        })
    }
}

impl Issuer for CertificateWithPrivateKey {
    fn issuer_name(&self) -> Subject {
        // The name of the issuer is the subject of the certificate
        self.cert.subject()
    }

    fn signing_key(&self) -> &KeyPair {
        &self.key
    }

    fn serial_number(&self) -> Option<u64> {
        self.cert.serial().ok()
    }
}

/// Checks that `cert` names `issuer` as its issuer and carries a valid
/// signature from the issuer's key.
pub fn verify_signed_by(cert: &Certificate, issuer: &Certificate) -> Result<()> {
    if cert.inner.tbs_certificate.issuer != issuer.inner.tbs_certificate.subject {
        return Err(CaError::RsaError(format!(
            "issuer mismatch: certificate issued by {} but trust anchor is {}",
            cert.issuer(),
            issuer.subject()
        )));
    }
    let public = key::public_key_from_spki(&issuer.inner.tbs_certificate.subject_public_key_info)?;
    let tbs = cert.inner.tbs_certificate.to_der()?;
    let signature = cert.inner.signature.as_bytes().ok_or_else(|| {
        CaError::DecodingError("signature bit string has unused bits".to_string())
    })?;
    key::verify_signature(&public, &tbs, signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeySize;

    #[test]
    fn test_ca_issued_certificate_verifies() {
        let ca_key = KeyPair::generate_rsa(KeySize::Bits1024).unwrap();
        let ca_subject = Subject::parse("/O=Test/CN=Test CA").unwrap();
        let validity = Validity::for_days(30).unwrap();
        let ca_cert = SelfIssuer::new(ca_subject.clone(), &ca_key)
            .issue(&ca_subject, &ca_key.as_spki().unwrap(), 1, validity, vec![])
            .unwrap();
        verify_signed_by(&ca_cert, &ca_cert).unwrap();

        let ca = CertificateWithPrivateKey {
            cert: ca_cert.clone(),
            key: ca_key,
        };
        assert_eq!(ca.serial_number(), Some(1));

        let leaf_key = KeyPair::generate_rsa(KeySize::Bits1024).unwrap();
        let leaf_subject = Subject::parse("/CN=leaf").unwrap();
        let leaf = ca
            .issue(&leaf_subject, &leaf_key.as_spki().unwrap(), 0x1000, validity, vec![])
            .unwrap();
        assert_eq!(leaf.issuer(), ca_subject);
        verify_signed_by(&leaf, &ca_cert).unwrap();
        assert!(verify_signed_by(&leaf, &leaf).is_err());
    }

    #[test]
    fn test_key_identifier_is_sha1_length() {
        let key = KeyPair::generate_rsa(KeySize::Bits1024).unwrap();
        assert_eq!(key_identifier(&key.as_spki().unwrap()).len(), 20);
    }
}
