//! PKCS#10 certificate signing requests.

use std::fs;
use std::path::Path;

use const_oid::AssociatedOid;
use der::asn1::{BitString, SetOfVec};
use der::{Any, Decode, Encode};
use x509_cert::attr::Attribute;
use x509_cert::request::{CertReq, CertReqInfo, ExtensionReq, Version};
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use crate::cert::SignatureAlgorithm;
use crate::cert::params::ExtensionParam;
use crate::error::{CaError, Result};
use crate::key::{self, KeyPair};
use crate::pem_utils;
use crate::subject::Subject;

/// A certificate signing request, consumed once by a signing operation.
#[derive(Debug, Clone)]
pub struct CertificateRequest {
    pub inner: CertReq,
}

impl CertificateRequest {
    /// Builds and signs a request for `subject`. Non-empty `extensions` are
    /// carried in an `extensionRequest` attribute.
    pub fn new(subject: &Subject, key: &KeyPair, extensions: &[ExtensionParam]) -> Result<Self> {
        let mut attributes = Vec::new();
        if !extensions.is_empty() {
            let extensions = extensions
                .iter()
                .map(ExtensionParam::to_x509)
                .collect::<Result<Vec<_>>>()?;
            let value = Any::from_der(&ExtensionReq(extensions).to_der()?)?;
            attributes.push(Attribute {
                oid: ExtensionReq::OID,
                values: SetOfVec::try_from(vec![value])?,
            });
        }

        let info = CertReqInfo {
            version: Version::V1,
            subject: subject.to_x509_name()?,
            public_key: key.as_spki()?,
            attributes: SetOfVec::try_from(attributes)?,
        };
        let signature = key.sign_data(&info.to_der()?);

        Ok(Self {
            inner: CertReq {
                info,
                algorithm: SignatureAlgorithm::Sha256WithRSA.into(),
                signature: BitString::from_bytes(&signature)?,
            },
        })
    }

    pub fn from_pem(pem: &str) -> Result<Self> {
        let der = pem_utils::first_block(pem, pem_utils::CERTIFICATE_REQUEST)?;
        Ok(Self {
            inner: CertReq::from_der(&der)?,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let pem = fs::read_to_string(path).map_err(|e| CaError::io(path, e))?;
        Self::from_pem(&pem)
    }

    pub fn to_pem(&self) -> Result<String> {
        Ok(pem_utils::der_to_pem(
            &self.inner.to_der()?,
            pem_utils::CERTIFICATE_REQUEST,
        ))
    }

    pub fn subject(&self) -> Subject {
        Subject::from_x509_name(&self.inner.info.subject)
    }

    pub fn public_key_info(&self) -> &SubjectPublicKeyInfoOwned {
        &self.inner.info.public_key
    }

    /// Extensions requested through the `extensionRequest` attribute.
    pub fn extensions(&self) -> Result<Vec<ExtensionParam>> {
        let mut found = Vec::new();
        for attribute in self.inner.info.attributes.iter() {
            if attribute.oid != ExtensionReq::OID {
                continue;
            }
            for value in attribute.values.iter() {
                let request = ExtensionReq::from_der(&value.to_der()?)?;
                found.extend(request.0.iter().map(ExtensionParam::from_x509));
            }
        }
        Ok(found)
    }

    /// Checks the proof of possession: the request must be signed by the key
    /// it carries.
    pub fn verify(&self) -> Result<()> {
        let public = key::public_key_from_spki(self.public_key_info())?;
        let signature = self.inner.signature.as_bytes().ok_or_else(|| {
            CaError::DecodingError("signature bit string has unused bits".to_string())
        })?;
        key::verify_signature(&public, &self.inner.info.to_der()?, signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::extensions::SubjectAltName;
    use crate::cert::params::GeneralNameParam;
    use crate::key::KeySize;

    #[test]
    fn test_request_carries_subject_and_extensions() {
        let key = KeyPair::generate_rsa(KeySize::Bits1024).unwrap();
        let subject = Subject::parse("/C=FR/CN=device").unwrap();
        let san = SubjectAltName {
            names: vec![GeneralNameParam::Uri("urn:device".to_string())],
        };
        let request = CertificateRequest::new(
            &subject,
            &key,
            &[ExtensionParam::from_extension(san, false).unwrap()],
        )
        .unwrap();

        let decoded = CertificateRequest::from_pem(&request.to_pem().unwrap()).unwrap();
        decoded.verify().unwrap();
        assert_eq!(decoded.subject(), subject);

        let extensions = decoded.extensions().unwrap();
        assert_eq!(extensions.len(), 1);
        let san: SubjectAltName = extensions[0].to_extension().unwrap();
        assert_eq!(san.names, vec![GeneralNameParam::Uri("urn:device".to_string())]);
    }

    #[test]
    fn test_request_without_extensions() {
        let key = KeyPair::generate_rsa(KeySize::Bits1024).unwrap();
        let request = CertificateRequest::new(&Subject::default(), &key, &[]).unwrap();
        assert!(request.extensions().unwrap().is_empty());
        request.verify().unwrap();
    }

    #[test]
    fn test_tampered_request_fails_verification() {
        let key = KeyPair::generate_rsa(KeySize::Bits1024).unwrap();
        let other = KeyPair::generate_rsa(KeySize::Bits1024).unwrap();
        let mut request =
            CertificateRequest::new(&Subject::parse("/CN=a").unwrap(), &key, &[]).unwrap();
        request.inner.info.public_key = other.as_spki().unwrap();
        assert!(request.verify().is_err());
    }
}
