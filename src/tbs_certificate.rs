use der::Encode;
use der::asn1::{GeneralizedTime, UtcTime};
use x509_cert::Version;
use x509_cert::certificate::TbsCertificateInner;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::Time;

use crate::cert::SignatureAlgorithm;
use crate::cert::params::{ExtensionParam, Validity};
use crate::error::{CaError, Result};
use crate::subject::Subject;

/// Represents the "To Be Signed" (TBS) portion of an X.509 certificate.
/// This struct contains all the fields required to generate a valid X.509 certificate.
///
/// # Fields
/// * `serial_number` - The serial allocated by the CA database.
/// * `signature_algorithm` - The algorithm used to sign the certificate.
/// * `issuer` - The distinguished name of the certificate issuer.
/// * `validity` - The certificate's validity period.
/// * `subject` - The distinguished name of the certificate subject.
/// * `subject_public_key` - The public key of the certificate subject.
/// * `extensions` - Additional X.509 extensions for the certificate.
#[derive(Debug, Clone)]
pub struct TbsCertificate {
    pub serial_number: u64,
    pub signature_algorithm: SignatureAlgorithm,
    pub issuer: Subject,
    pub validity: Validity,
    pub subject: Subject,
    pub subject_public_key: SubjectPublicKeyInfoOwned,
    pub extensions: Vec<ExtensionParam>,
}

impl TbsCertificate {
    /// Converts the `TbsCertificate` into a `TbsCertificateInner` for DER encoding.
    pub fn to_tbs_certificate_inner(&self) -> Result<TbsCertificateInner> {
        let extensions = self
            .extensions
            .iter()
            .map(ExtensionParam::to_x509)
            .collect::<Result<Vec<_>>>()?;

        let validity = x509_cert::time::Validity {
            not_before: x509_time(self.validity.not_before)?,
            not_after: x509_time(self.validity.not_after)?,
        };

        Ok(TbsCertificateInner {
            version: Version::V3,
            serial_number: serial_number(self.serial_number)?,
            signature: self.signature_algorithm.into(),
            issuer: self.issuer.to_x509_name()?,
            validity,
            subject: self.subject.to_x509_name()?,
            subject_public_key_info: self.subject_public_key.clone(),
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: (!extensions.is_empty()).then_some(extensions),
        })
    }

    /// Creates a `TbsCertificate` from a `TbsCertificateInner`.
    pub fn from_tbs_certificate_inner(inner: &TbsCertificateInner) -> Result<Self> {
        let signature_algorithm = match inner.signature.oid {
            const_oid::db::rfc5912::SHA_256_WITH_RSA_ENCRYPTION => {
                SignatureAlgorithm::Sha256WithRSA
            }
            _ => {
                return Err(CaError::DecodingError(
                    "Unsupported signature algorithm".to_string(),
                ));
            }
        };

        Ok(Self {
            serial_number: serial_to_u64(&inner.serial_number)?,
            signature_algorithm,
            issuer: Subject::from_x509_name(&inner.issuer),
            validity: Validity {
                not_before: offset_date_time(&inner.validity.not_before),
                not_after: offset_date_time(&inner.validity.not_after),
            },
            subject: Subject::from_x509_name(&inner.subject),
            subject_public_key: inner.subject_public_key_info.clone(),
            extensions: inner
                .extensions
                .iter()
                .flatten()
                .map(ExtensionParam::from_x509)
                .collect(),
        })
    }

    /// Encodes the `TbsCertificate` into DER format.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        Ok(self.to_tbs_certificate_inner()?.to_der()?)
    }
}

/// Encodes a serial as a positive ASN.1 INTEGER.
pub fn serial_number(serial: u64) -> Result<SerialNumber> {
    let bytes = serial.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    let mut value = bytes[first..].to_vec();
    if value[0] & 0x80 != 0 {
        value.insert(0, 0);
    }
    Ok(SerialNumber::new(&value)?)
}

/// Reads a serial number. Serials wider than 64 bits, such as the 20 byte
/// random serials of `openssl x509 -req`, are a `DecodingError`.
pub fn serial_to_u64(serial: &SerialNumber) -> Result<u64> {
    let bytes = significant_bytes(serial.as_bytes());
    if bytes.len() > 8 {
        return Err(CaError::DecodingError(format!(
            "serial number {} does not fit in 64 bits",
            serial_hex(serial)
        )));
    }
    Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

/// Upper-case hex of a serial of any width, as `format_serial` writes it.
pub fn serial_hex(serial: &SerialNumber) -> String {
    let bytes = significant_bytes(serial.as_bytes());
    if bytes.is_empty() {
        return "00".to_string();
    }
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

/// Magnitude octets of an encoded serial, without leading zeros.
pub fn significant_bytes(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

/// RFC 5280 time: UTCTime through 2049, GeneralizedTime afterwards.
pub fn x509_time(at: time::OffsetDateTime) -> Result<Time> {
    let date_time = der::DateTime::from_system_time(at.into())?;
    if date_time.year() < 2050 {
        Ok(Time::UtcTime(UtcTime::from_date_time(date_time)?))
    } else {
        Ok(Time::GeneralTime(GeneralizedTime::from_date_time(date_time)))
    }
}

pub fn offset_date_time(at: &Time) -> time::OffsetDateTime {
    time::OffsetDateTime::from(at.to_system_time())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{KeyPair, KeySize};

    #[test]
    fn test_serial_number_encoding() {
        assert_eq!(serial_number(0x1000).unwrap().as_bytes(), &[0x10, 0x00]);
        assert_eq!(serial_number(0x80).unwrap().as_bytes(), &[0x00, 0x80]);
        assert_eq!(serial_to_u64(&serial_number(0xABCDEF).unwrap()).unwrap(), 0xABCDEF);
        assert_eq!(serial_to_u64(&serial_number(0).unwrap()).unwrap(), 0);
        assert_eq!(serial_to_u64(&serial_number(u64::MAX).unwrap()).unwrap(), u64::MAX);
    }

    #[test]
    fn test_wide_serial_is_rejected_not_truncated() {
        let mut bytes = vec![0x5A; 20];
        bytes[19] = 0x01;
        let wide = SerialNumber::new(&bytes).unwrap();
        assert!(matches!(serial_to_u64(&wide), Err(CaError::DecodingError(_))));
        assert_eq!(serial_hex(&wide), format!("{}01", "5A".repeat(19)));

        // leading zero octets do not count towards the width
        let mut padded = vec![0x00; 12];
        padded.extend_from_slice(&[0x10, 0x00]);
        let padded = SerialNumber::new(&padded).unwrap();
        assert_eq!(serial_to_u64(&padded).unwrap(), 0x1000);
        assert_eq!(serial_hex(&padded), "1000");
    }

    #[test]
    fn test_x509_time_switches_to_generalized_time() {
        let early = time::macros::datetime!(2049-12-31 23:59:59 UTC);
        let late = time::macros::datetime!(2050-01-01 00:00:00 UTC);
        assert!(matches!(x509_time(early).unwrap(), Time::UtcTime(_)));
        let encoded = x509_time(late).unwrap();
        assert!(matches!(encoded, Time::GeneralTime(_)));
        assert_eq!(offset_date_time(&encoded), late);
    }

    #[test]
    fn test_tbs_certificate_round_trip() {
        let key = KeyPair::generate_rsa(KeySize::Bits1024).unwrap();
        let tbs = TbsCertificate {
            serial_number: 0x1001,
            signature_algorithm: SignatureAlgorithm::Sha256WithRSA,
            issuer: Subject::parse("/CN=issuer").unwrap(),
            validity: Validity::for_days(30).unwrap(),
            subject: Subject::parse("/O=Org/CN=subject").unwrap(),
            subject_public_key: key.as_spki().unwrap(),
            extensions: vec![],
        };
        let inner = tbs.to_tbs_certificate_inner().unwrap();
        assert!(inner.extensions.is_none());

        let decoded = TbsCertificate::from_tbs_certificate_inner(&inner).unwrap();
        assert_eq!(decoded.serial_number, 0x1001);
        assert_eq!(decoded.subject, tbs.subject);
        assert_eq!(decoded.issuer, tbs.issuer);
        assert_eq!(decoded.validity, tbs.validity);
    }
}
