use const_oid::AssociatedOid;
use const_oid::db::rfc5912;
use der::{
    Decode, Encode,
    asn1::{Ia5String, OctetString},
    oid::ObjectIdentifier,
};
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::serial_number::SerialNumber;

pub use der::flagset::FlagSet;
use x509_cert::ext::pkix::KeyUsage as X509KeyUsage;
pub use x509_cert::ext::pkix::KeyUsages;

use super::params::GeneralNameParam;
use crate::error::CaError;
use crate::subject::Subject;

/// Trait for converting to and from X.509 extensions.
///
/// This trait provides methods to encode and decode X.509 extension values.
///
/// # Example
/// ```
/// use cakit::cert::extensions::{SubjectAltName, ToAndFromX509Extension};
/// use cakit::cert::params::GeneralNameParam;
///
/// let san = SubjectAltName {
///     names: vec![GeneralNameParam::Dns("example.com".to_string())],
/// };
/// let encoded = san.to_x509_extension_value().unwrap();
/// let decoded = SubjectAltName::from_x509_extension_value(&encoded).unwrap();
/// assert_eq!(san.names, decoded.names);
/// ```
pub trait ToAndFromX509Extension {
    /// The Object Identifier (OID) for the extension.
    const OID: ObjectIdentifier;

    /// Encodes the extension into a DER-encoded byte vector.
    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CaError>;

    /// Decodes the extension from a DER-encoded byte slice.
    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, CaError>
    where
        Self: Sized;
}

/// Represents the Subject Alternative Name (SAN) extension.
///
/// Entries keep their order: application URI, DNS names, IP addresses.
#[derive(Debug, Clone, Default)]
pub struct SubjectAltName {
    pub names: Vec<GeneralNameParam>,
}

impl ToAndFromX509Extension for SubjectAltName {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::SubjectAltName::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CaError> {
        let san = x509_cert::ext::pkix::SubjectAltName(
            self.names
                .iter()
                .map(|name| match name {
                    GeneralNameParam::Uri(uri) => Ok(GeneralName::UniformResourceIdentifier(
                        Ia5String::new(uri)?,
                    )),
                    GeneralNameParam::Dns(dns) => Ok(GeneralName::DnsName(Ia5String::new(dns)?)),
                    GeneralNameParam::Ip(ip) => {
                        let octets = match ip {
                            std::net::IpAddr::V4(v4) => v4.octets().to_vec(),
                            std::net::IpAddr::V6(v6) => v6.octets().to_vec(),
                        };
                        Ok(GeneralName::IpAddress(OctetString::new(octets)?))
                    }
                })
                .collect::<Result<Vec<_>, der::Error>>()?,
        );

        Ok(san.to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, CaError> {
        let san = x509_cert::ext::pkix::SubjectAltName::from_der(extension)?;
        let names = san
            .0
            .iter()
            .map(|name| match name {
                GeneralName::DnsName(dns) => Ok(GeneralNameParam::Dns(dns.to_string())),
                GeneralName::UniformResourceIdentifier(uri) => {
                    Ok(GeneralNameParam::Uri(uri.to_string()))
                }
                GeneralName::IpAddress(octets) => ip_from_octets(octets.as_bytes())
                    .map(GeneralNameParam::Ip)
                    .ok_or_else(|| CaError::DecodingError("malformed IP address".to_string())),
                _ => Err(CaError::InvalidArgument(
                    "Unsupported general name type".to_string(),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { names })
    }
}

fn ip_from_octets(bytes: &[u8]) -> Option<std::net::IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(std::net::IpAddr::from),
        16 => <[u8; 16]>::try_from(bytes).ok().map(std::net::IpAddr::from),
        _ => None,
    }
}

/// Represents the Basic Constraints extension.
///
/// This extension indicates whether the certificate is a CA certificate and its path length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicConstraints {
    pub is_ca: bool,
    pub max_path_length: Option<u32>,
}

impl ToAndFromX509Extension for BasicConstraints {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::BasicConstraints::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CaError> {
        let path_len_constraint = self
            .max_path_length
            .map(u8::try_from)
            .transpose()
            .map_err(|_| CaError::InvalidArgument("path length above 255".to_string()))?;
        let bc = x509_cert::ext::pkix::BasicConstraints {
            ca: self.is_ca,
            path_len_constraint,
        };

        Ok(bc.to_der()?)
    }

    fn from_x509_extension_value(der_bytes: &[u8]) -> Result<Self, CaError> {
        let bc = x509_cert::ext::pkix::BasicConstraints::from_der(der_bytes)?;
        Ok(Self {
            is_ca: bc.ca,
            max_path_length: bc.path_len_constraint.map(u32::from),
        })
    }
}

/// Represents the Key Usage extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyUsage(pub FlagSet<KeyUsages>);

impl ToAndFromX509Extension for KeyUsage {
    const OID: ObjectIdentifier = <X509KeyUsage as AssociatedOid>::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CaError> {
        let ku = X509KeyUsage(self.0);
        Ok(ku.to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, CaError> {
        let ku = X509KeyUsage::from_der(extension)?;
        Ok(Self(ku.0))
    }
}

impl KeyUsage {
    /// Maps an OpenSSL key usage name (`digitalSignature`, `cRLSign`, ...).
    pub fn flag_from_name(name: &str) -> Option<KeyUsages> {
        Some(match name {
            "digitalSignature" => KeyUsages::DigitalSignature,
            "nonRepudiation" => KeyUsages::NonRepudiation,
            "keyEncipherment" => KeyUsages::KeyEncipherment,
            "dataEncipherment" => KeyUsages::DataEncipherment,
            "keyAgreement" => KeyUsages::KeyAgreement,
            "keyCertSign" => KeyUsages::KeyCertSign,
            "cRLSign" => KeyUsages::CRLSign,
            "encipherOnly" => KeyUsages::EncipherOnly,
            "decipherOnly" => KeyUsages::DecipherOnly,
            _ => return None,
        })
    }
}

/// Represents the Extended Key Usage extension.
///
/// This extension indicates purposes for which the public key may be used.
#[derive(Debug, Clone, Default)]
pub struct ExtendedKeyUsage {
    pub usage: Vec<ExtendedKeyUsageOption>,
}

impl ToAndFromX509Extension for ExtendedKeyUsage {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::ExtendedKeyUsage::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CaError> {
        let oids: Vec<ObjectIdentifier> = self.usage.iter().map(|v| (*v).into()).collect();
        let eku = x509_cert::ext::pkix::ExtendedKeyUsage(oids);
        Ok(eku.to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, CaError> {
        let eku = x509_cert::ext::pkix::ExtendedKeyUsage::from_der(extension)?;
        let usage = eku
            .0
            .iter()
            .map(|oid| {
                ExtendedKeyUsageOption::from_oid(oid).ok_or_else(|| {
                    CaError::InvalidArgument(format!("unsupported extended key usage {oid}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { usage })
    }
}

/// Purposes an end-entity profile can put in `extendedKeyUsage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedKeyUsageOption {
    ServerAuth,
    ClientAuth,
    CodeSigning,
    EmailProtection,
    TimeStamping,
    OcspSigning,
}

// OpenSSL short name and OID of each option.
const EKU_TABLE: [(ExtendedKeyUsageOption, &str, ObjectIdentifier); 6] = [
    (ExtendedKeyUsageOption::ServerAuth, "serverAuth", rfc5912::ID_KP_SERVER_AUTH),
    (ExtendedKeyUsageOption::ClientAuth, "clientAuth", rfc5912::ID_KP_CLIENT_AUTH),
    (ExtendedKeyUsageOption::CodeSigning, "codeSigning", rfc5912::ID_KP_CODE_SIGNING),
    (
        ExtendedKeyUsageOption::EmailProtection,
        "emailProtection",
        rfc5912::ID_KP_EMAIL_PROTECTION,
    ),
    (ExtendedKeyUsageOption::TimeStamping, "timeStamping", rfc5912::ID_KP_TIME_STAMPING),
    (ExtendedKeyUsageOption::OcspSigning, "OCSPSigning", rfc5912::ID_KP_OCSP_SIGNING),
];

impl ExtendedKeyUsageOption {
    /// Maps an OpenSSL extended key usage name (`serverAuth`, `clientAuth`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        EKU_TABLE
            .iter()
            .find(|(_, short, _)| *short == name)
            .map(|(option, _, _)| *option)
    }

    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        EKU_TABLE
            .iter()
            .find(|(_, _, known)| known == oid)
            .map(|(option, _, _)| *option)
    }

    pub fn name(self) -> &'static str {
        EKU_TABLE
            .iter()
            .find(|(option, _, _)| *option == self)
            .map_or("", |(_, short, _)| *short)
    }
}

impl From<ExtendedKeyUsageOption> for ObjectIdentifier {
    fn from(value: ExtendedKeyUsageOption) -> Self {
        EKU_TABLE
            .iter()
            .find(|(option, _, _)| *option == value)
            .map_or(rfc5912::ID_KP_SERVER_AUTH, |(_, _, oid)| *oid)
    }
}

/// Represents the Subject Key Identifier extension (SHA-1 of the subject
/// public key bits).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectKeyIdentifier(pub Vec<u8>);

impl ToAndFromX509Extension for SubjectKeyIdentifier {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::SubjectKeyIdentifier::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CaError> {
        let ski = x509_cert::ext::pkix::SubjectKeyIdentifier(OctetString::new(self.0.clone())?);
        Ok(ski.to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, CaError> {
        let ski = x509_cert::ext::pkix::SubjectKeyIdentifier::from_der(extension)?;
        Ok(Self(ski.0.as_bytes().to_vec()))
    }
}

/// Represents the Authority Key Identifier (AKI) extension.
///
/// # Fields
/// * `key_identifier` - The key identifier.
/// * `authority_cert_issuer` - The issuer's distinguished name.
/// * `authority_cert_serial_number` - The issuer's certificate serial number.
#[derive(Debug, Clone, Default)]
pub struct AuthorityKeyIdentifier {
    pub key_identifier: Option<Vec<u8>>,
    pub authority_cert_issuer: Option<Subject>,
    pub authority_cert_serial_number: Option<Vec<u8>>,
}

impl ToAndFromX509Extension for AuthorityKeyIdentifier {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::AuthorityKeyIdentifier::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CaError> {
        let authority_cert_issuer = self
            .authority_cert_issuer
            .as_ref()
            .map(|issuer| issuer.to_x509_name().map(|n| vec![GeneralName::DirectoryName(n)]))
            .transpose()?;

        let aki = x509_cert::ext::pkix::AuthorityKeyIdentifier {
            key_identifier: self
                .key_identifier
                .as_ref()
                .map(|id| OctetString::new(id.as_slice()))
                .transpose()?,
            authority_cert_issuer,
            authority_cert_serial_number: self
                .authority_cert_serial_number
                .as_ref()
                .map(|sn| SerialNumber::new(sn.as_slice()))
                .transpose()?,
        };

        Ok(aki.to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, CaError> {
        let aki = x509_cert::ext::pkix::AuthorityKeyIdentifier::from_der(extension)?;

        let authority_cert_issuer = aki.authority_cert_issuer.as_ref().and_then(|names| {
            names.iter().find_map(|name| match name {
                GeneralName::DirectoryName(dn) => Some(Subject::from_x509_name(dn)),
                _ => None,
            })
        });

        Ok(Self {
            key_identifier: aki.key_identifier.map(|id| id.as_bytes().to_vec()),
            authority_cert_issuer,
            authority_cert_serial_number: aki
                .authority_cert_serial_number
                .map(|sn| sn.as_bytes().to_vec()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_constraints_encoding_decoding() {
        let original = BasicConstraints {
            is_ca: true,
            max_path_length: Some(3),
        };
        let encoded = original.to_x509_extension_value().unwrap();
        let decoded = BasicConstraints::from_x509_extension_value(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_subject_alt_name_keeps_order_and_kinds() {
        let original = SubjectAltName {
            names: vec![
                GeneralNameParam::Uri("urn:test:app".to_string()),
                GeneralNameParam::Dns("host1".to_string()),
                GeneralNameParam::Ip("10.1.2.3".parse().unwrap()),
                GeneralNameParam::Ip("fe80::1".parse().unwrap()),
            ],
        };
        let encoded = original.to_x509_extension_value().unwrap();
        let decoded = SubjectAltName::from_x509_extension_value(&encoded).unwrap();
        assert_eq!(original.names, decoded.names);
    }

    #[test]
    fn test_authority_key_identifier_encoding_decoding() {
        let original = AuthorityKeyIdentifier {
            key_identifier: Some(vec![1, 2, 3, 4, 5]),
            authority_cert_issuer: Some(Subject::builder().common_name("Test CA").country("US").build()),
            authority_cert_serial_number: Some(vec![6, 7, 8, 9, 10]),
        };
        let encoded = original.to_x509_extension_value().unwrap();
        let decoded = AuthorityKeyIdentifier::from_x509_extension_value(&encoded).unwrap();
        assert_eq!(original.key_identifier, decoded.key_identifier);
        assert_eq!(original.authority_cert_issuer, decoded.authority_cert_issuer);
        assert_eq!(
            original.authority_cert_serial_number,
            decoded.authority_cert_serial_number
        );
    }

    #[test]
    fn test_key_usage_names() {
        let flags = ["digitalSignature", "keyEncipherment"]
            .iter()
            .filter_map(|n| KeyUsage::flag_from_name(n))
            .fold(FlagSet::default(), |acc, f| acc | f);
        let original = KeyUsage(flags);
        let encoded = original.to_x509_extension_value().unwrap();
        let decoded = KeyUsage::from_x509_extension_value(&encoded).unwrap();
        assert_eq!(original, decoded);
        assert!(KeyUsage::flag_from_name("bogus").is_none());
    }

    #[test]
    fn test_extended_key_usage_encoding_decoding() {
        let original = ExtendedKeyUsage {
            usage: vec![
                ExtendedKeyUsageOption::from_name("serverAuth").unwrap(),
                ExtendedKeyUsageOption::ClientAuth,
            ],
        };
        let encoded = original.to_x509_extension_value().unwrap();
        let decoded = ExtendedKeyUsage::from_x509_extension_value(&encoded).unwrap();
        assert_eq!(original.usage, decoded.usage);
        assert_eq!(ExtendedKeyUsageOption::OcspSigning.name(), "OCSPSigning");
    }
}
