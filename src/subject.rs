//! Distinguished names in the slash-delimited form used by the engine
//! (`/C=FR/ST=IDF/L=Paris/O=Org/CN=name`).

use std::fmt;
use std::str::FromStr;

use bon::Builder;
use const_oid::ObjectIdentifier;
use der::asn1::SetOfVec;
use der::{Any, Tag};
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::name::{Name, RdnSequence, RelativeDistinguishedName};

use crate::error::{CaError, Result};

const COUNTRY: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.6");
const STATE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.8");
const LOCALITY: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.7");
const ORGANIZATION: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.10");
const ORGANIZATION_UNIT: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.11");
const COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");
const DOMAIN_COMPONENT: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("0.9.2342.19200300.100.1.25");

/// Structured distinguished name.
///
/// All attributes are optional. Serialization uses the fixed order
/// `C, ST, L, O, OU, CN, DC` and omits empty attributes; equality ignores
/// them too, so an attribute set to `""` equals one left unset.
///
/// ```
/// use cakit::subject::Subject;
///
/// let subject: Subject = "/C=FR/O=Example/CN=server".parse().unwrap();
/// assert_eq!(subject.common_name.as_deref(), Some("server"));
/// assert_eq!(subject.to_string(), "/C=FR/O=Example/CN=server");
/// ```
#[derive(Clone, Debug, Default, Builder)]
pub struct Subject {
    #[builder(into)]
    pub common_name: Option<String>,
    #[builder(into)]
    pub organization: Option<String>,
    #[builder(into)]
    pub organization_unit: Option<String>,
    #[builder(into)]
    pub locality: Option<String>,
    #[builder(into)]
    pub state: Option<String>,
    #[builder(into)]
    pub country: Option<String>,
    #[builder(into)]
    pub domain_component: Option<String>,
}

impl Subject {
    /// Parses a slash-delimited distinguished name.
    ///
    /// Every non-empty segment must have the `KEY=VALUE` shape with a single `=`.
    pub fn parse(dn: &str) -> Result<Self> {
        let mut subject = Subject::default();
        for element in dn.split('/').filter(|e| !e.is_empty()) {
            let parts: Vec<&str> = element.split('=').collect();
            if parts.len() != 2 {
                return Err(CaError::FormatError(format!("invalid format for {element}")));
            }
            let value = Some(parts[1].to_string()).filter(|v| !v.is_empty());
            match parts[0].trim() {
                "C" => subject.country = value,
                "ST" => subject.state = value,
                "L" => subject.locality = value,
                "O" => subject.organization = value,
                "OU" => subject.organization_unit = value,
                "CN" => subject.common_name = value,
                "DC" => subject.domain_component = value,
                other => {
                    return Err(CaError::FormatError(format!(
                        "unsupported attribute {other} in {element}"
                    )));
                }
            }
        }
        Ok(subject)
    }

    /// Returns `true` if no attribute is set.
    pub fn is_empty(&self) -> bool {
        self.attributes().next().is_none()
    }

    fn attributes(&self) -> impl Iterator<Item = (&'static str, ObjectIdentifier, &str)> {
        [
            ("C", COUNTRY, &self.country),
            ("ST", STATE, &self.state),
            ("L", LOCALITY, &self.locality),
            ("O", ORGANIZATION, &self.organization),
            ("OU", ORGANIZATION_UNIT, &self.organization_unit),
            ("CN", COMMON_NAME, &self.common_name),
            ("DC", DOMAIN_COMPONENT, &self.domain_component),
        ]
        .into_iter()
        .filter_map(|(key, oid, value)| match value.as_deref() {
            Some(v) if !v.is_empty() => Some((key, oid, v)),
            _ => None,
        })
    }

    /// Converts the subject into an X.509 name, one attribute per RDN, in
    /// serialization order.
    pub fn to_x509_name(&self) -> Result<Name> {
        let mut rdns = Vec::new();
        for (_, oid, value) in self.attributes() {
            let tag = match oid {
                COUNTRY => Tag::PrintableString,
                DOMAIN_COMPONENT => Tag::Ia5String,
                _ => Tag::Utf8String,
            };
            let value = Any::new(tag, value.as_bytes().to_vec())?;
            let atv = AttributeTypeAndValue { oid, value };
            rdns.push(RelativeDistinguishedName(SetOfVec::try_from(vec![atv])?));
        }
        Ok(RdnSequence(rdns))
    }

    /// Builds a subject from an X.509 name. Attributes this type does not model
    /// are skipped.
    pub fn from_x509_name(name: &Name) -> Self {
        let mut subject = Subject::default();
        for rdn in name.0.iter() {
            for attr in rdn.0.iter() {
                let Ok(value) = std::str::from_utf8(attr.value.value()) else {
                    continue;
                };
                let value = Some(value.to_string());
                match attr.oid {
                    COUNTRY => subject.country = value,
                    STATE => subject.state = value,
                    LOCALITY => subject.locality = value,
                    ORGANIZATION => subject.organization = value,
                    ORGANIZATION_UNIT => subject.organization_unit = value,
                    COMMON_NAME => subject.common_name = value,
                    DOMAIN_COMPONENT => subject.domain_component = value,
                    _ => {}
                }
            }
        }
        subject
    }

    /// Reads a subject from a `[ req_distinguished_name ]`-style section, which
    /// may use either long (`commonName`) or short (`CN`) keys.
    pub fn from_config_section<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut subject = Subject::default();
        for (key, value) in entries {
            let value = Some(value.to_string()).filter(|v| !v.is_empty());
            match key {
                "C" | "countryName" => subject.country = value,
                "ST" | "stateOrProvinceName" => subject.state = value,
                "L" | "localityName" => subject.locality = value,
                "O" | "organizationName" => subject.organization = value,
                "OU" | "organizationalUnitName" => subject.organization_unit = value,
                "CN" | "commonName" => subject.common_name = value,
                "DC" | "domainComponent" => subject.domain_component = value,
                _ => {}
            }
        }
        subject
    }
}

impl PartialEq for Subject {
    fn eq(&self, other: &Self) -> bool {
        self.attributes().eq(other.attributes())
    }
}

impl Eq for Subject {}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, _, value) in self.attributes() {
            write!(f, "/{key}={value}")?;
        }
        Ok(())
    }
}

impl FromStr for Subject {
    type Err = CaError;

    fn from_str(s: &str) -> Result<Self> {
        Subject::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_subject() -> Subject {
        Subject::builder()
            .country("FR")
            .state("IDF")
            .locality("Paris")
            .organization("Local PKI Authority")
            .common_name("PKI-CA")
            .domain_component("example")
            .build()
    }

    #[test]
    fn test_subject_parse_to_string_round_trip() {
        let subject = full_subject();
        let text = subject.to_string();
        assert_eq!(
            text,
            "/C=FR/ST=IDF/L=Paris/O=Local PKI Authority/CN=PKI-CA/DC=example"
        );
        assert_eq!(Subject::parse(&text).unwrap(), subject);
    }

    #[test]
    fn test_subject_partial_round_trip() {
        let subject = Subject::builder().common_name("only-cn").build();
        assert_eq!(subject.to_string(), "/CN=only-cn");
        assert_eq!(Subject::parse("/CN=only-cn").unwrap(), subject);
    }

    #[test]
    fn test_subject_omits_empty_fields() {
        let subject = Subject {
            organization: Some(String::new()),
            common_name: Some("x".to_string()),
            ..Default::default()
        };
        assert_eq!(subject.to_string(), "/CN=x");
    }

    #[test]
    fn test_subject_empty_fields_round_trip() {
        let subject = Subject::builder()
            .organization("")
            .common_name("x")
            .build();
        assert_eq!(Subject::parse(&subject.to_string()).unwrap(), subject);

        let parsed = Subject::parse("/O=/CN=x").unwrap();
        assert_eq!(parsed.organization, None);
        assert_eq!(parsed, Subject::builder().common_name("x").build());
        assert_ne!(parsed, Subject::builder().common_name("y").build());
    }

    #[test]
    fn test_subject_parse_rejects_missing_equal_sign() {
        let err = Subject::parse("/C=FR/Paris/CN=x").unwrap_err();
        assert!(matches!(err, CaError::FormatError(_)));
    }

    #[test]
    fn test_subject_parse_rejects_double_equal_sign() {
        let err = Subject::parse("/CN=a=b").unwrap_err();
        assert!(matches!(err, CaError::FormatError(_)));
    }

    #[test]
    fn test_subject_parse_rejects_unknown_key() {
        let err = Subject::parse("/XX=1").unwrap_err();
        assert!(matches!(err, CaError::FormatError(_)));
    }

    #[test]
    fn test_subject_x509_name_round_trip() {
        let subject = full_subject();
        let name = subject.to_x509_name().unwrap();
        assert_eq!(name.0.len(), 6);
        assert_eq!(Subject::from_x509_name(&name), subject);
    }

    #[test]
    fn test_subject_from_config_section() {
        let subject = Subject::from_config_section([
            ("countryName", "FR"),
            ("commonName", "host"),
            ("unknown", "ignored"),
        ]);
        assert_eq!(subject.to_string(), "/C=FR/CN=host");
    }
}
