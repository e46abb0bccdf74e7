use std::fmt;
use std::net::IpAddr;

use bon::Builder;
use const_oid::ObjectIdentifier;
use der::asn1::OctetString;
use time::{Duration, OffsetDateTime};

use super::extensions::ToAndFromX509Extension;
use crate::error::{CaError, Result};
use crate::subject::Subject;

/// Longest application URI the engine accepts in a subjectAltName.
pub const MAX_APPLICATION_URI_LEN: usize = 64;

/// Default certificate lifetime, in days.
pub const DEFAULT_VALIDITY_DAYS: u32 = 365;

/// Subject alternative names requested for a certificate.
///
/// Rendered in a fixed order: the application URI first, then every DNS name,
/// then every IP address, each group in input order.
///
/// ```
/// use cakit::cert::params::AltNames;
///
/// let names = AltNames {
///     application_uri: Some("urn:test:app".to_string()),
///     dns: vec!["host1".to_string(), "host2".to_string()],
///     ip: vec!["10.0.0.1".to_string()],
/// };
/// assert_eq!(
///     names.to_string(),
///     "URI:urn:test:app, DNS:host1, DNS:host2, IP:10.0.0.1"
/// );
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AltNames {
    pub application_uri: Option<String>,
    pub dns: Vec<String>,
    pub ip: Vec<String>,
}

/// One entry of a subjectAltName extension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GeneralNameParam {
    Uri(String),
    Dns(String),
    Ip(IpAddr),
}

impl fmt::Display for GeneralNameParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneralNameParam::Uri(uri) => write!(f, "URI:{uri}"),
            GeneralNameParam::Dns(dns) => write!(f, "DNS:{dns}"),
            GeneralNameParam::Ip(ip) => write!(f, "IP:{ip}"),
        }
    }
}

impl AltNames {
    /// Ordered subjectAltName entries.
    pub fn entries(&self) -> Vec<String> {
        self.application_uri
            .iter()
            .filter(|uri| !uri.is_empty())
            .map(|uri| format!("URI:{uri}"))
            .chain(self.dns.iter().map(|d| format!("DNS:{d}")))
            .chain(self.ip.iter().map(|ip| format!("IP:{ip}")))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Parses the `URI:..., DNS:..., IP:...` form back into typed names,
    /// keeping the input order.
    pub fn parse_general_names(value: &str) -> Result<Vec<GeneralNameParam>> {
        crate::conf::split_list(value)
            .map(|item| {
                let (kind, name) = item.split_once(':').ok_or_else(|| {
                    CaError::InvalidArgument(format!("invalid subjectAltName entry `{item}`"))
                })?;
                match kind.trim() {
                    "URI" => Ok(GeneralNameParam::Uri(name.to_string())),
                    "DNS" => Ok(GeneralNameParam::Dns(name.to_string())),
                    "IP" => name.parse().map(GeneralNameParam::Ip).map_err(|_| {
                        CaError::InvalidArgument(format!("invalid IP address `{name}`"))
                    }),
                    other => Err(CaError::InvalidArgument(format!(
                        "unsupported subjectAltName type `{other}`"
                    ))),
                }
            })
            .collect()
    }

    /// Checks the constraints the engine enforces before a request is sent.
    pub fn validate(&self) -> Result<()> {
        if let Some(uri) = &self.application_uri {
            if uri.len() > MAX_APPLICATION_URI_LEN {
                return Err(CaError::InvalidArgument(format!(
                    "application URI longer than {MAX_APPLICATION_URI_LEN} characters: {uri}"
                )));
            }
        }
        for ip in &self.ip {
            ip.parse::<IpAddr>()
                .map_err(|_| CaError::InvalidArgument(format!("invalid IP address `{ip}`")))?;
        }
        Ok(())
    }
}

impl fmt::Display for AltNames {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.entries().join(", "))
    }
}

/// Parameters of a certificate issuance.
///
/// # Fields
/// * `application_uri` - The URI placed first in the subjectAltName.
/// * `dns` - DNS names, in order.
/// * `ip` - IP addresses, in order.
/// * `subject` - Subject of the request, when the engine should not take it
///   from its configuration defaults.
/// * `start_date` - Start of validity; now when absent.
/// * `validity` - Lifetime in days.
#[derive(Clone, Debug, Builder)]
pub struct IssueParams {
    #[builder(into)]
    pub application_uri: String,
    #[builder(default)]
    pub dns: Vec<String>,
    #[builder(default)]
    pub ip: Vec<String>,
    pub subject: Option<Subject>,
    pub start_date: Option<OffsetDateTime>,
    #[builder(default = DEFAULT_VALIDITY_DAYS)]
    pub validity: u32,
}

impl IssueParams {
    pub fn alt_names(&self) -> AltNames {
        AltNames {
            application_uri: Some(self.application_uri.clone()),
            dns: self.dns.clone(),
            ip: self.ip.clone(),
        }
    }

    /// Validates the request and returns the alt names and validity window.
    pub fn prepare(&self) -> Result<(AltNames, Validity)> {
        let alt_names = self.alt_names();
        alt_names.validate()?;
        let validity = Validity::starting(self.start_date, self.validity)?;
        Ok((alt_names, validity))
    }
}

/// Last year an X.509 GeneralizedTime can encode.
pub const MAX_YEAR: i32 = 9999;

/// Certificate validity period.
///
/// This struct represents the `notBefore` and `notAfter` fields in a certificate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Validity {
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

impl Validity {
    /// Creates a validity period starting now for the given number of days.
    pub fn for_days(days: u32) -> Result<Self> {
        Self::starting(None, days)
    }

    /// Creates a validity period of `days` days from `start` (now when absent).
    /// Sub-second precision is dropped since X.509 times carry whole seconds.
    pub fn starting(start: Option<OffsetDateTime>, days: u32) -> Result<Self> {
        let start = start.unwrap_or_else(OffsetDateTime::now_utc);
        let not_before = start
            .replace_nanosecond(0)
            .map_err(|e| CaError::InvalidArgument(e.to_string()))?;
        let not_after = not_before
            .checked_add(Duration::days(i64::from(days)))
            .filter(|end| end.year() <= MAX_YEAR)
            .ok_or_else(|| {
                CaError::InvalidArgument(format!(
                    "validity of {days} days ends after the year {MAX_YEAR}"
                ))
            })?;
        Ok(Self {
            not_before,
            not_after,
        })
    }

    pub fn days(&self) -> i64 {
        (self.not_after - self.not_before).whole_days()
    }
}

/// Represents an X.509 extension.
///
/// # Fields
/// * `oid` - The object identifier of the extension.
/// * `critical` - Indicates if the extension is critical.
/// * `value` - The DER-encoded value of the extension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensionParam {
    pub oid: ObjectIdentifier,
    pub critical: bool,
    /// DER-encoded extension value
    pub value: Vec<u8>,
}

impl ExtensionParam {
    /// Creates an `ExtensionParam` from a specific extension.
    pub fn from_extension<E: ToAndFromX509Extension>(extension: E, critical: bool) -> Result<Self> {
        Ok(Self {
            oid: E::OID,
            critical,
            value: extension.to_x509_extension_value()?,
        })
    }

    /// Decodes an `ExtensionParam` into a specific extension.
    pub fn to_extension<E: ToAndFromX509Extension>(&self) -> Result<E> {
        E::from_x509_extension_value(&self.value)
    }

    pub fn to_x509(&self) -> Result<x509_cert::ext::Extension> {
        Ok(x509_cert::ext::Extension {
            extn_id: self.oid,
            critical: self.critical,
            extn_value: OctetString::new(self.value.clone())?,
        })
    }

    pub fn from_x509(ext: &x509_cert::ext::Extension) -> Self {
        Self {
            oid: ext.extn_id,
            critical: ext.critical,
            value: ext.extn_value.as_bytes().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alt_names_order() {
        let names = AltNames {
            application_uri: Some("urn:a".to_string()),
            dns: vec!["z".to_string(), "a".to_string()],
            ip: vec!["192.168.1.2".to_string(), "::1".to_string()],
        };
        assert_eq!(
            names.to_string(),
            "URI:urn:a, DNS:z, DNS:a, IP:192.168.1.2, IP:::1"
        );
        let parsed = AltNames::parse_general_names(&names.to_string()).unwrap();
        assert_eq!(parsed[0], GeneralNameParam::Uri("urn:a".to_string()));
        assert_eq!(parsed[2], GeneralNameParam::Dns("a".to_string()));
        assert_eq!(parsed[4], GeneralNameParam::Ip("::1".parse().unwrap()));
    }

    #[test]
    fn test_alt_names_without_uri() {
        let names = AltNames {
            dns: vec!["only".to_string()],
            ..Default::default()
        };
        assert_eq!(names.to_string(), "DNS:only");
        assert!(AltNames::default().is_empty());
    }

    #[test]
    fn test_application_uri_length_limit() {
        let ok = IssueParams::builder().application_uri("u".repeat(64)).build();
        assert!(ok.prepare().is_ok());
        let too_long = IssueParams::builder().application_uri("u".repeat(65)).build();
        assert!(matches!(
            too_long.prepare(),
            Err(CaError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_validity_window_is_exact() {
        let start = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
            + Duration::milliseconds(250);
        let validity = Validity::starting(Some(start), 10).unwrap();
        assert_eq!(validity.not_after - validity.not_before, Duration::days(10));
        assert_eq!(validity.not_before.nanosecond(), 0);
        assert_eq!(validity.days(), 10);
    }

    #[test]
    fn test_validity_past_year_9999_is_rejected() {
        let err = Validity::starting(None, u32::MAX).unwrap_err();
        assert!(matches!(err, CaError::InvalidArgument(_)));

        let start = time::macros::datetime!(9999-12-01 00:00:00 UTC);
        assert!(Validity::starting(Some(start), 30).is_ok());
        assert!(matches!(
            Validity::starting(Some(start), 31),
            Err(CaError::InvalidArgument(_))
        ));

        let params = IssueParams::builder()
            .application_uri("urn:x")
            .validity(u32::MAX)
            .build();
        assert!(matches!(params.prepare(), Err(CaError::InvalidArgument(_))));
    }

    #[test]
    fn test_issue_params_defaults() {
        let params = IssueParams::builder().application_uri("urn:x").build();
        assert_eq!(params.validity, DEFAULT_VALIDITY_DAYS);
        assert!(params.dns.is_empty());
        assert!(params.start_date.is_none());
    }
}
