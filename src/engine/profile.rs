//! Builds certificate and CRL extensions from a configuration section such as
//! `[ usr_cert ]` or `[ v3_ca ]`.

use der::flagset::FlagSet;
use tracing::debug;
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use crate::cert::extensions::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, ExtendedKeyUsageOption, KeyUsage,
    KeyUsages, SubjectAltName, SubjectKeyIdentifier,
};
use crate::cert::params::{AltNames, ExtensionParam};
use crate::conf::{self, EngineConfig};
use crate::error::{CaError, Result};
use crate::issuer::key_identifier;
use crate::subject::Subject;

/// What the profile needs to know about the certificate being issued.
#[derive(Debug, Clone)]
pub struct ProfileContext<'a> {
    /// Key being certified; `None` when building CRL extensions.
    pub subject_key: Option<&'a SubjectPublicKeyInfoOwned>,
    pub issuer_key_id: Vec<u8>,
    pub issuer_name: Subject,
    pub issuer_serial: Option<u64>,
}

/// Resolves every entry of `section` into an extension, in section order.
pub fn build_extensions(
    config: &EngineConfig,
    section: &str,
    context: &ProfileContext<'_>,
) -> Result<Vec<ExtensionParam>> {
    let entries = config
        .section(section)
        .ok_or_else(|| CaError::ConfigError(format!("missing extension section [{section}]")))?;

    let mut extensions = Vec::new();
    for (name, value) in entries {
        let mut items: Vec<&str> = conf::split_list(value).collect();
        let critical = items.first() == Some(&"critical");
        if critical {
            items.remove(0);
        }
        if let Some(extension) = build_one(name, &items, critical, context)? {
            extensions.push(extension);
        }
    }
    debug!(section, count = extensions.len(), "resolved extension profile");
    Ok(extensions)
}

fn build_one(
    name: &str,
    items: &[&str],
    critical: bool,
    context: &ProfileContext<'_>,
) -> Result<Option<ExtensionParam>> {
    let invalid = |item: &str| CaError::ConfigError(format!("invalid {name} value `{item}`"));

    let extension = match name {
        "basicConstraints" => {
            let mut constraints = BasicConstraints::default();
            for item in items {
                match item.split_once(':') {
                    Some(("CA", flag)) => {
                        constraints.is_ca = flag.eq_ignore_ascii_case("true");
                    }
                    Some(("pathlen", len)) => {
                        constraints.max_path_length = Some(len.parse().map_err(|_| invalid(item))?);
                    }
                    _ => return Err(invalid(item)),
                }
            }
            ExtensionParam::from_extension(constraints, critical)?
        }
        "subjectKeyIdentifier" => {
            let Some(key) = context.subject_key else {
                return Ok(None);
            };
            if items != ["hash"] {
                return Err(invalid(&items.join(",")));
            }
            ExtensionParam::from_extension(SubjectKeyIdentifier(key_identifier(key)), critical)?
        }
        "authorityKeyIdentifier" => {
            let mut aki = AuthorityKeyIdentifier::default();
            for item in items {
                match *item {
                    "keyid" | "keyid:always" => {
                        aki.key_identifier = Some(context.issuer_key_id.clone());
                    }
                    // only used when no key identifier is available
                    "issuer" => {}
                    "issuer:always" => {
                        aki.authority_cert_issuer = Some(context.issuer_name.clone());
                        aki.authority_cert_serial_number = context
                            .issuer_serial
                            .map(|serial| crate::tbs_certificate::serial_number(serial))
                            .transpose()?
                            .map(|serial| serial.as_bytes().to_vec());
                    }
                    other => return Err(invalid(other)),
                }
            }
            ExtensionParam::from_extension(aki, critical)?
        }
        "keyUsage" => {
            let flags = items.iter().try_fold(FlagSet::<KeyUsages>::default(), |flags, item| {
                KeyUsage::flag_from_name(item)
                    .map(|flag| flags | flag)
                    .ok_or_else(|| invalid(item))
            })?;
            ExtensionParam::from_extension(KeyUsage(flags), critical)?
        }
        "extendedKeyUsage" => {
            let usage = items
                .iter()
                .map(|item| ExtendedKeyUsageOption::from_name(item).ok_or_else(|| invalid(item)))
                .collect::<Result<Vec<_>>>()?;
            ExtensionParam::from_extension(ExtendedKeyUsage { usage }, critical)?
        }
        "subjectAltName" => {
            let names = AltNames::parse_general_names(&items.join(","))?;
            if names.is_empty() {
                return Ok(None);
            }
            ExtensionParam::from_extension(SubjectAltName { names }, critical)?
        }
        other => {
            return Err(CaError::ConfigError(format!(
                "unsupported extension `{other}`"
            )));
        }
    };
    Ok(Some(extension))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::params::GeneralNameParam;
    use crate::key::{KeyPair, KeySize};
    use crate::template::{self, TemplateVars};

    fn ca_config(altname: &str) -> EngineConfig {
        let vars = TemplateVars::new()
            .with(template::ROOT_FOLDER, "/tmp/ca")
            .with(template::ALTNAME, altname);
        EngineConfig::parse(&template::render(template::CA_CONFIG_TEMPLATE, &vars).unwrap())
            .unwrap()
    }

    #[test]
    fn test_user_certificate_profile() {
        let key = KeyPair::generate_rsa(KeySize::Bits1024).unwrap();
        let spki = key.as_spki().unwrap();
        let context = ProfileContext {
            subject_key: Some(&spki),
            issuer_key_id: vec![7; 20],
            issuer_name: Subject::parse("/CN=CA").unwrap(),
            issuer_serial: Some(0x1000),
        };
        let config = ca_config("URI:urn:test:app, DNS:host1, IP:10.0.0.1");
        let extensions = build_extensions(&config, "usr_cert", &context).unwrap();
        assert_eq!(extensions.len(), 6);

        let bc: BasicConstraints = extensions[0].to_extension().unwrap();
        assert!(extensions[0].critical);
        assert!(!bc.is_ca);

        let aki: AuthorityKeyIdentifier = extensions[2].to_extension().unwrap();
        assert_eq!(aki.key_identifier, Some(vec![7; 20]));
        assert!(aki.authority_cert_issuer.is_none());

        let san: SubjectAltName = extensions[5].to_extension().unwrap();
        assert_eq!(
            san.names,
            vec![
                GeneralNameParam::Uri("urn:test:app".to_string()),
                GeneralNameParam::Dns("host1".to_string()),
                GeneralNameParam::Ip("10.0.0.1".parse().unwrap()),
            ]
        );
    }

    #[test]
    fn test_ca_profile_and_empty_alt_names() {
        let context = ProfileContext {
            subject_key: None,
            issuer_key_id: vec![1; 20],
            issuer_name: Subject::default(),
            issuer_serial: None,
        };
        let config = ca_config("");
        // no subject key: the subject key identifier is skipped
        let extensions = build_extensions(&config, "v3_ca", &context).unwrap();
        assert_eq!(extensions.len(), 3);
        let bc: BasicConstraints = extensions[1].to_extension().unwrap();
        assert!(bc.is_ca);

        let crl = build_extensions(&config, "crl_ext", &context).unwrap();
        assert_eq!(crl.len(), 1);
    }

    #[test]
    fn test_unknown_names_are_rejected() {
        let config = EngineConfig::parse("[ ext ]\nkeyUsage = fly\n[ other ]\nnsComment = x\n")
            .unwrap();
        let context = ProfileContext {
            subject_key: None,
            issuer_key_id: vec![],
            issuer_name: Subject::default(),
            issuer_serial: None,
        };
        assert!(matches!(
            build_extensions(&config, "ext", &context),
            Err(CaError::ConfigError(_))
        ));
        assert!(build_extensions(&config, "other", &context).is_err());
        assert!(build_extensions(&config, "absent", &context).is_err());
    }
}
