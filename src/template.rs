//! Engine configuration templating.
//!
//! A template is plain text with placeholders. Each variable registered in a
//! [`TemplateVars`] binding map is matched by the patterns `%%NAME%%` and
//! `$ENV::NAME`; every occurrence is replaced by the variable's value.
//! Placeholders with no binding are left untouched.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use regex::{NoExpand, Regex};
use tracing::debug;

use crate::error::{CaError, Result};

/// Configuration template used by a certificate authority.
///
/// Placeholders: `%%ROOT_FOLDER%%` (the CA root directory) and
/// `$ENV::ALTNAME` (the subject alternative names of the current request).
pub const CA_CONFIG_TEMPLATE: &str = include_str!("templates/ca_config.cnf");

/// Minimal configuration allowing a certificate manager to create requests
/// and self-signed certificates. Placeholder: `$ENV::ALTNAME`.
pub const SIMPLE_CONFIG_TEMPLATE: &str = include_str!("templates/simple_config.cnf");

/// Variable name of the root folder placeholder.
pub const ROOT_FOLDER: &str = "ROOT_FOLDER";
/// Variable name of the subject alternative name placeholder.
pub const ALTNAME: &str = "ALTNAME";

/// Explicit name → value bindings substituted into a template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars {
    vars: BTreeMap<String, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a variable.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn placeholder_pattern(name: &str) -> Result<Regex> {
    let name = regex::escape(name);
    Regex::new(&format!(r"(?i)%%{name}%%|\$ENV::{name}\b"))
        .map_err(|e| CaError::InvalidArgument(format!("bad template variable name: {e}")))
}

/// Substitutes every registered variable into the template text.
pub fn render(template: &str, vars: &TemplateVars) -> Result<String> {
    let mut text = template.to_string();
    for (name, value) in vars.iter() {
        let pattern = placeholder_pattern(name)?;
        text = pattern.replace_all(&text, NoExpand(value)).into_owned();
    }
    Ok(text)
}

/// Renders a template file into `destination`. The source file is never
/// modified.
pub fn render_file(source: &Path, destination: &Path, vars: &TemplateVars) -> Result<PathBuf> {
    if !source.exists() {
        return Err(CaError::TemplateMissingError(source.to_path_buf()));
    }
    let template = fs::read_to_string(source).map_err(|e| CaError::io(source, e))?;
    let text = render(&template, vars)?;
    fs::write(destination, text).map_err(|e| CaError::io(destination, e))?;
    debug!(source = %source.display(), destination = %destination.display(), "rendered configuration");
    Ok(destination.to_path_buf())
}

/// Renders `config` into its static sibling `<config>.tmp`, which is the file
/// handed to the engine.
pub fn materialize(config: &Path, vars: &TemplateVars) -> Result<PathBuf> {
    let mut destination = config.as_os_str().to_owned();
    destination.push(".tmp");
    render_file(config, Path::new(&destination), vars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_replaces_every_occurrence() {
        let vars = TemplateVars::new().with(ROOT_FOLDER, "/pki/CA");
        let text = render("dir = %%ROOT_FOLDER%%\nother = %%ROOT_FOLDER%%/x", &vars).unwrap();
        assert_eq!(text, "dir = /pki/CA\nother = /pki/CA/x");
    }

    #[test]
    fn test_render_env_placeholder() {
        let vars = TemplateVars::new().with(ALTNAME, "URI:urn:a, DNS:host");
        let text = render("subjectAltName = $ENV::ALTNAME\n", &vars).unwrap();
        assert_eq!(text, "subjectAltName = URI:urn:a, DNS:host\n");
    }

    #[test]
    fn test_render_leaves_unbound_placeholders() {
        let text = render("a = %%UNKNOWN%% b = $ENV::ALTNAME", &TemplateVars::new()).unwrap();
        assert_eq!(text, "a = %%UNKNOWN%% b = $ENV::ALTNAME");
    }

    #[test]
    fn test_render_does_not_expand_dollar_in_values() {
        let vars = TemplateVars::new().with(ROOT_FOLDER, "$dir/x");
        assert_eq!(render("%%ROOT_FOLDER%%", &vars).unwrap(), "$dir/x");
    }

    #[test]
    fn test_render_file_missing_template() {
        let dir = tempfile::tempdir().unwrap();
        let err = render_file(
            &dir.path().join("absent.cnf"),
            &dir.path().join("out.cnf"),
            &TemplateVars::new(),
        )
        .unwrap_err();
        assert!(matches!(err, CaError::TemplateMissingError(_)));
    }

    #[test]
    fn test_materialize_keeps_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("caconfig.cnf");
        fs::write(&source, "san = $ENV::ALTNAME").unwrap();

        let vars = TemplateVars::new().with(ALTNAME, "DNS:one");
        let output = materialize(&source, &vars).unwrap();
        assert_eq!(output, dir.path().join("caconfig.cnf.tmp"));
        assert_eq!(fs::read_to_string(&output).unwrap(), "san = DNS:one");
        assert_eq!(fs::read_to_string(&source).unwrap(), "san = $ENV::ALTNAME");
    }
}
