//! Reader for the materialized engine configuration.
//!
//! Understands the subset of the OpenSSL configuration syntax the bundled
//! templates use: `[ section ]` headers, `key = value` lines, `#` comments,
//! and `$var` / `${var}` / `$section::var` references resolved against
//! earlier keys.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CaError, Result};

const DEFAULT_SECTION: &str = "default";

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    sections: BTreeMap<String, Vec<(String, String)>>,
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| CaError::io(path, e))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut config = EngineConfig::default();
        let mut current = DEFAULT_SECTION.to_string();
        for (number, raw) in text.lines().enumerate() {
            let line = strip_comment(raw).trim();
            if line.is_empty() {
                continue;
            }
            if let Some(header) = line.strip_prefix('[') {
                let name = header
                    .strip_suffix(']')
                    .ok_or_else(|| {
                        CaError::ConfigError(format!("line {}: unterminated section", number + 1))
                    })?
                    .trim();
                current = name.to_string();
                config.sections.entry(current.clone()).or_default();
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                CaError::ConfigError(format!("line {}: expected key = value", number + 1))
            })?;
            let value = config.expand(&current, value.trim())?;
            config
                .sections
                .entry(current.clone())
                .or_default()
                .push((key.trim().to_string(), value));
        }
        Ok(config)
    }

    /// Returns the last value bound to `key` in `section`.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)?
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn require(&self, section: &str, key: &str) -> Result<&str> {
        self.get(section, key).ok_or_else(|| {
            CaError::ConfigError(format!("missing `{key}` in section [{section}]"))
        })
    }

    pub fn require_path(&self, section: &str, key: &str) -> Result<PathBuf> {
        self.require(section, key).map(PathBuf::from)
    }

    /// Entries of a section in file order.
    pub fn section(&self, name: &str) -> Option<&[(String, String)]> {
        self.sections.get(name).map(Vec::as_slice)
    }

    /// Name of the section selected by `[ ca ] default_ca`.
    pub fn default_ca(&self) -> Result<&str> {
        self.require("ca", "default_ca")
    }

    fn expand(&self, section: &str, value: &str) -> Result<String> {
        let mut out = String::with_capacity(value.len());
        let mut rest = value;
        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];
            let (reference, consumed) = if let Some(braced) = after.strip_prefix('{') {
                let end = braced.find('}').ok_or_else(|| {
                    CaError::ConfigError(format!("unterminated variable in `{value}`"))
                })?;
                (&braced[..end], end + 2)
            } else {
                let end = after
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == ':'))
                    .unwrap_or(after.len());
                (&after[..end], end)
            };
            if reference.is_empty() {
                out.push('$');
                rest = after;
                continue;
            }
            let resolved = match reference.split_once("::") {
                Some(("ENV", key)) => std::env::var(key).ok(),
                Some((sect, key)) => self.get(sect, key).map(str::to_string),
                None => self
                    .get(section, reference)
                    .or_else(|| self.get(DEFAULT_SECTION, reference))
                    .map(str::to_string),
            };
            let resolved = resolved.ok_or_else(|| {
                CaError::ConfigError(format!("variable `{reference}` has no value"))
            })?;
            out.push_str(&resolved);
            rest = &after[consumed..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

/// Splits a comma separated value list, trimming each item.
pub fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|item| !item.is_empty())
}
