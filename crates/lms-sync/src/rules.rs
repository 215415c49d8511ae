use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct VendorTagRule {
    pub tag: String,
    pub vendors: Vec<String>,
}

/// Static import rules: the category tag, the description suffix and the
/// vendor to department tag table.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportRules {
    pub version: u32,
    #[serde(default)]
    pub category_tag: Option<String>,
    #[serde(default)]
    pub description_suffix: Option<String>,
    #[serde(default)]
    pub vendor_tags: Vec<VendorTagRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorLookup<'a> {
    Tagged(&'a str),
    Untagged,
    Unknown,
}

impl ImportRules {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn vendor_tag(&self, host: &str) -> VendorLookup<'_> {
        let host = host.trim();
        if host.is_empty() {
            return VendorLookup::Unknown;
        }
        self.vendor_tags
            .iter()
            .find(|rule| rule.vendors.iter().any(|v| v.trim().eq_ignore_ascii_case(host)))
            .map(|rule| match rule.tag.trim() {
                "" => VendorLookup::Untagged,
                tag => VendorLookup::Tagged(tag),
            })
            .unwrap_or(VendorLookup::Unknown)
    }

    pub fn description_suffix(&self) -> Option<&str> {
        self.description_suffix
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shipped_rules() -> ImportRules {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/import_rules.yaml");
        ImportRules::from_path(path).expect("shipped rules parse")
    }

    #[test]
    fn shipped_rules_cover_known_vendors() {
        let rules = shipped_rules();
        assert_eq!(rules.category_tag.as_deref(), Some("web-event-categories:training"));
        assert_eq!(rules.vendor_tag("EH&S"), VendorLookup::Tagged("web-depts:AD/AD0303"));
        assert_eq!(
            rules.vendor_tag("  environmental health & safety (eh&s) "),
            VendorLookup::Tagged("web-depts:AD/AD0303")
        );
        assert_eq!(rules.vendor_tag("Fred Hutch"), VendorLookup::Untagged);
        assert_eq!(rules.vendor_tag("Acme Training Co"), VendorLookup::Unknown);
        assert_eq!(rules.vendor_tag(""), VendorLookup::Unknown);
        assert!(rules.description_suffix().expect("suffix").starts_with("<p>"));
    }

    #[test]
    fn optional_sections_default_to_empty() {
        let rules = ImportRules::from_yaml_str("version: 1\n").expect("parse");
        assert!(rules.category_tag.is_none());
        assert!(rules.description_suffix().is_none());
        assert_eq!(rules.vendor_tag("EH&S"), VendorLookup::Unknown);
    }
}
