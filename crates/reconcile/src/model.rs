//! Desired model parsing
//!
//! A desired model is plain text, one directive per line:
//!
//! ```text
//! # web tier
//! install patchbay-agent=2.1
//! install office=16.0 variant=x86
//! install office:spell
//! ```
//!
//! A missing version (or `latest`) means the newest published version. The
//! optional `variant=` pins a variant; otherwise the target's flavor is used.

use crate::error::{Error, Result};
use crate::types::Manifest;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;
use unitrepo::VersionSpec;

static DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^install\s+(?P<name>[^\s=]+)(?:\s*=\s*(?P<version>[^\s=]+))?(?:\s+variant\s*=\s*(?P<variant>\S+))?\s*$",
    )
    .expect("directive pattern is valid")
});

/// One `install` directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    /// Unit name
    pub name: String,
    /// Requested version
    pub version: VersionSpec,
    /// Pinned variant, if any
    pub variant: Option<String>,
    /// Source line (1-indexed, 0 when generated)
    pub line: usize,
}

impl Directive {
    /// Variant to resolve against, falling back to the target's flavor.
    pub fn effective_variant<'a>(&'a self, flavor: &'a str) -> &'a str {
        self.variant.as_deref().unwrap_or(flavor)
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "install {}", self.name)?;
        if let VersionSpec::Exact(version) = &self.version {
            write!(f, "={version}")?;
        }
        if let Some(variant) = &self.variant {
            write!(f, " variant={variant}")?;
        }
        Ok(())
    }
}

/// Ordered list of install directives
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredModel {
    directives: Vec<Directive>,
}

impl DesiredModel {
    /// Parse model text.
    ///
    /// # Errors
    ///
    /// Returns `Error::Model` for an unrecognized line or a unit named twice.
    pub fn parse(text: &str) -> Result<Self> {
        let mut directives = Vec::new();
        let mut seen = HashSet::new();

        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let content = raw.split('#').next().unwrap_or_default().trim();
            if content.is_empty() {
                continue;
            }

            let caps = DIRECTIVE.captures(content).ok_or_else(|| Error::Model {
                line,
                message: format!("expected `install NAME[=VERSION] [variant=V]`, got `{content}`"),
            })?;

            let name = caps["name"].to_string();
            if !seen.insert(name.clone()) {
                return Err(Error::Model {
                    line,
                    message: format!("unit `{name}` is listed more than once"),
                });
            }

            directives.push(Directive {
                name,
                version: VersionSpec::parse(caps.name("version").map(|m| m.as_str())),
                variant: caps.name("variant").map(|m| m.as_str().to_string()),
                line,
            });
        }

        Ok(Self { directives })
    }

    /// Model that pins exactly what a manifest records.
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let directives = manifest
            .entries()
            .iter()
            .map(|entry| Directive {
                name: entry.unit.name.clone(),
                version: VersionSpec::Exact(entry.unit.version.clone()),
                variant: (!entry.unit.variant.is_empty()).then(|| entry.unit.variant.clone()),
                line: 0,
            })
            .collect();
        Self { directives }
    }

    /// Directives in model order
    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    /// Number of directives
    pub fn len(&self) -> usize {
        self.directives.len()
    }

    /// Check if the model is empty
    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    /// Render back to model text, one directive per line.
    pub fn render(&self) -> String {
        self.directives
            .iter()
            .map(|d| format!("{d}\n"))
            .collect()
    }
}

impl fmt::Display for DesiredModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unitrepo::PackageRef;

    #[test]
    fn test_parse_directives() {
        let model = DesiredModel::parse(
            "# web tier\n\
             install patchbay-agent=2.1\n\
             \n\
             install office = 16.0 variant=x86   # pinned\n\
             install office:spell\n\
             install tools=latest\n",
        )
        .unwrap();

        let d = model.directives();
        assert_eq!(d.len(), 4);
        assert_eq!(d[0].name, "patchbay-agent");
        assert_eq!(d[0].version, VersionSpec::Exact("2.1".to_string()));
        assert_eq!(d[0].line, 2);
        assert_eq!(d[1].variant.as_deref(), Some("x86"));
        assert_eq!(d[1].effective_variant("x64"), "x86");
        assert_eq!(d[2].name, "office:spell");
        assert_eq!(d[2].version, VersionSpec::Latest);
        assert_eq!(d[2].effective_variant("x64"), "x64");
        assert_eq!(d[3].version, VersionSpec::Latest);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = DesiredModel::parse("install a=1\nremove b\n").unwrap_err();
        assert!(matches!(err, Error::Model { line: 2, .. }));
    }

    #[test]
    fn test_parse_rejects_duplicates() {
        let err = DesiredModel::parse("install a=1\ninstall a=2\n").unwrap_err();
        match err {
            Error::Model { line, message } => {
                assert_eq!(line, 2);
                assert!(message.contains("`a`"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_from_manifest_renders_pinned_model() {
        let manifest = Manifest::from_units([
            PackageRef::new("agent", "2.0", "x64"),
            PackageRef::new("notes", "1.0", ""),
        ]);
        let model = DesiredModel::from_manifest(&manifest);
        assert_eq!(model.render(), "install agent=2.0 variant=x64\ninstall notes=1.0\n");

        // Rendered text parses back to the same directives
        let reparsed = DesiredModel::parse(&model.render()).unwrap();
        assert_eq!(reparsed.directives()[0].version, VersionSpec::Exact("2.0".into()));
        assert_eq!(reparsed.directives()[1].variant, None);
    }
}
