//! `${kind.name.output}` references between resource attributes.
//!
//! References are left in declared attributes by the manifest loader and
//! resolved at apply time from the outputs of already-applied resources.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

use crate::resource::{ResourceKey, ResourceKind};

static REFERENCE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-z][a-z-]*)\.([A-Za-z0-9_-]+)\.([A-Za-z_][A-Za-z0-9_]*)\}")
        .expect("reference pattern is valid")
});

/// One reference to an output of another resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeReference {
    pub target: ResourceKey,
    pub output: String,
}

impl fmt::Display for AttributeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.target, self.output)
    }
}

/// All references in `value`, in order of appearance.
///
/// Segments whose first part is not a resource kind (e.g. `${env.HOME}`) are
/// not references.
pub fn find_references(value: &str) -> Vec<AttributeReference> {
    REFERENCE_REGEX
        .captures_iter(value)
        .filter_map(|caps| {
            let kind: ResourceKind = caps[1].parse().ok()?;
            Some(AttributeReference {
                target: ResourceKey::new(kind, &caps[2]),
                output: caps[3].to_string(),
            })
        })
        .collect()
}

/// Substitute every reference in `value` using `lookup`.
///
/// Returns the first reference `lookup` cannot satisfy.
pub fn resolve_references<'a, F>(value: &str, lookup: F) -> Result<String, AttributeReference>
where
    F: Fn(&ResourceKey, &str) -> Option<&'a str>,
{
    let mut missing = None;
    let resolved = REFERENCE_REGEX.replace_all(value, |caps: &regex::Captures| {
        let original = caps[0].to_string();
        let Ok(kind) = caps[1].parse::<ResourceKind>() else {
            return original;
        };
        let target = ResourceKey::new(kind, &caps[2]);
        match lookup(&target, &caps[3]) {
            Some(output) => output.to_string(),
            None => {
                if missing.is_none() {
                    missing = Some(AttributeReference {
                        target,
                        output: caps[3].to_string(),
                    });
                }
                original
            }
        }
    });

    match missing {
        Some(reference) => Err(reference),
        None => Ok(resolved.into_owned()),
    }
}
