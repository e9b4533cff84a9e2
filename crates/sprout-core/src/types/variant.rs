//! Build variants: named options such as `+shared` or `libs=static,shared`.

use crate::error::{SproutError, SproutResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Value of a variant on a spec
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariantValue {
    Bool(bool),
    Values(BTreeSet<String>),
}

impl VariantValue {
    /// Single-valued variant
    pub fn single(value: impl Into<String>) -> Self {
        VariantValue::Values(BTreeSet::from([value.into()]))
    }

    /// Merge two requests for the same variant.
    ///
    /// Booleans must agree; value sets accumulate.
    pub fn intersect(&self, other: &VariantValue, package: &str, name: &str) -> SproutResult<VariantValue> {
        match (self, other) {
            (VariantValue::Bool(a), VariantValue::Bool(b)) if a == b => Ok(self.clone()),
            (VariantValue::Values(a), VariantValue::Values(b)) => {
                Ok(VariantValue::Values(a.union(b).cloned().collect()))
            },
            _ => Err(SproutError::Conflict {
                package: package.to_string(),
                field: format!("variant '{}'", name),
                left: self.render(name),
                right: other.render(name),
            }),
        }
    }

    /// Check if `self` meets the request `other`
    pub fn satisfies(&self, other: &VariantValue) -> bool {
        match (self, other) {
            (VariantValue::Bool(a), VariantValue::Bool(b)) => a == b,
            (VariantValue::Values(a), VariantValue::Values(b)) => a.is_superset(b),
            _ => false,
        }
    }

    /// Render as spec syntax for the variant `name`
    pub fn render(&self, name: &str) -> String {
        match self {
            VariantValue::Bool(true) => format!("+{}", name),
            VariantValue::Bool(false) => format!("~{}", name),
            VariantValue::Values(values) => {
                format!("{}={}", name, values.iter().cloned().collect::<Vec<_>>().join(","))
            },
        }
    }
}

/// The set of values a variant declaration accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllowedValues {
    Bool,
    Values { values: BTreeSet<String>, multi: bool },
}

/// A variant declared by a package definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantDefinition {
    pub name: String,
    pub default: VariantValue,
    pub allowed: AllowedValues,
    pub description: String,
}

impl VariantDefinition {
    /// Boolean variant with a default
    pub fn boolean(name: impl Into<String>, default: bool) -> Self {
        Self {
            name: name.into(),
            default: VariantValue::Bool(default),
            allowed: AllowedValues::Bool,
            description: String::new(),
        }
    }

    /// Variant taking one or more values from `values`
    pub fn values<I, S>(name: impl Into<String>, default: &str, values: I, multi: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            default: VariantValue::single(default),
            allowed: AllowedValues::Values {
                values: values.into_iter().map(Into::into).collect(),
                multi,
            },
            description: String::new(),
        }
    }

    /// Attach a description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Check that `value` is legal for this variant on `package`
    pub fn validate(&self, package: &str, value: &VariantValue) -> SproutResult<()> {
        let invalid = |reason: String| SproutError::InvalidVariant {
            package: package.to_string(),
            variant: self.name.clone(),
            reason,
        };

        match (&self.allowed, value) {
            (AllowedValues::Bool, VariantValue::Bool(_)) => Ok(()),
            (AllowedValues::Bool, VariantValue::Values(_)) => {
                Err(invalid("expected a boolean (+name or ~name)".to_string()))
            },
            (AllowedValues::Values { .. }, VariantValue::Bool(_)) => {
                Err(invalid("expected name=value".to_string()))
            },
            (AllowedValues::Values { values, multi }, VariantValue::Values(requested)) => {
                if let Some(bad) = requested.iter().find(|v| !values.contains(*v)) {
                    return Err(invalid(format!(
                        "value '{}' not in [{}]",
                        bad,
                        values.iter().cloned().collect::<Vec<_>>().join(", ")
                    )));
                }
                if !multi && requested.len() > 1 {
                    return Err(SproutError::unsatisfiable(
                        package,
                        format!("single-valued variant '{}' requested as {}", self.name, value.render(&self.name)),
                    ));
                }
                Ok(())
            },
        }
    }
}

impl fmt::Display for VariantDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (default {})", self.name, self.default.render(&self.name))?;
        if !self.description.is_empty() {
            write!(f, ": {}", self.description)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_intersection() {
        let on = VariantValue::Bool(true);
        assert_eq!(on.intersect(&on, "zlib", "shared").unwrap(), on);
        let err = on.intersect(&VariantValue::Bool(false), "zlib", "shared").unwrap_err();
        assert!(matches!(err, SproutError::Conflict { .. }));
    }

    #[test]
    fn test_values_accumulate() {
        let a = VariantValue::single("static");
        let b = VariantValue::single("shared");
        let merged = a.intersect(&b, "zlib", "libs").unwrap();
        assert_eq!(merged.render("libs"), "libs=shared,static");
        assert!(merged.satisfies(&a));
        assert!(!a.satisfies(&merged));
    }

    #[test]
    fn test_validation() {
        let def = VariantDefinition::values("libs", "shared", ["shared", "static"], false);
        assert!(def.validate("zlib", &VariantValue::single("static")).is_ok());
        assert!(matches!(
            def.validate("zlib", &VariantValue::single("dynamic")),
            Err(SproutError::InvalidVariant { .. })
        ));

        let both = VariantValue::Values(BTreeSet::from(["shared".to_string(), "static".to_string()]));
        assert!(matches!(
            def.validate("zlib", &both),
            Err(SproutError::Unsatisfiable { .. })
        ));

        let flag = VariantDefinition::boolean("pic", true);
        assert!(flag.validate("zlib", &VariantValue::Bool(false)).is_ok());
        assert!(flag.validate("zlib", &VariantValue::single("x")).is_err());
    }
}
