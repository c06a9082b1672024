//! Typed attribute values for resource specifications and observed state.
//!
//! Values are scalars, lists, or nested blocks. A value may also be a
//! reference to another resource's attribute, which both carries a
//! dependency edge and is resolved against the referenced resource's
//! remote identifier at execution time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::spec::ResourceId;

/// A typed attribute value.
///
/// Deserialization is untagged so manifest YAML reads naturally: scalars,
/// sequences, and mappings map straight onto the variants. Reference
/// strings in `${type.name.attribute}` form are tried first and fall
/// through to plain strings when they do not match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Reference to another resource's attribute.
    Reference(ResourceRef),
    /// UTF-8 string scalar.
    Str(String),
    /// Signed integer scalar.
    Int(i64),
    /// Boolean scalar.
    Bool(bool),
    /// Ordered list of values. Attributes with set semantics are
    /// compared order-insensitively by the diff engine.
    List(Vec<AttributeValue>),
    /// Nested block of named values.
    Nested(BTreeMap<String, AttributeValue>),
}

impl AttributeValue {
    /// Creates a string value.
    #[must_use]
    pub fn str(value: impl Into<String>) -> Self {
        Self::Str(value.into())
    }

    /// Creates a reference value pointing at another resource's attribute.
    #[must_use]
    pub fn reference(resource: ResourceId, attribute: impl Into<String>) -> Self {
        Self::Reference(ResourceRef {
            resource,
            attribute: attribute.into(),
        })
    }

    /// Returns the referenced resource identifier, if this is a reference.
    #[must_use]
    pub const fn as_reference(&self) -> Option<&ResourceRef> {
        match self {
            Self::Reference(r) => Some(r),
            _ => None,
        }
    }

    /// Returns true if this value is a list.
    #[must_use]
    pub const fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }

    /// Renders the value in a canonical, deterministic form.
    ///
    /// Used for set-membership keys, desired-state hashing, and diff
    /// output. Nested keys render in sorted order.
    #[must_use]
    pub fn canonical(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Reference(r) => r.to_string(),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(Self::canonical).collect();
                format!("[{}]", parts.join(","))
            }
            Self::Nested(map) => {
                let parts: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{k}={}", v.canonical()))
                    .collect();
                format!("{{{}}}", parts.join(","))
            }
        }
    }

    /// Collects every resource referenced anywhere inside this value,
    /// including inside lists and nested blocks.
    pub fn collect_references(&self, out: &mut Vec<ResourceRef>) {
        match self {
            Self::Reference(r) => out.push(r.clone()),
            Self::List(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            Self::Nested(map) => {
                for value in map.values() {
                    value.collect_references(out);
                }
            }
            Self::Str(_) | Self::Int(_) | Self::Bool(_) => {}
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// A reference to another resource's attribute.
///
/// Written in manifests as `${type.name.attribute}`, for example
/// `${security_group.web.id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceRef {
    /// Identifier of the referenced resource.
    pub resource: ResourceId,
    /// Attribute of the referenced resource to resolve.
    pub attribute: String,
}

impl ResourceRef {
    /// Parses a reference from a `${type.name.attribute}` expression.
    ///
    /// # Errors
    ///
    /// Returns an error if the expression is not in reference form or
    /// does not have exactly three dot-separated segments.
    pub fn parse(expression: &str) -> Result<Self, String> {
        let inner = expression
            .strip_prefix("${")
            .and_then(|rest| rest.strip_suffix('}'))
            .ok_or_else(|| format!("not a reference expression: {expression}"))?;

        let parts: Vec<&str> = inner.split('.').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(format!(
                "invalid reference: {expression}. Expected ${{type.name.attribute}}"
            ));
        }

        Ok(Self {
            resource: ResourceId::new(parts[0], parts[1]),
            attribute: parts[2].to_string(),
        })
    }

    /// Returns true if the string looks like a reference expression.
    #[must_use]
    pub fn is_reference_expr(s: &str) -> bool {
        s.starts_with("${") && s.ends_with('}')
    }
}

impl TryFrom<String> for ResourceRef {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ResourceRef> for String {
    fn from(r: ResourceRef) -> Self {
        r.to_string()
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "${{{}.{}.{}}}",
            self.resource.resource_type, self.resource.name, self.attribute
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_parse() {
        let r = ResourceRef::parse("${security_group.web.id}");
        assert!(r.is_ok());
        let r = r.unwrap();
        assert_eq!(r.resource.resource_type, "security_group");
        assert_eq!(r.resource.name, "web");
        assert_eq!(r.attribute, "id");
    }

    #[test]
    fn test_reference_parse_rejects_plain_string() {
        assert!(ResourceRef::parse("img-v1").is_err());
        assert!(ResourceRef::parse("${too.few}").is_err());
        assert!(ResourceRef::parse("${a.b.c.d}").is_err());
    }

    #[test]
    fn test_reference_roundtrip_display() {
        let r = ResourceRef::parse("${vpc.main.id}").unwrap();
        assert_eq!(r.to_string(), "${vpc.main.id}");
    }

    #[test]
    fn test_untagged_yaml_deserialization() {
        let value: AttributeValue = serde_yaml::from_str("\"${vpc.main.id}\"").unwrap();
        assert!(value.as_reference().is_some());

        let value: AttributeValue = serde_yaml::from_str("\"img-v1\"").unwrap();
        assert_eq!(value, AttributeValue::str("img-v1"));

        let value: AttributeValue = serde_yaml::from_str("42").unwrap();
        assert_eq!(value, AttributeValue::Int(42));

        let value: AttributeValue = serde_yaml::from_str("[a, b]").unwrap();
        assert!(value.is_list());
    }

    #[test]
    fn test_canonical_is_deterministic_for_nested() {
        let mut map = BTreeMap::new();
        map.insert("b".to_string(), AttributeValue::Int(2));
        map.insert("a".to_string(), AttributeValue::Int(1));
        let value = AttributeValue::Nested(map);
        assert_eq!(value.canonical(), "{a=1,b=2}");
    }

    #[test]
    fn test_collect_references_recurses() {
        let inner = AttributeValue::reference(ResourceId::new("vpc", "main"), "id");
        let value = AttributeValue::List(vec![inner, AttributeValue::str("sg-plain")]);
        let mut refs = Vec::new();
        value.collect_references(&mut refs);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].resource.name, "main");
    }
}
