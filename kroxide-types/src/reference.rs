//! Reference contains the typed `(resourceId, fieldPath)` handle (§3, §4.1) and the
//! reference-view proxy that composition builders use in place of direct field access.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Schema is the sentinel resource id naming the user-supplied spec rather than a composed
/// resource.
pub static SCHEMA_RESOURCE: &str = "__schema__";

/// ResourceId is the stable id of a resource within a composition, or [`SCHEMA_RESOURCE`].
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ResourceId(Arc<str>);

impl ResourceId {
    /// Schema returns the sentinel id naming the user spec.
    pub fn schema() -> Self {
        Self(Arc::from(SCHEMA_RESOURCE))
    }

    /// Is_schema reports whether this id names the user spec rather than a resource.
    pub fn is_schema(&self) -> bool {
        self.0.as_ref() == SCHEMA_RESOURCE
    }

    /// As_str returns the id's textual form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive constructs an id deterministically from `(kind, name, namespace)`, matching the
    /// "missing id is derived deterministically" contract (§6).
    pub fn derive(kind: &str, name: &str, namespace: Option<&str>) -> Self {
        let kind = kind.to_ascii_lowercase();
        match namespace {
            Some(ns) => Self(Arc::from(format!("{kind}-{name}-{ns}"))),
            None => Self(Arc::from(format!("{kind}-{name}"))),
        }
    }
}

impl<S: AsRef<str>> From<S> for ResourceId {
    fn from(s: S) -> Self {
        Self(Arc::from(s.as_ref()))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// FieldSegment is one step of a [`FieldPath`]: either a named member or an array index.
///
/// Array indices are captured structurally as their own variant rather than folded into the
/// name, so "array indices must be captured as `[n]` segments, not `.n.`" (§4.1) is true by
/// construction.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum FieldSegment {
    /// Name is a struct/map member access, e.g. `.status`.
    Name(String),
    /// Index is an array/list access, e.g. `[0]`.
    Index(usize),
}

impl fmt::Display for FieldSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(n) => f.write_str(n),
            Self::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// FieldPath is a dotted path with array indices, e.g. `status.loadBalancer.ingress[0].ip`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct FieldPath(Vec<FieldSegment>);

impl FieldPath {
    /// Root returns the empty path (a reference to the whole resource or schema).
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Field returns a new path extending `self` with a named member access.
    #[must_use]
    pub fn field(&self, name: impl Into<String>) -> Self {
        let mut segs = self.0.clone();
        segs.push(FieldSegment::Name(name.into()));
        Self(segs)
    }

    /// Index returns a new path extending `self` with an array index access.
    #[must_use]
    pub fn index(&self, i: usize) -> Self {
        let mut segs = self.0.clone();
        segs.push(FieldSegment::Index(i));
        Self(segs)
    }

    /// Segments returns the path's segments in access order.
    pub fn segments(&self) -> &[FieldSegment] {
        &self.0
    }

    /// Is_empty reports whether this path names the resource/schema root.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            match seg {
                FieldSegment::Name(_) if i > 0 => {
                    write!(f, ".{seg}")?;
                }
                FieldSegment::Name(_) => write!(f, "{seg}")?,
                FieldSegment::Index(_) => write!(f, "{seg}")?,
            }
        }
        Ok(())
    }
}

/// ParseFieldPathError indicates a field path's textual form could not be parsed.
#[derive(Debug, thiserror::Error)]
#[error("invalid field path segment: {0:?}")]
pub struct ParseFieldPathError(String);

impl FromStr for FieldPath {
    type Err = ParseFieldPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut segs = Vec::new();
        for dotted in s.split('.') {
            let mut rest = dotted;
            loop {
                if let Some(start) = rest.find('[') {
                    let name = &rest[..start];
                    if !name.is_empty() {
                        segs.push(FieldSegment::Name(name.to_string()));
                    }
                    let end = rest[start..]
                        .find(']')
                        .ok_or_else(|| ParseFieldPathError(dotted.to_string()))?
                        + start;
                    let idx: usize = rest[start + 1..end]
                        .parse()
                        .map_err(|_| ParseFieldPathError(dotted.to_string()))?;
                    segs.push(FieldSegment::Index(idx));
                    rest = &rest[end + 1..];
                } else {
                    if !rest.is_empty() {
                        segs.push(FieldSegment::Name(rest.to_string()));
                    }
                    break;
                }
            }
        }
        Ok(Self(segs))
    }
}

/// FieldType is the advisory expected type of a reference's resolved value (§3: `expectedType?`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    /// Boolean value.
    Bool,
    /// Numeric (integer or float) value.
    Number,
    /// String value.
    String,
    /// Any other/unknown shape.
    Object,
}

/// Reference is a typed handle `(resourceId, fieldPath, expectedType?)` (§3).
///
/// Equality and hashing only ever consider `resource_id` and `field_path`: "References are
/// opaque values that compare equal iff both components match" (§3, §4.1).
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct Reference {
    /// ResourceId of the resource (or [`SCHEMA_RESOURCE`]) this reference names.
    pub resource_id: ResourceId,
    /// FieldPath within that resource/schema.
    pub field_path: FieldPath,
    /// ExpectedType, if known, used for advisory validation (§4.2.3) only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_type: Option<FieldType>,
}

impl Reference {
    /// New constructs a reference with no expected type.
    pub fn new(resource_id: impl Into<ResourceId>, field_path: FieldPath) -> Self {
        Self {
            resource_id: resource_id.into(),
            field_path,
            expected_type: None,
        }
    }

    /// Schema constructs a reference into the user spec.
    pub fn schema(field_path: FieldPath) -> Self {
        Self::new(ResourceId::schema(), field_path)
    }

    /// With_type attaches an expected type, for advisory validation.
    #[must_use]
    pub fn with_type(mut self, ty: FieldType) -> Self {
        self.expected_type = Some(ty);
        self
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        self.resource_id == other.resource_id && self.field_path == other.field_path
    }
}
impl Eq for Reference {}

impl std::hash::Hash for Reference {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.resource_id.hash(state);
        self.field_path.hash(state);
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.field_path.is_empty() {
            write!(f, "{}", self.resource_id)
        } else {
            write!(f, "{}.{}", self.resource_id, self.field_path)
        }
    }
}

/// RefView is the magic reference-graph proxy (§4.1): a stateless handle over a path that
/// composition builders navigate with ordinary method calls, and coerce into [`crate::Expr`]
/// nodes through the combinators in [`crate::expr`] rather than through operator overloading
/// (§4.1.1 — Rust cannot overload `==`/`&&`/`||` to return anything but `bool`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RefView {
    reference: Reference,
}

impl RefView {
    /// New constructs a root reference-view over a resource id (or the schema sentinel).
    pub fn new(resource_id: impl Into<ResourceId>) -> Self {
        Self {
            reference: Reference::new(resource_id, FieldPath::root()),
        }
    }

    /// Schema constructs a root reference-view over the user spec.
    pub fn schema() -> Self {
        Self {
            reference: Reference::schema(FieldPath::root()),
        }
    }

    /// Field returns a reference-view for `self.name`. Never fails: accessing a field past the
    /// known schema still produces a reference (§4.1 edge cases — "late-bound").
    #[must_use]
    pub fn field(&self, name: impl Into<String>) -> Self {
        Self {
            reference: Reference {
                resource_id: self.reference.resource_id.clone(),
                field_path: self.reference.field_path.field(name),
                expected_type: None,
            },
        }
    }

    /// Index returns a reference-view for `self[i]`.
    #[must_use]
    pub fn index(&self, i: usize) -> Self {
        Self {
            reference: Reference {
                resource_id: self.reference.resource_id.clone(),
                field_path: self.reference.field_path.index(i),
                expected_type: None,
            },
        }
    }

    /// Reference returns the underlying reference tuple, for debugging/serialisation (§4.1: "A
    /// reference-view is serialisable to its reference tuple for debugging").
    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    /// Into_reference consumes the view, returning its reference.
    pub fn into_reference(self) -> Reference {
        self.reference
    }
}

impl fmt::Display for RefView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.reference, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_determinism() {
        let a = RefView::new("deployment").field("status").field("readyReplicas");
        let b = Reference::new(
            "deployment",
            FieldPath::root().field("status").field("readyReplicas"),
        );
        assert_eq!(*a.reference(), b);
    }

    #[test]
    fn equality_ignores_expected_type() {
        let a = Reference::new("db", FieldPath::root().field("x")).with_type(FieldType::String);
        let b = Reference::new("db", FieldPath::root().field("x"));
        assert_eq!(a, b);
    }

    #[test]
    fn array_indices_are_segments() {
        let path = FieldPath::root().field("ingress").index(0).field("ip");
        assert_eq!(path.to_string(), "ingress[0].ip");
        let parsed: FieldPath = "ingress[0].ip".parse().unwrap();
        assert_eq!(parsed, path);
    }

    #[test]
    fn display_round_trips_nested_array_path() {
        let path: FieldPath = "status.loadBalancer.ingress[0].ip".parse().unwrap();
        assert_eq!(path.to_string(), "status.loadBalancer.ingress[0].ip");
    }
}
