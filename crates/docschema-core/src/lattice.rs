//! Value type tags and the scalar/union type lattice.
//!
//! [`classify`] maps every runtime [`Value`] to exactly one [`TypeTag`].
//! Field descriptors carry a [`TypeSpec`], either a single tag or a union of
//! tags; specs compare by their tag sets.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::value::Value;

/// Type tag of a document value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TypeTag {
    String,
    Int,
    Double,
    Bool,
    Object,
    Array,
    Date,
    ObjectId,
    Decimal,
    Long,
    Binary,
    Regex,
    Timestamp,
    MinKey,
    MaxKey,
    Code,
    DbPointer,
    Null,
}

impl TypeTag {
    pub const ALL: [TypeTag; 18] = [
        TypeTag::String,
        TypeTag::Int,
        TypeTag::Double,
        TypeTag::Bool,
        TypeTag::Object,
        TypeTag::Array,
        TypeTag::Date,
        TypeTag::ObjectId,
        TypeTag::Decimal,
        TypeTag::Long,
        TypeTag::Binary,
        TypeTag::Regex,
        TypeTag::Timestamp,
        TypeTag::MinKey,
        TypeTag::MaxKey,
        TypeTag::Code,
        TypeTag::DbPointer,
        TypeTag::Null,
    ];

    /// Wire name of the tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeTag::String => "string",
            TypeTag::Int => "int",
            TypeTag::Double => "double",
            TypeTag::Bool => "bool",
            TypeTag::Object => "object",
            TypeTag::Array => "array",
            TypeTag::Date => "date",
            TypeTag::ObjectId => "objectId",
            TypeTag::Decimal => "decimal",
            TypeTag::Long => "long",
            TypeTag::Binary => "binary",
            TypeTag::Regex => "regex",
            TypeTag::Timestamp => "timestamp",
            TypeTag::MinKey => "minKey",
            TypeTag::MaxKey => "maxKey",
            TypeTag::Code => "code",
            TypeTag::DbPointer => "dbPointer",
            TypeTag::Null => "null",
        }
    }

    /// True for tags that are neither containers nor null.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, TypeTag::Array | TypeTag::Object | TypeTag::Null)
    }

    /// True for numeric tags.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            TypeTag::Int | TypeTag::Long | TypeTag::Double | TypeTag::Decimal
        )
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TypeTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TypeTag::ALL
            .iter()
            .copied()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| Error::InvalidData(format!("unknown type tag: {s}")))
    }
}

/// Classify a runtime value. Total and deterministic.
///
/// Checks run most specific first: booleans before integers, 64-bit before
/// 32-bit integers, and objects shaped like a `{$ref, $id}` reference before
/// plain objects. Legacy representations fall back to `string`.
pub fn classify(value: &Value) -> TypeTag {
    match value {
        Value::Null => TypeTag::Null,
        Value::Bool(_) => TypeTag::Bool,
        Value::Int64(_) => TypeTag::Long,
        Value::Int32(_) => TypeTag::Int,
        Value::Double(_) => TypeTag::Double,
        Value::Decimal(_) => TypeTag::Decimal,
        Value::String(_) => TypeTag::String,
        Value::Object(doc) if doc.contains_key("$ref") && doc.contains_key("$id") => {
            TypeTag::DbPointer
        }
        Value::Object(_) => TypeTag::Object,
        Value::Array(_) => TypeTag::Array,
        Value::Date(_) => TypeTag::Date,
        Value::ObjectId(_) => TypeTag::ObjectId,
        Value::Binary(_) => TypeTag::Binary,
        Value::Regex { .. } => TypeTag::Regex,
        Value::Timestamp { .. } => TypeTag::Timestamp,
        Value::MinKey => TypeTag::MinKey,
        Value::MaxKey => TypeTag::MaxKey,
        Value::Code(_) => TypeTag::Code,
        Value::DbPointer { .. } => TypeTag::DbPointer,
        Value::Symbol(_) | Value::Undefined => TypeTag::String,
    }
}

/// A field's declared type: one tag or a union of tags.
///
/// Serialized as a bare tag (`"int"`) or a list (`["int", "string"]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypeSpec {
    Scalar(TypeTag),
    Union(BTreeSet<TypeTag>),
}

impl TypeSpec {
    /// Build a spec from tags, collapsing a single tag to `Scalar`.
    pub fn from_tags(tags: impl IntoIterator<Item = TypeTag>) -> Self {
        let set: BTreeSet<TypeTag> = tags.into_iter().collect();
        if set.len() == 1 {
            if let Some(tag) = set.iter().next() {
                return TypeSpec::Scalar(*tag);
            }
        }
        TypeSpec::Union(set)
    }

    /// The tag set.
    pub fn tags(&self) -> BTreeSet<TypeTag> {
        match self {
            TypeSpec::Scalar(tag) => BTreeSet::from([*tag]),
            TypeSpec::Union(tags) => tags.clone(),
        }
    }

    pub fn contains(&self, tag: TypeTag) -> bool {
        match self {
            TypeSpec::Scalar(t) => *t == tag,
            TypeSpec::Union(tags) => tags.contains(&tag),
        }
    }

    pub fn is_subset_of(&self, other: &TypeSpec) -> bool {
        self.tags().is_subset(&other.tags())
    }

    /// True when `self` contains every tag of `other` and at least one more.
    pub fn is_strict_superset_of(&self, other: &TypeSpec) -> bool {
        let mine = self.tags();
        let theirs = other.tags();
        mine.is_superset(&theirs) && mine.len() > theirs.len()
    }

    /// The single tag, when there is exactly one.
    pub fn single(&self) -> Option<TypeTag> {
        match self {
            TypeSpec::Scalar(tag) => Some(*tag),
            TypeSpec::Union(tags) if tags.len() == 1 => tags.iter().next().copied(),
            TypeSpec::Union(_) => None,
        }
    }

    /// The single tag, when there is exactly one and it is a scalar.
    pub fn single_scalar(&self) -> Option<TypeTag> {
        self.single().filter(TypeTag::is_scalar)
    }

    /// True when the tag set is exactly `{tag}`.
    pub fn is_only(&self, tag: TypeTag) -> bool {
        self.single() == Some(tag)
    }
}

impl PartialEq for TypeSpec {
    fn eq(&self, other: &Self) -> bool {
        self.tags() == other.tags()
    }
}

impl Eq for TypeSpec {}

impl From<TypeTag> for TypeSpec {
    fn from(tag: TypeTag) -> Self {
        TypeSpec::Scalar(tag)
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.single() {
            Some(tag) => write!(f, "{tag}"),
            None => {
                let names: Vec<&str> = self.tags().iter().map(TypeTag::as_str).collect();
                write!(f, "[{}]", names.join(", "))
            }
        }
    }
}
