//! # Type System
//!
//! The closed type algebra every operator manipulates: primitive scalars,
//! `pattern`, `enumeration`, `list<T>`, `map<K,V>`, `record`, and `named<T>`.
//! Types are value-semantic, structurally hashable, and cheap to clone;
//! container children sit behind `Arc`.
//!
//! Two relations matter:
//! - **equality** is exact, including attributes and names;
//! - **congruence** ([`Type::congruent`]) compares structure only, ignoring
//!   names and attributes. Congruence is what matches user-declared types
//!   against concrete data.

pub mod arrow;
pub mod print;

pub use print::{parse_type, TypeParseError};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A labelled key/value pair attached to a type.
///
/// Attributes carry semantic hints such as `skip`, `default`, `required`,
/// `opaque` or `internal`. They participate in equality but not in
/// congruence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub value: Option<String>,
}

impl Attribute {
    pub fn flag(key: impl Into<String>) -> Self {
        Attribute {
            key: key.into(),
            value: None,
        }
    }

    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Attribute {
            key: key.into(),
            value: Some(value.into()),
        }
    }
}

/// The top-level constructor of a type, with named wrappers unwrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    Null,
    Bool,
    Int64,
    UInt64,
    Double,
    Duration,
    Time,
    String,
    Blob,
    Ip,
    Subnet,
    Pattern,
    Enumeration,
    List,
    Map,
    Record,
}

impl Kind {
    /// Whether values of this kind order totally and compare with `<`/`>`.
    pub fn is_ordered(&self) -> bool {
        matches!(
            self,
            Kind::Int64
                | Kind::UInt64
                | Kind::Double
                | Kind::Duration
                | Kind::Time
                | Kind::String
                | Kind::Ip
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Kind::Int64 | Kind::UInt64 | Kind::Double)
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Kind::List | Kind::Map | Kind::Record)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Null => "null",
            Kind::Bool => "bool",
            Kind::Int64 => "int64",
            Kind::UInt64 => "uint64",
            Kind::Double => "double",
            Kind::Duration => "duration",
            Kind::Time => "time",
            Kind::String => "string",
            Kind::Blob => "blob",
            Kind::Ip => "ip",
            Kind::Subnet => "subnet",
            Kind::Pattern => "pattern",
            Kind::Enumeration => "enum",
            Kind::List => "list",
            Kind::Map => "map",
            Kind::Record => "record",
        };
        write!(f, "{name}")
    }
}

/// An ordered set of named enum variants. Ordinals are the indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnumerationType {
    variants: Vec<String>,
}

impl EnumerationType {
    /// Constructs an enumeration; variant names must be unique.
    pub fn new(variants: Vec<String>) -> Result<Self, TypeError> {
        for (i, v) in variants.iter().enumerate() {
            if variants[..i].contains(v) {
                return Err(TypeError::DuplicateVariant(v.clone()));
            }
        }
        Ok(EnumerationType { variants })
    }

    pub fn variants(&self) -> &[String] {
        &self.variants
    }

    /// Name → ordinal. The mapping is bijective by construction.
    pub fn ordinal(&self, name: &str) -> Option<u32> {
        self.variants.iter().position(|v| v == name).map(|i| i as u32)
    }

    pub fn name(&self, ordinal: u32) -> Option<&str> {
        self.variants.get(ordinal as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}

/// Key and value types of a map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MapType {
    pub key: Type,
    pub value: Type,
}

/// A named field inside a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: Type,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Field {
            name: name.into(),
            ty,
        }
    }
}

/// An ordered sequence of uniquely named fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordType {
    fields: Vec<Field>,
}

impl RecordType {
    /// Constructs a record; field names must be unique within the record.
    pub fn new(fields: Vec<Field>) -> Result<Self, TypeError> {
        for (i, f) in fields.iter().enumerate() {
            if fields[..i].iter().any(|g| g.name == f.name) {
                return Err(TypeError::DuplicateField(f.name.clone()));
            }
        }
        Ok(RecordType { fields })
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }
}

/// Errors from type construction and lookup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    #[error("duplicate record field name: {0}")]
    DuplicateField(String),
    #[error("duplicate enumeration variant: {0}")]
    DuplicateVariant(String),
    #[error("subnet prefix length {0} exceeds 128")]
    PrefixOutOfRange(u8),
}

/// The type constructor tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    Null,
    Bool,
    Int64,
    UInt64,
    Double,
    Duration,
    Time,
    String,
    Blob,
    Ip,
    Subnet,
    Pattern,
    Enumeration(Arc<EnumerationType>),
    List(Arc<Type>),
    Map(Arc<MapType>),
    Record(Arc<RecordType>),
    /// Any of the above tagged with a fully-qualified name.
    Named(Arc<NamedType>),
}

/// A type together with its name tag, e.g. `"sentra.flow"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamedType {
    pub name: String,
    pub inner: Type,
}

/// A type: a constructor plus zero or more attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Type {
    kind: TypeKind,
    attributes: Vec<Attribute>,
}

impl Default for TypeKind {
    fn default() -> Self {
        TypeKind::Null
    }
}

impl Type {
    pub fn new(kind: TypeKind) -> Self {
        Type {
            kind,
            attributes: Vec::new(),
        }
    }

    // -- constructors --------------------------------------------------------

    pub fn null() -> Self {
        Self::new(TypeKind::Null)
    }

    pub fn bool_() -> Self {
        Self::new(TypeKind::Bool)
    }

    pub fn int64() -> Self {
        Self::new(TypeKind::Int64)
    }

    pub fn uint64() -> Self {
        Self::new(TypeKind::UInt64)
    }

    pub fn double() -> Self {
        Self::new(TypeKind::Double)
    }

    pub fn duration() -> Self {
        Self::new(TypeKind::Duration)
    }

    pub fn time() -> Self {
        Self::new(TypeKind::Time)
    }

    pub fn string() -> Self {
        Self::new(TypeKind::String)
    }

    pub fn blob() -> Self {
        Self::new(TypeKind::Blob)
    }

    pub fn ip() -> Self {
        Self::new(TypeKind::Ip)
    }

    pub fn subnet() -> Self {
        Self::new(TypeKind::Subnet)
    }

    pub fn pattern() -> Self {
        Self::new(TypeKind::Pattern)
    }

    pub fn enumeration(variants: Vec<String>) -> Result<Self, TypeError> {
        Ok(Self::new(TypeKind::Enumeration(Arc::new(
            EnumerationType::new(variants)?,
        ))))
    }

    pub fn list(elem: Type) -> Self {
        Self::new(TypeKind::List(Arc::new(elem)))
    }

    pub fn map(key: Type, value: Type) -> Self {
        Self::new(TypeKind::Map(Arc::new(MapType { key, value })))
    }

    pub fn record(fields: Vec<Field>) -> Result<Self, TypeError> {
        Ok(Self::new(TypeKind::Record(Arc::new(RecordType::new(
            fields,
        )?))))
    }

    /// Tags a type with a fully-qualified name.
    pub fn named(name: impl Into<String>, inner: Type) -> Self {
        Self::new(TypeKind::Named(Arc::new(NamedType {
            name: name.into(),
            inner,
        })))
    }

    /// Attaches an attribute, preserving the ones already present.
    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn with_attributes(mut self, attributes: Vec<Attribute>) -> Self {
        self.attributes.extend(attributes);
        self
    }

    // -- accessors -----------------------------------------------------------

    pub fn type_kind(&self) -> &TypeKind {
        &self.kind
    }

    /// The top-level constructor, looking through named wrappers.
    pub fn kind(&self) -> Kind {
        match &self.kind {
            TypeKind::Null => Kind::Null,
            TypeKind::Bool => Kind::Bool,
            TypeKind::Int64 => Kind::Int64,
            TypeKind::UInt64 => Kind::UInt64,
            TypeKind::Double => Kind::Double,
            TypeKind::Duration => Kind::Duration,
            TypeKind::Time => Kind::Time,
            TypeKind::String => Kind::String,
            TypeKind::Blob => Kind::Blob,
            TypeKind::Ip => Kind::Ip,
            TypeKind::Subnet => Kind::Subnet,
            TypeKind::Pattern => Kind::Pattern,
            TypeKind::Enumeration(_) => Kind::Enumeration,
            TypeKind::List(_) => Kind::List,
            TypeKind::Map(_) => Kind::Map,
            TypeKind::Record(_) => Kind::Record,
            TypeKind::Named(named) => named.inner.kind(),
        }
    }

    /// Iterable view over the attributes of this type.
    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter()
    }

    pub fn attribute(&self, key: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.key == key)
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.attribute(key).is_some()
    }

    /// The name tag, if this is a named type.
    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            TypeKind::Named(named) => Some(&named.name),
            _ => None,
        }
    }

    /// Looks through named wrappers to the underlying structural type.
    pub fn untagged(&self) -> &Type {
        match &self.kind {
            TypeKind::Named(named) => named.inner.untagged(),
            _ => self,
        }
    }

    /// The record type underneath, if the structural type is a record.
    pub fn as_record(&self) -> Option<&RecordType> {
        match &self.untagged().kind {
            TypeKind::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_enumeration(&self) -> Option<&EnumerationType> {
        match &self.untagged().kind {
            TypeKind::Enumeration(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Type> {
        match &self.untagged().kind {
            TypeKind::List(elem) => Some(elem),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&MapType> {
        match &self.untagged().kind {
            TypeKind::Map(map) => Some(map),
            _ => None,
        }
    }

    // -- structural operations ----------------------------------------------

    /// Structural equality ignoring names and attributes.
    pub fn congruent(&self, other: &Type) -> bool {
        let lhs = self.untagged();
        let rhs = other.untagged();
        match (&lhs.kind, &rhs.kind) {
            (TypeKind::Enumeration(a), TypeKind::Enumeration(b)) => a.variants == b.variants,
            (TypeKind::List(a), TypeKind::List(b)) => a.congruent(b),
            (TypeKind::Map(a), TypeKind::Map(b)) => {
                a.key.congruent(&b.key) && a.value.congruent(&b.value)
            }
            (TypeKind::Record(a), TypeKind::Record(b)) => {
                a.num_fields() == b.num_fields()
                    && a.fields()
                        .iter()
                        .zip(b.fields())
                        .all(|(x, y)| x.name == y.name && x.ty.congruent(&y.ty))
            }
            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
        }
    }

    /// The number of leaf columns a slice of this type has.
    ///
    /// Non-record types count as a single leaf.
    pub fn num_leaves(&self) -> usize {
        match self.as_record() {
            Some(record) => record
                .fields()
                .iter()
                .map(|f| match f.ty.as_record() {
                    Some(_) => f.ty.num_leaves(),
                    None => 1,
                })
                .sum(),
            None => 1,
        }
    }

    /// Lazily walks all leaf fields in declaration order.
    ///
    /// Each item carries the leaf field, the index path from the root, and
    /// the flat leaf index.
    pub fn leaves(&self) -> Leaves<'_> {
        let mut stack = Vec::new();
        if let Some(record) = self.as_record() {
            stack.push((record, 0, Vec::new()));
        }
        Leaves {
            stack,
            next_leaf: 0,
        }
    }

    /// Resolves a dotted name path to a leaf field.
    ///
    /// A path `s` matches a full leaf key `a.b.s` iff there is a `.`
    /// boundary before `s` (longest-suffix convention). The first matching
    /// leaf in declaration order wins.
    pub fn resolve(&self, name_path: &str) -> Option<(Field, usize)> {
        if name_path.is_empty() {
            return None;
        }
        for leaf in self.leaves() {
            let key = leaf.key();
            if key == name_path
                || (key.len() > name_path.len()
                    && key.ends_with(name_path)
                    && key.as_bytes()[key.len() - name_path.len() - 1] == b'.')
            {
                return Some((leaf.field.clone(), leaf.leaf_index));
            }
        }
        None
    }
}

/// One step of a [`Type::leaves`] walk.
#[derive(Debug, Clone)]
pub struct Leaf<'a> {
    pub field: &'a Field,
    /// Index path from the root record to this leaf.
    pub path: Vec<usize>,
    /// Flat column index of this leaf.
    pub leaf_index: usize,
    key: String,
}

impl Leaf<'_> {
    /// The full dotted key of this leaf, e.g. `net.src.port`.
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Lazy leaf iterator; see [`Type::leaves`].
pub struct Leaves<'a> {
    stack: Vec<(&'a RecordType, usize, Vec<String>)>,
    next_leaf: usize,
}

impl<'a> Iterator for Leaves<'a> {
    type Item = Leaf<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (record, field_index, prefix) = {
                let frame = self.stack.last_mut()?;
                if frame.1 >= frame.0.num_fields() {
                    self.stack.pop();
                    continue;
                }
                let record: &'a RecordType = frame.0;
                let field_index = frame.1;
                frame.1 += 1;
                (record, field_index, frame.2.clone())
            };
            let field = &record.fields()[field_index];
            if let Some(nested) = field.ty.as_record() {
                let mut next_prefix = prefix;
                next_prefix.push(field.name.clone());
                self.stack.push((nested, 0, next_prefix));
                continue;
            }
            let mut key = prefix.join(".");
            if !key.is_empty() {
                key.push('.');
            }
            key.push_str(&field.name);
            // Every frame's cursor already advanced past the field it
            // descended through, so `cursor - 1` is the index path.
            let path: Vec<usize> = self.stack.iter().map(|(_, i, _)| i - 1).collect();
            let leaf_index = self.next_leaf;
            self.next_leaf += 1;
            return Some(Leaf {
                field,
                path,
                leaf_index,
                key,
            });
        }
    }
}

impl From<TypeKind> for Type {
    fn from(kind: TypeKind) -> Self {
        Type::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow_schema() -> Type {
        Type::named(
            "sentra.flow",
            Type::record(vec![
                Field::new("ts", Type::time()),
                Field::new(
                    "net",
                    Type::record(vec![
                        Field::new("src", Type::ip()),
                        Field::new("port", Type::uint64()),
                    ])
                    .unwrap(),
                ),
                Field::new("msg", Type::string()),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn test_kind_sees_through_named() {
        assert_eq!(flow_schema().kind(), Kind::Record);
        assert_eq!(Type::named("x", Type::ip()).kind(), Kind::Ip);
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let err = Type::record(vec![
            Field::new("a", Type::int64()),
            Field::new("a", Type::string()),
        ])
        .unwrap_err();
        assert_eq!(err, TypeError::DuplicateField("a".into()));
    }

    #[test]
    fn test_enum_ordinals_bijective() {
        let e = EnumerationType::new(vec!["low".into(), "high".into()]).unwrap();
        assert_eq!(e.ordinal("low"), Some(0));
        assert_eq!(e.ordinal("high"), Some(1));
        assert_eq!(e.name(1), Some("high"));
        assert_eq!(e.ordinal("none"), None);
        assert!(EnumerationType::new(vec!["a".into(), "a".into()]).is_err());
    }

    #[test]
    fn test_leaves_order_and_keys() {
        let schema = flow_schema();
        let leaves: Vec<_> = schema.leaves().collect();
        assert_eq!(leaves.len(), 4);
        assert_eq!(leaves[0].key(), "ts");
        assert_eq!(leaves[1].key(), "net.src");
        assert_eq!(leaves[2].key(), "net.port");
        assert_eq!(leaves[3].key(), "msg");
        assert_eq!(leaves[2].leaf_index, 2);
        assert_eq!(schema.num_leaves(), 4);
    }

    #[test]
    fn test_resolve_longest_suffix() {
        let schema = flow_schema();
        let (field, index) = schema.resolve("port").unwrap();
        assert_eq!(field.name, "port");
        assert_eq!(index, 2);
        let (_, index) = schema.resolve("net.src").unwrap();
        assert_eq!(index, 1);
        // `rc` is not at a `.` boundary of `net.src`.
        assert!(schema.resolve("rc").is_none());
        assert!(schema.resolve("missing").is_none());
    }

    #[test]
    fn test_congruence_ignores_names_and_attributes() {
        let a = flow_schema();
        let b = a.untagged().clone();
        assert!(a.congruent(&b));
        let c = b.clone().with_attribute(Attribute::flag("skip"));
        assert!(a.congruent(&c));
        assert_ne!(b, c);
        assert_ne!(a, b);
    }

    #[test]
    fn test_congruence_respects_structure() {
        let a = Type::record(vec![Field::new("x", Type::int64())]).unwrap();
        let b = Type::record(vec![Field::new("x", Type::uint64())]).unwrap();
        assert!(!a.congruent(&b));
        let c = Type::record(vec![Field::new("y", Type::int64())]).unwrap();
        assert!(!a.congruent(&c));
    }

    #[test]
    fn test_attribute_equality() {
        let plain = Type::string();
        let skipped = Type::string().with_attribute(Attribute::flag("skip"));
        assert_ne!(plain, skipped);
        assert!(plain.congruent(&skipped));
        assert!(skipped.has_attribute("skip"));
        assert!(!skipped.has_attribute("default"));
    }
}
