//! Round-trip between the type algebra and Arrow data types.
//!
//! Every type maps to exactly one Arrow `DataType`. Information that Arrow
//! cannot express structurally (name tags, attributes, enumeration
//! variants) is embedded as field metadata under the reserved `sentra.`
//! namespace, so the field-level round-trip is bit-exact:
//! `from_arrow_field(to_arrow_field(t, n)) == t`.

use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field as ArrowField, TimeUnit};

use super::{Attribute, Field, Type, TypeKind};

/// Metadata key carrying the name tag of a named type.
const META_NAME: &str = "sentra.name";
/// Metadata key carrying the enumeration variants as a JSON array.
const META_ENUM: &str = "sentra.enum";
/// Metadata key prefix for type attributes; the attribute key follows.
const META_ATTR_PREFIX: &str = "sentra.attr:";
/// Sentinel value for flag attributes without a value.
const META_FLAG: &str = "\u{0}";
const META_FLAG_CHAR: char = '\u{0}';

/// Errors converting between the type algebra and Arrow.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ArrowConvertError {
    #[error("unsupported arrow data type: {0}")]
    Unsupported(String),
    #[error("dictionary column without `{META_ENUM}` metadata")]
    MissingEnumVariants,
    #[error("malformed `{key}` metadata: {message}")]
    MalformedMetadata { key: String, message: String },
}

impl Type {
    /// The Arrow data type this type stores as.
    pub fn to_arrow(&self) -> DataType {
        match self.type_kind() {
            TypeKind::Null => DataType::Null,
            TypeKind::Bool => DataType::Boolean,
            TypeKind::Int64 => DataType::Int64,
            TypeKind::UInt64 => DataType::UInt64,
            TypeKind::Double => DataType::Float64,
            TypeKind::Duration => DataType::Duration(TimeUnit::Nanosecond),
            TypeKind::Time => DataType::Timestamp(TimeUnit::Nanosecond, None),
            TypeKind::String => DataType::Utf8,
            TypeKind::Blob => DataType::Binary,
            TypeKind::Ip => DataType::FixedSizeBinary(16),
            TypeKind::Subnet => DataType::Struct(
                vec![
                    ArrowField::new("network", DataType::FixedSizeBinary(16), true),
                    ArrowField::new("length", DataType::UInt8, true),
                ]
                .into(),
            ),
            TypeKind::Pattern => DataType::LargeUtf8,
            TypeKind::Enumeration(_) => {
                DataType::Dictionary(Box::new(DataType::UInt32), Box::new(DataType::Utf8))
            }
            TypeKind::List(elem) => DataType::List(Arc::new(elem.to_arrow_field("item"))),
            TypeKind::Map(map) => {
                let entries = ArrowField::new(
                    "entries",
                    DataType::Struct(
                        vec![
                            map.key.to_arrow_field("key").with_nullable(false),
                            map.value.to_arrow_field("value"),
                        ]
                        .into(),
                    ),
                    false,
                );
                DataType::Map(Arc::new(entries), false)
            }
            TypeKind::Record(record) => DataType::Struct(
                record
                    .fields()
                    .iter()
                    .map(|f| f.ty.to_arrow_field(&f.name))
                    .collect::<Vec<_>>()
                    .into(),
            ),
            TypeKind::Named(named) => named.inner.to_arrow(),
        }
    }

    /// An Arrow field for this type, with tags, attributes and enum
    /// variants preserved as metadata.
    pub fn to_arrow_field(&self, name: &str) -> ArrowField {
        let mut metadata = HashMap::new();
        let mut current = self;
        // Collect wrapper names outermost-first; nesting named types is
        // rare, so a single metadata slot holds the chain joined by '\u{0}'.
        let mut names = Vec::new();
        loop {
            for attr in current.attributes() {
                metadata.insert(
                    format!("{META_ATTR_PREFIX}{}", attr.key),
                    attr.value.clone().unwrap_or_else(|| META_FLAG.to_string()),
                );
            }
            match current.type_kind() {
                TypeKind::Named(named) => {
                    names.push(named.name.clone());
                    current = &named.inner;
                }
                _ => break,
            }
        }
        if !names.is_empty() {
            metadata.insert(META_NAME.to_string(), names.join(META_FLAG));
        }
        if let Some(e) = current.as_enumeration() {
            metadata.insert(
                META_ENUM.to_string(),
                serde_json::to_string(e.variants()).expect("variant names serialize"),
            );
        }
        ArrowField::new(name, self.to_arrow(), true).with_metadata(metadata)
    }

    /// Recovers a type from a bare Arrow data type.
    ///
    /// Without field metadata, name tags and attributes are lost and
    /// dictionary columns cannot recover their variants; use
    /// [`Type::from_arrow_field`] for the exact inverse.
    pub fn from_arrow(datatype: &DataType) -> Result<Type, ArrowConvertError> {
        match datatype {
            DataType::Null => Ok(Type::null()),
            DataType::Boolean => Ok(Type::bool_()),
            DataType::Int64 => Ok(Type::int64()),
            DataType::UInt64 => Ok(Type::uint64()),
            DataType::Float64 => Ok(Type::double()),
            DataType::Duration(TimeUnit::Nanosecond) => Ok(Type::duration()),
            DataType::Timestamp(TimeUnit::Nanosecond, None) => Ok(Type::time()),
            DataType::Utf8 => Ok(Type::string()),
            DataType::Binary => Ok(Type::blob()),
            DataType::FixedSizeBinary(16) => Ok(Type::ip()),
            DataType::LargeUtf8 => Ok(Type::pattern()),
            DataType::Dictionary(_, _) => Err(ArrowConvertError::MissingEnumVariants),
            DataType::List(field) => Ok(Type::list(Type::from_arrow_field(field)?)),
            DataType::Map(entries, _) => match entries.data_type() {
                DataType::Struct(kv) if kv.len() == 2 => Ok(Type::map(
                    Type::from_arrow_field(&kv[0])?,
                    Type::from_arrow_field(&kv[1])?,
                )),
                other => Err(ArrowConvertError::Unsupported(format!(
                    "map entries must be a two-field struct, got {other}"
                ))),
            },
            DataType::Struct(fields) => {
                if is_subnet_struct(fields) {
                    return Ok(Type::subnet());
                }
                let fields = fields
                    .iter()
                    .map(|f| Ok(Field::new(f.name(), Type::from_arrow_field(f)?)))
                    .collect::<Result<Vec<_>, ArrowConvertError>>()?;
                Type::record(fields)
                    .map_err(|e| ArrowConvertError::Unsupported(e.to_string()))
            }
            other => Err(ArrowConvertError::Unsupported(other.to_string())),
        }
    }

    /// The exact inverse of [`Type::to_arrow_field`].
    pub fn from_arrow_field(field: &ArrowField) -> Result<Type, ArrowConvertError> {
        let metadata = field.metadata();
        let mut ty = match field.data_type() {
            DataType::Dictionary(_, _) => {
                let raw = metadata
                    .get(META_ENUM)
                    .ok_or(ArrowConvertError::MissingEnumVariants)?;
                let variants: Vec<String> = serde_json::from_str(raw).map_err(|e| {
                    ArrowConvertError::MalformedMetadata {
                        key: META_ENUM.to_string(),
                        message: e.to_string(),
                    }
                })?;
                Type::enumeration(variants)
                    .map_err(|e| ArrowConvertError::MalformedMetadata {
                        key: META_ENUM.to_string(),
                        message: e.to_string(),
                    })?
            }
            other => Type::from_arrow(other)?,
        };
        if let Some(names) = metadata.get(META_NAME) {
            for name in names.split(META_FLAG_CHAR).rev() {
                ty = Type::named(name, ty);
            }
        }
        let mut attrs: Vec<Attribute> = metadata
            .iter()
            .filter_map(|(k, v)| {
                let key = k.strip_prefix(META_ATTR_PREFIX)?;
                Some(Attribute {
                    key: key.to_string(),
                    value: (v != META_FLAG).then(|| v.clone()),
                })
            })
            .collect();
        // HashMap iteration order is arbitrary; canonicalise.
        attrs.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(ty.with_attributes(attrs))
    }

    /// A stable 64-bit fingerprint of the canonical structural encoding.
    ///
    /// Two types share a fingerprint iff they are equal (names, kinds,
    /// children and attributes in declaration order all participate).
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = Fnv1a::default();
        hash_type(self, &mut hasher);
        hasher.finish()
    }
}

fn is_subnet_struct(fields: &arrow::datatypes::Fields) -> bool {
    fields.len() == 2
        && fields[0].name() == "network"
        && fields[0].data_type() == &DataType::FixedSizeBinary(16)
        && fields[1].name() == "length"
        && fields[1].data_type() == &DataType::UInt8
}

/// FNV-1a, fixed offset basis and prime; stable across platforms and runs.
struct Fnv1a(u64);

impl Default for Fnv1a {
    fn default() -> Self {
        Fnv1a(0xcbf2_9ce4_8422_2325)
    }
}

impl Hasher for Fnv1a {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= u64::from(b);
            self.0 = self.0.wrapping_mul(0x0000_0100_0000_01b3);
        }
    }
}

fn hash_str(s: &str, hasher: &mut Fnv1a) {
    hasher.write(&(s.len() as u64).to_le_bytes());
    hasher.write(s.as_bytes());
}

fn hash_type(ty: &Type, hasher: &mut Fnv1a) {
    // Constructor tag.
    let tag: u8 = match ty.type_kind() {
        TypeKind::Null => 0,
        TypeKind::Bool => 1,
        TypeKind::Int64 => 2,
        TypeKind::UInt64 => 3,
        TypeKind::Double => 4,
        TypeKind::Duration => 5,
        TypeKind::Time => 6,
        TypeKind::String => 7,
        TypeKind::Blob => 8,
        TypeKind::Ip => 9,
        TypeKind::Subnet => 10,
        TypeKind::Pattern => 11,
        TypeKind::Enumeration(_) => 12,
        TypeKind::List(_) => 13,
        TypeKind::Map(_) => 14,
        TypeKind::Record(_) => 15,
        TypeKind::Named(_) => 16,
    };
    hasher.write(&[tag]);
    match ty.type_kind() {
        TypeKind::Enumeration(e) => {
            hasher.write(&(e.len() as u64).to_le_bytes());
            for v in e.variants() {
                hash_str(v, hasher);
            }
        }
        TypeKind::List(elem) => hash_type(elem, hasher),
        TypeKind::Map(map) => {
            hash_type(&map.key, hasher);
            hash_type(&map.value, hasher);
        }
        TypeKind::Record(record) => {
            hasher.write(&(record.num_fields() as u64).to_le_bytes());
            for field in record.fields() {
                hash_str(&field.name, hasher);
                hash_type(&field.ty, hasher);
            }
        }
        TypeKind::Named(named) => {
            hash_str(&named.name, hasher);
            hash_type(&named.inner, hasher);
        }
        _ => {}
    }
    let attrs: Vec<_> = ty.attributes().collect();
    hasher.write(&(attrs.len() as u64).to_le_bytes());
    for attr in attrs {
        hash_str(&attr.key, hasher);
        match &attr.value {
            Some(v) => {
                hasher.write(&[1]);
                hash_str(v, hasher);
            }
            None => hasher.write(&[0]),
        }
    }
}
