//! Row-oriented construction of table slices.
//!
//! The builder accumulates owned rows and assembles the per-leaf Arrow
//! arrays in one pass at [`SliceBuilder::finish`]. Aggregation output,
//! `put`/`extend` columns and tests all construct slices this way.

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BinaryBuilder, BooleanArray, DictionaryArray, DurationNanosecondArray,
    FixedSizeBinaryBuilder, Float64Array, Int64Array, LargeStringArray, ListArray, MapArray,
    NullArray, StringArray, StructArray, TimestampNanosecondArray, UInt32Array, UInt64Array,
    UInt8Array,
};
use arrow::buffer::{NullBuffer, OffsetBuffer};
use arrow::datatypes::{DataType, Field as ArrowField, UInt32Type};

use crate::data::{Data, Time};
use crate::slice::{SliceError, SliceResult, TableSlice};
use crate::types::{Kind, Type};

/// Builds a [`TableSlice`] from owned rows.
pub struct SliceBuilder {
    schema: Type,
    leaf_types: Vec<Type>,
    /// Column-major accumulation: one value vector per leaf.
    columns: Vec<Vec<Data>>,
    import_time: Option<Time>,
}

impl SliceBuilder {
    pub fn new(schema: Type) -> SliceResult<Self> {
        if schema.name().is_none() || schema.as_record().is_none() {
            return Err(SliceError::SchemaNotNamedRecord(schema.to_string()));
        }
        let leaf_types: Vec<Type> = schema.leaves().map(|l| l.field.ty.clone()).collect();
        let columns = leaf_types.iter().map(|_| Vec::new()).collect();
        Ok(SliceBuilder {
            schema,
            leaf_types,
            columns,
            import_time: None,
        })
    }

    pub fn with_import_time(mut self, import_time: Time) -> Self {
        self.import_time = Some(import_time);
        self
    }

    pub fn rows(&self) -> usize {
        self.columns.first().map(Vec::len).unwrap_or(0)
    }

    /// Appends one row; values are in leaf order and must fit the leaf
    /// types (null fits everything).
    pub fn push_row(&mut self, row: &[Data]) -> SliceResult<()> {
        if row.len() != self.leaf_types.len() {
            return Err(SliceError::ColumnCountMismatch {
                expected: self.leaf_types.len(),
                actual: row.len(),
            });
        }
        for ((value, ty), column) in row.iter().zip(&self.leaf_types).zip(&mut self.columns) {
            if !value_fits(value, ty) {
                return Err(SliceError::ValueTypeMismatch {
                    row: column.len(),
                    ty: ty.to_string(),
                    value: value.to_string(),
                });
            }
            column.push(value.clone());
        }
        Ok(())
    }

    /// Assembles the slice. The builder is consumed.
    pub fn finish(self) -> SliceResult<TableSlice> {
        let rows = self.rows();
        let columns = self
            .leaf_types
            .iter()
            .zip(&self.columns)
            .map(|(ty, values)| build_array(ty, values, rows))
            .collect::<SliceResult<Vec<_>>>()?;
        let mut slice = TableSlice::new(self.schema, columns)?;
        if let Some(import_time) = self.import_time {
            slice = slice.with_import_time(import_time);
        }
        Ok(slice)
    }
}

fn value_fits(value: &Data, ty: &Type) -> bool {
    value.is_null() || value.kind() == ty.kind()
}

/// Builds the Arrow array for `ty` from owned values.
pub fn build_array(ty: &Type, values: &[Data], rows: usize) -> SliceResult<ArrayRef> {
    debug_assert_eq!(values.len(), rows);
    let array: ArrayRef = match ty.kind() {
        Kind::Null => Arc::new(NullArray::new(rows)),
        Kind::Bool => Arc::new(BooleanArray::from(
            values
                .iter()
                .map(|v| match v {
                    Data::Bool(b) => Some(*b),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        Kind::Int64 => Arc::new(Int64Array::from(
            values
                .iter()
                .map(|v| match v {
                    Data::Int64(i) => Some(*i),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        Kind::UInt64 => Arc::new(UInt64Array::from(
            values
                .iter()
                .map(|v| match v {
                    Data::UInt64(u) => Some(*u),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        Kind::Double => Arc::new(Float64Array::from(
            values
                .iter()
                .map(|v| match v {
                    Data::Double(d) => Some(*d),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        Kind::Duration => Arc::new(DurationNanosecondArray::from(
            values
                .iter()
                .map(|v| match v {
                    Data::Duration(d) => Some(d.as_nanos()),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        Kind::Time => Arc::new(TimestampNanosecondArray::from(
            values
                .iter()
                .map(|v| match v {
                    Data::Time(t) => Some(t.as_epoch_nanos()),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        Kind::String => Arc::new(StringArray::from(
            values
                .iter()
                .map(|v| match v {
                    Data::String(s) => Some(s.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        Kind::Pattern => Arc::new(LargeStringArray::from(
            values
                .iter()
                .map(|v| match v {
                    Data::Pattern(p) => Some(p.source()),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        Kind::Blob => {
            let mut builder = BinaryBuilder::new();
            for value in values {
                match value {
                    Data::Blob(bytes) => builder.append_value(bytes),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        Kind::Ip => {
            let mut builder = FixedSizeBinaryBuilder::new(16);
            for value in values {
                match value {
                    Data::Ip(ip) => builder
                        .append_value(ip.octets())
                        .expect("16-byte value fits"),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        Kind::Subnet => {
            let mut network = FixedSizeBinaryBuilder::new(16);
            let mut length = Vec::with_capacity(rows);
            let mut validity = Vec::with_capacity(rows);
            for value in values {
                match value {
                    Data::Subnet(net) => {
                        network
                            .append_value(net.network().octets())
                            .expect("16-byte value fits");
                        length.push(Some(net.length()));
                        validity.push(true);
                    }
                    _ => {
                        network.append_null();
                        length.push(None);
                        validity.push(false);
                    }
                }
            }
            let fields = vec![
                ArrowField::new("network", DataType::FixedSizeBinary(16), true),
                ArrowField::new("length", DataType::UInt8, true),
            ];
            Arc::new(StructArray::new(
                fields.into(),
                vec![
                    Arc::new(network.finish()) as ArrayRef,
                    Arc::new(UInt8Array::from(length)) as ArrayRef,
                ],
                Some(NullBuffer::from(validity)),
            ))
        }
        Kind::Enumeration => {
            let enumeration = ty.as_enumeration().expect("enum type");
            let keys = UInt32Array::from(
                values
                    .iter()
                    .map(|v| match v {
                        Data::Enumeration(e) => Some(e.ordinal()),
                        _ => None,
                    })
                    .collect::<Vec<_>>(),
            );
            let dictionary: ArrayRef = Arc::new(StringArray::from(
                enumeration
                    .variants()
                    .iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>(),
            ));
            Arc::new(
                DictionaryArray::<UInt32Type>::try_new(keys, dictionary)
                    .map_err(SliceError::Arrow)?,
            )
        }
        Kind::List => {
            let elem_ty = ty.as_list().expect("list type");
            let mut flattened = Vec::new();
            let mut lengths = Vec::with_capacity(rows);
            let mut validity = Vec::with_capacity(rows);
            for value in values {
                match value {
                    Data::List(elems) => {
                        lengths.push(elems.len());
                        validity.push(true);
                        flattened.extend(elems.iter().cloned());
                    }
                    _ => {
                        lengths.push(0);
                        validity.push(false);
                    }
                }
            }
            let child = build_array(elem_ty, &flattened, flattened.len())?;
            let field = Arc::new(elem_ty.to_arrow_field("item"));
            Arc::new(ListArray::new(
                field,
                OffsetBuffer::from_lengths(lengths),
                child,
                Some(NullBuffer::from(validity)),
            ))
        }
        Kind::Map => {
            let map_ty = ty.as_map().expect("map type");
            let mut keys = Vec::new();
            let mut vals = Vec::new();
            let mut lengths = Vec::with_capacity(rows);
            let mut validity = Vec::with_capacity(rows);
            for value in values {
                match value {
                    Data::Map(entries) => {
                        lengths.push(entries.len());
                        validity.push(true);
                        for (k, v) in entries {
                            keys.push(k.clone());
                            vals.push(v.clone());
                        }
                    }
                    _ => {
                        lengths.push(0);
                        validity.push(false);
                    }
                }
            }
            let key_array = build_array(&map_ty.key, &keys, keys.len())?;
            let value_array = build_array(&map_ty.value, &vals, vals.len())?;
            let entry_fields = vec![
                map_ty.key.to_arrow_field("key").with_nullable(false),
                map_ty.value.to_arrow_field("value"),
            ];
            let entries = StructArray::new(
                entry_fields.clone().into(),
                vec![key_array, value_array],
                None,
            );
            let entries_field = Arc::new(ArrowField::new(
                "entries",
                DataType::Struct(entry_fields.into()),
                false,
            ));
            Arc::new(MapArray::new(
                entries_field,
                OffsetBuffer::from_lengths(lengths),
                entries,
                Some(NullBuffer::from(validity)),
                false,
            ))
        }
        Kind::Record => {
            let record = ty.as_record().expect("record type");
            let mut children = Vec::with_capacity(record.num_fields());
            let mut validity = Vec::with_capacity(rows);
            for value in values {
                validity.push(matches!(value, Data::Record(_)));
            }
            for (index, field) in record.fields().iter().enumerate() {
                let child_values: Vec<Data> = values
                    .iter()
                    .map(|v| match v {
                        Data::Record(fields) => fields
                            .get(index)
                            .map(|(_, value)| value.clone())
                            .unwrap_or(Data::Null),
                        _ => Data::Null,
                    })
                    .collect();
                children.push(build_array(&field.ty, &child_values, rows)?);
            }
            let fields: Vec<ArrowField> = record
                .fields()
                .iter()
                .map(|f| f.ty.to_arrow_field(&f.name))
                .collect();
            Arc::new(StructArray::new(
                fields.into(),
                children,
                Some(NullBuffer::from(validity)),
            ))
        }
    };
    Ok(array)
}
