//! # Table Slices
//!
//! A table slice is an immutable columnar batch of events sharing one
//! schema: a named record type, a row count, and one Arrow array per leaf
//! field. Scalar leaves read straight out of the arrays; container leaves
//! (lists, maps) are materialised once at construction so [`TableSlice::at`]
//! can hand out views uniformly.
//!
//! Slices never mutate: every structural change goes through
//! [`transform_columns`](crate::slice::transform_columns) or
//! [`filter`](crate::slice::filter), both of which produce new slices.

pub mod builder;
mod transform;

pub use builder::SliceBuilder;
pub use transform::{filter, transform_columns, IndexedTransformation};

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, DictionaryArray, DurationNanosecondArray,
    FixedSizeBinaryArray, Float64Array, Int64Array, LargeStringArray, ListArray, MapArray,
    StringArray, StructArray, TimestampNanosecondArray, UInt64Array, UInt8Array,
};
use arrow::datatypes::{Schema as ArrowSchema, UInt32Type};
use arrow::record_batch::RecordBatch;

use crate::data::{Data, DataView, Duration, EnumValue, Ip, Pattern, Subnet, Time};
use crate::types::{Kind, Type};

/// Errors constructing or manipulating table slices.
#[derive(Debug, thiserror::Error)]
pub enum SliceError {
    #[error("slice schema must be a named record type, got `{0}`")]
    SchemaNotNamedRecord(String),
    #[error("expected {expected} leaf columns, got {actual}")]
    ColumnCountMismatch { expected: usize, actual: usize },
    #[error("column {index} has length {actual}, expected {expected}")]
    ColumnLengthMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("column {index} has arrow type {actual}, expected {expected}")]
    ColumnTypeMismatch {
        index: usize,
        expected: String,
        actual: String,
    },
    #[error("filter mask has length {mask}, expected {rows}")]
    MaskLengthMismatch { mask: usize, rows: usize },
    #[error("transformations must be sorted by leaf index and unique, offending index {0}")]
    UnsortedTransformations(usize),
    #[error("leaf index {index} out of bounds for {leaves} leaves")]
    LeafOutOfBounds { index: usize, leaves: usize },
    #[error("row {row} value does not fit column type `{ty}`: {value}")]
    ValueTypeMismatch { row: usize, ty: String, value: String },
    #[error("invalid transformed schema: {0}")]
    InvalidSchema(String),
    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),
}

pub type SliceResult<T> = Result<T, SliceError>;

/// An immutable columnar batch of events sharing one schema.
#[derive(Debug, Clone)]
pub struct TableSlice {
    schema: Type,
    leaf_types: Arc<Vec<Type>>,
    batch: RecordBatch,
    import_time: Option<Time>,
    /// Materialised rows for container-kind leaves, keyed by column index.
    /// Scalar columns read from the Arrow arrays directly.
    container_cache: Arc<HashMap<usize, Vec<Data>>>,
}

impl TableSlice {
    /// Constructs a slice from a schema and one array per leaf column.
    pub fn new(schema: Type, columns: Vec<ArrayRef>) -> SliceResult<Self> {
        if schema.name().is_none() || schema.as_record().is_none() {
            return Err(SliceError::SchemaNotNamedRecord(schema.to_string()));
        }
        let leaf_types: Vec<Type> = schema.leaves().map(|l| l.field.ty.clone()).collect();
        if columns.len() != leaf_types.len() {
            return Err(SliceError::ColumnCountMismatch {
                expected: leaf_types.len(),
                actual: columns.len(),
            });
        }
        let rows = columns.first().map(|c| c.len()).unwrap_or(0);
        for (index, (column, ty)) in columns.iter().zip(&leaf_types).enumerate() {
            if column.len() != rows {
                return Err(SliceError::ColumnLengthMismatch {
                    index,
                    expected: rows,
                    actual: column.len(),
                });
            }
            let expected = ty.to_arrow();
            if column.data_type() != &expected {
                return Err(SliceError::ColumnTypeMismatch {
                    index,
                    expected: expected.to_string(),
                    actual: column.data_type().to_string(),
                });
            }
        }
        Self::assemble(schema, leaf_types, columns, rows)
    }

    /// Like [`TableSlice::new`], but keeps `rows` when every column was
    /// transformed away.
    pub(crate) fn new_with_row_count(
        schema: Type,
        columns: Vec<ArrayRef>,
        rows: usize,
    ) -> SliceResult<Self> {
        if schema.name().is_none() || schema.as_record().is_none() {
            return Err(SliceError::SchemaNotNamedRecord(schema.to_string()));
        }
        let leaf_types: Vec<Type> = schema.leaves().map(|l| l.field.ty.clone()).collect();
        if columns.len() != leaf_types.len() {
            return Err(SliceError::ColumnCountMismatch {
                expected: leaf_types.len(),
                actual: columns.len(),
            });
        }
        Self::assemble(schema, leaf_types, columns, rows)
    }

    fn assemble(
        schema: Type,
        leaf_types: Vec<Type>,
        columns: Vec<ArrayRef>,
        rows: usize,
    ) -> SliceResult<Self> {
        let arrow_fields: Vec<_> = schema
            .leaves()
            .map(|leaf| leaf.field.ty.to_arrow_field(leaf.key()))
            .collect();
        let arrow_schema = Arc::new(ArrowSchema::new(arrow_fields));
        let options = arrow::record_batch::RecordBatchOptions::new().with_row_count(Some(rows));
        let batch = RecordBatch::try_new_with_options(arrow_schema, columns, &options)?;
        let container_cache = build_container_cache(&leaf_types, &batch);
        Ok(TableSlice {
            schema,
            leaf_types: Arc::new(leaf_types),
            batch,
            import_time: None,
            container_cache: Arc::new(container_cache),
        })
    }

    /// The wall-clock moment this batch entered the system, if recorded.
    pub fn import_time(&self) -> Option<Time> {
        self.import_time
    }

    pub fn with_import_time(mut self, import_time: Time) -> Self {
        self.import_time = Some(import_time);
        self
    }

    /// The slice schema; always a named record type.
    pub fn schema(&self) -> &Type {
        &self.schema
    }

    /// The schema name tag.
    pub fn schema_name(&self) -> &str {
        self.schema.name().expect("checked at construction")
    }

    /// The stable fingerprint of the schema; the `#schema_id` meta field.
    pub fn schema_id(&self) -> u64 {
        self.schema.fingerprint()
    }

    pub fn rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn columns(&self) -> usize {
        self.batch.num_columns()
    }

    pub fn is_empty(&self) -> bool {
        self.rows() == 0
    }

    /// The Arrow array backing leaf column `col`.
    pub fn column(&self, col: usize) -> &ArrayRef {
        self.batch.column(col)
    }

    /// The type of leaf column `col`.
    pub fn column_type(&self, col: usize) -> &Type {
        &self.leaf_types[col]
    }

    /// The underlying record batch with flattened leaf columns.
    pub fn record_batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// A view of the value at `(row, col)`.
    ///
    /// # Panics
    /// Panics if `row` or `col` are out of bounds.
    pub fn at(&self, row: usize, col: usize) -> DataView<'_> {
        assert!(row < self.rows(), "row {row} out of bounds");
        if let Some(cache) = self.container_cache.get(&col) {
            return cache[row].as_view();
        }
        scalar_view_at(&self.leaf_types[col], self.batch.column(col), row)
    }

    /// Materialises the value at `(row, col)`.
    pub fn value_at(&self, row: usize, col: usize) -> Data {
        self.at(row, col).materialize()
    }

    /// Materialises one row as field/value pairs in leaf order.
    pub fn row(&self, row: usize) -> Vec<Data> {
        (0..self.columns()).map(|col| self.value_at(row, col)).collect()
    }

    /// A view over a contiguous row range, without copying columns.
    ///
    /// # Panics
    /// Panics if `offset + length > rows()`.
    pub fn subslice(&self, offset: usize, length: usize) -> TableSlice {
        assert!(
            offset + length <= self.rows(),
            "subslice {offset}+{length} exceeds {} rows",
            self.rows()
        );
        let batch = self.batch.slice(offset, length);
        let container_cache = self
            .container_cache
            .iter()
            .map(|(col, values)| (*col, values[offset..offset + length].to_vec()))
            .collect();
        TableSlice {
            schema: self.schema.clone(),
            leaf_types: Arc::clone(&self.leaf_types),
            batch,
            import_time: self.import_time,
            container_cache: Arc::new(container_cache),
        }
    }
}

fn build_container_cache(leaf_types: &[Type], batch: &RecordBatch) -> HashMap<usize, Vec<Data>> {
    let mut cache = HashMap::new();
    for (col, ty) in leaf_types.iter().enumerate() {
        // Pattern and enum values borrow from per-row state the arrays
        // cannot hand out directly, so they take the materialised path too.
        if ty.kind().is_container() || matches!(ty.kind(), Kind::Pattern | Kind::Enumeration) {
            let array = batch.column(col);
            let values = (0..batch.num_rows())
                .map(|row| materialize_at(ty, array.as_ref(), row))
                .collect();
            cache.insert(col, values);
        }
    }
    cache
}

/// A borrowed view of a scalar array value.
///
/// Container kinds go through [`materialize_at`]; the slice pre-materialises
/// them so `at` stays uniform.
fn scalar_view_at<'a>(ty: &Type, array: &'a ArrayRef, row: usize) -> DataView<'a> {
    if array.is_null(row) {
        return DataView::Null;
    }
    match ty.kind() {
        Kind::Null => DataView::Null,
        Kind::Bool => {
            let array = array.as_any().downcast_ref::<BooleanArray>().expect("bool column");
            DataView::Bool(array.value(row))
        }
        Kind::Int64 => {
            let array = array.as_any().downcast_ref::<Int64Array>().expect("int64 column");
            DataView::Int64(array.value(row))
        }
        Kind::UInt64 => {
            let array = array.as_any().downcast_ref::<UInt64Array>().expect("uint64 column");
            DataView::UInt64(array.value(row))
        }
        Kind::Double => {
            let array = array.as_any().downcast_ref::<Float64Array>().expect("double column");
            DataView::Double(array.value(row))
        }
        Kind::Duration => {
            let array = array
                .as_any()
                .downcast_ref::<DurationNanosecondArray>()
                .expect("duration column");
            DataView::Duration(Duration::from_nanos(array.value(row)))
        }
        Kind::Time => {
            let array = array
                .as_any()
                .downcast_ref::<TimestampNanosecondArray>()
                .expect("time column");
            DataView::Time(Time::from_epoch_nanos(array.value(row)))
        }
        Kind::String => {
            let array = array.as_any().downcast_ref::<StringArray>().expect("string column");
            DataView::String(array.value(row))
        }
        Kind::Blob => {
            let array = array.as_any().downcast_ref::<BinaryArray>().expect("blob column");
            DataView::Blob(array.value(row))
        }
        Kind::Ip => {
            let array = array
                .as_any()
                .downcast_ref::<FixedSizeBinaryArray>()
                .expect("ip column");
            let octets: [u8; 16] = array.value(row).try_into().expect("16-byte ip");
            DataView::Ip(Ip::from_octets(octets))
        }
        Kind::Subnet => {
            let array = array.as_any().downcast_ref::<StructArray>().expect("subnet column");
            let network = array
                .column(0)
                .as_any()
                .downcast_ref::<FixedSizeBinaryArray>()
                .expect("subnet network");
            let length = array
                .column(1)
                .as_any()
                .downcast_ref::<UInt8Array>()
                .expect("subnet length");
            let octets: [u8; 16] = network.value(row).try_into().expect("16-byte network");
            let subnet = Subnet::new(
                std::net::IpAddr::V6(std::net::Ipv6Addr::from(octets)),
                length.value(row),
            )
            .expect("stored subnet is valid");
            DataView::Subnet(subnet)
        }
        Kind::Pattern | Kind::Enumeration => {
            unreachable!("pattern/enum columns are cached at construction")
        }
        Kind::List | Kind::Map | Kind::Record => {
            unreachable!("container columns are cached at construction")
        }
    }
}

/// Materialises the value of any supported array at `row`.
pub fn materialize_at(ty: &Type, array: &dyn Array, row: usize) -> Data {
    if array.is_null(row) {
        return Data::Null;
    }
    match ty.kind() {
        Kind::Pattern => {
            let array = array
                .as_any()
                .downcast_ref::<LargeStringArray>()
                .expect("pattern column");
            Data::Pattern(Pattern::new(array.value(row)))
        }
        Kind::Enumeration => {
            let array = array
                .as_any()
                .downcast_ref::<DictionaryArray<UInt32Type>>()
                .expect("enum column");
            let enumeration = ty.as_enumeration().expect("enum type");
            let ordinal = array.keys().value(row);
            match EnumValue::new(Arc::new(enumeration.clone()), ordinal) {
                Some(value) => Data::Enumeration(value),
                None => Data::Null,
            }
        }
        Kind::List => {
            let array = array.as_any().downcast_ref::<ListArray>().expect("list column");
            let elem_ty = ty.as_list().expect("list type");
            let values = array.value(row);
            let elems = (0..values.len())
                .map(|i| materialize_at(elem_ty, values.as_ref(), i))
                .collect();
            Data::List(elems)
        }
        Kind::Map => {
            let array = array.as_any().downcast_ref::<MapArray>().expect("map column");
            let map_ty = ty.as_map().expect("map type");
            let entries = array.value(row);
            let keys = entries.column(0);
            let values = entries.column(1);
            let pairs = (0..entries.len())
                .map(|i| {
                    (
                        materialize_at(&map_ty.key, keys.as_ref(), i),
                        materialize_at(&map_ty.value, values.as_ref(), i),
                    )
                })
                .collect();
            Data::Map(pairs)
        }
        Kind::Record => {
            let array = array.as_any().downcast_ref::<StructArray>().expect("record column");
            let record = ty.as_record().expect("record type");
            let fields = record
                .fields()
                .iter()
                .enumerate()
                .map(|(i, f)| (f.name.clone(), materialize_at(&f.ty, array.column(i).as_ref(), row)))
                .collect();
            Data::Record(fields)
        }
        _ => {
            // Scalar kinds share the view path.
            let array_ref: ArrayRef = make_array_ref(array);
            scalar_view_at(ty, &array_ref, row).materialize()
        }
    }
}

fn make_array_ref(array: &dyn Array) -> ArrayRef {
    arrow::array::make_array(array.to_data())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Field;

    fn test_schema() -> Type {
        Type::named(
            "sentra.test",
            Type::record(vec![
                Field::new("x", Type::int64()),
                Field::new("y", Type::string()),
                Field::new("tags", Type::list(Type::string())),
            ])
            .unwrap(),
        )
    }

    fn test_slice() -> TableSlice {
        let mut builder = SliceBuilder::new(test_schema()).unwrap();
        builder
            .push_row(&[
                Data::Int64(1),
                Data::String("a".into()),
                Data::List(vec![Data::String("t1".into())]),
            ])
            .unwrap();
        builder
            .push_row(&[Data::Int64(2), Data::String("b".into()), Data::Null])
            .unwrap();
        builder
            .push_row(&[Data::Int64(3), Data::Null, Data::List(vec![])])
            .unwrap();
        builder.finish().unwrap()
    }

    #[test]
    fn test_basic_accessors() {
        let slice = test_slice();
        assert_eq!(slice.rows(), 3);
        assert_eq!(slice.columns(), 3);
        assert_eq!(slice.schema_name(), "sentra.test");
        assert_eq!(slice.at(0, 0), DataView::Int64(1));
        assert_eq!(slice.at(1, 1), DataView::String("b"));
        assert_eq!(slice.at(2, 1), DataView::Null);
        assert_eq!(
            slice.value_at(0, 2),
            Data::List(vec![Data::String("t1".into())])
        );
        assert_eq!(slice.value_at(1, 2), Data::Null);
    }

    #[test]
    fn test_subslice_is_zero_copy_view() {
        let slice = test_slice();
        let sub = slice.subslice(1, 2);
        assert_eq!(sub.rows(), 2);
        assert_eq!(sub.at(0, 0), DataView::Int64(2));
        assert_eq!(sub.at(1, 0), DataView::Int64(3));
        assert_eq!(sub.value_at(1, 2), Data::List(vec![]));
        // The original is untouched.
        assert_eq!(slice.rows(), 3);
        assert_eq!(slice.at(0, 0), DataView::Int64(1));
    }

    #[test]
    #[should_panic(expected = "subslice")]
    fn test_subslice_out_of_bounds_panics() {
        test_slice().subslice(2, 2);
    }

    #[test]
    fn test_schema_must_be_named_record() {
        let unnamed = Type::record(vec![Field::new("x", Type::int64())]).unwrap();
        assert!(matches!(
            TableSlice::new(unnamed, vec![]),
            Err(SliceError::SchemaNotNamedRecord(_))
        ));
        let scalar = Type::named("x", Type::int64());
        assert!(matches!(
            TableSlice::new(scalar, vec![]),
            Err(SliceError::SchemaNotNamedRecord(_))
        ));
    }

    #[test]
    fn test_import_time() {
        let t = Time::from_epoch_nanos(42);
        let slice = test_slice().with_import_time(t);
        assert_eq!(slice.import_time(), Some(t));
        assert_eq!(slice.subslice(0, 1).import_time(), Some(t));
    }

    #[test]
    fn test_schema_id_stable() {
        let a = test_slice();
        let b = test_slice();
        assert_eq!(a.schema_id(), b.schema_id());
    }
}
