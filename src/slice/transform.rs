//! The two slice manipulation primitives: column transformation and row
//! filtering. Both return new slices; inputs are never mutated.

use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray};
use arrow::compute;

use crate::slice::{SliceError, SliceResult, TableSlice};
use crate::types::{Field, RecordType, Type, TypeKind};

/// A function replacing one leaf column with zero or more columns.
///
/// The function sees the original field and array and returns the
/// replacement pairs; returning the inputs unchanged keeps the column.
pub type TransformFn = Box<dyn Fn(&Field, &ArrayRef) -> Vec<(Field, ArrayRef)> + Send + Sync>;

/// A transformation anchored at a leaf column.
pub struct IndexedTransformation {
    pub leaf_index: usize,
    pub transform: TransformFn,
}

impl IndexedTransformation {
    pub fn new(
        leaf_index: usize,
        transform: impl Fn(&Field, &ArrayRef) -> Vec<(Field, ArrayRef)> + Send + Sync + 'static,
    ) -> Self {
        IndexedTransformation {
            leaf_index,
            transform: Box::new(transform),
        }
    }

    /// A transformation that removes its column.
    pub fn drop_column(leaf_index: usize) -> Self {
        Self::new(leaf_index, |_, _| Vec::new())
    }
}

/// Applies an ordered list of column transformations, producing a new slice.
///
/// The list must be sorted by `leaf_index` with no duplicates. Row count is
/// preserved: every replacement array must have the input's length. The
/// schema is rebuilt in place, so replacements of a nested leaf stay at
/// their position inside the enclosing record.
pub fn transform_columns(
    slice: &TableSlice,
    transformations: &[IndexedTransformation],
) -> SliceResult<TableSlice> {
    let leaves = slice.schema().num_leaves();
    for (i, t) in transformations.iter().enumerate() {
        if t.leaf_index >= leaves {
            return Err(SliceError::LeafOutOfBounds {
                index: t.leaf_index,
                leaves,
            });
        }
        if i > 0 && transformations[i - 1].leaf_index >= t.leaf_index {
            return Err(SliceError::UnsortedTransformations(t.leaf_index));
        }
    }
    let rows = slice.rows();
    let mut replaced: Vec<Option<Vec<(Field, ArrayRef)>>> = vec![None; leaves];
    for (leaf, transformation) in slice.schema().leaves().zip(ReplacementCursor::new(transformations))
    {
        if let Some(t) = transformation {
            let replacement = (t.transform)(leaf.field, slice.column(leaf.leaf_index));
            for (_, array) in &replacement {
                if array.len() != rows {
                    return Err(SliceError::ColumnLengthMismatch {
                        index: leaf.leaf_index,
                        expected: rows,
                        actual: array.len(),
                    });
                }
            }
            replaced[leaf.leaf_index] = Some(replacement);
        }
    }
    // Rebuild the nested record and the flat column list together.
    let record = slice.schema().as_record().expect("slice schema is a record");
    let mut columns = Vec::with_capacity(leaves);
    let mut leaf_cursor = 0usize;
    let rebuilt = rebuild_record(slice, record, &replaced, &mut leaf_cursor, &mut columns)?;
    let schema = Type::named(
        slice.schema_name(),
        Type::new(TypeKind::Record(Arc::new(rebuilt))),
    );
    let mut result = TableSlice::new_with_row_count(schema, columns, rows)?;
    if let Some(import_time) = slice.import_time() {
        result = result.with_import_time(import_time);
    }
    Ok(result)
}

/// Pairs each leaf index with its transformation, if any.
struct ReplacementCursor<'a> {
    transformations: &'a [IndexedTransformation],
    next: usize,
    leaf: usize,
}

impl<'a> ReplacementCursor<'a> {
    fn new(transformations: &'a [IndexedTransformation]) -> Self {
        ReplacementCursor {
            transformations,
            next: 0,
            leaf: 0,
        }
    }
}

impl<'a> Iterator for ReplacementCursor<'a> {
    type Item = Option<&'a IndexedTransformation>;

    fn next(&mut self) -> Option<Self::Item> {
        let leaf = self.leaf;
        self.leaf += 1;
        match self.transformations.get(self.next) {
            Some(t) if t.leaf_index == leaf => {
                self.next += 1;
                Some(Some(t))
            }
            _ => Some(None),
        }
    }
}

fn rebuild_record(
    slice: &TableSlice,
    record: &RecordType,
    replaced: &[Option<Vec<(Field, ArrayRef)>>],
    leaf_cursor: &mut usize,
    columns: &mut Vec<ArrayRef>,
) -> SliceResult<RecordType> {
    let mut fields = Vec::with_capacity(record.num_fields());
    for field in record.fields() {
        match field.ty.as_record() {
            Some(nested) => {
                let rebuilt = rebuild_record(slice, nested, replaced, leaf_cursor, columns)?;
                fields.push(Field::new(
                    field.name.clone(),
                    Type::new(TypeKind::Record(Arc::new(rebuilt))),
                ));
            }
            None => {
                let leaf_index = *leaf_cursor;
                *leaf_cursor += 1;
                match &replaced[leaf_index] {
                    Some(replacement) => {
                        for (new_field, new_array) in replacement {
                            fields.push(new_field.clone());
                            columns.push(Arc::clone(new_array));
                        }
                    }
                    None => {
                        fields.push(field.clone());
                        columns.push(Arc::clone(slice.column(leaf_index)));
                    }
                }
            }
        }
    }
    RecordType::new(fields).map_err(|e| SliceError::InvalidSchema(e.to_string()))
}

/// Keeps the rows where `mask` is true; nulls drop.
///
/// Returns `None` when all rows drop out. The mask length must equal the
/// slice row count; anything else violates the filter invariant and is
/// rejected.
pub fn filter(slice: &TableSlice, mask: &BooleanArray) -> SliceResult<Option<TableSlice>> {
    if mask.len() != slice.rows() {
        return Err(SliceError::MaskLengthMismatch {
            mask: mask.len(),
            rows: slice.rows(),
        });
    }
    let selected = mask.true_count();
    if selected == 0 {
        return Ok(None);
    }
    if selected == slice.rows() {
        return Ok(Some(slice.clone()));
    }
    let columns = (0..slice.columns())
        .map(|col| compute::filter(slice.column(col).as_ref(), mask).map_err(SliceError::Arrow))
        .collect::<SliceResult<Vec<_>>>()?;
    let mut result =
        TableSlice::new_with_row_count(slice.schema().clone(), columns, selected)?;
    if let Some(import_time) = slice.import_time() {
        result = result.with_import_time(import_time);
    }
    Ok(Some(result))
}
