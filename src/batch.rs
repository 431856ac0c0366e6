use half::f16;
use ndarray::{stack, Array1, Array2, Array3, Axis};

use crate::{
    data::dataset::{FieldColumn, RawBatch},
    error::{FinetuneError, Result},
};

pub const FIELD_TEXT: &str = "text";
pub const FIELD_TYPES: &str = "types";
pub const FIELD_LABEL: &str = "label";
pub const FIELD_PADDING_MASK: &str = "padding_mask";

/// The attention mask in the precision the model runs at.
#[derive(Debug, Clone, PartialEq)]
pub enum AttentionMask {
    F32(Array2<f32>),
    F16(Array2<f16>),
}

/// The tensors one model step consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelBatch {
    /// `[batch, seq]` token ids.
    pub tokens: Array2<i64>,
    /// `[batch, seq]` segment ids.
    pub segment_ids: Array2<i64>,
    /// `[batch]` class labels.
    pub labels: Array1<i64>,
    /// `[batch, seq, 2]`: primary position index stacked with the
    /// block-relative index along a new trailing axis.
    pub position_ids: Array3<i64>,
    pub attention_mask: AttentionMask,
}

impl ModelBatch {
    #[inline]
    pub fn batch_size(&self) -> usize {
        self.tokens.nrows()
    }

    #[inline]
    pub fn seq_len(&self) -> usize {
        self.tokens.ncols()
    }
}

/// Converts a collated raw batch into model tensors.
///
/// Synthesizes position ids (primary `0..seq` plus an all-zero block
/// index) and casts the attention mask to f16 when `reduced_precision`
/// is set.
///
/// # Errors
/// `MalformedBatch` if a required field is absent, record counts differ
/// across fields, or sequence lengths are ragged.
pub fn materialize(batch: &RawBatch, reduced_precision: bool) -> Result<ModelBatch> {
    let tokens = int_matrix(batch, FIELD_TEXT)?;
    let records = tokens.nrows();
    let seq_len = tokens.ncols();
    if records == 0 {
        return Err(malformed(FIELD_TEXT, "batch holds no records"));
    }

    let segment_ids = int_matrix(batch, FIELD_TYPES)?;
    let labels = scalars(batch, FIELD_LABEL)?;
    let mask = float_matrix(batch, FIELD_PADDING_MASK)?;

    check_shape(FIELD_TYPES, segment_ids.dim(), (records, seq_len))?;
    check_shape(FIELD_PADDING_MASK, mask.dim(), (records, seq_len))?;
    if labels.len() != records {
        return Err(malformed(
            FIELD_LABEL,
            format!("{} label(s) for {records} record(s)", labels.len()),
        ));
    }

    let position_ids = synthesize_position_ids(records, seq_len);
    let attention_mask = if reduced_precision {
        AttentionMask::F16(mask.mapv(f16::from_f32))
    } else {
        AttentionMask::F32(mask)
    };

    Ok(ModelBatch {
        tokens,
        segment_ids,
        labels,
        position_ids,
        attention_mask,
    })
}

/// `[batch, seq, 2]`: per-position primary index plus the block-relative
/// index (zero outside block-sparse attention), stacked on a new axis.
fn synthesize_position_ids(records: usize, seq_len: usize) -> Array3<i64> {
    let primary = Array2::from_shape_fn((records, seq_len), |(_, j)| j as i64);
    let block = Array2::<i64>::zeros((records, seq_len));
    stack(Axis(2), &[primary.view(), block.view()])
        .expect("stacking two equally shaped matrices cannot fail")
}

fn malformed(field: &'static str, detail: impl Into<String>) -> FinetuneError {
    FinetuneError::MalformedBatch {
        field,
        detail: detail.into(),
    }
}

fn check_shape(
    field: &'static str,
    got: (usize, usize),
    expected: (usize, usize),
) -> Result<()> {
    if got != expected {
        return Err(malformed(
            field,
            format!("shape {got:?} does not match {expected:?}"),
        ));
    }
    Ok(())
}

fn column<'a>(batch: &'a RawBatch, field: &'static str) -> Result<&'a FieldColumn> {
    batch
        .field(field)
        .ok_or_else(|| malformed(field, "field is absent"))
}

fn int_matrix(batch: &RawBatch, field: &'static str) -> Result<Array2<i64>> {
    match column(batch, field)? {
        FieldColumn::IntRows(rows) => matrix_from_rows(field, rows),
        other => Err(malformed(
            field,
            format!("expected integer sequences, got {other:?}"),
        )),
    }
}

fn float_matrix(batch: &RawBatch, field: &'static str) -> Result<Array2<f32>> {
    match column(batch, field)? {
        FieldColumn::FloatRows(rows) => matrix_from_rows(field, rows),
        other => Err(malformed(
            field,
            format!("expected float sequences, got {other:?}"),
        )),
    }
}

fn scalars(batch: &RawBatch, field: &'static str) -> Result<Array1<i64>> {
    match column(batch, field)? {
        FieldColumn::Scalars(values) => Ok(Array1::from_vec(values.clone())),
        other => Err(malformed(
            field,
            format!("expected scalars, got {other:?}"),
        )),
    }
}

fn matrix_from_rows<T: Clone>(field: &'static str, rows: &[Vec<T>]) -> Result<Array2<T>> {
    let records = rows.len();
    let seq_len = rows.first().map_or(0, Vec::len);
    let mut flat = Vec::with_capacity(records * seq_len);
    for (i, row) in rows.iter().enumerate() {
        if row.len() != seq_len {
            return Err(malformed(
                field,
                format!("row {i} has length {}, expected {seq_len}", row.len()),
            ));
        }
        flat.extend_from_slice(row);
    }
    Array2::from_shape_vec((records, seq_len), flat)
        .map_err(|e| malformed(field, e.to_string()))
}
