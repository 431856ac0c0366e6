use std::collections::BTreeMap;

/// One field of a single sample.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Scalar(i64),
    IntSeq(Vec<i64>),
    FloatSeq(Vec<f32>),
}

/// One raw sample: field name → payload.
pub type RawRecord = BTreeMap<String, FieldValue>;

/// One field of a collated batch, one entry per record.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldColumn {
    Scalars(Vec<i64>),
    IntRows(Vec<Vec<i64>>),
    FloatRows(Vec<Vec<f32>>),
}

impl FieldColumn {
    /// Number of records contributing to this column.
    pub fn records(&self) -> usize {
        match self {
            FieldColumn::Scalars(v) => v.len(),
            FieldColumn::IntRows(v) => v.len(),
            FieldColumn::FloatRows(v) => v.len(),
        }
    }
}

/// A collated batch: field name → column. What the materializer consumes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBatch {
    pub fields: BTreeMap<String, FieldColumn>,
}

impl RawBatch {
    pub fn field(&self, name: &str) -> Option<&FieldColumn> {
        self.fields.get(name)
    }
}

/// Collates records into a columnar batch.
///
/// Records with missing fields simply contribute nothing to that column;
/// the materializer detects the resulting record-count mismatch.
pub fn collate(records: &[RawRecord]) -> RawBatch {
    let mut batch = RawBatch::default();
    for record in records {
        for (name, value) in record {
            let column = batch
                .fields
                .entry(name.clone())
                .or_insert_with(|| match value {
                    FieldValue::Scalar(_) => FieldColumn::Scalars(Vec::new()),
                    FieldValue::IntSeq(_) => FieldColumn::IntRows(Vec::new()),
                    FieldValue::FloatSeq(_) => FieldColumn::FloatRows(Vec::new()),
                });
            match (column, value) {
                (FieldColumn::Scalars(col), FieldValue::Scalar(v)) => col.push(*v),
                (FieldColumn::IntRows(col), FieldValue::IntSeq(v)) => col.push(v.clone()),
                (FieldColumn::FloatRows(col), FieldValue::FloatSeq(v)) => col.push(v.clone()),
                // Mixed payload kinds under one name: skip, the record
                // count mismatch surfaces at materialization.
                _ => {}
            }
        }
    }
    batch
}

/// Random-access source of raw samples.
pub trait Dataset: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the record at `index` (panics if out of bounds).
    fn record(&self, index: usize) -> RawRecord;
}

/// A minimal in-memory dataset of raw records.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataset {
    records: Vec<RawRecord>,
}

impl InMemoryDataset {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self { records }
    }
}

impl Dataset for InMemoryDataset {
    #[inline]
    fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    fn record(&self, index: usize) -> RawRecord {
        self.records[index].clone()
    }
}

/// Builds the record layout of one sequence-classification sample.
pub fn classification_record(
    tokens: &[i64],
    types: &[i64],
    label: i64,
    padding_mask: &[f32],
) -> RawRecord {
    RawRecord::from([
        ("text".to_string(), FieldValue::IntSeq(tokens.to_vec())),
        ("types".to_string(), FieldValue::IntSeq(types.to_vec())),
        ("label".to_string(), FieldValue::Scalar(label)),
        (
            "padding_mask".to_string(),
            FieldValue::FloatSeq(padding_mask.to_vec()),
        ),
    ])
}
