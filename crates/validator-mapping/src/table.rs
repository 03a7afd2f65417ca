//! In-memory validator mapping table and its parquet codec.
//!
//! The table is a single Arrow [`RecordBatch`] with a non-null, unique
//! `Int64` `validator_id` column. Every other column is carried through
//! untouched.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use arrow::array::{new_null_array, Array, ArrayRef, AsArray, BooleanArray, Int64Array};
use arrow::compute::{cast_with_options, concat_batches, filter_record_batch, CastOptions};
use arrow::datatypes::{DataType, Field, Int64Type, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use flate2::read::GzDecoder;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;

/// Name of the key column.
pub const VALIDATOR_ID_COLUMN: &str = "validator_id";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Prefix of row-index columns written by dataframe libraries.
const INDEX_COLUMN_PREFIX: &str = "__index_level_";

/// Schema metadata key written by pandas; it describes pre-coercion dtypes.
const PANDAS_METADATA_KEY: &str = "pandas";

/// Table codec and normalization errors.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("parquet error: {0}")]
    Parquet(#[from] ParquetError),

    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("gzip error: {0}")]
    Gzip(#[source] std::io::Error),

    #[error("payload is empty")]
    EmptyPayload,

    #[error("table has no rows")]
    EmptyTable,

    #[error("missing column `{column}`")]
    MissingColumn { column: String },

    #[error("column `validator_id` has unsupported type {data_type}")]
    UnsupportedIdType { data_type: String },

    #[error("column `validator_id` could not be coerced to an integer: {message}")]
    IdentifierCast { message: String },

    #[error("validator_id is null at row {row}")]
    NullIdentifier { row: usize },

    #[error("duplicate validator_id {validator_id}")]
    DuplicateIdentifier { validator_id: i64 },

    #[error("schema mismatch: {message}")]
    SchemaMismatch { message: String },
}

impl TableError {
    /// Whether the identifier column could not be normalized to integers.
    pub fn is_coercion(&self) -> bool {
        match self {
            Self::MissingColumn { column } => column == VALIDATOR_ID_COLUMN,
            Self::UnsupportedIdType { .. }
            | Self::IdentifierCast { .. }
            | Self::NullIdentifier { .. } => true,
            _ => false,
        }
    }
}

/// Validator identity mapping keyed by `validator_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatorMapping {
    batch: RecordBatch,
    id_index: usize,
    /// `validator_id` → row position.
    rows_by_id: HashMap<i64, usize>,
}

impl ValidatorMapping {
    /// Build a mapping from a record batch, normalizing the key column.
    pub fn from_record_batch(batch: RecordBatch) -> Result<Self, TableError> {
        let batch = normalize(batch)?;
        let id_index = batch.schema().index_of(VALIDATOR_ID_COLUMN)?;
        let rows_by_id = index_rows(id_column(&batch, id_index))?;
        Ok(Self {
            batch,
            id_index,
            rows_by_id,
        })
    }

    /// Decode a parquet file (optionally gzip-wrapped).
    pub fn from_parquet(bytes: Bytes) -> Result<Self, TableError> {
        let bytes = maybe_gunzip(bytes)?;
        if bytes.is_empty() {
            return Err(TableError::EmptyPayload);
        }

        let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)?;
        let schema = builder.schema().clone();
        let batches = builder
            .build()?
            .collect::<Result<Vec<RecordBatch>, ArrowError>>()?;

        Self::from_record_batch(concat_batches(&schema, &batches)?)
    }

    /// Encode as a snappy-compressed parquet file without a row index.
    pub fn to_parquet(&self) -> Result<Vec<u8>, TableError> {
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let mut writer = ArrowWriter::try_new(Vec::new(), self.batch.schema(), Some(props))?;
        writer.write(&self.batch)?;
        Ok(writer.into_inner()?)
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    pub fn record_batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn into_record_batch(self) -> RecordBatch {
        self.batch
    }

    /// Validator ids in row order.
    pub fn validator_ids(&self) -> Vec<i64> {
        self.ids().values().to_vec()
    }

    pub fn contains(&self, validator_id: i64) -> bool {
        self.rows_by_id.contains_key(&validator_id)
    }

    /// Row position of a validator, if present.
    pub fn row_index_of(&self, validator_id: i64) -> Option<usize> {
        self.rows_by_id.get(&validator_id).copied()
    }

    /// Align externally produced records with this mapping's schema.
    ///
    /// The key column is coerced like ingested data. Columns absent from the
    /// records are filled with nulls; columns unknown to the mapping or with a
    /// different type are rejected.
    pub fn conform(&self, records: RecordBatch) -> Result<ValidatorMapping, TableError> {
        let records = normalize(records)?;
        let target = self.batch.schema();

        for field in records.schema().fields() {
            let expected = target
                .field_with_name(field.name())
                .map_err(|_| TableError::SchemaMismatch {
                    message: format!("unknown column `{}`", field.name()),
                })?;
            if expected.data_type() != field.data_type() {
                return Err(TableError::SchemaMismatch {
                    message: format!(
                        "column `{}` is {}, expected {}",
                        field.name(),
                        field.data_type(),
                        expected.data_type()
                    ),
                });
            }
        }

        let columns = target
            .fields()
            .iter()
            .map(|field| match records.column_by_name(field.name()) {
                Some(column) => Ok(column.clone()),
                None if field.is_nullable() => {
                    Ok(new_null_array(field.data_type(), records.num_rows()))
                }
                None => Err(TableError::MissingColumn {
                    column: field.name().clone(),
                }),
            })
            .collect::<Result<Vec<ArrayRef>, TableError>>()?;

        Self::from_record_batch(RecordBatch::try_new(target, columns)?)
    }

    /// Replace rows sharing an id with `rows`, append the rest.
    pub fn upsert(&self, rows: &ValidatorMapping) -> Result<ValidatorMapping, TableError> {
        if rows.schema() != self.schema() {
            return Err(TableError::SchemaMismatch {
                message: "upsert rows do not share the mapping schema".to_string(),
            });
        }

        let keep = BooleanArray::from(
            self.ids()
                .values()
                .iter()
                .map(|id| !rows.contains(*id))
                .collect::<Vec<bool>>(),
        );

        let kept = filter_record_batch(&self.batch, &keep)?;
        let merged = concat_batches(&self.batch.schema(), [&kept, &rows.batch])?;
        Self::from_record_batch(merged)
    }

    fn ids(&self) -> &Int64Array {
        id_column(&self.batch, self.id_index)
    }
}

fn id_column(batch: &RecordBatch, index: usize) -> &Int64Array {
    batch.column(index).as_primitive::<Int64Type>()
}

fn normalize(batch: RecordBatch) -> Result<RecordBatch, TableError> {
    let schema = batch.schema();
    let mut fields = Vec::with_capacity(schema.fields().len());
    let mut columns = Vec::with_capacity(schema.fields().len());
    let mut has_id = false;

    for (field, column) in schema.fields().iter().zip(batch.columns()) {
        if field.name().starts_with(INDEX_COLUMN_PREFIX) {
            continue;
        }

        if field.name() == VALIDATOR_ID_COLUMN {
            columns.push(coerce_ids(column)?);
            fields.push(Field::new(VALIDATOR_ID_COLUMN, DataType::Int64, false));
            has_id = true;
        } else {
            columns.push(column.clone());
            fields.push(field.as_ref().clone());
        }
    }

    if !has_id {
        return Err(TableError::MissingColumn {
            column: VALIDATOR_ID_COLUMN.to_string(),
        });
    }

    let mut metadata = schema.metadata().clone();
    metadata.remove(PANDAS_METADATA_KEY);

    let schema = Schema::new_with_metadata(fields, metadata);
    Ok(RecordBatch::try_new(Arc::new(schema), columns)?)
}

fn coerce_ids(column: &ArrayRef) -> Result<ArrayRef, TableError> {
    let data_type = column.data_type();
    let supported = data_type.is_integer()
        || data_type.is_floating()
        || matches!(data_type, DataType::Utf8 | DataType::LargeUtf8);
    if !supported {
        return Err(TableError::UnsupportedIdType {
            data_type: data_type.to_string(),
        });
    }

    if column.null_count() > 0 {
        let row = (0..column.len()).find(|i| column.is_null(*i)).unwrap_or(0);
        return Err(TableError::NullIdentifier { row });
    }

    // Unsafe cast: a value that does not convert is an error, not a null.
    let options = CastOptions {
        safe: false,
        ..Default::default()
    };
    cast_with_options(column, &DataType::Int64, &options).map_err(|e| {
        TableError::IdentifierCast {
            message: e.to_string(),
        }
    })
}

/// Map each id to its row, rejecting duplicates.
fn index_rows(ids: &Int64Array) -> Result<HashMap<i64, usize>, TableError> {
    let mut rows = HashMap::with_capacity(ids.len());
    for (row, id) in ids.values().iter().enumerate() {
        if rows.insert(*id, row).is_some() {
            return Err(TableError::DuplicateIdentifier { validator_id: *id });
        }
    }
    Ok(rows)
}

fn maybe_gunzip(bytes: Bytes) -> Result<Bytes, TableError> {
    if !bytes.starts_with(&GZIP_MAGIC) {
        return Ok(bytes);
    }

    let mut out = Vec::new();
    GzDecoder::new(bytes.as_ref())
        .read_to_end(&mut out)
        .map_err(TableError::Gzip)?;
    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{BooleanArray, Float64Array, StringArray};
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn batch(ids: ArrayRef, entities: Vec<&str>) -> RecordBatch {
        let schema = Schema::new(vec![
            Field::new(VALIDATOR_ID_COLUMN, ids.data_type().clone(), true),
            Field::new("entity", DataType::Utf8, true),
        ]);
        RecordBatch::try_new(
            Arc::new(schema),
            vec![ids, Arc::new(StringArray::from(entities))],
        )
        .unwrap()
    }

    fn string_ids(ids: Vec<&str>) -> ArrayRef {
        Arc::new(StringArray::from(ids))
    }

    #[test]
    fn test_string_ids_coerced_to_int() {
        let mapping = ValidatorMapping::from_record_batch(batch(
            string_ids(vec!["1", "2", "3"]),
            vec!["coinbase", "kiln", "lido"],
        ))
        .unwrap();

        assert_eq!(mapping.validator_ids(), vec![1, 2, 3]);
        assert_eq!(
            mapping
                .schema()
                .field_with_name(VALIDATOR_ID_COLUMN)
                .unwrap()
                .data_type(),
            &DataType::Int64
        );
    }

    #[test]
    fn test_float_ids_truncate_to_int() {
        let ids: ArrayRef = Arc::new(Float64Array::from(vec![10.0, 11.0]));
        let mapping = ValidatorMapping::from_record_batch(batch(ids, vec!["a", "b"])).unwrap();
        assert_eq!(mapping.validator_ids(), vec![10, 11]);
    }

    #[test]
    fn test_null_id_rejected() {
        let ids: ArrayRef = Arc::new(StringArray::from(vec![Some("1"), None, Some("3")]));
        let err = ValidatorMapping::from_record_batch(batch(ids, vec!["a", "b", "c"])).unwrap_err();
        assert!(matches!(err, TableError::NullIdentifier { row: 1 }));
        assert!(err.is_coercion());
    }

    #[test]
    fn test_non_numeric_string_rejected() {
        let err = ValidatorMapping::from_record_batch(batch(
            string_ids(vec!["1", "two"]),
            vec!["a", "b"],
        ))
        .unwrap_err();
        assert!(matches!(err, TableError::IdentifierCast { .. }), "{err:?}");
    }

    #[test]
    fn test_unsupported_id_type_rejected() {
        let ids: ArrayRef = Arc::new(BooleanArray::from(vec![true, false]));
        let err = ValidatorMapping::from_record_batch(batch(ids, vec!["a", "b"])).unwrap_err();
        assert!(matches!(err, TableError::UnsupportedIdType { .. }));
    }

    #[test]
    fn test_missing_id_column_rejected() {
        let schema = Schema::new(vec![Field::new("entity", DataType::Utf8, true)]);
        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![Arc::new(StringArray::from(vec!["a"])) as ArrayRef],
        )
        .unwrap();

        let err = ValidatorMapping::from_record_batch(batch).unwrap_err();
        assert!(err.is_coercion());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = ValidatorMapping::from_record_batch(batch(
            string_ids(vec!["7", "7"]),
            vec!["a", "b"],
        ))
        .unwrap_err();
        assert!(matches!(
            err,
            TableError::DuplicateIdentifier { validator_id: 7 }
        ));
    }

    #[test]
    fn test_index_column_dropped() {
        let schema = Schema::new(vec![
            Field::new(VALIDATOR_ID_COLUMN, DataType::Int64, true),
            Field::new("__index_level_0__", DataType::Int64, true),
        ]);
        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(Int64Array::from(vec![5, 6])) as ArrayRef,
                Arc::new(Int64Array::from(vec![0, 1])) as ArrayRef,
            ],
        )
        .unwrap();

        let mapping = ValidatorMapping::from_record_batch(batch).unwrap();
        assert_eq!(mapping.column_names(), vec![VALIDATOR_ID_COLUMN.to_string()]);
    }

    #[test]
    fn test_parquet_roundtrip_keeps_int_ids() {
        let mapping = ValidatorMapping::from_record_batch(batch(
            string_ids(vec!["1", "2", "3"]),
            vec!["a", "b", "c"],
        ))
        .unwrap();

        let encoded = mapping.to_parquet().unwrap();
        let decoded = ValidatorMapping::from_parquet(Bytes::from(encoded)).unwrap();

        assert_eq!(decoded.num_rows(), 3);
        assert_eq!(decoded.validator_ids(), vec![1, 2, 3]);
        assert_eq!(
            decoded
                .schema()
                .field_with_name(VALIDATOR_ID_COLUMN)
                .unwrap()
                .data_type(),
            &DataType::Int64
        );
    }

    #[test]
    fn test_gzip_wrapped_parquet_decodes() {
        let mapping = ValidatorMapping::from_record_batch(batch(
            string_ids(vec!["42"]),
            vec!["rocketpool"],
        ))
        .unwrap();

        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&mapping.to_parquet().unwrap()).unwrap();
        let wrapped = encoder.finish().unwrap();

        let decoded = ValidatorMapping::from_parquet(Bytes::from(wrapped)).unwrap();
        assert_eq!(decoded.validator_ids(), vec![42]);
    }

    #[test]
    fn test_empty_and_garbage_payloads() {
        let err = ValidatorMapping::from_parquet(Bytes::new()).unwrap_err();
        assert!(matches!(err, TableError::EmptyPayload));

        let err = ValidatorMapping::from_parquet(Bytes::from_static(b"<html>oops</html>"))
            .unwrap_err();
        assert!(matches!(err, TableError::Parquet(_)));
    }

    #[test]
    fn test_lookup() {
        let mapping = ValidatorMapping::from_record_batch(batch(
            string_ids(vec!["10", "20"]),
            vec!["a", "b"],
        ))
        .unwrap();

        assert!(mapping.contains(20));
        assert!(!mapping.contains(30));
        assert_eq!(mapping.row_index_of(20), Some(1));
    }

    #[test]
    fn test_lookup_tracks_row_positions_after_upsert() {
        let ids: Vec<String> = (0..10_000).map(|i| (i * 3).to_string()).collect();
        let entities = vec!["lido"; ids.len()];
        let base = ValidatorMapping::from_record_batch(batch(
            string_ids(ids.iter().map(String::as_str).collect()),
            entities,
        ))
        .unwrap();
        assert_eq!(base.row_index_of(29_997), Some(9_999));
        assert!(!base.contains(1));

        let rows = base
            .conform(batch(string_ids(vec!["0", "1"]), vec!["kiln", "binance"]))
            .unwrap();
        let merged = base.upsert(&rows).unwrap();

        // Replaced rows move to the end; survivors shift up by one.
        assert_eq!(merged.num_rows(), 10_001);
        assert_eq!(merged.row_index_of(3), Some(0));
        assert_eq!(merged.row_index_of(0), Some(9_999));
        assert_eq!(merged.row_index_of(1), Some(10_000));
        let ids = merged.validator_ids();
        for (row, id) in ids.iter().enumerate() {
            assert_eq!(merged.row_index_of(*id), Some(row));
        }
    }

    #[test]
    fn test_conform_fills_missing_columns() {
        let base = ValidatorMapping::from_record_batch(batch(
            string_ids(vec!["1"]),
            vec!["a"],
        ))
        .unwrap();

        let schema = Schema::new(vec![Field::new(VALIDATOR_ID_COLUMN, DataType::Utf8, true)]);
        let records = RecordBatch::try_new(Arc::new(schema), vec![string_ids(vec!["2"])]).unwrap();

        let conformed = base.conform(records).unwrap();
        assert_eq!(conformed.schema(), base.schema());
        assert_eq!(conformed.validator_ids(), vec![2]);
        assert!(conformed.record_batch().column(1).is_null(0));
    }

    #[test]
    fn test_conform_rejects_unknown_column() {
        let base = ValidatorMapping::from_record_batch(batch(
            string_ids(vec!["1"]),
            vec!["a"],
        ))
        .unwrap();

        let schema = Schema::new(vec![
            Field::new(VALIDATOR_ID_COLUMN, DataType::Int64, false),
            Field::new("operator", DataType::Utf8, true),
        ]);
        let records = RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(Int64Array::from(vec![2])) as ArrayRef,
                Arc::new(StringArray::from(vec!["x"])) as ArrayRef,
            ],
        )
        .unwrap();

        let err = base.conform(records).unwrap_err();
        assert!(matches!(err, TableError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_upsert_replaces_and_appends() {
        let base = ValidatorMapping::from_record_batch(batch(
            string_ids(vec!["1", "2", "3"]),
            vec!["a", "b", "c"],
        ))
        .unwrap();
        let rows = base
            .conform(batch(string_ids(vec!["2", "4"]), vec!["B", "d"]))
            .unwrap();

        let merged = base.upsert(&rows).unwrap();

        assert_eq!(merged.num_rows(), 4);
        assert_eq!(merged.validator_ids(), vec![1, 3, 2, 4]);
        let entities = merged.record_batch().column(1).as_string::<i32>();
        assert_eq!(entities.value(merged.row_index_of(2).unwrap()), "B");
    }
}
