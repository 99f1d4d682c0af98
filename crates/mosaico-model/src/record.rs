use crate::{Message, ModelError, Row};
use arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Float32Array, Float64Array, Int8Array, Int16Array,
    Int32Array, Int64Array, LargeBinaryArray, LargeListArray, LargeStringArray, ListArray,
    RecordBatch, StringArray, StructArray, TimestampNanosecondArray, UInt8Array, UInt16Array,
    UInt32Array, UInt64Array,
};
use arrow::buffer::{NullBuffer, OffsetBuffer, ScalarBuffer};
use arrow::datatypes::{DataType, FieldRef, SchemaRef, TimeUnit};
use arrow::ipc::writer::StreamWriter;
use mosaico_core::types::Value;
use std::sync::Arc;

/// Pivots a slice of messages into a [`RecordBatch`] conforming to the
/// combined envelope + payload schema of the topic.
pub fn batch_from_messages(
    schema: &SchemaRef,
    messages: &[Message],
) -> Result<RecordBatch, ModelError> {
    let rows: Vec<Row> = messages.iter().map(Message::encode).collect();

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
    for field in schema.fields() {
        let cells: Vec<Value> = rows
            .iter()
            .map(|row| row.get(field.name()).cloned().unwrap_or(Value::Null))
            .collect();
        columns.push(build_column(field, &cells)?);
    }

    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}

/// Measures the exact Arrow IPC stream-encoded size of a batch, including
/// the schema message. This is the size the Flight transport will see.
pub fn encoded_batch_size(batch: &RecordBatch) -> Result<usize, ModelError> {
    let mut buffer: Vec<u8> = Vec::new();
    let mut writer = StreamWriter::try_new(&mut buffer, batch.schema().as_ref())?;
    writer.write(batch)?;
    writer.finish()?;
    drop(writer);
    Ok(buffer.len())
}

/// Materializes one batch row as a column-name to cell-value map.
pub fn row_values(batch: &RecordBatch, row: usize) -> Result<Row, ModelError> {
    let mut values = Row::new();
    for (field, column) in batch.schema().fields().iter().zip(batch.columns()) {
        values.insert(field.name().clone(), cell_value(field.name(), column, row)?);
    }
    Ok(values)
}

fn collect_cells<T>(
    field: &FieldRef,
    cells: &[Value],
    expected: &str,
    extract: impl Fn(&Value) -> Option<T>,
) -> Result<Vec<Option<T>>, ModelError> {
    cells
        .iter()
        .map(|cell| {
            if cell.is_null() {
                if !field.is_nullable() {
                    return Err(ModelError::NullInNonNullable(field.name().clone()));
                }
                Ok(None)
            } else {
                extract(cell)
                    .map(Some)
                    .ok_or_else(|| ModelError::type_mismatch(field.name(), expected))
            }
        })
        .collect()
}

fn build_column(field: &FieldRef, cells: &[Value]) -> Result<ArrayRef, ModelError> {
    let array: ArrayRef = match field.data_type() {
        DataType::Boolean => Arc::new(BooleanArray::from(collect_cells(
            field,
            cells,
            "bool",
            Value::as_bool,
        )?)),
        DataType::Int8 => Arc::new(Int8Array::from(collect_cells(field, cells, "int8", |v| {
            v.as_i64().and_then(|x| i8::try_from(x).ok())
        })?)),
        DataType::Int16 => Arc::new(Int16Array::from(collect_cells(field, cells, "int16", |v| {
            v.as_i64().and_then(|x| i16::try_from(x).ok())
        })?)),
        DataType::Int32 => Arc::new(Int32Array::from(collect_cells(field, cells, "int32", |v| {
            v.as_i64().and_then(|x| i32::try_from(x).ok())
        })?)),
        DataType::Int64 => Arc::new(Int64Array::from(collect_cells(
            field,
            cells,
            "int64",
            Value::as_i64,
        )?)),
        DataType::UInt8 => Arc::new(UInt8Array::from(collect_cells(field, cells, "uint8", |v| {
            v.as_u64().and_then(|x| u8::try_from(x).ok())
        })?)),
        DataType::UInt16 => Arc::new(UInt16Array::from(collect_cells(
            field,
            cells,
            "uint16",
            |v| v.as_u64().and_then(|x| u16::try_from(x).ok()),
        )?)),
        DataType::UInt32 => Arc::new(UInt32Array::from(collect_cells(
            field,
            cells,
            "uint32",
            |v| v.as_u64().and_then(|x| u32::try_from(x).ok()),
        )?)),
        DataType::UInt64 => Arc::new(UInt64Array::from(collect_cells(
            field,
            cells,
            "uint64",
            Value::as_u64,
        )?)),
        DataType::Float32 => Arc::new(Float32Array::from(collect_cells(
            field,
            cells,
            "float32",
            |v| v.as_f64().map(|x| x as f32),
        )?)),
        DataType::Float64 => Arc::new(Float64Array::from(collect_cells(
            field,
            cells,
            "float64",
            Value::as_f64,
        )?)),
        DataType::Timestamp(TimeUnit::Nanosecond, None) => Arc::new(
            TimestampNanosecondArray::from(collect_cells(field, cells, "timestamp", Value::as_i64)?),
        ),
        DataType::Utf8 => Arc::new(StringArray::from_iter(collect_cells(
            field,
            cells,
            "string",
            |v| v.as_str().map(str::to_owned),
        )?)),
        DataType::LargeUtf8 => Arc::new(LargeStringArray::from_iter(collect_cells(
            field,
            cells,
            "string",
            |v| v.as_str().map(str::to_owned),
        )?)),
        DataType::Binary => Arc::new(BinaryArray::from_iter(collect_cells(
            field,
            cells,
            "bytes",
            |v| v.as_bytes().map(<[u8]>::to_vec),
        )?)),
        DataType::LargeBinary => Arc::new(LargeBinaryArray::from_iter(collect_cells(
            field,
            cells,
            "bytes",
            |v| v.as_bytes().map(<[u8]>::to_vec),
        )?)),
        DataType::Struct(children) => {
            let validity: Vec<bool> = cells.iter().map(|cell| !cell.is_null()).collect();
            for (cell, valid) in cells.iter().zip(&validity) {
                if !valid && !field.is_nullable() {
                    return Err(ModelError::NullInNonNullable(field.name().clone()));
                }
                if *valid && cell.as_struct().is_none() {
                    return Err(ModelError::type_mismatch(field.name(), "struct"));
                }
            }

            let mut arrays: Vec<ArrayRef> = Vec::with_capacity(children.len());
            for child in children {
                let child_cells: Vec<Value> = cells
                    .iter()
                    .map(|cell| match cell {
                        Value::Struct(map) => map.get(child.name()).cloned().unwrap_or(Value::Null),
                        _ => Value::Null,
                    })
                    .collect();
                arrays.push(build_column(child, &child_cells)?);
            }

            let nulls = (!validity.iter().all(|valid| *valid)).then(|| NullBuffer::from(validity));
            Arc::new(StructArray::try_new(children.clone(), arrays, nulls)?)
        }
        DataType::List(child) => {
            let (offsets, flat, validity) = flatten_lists::<i32>(field, cells)?;
            let values = build_column(child, &flat)?;
            let nulls = (!validity.iter().all(|valid| *valid)).then(|| NullBuffer::from(validity));
            Arc::new(ListArray::try_new(
                child.clone(),
                OffsetBuffer::new(ScalarBuffer::from(offsets)),
                values,
                nulls,
            )?)
        }
        DataType::LargeList(child) => {
            let (offsets, flat, validity) = flatten_lists::<i64>(field, cells)?;
            let values = build_column(child, &flat)?;
            let nulls = (!validity.iter().all(|valid| *valid)).then(|| NullBuffer::from(validity));
            Arc::new(LargeListArray::try_new(
                child.clone(),
                OffsetBuffer::new(ScalarBuffer::from(offsets)),
                values,
                nulls,
            )?)
        }
        other => {
            return Err(ModelError::UnsupportedColumnType {
                field: field.name().clone(),
                datatype: other.to_string(),
            });
        }
    };

    Ok(array)
}

fn flatten_lists<O: TryFrom<usize>>(
    field: &FieldRef,
    cells: &[Value],
) -> Result<(Vec<O>, Vec<Value>, Vec<bool>), ModelError> {
    let mut offsets: Vec<O> = Vec::with_capacity(cells.len() + 1);
    let mut flat: Vec<Value> = Vec::new();
    let mut validity: Vec<bool> = Vec::with_capacity(cells.len());

    let offset_of = |len: usize| {
        O::try_from(len).map_err(|_| ModelError::type_mismatch(field.name(), "list offset"))
    };

    offsets.push(offset_of(0)?);
    for cell in cells {
        match cell {
            Value::Null => {
                if !field.is_nullable() {
                    return Err(ModelError::NullInNonNullable(field.name().clone()));
                }
                validity.push(false);
            }
            Value::List(items) => {
                validity.push(true);
                flat.extend(items.iter().cloned());
            }
            _ => return Err(ModelError::type_mismatch(field.name(), "list")),
        }
        offsets.push(offset_of(flat.len())?);
    }

    Ok((offsets, flat, validity))
}

fn downcast<'a, T: 'static>(
    name: &str,
    array: &'a dyn Array,
    expected: &str,
) -> Result<&'a T, ModelError> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| ModelError::type_mismatch(name, expected))
}

fn cell_value(name: &str, array: &dyn Array, row: usize) -> Result<Value, ModelError> {
    if array.is_null(row) {
        return Ok(Value::Null);
    }

    let value = match array.data_type() {
        DataType::Boolean => {
            Value::Bool(downcast::<BooleanArray>(name, array, "bool")?.value(row))
        }
        DataType::Int8 => {
            Value::Int(downcast::<Int8Array>(name, array, "int8")?.value(row) as i64)
        }
        DataType::Int16 => {
            Value::Int(downcast::<Int16Array>(name, array, "int16")?.value(row) as i64)
        }
        DataType::Int32 => {
            Value::Int(downcast::<Int32Array>(name, array, "int32")?.value(row) as i64)
        }
        DataType::Int64 => Value::Int(downcast::<Int64Array>(name, array, "int64")?.value(row)),
        DataType::UInt8 => {
            Value::UInt(downcast::<UInt8Array>(name, array, "uint8")?.value(row) as u64)
        }
        DataType::UInt16 => {
            Value::UInt(downcast::<UInt16Array>(name, array, "uint16")?.value(row) as u64)
        }
        DataType::UInt32 => {
            Value::UInt(downcast::<UInt32Array>(name, array, "uint32")?.value(row) as u64)
        }
        DataType::UInt64 => {
            Value::UInt(downcast::<UInt64Array>(name, array, "uint64")?.value(row))
        }
        DataType::Float32 => {
            Value::Float(downcast::<Float32Array>(name, array, "float32")?.value(row) as f64)
        }
        DataType::Float64 => {
            Value::Float(downcast::<Float64Array>(name, array, "float64")?.value(row))
        }
        DataType::Timestamp(TimeUnit::Nanosecond, _) => Value::Int(
            downcast::<TimestampNanosecondArray>(name, array, "timestamp")?.value(row),
        ),
        DataType::Utf8 => {
            Value::Str(downcast::<StringArray>(name, array, "string")?.value(row).to_owned())
        }
        DataType::LargeUtf8 => Value::Str(
            downcast::<LargeStringArray>(name, array, "string")?
                .value(row)
                .to_owned(),
        ),
        DataType::Binary => {
            Value::Bytes(downcast::<BinaryArray>(name, array, "bytes")?.value(row).to_vec())
        }
        DataType::LargeBinary => Value::Bytes(
            downcast::<LargeBinaryArray>(name, array, "bytes")?
                .value(row)
                .to_vec(),
        ),
        DataType::Struct(children) => {
            let struct_array = downcast::<StructArray>(name, array, "struct")?;
            let mut map = std::collections::BTreeMap::new();
            for (child, column) in children.iter().zip(struct_array.columns()) {
                map.insert(
                    child.name().clone(),
                    cell_value(child.name(), column, row)?,
                );
            }
            Value::Struct(map)
        }
        DataType::List(child) => {
            let list = downcast::<ListArray>(name, array, "list")?.value(row);
            let mut items = Vec::with_capacity(list.len());
            for idx in 0..list.len() {
                items.push(cell_value(child.name(), list.as_ref(), idx)?);
            }
            Value::List(items)
        }
        DataType::LargeList(child) => {
            let list = downcast::<LargeListArray>(name, array, "list")?.value(row);
            let mut items = Vec::with_capacity(list.len());
            for idx in 0..list.len() {
                items.push(cell_value(child.name(), list.as_ref(), idx)?);
            }
            Value::List(items)
        }
        other => {
            return Err(ModelError::UnsupportedColumnType {
                field: name.to_owned(),
                datatype: other.to_string(),
            });
        }
    };

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Header, Ontology, TIMESTAMP_COLUMN};
    use arrow::datatypes::{Field, Fields};
    use mosaico_core::types::{Format, Time};
    use std::collections::BTreeMap;

    /// Ragged payload exercising nested structs, lists and blobs.
    struct Scan {
        origin: (f64, f64),
        ranges: Vec<f64>,
        frame: Option<String>,
        raw: Vec<u8>,
    }

    impl Ontology for Scan {
        const TAG: &'static str = "test_scan";
        const FORMAT: Format = Format::Ragged;

        fn payload_fields() -> Fields {
            Fields::from(vec![
                Field::new(
                    "origin",
                    DataType::Struct(Fields::from(vec![
                        Field::new("x", DataType::Float64, false),
                        Field::new("y", DataType::Float64, false),
                    ])),
                    false,
                ),
                Field::new(
                    "ranges",
                    DataType::List(Arc::new(Field::new("item", DataType::Float64, true))),
                    false,
                ),
                Field::new("frame", DataType::Utf8, true),
                Field::new("raw", DataType::Binary, false),
            ])
        }

        fn encode_payload(&self, out: &mut Row) {
            let mut origin = BTreeMap::new();
            origin.insert("x".to_owned(), Value::Float(self.origin.0));
            origin.insert("y".to_owned(), Value::Float(self.origin.1));

            out.insert("origin".to_owned(), Value::Struct(origin));
            out.insert(
                "ranges".to_owned(),
                Value::List(self.ranges.iter().map(|r| Value::Float(*r)).collect()),
            );
            out.insert("frame".to_owned(), Value::from(self.frame.clone()));
            out.insert("raw".to_owned(), Value::Bytes(self.raw.clone()));
        }

        fn decode_payload(row: &Row) -> Result<Self, ModelError> {
            let origin = row
                .get("origin")
                .and_then(Value::as_struct)
                .ok_or_else(|| ModelError::MissingField("origin".to_owned()))?;

            Ok(Self {
                origin: (
                    origin.get("x").and_then(Value::as_f64).unwrap_or_default(),
                    origin.get("y").and_then(Value::as_f64).unwrap_or_default(),
                ),
                ranges: row
                    .get("ranges")
                    .and_then(Value::as_list)
                    .map(|items| items.iter().filter_map(Value::as_f64).collect())
                    .unwrap_or_default(),
                frame: row
                    .get("frame")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                raw: row
                    .get("raw")
                    .and_then(Value::as_bytes)
                    .map(<[u8]>::to_vec)
                    .unwrap_or_default(),
            })
        }
    }

    fn sample_messages() -> Vec<Message> {
        vec![
            Message::with_header(
                1_000,
                Scan {
                    origin: (0.5, -0.5),
                    ranges: vec![1.0, 2.0, 3.0],
                    frame: Some("lidar".to_owned()),
                    raw: vec![1, 2, 3],
                },
                Header::new(Time::new(1, 0).unwrap(), "lidar"),
            )
            .unwrap(),
            Message::new(
                2_000,
                Scan {
                    origin: (1.5, 2.5),
                    ranges: vec![],
                    frame: None,
                    raw: vec![9],
                },
            )
            .unwrap(),
        ]
    }

    #[test]
    fn batch_round_trip() {
        let schema = Message::combined_schema_of::<Scan>().unwrap();
        let messages = sample_messages();

        let batch = batch_from_messages(&schema, &messages).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), schema.fields().len());

        let first = row_values(&batch, 0).unwrap();
        assert_eq!(first.get(TIMESTAMP_COLUMN), Some(&Value::Int(1_000)));
        let origin = first.get("origin").and_then(Value::as_struct).unwrap();
        assert_eq!(origin.get("x"), Some(&Value::Float(0.5)));
        assert_eq!(
            first.get("ranges").and_then(Value::as_list).unwrap().len(),
            3
        );
        assert_eq!(first.get("raw"), Some(&Value::Bytes(vec![1, 2, 3])));

        let second = row_values(&batch, 1).unwrap();
        assert_eq!(second.get("frame"), Some(&Value::Null));
        assert_eq!(
            second.get("ranges").and_then(Value::as_list).unwrap().len(),
            0
        );
        // Second message had no header, the envelope column must be null
        assert_eq!(second.get("message_header"), Some(&Value::Null));
    }

    #[test]
    fn encoded_size_grows_with_payload() {
        let schema = Message::combined_schema_of::<Scan>().unwrap();
        let small = batch_from_messages(&schema, &sample_messages()[..1]).unwrap();

        let big_msg = Message::new(
            3_000,
            Scan {
                origin: (0.0, 0.0),
                ranges: vec![0.0; 4096],
                frame: None,
                raw: vec![0xAB; 16 * 1024],
            },
        )
        .unwrap();
        let big = batch_from_messages(&schema, std::slice::from_ref(&big_msg)).unwrap();

        let small_size = encoded_batch_size(&small).unwrap();
        let big_size = encoded_batch_size(&big).unwrap();
        assert!(small_size > 0);
        assert!(big_size > small_size + 16 * 1024);
    }

    #[test]
    fn null_in_non_nullable_column_is_rejected() {
        let schema = Message::combined_schema_of::<Scan>().unwrap();

        struct Hole;
        impl Ontology for Hole {
            const TAG: &'static str = "test_hole";
            const FORMAT: Format = Format::Ragged;

            fn payload_fields() -> Fields {
                Scan::payload_fields()
            }

            fn encode_payload(&self, out: &mut Row) {
                // Leaves every payload column unset, they all surface as nulls
                out.insert("frame".to_owned(), Value::Null);
            }

            fn decode_payload(_row: &Row) -> Result<Self, ModelError> {
                Ok(Self)
            }
        }

        let msg = Message::new(1, Hole).unwrap();
        let err = batch_from_messages(&schema, std::slice::from_ref(&msg)).unwrap_err();
        assert!(matches!(err, ModelError::NullInNonNullable(_)));
    }
}
