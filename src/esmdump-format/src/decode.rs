//! Subrecord chain decoding
//!
//! Decoding never fails outright. A record whose chain is cut short by the
//! end of the capture keeps every field read before the cut, and the problem
//! is recorded on the record itself.

use std::io::Read;

use flate2::read::ZlibDecoder;
use rayon::prelude::*;
use serde::Serialize;

use crate::endian::{read_u16, read_u32};
use crate::record::{DecodedRecord, FieldData, RawRecord, SubrecordField};
use crate::schema::{SchemaTable, TypeTag};
use crate::signature::{known, Signature};
use crate::SUBRECORD_HEADER_SIZE;

/// Largest decompressed size accepted from a compressed record header
const MAX_DECOMPRESSED_SIZE: usize = 64 * 1024 * 1024;

/// A structural problem found while walking one record
///
/// Positions are relative to the start of the record data (after
/// decompression, for compressed records).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuralDecodeError {
    #[error("Declared record end {declared_end:#x} is past the buffer end {buffer_len:#x}")]
    BoundaryPastBuffer {
        declared_end: usize,
        buffer_len: usize,
    },

    #[error("Subrecord header at {position:#x} truncated: {remaining} bytes left")]
    HeaderTruncated { position: usize, remaining: usize },

    #[error("Subrecord {signature} at {position:#x} needs {size} bytes, {available} available")]
    SubrecordOverrun {
        signature: Signature,
        position: usize,
        size: usize,
        available: usize,
    },

    #[error("Subrecord {signature} is {actual} bytes, {expected} expected for {type_tag:?}")]
    FieldMismatch {
        signature: Signature,
        type_tag: TypeTag,
        expected: usize,
        actual: usize,
    },

    #[error("Compressed record data unreadable: {message}")]
    Decompression { message: String },
}

impl StructuralDecodeError {
    /// Short name of the error class, as used in serialized output
    pub fn kind(&self) -> &'static str {
        match self {
            StructuralDecodeError::BoundaryPastBuffer { .. } => "boundary_past_buffer",
            StructuralDecodeError::HeaderTruncated { .. } => "header_truncated",
            StructuralDecodeError::SubrecordOverrun { .. } => "subrecord_overrun",
            StructuralDecodeError::FieldMismatch { .. } => "field_mismatch",
            StructuralDecodeError::Decompression { .. } => "decompression",
        }
    }
}

/// Walk the subrecord chain of one scanned record
pub fn decode_record(buffer: &[u8], record: &RawRecord, schema: &SchemaTable) -> DecodedRecord {
    let mut decoded = DecodedRecord {
        record: record.clone(),
        fields: Vec::new(),
        partial: false,
        errors: Vec::new(),
    };

    let start = record.data_offset().min(buffer.len());
    let declared_end = record.end();
    let end = declared_end.min(buffer.len());
    if declared_end > buffer.len() {
        decoded.partial = true;
        decoded.errors.push(StructuralDecodeError::BoundaryPastBuffer {
            declared_end,
            buffer_len: buffer.len(),
        });
    }

    let data = &buffer[start..end];
    if record.is_compressed() {
        match inflate(data, record) {
            Ok(inflated) => walk_fields(&inflated, schema, &mut decoded),
            Err((salvaged, message)) => {
                decoded.partial = true;
                decoded
                    .errors
                    .push(StructuralDecodeError::Decompression { message });
                walk_fields(&salvaged, schema, &mut decoded);
            }
        }
    } else {
        walk_fields(data, schema, &mut decoded);
    }

    if decoded.partial {
        tracing::debug!(
            "Partial {} {} at {:#x}: {} fields salvaged",
            record.signature,
            record.form_id,
            record.offset,
            decoded.fields.len()
        );
    }
    decoded
}

/// Decode many records in parallel; output order follows input order
pub fn decode_records(
    buffer: &[u8],
    records: &[RawRecord],
    schema: &SchemaTable,
) -> Vec<DecodedRecord> {
    records
        .par_iter()
        .map(|record| decode_record(buffer, record, schema))
        .collect()
}

/// Decompress record data; on failure returns whatever inflated before the error
fn inflate(data: &[u8], record: &RawRecord) -> Result<Vec<u8>, (Vec<u8>, String)> {
    let expected = read_u32(data, 0, record.byte_order)
        .map_err(|e| (Vec::new(), e.to_string()))? as usize;
    if expected > MAX_DECOMPRESSED_SIZE {
        return Err((
            Vec::new(),
            format!("decompressed size {} exceeds limit", expected),
        ));
    }

    let mut out = Vec::with_capacity(inflate_capacity(expected, data.len()));
    let mut decoder = ZlibDecoder::new(&data[4..]);
    match decoder.read_to_end(&mut out) {
        Ok(_) if out.len() == expected => Ok(out),
        Ok(_) => {
            let message = format!("inflated {} bytes, header says {}", out.len(), expected);
            Err((out, message))
        }
        Err(e) => Err((out, e.to_string())),
    }
}

/// Initial inflate buffer: the size prefix, capped at eight times the input
fn inflate_capacity(expected: usize, compressed_len: usize) -> usize {
    expected.min(compressed_len.saturating_mul(8))
}

fn walk_fields(data: &[u8], schema: &SchemaTable, decoded: &mut DecodedRecord) {
    let record_type = decoded.record.signature;
    let order = decoded.record.byte_order;
    let orientation = decoded.record.tag_orientation;

    let mut pos = 0usize;
    let mut extended_size: Option<usize> = None;

    while pos < data.len() {
        let remaining = data.len() - pos;
        if remaining < SUBRECORD_HEADER_SIZE {
            decoded.partial = true;
            decoded.errors.push(StructuralDecodeError::HeaderTruncated {
                position: pos,
                remaining,
            });
            break;
        }

        // In bounds: six bytes remain
        let signature = match Signature::read(data, pos, orientation) {
            Ok(sig) => sig,
            Err(_) => break,
        };
        let short_size = read_u16(data, pos + 4, order).unwrap_or(0) as usize;
        let payload_start = pos + SUBRECORD_HEADER_SIZE;

        if signature == known::XXXX {
            match read_u32(data, payload_start, order) {
                Ok(size) if short_size == 4 => {
                    extended_size = Some(size as usize);
                    pos = payload_start + 4;
                    continue;
                }
                _ => {
                    decoded.partial = true;
                    decoded.errors.push(StructuralDecodeError::SubrecordOverrun {
                        signature,
                        position: pos,
                        size: short_size,
                        available: data.len() - payload_start,
                    });
                    break;
                }
            }
        }

        let size = extended_size.take().unwrap_or(short_size);
        let available = data.len() - payload_start;
        if size > available {
            decoded.partial = true;
            decoded.errors.push(StructuralDecodeError::SubrecordOverrun {
                signature,
                position: pos,
                size,
                available,
            });
            break;
        }

        let payload = &data[payload_start..payload_start + size];
        let field = decode_field(record_type, signature, payload, schema, decoded);
        decoded.fields.push(field);
        pos = payload_start + size;
    }
}

fn decode_field(
    record_type: Signature,
    signature: Signature,
    payload: &[u8],
    schema: &SchemaTable,
    decoded: &mut DecodedRecord,
) -> SubrecordField {
    let raw = |type_tag| SubrecordField {
        signature,
        type_tag,
        data: FieldData::Raw(payload.to_vec()),
    };

    let Some(spec) = schema.lookup(record_type, signature) else {
        return raw(None);
    };

    let expected = spec.fixed_size().unwrap_or(0);
    let misaligned = spec.tag == TypeTag::FormIds && payload.len() % 4 != 0;
    if payload.len() < expected || misaligned {
        decoded.errors.push(StructuralDecodeError::FieldMismatch {
            signature,
            type_tag: spec.tag,
            expected,
            actual: payload.len(),
        });
        return raw(Some(spec.tag));
    }

    match spec.decode(payload, decoded.record.byte_order) {
        Ok(value) => SubrecordField {
            signature,
            type_tag: Some(spec.tag),
            data: FieldData::Decoded(value),
        },
        Err(_) => {
            decoded.errors.push(StructuralDecodeError::FieldMismatch {
                signature,
                type_tag: spec.tag,
                expected,
                actual: payload.len(),
            });
            raw(Some(spec.tag))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endian::ByteOrder;
    use crate::record::FieldValue;
    use crate::scanner::RecordScanner;
    use crate::signature::{FormId, TagOrientation};
    use crate::writer::RecordWriter;

    fn npc(order: ByteOrder) -> RecordWriter {
        let data = RecordWriter::payload(order)
            .i32(20)
            .u8(5)
            .u8(5)
            .u8(5)
            .u8(5)
            .u8(5)
            .u8(5)
            .u8(5)
            .finish();
        RecordWriter::new(known::NPC_, FormId(0x0001_0001), order)
            .zstring(known::EDID, "TestNPC")
            .field(Signature::new(b"DATA"), data)
            .form_id(Signature::new(b"RNAM"), FormId(0x19))
    }

    fn decode_first(buffer: &[u8]) -> DecodedRecord {
        let scanner = RecordScanner::new(known::RECORD_TYPES);
        let record = scanner.scan(buffer).next().unwrap();
        decode_record(buffer, &record, &SchemaTable::builtin())
    }

    #[test]
    fn test_decode_big_endian_npc() {
        let bytes = npc(ByteOrder::Big).to_bytes().unwrap();
        let rec = decode_first(&bytes);
        assert!(!rec.partial);
        assert!(rec.errors.is_empty());
        assert_eq!(rec.record.tag_orientation, TagOrientation::Reversed);
        assert_eq!(rec.editor_id(), Some("TestNPC"));
        assert_eq!(
            rec.member(Signature::new(b"DATA"), "base_health")
                .and_then(FieldValue::as_i64),
            Some(20)
        );
        assert_eq!(
            rec.form_id_field(Signature::new(b"RNAM")),
            Some(FormId(0x19))
        );
    }

    #[test]
    fn test_unknown_subrecord_kept_raw() {
        let bytes = npc(ByteOrder::Little)
            .field(Signature::new(b"ZZZZ"), vec![1, 2, 3])
            .to_bytes()
            .unwrap();
        let rec = decode_first(&bytes);
        let field = rec.field(Signature::new(b"ZZZZ")).unwrap();
        assert_eq!(field.raw(), Some(&[1u8, 2, 3][..]));
        assert_eq!(field.type_tag, None);
        assert_eq!(rec.parsed_field_count(), 3);
    }

    #[test]
    fn test_short_payload_is_mismatch() {
        let bytes = RecordWriter::new(known::NPC_, FormId(1), ByteOrder::Little)
            .zstring(known::EDID, "Short")
            .field(Signature::new(b"DATA"), vec![0u8; 4])
            .to_bytes()
            .unwrap();
        let rec = decode_first(&bytes);
        assert!(!rec.partial);
        assert_eq!(rec.parsed_field_count(), 1);
        assert!(matches!(
            rec.errors[0],
            StructuralDecodeError::FieldMismatch {
                expected: 11,
                actual: 4,
                ..
            }
        ));
    }

    #[test]
    fn test_truncated_record_salvages_prefix() {
        let bytes = npc(ByteOrder::Big).to_bytes().unwrap();
        // Cut inside the RNAM payload
        let cut = &bytes[..bytes.len() - 2];
        let scanner = RecordScanner::new(known::RECORD_TYPES);
        let record = scanner.probe(&bytes, 0).unwrap();

        let rec = decode_record(cut, &record, &SchemaTable::builtin());
        assert!(rec.partial);
        assert_eq!(rec.editor_id(), Some("TestNPC"));
        assert_eq!(rec.fields.len(), 2);
        assert!(matches!(
            rec.errors[0],
            StructuralDecodeError::BoundaryPastBuffer { .. }
        ));
        assert!(matches!(
            rec.errors[1],
            StructuralDecodeError::SubrecordOverrun { size: 4, available: 2, .. }
        ));
    }

    #[test]
    fn test_extended_size_subrecord() {
        let big = vec![0xABu8; 70_000];
        let bytes = RecordWriter::new(known::LAND, FormId(2), ByteOrder::Big)
            .field(Signature::new(b"VNML"), big.clone())
            .field(Signature::new(b"DATA"), 1u32.to_be_bytes().to_vec())
            .to_bytes()
            .unwrap();
        let rec = decode_first(&bytes);
        assert!(!rec.partial, "{:?}", rec.errors);
        assert_eq!(rec.fields.len(), 2);
        assert_eq!(
            rec.value(Signature::new(b"VNML")),
            Some(&FieldValue::Bytes(big))
        );
        assert_eq!(
            rec.value(Signature::new(b"DATA")).and_then(FieldValue::as_u32),
            Some(1)
        );
    }

    #[test]
    fn test_compressed_record() {
        let bytes = npc(ByteOrder::Little).compressed().to_bytes().unwrap();
        let rec = decode_first(&bytes);
        assert!(rec.record.is_compressed());
        assert!(!rec.partial);
        assert_eq!(rec.editor_id(), Some("TestNPC"));
    }

    #[test]
    fn test_corrupt_compressed_record() {
        let mut bytes = npc(ByteOrder::Little).compressed().to_bytes().unwrap();
        // Decompressed size prefix no longer matches the stream
        bytes[24..28].copy_from_slice(&9999u32.to_le_bytes());
        let rec = decode_first(&bytes);
        assert!(rec.partial);
        assert_eq!(rec.editor_id(), Some("TestNPC"));
        assert!(rec
            .errors
            .iter()
            .any(|e| matches!(e, StructuralDecodeError::Decompression { .. })));
    }

    #[test]
    fn test_oversized_decompressed_size_prefix() {
        let mut bytes = npc(ByteOrder::Little).compressed().to_bytes().unwrap();
        let claimed = (MAX_DECOMPRESSED_SIZE - 1) as u32;
        bytes[24..28].copy_from_slice(&claimed.to_le_bytes());
        let compressed_len = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
        assert!(inflate_capacity(claimed as usize, compressed_len) <= compressed_len * 8);

        let rec = decode_first(&bytes);
        assert!(rec.partial);
        assert_eq!(rec.editor_id(), Some("TestNPC"));
        assert!(rec
            .errors
            .iter()
            .any(|e| matches!(e, StructuralDecodeError::Decompression { .. })));
    }

    #[test]
    fn test_inflate_capacity() {
        assert_eq!(inflate_capacity(100, 40), 100);
        assert_eq!(inflate_capacity(64 << 20, 40), 320);
        assert_eq!(inflate_capacity(10, usize::MAX), 10);
    }

    #[test]
    fn test_decode_records_preserves_order() {
        let mut buffer = npc(ByteOrder::Big).to_bytes().unwrap();
        buffer.extend(
            RecordWriter::new(known::WEAP, FormId(3), ByteOrder::Big)
                .zstring(known::EDID, "Gun")
                .to_bytes()
                .unwrap(),
        );
        let records: Vec<_> = RecordScanner::new(known::RECORD_TYPES)
            .scan(&buffer)
            .collect();
        let decoded = decode_records(&buffer, &records, &SchemaTable::builtin());
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].signature(), known::NPC_);
        assert_eq!(decoded[1].editor_id(), Some("Gun"));
    }
}
