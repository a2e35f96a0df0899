//! Record encoding
//!
//! Produces records in the same layout the scanner reads, for either byte
//! order and tag orientation. Used to build test captures and to write
//! recovered records back out.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::endian::ByteOrder;
use crate::signature::{known, FormId, Signature, TagOrientation};
use crate::{Result, FLAG_COMPRESSED, RECORD_HEADER_SIZE, SUBRECORD_HEADER_SIZE};

/// Builds a subrecord payload at a fixed byte order
#[derive(Debug, Clone)]
pub struct PayloadWriter {
    bytes: Vec<u8>,
    order: ByteOrder,
}

impl PayloadWriter {
    pub fn new(order: ByteOrder) -> Self {
        Self {
            bytes: Vec::new(),
            order,
        }
    }

    fn put(mut self, le: &[u8], be: &[u8]) -> Self {
        match self.order {
            ByteOrder::Little => self.bytes.extend_from_slice(le),
            ByteOrder::Big => self.bytes.extend_from_slice(be),
        }
        self
    }

    pub fn u8(mut self, v: u8) -> Self {
        self.bytes.push(v);
        self
    }

    pub fn i8(self, v: i8) -> Self {
        self.u8(v as u8)
    }

    pub fn u16(self, v: u16) -> Self {
        self.put(&v.to_le_bytes(), &v.to_be_bytes())
    }

    pub fn i16(self, v: i16) -> Self {
        self.put(&v.to_le_bytes(), &v.to_be_bytes())
    }

    pub fn u32(self, v: u32) -> Self {
        self.put(&v.to_le_bytes(), &v.to_be_bytes())
    }

    pub fn i32(self, v: i32) -> Self {
        self.put(&v.to_le_bytes(), &v.to_be_bytes())
    }

    pub fn f32(self, v: f32) -> Self {
        self.u32(v.to_bits())
    }

    pub fn form_id(self, id: FormId) -> Self {
        self.u32(id.0)
    }

    /// String plus NUL terminator
    pub fn zstring(mut self, s: &str) -> Self {
        self.bytes.extend_from_slice(s.as_bytes());
        self.bytes.push(0);
        self
    }

    /// String truncated or NUL padded to `width`
    pub fn fixed_string(mut self, s: &str, width: usize) -> Self {
        let bytes = s.as_bytes();
        let n = bytes.len().min(width);
        self.bytes.extend_from_slice(&bytes[..n]);
        self.bytes.resize(self.bytes.len() + (width - n), 0);
        self
    }

    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.bytes.extend_from_slice(data);
        self
    }

    pub fn pad(mut self, n: usize) -> Self {
        self.bytes.resize(self.bytes.len() + n, 0);
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

/// Builds one record: header plus subrecord chain
#[derive(Debug, Clone)]
pub struct RecordWriter {
    signature: Signature,
    form_id: FormId,
    flags: u32,
    order: ByteOrder,
    orientation: TagOrientation,
    compress: bool,
    fields: Vec<(Signature, Vec<u8>)>,
}

impl RecordWriter {
    /// Big-endian records get reversed tags, as consoles write them
    pub fn new(signature: Signature, form_id: FormId, order: ByteOrder) -> Self {
        let orientation = match order {
            ByteOrder::Big => TagOrientation::Reversed,
            ByteOrder::Little => TagOrientation::Canonical,
        };
        Self {
            signature,
            form_id,
            flags: 0,
            order,
            orientation,
            compress: false,
            fields: Vec::new(),
        }
    }

    /// Payload builder at the given byte order
    pub fn payload(order: ByteOrder) -> PayloadWriter {
        PayloadWriter::new(order)
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn orientation(mut self, orientation: TagOrientation) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Store the subrecord chain zlib compressed
    pub fn compressed(mut self) -> Self {
        self.compress = true;
        self
    }

    pub fn field(mut self, signature: Signature, payload: impl Into<Vec<u8>>) -> Self {
        self.fields.push((signature, payload.into()));
        self
    }

    pub fn zstring(self, signature: Signature, s: &str) -> Self {
        let payload = PayloadWriter::new(self.order).zstring(s).finish();
        self.field(signature, payload)
    }

    pub fn form_id(self, signature: Signature, id: FormId) -> Self {
        let payload = PayloadWriter::new(self.order).form_id(id).finish();
        self.field(signature, payload)
    }

    pub fn f32(self, signature: Signature, v: f32) -> Self {
        let payload = PayloadWriter::new(self.order).f32(v).finish();
        self.field(signature, payload)
    }

    /// Encoded subrecord chain; payloads over 64 KiB get an `XXXX` prefix
    pub fn encode_fields(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (signature, payload) in &self.fields {
            let short_size = match u16::try_from(payload.len()) {
                Ok(size) => size,
                Err(_) => {
                    self.subrecord_header(&mut out, known::XXXX, 4);
                    let ext = PayloadWriter::new(self.order)
                        .u32(payload.len() as u32)
                        .finish();
                    out.extend_from_slice(&ext);
                    0
                }
            };
            self.subrecord_header(&mut out, *signature, short_size);
            out.extend_from_slice(payload);
        }
        out
    }

    fn subrecord_header(&self, out: &mut Vec<u8>, signature: Signature, size: u16) {
        out.extend_from_slice(&signature.stored(self.orientation));
        out.extend_from_slice(&PayloadWriter::new(self.order).u16(size).finish());
    }

    /// Full record bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut data = self.encode_fields();
        let mut flags = self.flags;

        if self.compress {
            flags |= FLAG_COMPRESSED;
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            let stream = encoder.finish()?;

            let mut packed = PayloadWriter::new(self.order)
                .u32(data.len() as u32)
                .finish();
            packed.extend_from_slice(&stream);
            data = packed;
        }

        let mut out = Vec::with_capacity(RECORD_HEADER_SIZE + data.len());
        out.extend_from_slice(&self.signature.stored(self.orientation));
        let header = PayloadWriter::new(self.order)
            .u32(data.len() as u32)
            .u32(flags)
            .form_id(self.form_id)
            .pad(8)
            .finish();
        out.extend_from_slice(&header);
        debug_assert_eq!(out.len(), RECORD_HEADER_SIZE);
        out.extend_from_slice(&data);
        Ok(out)
    }
}

/// Size of one subrecord once encoded, including any `XXXX` prefix
pub fn encoded_field_size(payload_len: usize) -> usize {
    let prefix = if payload_len > u16::MAX as usize {
        SUBRECORD_HEADER_SIZE + 4
    } else {
        0
    };
    prefix + SUBRECORD_HEADER_SIZE + payload_len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_orders() {
        let le = PayloadWriter::new(ByteOrder::Little).u32(0x0102_0304).finish();
        let be = PayloadWriter::new(ByteOrder::Big).u32(0x0102_0304).finish();
        assert_eq!(le, vec![4, 3, 2, 1]);
        assert_eq!(be, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_fixed_string_padding() {
        let out = PayloadWriter::new(ByteOrder::Little)
            .fixed_string("AB", 4)
            .fixed_string("TOOLONG", 3)
            .finish();
        assert_eq!(out, b"AB\0\0TOO".to_vec());
    }

    #[test]
    fn test_record_header_layout() {
        let bytes = RecordWriter::new(known::NPC_, FormId(0x1234), ByteOrder::Big)
            .zstring(known::EDID, "A")
            .to_bytes()
            .unwrap();
        assert_eq!(&bytes[0..4], b"_CPN");
        assert_eq!(&bytes[4..8], &[0, 0, 0, 8]);
        assert_eq!(&bytes[12..16], &[0, 0, 0x12, 0x34]);
        assert_eq!(&bytes[24..28], b"DIDE");
        assert_eq!(&bytes[28..30], &[0, 2]);
        assert_eq!(bytes.len(), RECORD_HEADER_SIZE + 8);
    }

    #[test]
    fn test_large_field_gets_extended_size() {
        let writer = RecordWriter::new(known::LAND, FormId(1), ByteOrder::Little)
            .field(Signature::new(b"VNML"), vec![0u8; 70_000]);
        let fields = writer.encode_fields();
        assert_eq!(&fields[0..4], b"XXXX");
        assert_eq!(&fields[4..6], &[4, 0]);
        assert_eq!(&fields[6..10], &70_000u32.to_le_bytes());
        assert_eq!(&fields[10..14], b"VNML");
        assert_eq!(&fields[14..16], &[0, 0]);
        assert_eq!(fields.len(), encoded_field_size(70_000));
    }

    #[test]
    fn test_compressed_sets_flag() {
        let bytes = RecordWriter::new(known::WEAP, FormId(1), ByteOrder::Little)
            .zstring(known::EDID, "Gun")
            .compressed()
            .to_bytes()
            .unwrap();
        let flags = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        assert_ne!(flags & FLAG_COMPRESSED, 0);
        // Decompressed size prefix: EDID header + "Gun\0"
        assert_eq!(&bytes[24..28], &10u32.to_le_bytes());
    }
}
