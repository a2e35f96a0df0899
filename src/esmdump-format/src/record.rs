//! Scanned records and their decoded subrecord fields

use serde::Serialize;

use crate::decode::StructuralDecodeError;
use crate::endian::ByteOrder;
use crate::schema::TypeTag;
use crate::signature::{FormId, Signature, TagOrientation};
use crate::{FLAG_COMPRESSED, FLAG_DELETED, RECORD_HEADER_SIZE};

/// A record located by the scanner; read-only after scanning
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawRecord {
    pub signature: Signature,
    pub form_id: FormId,
    /// Offset of the record header in the scanned buffer
    pub offset: usize,
    /// Data size from the header, excluding the header itself
    pub declared_size: u32,
    pub flags: u32,
    pub byte_order: ByteOrder,
    pub tag_orientation: TagOrientation,
    /// Both byte orders gave a plausible size
    pub ambiguous: bool,
}

impl RawRecord {
    pub fn data_offset(&self) -> usize {
        self.offset + RECORD_HEADER_SIZE
    }

    /// Offset one past the last data byte, as declared
    pub fn end(&self) -> usize {
        self.data_offset() + self.declared_size as usize
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }

    pub fn is_deleted(&self) -> bool {
        self.flags & FLAG_DELETED != 0
    }

    /// Shift the offset when a record was scanned inside a sub-slice
    pub fn rebased(mut self, base: usize) -> Self {
        self.offset += base;
        self
    }
}

/// A decoded scalar, string or composite value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    F32(f32),
    FormId(FormId),
    String(String),
    FormIds(Vec<FormId>),
    Bytes(Vec<u8>),
    Struct(Vec<(String, FieldValue)>),
}

impl FieldValue {
    /// Integer view of any integral value
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            FieldValue::U8(v) => Some(v as i64),
            FieldValue::I8(v) => Some(v as i64),
            FieldValue::U16(v) => Some(v as i64),
            FieldValue::I16(v) => Some(v as i64),
            FieldValue::U32(v) => Some(v as i64),
            FieldValue::I32(v) => Some(v as i64),
            FieldValue::FormId(v) => Some(v.0 as i64),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        self.as_i64().and_then(|v| u32::try_from(v).ok())
    }

    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            FieldValue::F32(v) => Some(v),
            _ => self.as_i64().map(|v| v as f32),
        }
    }

    pub fn as_form_id(&self) -> Option<FormId> {
        match *self {
            FieldValue::FormId(v) => Some(v),
            FieldValue::U32(v) => Some(FormId(v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_form_ids(&self) -> Option<&[FormId]> {
        match self {
            FieldValue::FormIds(ids) => Some(ids),
            _ => None,
        }
    }

    /// Named member of a struct value
    pub fn member(&self, name: &str) -> Option<&FieldValue> {
        match self {
            FieldValue::Struct(members) => members.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }
}

/// Payload of a subrecord: decoded per schema, or kept raw
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldData {
    Decoded(FieldValue),
    Raw(Vec<u8>),
}

/// One subrecord of a record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubrecordField {
    pub signature: Signature,
    /// Schema type used, `None` when the signature is unknown
    pub type_tag: Option<TypeTag>,
    pub data: FieldData,
}

impl SubrecordField {
    pub fn value(&self) -> Option<&FieldValue> {
        match &self.data {
            FieldData::Decoded(v) => Some(v),
            FieldData::Raw(_) => None,
        }
    }

    pub fn raw(&self) -> Option<&[u8]> {
        match &self.data {
            FieldData::Raw(bytes) => Some(bytes),
            FieldData::Decoded(_) => None,
        }
    }

    pub fn is_decoded(&self) -> bool {
        matches!(self.data, FieldData::Decoded(_))
    }
}

/// A record with its subrecord chain walked
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedRecord {
    pub record: RawRecord,
    /// Subrecords in capture order; repeated signatures stay separate entries
    pub fields: Vec<SubrecordField>,
    /// The chain stopped early at a truncation or an overrunning header
    pub partial: bool,
    pub errors: Vec<StructuralDecodeError>,
}

impl DecodedRecord {
    pub fn signature(&self) -> Signature {
        self.record.signature
    }

    pub fn form_id(&self) -> FormId {
        self.record.form_id
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.record.byte_order
    }

    /// Fields decoded against a schema entry; the duplicate-merge weight
    pub fn parsed_field_count(&self) -> usize {
        self.fields.iter().filter(|f| f.is_decoded()).count()
    }

    /// First subrecord with the given signature
    pub fn field(&self, signature: Signature) -> Option<&SubrecordField> {
        self.fields.iter().find(|f| f.signature == signature)
    }

    /// Every subrecord with the given signature, in order
    pub fn fields_with(&self, signature: Signature) -> impl Iterator<Item = &SubrecordField> {
        self.fields.iter().filter(move |f| f.signature == signature)
    }

    pub fn value(&self, signature: Signature) -> Option<&FieldValue> {
        self.field(signature).and_then(SubrecordField::value)
    }

    pub fn values(&self, signature: Signature) -> impl Iterator<Item = &FieldValue> {
        self.fields_with(signature).filter_map(SubrecordField::value)
    }

    pub fn string(&self, signature: Signature) -> Option<&str> {
        self.value(signature)
            .and_then(FieldValue::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn form_id_field(&self, signature: Signature) -> Option<FormId> {
        self.value(signature)
            .and_then(FieldValue::as_form_id)
            .and_then(FormId::non_null)
    }

    pub fn member(&self, signature: Signature, name: &str) -> Option<&FieldValue> {
        self.value(signature).and_then(|v| v.member(name))
    }

    pub fn editor_id(&self) -> Option<&str> {
        self.string(crate::signature::known::EDID)
    }

    pub fn display_name(&self) -> Option<&str> {
        self.string(crate::signature::known::FULL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::known;

    fn raw(offset: usize) -> RawRecord {
        RawRecord {
            signature: known::NPC_,
            form_id: FormId(0x10),
            offset,
            declared_size: 10,
            flags: FLAG_COMPRESSED,
            byte_order: ByteOrder::Big,
            tag_orientation: TagOrientation::Reversed,
            ambiguous: false,
        }
    }

    #[test]
    fn test_raw_record_bounds() {
        let r = raw(100);
        assert_eq!(r.data_offset(), 124);
        assert_eq!(r.end(), 134);
        assert!(r.is_compressed());
        assert!(!r.is_deleted());
        assert_eq!(r.rebased(50).offset, 150);
    }

    #[test]
    fn test_value_accessors() {
        let v = FieldValue::Struct(vec![
            ("level".to_string(), FieldValue::I16(5)),
            ("karma".to_string(), FieldValue::F32(-10.0)),
        ]);
        assert_eq!(v.member("level").and_then(FieldValue::as_i64), Some(5));
        assert_eq!(v.member("karma").and_then(FieldValue::as_f32), Some(-10.0));
        assert!(v.member("missing").is_none());
        assert_eq!(FieldValue::I32(-1).as_u32(), None);
    }

    #[test]
    fn test_repeated_fields_accumulate() {
        let field = |id: u32| SubrecordField {
            signature: known::FACT,
            type_tag: None,
            data: FieldData::Decoded(FieldValue::FormId(FormId(id))),
        };
        let rec = DecodedRecord {
            record: raw(0),
            fields: vec![field(1), field(2), field(3)],
            partial: false,
            errors: Vec::new(),
        };
        let ids: Vec<_> = rec
            .values(known::FACT)
            .filter_map(FieldValue::as_form_id)
            .collect();
        assert_eq!(ids, vec![FormId(1), FormId(2), FormId(3)]);
        assert_eq!(rec.parsed_field_count(), 3);
    }
}
