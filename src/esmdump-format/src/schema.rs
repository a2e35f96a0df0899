//! Declarative subrecord schema
//!
//! Maps `(record type, subrecord signature)` to a field type. Tables are
//! loaded from YAML so new layouts can be added without touching the
//! decoder; `*` as the record type matches any record.
//!
//! ```yaml
//! fields:
//!   - { record: "*", subrecord: EDID, type: zstring }
//!   - record: NPC_
//!     subrecord: DATA
//!     type: struct
//!     members:
//!       - { name: base_health, type: i32 }
//!       - { name: strength, type: u8 }
//! ```

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::endian::{ByteOrder, DecodeError, Reader};
use crate::record::FieldValue;
use crate::signature::{FormId, Signature};
use crate::{Error, Result};

/// Builtin layouts for the TES4-family record formats
const BUILTIN_SCHEMA: &str = include_str!("../data/schema.yaml");

/// Record type placeholder matching every record
pub const ANY_RECORD: Signature = Signature::new(b"****");

/// Field type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeTag {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    FormId,
    /// NUL-terminated string filling the payload
    ZString,
    /// Fixed-width string, NUL padded
    String,
    /// Packed array of form ids
    FormIds,
    /// Opaque bytes kept for a specialized decoder
    Bytes,
    /// Skipped bytes inside a struct
    Pad,
    Struct,
}

impl TypeTag {
    /// Width of scalar types
    pub fn width(self) -> Option<usize> {
        match self {
            TypeTag::U8 | TypeTag::I8 => Some(1),
            TypeTag::U16 | TypeTag::I16 => Some(2),
            TypeTag::U32 | TypeTag::I32 | TypeTag::F32 | TypeTag::FormId => Some(4),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TypeTag::U8 => "u8",
            TypeTag::I8 => "i8",
            TypeTag::U16 => "u16",
            TypeTag::I16 => "i16",
            TypeTag::U32 => "u32",
            TypeTag::I32 => "i32",
            TypeTag::F32 => "f32",
            TypeTag::FormId => "form_id",
            TypeTag::ZString => "zstring",
            TypeTag::String => "string",
            TypeTag::FormIds => "form_ids",
            TypeTag::Bytes => "bytes",
            TypeTag::Pad => "pad",
            TypeTag::Struct => "struct",
        }
    }
}

impl FromStr for TypeTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "u8" => TypeTag::U8,
            "i8" => TypeTag::I8,
            "u16" => TypeTag::U16,
            "i16" => TypeTag::I16,
            "u32" => TypeTag::U32,
            "i32" => TypeTag::I32,
            "f32" => TypeTag::F32,
            "form_id" | "formid" => TypeTag::FormId,
            "zstring" => TypeTag::ZString,
            "string" => TypeTag::String,
            "form_ids" | "formids" => TypeTag::FormIds,
            "bytes" => TypeTag::Bytes,
            "pad" => TypeTag::Pad,
            "struct" => TypeTag::Struct,
            other => return Err(Error::UnknownFieldType(other.to_string())),
        })
    }
}

/// Member of a struct field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    pub tag: TypeTag,
    /// Width for `string` and `pad` members
    pub size: Option<usize>,
}

impl Member {
    fn width(&self) -> usize {
        self.tag.width().or(self.size).unwrap_or(0)
    }
}

/// Schema entry for one subrecord
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub tag: TypeTag,
    /// Explicit size for strings and byte blobs
    pub size: Option<usize>,
    pub members: Vec<Member>,
}

impl FieldSpec {
    pub fn scalar(tag: TypeTag) -> Self {
        Self {
            tag,
            size: None,
            members: Vec::new(),
        }
    }

    /// Minimum payload length this entry needs, when it has one
    pub fn fixed_size(&self) -> Option<usize> {
        match self.tag {
            TypeTag::Struct => Some(self.members.iter().map(Member::width).sum()),
            TypeTag::String | TypeTag::Bytes | TypeTag::Pad => self.size,
            tag => tag.width(),
        }
    }

    /// Decode a payload; the caller has already checked `fixed_size`
    pub fn decode(&self, payload: &[u8], order: ByteOrder) -> std::result::Result<FieldValue, DecodeError> {
        let mut reader = Reader::new(payload, order);
        match self.tag {
            TypeTag::ZString => {
                let end = memchr::memchr(0, payload).unwrap_or(payload.len());
                Ok(FieldValue::String(
                    String::from_utf8_lossy(&payload[..end]).into_owned(),
                ))
            }
            TypeTag::String => {
                let width = self.size.unwrap_or(payload.len());
                Ok(FieldValue::String(reader.fixed_string(width)?))
            }
            TypeTag::FormIds => {
                let mut ids = Vec::with_capacity(payload.len() / 4);
                while reader.remaining() >= 4 {
                    ids.push(reader.form_id()?);
                }
                Ok(FieldValue::FormIds(ids))
            }
            TypeTag::Bytes | TypeTag::Pad => Ok(FieldValue::Bytes(payload.to_vec())),
            TypeTag::Struct => {
                let mut values = Vec::with_capacity(self.members.len());
                for member in &self.members {
                    if member.tag == TypeTag::Pad {
                        reader.skip(member.size.unwrap_or(0))?;
                        continue;
                    }
                    let value = read_scalar(&mut reader, member.tag, member.size)?;
                    values.push((member.name.clone(), value));
                }
                Ok(FieldValue::Struct(values))
            }
            tag => read_scalar(&mut reader, tag, self.size),
        }
    }
}

fn read_scalar(
    reader: &mut Reader<'_>,
    tag: TypeTag,
    size: Option<usize>,
) -> std::result::Result<FieldValue, DecodeError> {
    Ok(match tag {
        TypeTag::U8 => FieldValue::U8(reader.u8()?),
        TypeTag::I8 => FieldValue::I8(reader.i8()?),
        TypeTag::U16 => FieldValue::U16(reader.u16()?),
        TypeTag::I16 => FieldValue::I16(reader.i16()?),
        TypeTag::U32 => FieldValue::U32(reader.u32()?),
        TypeTag::I32 => FieldValue::I32(reader.i32()?),
        TypeTag::F32 => FieldValue::F32(reader.f32()?),
        TypeTag::FormId => FieldValue::FormId(FormId(reader.u32()?)),
        TypeTag::String => FieldValue::String(reader.fixed_string(size.unwrap_or(0))?),
        _ => FieldValue::Bytes(reader.bytes(size.unwrap_or(0))?.to_vec()),
    })
}

#[derive(Deserialize)]
struct RawSchema {
    #[serde(default)]
    fields: Vec<RawEntry>,
}

#[derive(Deserialize)]
struct RawEntry {
    record: String,
    subrecord: String,
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    size: Option<usize>,
    #[serde(default)]
    members: Vec<RawMember>,
}

#[derive(Deserialize)]
struct RawMember {
    name: String,
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    size: Option<usize>,
}

/// Lookup table `(record type, subrecord) -> FieldSpec`
#[derive(Debug, Clone, Default)]
pub struct SchemaTable {
    entries: HashMap<(Signature, Signature), FieldSpec>,
}

impl SchemaTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The embedded table covering the record types reconstructed downstream
    pub fn builtin() -> Self {
        // The embedded table is validated by tests; an error here is a build defect
        Self::from_yaml(BUILTIN_SCHEMA).unwrap_or_else(|e| {
            tracing::error!("builtin schema failed to load: {}", e);
            Self::default()
        })
    }

    /// Parse a YAML table
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let raw: RawSchema = serde_yaml::from_str(yaml)?;
        let mut table = Self::new();

        for entry in raw.fields {
            let record: Signature = if entry.record == "*" {
                ANY_RECORD
            } else {
                entry.record.parse()?
            };
            let subrecord: Signature = entry.subrecord.parse()?;
            let tag: TypeTag = entry.type_name.parse()?;

            let mut members = Vec::with_capacity(entry.members.len());
            for m in entry.members {
                let member_tag: TypeTag = m.type_name.parse()?;
                if member_tag.width().is_none() && m.size.is_none() {
                    return Err(Error::MissingSize {
                        record: entry.record.clone(),
                        subrecord: format!("{}.{}", entry.subrecord, m.name),
                        type_tag: m.type_name,
                    });
                }
                members.push(Member {
                    name: m.name,
                    tag: member_tag,
                    size: m.size,
                });
            }

            table.insert(
                record,
                subrecord,
                FieldSpec {
                    tag,
                    size: entry.size,
                    members,
                },
            );
        }

        Ok(table)
    }

    pub fn insert(&mut self, record: Signature, subrecord: Signature, spec: FieldSpec) {
        self.entries.insert((record, subrecord), spec);
    }

    /// Overlay another table; its entries win
    pub fn extend(&mut self, other: SchemaTable) {
        self.entries.extend(other.entries);
    }

    /// Record-specific entry first, then the wildcard entry
    pub fn lookup(&self, record: Signature, subrecord: Signature) -> Option<&FieldSpec> {
        self.entries
            .get(&(record, subrecord))
            .or_else(|| self.entries.get(&(ANY_RECORD, subrecord)))
    }

    /// Record types with at least one specific entry
    pub fn record_types(&self) -> BTreeSet<Signature> {
        self.entries
            .keys()
            .map(|(record, _)| *record)
            .filter(|r| *r != ANY_RECORD)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
