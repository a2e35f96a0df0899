//! Byte-level record format for Bethesda-style plugin data found in memory captures
//!
//! Console captures hold fragments of the loaded plugin files scattered across
//! process memory, with no file header to anchor on. This crate finds and
//! decodes those fragments.
//!
//! # Format Overview
//!
//! ## Record header (24 bytes)
//! - Bytes 0-3: Signature (four character code, e.g. `NPC_`)
//! - Bytes 4-7: Data size (excludes this header)
//! - Bytes 8-11: Flags (`0x00040000` = zlib compressed)
//! - Bytes 12-15: FormId
//! - Bytes 16-23: Version control info (ignored)
//!
//! ## Subrecord header (6 bytes)
//! - Bytes 0-3: Signature
//! - Bytes 4-5: Payload size (`XXXX` carries a 32-bit size for the next subrecord)
//!
//! Big-endian consoles write the four character codes as integers, so on those
//! captures every tag appears byte-reversed (`_CPN` instead of `NPC_`).

pub mod decode;
pub mod endian;
pub mod payload;
pub mod record;
pub mod scanner;
pub mod schema;
pub mod signature;
pub mod writer;

pub use decode::{decode_record, decode_records, StructuralDecodeError};
pub use endian::{ByteOrder, DecodeError, Reader};
pub use payload::heightmap::{decode_vhgt, HeightGrid};
pub use payload::texture::{untile, LinearTexture, TextureFormat, TiledTexture};
pub use record::{DecodedRecord, FieldData, FieldValue, RawRecord, SubrecordField};
pub use scanner::{scan_ranges, RecordScanner, Records, ScanOptions};
pub use schema::{FieldSpec, Member, SchemaTable, TypeTag, ANY_RECORD};
pub use signature::{FormId, Signature, TagOrientation};
pub use writer::{PayloadWriter, RecordWriter};

/// Record header size in bytes
pub const RECORD_HEADER_SIZE: usize = 24;

/// Subrecord header size in bytes
pub const SUBRECORD_HEADER_SIZE: usize = 6;

/// Record flag: data is zlib compressed, prefixed with the decompressed size
pub const FLAG_COMPRESSED: u32 = 0x0004_0000;

/// Record flag: record was deleted in the plugin
pub const FLAG_DELETED: u32 = 0x0000_0020;

/// Errors from schema loading and top-level format operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid signature {0:?}: expected four ASCII characters")]
    InvalidSignature(String),

    #[error("Unknown field type {0:?}")]
    UnknownFieldType(String),

    #[error("Field type {type_tag} for {record}/{subrecord} needs an explicit size")]
    MissingSize {
        record: String,
        subrecord: String,
        type_tag: String,
    },

    #[error("Schema parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
