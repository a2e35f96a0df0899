//! Decoders for subrecord payloads that need more than a schema entry
//!
//! The schema keeps these as raw bytes; the decoders here interpret them.

pub mod heightmap;
pub mod texture;
