//! Record discovery in unstructured memory
//!
//! Captures have no file header or group structure to follow, so records are
//! found by their four character code and validated by their declared size.
//! Each header size is tried in both byte orders; tag orientation only breaks
//! ties, since little-endian payloads turn up next to reversed console tags.

use std::collections::HashMap;
use std::ops::Range;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::endian::{read_u16, read_u32, ByteOrder};
use crate::record::RawRecord;
use crate::signature::{known, FormId, Signature, TagOrientation};
use crate::{FLAG_COMPRESSED, RECORD_HEADER_SIZE, SUBRECORD_HEADER_SIZE};

/// Scanner tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Record types to look for
    pub signatures: Vec<Signature>,
    /// Smallest plausible data size; one subrecord header
    pub min_record_size: u32,
    /// Largest plausible data size
    pub max_record_size: u32,
    /// Require the first subrecord tag to look like a tag
    pub check_first_subrecord: bool,
    /// Byte order for ties between two equally plausible readings; the
    /// tag orientation decides when unset
    pub preferred_order: Option<ByteOrder>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            signatures: known::RECORD_TYPES.to_vec(),
            min_record_size: SUBRECORD_HEADER_SIZE as u32,
            max_record_size: 4 * 1024 * 1024,
            check_first_subrecord: true,
            preferred_order: None,
        }
    }
}

/// Finds record headers in a buffer
#[derive(Debug, Clone)]
pub struct RecordScanner {
    options: ScanOptions,
    /// Stored tag bytes to canonical signature and orientation
    tags: HashMap<[u8; 4], (Signature, TagOrientation)>,
    /// Cheap reject before the tag lookup
    first_bytes: [bool; 256],
}

impl RecordScanner {
    pub fn new(signatures: &[Signature]) -> Self {
        Self::with_options(ScanOptions {
            signatures: signatures.to_vec(),
            ..ScanOptions::default()
        })
    }

    pub fn with_options(options: ScanOptions) -> Self {
        let mut tags = HashMap::new();
        let mut first_bytes = [false; 256];

        for &sig in &options.signatures {
            for orientation in [TagOrientation::Canonical, TagOrientation::Reversed] {
                let stored = sig.stored(orientation);
                tags.entry(stored).or_insert((sig, orientation));
                first_bytes[stored[0] as usize] = true;
            }
        }

        Self {
            options,
            tags,
            first_bytes,
        }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Iterate records in offset order
    ///
    /// After a record is accepted the scan resumes at its end, so subrecord
    /// data is never reported as a nested record.
    pub fn scan<'a>(&'a self, buffer: &'a [u8]) -> Records<'a> {
        Records {
            scanner: self,
            buffer,
            pos: 0,
        }
    }

    /// Validate a record header at exactly `offset`
    pub fn probe(&self, buffer: &[u8], offset: usize) -> Option<RawRecord> {
        let header = buffer.get(offset..offset.checked_add(RECORD_HEADER_SIZE)?)?;
        let stored = [header[0], header[1], header[2], header[3]];
        let &(signature, orientation) = self.tags.get(&stored)?;

        let plausible = |order: ByteOrder| -> Option<u32> {
            let size = read_u32(header, 4, order).ok()?;
            let end = offset + RECORD_HEADER_SIZE + size as usize;
            (size >= self.options.min_record_size
                && size <= self.options.max_record_size
                && end <= buffer.len())
            .then_some(size)
        };

        let implied = match orientation {
            TagOrientation::Reversed => ByteOrder::Big,
            TagOrientation::Canonical => ByteOrder::Little,
        };

        let (order, size, ambiguous) = match (
            plausible(ByteOrder::Little),
            plausible(ByteOrder::Big),
        ) {
            (Some(le), Some(be)) => {
                let le_overrun = implied_overrun(buffer, offset, le, ByteOrder::Little, orientation);
                let be_overrun = implied_overrun(buffer, offset, be, ByteOrder::Big, orientation);
                let order = match le_overrun.cmp(&be_overrun) {
                    std::cmp::Ordering::Less => ByteOrder::Little,
                    std::cmp::Ordering::Greater => ByteOrder::Big,
                    std::cmp::Ordering::Equal => self.options.preferred_order.unwrap_or(implied),
                };
                tracing::trace!(
                    "Ambiguous {} at {:#x}: overrun le={} be={}, chose {}",
                    signature,
                    offset,
                    le_overrun,
                    be_overrun,
                    order.name()
                );
                let size = if order == ByteOrder::Little { le } else { be };
                (order, size, true)
            }
            (Some(le), None) => (ByteOrder::Little, le, false),
            (None, Some(be)) => (ByteOrder::Big, be, false),
            (None, None) => return None,
        };

        let flags = read_u32(header, 8, order).ok()?;
        let form_id = FormId(read_u32(header, 12, order).ok()?);

        if self.options.check_first_subrecord && flags & FLAG_COMPRESSED == 0 {
            let first = Signature::read(buffer, offset + RECORD_HEADER_SIZE, orientation).ok()?;
            if !first.is_plausible() {
                return None;
            }
        }

        Some(RawRecord {
            signature,
            form_id,
            offset,
            declared_size: size,
            flags,
            byte_order: order,
            tag_orientation: orientation,
            ambiguous,
        })
    }
}

/// Distance between where the subrecord chain ends and where the header says
/// the record ends, reading sizes at `order`
///
/// The right byte order walks the chain to exactly the declared end; the
/// wrong one jumps around and lands elsewhere. Compressed data has no
/// walkable chain and scores zero.
fn implied_overrun(
    buffer: &[u8],
    offset: usize,
    size: u32,
    order: ByteOrder,
    orientation: TagOrientation,
) -> usize {
    let flags = read_u32(buffer, offset + 8, order).unwrap_or(0);
    if flags & FLAG_COMPRESSED != 0 {
        return 0;
    }

    let end = offset + RECORD_HEADER_SIZE + size as usize;
    let mut pos = offset + RECORD_HEADER_SIZE;
    let mut extended: Option<usize> = None;

    while pos + SUBRECORD_HEADER_SIZE <= end {
        let (Ok(sig), Ok(short)) = (
            Signature::read(buffer, pos, orientation),
            read_u16(buffer, pos + 4, order),
        ) else {
            break;
        };
        if sig == known::XXXX && short == 4 {
            match read_u32(buffer, pos + SUBRECORD_HEADER_SIZE, order) {
                Ok(v) => extended = Some(v as usize),
                Err(_) => break,
            }
            pos += SUBRECORD_HEADER_SIZE + 4;
            continue;
        }
        let len = extended.take().unwrap_or(short as usize);
        pos = pos.saturating_add(SUBRECORD_HEADER_SIZE + len);
    }

    pos.abs_diff(end)
}

/// Lazy iterator over the records in a buffer
#[derive(Debug, Clone)]
pub struct Records<'a> {
    scanner: &'a RecordScanner,
    buffer: &'a [u8],
    pos: usize,
}

impl Iterator for Records<'_> {
    type Item = RawRecord;

    fn next(&mut self) -> Option<RawRecord> {
        while self.pos + RECORD_HEADER_SIZE <= self.buffer.len() {
            let at = self.pos;
            if !self.scanner.first_bytes[self.buffer[at] as usize] {
                self.pos += 1;
                continue;
            }
            if let Some(record) = self.scanner.probe(self.buffer, at) {
                self.pos = record.end();
                return Some(record);
            }
            self.pos += 1;
        }
        None
    }
}

/// Scan several buffer ranges in parallel
///
/// Records never straddle a range boundary. Offsets in the result are
/// relative to `buffer`, sorted ascending.
pub fn scan_ranges(
    buffer: &[u8],
    ranges: &[Range<usize>],
    options: &ScanOptions,
) -> Vec<RawRecord> {
    let scanner = RecordScanner::with_options(options.clone());

    let mut records: Vec<RawRecord> = ranges
        .par_iter()
        .filter_map(|range| {
            let slice = buffer.get(range.clone())?;
            let found: Vec<RawRecord> = scanner
                .scan(slice)
                .map(|r| r.rebased(range.start))
                .collect();
            tracing::debug!(
                "Range {:#x}..{:#x}: {} records",
                range.start,
                range.end,
                found.len()
            );
            Some(found)
        })
        .flatten()
        .collect();

    records.sort_by_key(|r| r.offset);
    records.dedup_by_key(|r| r.offset);
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::RecordWriter;

    const DATA: Signature = Signature::new(b"DATA");

    fn scanner() -> RecordScanner {
        RecordScanner::new(known::RECORD_TYPES)
    }

    /// Record whose size bytes read 256 little-endian and 65536 big-endian,
    /// holding one EDID payload of `payload_len` with the given size bytes
    fn ambiguous_record(
        orientation: TagOrientation,
        size_bytes: [u8; 2],
        payload_len: usize,
    ) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&known::NPC_.stored(orientation));
        buf.extend_from_slice(&[0x00, 0x01, 0x00, 0x00]);
        buf.extend_from_slice(&[0; 4]);
        buf.extend_from_slice(&[0x11, 0x00, 0x00, 0x11]);
        buf.extend_from_slice(&[0; 8]);
        buf.extend_from_slice(&known::EDID.stored(orientation));
        buf.extend_from_slice(&size_bytes);
        buf.extend(std::iter::repeat(b'A').take(payload_len - 1));
        buf.push(0);
        // Room for the big-endian reading, filled so its chain overshoots
        buf.resize(RECORD_HEADER_SIZE + 65_536 + 64, 0xFF);
        buf
    }

    #[test]
    fn test_finds_big_endian_record() {
        let mut buffer = vec![0u8; 37];
        buffer.extend(
            RecordWriter::new(known::NPC_, FormId(0x10), ByteOrder::Big)
                .zstring(known::EDID, "TestNPC")
                .to_bytes()
                .unwrap(),
        );
        buffer.extend(vec![0u8; 13]);

        let records: Vec<_> = scanner().scan(&buffer).collect();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.offset, 37);
        assert_eq!(r.signature, known::NPC_);
        assert_eq!(r.byte_order, ByteOrder::Big);
        assert_eq!(r.tag_orientation, TagOrientation::Reversed);
        assert_eq!(r.form_id, FormId(0x10));
        assert!(!r.ambiguous);
    }

    #[test]
    fn test_single_plausible_order() {
        // 40 bytes little-endian reads as 0x28000000 big-endian
        let payload = vec![0u8; 34];
        let bytes = RecordWriter::new(known::WEAP, FormId(1), ByteOrder::Little)
            .field(DATA, payload)
            .to_bytes()
            .unwrap();
        assert_eq!(&bytes[4..8], &[40, 0, 0, 0]);
        let r = scanner().probe(&bytes, 0).unwrap();
        assert_eq!(r.byte_order, ByteOrder::Little);
        assert_eq!(r.declared_size, 40);
        assert!(!r.ambiguous);
    }

    #[test]
    fn test_ambiguous_little_endian_wins_over_reversed_tags() {
        // EDID size 250 little-endian completes the 256-byte record exactly
        let buffer = ambiguous_record(TagOrientation::Reversed, [0xFA, 0x00], 250);
        let r = scanner().probe(&buffer, 0).unwrap();
        assert!(r.ambiguous);
        assert_eq!(r.byte_order, ByteOrder::Little);
        assert_eq!(r.declared_size, 256);
        assert_eq!(r.tag_orientation, TagOrientation::Reversed);
    }

    #[test]
    fn test_ambiguous_big_endian_wins_over_canonical_tags() {
        // EDID size 65530 big-endian completes the 65536-byte record exactly
        let buffer = ambiguous_record(TagOrientation::Canonical, [0xFF, 0xFA], 65_530);
        let r = scanner().probe(&buffer, 0).unwrap();
        assert!(r.ambiguous);
        assert_eq!(r.byte_order, ByteOrder::Big);
        assert_eq!(r.declared_size, 65_536);
        assert_eq!(r.tag_orientation, TagOrientation::Canonical);
    }

    #[test]
    fn test_ambiguous_tie_follows_orientation() {
        for (orientation, expected) in [
            (TagOrientation::Canonical, ByteOrder::Little),
            (TagOrientation::Reversed, ByteOrder::Big),
        ] {
            let mut buffer = ambiguous_record(orientation, [0xFA, 0x00], 250);
            // Compressed under both readings: no chain to compare
            buffer[8..12].copy_from_slice(&[0x00, 0x04, 0x04, 0x00]);
            let r = scanner().probe(&buffer, 0).unwrap();
            assert!(r.ambiguous);
            assert_eq!(r.byte_order, expected);
        }
    }

    #[test]
    fn test_ambiguous_tie_uses_preferred_order() {
        let mut buffer = ambiguous_record(TagOrientation::Canonical, [0xFA, 0x00], 250);
        buffer[8..12].copy_from_slice(&[0x00, 0x04, 0x04, 0x00]);
        let scanner = RecordScanner::with_options(ScanOptions {
            preferred_order: Some(ByteOrder::Big),
            ..ScanOptions::default()
        });
        let r = scanner.probe(&buffer, 0).unwrap();
        assert!(r.ambiguous);
        assert_eq!(r.byte_order, ByteOrder::Big);
    }

    #[test]
    fn test_rejects_implausible_size() {
        let mut bytes = RecordWriter::new(known::NPC_, FormId(1), ByteOrder::Little)
            .zstring(known::EDID, "X")
            .to_bytes()
            .unwrap();
        bytes[4..8].copy_from_slice(&[0xFF, 0xFF, 0xFF, 0x7F]);
        assert!(scanner().probe(&bytes, 0).is_none());
        assert_eq!(scanner().scan(&bytes).count(), 0);
    }

    #[test]
    fn test_rejects_garbage_first_subrecord() {
        let mut bytes = RecordWriter::new(known::NPC_, FormId(1), ByteOrder::Little)
            .zstring(known::EDID, "X")
            .to_bytes()
            .unwrap();
        bytes[24..28].copy_from_slice(&[0x01, 0x02, 0x03, 0x04]);
        assert!(scanner().probe(&bytes, 0).is_none());
    }

    #[test]
    fn test_resumes_after_record() {
        // A record-shaped payload inside EDID must not be reported
        let inner = RecordWriter::new(known::WEAP, FormId(2), ByteOrder::Little)
            .zstring(known::EDID, "Inner")
            .to_bytes()
            .unwrap();
        let outer = RecordWriter::new(known::MISC, FormId(1), ByteOrder::Little)
            .field(known::EDID, inner)
            .to_bytes()
            .unwrap();
        let records: Vec<_> = scanner().scan(&outer).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].signature, known::MISC);
    }

    #[test]
    fn test_scan_ranges_rebases_offsets() {
        let rec = |id| {
            RecordWriter::new(known::AMMO, FormId(id), ByteOrder::Big)
                .zstring(known::EDID, "Round")
                .to_bytes()
                .unwrap()
        };
        let mut buffer = vec![0u8; 100];
        buffer.extend(rec(1));
        let second = buffer.len() + 50;
        buffer.extend(vec![0u8; 50]);
        buffer.extend(rec(2));

        let ranges = vec![second - 10..buffer.len(), 0..second - 10];
        let records = scan_ranges(&buffer, &ranges, &ScanOptions::default());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].offset, 100);
        assert_eq!(records[0].form_id, FormId(1));
        assert_eq!(records[1].offset, second);
        assert_eq!(records[1].form_id, FormId(2));
    }

    #[test]
    fn test_scan_options_from_yaml() {
        let options: ScanOptions =
            serde_yaml::from_str("signatures: [NPC_, QUST]\nmax_record_size: 1024\n").unwrap();
        assert_eq!(options.signatures, vec![known::NPC_, known::QUST]);
        assert_eq!(options.max_record_size, 1024);
        assert!(options.check_first_subrecord);
    }
}
