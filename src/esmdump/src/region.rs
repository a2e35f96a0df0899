//! Capture layout: which file bytes hold which runtime addresses
//!
//! A capture is a set of disjoint address ranges copied into one file. The
//! map is built once, sorted by address, and never changes afterwards.

use std::ops::Range;

use byteorder::{ByteOrder as _, LE};
use esmdump_format::ByteOrder;
use serde::{Deserialize, Serialize};

/// MDMP signature "MDMP" in little-endian
const MDMP_SIGNATURE: u32 = 0x504D_444D;

/// MDMP stream type holding 64-bit memory ranges
const MEMORY_64_LIST_STREAM: u32 = 9;

/// One contiguous address range stored in the capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRegion {
    /// Offset of the first byte in the capture file
    pub start_offset: usize,
    pub length: usize,
    /// Runtime address of the first byte
    pub base_address: u64,
    /// Byte order of runtime structures in this region, when known
    #[serde(default)]
    pub endianness_hint: Option<ByteOrder>,
}

impl MemoryRegion {
    pub fn new(start_offset: usize, length: usize, base_address: u64) -> Self {
        Self {
            start_offset,
            length,
            base_address,
            endianness_hint: None,
        }
    }

    pub fn with_hint(mut self, order: ByteOrder) -> Self {
        self.endianness_hint = Some(order);
        self
    }

    /// One past the last address
    pub fn end_address(&self) -> u64 {
        self.base_address.saturating_add(self.length as u64)
    }

    pub fn end_offset(&self) -> usize {
        self.start_offset.saturating_add(self.length)
    }

    pub fn file_range(&self) -> Range<usize> {
        self.start_offset..self.end_offset()
    }

    pub fn contains_address(&self, address: u64) -> bool {
        address >= self.base_address && address < self.end_address()
    }

    pub fn offset_of(&self, address: u64) -> Option<usize> {
        if !self.contains_address(address) {
            return None;
        }
        Some(self.start_offset + (address - self.base_address) as usize)
    }
}

/// A region list that cannot describe a consistent address space
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegionError {
    #[error("Region at {base_address:#x} has zero length")]
    Empty { base_address: u64 },

    #[error("Region at {second:#x} overlaps region at {first:#x}")]
    Overlap { first: u64, second: u64 },

    #[error("Region at {base_address:#x} ends at file offset {end_offset:#x}, past capture end {buffer_len:#x}")]
    PastBuffer {
        base_address: u64,
        end_offset: usize,
        buffer_len: usize,
    },

    #[error("Region at {base_address:#x} wraps the address space")]
    Wraps { base_address: u64 },

    #[error("Malformed minidump: {0}")]
    Minidump(String),
}

/// Sorted, non-overlapping regions with address-to-offset translation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegionMap {
    regions: Vec<MemoryRegion>,
}

impl RegionMap {
    pub fn new(mut regions: Vec<MemoryRegion>) -> Result<Self, RegionError> {
        for r in &regions {
            if r.length == 0 {
                return Err(RegionError::Empty {
                    base_address: r.base_address,
                });
            }
            if r.base_address.checked_add(r.length as u64).is_none() {
                return Err(RegionError::Wraps {
                    base_address: r.base_address,
                });
            }
        }

        regions.sort_by_key(|r| r.base_address);
        for pair in regions.windows(2) {
            if pair[1].base_address < pair[0].end_address() {
                return Err(RegionError::Overlap {
                    first: pair[0].base_address,
                    second: pair[1].base_address,
                });
            }
        }

        Ok(Self { regions })
    }

    /// Like `new`, also rejecting regions whose bytes lie past the capture end
    pub fn with_buffer_len(regions: Vec<MemoryRegion>, buffer_len: usize) -> Result<Self, RegionError> {
        let map = Self::new(regions)?;
        if let Some(r) = map.regions.iter().find(|r| r.end_offset() > buffer_len) {
            return Err(RegionError::PastBuffer {
                base_address: r.base_address,
                end_offset: r.end_offset(),
                buffer_len,
            });
        }
        Ok(map)
    }

    /// Whole capture as one region, for captures with no layout metadata
    pub fn single(buffer_len: usize, base_address: u64, hint: Option<ByteOrder>) -> Self {
        let mut region = MemoryRegion::new(0, buffer_len, base_address);
        region.endianness_hint = hint;
        Self {
            regions: if buffer_len == 0 { Vec::new() } else { vec![region] },
        }
    }

    pub fn region_containing(&self, address: u64) -> Option<&MemoryRegion> {
        let idx = self.regions.partition_point(|r| r.base_address <= address);
        let region = self.regions.get(idx.checked_sub(1)?)?;
        region.contains_address(address).then_some(region)
    }

    /// File offset of `address`; `None` when no region holds it
    pub fn translate_to_offset(&self, address: u64) -> Option<usize> {
        self.region_containing(address)?.offset_of(address)
    }

    pub fn region_for_offset(&self, offset: usize) -> Option<&MemoryRegion> {
        self.regions
            .iter()
            .find(|r| offset >= r.start_offset && offset < r.end_offset())
    }

    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    /// File ranges of every region, in address order
    pub fn file_ranges(&self) -> Vec<Range<usize>> {
        self.regions.iter().map(MemoryRegion::file_range).collect()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// Cut a region list down to the bytes the capture holds
///
/// A region running past `buffer_len` keeps its leading bytes; one starting
/// at or past it is dropped, as is one that would wrap the address space.
pub fn fit_to_buffer(regions: Vec<MemoryRegion>, buffer_len: usize) -> Vec<MemoryRegion> {
    regions
        .into_iter()
        .filter_map(|mut r| {
            if r.length == 0 {
                return None;
            }
            if r.start_offset >= buffer_len {
                tracing::warn!(
                    "Dropping region at {:#x}: file offset {:#x} is past capture end {:#x}",
                    r.base_address,
                    r.start_offset,
                    buffer_len
                );
                return None;
            }
            let available = buffer_len - r.start_offset;
            if r.length > available {
                tracing::warn!(
                    "Truncating region at {:#x} from {:#x} to {:#x} bytes at capture end",
                    r.base_address,
                    r.length,
                    available
                );
                r.length = available;
            }
            if r.base_address.checked_add(r.length as u64).is_none() {
                tracing::warn!("Dropping region at {:#x}: wraps the address space", r.base_address);
                return None;
            }
            Some(r)
        })
        .collect()
}

/// Parse a layout sidecar
///
/// Two line formats are accepted:
/// - `0xSTART 0xEND SIZE FILE_OFFSET` (hex, as written by dump tools)
/// - `/proc/<pid>/maps` lines; readable regions are taken to be stored back
///   to back in listing order
///
/// Blank lines, `#` comments and malformed lines are skipped.
pub fn parse_maps(text: &str, hint: Option<ByteOrder>) -> Vec<MemoryRegion> {
    let mut regions = Vec::new();
    let mut next_offset = 0usize;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        let region = if parts[0].starts_with("0x") {
            if parts.len() < 4 {
                continue;
            }
            let (Some(start), Some(end), Some(offset)) =
                (parse_hex(parts[0]), parse_hex(parts[1]), parse_hex(parts[3]))
            else {
                continue;
            };
            if end <= start {
                continue;
            }
            MemoryRegion::new(offset as usize, (end - start) as usize, start)
        } else {
            let Some((start, end)) = parts[0].split_once('-') else {
                continue;
            };
            let (Some(start), Some(end)) = (parse_hex(start), parse_hex(end)) else {
                continue;
            };
            let readable = parts.get(1).is_some_and(|p| p.starts_with('r'));
            if end <= start || !readable {
                continue;
            }
            let length = (end - start) as usize;
            let region = MemoryRegion::new(next_offset, length, start);
            next_offset += length;
            region
        };

        regions.push(MemoryRegion {
            endianness_hint: hint,
            ..region
        });
    }

    regions
}

fn parse_hex(s: &str) -> Option<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

/// Check for the minidump signature
pub fn is_minidump(data: &[u8]) -> bool {
    data.len() >= 4 && LE::read_u32(&data[0..4]) == MDMP_SIGNATURE
}

/// Read the memory ranges of a Windows minidump (`Memory64ListStream`)
pub fn parse_minidump(data: &[u8]) -> Result<Vec<MemoryRegion>, RegionError> {
    if data.len() < 32 || !is_minidump(data) {
        return Err(RegionError::Minidump("missing header".to_string()));
    }

    let num_streams = LE::read_u32(&data[0x08..0x0C]) as usize;
    let stream_dir_rva = LE::read_u32(&data[0x0C..0x10]) as usize;

    for i in 0..num_streams {
        let entry = stream_dir_rva + i * 12;
        let Some(dir) = data.get(entry..entry + 12) else {
            break;
        };
        if LE::read_u32(&dir[0..4]) != MEMORY_64_LIST_STREAM {
            continue;
        }

        let rva = LE::read_u32(&dir[8..12]) as usize;
        let header = data
            .get(rva..rva + 16)
            .ok_or_else(|| RegionError::Minidump("Memory64ListStream out of bounds".to_string()))?;
        let num_ranges = LE::read_u64(&header[0..8]) as usize;
        let mut file_offset = LE::read_u64(&header[8..16]) as usize;

        let mut regions = Vec::new();
        for j in 0..num_ranges {
            let desc = rva + 16 + j * 16;
            let Some(d) = data.get(desc..desc + 16) else {
                break;
            };
            let start = LE::read_u64(&d[0..8]);
            let size = LE::read_u64(&d[8..16]) as usize;
            if size > 0 {
                regions.push(MemoryRegion::new(file_offset, size, start));
            }
            let Some(next) = file_offset.checked_add(size) else {
                tracing::warn!("Minidump range {} at {:#x} overflows the file offset", j, start);
                break;
            };
            file_offset = next;
        }

        tracing::debug!("Minidump: {} memory ranges", regions.len());
        return Ok(regions);
    }

    Err(RegionError::Minidump(
        "no Memory64ListStream, capture may be incomplete".to_string(),
    ))
}
