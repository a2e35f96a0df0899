//! Address translation and checked reads of runtime objects
//!
//! Any pointer may be stale, point outside the capture, or point at freed
//! memory. Every read is therefore fallible, and a failure only means the
//! runtime has nothing more to add for that pointer.

use std::sync::atomic::{AtomicUsize, Ordering};

use esmdump_format::endian::{read_bytes, read_null_terminated, read_u32, read_u64, read_u8};
use esmdump_format::FormId;
use serde::Serialize;

use super::layout::RuntimeLayout;
use crate::region::RegionMap;

/// Why a pointer gave no data
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnresolvedPointer {
    #[error("Null pointer")]
    Null,

    #[error("Address {address:#x} is outside every captured region")]
    Unmapped { address: u64 },

    #[error("Read of {width} bytes at {address:#x} runs past its region")]
    Truncated { address: u64, width: usize },

    #[error("Form at {address:#x} reports id {found}, expected {expected}")]
    FormIdMismatch {
        address: u64,
        expected: FormId,
        found: FormId,
    },

    #[error("Form at {address:#x} has type {found:#04x}, expected {expected:#04x}")]
    FormTypeMismatch { address: u64, expected: u8, found: u8 },

    #[error("Implausible {what} {value:#x} at {address:#x}")]
    Implausible {
        address: u64,
        what: &'static str,
        value: u64,
    },

    #[error("Walk revisited {address:#x}")]
    Cycle { address: u64 },

    #[error("Walk stopped after {limit} nodes")]
    LimitReached { limit: usize },

    #[error("Layout offset {field} is not configured")]
    NotConfigured { field: &'static str },
}

/// Form header as read from runtime memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuntimeForm {
    pub address: u64,
    pub form_type: u8,
    pub flags: u32,
    pub form_id: FormId,
}

/// Checked reads through the region map
pub struct PointerResolver<'a> {
    buffer: &'a [u8],
    regions: &'a RegionMap,
    layout: &'a RuntimeLayout,
    failures: AtomicUsize,
}

impl<'a> PointerResolver<'a> {
    pub fn new(buffer: &'a [u8], regions: &'a RegionMap, layout: &'a RuntimeLayout) -> Self {
        Self {
            buffer,
            regions,
            layout,
            failures: AtomicUsize::new(0),
        }
    }

    pub fn layout(&self) -> &RuntimeLayout {
        self.layout
    }

    /// Borrow `width` bytes at `address`; the read may not leave its region
    pub fn dereference(&self, address: u64, width: usize) -> Result<&'a [u8], UnresolvedPointer> {
        if address == 0 {
            return Err(UnresolvedPointer::Null);
        }
        let region = self
            .regions
            .region_containing(address)
            .ok_or(UnresolvedPointer::Unmapped { address })?;
        let last = address
            .checked_add(width as u64)
            .ok_or(UnresolvedPointer::Truncated { address, width })?;
        if last > region.end_address() {
            return Err(UnresolvedPointer::Truncated { address, width });
        }
        let offset = region
            .offset_of(address)
            .ok_or(UnresolvedPointer::Unmapped { address })?;
        read_bytes(self.buffer, offset, width).map_err(|_| UnresolvedPointer::Truncated { address, width })
    }

    pub fn read_u8(&self, address: u64) -> Result<u8, UnresolvedPointer> {
        let bytes = self.dereference(address, 1)?;
        read_u8(bytes, 0).map_err(|_| UnresolvedPointer::Truncated { address, width: 1 })
    }

    pub fn read_u32(&self, address: u64) -> Result<u32, UnresolvedPointer> {
        let bytes = self.dereference(address, 4)?;
        read_u32(bytes, 0, self.layout.byte_order)
            .map_err(|_| UnresolvedPointer::Truncated { address, width: 4 })
    }

    /// Read a pointer-sized value at `address`
    pub fn read_pointer(&self, address: u64) -> Result<u64, UnresolvedPointer> {
        let width = self.layout.pointer_width();
        let bytes = self.dereference(address, width)?;
        let value = if width == 8 {
            read_u64(bytes, 0, self.layout.byte_order)
        } else {
            read_u32(bytes, 0, self.layout.byte_order).map(u64::from)
        };
        value.map_err(|_| UnresolvedPointer::Truncated { address, width })
    }

    /// Address of the field `offset` bytes into the object at `base`
    pub fn field_address(&self, base: u64, offset: usize) -> Result<u64, UnresolvedPointer> {
        base.checked_add(offset as u64)
            .ok_or(UnresolvedPointer::Implausible {
                address: base,
                what: "field offset",
                value: offset as u64,
            })
    }

    pub fn read_u32_at(&self, base: u64, offset: usize) -> Result<u32, UnresolvedPointer> {
        self.read_u32(self.field_address(base, offset)?)
    }

    /// Pointer stored `offset` bytes into the object at `base`
    pub fn read_pointer_at(&self, base: u64, offset: usize) -> Result<u64, UnresolvedPointer> {
        self.read_pointer(self.field_address(base, offset)?)
    }

    /// Read a NUL-terminated string at `address`, within its region
    pub fn read_cstring(&self, address: u64) -> Result<String, UnresolvedPointer> {
        if address == 0 {
            return Err(UnresolvedPointer::Null);
        }
        let region = self
            .regions
            .region_containing(address)
            .ok_or(UnresolvedPointer::Unmapped { address })?;
        let offset = region
            .offset_of(address)
            .ok_or(UnresolvedPointer::Unmapped { address })?;
        let region_end = region.end_offset().min(self.buffer.len());
        let window = self
            .buffer
            .get(..region_end)
            .ok_or(UnresolvedPointer::Unmapped { address })?;

        let s = read_null_terminated(window, offset, self.layout.max_string_len).map_err(|_| {
            UnresolvedPointer::Implausible {
                address,
                what: "string",
                value: 0,
            }
        })?;
        if s.is_empty() || s.chars().any(char::is_control) {
            return Err(UnresolvedPointer::Implausible {
                address,
                what: "string",
                value: s.len() as u64,
            });
        }
        Ok(s)
    }

    /// Read a form header, accepted only when it describes itself as expected
    pub fn read_form(
        &self,
        address: u64,
        expected_id: Option<FormId>,
        expected_type: Option<u8>,
    ) -> Result<RuntimeForm, UnresolvedPointer> {
        let layout = self.layout;
        self.dereference(address, layout.form_header_size())?;

        let form_type = self.read_u8(self.field_address(address, layout.form_type_offset)?)?;
        let flags = self.read_u32_at(address, layout.form_flags_offset)?;
        let form_id = FormId(self.read_u32_at(address, layout.form_id_offset)?);

        if form_id.is_none() || form_id.0 == u32::MAX {
            return Err(UnresolvedPointer::Implausible {
                address,
                what: "form id",
                value: form_id.0 as u64,
            });
        }
        if let Some(expected) = expected_id {
            if expected != form_id {
                return Err(UnresolvedPointer::FormIdMismatch {
                    address,
                    expected,
                    found: form_id,
                });
            }
        }
        if let Some(expected) = expected_type {
            if expected != form_type {
                return Err(UnresolvedPointer::FormTypeMismatch {
                    address,
                    expected,
                    found: form_type,
                });
            }
        }

        Ok(RuntimeForm {
            address,
            form_type,
            flags,
            form_id,
        })
    }

    /// Race of a runtime NPC, by one dereference of its race pointer
    pub fn npc_race(&self, npc_address: u64, npc_form_id: FormId) -> Result<FormId, UnresolvedPointer> {
        let race_offset = self
            .layout
            .npc_race_offset
            .ok_or(UnresolvedPointer::NotConfigured {
                field: "npc_race_offset",
            })?;
        self.read_form(npc_address, Some(npc_form_id), self.layout.npc_form_type)?;

        let race_ptr = self.read_pointer_at(npc_address, race_offset)?;
        let race = self.read_form(race_ptr, None, self.layout.race_form_type)?;
        Ok(race.form_id)
    }

    /// Log and count a pointer that gave nothing
    pub fn note_failure(&self, context: &str, err: &UnresolvedPointer) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Unresolved pointer ({}): {}", context, err);
    }

    pub fn failure_count(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::region::MemoryRegion;

    pub const BASE: u64 = 0x8200_0000;

    /// Big-endian test memory with a single region at `BASE`
    pub struct Memory {
        pub bytes: Vec<u8>,
    }

    impl Memory {
        pub fn new(len: usize) -> Self {
            Self {
                bytes: vec![0; len],
            }
        }

        pub fn put_u32(&mut self, address: u64, value: u32) {
            let at = (address - BASE) as usize;
            self.bytes[at..at + 4].copy_from_slice(&value.to_be_bytes());
        }

        pub fn put_u8(&mut self, address: u64, value: u8) {
            self.bytes[(address - BASE) as usize] = value;
        }

        pub fn put_str(&mut self, address: u64, s: &str) {
            let at = (address - BASE) as usize;
            self.bytes[at..at + s.len()].copy_from_slice(s.as_bytes());
            self.bytes[at + s.len()] = 0;
        }

        /// Form header: type at +4, flags at +8, id at +12
        pub fn put_form(&mut self, address: u64, form_type: u8, id: u32) {
            self.put_u8(address + 4, form_type);
            self.put_u32(address + 12, id);
        }

        pub fn regions(&self) -> RegionMap {
            RegionMap::new(vec![MemoryRegion::new(0, self.bytes.len(), BASE)]).unwrap()
        }
    }

    #[test]
    fn test_read_pointer_big_endian() {
        let mut mem = Memory::new(0x100);
        mem.put_u32(BASE + 0x10, BASE as u32 + 0x40);
        let regions = mem.regions();
        let layout = RuntimeLayout::default();
        let r = PointerResolver::new(&mem.bytes, &regions, &layout);
        assert_eq!(r.read_pointer(BASE + 0x10), Ok(BASE + 0x40));
    }

    #[test]
    fn test_unmapped_and_null() {
        let mem = Memory::new(0x100);
        let regions = mem.regions();
        let layout = RuntimeLayout::default();
        let r = PointerResolver::new(&mem.bytes, &regions, &layout);
        assert_eq!(r.read_pointer(0), Err(UnresolvedPointer::Null));
        assert_eq!(
            r.read_pointer(0x1234_5678),
            Err(UnresolvedPointer::Unmapped {
                address: 0x1234_5678
            })
        );
        assert_eq!(
            r.read_u32(BASE + 0xFE),
            Err(UnresolvedPointer::Truncated {
                address: BASE + 0xFE,
                width: 4
            })
        );
    }

    #[test]
    fn test_read_form_checks_identity() {
        let mut mem = Memory::new(0x100);
        mem.put_form(BASE + 0x20, 0x0C, 0x0001_9000);
        let regions = mem.regions();
        let layout = RuntimeLayout::default();
        let r = PointerResolver::new(&mem.bytes, &regions, &layout);

        let form = r.read_form(BASE + 0x20, Some(FormId(0x0001_9000)), Some(0x0C)).unwrap();
        assert_eq!(form.form_type, 0x0C);

        assert!(matches!(
            r.read_form(BASE + 0x20, Some(FormId(1)), None),
            Err(UnresolvedPointer::FormIdMismatch { .. })
        ));
        assert!(matches!(
            r.read_form(BASE + 0x20, None, Some(0x2A)),
            Err(UnresolvedPointer::FormTypeMismatch { .. })
        ));
        assert!(matches!(
            r.read_form(BASE + 0x60, None, None),
            Err(UnresolvedPointer::Implausible { .. })
        ));
    }

    #[test]
    fn test_npc_race() {
        let mut mem = Memory::new(0x200);
        let npc = BASE + 0x40;
        let race = BASE + 0x100;
        mem.put_form(npc, 0x2A, 0x0001_0001);
        mem.put_u32(npc + 0x30, race as u32);
        mem.put_form(race, 0x0C, 0x0000_0019);
        let regions = mem.regions();

        let unconfigured = RuntimeLayout::default();
        let r = PointerResolver::new(&mem.bytes, &regions, &unconfigured);
        assert_eq!(
            r.npc_race(npc, FormId(0x0001_0001)),
            Err(UnresolvedPointer::NotConfigured {
                field: "npc_race_offset"
            })
        );

        let layout = RuntimeLayout {
            npc_race_offset: Some(0x30),
            ..RuntimeLayout::default()
        };
        let r = PointerResolver::new(&mem.bytes, &regions, &layout);
        assert_eq!(r.npc_race(npc, FormId(0x0001_0001)), Ok(FormId(0x19)));
        // Stale pointer: the form there claims a different id
        assert!(r.npc_race(npc, FormId(0x0001_0002)).is_err());
    }

    #[test]
    fn test_read_cstring() {
        let mut mem = Memory::new(0x100);
        mem.put_str(BASE + 0x10, "RaceCaucasian");
        let regions = mem.regions();
        let layout = RuntimeLayout::default();
        let r = PointerResolver::new(&mem.bytes, &regions, &layout);
        assert_eq!(r.read_cstring(BASE + 0x10).unwrap(), "RaceCaucasian");
        assert!(r.read_cstring(BASE + 0x80).is_err());
    }

    #[test]
    fn test_field_address_near_top_of_address_space() {
        let mem = Memory::new(0x40);
        let regions = mem.regions();
        let layout = RuntimeLayout::default();
        let r = PointerResolver::new(&mem.bytes, &regions, &layout);

        assert_eq!(r.field_address(BASE, 0x10), Ok(BASE + 0x10));
        assert!(matches!(
            r.field_address(u64::MAX - 3, 8),
            Err(UnresolvedPointer::Implausible { address, .. }) if address == u64::MAX - 3
        ));
        assert!(matches!(
            r.read_pointer_at(u64::MAX, 4),
            Err(UnresolvedPointer::Implausible { .. })
        ));
        assert!(matches!(
            r.read_form(u64::MAX - 2, None, None),
            Err(UnresolvedPointer::Unmapped { .. })
        ));
    }

    #[test]
    fn test_failure_counter() {
        let mem = Memory::new(0x10);
        let regions = mem.regions();
        let layout = RuntimeLayout::default();
        let r = PointerResolver::new(&mem.bytes, &regions, &layout);
        if let Err(e) = r.read_pointer(0xDEAD_0000) {
            r.note_failure("test", &e);
        }
        assert_eq!(r.failure_count(), 1);
    }
}
