//! Four character codes and form identifiers

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::endian::{read_bytes, DecodeError};
use crate::Error;

/// A record or subrecord four character code in canonical (PC) orientation
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature(pub [u8; 4]);

/// How a tag was laid out in the capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagOrientation {
    /// Stored as characters, `NPC_`
    Canonical,
    /// Stored as a big-endian integer, `_CPN`
    Reversed,
}

impl Signature {
    pub const fn new(bytes: &[u8; 4]) -> Self {
        Self(*bytes)
    }

    pub fn reversed(self) -> Self {
        let [a, b, c, d] = self.0;
        Self([d, c, b, a])
    }

    /// Read a tag at `offset` and normalize it to canonical orientation
    pub fn read(
        buffer: &[u8],
        offset: usize,
        orientation: TagOrientation,
    ) -> Result<Self, DecodeError> {
        let bytes = read_bytes(buffer, offset, 4)?;
        let sig = Self([bytes[0], bytes[1], bytes[2], bytes[3]]);
        Ok(match orientation {
            TagOrientation::Canonical => sig,
            TagOrientation::Reversed => sig.reversed(),
        })
    }

    /// Bytes as they appear in a capture with the given orientation
    pub fn stored(self, orientation: TagOrientation) -> [u8; 4] {
        match orientation {
            TagOrientation::Canonical => self.0,
            TagOrientation::Reversed => self.reversed().0,
        }
    }

    /// Check the code is printable uppercase/digit/underscore, as all real tags are
    pub fn is_plausible(self) -> bool {
        self.0
            .iter()
            .all(|&b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
    }

    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self)
    }
}

impl FromStr for Signature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 4 || !s.is_ascii() {
            return Err(Error::InvalidSignature(s.to_string()));
        }
        Ok(Self([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_str())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Known tags
pub mod known {
    use super::Signature;

    pub const XXXX: Signature = Signature::new(b"XXXX");
    pub const GRUP: Signature = Signature::new(b"GRUP");
    pub const EDID: Signature = Signature::new(b"EDID");
    pub const FULL: Signature = Signature::new(b"FULL");

    pub const NPC_: Signature = Signature::new(b"NPC_");
    pub const CREA: Signature = Signature::new(b"CREA");
    pub const RACE: Signature = Signature::new(b"RACE");
    pub const FACT: Signature = Signature::new(b"FACT");
    pub const CLAS: Signature = Signature::new(b"CLAS");
    pub const QUST: Signature = Signature::new(b"QUST");
    pub const DIAL: Signature = Signature::new(b"DIAL");
    pub const INFO: Signature = Signature::new(b"INFO");
    pub const CELL: Signature = Signature::new(b"CELL");
    pub const WRLD: Signature = Signature::new(b"WRLD");
    pub const LAND: Signature = Signature::new(b"LAND");
    pub const REFR: Signature = Signature::new(b"REFR");
    pub const ACHR: Signature = Signature::new(b"ACHR");
    pub const ACRE: Signature = Signature::new(b"ACRE");
    pub const WEAP: Signature = Signature::new(b"WEAP");
    pub const ARMO: Signature = Signature::new(b"ARMO");
    pub const AMMO: Signature = Signature::new(b"AMMO");
    pub const MISC: Signature = Signature::new(b"MISC");
    pub const KEYM: Signature = Signature::new(b"KEYM");
    pub const ALCH: Signature = Signature::new(b"ALCH");
    pub const BOOK: Signature = Signature::new(b"BOOK");
    pub const CONT: Signature = Signature::new(b"CONT");
    pub const STAT: Signature = Signature::new(b"STAT");
    pub const SCPT: Signature = Signature::new(b"SCPT");
    pub const GLOB: Signature = Signature::new(b"GLOB");
    pub const PERK: Signature = Signature::new(b"PERK");
    pub const TXST: Signature = Signature::new(b"TXST");

    /// Record types the scanner looks for by default
    pub const RECORD_TYPES: &[Signature] = &[
        NPC_, CREA, RACE, FACT, CLAS, QUST, DIAL, INFO, CELL, WRLD, LAND, REFR, ACHR, ACRE, WEAP,
        ARMO, AMMO, MISC, KEYM, ALCH, BOOK, CONT, STAT, SCPT, GLOB, PERK, TXST,
    ];
}

/// 32-bit cross-reference key; zero means "no reference"
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FormId(pub u32);

impl FormId {
    pub const NONE: FormId = FormId(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// `None` for the null reference
    pub fn non_null(self) -> Option<FormId> {
        if self.is_none() {
            None
        } else {
            Some(self)
        }
    }

    /// Load-order index held in the top byte
    pub fn plugin_index(self) -> u8 {
        (self.0 >> 24) as u8
    }
}

impl fmt::Display for FormId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

impl fmt::Debug for FormId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FormId({:08X})", self.0)
    }
}

impl From<u32> for FormId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_parse() {
        let sig: Signature = "NPC_".parse().unwrap();
        assert_eq!(sig, known::NPC_);
        assert!("NPC".parse::<Signature>().is_err());
        assert!("NPC__".parse::<Signature>().is_err());
    }

    #[test]
    fn test_signature_read_reversed() {
        let data = *b"_CPN";
        let sig = Signature::read(&data, 0, TagOrientation::Reversed).unwrap();
        assert_eq!(sig, known::NPC_);
        assert_eq!(known::NPC_.stored(TagOrientation::Reversed), *b"_CPN");
    }

    #[test]
    fn test_signature_plausible() {
        assert!(known::NPC_.is_plausible());
        assert!(!Signature([0, 1, 2, 3]).is_plausible());
        assert!(!Signature(*b"npc_").is_plausible());
    }

    #[test]
    fn test_signature_display_escapes() {
        assert_eq!(Signature([b'A', 0, b'B', b'C']).to_string(), "A\\x00BC");
    }

    #[test]
    fn test_form_id_display() {
        assert_eq!(FormId(0x0001_2345).to_string(), "00012345");
        assert!(FormId::NONE.is_none());
        assert_eq!(FormId(0).non_null(), None);
        assert_eq!(FormId(0x0100_0001).plugin_index(), 1);
    }

    #[test]
    fn test_signature_serde_roundtrip() {
        let yaml = serde_yaml::to_string(&known::WEAP).unwrap();
        let back: Signature = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, known::WEAP);
    }
}
