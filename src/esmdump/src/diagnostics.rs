//! Run summary: what was found, skipped, merged and degraded

use std::collections::BTreeMap;

use esmdump_format::{ByteOrder, DecodedRecord, FormId, RawRecord, Signature};
use serde::Serialize;

use crate::reconstruct::{ReconstructReport, Reconstruction};
use crate::Result;

/// A FormId seen in more than one record; the copies were merged
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("FormId {form_id} ({signature}) found {copies} times")]
pub struct DuplicateFormId {
    pub form_id: FormId,
    pub signature: Signature,
    pub copies: usize,
}

/// Records of a type no builder handles
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("No builder for {signature} ({count} records)")]
pub struct UnsupportedRecordType {
    pub signature: Signature,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    pub regions: usize,
    pub records_scanned: usize,
    pub big_endian_records: usize,
    pub little_endian_records: usize,
    /// Records whose byte order was chosen over a plausible alternative
    pub ambiguous_records: usize,
    pub compressed_records: usize,
    pub deleted_records: usize,
    pub partial_records: usize,
    /// Structural decode errors by kind
    pub structural_errors: BTreeMap<&'static str, usize>,
    /// Records per signature
    pub signatures: BTreeMap<String, usize>,
    pub duplicates: Vec<DuplicateFormId>,
    pub unsupported: Vec<UnsupportedRecordType>,
    pub unresolved_pointers: usize,
    /// Entities per family
    pub entities: BTreeMap<&'static str, usize>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_scanned(&mut self, records: &[RawRecord]) {
        for record in records {
            self.records_scanned += 1;
            match record.byte_order {
                ByteOrder::Big => self.big_endian_records += 1,
                ByteOrder::Little => self.little_endian_records += 1,
            }
            self.ambiguous_records += record.ambiguous as usize;
            self.compressed_records += record.is_compressed() as usize;
            self.deleted_records += record.is_deleted() as usize;
            *self.signatures.entry(record.signature.to_string()).or_default() += 1;
        }
    }

    pub fn add_decoded(&mut self, records: &[DecodedRecord]) {
        for record in records {
            self.partial_records += record.partial as usize;
            for error in &record.errors {
                *self.structural_errors.entry(error.kind()).or_default() += 1;
            }
        }
    }

    pub fn add_reconstruction(&mut self, recon: &Reconstruction, report: &ReconstructReport) {
        self.entities = recon.counts();
        self.duplicates = report.duplicates.clone();
        self.unsupported = report.unsupported.clone();
    }

    /// Total FormIds that had more than one record
    pub fn duplicate_form_ids(&self) -> usize {
        self.duplicates.len()
    }

    pub fn structural_error_count(&self) -> usize {
        self.structural_errors.values().sum()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        format!(
            "{} records ({} BE, {} LE, {} ambiguous), {} partial, {} structural errors, \
             {} duplicate FormIds, {} unsupported types, {} unresolved pointers, {} entities",
            self.records_scanned,
            self.big_endian_records,
            self.little_endian_records,
            self.ambiguous_records,
            self.partial_records,
            self.structural_error_count(),
            self.duplicate_form_ids(),
            self.unsupported.len(),
            self.unresolved_pointers,
            self.entities.values().sum::<usize>()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use esmdump_format::signature::known;

    #[test]
    fn test_error_display() {
        let dup = DuplicateFormId {
            form_id: FormId(0x0001_0001),
            signature: known::NPC_,
            copies: 3,
        };
        assert_eq!(dup.to_string(), "FormId 00010001 (NPC_) found 3 times");

        let unsupported = UnsupportedRecordType {
            signature: known::STAT,
            count: 12,
        };
        assert!(unsupported.to_string().contains("STAT"));
    }

    #[test]
    fn test_json_summary() {
        let mut diag = Diagnostics::new();
        diag.records_scanned = 2;
        diag.structural_errors.insert("header_truncated", 1);
        diag.duplicates.push(DuplicateFormId {
            form_id: FormId(0x10),
            signature: known::WEAP,
            copies: 2,
        });

        let json = diag.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["records_scanned"], 2);
        assert_eq!(value["structural_errors"]["header_truncated"], 1);
        assert_eq!(value["duplicates"][0]["signature"], "WEAP");
        assert_eq!(value["duplicates"][0]["form_id"], 0x10);
        assert!(diag.summary().contains("1 duplicate FormIds"));
    }
}
