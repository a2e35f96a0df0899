//! FormId naming and cross-reference lookup
//!
//! Names come from decoded records first, then from the runtime editor-id
//! map. The builder is filled by one sequential pass and then frozen into a
//! read-only [`Resolver`] shared by every reconstruction builder.

use std::collections::HashMap;

use esmdump_format::signature::known;
use esmdump_format::{DecodedRecord, FormId, Signature};

use crate::reconstruct::completeness;
use crate::runtime::RuntimeFindings;

/// Mutable name tables, filled in record offset order
#[derive(Debug, Clone, Default)]
pub struct NameIndexBuilder {
    editor_ids: HashMap<FormId, String>,
    display_names: HashMap<FormId, String>,
    signatures: HashMap<FormId, Signature>,
    /// Rank of the copy each FormId's names were taken from
    sources: HashMap<FormId, (usize, usize)>,
    ref_to_base: HashMap<FormId, FormId>,
    runtime_races: HashMap<FormId, FormId>,
    runtime_responses: HashMap<FormId, Vec<FormId>>,
}

impl NameIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take names and links from one record
    ///
    /// Of several copies of a FormId, the names come from the same copy
    /// [`merge_duplicates`](crate::reconstruct::merge_duplicates) keeps.
    pub fn add_record(&mut self, record: &DecodedRecord) {
        let form_id = record.form_id();
        if form_id.is_none() {
            return;
        }

        let rank = completeness(record);
        if self.sources.get(&form_id).is_some_and(|kept| *kept >= rank) {
            return;
        }
        self.sources.insert(form_id, rank);

        self.signatures.insert(form_id, record.signature());
        set_or_clear(&mut self.editor_ids, form_id, record.editor_id().map(str::to_string));
        set_or_clear(&mut self.display_names, form_id, record.display_name().map(str::to_string));

        let base = matches!(record.signature(), known::REFR | known::ACHR | known::ACRE)
            .then(|| record.form_id_field(Signature::new(b"NAME")))
            .flatten();
        set_or_clear(&mut self.ref_to_base, form_id, base);
    }

    /// Add an editor id from the runtime; never replaces a record's name
    pub fn add_runtime_editor_id(&mut self, form_id: FormId, editor_id: &str) {
        if form_id.is_none() || editor_id.is_empty() {
            return;
        }
        self.editor_ids
            .entry(form_id)
            .or_insert_with(|| editor_id.to_string());
    }

    pub fn add_runtime(&mut self, findings: &RuntimeFindings) {
        for (form_id, editor_id) in &findings.editor_ids {
            self.add_runtime_editor_id(*form_id, editor_id);
        }
        self.runtime_races
            .extend(findings.npc_races.iter().map(|(k, v)| (*k, *v)));
        self.runtime_responses.extend(
            findings
                .topic_responses
                .iter()
                .map(|(k, v)| (*k, v.clone())),
        );
    }

    /// Record type of each FormId seen so far
    pub fn signatures(&self) -> &HashMap<FormId, Signature> {
        &self.signatures
    }

    pub fn freeze(self) -> Resolver {
        tracing::debug!(
            "Name index: {} editor ids, {} display names, {} placed references",
            self.editor_ids.len(),
            self.display_names.len(),
            self.ref_to_base.len()
        );
        Resolver { index: self }
    }
}

fn set_or_clear<V>(map: &mut HashMap<FormId, V>, form_id: FormId, value: Option<V>) {
    match value {
        Some(v) => {
            map.insert(form_id, v);
        }
        None => {
            map.remove(&form_id);
        }
    }
}

/// Read-only lookup facade over the frozen name index
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    index: NameIndexBuilder,
}

impl Resolver {
    pub fn editor_id(&self, form_id: FormId) -> Option<&str> {
        self.index.editor_ids.get(&form_id).map(String::as_str)
    }

    pub fn display_name(&self, form_id: FormId) -> Option<&str> {
        self.index.display_names.get(&form_id).map(String::as_str)
    }

    /// Display name, else editor id, else the hex FormId
    pub fn label(&self, form_id: FormId) -> String {
        self.display_name(form_id)
            .or_else(|| self.editor_id(form_id))
            .map(str::to_string)
            .unwrap_or_else(|| form_id.to_string())
    }

    /// Base object of a placed reference
    pub fn base_of(&self, placed: FormId) -> Option<FormId> {
        self.index.ref_to_base.get(&placed).copied()
    }

    pub fn signature_of(&self, form_id: FormId) -> Option<Signature> {
        self.index.signatures.get(&form_id).copied()
    }

    /// Race found through a runtime NPC's race pointer
    pub fn runtime_race(&self, npc: FormId) -> Option<FormId> {
        self.index.runtime_races.get(&npc).copied()
    }

    /// Responses found by walking a runtime topic's response list
    pub fn runtime_responses(&self, topic: FormId) -> &[FormId] {
        self.index
            .runtime_responses
            .get(&topic)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_known(&self, form_id: FormId) -> bool {
        self.index.signatures.contains_key(&form_id) || self.index.editor_ids.contains_key(&form_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use esmdump_format::{ByteOrder, RecordScanner, RecordWriter, SchemaTable};

    fn decode(bytes: &[u8]) -> Vec<DecodedRecord> {
        let records: Vec<_> = RecordScanner::new(known::RECORD_TYPES).scan(bytes).collect();
        esmdump_format::decode_records(bytes, &records, &SchemaTable::builtin())
    }

    fn record(sig: Signature, id: u32, edid: &str, full: &str) -> Vec<u8> {
        let mut w = RecordWriter::new(sig, FormId(id), ByteOrder::Big);
        if !edid.is_empty() {
            w = w.zstring(known::EDID, edid);
        }
        if !full.is_empty() {
            w = w.zstring(known::FULL, full);
        }
        w.to_bytes().unwrap()
    }

    #[test]
    fn test_names_follow_most_complete_copy() {
        let mut buffer = record(known::RACE, 0x19, "RaceOld", "Caucasian");
        buffer.extend(record(known::RACE, 0x19, "RaceNew", ""));

        let mut builder = NameIndexBuilder::new();
        for rec in decode(&buffer) {
            builder.add_record(&rec);
        }
        let resolver = builder.freeze();
        assert_eq!(resolver.editor_id(FormId(0x19)), Some("RaceOld"));
        assert_eq!(resolver.display_name(FormId(0x19)), Some("Caucasian"));
        assert_eq!(resolver.signature_of(FormId(0x19)), Some(known::RACE));
    }

    #[test]
    fn test_equal_copies_take_later_names() {
        let mut buffer = record(known::RACE, 0x19, "RaceOld", "Caucasian");
        buffer.extend(record(known::RACE, 0x19, "RaceNew", "Hispanic"));
        buffer.extend(record(known::RACE, 0x1A, "", "African"));
        buffer.extend(record(known::RACE, 0x1A, "RaceAfrican", ""));

        let mut builder = NameIndexBuilder::new();
        for rec in decode(&buffer) {
            builder.add_record(&rec);
        }
        let resolver = builder.freeze();
        assert_eq!(resolver.editor_id(FormId(0x19)), Some("RaceNew"));
        assert_eq!(resolver.display_name(FormId(0x19)), Some("Hispanic"));
        // names of one copy are never mixed with another's
        assert_eq!(resolver.editor_id(FormId(0x1A)), Some("RaceAfrican"));
        assert_eq!(resolver.display_name(FormId(0x1A)), None);
        assert_eq!(resolver.label(FormId(0x1A)), "RaceAfrican");
    }

    #[test]
    fn test_runtime_names_do_not_overwrite() {
        let mut builder = NameIndexBuilder::new();
        for rec in decode(&record(known::NPC_, 0x10, "FromRecord", "")) {
            builder.add_record(&rec);
        }
        builder.add_runtime_editor_id(FormId(0x10), "FromRuntime");
        builder.add_runtime_editor_id(FormId(0x11), "OnlyRuntime");
        let resolver = builder.freeze();
        assert_eq!(resolver.editor_id(FormId(0x10)), Some("FromRecord"));
        assert_eq!(resolver.editor_id(FormId(0x11)), Some("OnlyRuntime"));
    }

    #[test]
    fn test_ref_to_base_and_label() {
        let placed = RecordWriter::new(known::REFR, FormId(0x500), ByteOrder::Big)
            .form_id(Signature::new(b"NAME"), FormId(0x100))
            .to_bytes()
            .unwrap();
        let mut buffer = record(known::WEAP, 0x100, "WeapPistol", "");
        buffer.extend(placed);

        let mut builder = NameIndexBuilder::new();
        for rec in decode(&buffer) {
            builder.add_record(&rec);
        }
        let resolver = builder.freeze();
        assert_eq!(resolver.base_of(FormId(0x500)), Some(FormId(0x100)));
        assert_eq!(resolver.label(FormId(0x100)), "WeapPistol");
        assert_eq!(resolver.label(FormId(0x999)), "00000999");
        assert!(resolver.is_known(FormId(0x500)));
    }
}
