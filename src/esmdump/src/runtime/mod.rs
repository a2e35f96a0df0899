//! Runtime object graph
//!
//! The loaded game keeps its forms in process memory next to the record
//! fragments: a global FormId-keyed map, an editor-id map, and per-object
//! pointers such as an NPC's race or a topic's response list. Following
//! those pointers fills gaps the records leave.
//!
//! ## Module Structure
//!
//! - `layout` - structure offsets and global addresses
//! - `resolver` - checked reads through the region map
//! - `walk` - list and hash map walks

pub mod layout;
pub mod resolver;
pub mod walk;

use std::collections::{BTreeMap, HashMap};

use esmdump_format::signature::known;
use esmdump_format::{FormId, Signature};
use serde::Serialize;

pub use layout::{RuntimeHints, RuntimeLayout};
pub use resolver::{PointerResolver, RuntimeForm, UnresolvedPointer};
pub use walk::{KeyKind, MapKey, Walk};

/// What the runtime walks found
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeFindings {
    /// Runtime address of each form confirmed in the global map
    pub form_addresses: BTreeMap<FormId, u64>,
    /// Editor ids from the editor-id map, in walk order
    pub editor_ids: Vec<(FormId, String)>,
    pub npc_races: BTreeMap<FormId, FormId>,
    /// Topic to its responses, in list order
    pub topic_responses: BTreeMap<FormId, Vec<FormId>>,
    /// Pointers that gave nothing
    pub unresolved: usize,
}

/// Walk the global runtime structures named by `hints`
///
/// `signatures` holds the record type of every FormId seen in the capture;
/// it decides which runtime forms are worth a type-specific walk.
pub fn collect(
    resolver: &PointerResolver<'_>,
    hints: &RuntimeHints,
    signatures: &HashMap<FormId, Signature>,
) -> RuntimeFindings {
    let mut findings = RuntimeFindings::default();
    let layout = resolver.layout();

    if let Some(map) = hints.editor_id_map {
        let walk = resolver.walk_hash_map(map, KeyKind::String);
        for (key, value) in walk.items {
            let MapKey::String(editor_id) = key else {
                continue;
            };
            match resolver.read_form(value, None, None) {
                Ok(form) => findings.editor_ids.push((form.form_id, editor_id)),
                Err(e) => resolver.note_failure("editor id target", &e),
            }
        }
    }

    if let Some(map) = hints.form_map {
        let walk = resolver.walk_hash_map(map, KeyKind::FormId);
        for (key, value) in walk.items {
            let MapKey::FormId(form_id) = key else {
                continue;
            };
            let form = match resolver.read_form(value, Some(form_id), None) {
                Ok(form) => form,
                Err(e) => {
                    resolver.note_failure("form map target", &e);
                    continue;
                }
            };
            findings.form_addresses.insert(form_id, form.address);

            let signature = signatures.get(&form_id).copied();
            let is_type = |sig: Signature, code: Option<u8>| {
                signature == Some(sig) || (signature.is_none() && code == Some(form.form_type))
            };

            if is_type(known::NPC_, layout.npc_form_type) && layout.npc_race_offset.is_some() {
                match resolver.npc_race(form.address, form_id) {
                    Ok(race) => {
                        findings.npc_races.insert(form_id, race);
                    }
                    Err(e) => resolver.note_failure("npc race", &e),
                }
            }

            if is_type(known::DIAL, layout.topic_form_type) && layout.topic_responses_offset.is_some() {
                let responses = resolver.topic_responses(form.address);
                if !responses.items.is_empty() {
                    findings.topic_responses.insert(form_id, responses.items);
                }
            }
        }
    }

    findings.unresolved = resolver.failure_count();
    tracing::info!(
        "Runtime: {} forms, {} editor ids, {} races, {} topics, {} unresolved pointers",
        findings.form_addresses.len(),
        findings.editor_ids.len(),
        findings.npc_races.len(),
        findings.topic_responses.len(),
        findings.unresolved
    );
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::resolver::tests::{Memory, BASE};

    #[test]
    fn test_collect_without_hints() {
        let mem = Memory::new(0x40);
        let regions = mem.regions();
        let layout = RuntimeLayout::default();
        let r = PointerResolver::new(&mem.bytes, &regions, &layout);
        let findings = collect(&r, &RuntimeHints::default(), &HashMap::new());
        assert_eq!(findings, RuntimeFindings::default());
    }

    #[test]
    fn test_collect_npc_race_via_form_map() {
        let mut mem = Memory::new(0x400);
        let map = BASE + 0x10;
        let buckets = BASE + 0x20;
        let item = BASE + 0x30;
        let npc = BASE + 0x100;
        let race = BASE + 0x200;
        mem.put_u32(map + 4, 1);
        mem.put_u32(map + 8, buckets as u32);
        mem.put_u32(buckets, item as u32);
        mem.put_u32(item + 4, 0x0001_0001);
        mem.put_u32(item + 8, npc as u32);
        mem.put_form(npc, 0x2A, 0x0001_0001);
        mem.put_u32(npc + 0x40, race as u32);
        mem.put_form(race, 0x0C, 0x19);

        let regions = mem.regions();
        let layout = RuntimeLayout {
            npc_race_offset: Some(0x40),
            ..RuntimeLayout::default()
        };
        let r = PointerResolver::new(&mem.bytes, &regions, &layout);
        let hints = RuntimeHints {
            form_map: Some(map),
            editor_id_map: None,
        };
        let signatures = HashMap::from([(FormId(0x0001_0001), known::NPC_)]);

        let findings = collect(&r, &hints, &signatures);
        assert_eq!(findings.form_addresses.get(&FormId(0x0001_0001)), Some(&npc));
        assert_eq!(findings.npc_races.get(&FormId(0x0001_0001)), Some(&FormId(0x19)));
        assert_eq!(findings.unresolved, 0);
    }

    #[test]
    fn test_stale_map_value_degrades() {
        let mut mem = Memory::new(0x100);
        let map = BASE + 0x10;
        let buckets = BASE + 0x20;
        let item = BASE + 0x30;
        mem.put_u32(map + 4, 1);
        mem.put_u32(map + 8, buckets as u32);
        mem.put_u32(buckets, item as u32);
        mem.put_u32(item + 4, 0x0001_0001);
        // Value points outside the capture
        mem.put_u32(item + 8, 0x0700_0000);

        let regions = mem.regions();
        let layout = RuntimeLayout::default();
        let r = PointerResolver::new(&mem.bytes, &regions, &layout);
        let hints = RuntimeHints {
            form_map: Some(map),
            editor_id_map: None,
        };
        let findings = collect(&r, &hints, &HashMap::new());
        assert!(findings.form_addresses.is_empty());
        assert_eq!(findings.unresolved, 1);
    }
}
