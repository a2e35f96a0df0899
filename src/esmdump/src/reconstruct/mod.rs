//! Semantic reconstruction: decoded records to domain entities
//!
//! Records are grouped by type, duplicate FormIds are merged, and one pure
//! builder per family turns the survivors into entities. Entities refer to
//! each other only by FormId; names are looked up through the [`Resolver`].
//!
//! ## Module Structure
//!
//! - `actors` - NPCs, creatures, races, factions
//! - `quest` - quests
//! - `dialogue` - topics and responses, plus their linking pass
//! - `world` - cells, placed references, landscape
//! - `items` - weapons, armor, ammunition, misc items, consumables

pub mod actors;
pub mod dialogue;
pub mod items;
pub mod quest;
pub mod world;

use std::collections::{BTreeMap, HashMap};

use esmdump_format::signature::known;
use esmdump_format::{ByteOrder, DecodedRecord, FieldValue, FormId, Signature};
use rayon::prelude::*;
use serde::Serialize;

use crate::diagnostics::{DuplicateFormId, UnsupportedRecordType};
use crate::names::Resolver;

pub use actors::{
    ActorStats, Attributes, Creature, Faction, FactionRank, FactionRelation, Gender, InventoryItem,
    KarmaLabel, Level, Npc, Race, RankTitle, SkillBoost,
};
pub use dialogue::{DialogResponse, DialogTopic, ResponseLine};
pub use items::{Ammo, Armor, Consumable, Critical, ItemData, MiscItem, MiscKind, Weapon, WeaponHandling};
pub use quest::{Quest, QuestObjective, QuestStage};
pub use world::{Cell, Landscape, PlacedReference, Placement, ReferenceKind};

/// Identity and provenance shared by every entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordInfo {
    pub form_id: FormId,
    pub editor_id: Option<String>,
    pub name: Option<String>,
    /// Capture offset of the record the entity was built from
    pub offset: usize,
    pub byte_order: ByteOrder,
    /// The record was cut short; fields past the cut are missing
    pub partial: bool,
}

impl RecordInfo {
    pub fn from_record(record: &DecodedRecord, resolver: &Resolver) -> Self {
        let form_id = record.form_id();
        Self {
            form_id,
            editor_id: record
                .editor_id()
                .or_else(|| resolver.editor_id(form_id))
                .map(str::to_string),
            name: record
                .display_name()
                .or_else(|| resolver.display_name(form_id))
                .map(str::to_string),
            offset: record.record.offset,
            byte_order: record.byte_order(),
            partial: record.partial,
        }
    }
}

/// Entity families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Family {
    Npc,
    Creature,
    Race,
    Faction,
    Quest,
    DialogTopic,
    DialogResponse,
    Cell,
    PlacedReference,
    Landscape,
    Weapon,
    Armor,
    Ammo,
    MiscItem,
    Consumable,
}

impl Family {
    pub fn name(self) -> &'static str {
        match self {
            Family::Npc => "npc",
            Family::Creature => "creature",
            Family::Race => "race",
            Family::Faction => "faction",
            Family::Quest => "quest",
            Family::DialogTopic => "dialog_topic",
            Family::DialogResponse => "dialog_response",
            Family::Cell => "cell",
            Family::PlacedReference => "placed_reference",
            Family::Landscape => "landscape",
            Family::Weapon => "weapon",
            Family::Armor => "armor",
            Family::Ammo => "ammo",
            Family::MiscItem => "misc_item",
            Family::Consumable => "consumable",
        }
    }
}

/// A reconstructed domain object
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Entity {
    Npc(Npc),
    Creature(Creature),
    Race(Race),
    Faction(Faction),
    Quest(Quest),
    DialogTopic(DialogTopic),
    DialogResponse(DialogResponse),
    Cell(Cell),
    PlacedReference(PlacedReference),
    Landscape(Landscape),
    Weapon(Weapon),
    Armor(Armor),
    Ammo(Ammo),
    MiscItem(MiscItem),
    Consumable(Consumable),
}

impl Entity {
    pub fn info(&self) -> &RecordInfo {
        match self {
            Entity::Npc(e) => &e.info,
            Entity::Creature(e) => &e.info,
            Entity::Race(e) => &e.info,
            Entity::Faction(e) => &e.info,
            Entity::Quest(e) => &e.info,
            Entity::DialogTopic(e) => &e.info,
            Entity::DialogResponse(e) => &e.info,
            Entity::Cell(e) => &e.info,
            Entity::PlacedReference(e) => &e.info,
            Entity::Landscape(e) => &e.info,
            Entity::Weapon(e) => &e.info,
            Entity::Armor(e) => &e.info,
            Entity::Ammo(e) => &e.info,
            Entity::MiscItem(e) => &e.info,
            Entity::Consumable(e) => &e.info,
        }
    }

    pub fn form_id(&self) -> FormId {
        self.info().form_id
    }

    pub fn family(&self) -> Family {
        match self {
            Entity::Npc(_) => Family::Npc,
            Entity::Creature(_) => Family::Creature,
            Entity::Race(_) => Family::Race,
            Entity::Faction(_) => Family::Faction,
            Entity::Quest(_) => Family::Quest,
            Entity::DialogTopic(_) => Family::DialogTopic,
            Entity::DialogResponse(_) => Family::DialogResponse,
            Entity::Cell(_) => Family::Cell,
            Entity::PlacedReference(_) => Family::PlacedReference,
            Entity::Landscape(_) => Family::Landscape,
            Entity::Weapon(_) => Family::Weapon,
            Entity::Armor(_) => Family::Armor,
            Entity::Ammo(_) => Family::Ammo,
            Entity::MiscItem(_) => Family::MiscItem,
            Entity::Consumable(_) => Family::Consumable,
        }
    }
}

/// Builder for one family: merged records in FormId order to entities
pub type BuildFn = fn(&[&DecodedRecord], &Resolver) -> Vec<Entity>;

/// Builders keyed by record signature
#[derive(Clone)]
pub struct BuilderRegistry {
    builders: BTreeMap<Signature, (Family, BuildFn)>,
}

impl BuilderRegistry {
    pub fn empty() -> Self {
        Self {
            builders: BTreeMap::new(),
        }
    }

    /// Builders for every family this crate reconstructs
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(known::NPC_, Family::Npc, actors::build_npcs);
        registry.register(known::CREA, Family::Creature, actors::build_creatures);
        registry.register(known::RACE, Family::Race, actors::build_races);
        registry.register(known::FACT, Family::Faction, actors::build_factions);
        registry.register(known::QUST, Family::Quest, quest::build_quests);
        registry.register(known::DIAL, Family::DialogTopic, dialogue::build_topics);
        registry.register(known::INFO, Family::DialogResponse, dialogue::build_responses);
        registry.register(known::CELL, Family::Cell, world::build_cells);
        for sig in [known::REFR, known::ACHR, known::ACRE] {
            registry.register(sig, Family::PlacedReference, world::build_placed_references);
        }
        registry.register(known::LAND, Family::Landscape, world::build_landscapes);
        registry.register(known::WEAP, Family::Weapon, items::build_weapons);
        registry.register(known::ARMO, Family::Armor, items::build_armor);
        registry.register(known::AMMO, Family::Ammo, items::build_ammo);
        registry.register(known::MISC, Family::MiscItem, items::build_misc_items);
        registry.register(known::KEYM, Family::MiscItem, items::build_misc_items);
        registry.register(known::ALCH, Family::Consumable, items::build_consumables);
        registry
    }

    pub fn register(&mut self, signature: Signature, family: Family, build: BuildFn) {
        self.builders.insert(signature, (family, build));
    }

    pub fn get(&self, signature: Signature) -> Option<(Family, BuildFn)> {
        self.builders.get(&signature).copied()
    }

    pub fn signatures(&self) -> impl Iterator<Item = Signature> + '_ {
        self.builders.keys().copied()
    }
}

impl Default for BuilderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Rank of one copy of a FormId: parsed field count, then capture offset
///
/// The copy with the greatest rank is the one reconstructed and named.
pub fn completeness(record: &DecodedRecord) -> (usize, usize) {
    (record.parsed_field_count(), record.record.offset)
}

/// Keep one record per FormId: most parsed fields wins, ties go to the
/// later capture offset
///
/// Returns the survivors in FormId order and the FormIds seen more than once.
pub fn merge_duplicates<'a, I>(records: I) -> (Vec<&'a DecodedRecord>, Vec<DuplicateFormId>)
where
    I: IntoIterator<Item = &'a DecodedRecord>,
{
    let mut best: BTreeMap<FormId, (&'a DecodedRecord, usize)> = BTreeMap::new();

    for record in records {
        match best.get_mut(&record.form_id()) {
            None => {
                best.insert(record.form_id(), (record, 1));
            }
            Some((current, copies)) => {
                *copies += 1;
                if completeness(record) > completeness(*current) {
                    *current = record;
                }
            }
        }
    }

    let duplicates = best
        .iter()
        .filter(|(_, (_, copies))| *copies > 1)
        .map(|(form_id, (record, copies))| DuplicateFormId {
            form_id: *form_id,
            signature: record.signature(),
            copies: *copies,
        })
        .collect();

    (best.into_values().map(|(r, _)| r).collect(), duplicates)
}

/// Reconstructed entities, ordered by family then FormId
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Reconstruction {
    entities: Vec<Entity>,
    #[serde(skip)]
    index: HashMap<FormId, usize>,
}

impl Reconstruction {
    pub fn new(mut entities: Vec<Entity>) -> Self {
        entities.sort_by_key(|e| (e.family(), e.form_id()));
        let mut index = HashMap::with_capacity(entities.len());
        for (i, e) in entities.iter().enumerate() {
            index.entry(e.form_id()).or_insert(i);
        }
        Self { entities, index }
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn get(&self, form_id: FormId) -> Option<&Entity> {
        self.index.get(&form_id).map(|&i| &self.entities[i])
    }

    pub fn family(&self, family: Family) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(move |e| e.family() == family)
    }

    pub fn npc(&self, form_id: FormId) -> Option<&Npc> {
        match self.get(form_id)? {
            Entity::Npc(npc) => Some(npc),
            _ => None,
        }
    }

    pub fn npcs(&self) -> impl Iterator<Item = &Npc> {
        self.entities.iter().filter_map(|e| match e {
            Entity::Npc(npc) => Some(npc),
            _ => None,
        })
    }

    pub fn topics(&self) -> impl Iterator<Item = &DialogTopic> {
        self.entities.iter().filter_map(|e| match e {
            Entity::DialogTopic(t) => Some(t),
            _ => None,
        })
    }

    pub fn responses(&self) -> impl Iterator<Item = &DialogResponse> {
        self.entities.iter().filter_map(|e| match e {
            Entity::DialogResponse(r) => Some(r),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entity count per family name
    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for e in &self.entities {
            *counts.entry(e.family().name()).or_insert(0) += 1;
        }
        counts
    }
}

/// Findings of one reconstruction run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconstructReport {
    pub duplicates: Vec<DuplicateFormId>,
    pub unsupported: Vec<UnsupportedRecordType>,
}

/// Run every registered builder over the decoded records
pub fn reconstruct(
    records: &[DecodedRecord],
    resolver: &Resolver,
    registry: &BuilderRegistry,
) -> (Reconstruction, ReconstructReport) {
    let mut groups: BTreeMap<Signature, Vec<&DecodedRecord>> = BTreeMap::new();
    let mut unsupported: BTreeMap<Signature, usize> = BTreeMap::new();

    for record in records {
        if registry.get(record.signature()).is_some() {
            groups.entry(record.signature()).or_default().push(record);
        } else {
            *unsupported.entry(record.signature()).or_default() += 1;
        }
    }

    let built: Vec<(Vec<Entity>, Vec<DuplicateFormId>)> = groups
        .into_par_iter()
        .filter_map(|(signature, group)| {
            let (_, build) = registry.get(signature)?;
            let (merged, duplicates) = merge_duplicates(group);
            Some((build(&merged, resolver), duplicates))
        })
        .collect();

    let mut entities = Vec::new();
    let mut report = ReconstructReport::default();
    for (family_entities, duplicates) in built {
        entities.extend(family_entities);
        report.duplicates.extend(duplicates);
    }
    report.unsupported = unsupported
        .into_iter()
        .map(|(signature, count)| UnsupportedRecordType { signature, count })
        .collect();

    dialogue::link_topics(&mut entities, resolver);

    for u in &report.unsupported {
        tracing::debug!("{}", u);
    }
    (Reconstruction::new(entities), report)
}

// Field access helpers shared by the family builders

pub(crate) fn sig(tag: &[u8; 4]) -> Signature {
    Signature::new(tag)
}

pub(crate) fn member_i64(record: &DecodedRecord, tag: &[u8; 4], name: &str) -> Option<i64> {
    record.member(sig(tag), name).and_then(FieldValue::as_i64)
}

pub(crate) fn member_f32(record: &DecodedRecord, tag: &[u8; 4], name: &str) -> Option<f32> {
    record.member(sig(tag), name).and_then(FieldValue::as_f32)
}

pub(crate) fn member_form_id(record: &DecodedRecord, tag: &[u8; 4], name: &str) -> Option<FormId> {
    record
        .member(sig(tag), name)
        .and_then(FieldValue::as_form_id)
        .and_then(FormId::non_null)
}

pub(crate) fn value_i64(record: &DecodedRecord, tag: &[u8; 4]) -> Option<i64> {
    record.value(sig(tag)).and_then(FieldValue::as_i64)
}

pub(crate) fn value_f32(record: &DecodedRecord, tag: &[u8; 4]) -> Option<f32> {
    record.value(sig(tag)).and_then(FieldValue::as_f32)
}

pub(crate) fn form_ids(record: &DecodedRecord, tag: &[u8; 4]) -> Vec<FormId> {
    record
        .values(sig(tag))
        .filter_map(FieldValue::as_form_id)
        .filter_map(FormId::non_null)
        .collect()
}

pub(crate) fn string(record: &DecodedRecord, tag: &[u8; 4]) -> Option<String> {
    record.string(sig(tag)).map(str::to_string)
}
