//! Actors and the records that describe them: NPCs, creatures, races, factions

use esmdump_format::{DecodedRecord, FieldValue, FormId};
use serde::Serialize;

use super::{form_ids, member_f32, member_i64, sig, value_f32, Entity, RecordInfo};
use crate::names::Resolver;

/// ACBS flag: female
pub const FLAG_FEMALE: u32 = 0x0000_0001;
/// ACBS flag: level is a multiple of the player's level
pub const FLAG_PC_LEVEL_MULT: u32 = 0x0000_0080;

/// RACE DATA flag: selectable by the player
pub const RACE_FLAG_PLAYABLE: u32 = 0x0000_0001;

/// FACT DATA flags
pub const FACTION_FLAG_HIDDEN: u8 = 0x01;
pub const FACTION_FLAG_EVIL: u8 = 0x02;

/// Health granted per point of endurance
const HEALTH_PER_ENDURANCE: i32 = 5;
const HEALTH_BASE_BONUS: i32 = 50;

/// Configuration block shared by NPCs and creatures (`ACBS`)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActorStats {
    pub flags: u32,
    pub fatigue: u16,
    pub barter_gold: u16,
    pub calc_min_level: u16,
    pub calc_max_level: u16,
    pub speed_multiplier: u16,
    pub karma: f32,
    pub disposition_base: i16,
    pub template_flags: u16,
}

impl ActorStats {
    fn from_record(record: &DecodedRecord) -> Option<Self> {
        record.value(sig(b"ACBS"))?;
        let u = |name| member_i64(record, b"ACBS", name).unwrap_or(0);
        Some(Self {
            flags: u("flags") as u32,
            fatigue: u("fatigue") as u16,
            barter_gold: u("barter_gold") as u16,
            calc_min_level: u("calc_min_level") as u16,
            calc_max_level: u("calc_max_level") as u16,
            speed_multiplier: u("speed_multiplier") as u16,
            karma: member_f32(record, b"ACBS", "karma").unwrap_or(0.0),
            disposition_base: u("disposition_base") as i16,
            template_flags: u("template_flags") as u16,
        })
    }
}

/// The seven primary attributes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Attributes {
    pub strength: u8,
    pub perception: u8,
    pub endurance: u8,
    pub charisma: u8,
    pub intelligence: u8,
    pub agility: u8,
    pub luck: u8,
}

impl Attributes {
    /// Read attributes from a struct value; every member must be present
    fn from_value(data: &FieldValue) -> Option<Self> {
        let a = |name| data.member(name).and_then(FieldValue::as_i64).map(|v| v as u8);
        Some(Self {
            strength: a("strength")?,
            perception: a("perception")?,
            endurance: a("endurance")?,
            charisma: a("charisma")?,
            intelligence: a("intelligence")?,
            agility: a("agility")?,
            luck: a("luck")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
}

/// Effective level
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Level {
    Fixed(i32),
    /// Scales with the player's level
    PcMultiplier(f32),
}

impl Level {
    fn from_stats(stats: &ActorStats, raw: i64) -> Self {
        if stats.flags & FLAG_PC_LEVEL_MULT != 0 {
            Level::PcMultiplier(raw as f32 / 1000.0)
        } else {
            Level::Fixed(raw as i32)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KarmaLabel {
    VeryEvil,
    Evil,
    Neutral,
    Good,
    VeryGood,
}

impl KarmaLabel {
    pub fn from_karma(karma: f32) -> Self {
        if karma <= -750.0 {
            KarmaLabel::VeryEvil
        } else if karma <= -250.0 {
            KarmaLabel::Evil
        } else if karma < 250.0 {
            KarmaLabel::Neutral
        } else if karma < 750.0 {
            KarmaLabel::Good
        } else {
            KarmaLabel::VeryGood
        }
    }
}

/// Membership in a faction (`SNAM`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FactionRank {
    pub faction: FormId,
    pub rank: u8,
}

/// Starting inventory entry (`CNTO`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InventoryItem {
    pub item: FormId,
    pub count: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Npc {
    #[serde(flatten)]
    pub info: RecordInfo,
    pub stats: Option<ActorStats>,
    pub attributes: Option<Attributes>,
    pub base_health: Option<i32>,
    /// `base_health + endurance * 5 + 50`
    pub health: Option<i32>,
    pub gender: Gender,
    pub level: Option<Level>,
    pub karma: Option<KarmaLabel>,
    pub race: Option<FormId>,
    pub class: Option<FormId>,
    pub hair: Option<FormId>,
    pub eyes: Option<FormId>,
    /// Clamped to `[0, 1]`
    pub hair_length: Option<f32>,
    pub voice: Option<FormId>,
    pub template: Option<FormId>,
    pub death_item: Option<FormId>,
    pub script: Option<FormId>,
    pub factions: Vec<FactionRank>,
    pub inventory: Vec<InventoryItem>,
    pub packages: Vec<FormId>,
    pub spells: Vec<FormId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Creature {
    #[serde(flatten)]
    pub info: RecordInfo,
    pub stats: Option<ActorStats>,
    pub attributes: Option<Attributes>,
    pub creature_type: Option<u8>,
    pub combat_skill: Option<u8>,
    pub magic_skill: Option<u8>,
    pub stealth_skill: Option<u8>,
    pub health: Option<i32>,
    pub damage: Option<i32>,
    pub level: Option<Level>,
    pub karma: Option<KarmaLabel>,
    pub death_item: Option<FormId>,
    pub template: Option<FormId>,
    pub script: Option<FormId>,
    pub factions: Vec<FactionRank>,
    pub inventory: Vec<InventoryItem>,
}

/// One of the seven skill bonuses a race grants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SkillBoost {
    /// Actor value index of the skill
    pub skill: u8,
    pub boost: i8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Race {
    #[serde(flatten)]
    pub info: RecordInfo,
    pub skill_boosts: Vec<SkillBoost>,
    pub male_height: Option<f32>,
    pub female_height: Option<f32>,
    pub male_weight: Option<f32>,
    pub female_weight: Option<f32>,
    pub playable: bool,
    pub older: Option<FormId>,
    pub younger: Option<FormId>,
}

/// Attitude toward another faction (`XNAM`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FactionRelation {
    pub faction: FormId,
    pub modifier: i32,
    pub combat_reaction: u32,
}

/// Rank titles (`RNAM` followed by `MNAM`/`FNAM`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RankTitle {
    pub rank: i32,
    pub male: Option<String>,
    pub female: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Faction {
    #[serde(flatten)]
    pub info: RecordInfo,
    pub hidden_from_player: bool,
    pub evil: bool,
    pub relations: Vec<FactionRelation>,
    pub ranks: Vec<RankTitle>,
}

fn factions(record: &DecodedRecord) -> Vec<FactionRank> {
    record
        .values(sig(b"SNAM"))
        .filter_map(|v| {
            let faction = v.member("faction")?.as_form_id()?.non_null()?;
            let rank = v.member("rank").and_then(FieldValue::as_i64).unwrap_or(0) as u8;
            Some(FactionRank { faction, rank })
        })
        .collect()
}

fn inventory(record: &DecodedRecord) -> Vec<InventoryItem> {
    record
        .values(sig(b"CNTO"))
        .filter_map(|v| {
            let item = v.member("item")?.as_form_id()?.non_null()?;
            let count = v.member("count").and_then(FieldValue::as_i64).unwrap_or(1) as i32;
            Some(InventoryItem { item, count })
        })
        .collect()
}

fn level(record: &DecodedRecord, stats: Option<&ActorStats>) -> Option<Level> {
    let raw = member_i64(record, b"ACBS", "level")?;
    stats.map(|s| Level::from_stats(s, raw))
}

pub fn build_npc(record: &DecodedRecord, resolver: &Resolver) -> Npc {
    let form_id = record.form_id();
    let stats = ActorStats::from_record(record);
    let data = record.value(sig(b"DATA"));
    let attributes = data.and_then(Attributes::from_value);
    let base_health = member_i64(record, b"DATA", "base_health").map(|v| v as i32);

    // Out of range sums come from garbage DATA and leave health unknown
    let health = match (base_health, attributes) {
        (Some(base), Some(attrs)) => base
            .checked_add(i32::from(attrs.endurance) * HEALTH_PER_ENDURANCE)
            .and_then(|h| h.checked_add(HEALTH_BASE_BONUS)),
        _ => None,
    };

    let gender = match &stats {
        Some(s) if s.flags & FLAG_FEMALE != 0 => Gender::Female,
        _ => Gender::Male,
    };

    let race = record
        .form_id_field(sig(b"RNAM"))
        .or_else(|| resolver.runtime_race(form_id));

    Npc {
        info: RecordInfo::from_record(record, resolver),
        level: level(record, stats.as_ref()),
        karma: stats.as_ref().map(|s| KarmaLabel::from_karma(s.karma)),
        stats,
        attributes,
        base_health,
        health,
        gender,
        race,
        class: record.form_id_field(sig(b"CNAM")),
        hair: record.form_id_field(sig(b"HNAM")),
        eyes: record.form_id_field(sig(b"ENAM")),
        hair_length: value_f32(record, b"LNAM")
            .filter(|v| v.is_finite())
            .map(|v| v.clamp(0.0, 1.0)),
        voice: record.form_id_field(sig(b"VTCK")),
        template: record.form_id_field(sig(b"TPLT")),
        death_item: record.form_id_field(sig(b"INAM")),
        script: record.form_id_field(sig(b"SCRI")),
        factions: factions(record),
        inventory: inventory(record),
        packages: form_ids(record, b"PKID"),
        spells: form_ids(record, b"SPLO"),
    }
}

pub fn build_npcs(records: &[&DecodedRecord], resolver: &Resolver) -> Vec<Entity> {
    records
        .iter()
        .map(|r| Entity::Npc(build_npc(r, resolver)))
        .collect()
}

pub fn build_creature(record: &DecodedRecord, resolver: &Resolver) -> Creature {
    let stats = ActorStats::from_record(record);
    let data = |name| member_i64(record, b"DATA", name);

    Creature {
        info: RecordInfo::from_record(record, resolver),
        attributes: record.value(sig(b"DATA")).and_then(Attributes::from_value),
        creature_type: data("creature_type").map(|v| v as u8),
        combat_skill: data("combat_skill").map(|v| v as u8),
        magic_skill: data("magic_skill").map(|v| v as u8),
        stealth_skill: data("stealth_skill").map(|v| v as u8),
        health: data("health").map(|v| v as i32),
        damage: data("damage").map(|v| v as i32),
        level: level(record, stats.as_ref()),
        karma: stats.as_ref().map(|s| KarmaLabel::from_karma(s.karma)),
        stats,
        death_item: record.form_id_field(sig(b"INAM")),
        template: record.form_id_field(sig(b"TPLT")),
        script: record.form_id_field(sig(b"SCRI")),
        factions: factions(record),
        inventory: inventory(record),
    }
}

pub fn build_creatures(records: &[&DecodedRecord], resolver: &Resolver) -> Vec<Entity> {
    records
        .iter()
        .map(|r| Entity::Creature(build_creature(r, resolver)))
        .collect()
}

pub fn build_race(record: &DecodedRecord, resolver: &Resolver) -> Race {
    let skill_boosts = record
        .member(sig(b"DATA"), "skill_boosts")
        .and_then(|v| match v {
            FieldValue::Bytes(bytes) => Some(bytes),
            _ => None,
        })
        .map(|bytes| {
            bytes
                .chunks_exact(2)
                .filter(|pair| pair[0] != 0xFF)
                .map(|pair| SkillBoost {
                    skill: pair[0],
                    boost: pair[1] as i8,
                })
                .collect()
        })
        .unwrap_or_default();

    let flags = member_i64(record, b"DATA", "flags").unwrap_or(0) as u32;

    Race {
        info: RecordInfo::from_record(record, resolver),
        skill_boosts,
        male_height: member_f32(record, b"DATA", "male_height"),
        female_height: member_f32(record, b"DATA", "female_height"),
        male_weight: member_f32(record, b"DATA", "male_weight"),
        female_weight: member_f32(record, b"DATA", "female_weight"),
        playable: flags & RACE_FLAG_PLAYABLE != 0,
        older: record.form_id_field(sig(b"ONAM")),
        younger: record.form_id_field(sig(b"YNAM")),
    }
}

pub fn build_races(records: &[&DecodedRecord], resolver: &Resolver) -> Vec<Entity> {
    records
        .iter()
        .map(|r| Entity::Race(build_race(r, resolver)))
        .collect()
}

pub fn build_faction(record: &DecodedRecord, resolver: &Resolver) -> Faction {
    let flags = member_i64(record, b"DATA", "flags").unwrap_or(0) as u8;

    let relations = record
        .values(sig(b"XNAM"))
        .filter_map(|v| {
            Some(FactionRelation {
                faction: v.member("faction")?.as_form_id()?.non_null()?,
                modifier: v.member("modifier").and_then(FieldValue::as_i64).unwrap_or(0) as i32,
                combat_reaction: v.member("combat_reaction").and_then(FieldValue::as_u32).unwrap_or(0),
            })
        })
        .collect();

    // Titles follow the rank number they belong to
    let mut ranks: Vec<RankTitle> = Vec::new();
    for field in &record.fields {
        let Some(value) = field.value() else {
            continue;
        };
        match &field.signature.0 {
            b"RNAM" => ranks.push(RankTitle {
                rank: value.as_i64().unwrap_or(ranks.len() as i64) as i32,
                ..RankTitle::default()
            }),
            b"MNAM" => {
                if let Some(rank) = ranks.last_mut() {
                    rank.male = value.as_str().filter(|s| !s.is_empty()).map(str::to_string);
                }
            }
            b"FNAM" => {
                if let Some(rank) = ranks.last_mut() {
                    rank.female = value.as_str().filter(|s| !s.is_empty()).map(str::to_string);
                }
            }
            _ => {}
        }
    }

    Faction {
        info: RecordInfo::from_record(record, resolver),
        hidden_from_player: flags & FACTION_FLAG_HIDDEN != 0,
        evil: flags & FACTION_FLAG_EVIL != 0,
        relations,
        ranks,
    }
}

pub fn build_factions(records: &[&DecodedRecord], resolver: &Resolver) -> Vec<Entity> {
    records
        .iter()
        .map(|r| Entity::Faction(build_faction(r, resolver)))
        .collect()
}
