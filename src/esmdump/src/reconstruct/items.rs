//! Inventory objects: weapons, armor, ammunition, misc items, consumables

use esmdump_format::signature::known;
use esmdump_format::{DecodedRecord, FormId};
use serde::Serialize;

use super::{
    form_ids, member_f32, member_form_id, member_i64, sig, string, value_f32, value_i64, Entity,
    RecordInfo,
};
use crate::names::Resolver;

/// Value, condition and weight from `DATA`, shared by most items
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ItemData {
    pub value: i32,
    pub health: Option<i32>,
    pub weight: f32,
}

impl ItemData {
    fn from_record(record: &DecodedRecord) -> Option<Self> {
        Some(Self {
            value: member_i64(record, b"DATA", "value")? as i32,
            health: member_i64(record, b"DATA", "health").map(|v| v as i32),
            weight: member_f32(record, b"DATA", "weight").unwrap_or(0.0),
        })
    }
}

/// Firing and handling values from `DNAM`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WeaponHandling {
    pub animation_type: u32,
    pub reach: f32,
    pub min_spread: f32,
    pub spread: f32,
    pub projectile: Option<FormId>,
    pub projectile_count: u8,
    pub min_range: f32,
    pub max_range: f32,
    pub fire_rate: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Critical {
    pub damage: u16,
    pub multiplier: f32,
    pub effect: Option<FormId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Weapon {
    #[serde(flatten)]
    pub info: RecordInfo,
    pub data: Option<ItemData>,
    pub damage: Option<i32>,
    pub clip_size: Option<u8>,
    pub handling: Option<WeaponHandling>,
    pub critical: Option<Critical>,
    pub ammo: Option<FormId>,
    pub equip_type: Option<i32>,
    pub model: Option<String>,
    pub script: Option<FormId>,
}

pub fn build_weapon(record: &DecodedRecord, resolver: &Resolver) -> Weapon {
    let handling = record.value(sig(b"DNAM")).map(|_| {
        let f = |name| member_f32(record, b"DNAM", name).unwrap_or(0.0);
        WeaponHandling {
            animation_type: member_i64(record, b"DNAM", "animation_type").unwrap_or(0) as u32,
            reach: f("reach"),
            min_spread: f("min_spread"),
            spread: f("spread"),
            projectile: member_form_id(record, b"DNAM", "projectile"),
            projectile_count: member_i64(record, b"DNAM", "projectile_count").unwrap_or(1) as u8,
            min_range: f("min_range"),
            max_range: f("max_range"),
            fire_rate: f("fire_rate"),
        }
    });

    let critical = record.value(sig(b"CRDT")).map(|_| Critical {
        damage: member_i64(record, b"CRDT", "critical_damage").unwrap_or(0) as u16,
        multiplier: member_f32(record, b"CRDT", "critical_multiplier").unwrap_or(1.0),
        effect: member_form_id(record, b"CRDT", "effect"),
    });

    Weapon {
        info: RecordInfo::from_record(record, resolver),
        data: ItemData::from_record(record),
        damage: member_i64(record, b"DATA", "damage").map(|v| v as i32),
        clip_size: member_i64(record, b"DATA", "clip_size").map(|v| v as u8),
        handling,
        critical,
        ammo: record.form_id_field(sig(b"NAM0")),
        equip_type: value_i64(record, b"ETYP").map(|v| v as i32),
        model: string(record, b"MODL"),
        script: record.form_id_field(sig(b"SCRI")),
    }
}

pub fn build_weapons(records: &[&DecodedRecord], resolver: &Resolver) -> Vec<Entity> {
    records
        .iter()
        .map(|r| Entity::Weapon(build_weapon(r, resolver)))
        .collect()
}

/// ARMO BMDT general flag: power armor
pub const ARMOR_FLAG_POWER_ARMOR: u8 = 0x20;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Armor {
    #[serde(flatten)]
    pub info: RecordInfo,
    pub data: Option<ItemData>,
    /// Body slots covered
    pub biped_flags: u32,
    pub general_flags: u8,
    pub power_armor: bool,
    pub damage_resistance: Option<i32>,
    pub damage_threshold: Option<f32>,
    pub equip_type: Option<i32>,
    pub script: Option<FormId>,
}

pub fn build_armor_entry(record: &DecodedRecord, resolver: &Resolver) -> Armor {
    let general_flags = member_i64(record, b"BMDT", "general_flags").unwrap_or(0) as u8;
    Armor {
        info: RecordInfo::from_record(record, resolver),
        data: ItemData::from_record(record),
        biped_flags: member_i64(record, b"BMDT", "biped_flags").unwrap_or(0) as u32,
        general_flags,
        power_armor: general_flags & ARMOR_FLAG_POWER_ARMOR != 0,
        damage_resistance: member_i64(record, b"DNAM", "damage_resistance").map(|v| v as i32),
        damage_threshold: member_f32(record, b"DNAM", "damage_threshold"),
        equip_type: value_i64(record, b"ETYP").map(|v| v as i32),
        script: record.form_id_field(sig(b"SCRI")),
    }
}

pub fn build_armor(records: &[&DecodedRecord], resolver: &Resolver) -> Vec<Entity> {
    records
        .iter()
        .map(|r| Entity::Armor(build_armor_entry(r, resolver)))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ammo {
    #[serde(flatten)]
    pub info: RecordInfo,
    pub value: Option<i32>,
    pub speed: Option<f32>,
    pub flags: u8,
    pub clip_rounds: Option<u8>,
    pub short_name: Option<String>,
    pub abbreviation: Option<String>,
    pub projectiles_per_shot: Option<u32>,
    pub projectile: Option<FormId>,
    pub weight: Option<f32>,
}

pub fn build_ammo_entry(record: &DecodedRecord, resolver: &Resolver) -> Ammo {
    Ammo {
        info: RecordInfo::from_record(record, resolver),
        value: member_i64(record, b"DATA", "value").map(|v| v as i32),
        speed: member_f32(record, b"DATA", "speed"),
        flags: member_i64(record, b"DATA", "flags").unwrap_or(0) as u8,
        clip_rounds: member_i64(record, b"DATA", "clip_rounds").map(|v| v as u8),
        short_name: string(record, b"ONAM"),
        abbreviation: string(record, b"QNAM"),
        projectiles_per_shot: member_i64(record, b"DAT2", "projectiles_per_shot").map(|v| v as u32),
        projectile: member_form_id(record, b"DAT2", "projectile"),
        weight: member_f32(record, b"DAT2", "weight"),
    }
}

pub fn build_ammo(records: &[&DecodedRecord], resolver: &Resolver) -> Vec<Entity> {
    records
        .iter()
        .map(|r| Entity::Ammo(build_ammo_entry(r, resolver)))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MiscKind {
    Misc,
    Key,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MiscItem {
    #[serde(flatten)]
    pub info: RecordInfo,
    pub kind: MiscKind,
    pub value: Option<i32>,
    pub weight: Option<f32>,
    pub model: Option<String>,
    pub script: Option<FormId>,
}

pub fn build_misc_item(record: &DecodedRecord, resolver: &Resolver) -> MiscItem {
    MiscItem {
        info: RecordInfo::from_record(record, resolver),
        kind: if record.signature() == known::KEYM {
            MiscKind::Key
        } else {
            MiscKind::Misc
        },
        value: member_i64(record, b"DATA", "value").map(|v| v as i32),
        weight: member_f32(record, b"DATA", "weight"),
        model: string(record, b"MODL"),
        script: record.form_id_field(sig(b"SCRI")),
    }
}

pub fn build_misc_items(records: &[&DecodedRecord], resolver: &Resolver) -> Vec<Entity> {
    records
        .iter()
        .map(|r| Entity::MiscItem(build_misc_item(r, resolver)))
        .collect()
}

/// ALCH ENIT flag: food rather than medicine
pub const CONSUMABLE_FLAG_FOOD: u8 = 0x02;
/// ALCH ENIT flag: counts as medicine
pub const CONSUMABLE_FLAG_MEDICINE: u8 = 0x04;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Consumable {
    #[serde(flatten)]
    pub info: RecordInfo,
    pub weight: Option<f32>,
    pub value: Option<i32>,
    pub flags: u8,
    pub food: bool,
    pub medicine: bool,
    pub withdrawal_effect: Option<FormId>,
    pub addiction_chance: Option<f32>,
    pub use_sound: Option<FormId>,
    /// Base effects in record order
    pub effects: Vec<FormId>,
}

pub fn build_consumable(record: &DecodedRecord, resolver: &Resolver) -> Consumable {
    let flags = member_i64(record, b"ENIT", "flags").unwrap_or(0) as u8;
    Consumable {
        info: RecordInfo::from_record(record, resolver),
        weight: value_f32(record, b"DATA"),
        value: member_i64(record, b"ENIT", "value").map(|v| v as i32),
        flags,
        food: flags & CONSUMABLE_FLAG_FOOD != 0,
        medicine: flags & CONSUMABLE_FLAG_MEDICINE != 0,
        withdrawal_effect: member_form_id(record, b"ENIT", "withdrawal_effect"),
        addiction_chance: member_f32(record, b"ENIT", "addiction_chance"),
        use_sound: member_form_id(record, b"ENIT", "use_sound"),
        effects: form_ids(record, b"EFID"),
    }
}

pub fn build_consumables(records: &[&DecodedRecord], resolver: &Resolver) -> Vec<Entity> {
    records
        .iter()
        .map(|r| Entity::Consumable(build_consumable(r, resolver)))
        .collect()
}
