//! Cells, placed references and landscape

use esmdump_format::signature::known;
use esmdump_format::{decode_vhgt, DecodedRecord, FieldData, FieldValue, FormId, HeightGrid};
use serde::Serialize;

use super::{member_f32, member_form_id, member_i64, sig, value_f32, value_i64, Entity, RecordInfo};
use crate::names::Resolver;

/// CELL DATA flags
pub const CELL_FLAG_INTERIOR: u8 = 0x01;
pub const CELL_FLAG_HAS_WATER: u8 = 0x02;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cell {
    #[serde(flatten)]
    pub info: RecordInfo,
    pub flags: u8,
    pub interior: bool,
    pub has_water: bool,
    /// Exterior grid coordinates (`XCLC`)
    pub grid: Option<(i32, i32)>,
    pub water_height: Option<f32>,
    pub regions: Vec<FormId>,
    pub owner: Option<FormId>,
    pub water: Option<FormId>,
    pub encounter_zone: Option<FormId>,
    pub lighting_template: Option<FormId>,
}

pub fn build_cell(record: &DecodedRecord, resolver: &Resolver) -> Cell {
    let flags = value_i64(record, b"DATA").unwrap_or(0) as u8;
    let interior = flags & CELL_FLAG_INTERIOR != 0;

    let grid = match (
        member_i64(record, b"XCLC", "x"),
        member_i64(record, b"XCLC", "y"),
    ) {
        (Some(x), Some(y)) if !interior => Some((x as i32, y as i32)),
        _ => None,
    };

    Cell {
        info: RecordInfo::from_record(record, resolver),
        flags,
        interior,
        has_water: flags & CELL_FLAG_HAS_WATER != 0,
        grid,
        water_height: value_f32(record, b"XCLW").filter(|h| h.is_finite()),
        regions: record
            .value(sig(b"XCLR"))
            .and_then(FieldValue::as_form_ids)
            .map(|ids| ids.iter().copied().filter_map(FormId::non_null).collect())
            .unwrap_or_default(),
        owner: record.form_id_field(sig(b"XOWN")),
        water: record.form_id_field(sig(b"XCWT")),
        encounter_zone: record.form_id_field(sig(b"XEZN")),
        lighting_template: record.form_id_field(sig(b"LTMP")),
    }
}

pub fn build_cells(records: &[&DecodedRecord], resolver: &Resolver) -> Vec<Entity> {
    records
        .iter()
        .map(|r| Entity::Cell(build_cell(r, resolver)))
        .collect()
}

/// Which kind of object a reference places
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Object,
    Npc,
    Creature,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Placement {
    pub position: [f32; 3],
    /// Radians
    pub rotation: [f32; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlacedReference {
    #[serde(flatten)]
    pub info: RecordInfo,
    pub kind: ReferenceKind,
    pub base: Option<FormId>,
    pub placement: Option<Placement>,
    pub scale: f32,
    pub owner: Option<FormId>,
    pub count: Option<i32>,
    pub linked_reference: Option<FormId>,
    pub enable_parent: Option<FormId>,
}

pub fn build_placed_reference(record: &DecodedRecord, resolver: &Resolver) -> PlacedReference {
    let kind = match record.signature() {
        known::ACHR => ReferenceKind::Npc,
        known::ACRE => ReferenceKind::Creature,
        _ => ReferenceKind::Object,
    };

    let f = |name| member_f32(record, b"DATA", name);
    let placement = (|| {
        Some(Placement {
            position: [f("pos_x")?, f("pos_y")?, f("pos_z")?],
            rotation: [f("rot_x")?, f("rot_y")?, f("rot_z")?],
        })
    })();

    PlacedReference {
        info: RecordInfo::from_record(record, resolver),
        kind,
        base: record
            .form_id_field(sig(b"NAME"))
            .or_else(|| resolver.base_of(record.form_id())),
        placement,
        scale: value_f32(record, b"XSCL")
            .filter(|s| s.is_finite() && *s > 0.0)
            .unwrap_or(1.0),
        owner: record.form_id_field(sig(b"XOWN")),
        count: value_i64(record, b"XCNT").map(|v| v as i32),
        linked_reference: record.form_id_field(sig(b"XLKR")),
        enable_parent: member_form_id(record, b"XESP", "parent"),
    }
}

pub fn build_placed_references(records: &[&DecodedRecord], resolver: &Resolver) -> Vec<Entity> {
    records
        .iter()
        .map(|r| Entity::PlacedReference(build_placed_reference(r, resolver)))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Landscape {
    #[serde(flatten)]
    pub info: RecordInfo,
    pub flags: u32,
    /// Absent when `VHGT` is missing or too short
    pub heights: Option<HeightGrid>,
    pub has_normals: bool,
    pub has_vertex_colors: bool,
}

/// Payload bytes of a field whether or not the schema decoded it
fn field_bytes<'a>(record: &'a DecodedRecord, tag: &[u8; 4]) -> Option<&'a [u8]> {
    match &record.field(sig(tag))?.data {
        FieldData::Decoded(FieldValue::Bytes(bytes)) | FieldData::Raw(bytes) => Some(bytes),
        FieldData::Decoded(_) => None,
    }
}

pub fn build_landscape(record: &DecodedRecord, resolver: &Resolver) -> Landscape {
    let heights = field_bytes(record, b"VHGT").and_then(|payload| {
        decode_vhgt(payload, record.byte_order())
            .map_err(|e| tracing::debug!("LAND {}: VHGT: {}", record.form_id(), e))
            .ok()
    });

    Landscape {
        info: RecordInfo::from_record(record, resolver),
        flags: value_i64(record, b"DATA").unwrap_or(0) as u32,
        heights,
        has_normals: record.field(sig(b"VNML")).is_some(),
        has_vertex_colors: record.field(sig(b"VCLR")).is_some(),
    }
}

pub fn build_landscapes(records: &[&DecodedRecord], resolver: &Resolver) -> Vec<Entity> {
    records
        .iter()
        .map(|r| Entity::Landscape(build_landscape(r, resolver)))
        .collect()
}
