//! Quests with their stages and objectives

use esmdump_format::{DecodedRecord, FieldValue, FormId};
use serde::Serialize;

use super::{member_f32, member_i64, Entity, RecordInfo};
use crate::names::Resolver;

/// QUST DATA flag: running when a new game starts
pub const FLAG_START_ENABLED: u8 = 0x01;
/// QUST DATA flag: stages may be set more than once
pub const FLAG_REPEATED_STAGES: u8 = 0x08;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QuestStage {
    pub index: i16,
    /// Journal entries logged when the stage is set
    pub log_entries: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QuestObjective {
    pub index: i32,
    pub text: Option<String>,
    /// Map markers and references the objective points at
    pub targets: Vec<FormId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quest {
    #[serde(flatten)]
    pub info: RecordInfo,
    pub flags: u8,
    pub priority: u8,
    pub delay: Option<f32>,
    pub start_enabled: bool,
    pub repeated_stages: bool,
    pub script: Option<FormId>,
    pub stages: Vec<QuestStage>,
    pub objectives: Vec<QuestObjective>,
}

pub fn build_quest(record: &DecodedRecord, resolver: &Resolver) -> Quest {
    let flags = member_i64(record, b"DATA", "flags").unwrap_or(0) as u8;

    let mut stages: Vec<QuestStage> = Vec::new();
    let mut objectives: Vec<QuestObjective> = Vec::new();

    // Stage and objective data are flat runs keyed by the preceding index
    for field in &record.fields {
        let Some(value) = field.value() else {
            continue;
        };
        match &field.signature.0 {
            b"INDX" => stages.push(QuestStage {
                index: value.as_i64().unwrap_or(0) as i16,
                log_entries: Vec::new(),
            }),
            b"CNAM" => {
                if let (Some(stage), Some(text)) = (stages.last_mut(), value.as_str()) {
                    if !text.is_empty() {
                        stage.log_entries.push(text.to_string());
                    }
                }
            }
            b"QOBJ" => objectives.push(QuestObjective {
                index: value.as_i64().unwrap_or(0) as i32,
                ..QuestObjective::default()
            }),
            b"NNAM" => {
                if let Some(objective) = objectives.last_mut() {
                    objective.text = value.as_str().filter(|s| !s.is_empty()).map(str::to_string);
                }
            }
            b"QSTA" => {
                let target = value
                    .member("target")
                    .and_then(FieldValue::as_form_id)
                    .and_then(FormId::non_null);
                if let (Some(objective), Some(target)) = (objectives.last_mut(), target) {
                    objective.targets.push(target);
                }
            }
            _ => {}
        }
    }

    Quest {
        info: RecordInfo::from_record(record, resolver),
        flags,
        priority: member_i64(record, b"DATA", "priority").unwrap_or(0) as u8,
        delay: member_f32(record, b"DATA", "delay"),
        start_enabled: flags & FLAG_START_ENABLED != 0,
        repeated_stages: flags & FLAG_REPEATED_STAGES != 0,
        script: record.form_id_field(super::sig(b"SCRI")),
        stages,
        objectives,
    }
}

pub fn build_quests(records: &[&DecodedRecord], resolver: &Resolver) -> Vec<Entity> {
    records
        .iter()
        .map(|r| Entity::Quest(build_quest(r, resolver)))
        .collect()
}
