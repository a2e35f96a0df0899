//! Dialogue topics and their responses
//!
//! A response names its topic with `TPIC` when the record carries one. In a
//! capture the grouping that normally ties responses to topics is gone, so
//! the runtime response lists found by the pointer walks fill the gaps.

use std::collections::{HashMap, HashSet};

use esmdump_format::{DecodedRecord, FieldValue, FormId};
use serde::Serialize;

use super::{form_ids, member_i64, sig, value_f32, Entity, RecordInfo};
use crate::names::Resolver;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DialogTopic {
    #[serde(flatten)]
    pub info: RecordInfo,
    pub quests: Vec<FormId>,
    pub topic_type: Option<u8>,
    pub flags: u8,
    pub priority: Option<f32>,
    pub dummy_prompt: Option<String>,
    /// Responses in record order, then runtime list order
    pub responses: Vec<FormId>,
}

/// One spoken line of a response (`TRDT` with its `NAM1`/`NAM2`)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResponseLine {
    pub emotion_type: u32,
    pub emotion_value: i32,
    pub response_number: u8,
    pub sound: Option<FormId>,
    pub text: Option<String>,
    pub script_notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DialogResponse {
    #[serde(flatten)]
    pub info: RecordInfo,
    pub topic: Option<FormId>,
    pub quest: Option<FormId>,
    pub speaker: Option<FormId>,
    pub previous: Option<FormId>,
    pub info_type: Option<u8>,
    pub next_speaker: Option<u8>,
    pub flags: u8,
    pub prompt: Option<String>,
    pub lines: Vec<ResponseLine>,
    /// Topics this response unlocks
    pub add_topics: Vec<FormId>,
}

pub fn build_topic(record: &DecodedRecord, resolver: &Resolver) -> DialogTopic {
    DialogTopic {
        info: RecordInfo::from_record(record, resolver),
        quests: form_ids(record, b"QSTI"),
        topic_type: member_i64(record, b"DATA", "topic_type").map(|v| v as u8),
        flags: member_i64(record, b"DATA", "flags").unwrap_or(0) as u8,
        priority: value_f32(record, b"PNAM"),
        dummy_prompt: record.string(sig(b"TDUM")).map(str::to_string),
        responses: Vec::new(),
    }
}

pub fn build_topics(records: &[&DecodedRecord], resolver: &Resolver) -> Vec<Entity> {
    records
        .iter()
        .map(|r| Entity::DialogTopic(build_topic(r, resolver)))
        .collect()
}

fn non_empty(value: &FieldValue) -> Option<String> {
    value.as_str().filter(|s| !s.is_empty()).map(str::to_string)
}

pub fn build_response(record: &DecodedRecord, resolver: &Resolver) -> DialogResponse {
    let mut lines: Vec<ResponseLine> = Vec::new();
    for field in &record.fields {
        let Some(value) = field.value() else {
            continue;
        };
        match &field.signature.0 {
            b"TRDT" => {
                let m = |name| value.member(name).and_then(FieldValue::as_i64);
                lines.push(ResponseLine {
                    emotion_type: m("emotion_type").unwrap_or(0) as u32,
                    emotion_value: m("emotion_value").unwrap_or(0) as i32,
                    response_number: m("response_number").unwrap_or(0) as u8,
                    sound: value
                        .member("sound")
                        .and_then(FieldValue::as_form_id)
                        .and_then(FormId::non_null),
                    ..ResponseLine::default()
                });
            }
            b"NAM1" => {
                if let Some(line) = lines.last_mut() {
                    line.text = non_empty(value);
                }
            }
            b"NAM2" => {
                if let Some(line) = lines.last_mut() {
                    line.script_notes = non_empty(value);
                }
            }
            _ => {}
        }
    }

    DialogResponse {
        info: RecordInfo::from_record(record, resolver),
        topic: record.form_id_field(sig(b"TPIC")),
        quest: record.form_id_field(sig(b"QSTI")),
        speaker: record.form_id_field(sig(b"ANAM")),
        previous: record.form_id_field(sig(b"PNAM")),
        info_type: member_i64(record, b"DATA", "info_type").map(|v| v as u8),
        next_speaker: member_i64(record, b"DATA", "next_speaker").map(|v| v as u8),
        flags: member_i64(record, b"DATA", "flags").unwrap_or(0) as u8,
        prompt: record.string(sig(b"RNAM")).map(str::to_string),
        lines,
        add_topics: form_ids(record, b"NAME"),
    }
}

pub fn build_responses(records: &[&DecodedRecord], resolver: &Resolver) -> Vec<Entity> {
    records
        .iter()
        .map(|r| Entity::DialogResponse(build_response(r, resolver)))
        .collect()
}

/// Attach responses to their topics
///
/// Record links come first in response FormId order; runtime list entries
/// follow in list order. A response without `TPIC` takes the topic whose
/// runtime list holds it.
pub fn link_topics(entities: &mut [Entity], resolver: &Resolver) {
    let mut topic_index: HashMap<FormId, usize> = HashMap::new();
    let mut response_index: HashMap<FormId, usize> = HashMap::new();
    for (i, entity) in entities.iter().enumerate() {
        match entity {
            Entity::DialogTopic(t) => {
                topic_index.insert(t.info.form_id, i);
            }
            Entity::DialogResponse(r) => {
                response_index.insert(r.info.form_id, i);
            }
            _ => {}
        }
    }
    if topic_index.is_empty() {
        return;
    }

    let mut links: Vec<(FormId, FormId)> = entities
        .iter()
        .filter_map(|e| match e {
            Entity::DialogResponse(r) => Some((r.topic?, r.info.form_id)),
            _ => None,
        })
        .collect();
    links.sort_by_key(|&(_, response)| response);

    let mut adopted: Vec<(usize, FormId)> = Vec::new();
    let mut topics: Vec<FormId> = topic_index.keys().copied().collect();
    topics.sort();
    for topic in topics {
        for &response in resolver.runtime_responses(topic) {
            links.push((topic, response));
            if let Some(&i) = response_index.get(&response) {
                adopted.push((i, topic));
            }
        }
    }

    let mut seen: HashSet<(FormId, FormId)> = HashSet::new();
    for (topic, response) in links {
        let Some(&i) = topic_index.get(&topic) else {
            continue;
        };
        if !seen.insert((topic, response)) {
            continue;
        }
        if let Entity::DialogTopic(t) = &mut entities[i] {
            t.responses.push(response);
        }
    }

    for (i, topic) in adopted {
        if let Entity::DialogResponse(r) = &mut entities[i] {
            r.topic.get_or_insert(topic);
        }
    }
}
