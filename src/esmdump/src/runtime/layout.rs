//! Runtime structure offsets
//!
//! Defaults describe the 32-bit big-endian console build. Offsets that
//! differ between builds and cannot be inferred are optional; the walks that
//! need them are skipped until the config supplies them.

use esmdump_format::ByteOrder;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeLayout {
    /// Pointer size in bytes, 4 or 8
    pub pointer_width: u8,
    pub byte_order: ByteOrder,

    // Form header
    pub form_type_offset: usize,
    pub form_flags_offset: usize,
    pub form_id_offset: usize,

    /// Race pointer inside an NPC form
    pub npc_race_offset: Option<usize>,
    /// Response list head inside a dialogue topic form
    pub topic_responses_offset: Option<usize>,

    /// Form type codes used to check dereferenced forms
    pub npc_form_type: Option<u8>,
    pub race_form_type: Option<u8>,
    pub topic_form_type: Option<u8>,
    pub info_form_type: Option<u8>,

    // Hash map header
    pub map_bucket_count_offset: usize,
    pub map_buckets_offset: usize,
    // Hash map chain item
    pub map_item_next_offset: usize,
    pub map_item_key_offset: usize,
    pub map_item_value_offset: usize,

    // Linked list node
    pub list_item_offset: usize,
    pub list_next_offset: usize,

    /// Largest bucket count accepted as a real map
    pub max_buckets: u32,
    /// Upper bound on nodes visited by one walk
    pub max_walk: usize,
    /// Longest editor id read from the runtime
    pub max_string_len: usize,
}

impl Default for RuntimeLayout {
    fn default() -> Self {
        Self {
            pointer_width: 4,
            byte_order: ByteOrder::Big,
            form_type_offset: 4,
            form_flags_offset: 8,
            form_id_offset: 12,
            npc_race_offset: None,
            topic_responses_offset: None,
            npc_form_type: Some(0x2A),
            race_form_type: Some(0x0C),
            topic_form_type: Some(0x45),
            info_form_type: Some(0x46),
            map_bucket_count_offset: 4,
            map_buckets_offset: 8,
            map_item_next_offset: 0,
            map_item_key_offset: 4,
            map_item_value_offset: 8,
            list_item_offset: 0,
            list_next_offset: 4,
            max_buckets: 1 << 20,
            max_walk: 1 << 20,
            max_string_len: 512,
        }
    }
}

impl RuntimeLayout {
    pub fn pointer_width(&self) -> usize {
        if self.pointer_width == 8 {
            8
        } else {
            4
        }
    }

    /// Smallest span that holds a form header
    pub fn form_header_size(&self) -> usize {
        (self.form_id_offset + 4)
            .max(self.form_flags_offset + 4)
            .max(self.form_type_offset + 1)
    }
}

/// Addresses of global runtime structures, found by the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeHints {
    /// Global FormId-keyed map of every loaded form
    pub form_map: Option<u64>,
    /// Global editor-id-keyed map
    pub editor_id_map: Option<u64>,
}

impl RuntimeHints {
    pub fn is_empty(&self) -> bool {
        self.form_map.is_none() && self.editor_id_map.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_defaults() {
        let layout = RuntimeLayout::default();
        assert_eq!(layout.pointer_width(), 4);
        assert_eq!(layout.byte_order, ByteOrder::Big);
        assert_eq!(layout.form_header_size(), 16);
    }

    #[test]
    fn test_layout_from_toml() {
        let layout: RuntimeLayout =
            toml::from_str("pointer_width = 8\nbyte_order = \"little\"\nnpc_race_offset = 0x60\n").unwrap();
        assert_eq!(layout.pointer_width(), 8);
        assert_eq!(layout.byte_order, ByteOrder::Little);
        assert_eq!(layout.npc_race_offset, Some(0x60));
        assert_eq!(layout.form_id_offset, 12);
    }
}
