//! Walks over runtime containers: linked lists and chained hash maps
//!
//! Every walk keeps the set of node addresses it has visited and stops on
//! the first repeat, so corrupt or cyclic pointers always terminate. A walk
//! that stops early still returns what it collected before the stop.

use std::collections::HashSet;

use esmdump_format::FormId;

use super::resolver::{PointerResolver, UnresolvedPointer};

/// Key type of a runtime hash map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// 32-bit form id keys (the global form map)
    FormId,
    /// Pointer to a NUL-terminated string (the editor-id map)
    String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MapKey {
    FormId(FormId),
    String(String),
}

/// Result of one walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Walk<T> {
    pub items: Vec<T>,
    /// Why the walk ended early, if it did
    pub stopped: Option<UnresolvedPointer>,
    /// Failures skipped without ending the walk
    pub skipped: usize,
}

impl<T> Default for Walk<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            stopped: None,
            skipped: 0,
        }
    }
}

impl<T> Walk<T> {
    pub fn is_complete(&self) -> bool {
        self.stopped.is_none()
    }
}

impl PointerResolver<'_> {
    /// Walk a singly linked list of `{item, next}` nodes starting at `head`
    ///
    /// The head node is embedded in its owner, so an empty list is a head
    /// with a null item.
    pub fn walk_list(&self, head: u64) -> Walk<u64> {
        let layout = self.layout();
        let mut walk = Walk::default();
        let mut seen = HashSet::new();
        let mut node = head;

        loop {
            if !seen.insert(node) {
                walk.stopped = Some(UnresolvedPointer::Cycle { address: node });
                break;
            }
            if seen.len() > layout.max_walk {
                walk.stopped = Some(UnresolvedPointer::LimitReached {
                    limit: layout.max_walk,
                });
                break;
            }

            let item = match self.read_pointer_at(node, layout.list_item_offset) {
                Ok(item) => item,
                Err(e) => {
                    walk.stopped = Some(e);
                    break;
                }
            };
            if item != 0 {
                walk.items.push(item);
            }

            match self.read_pointer_at(node, layout.list_next_offset) {
                Ok(0) => break,
                Ok(next) => node = next,
                Err(e) => {
                    walk.stopped = Some(e);
                    break;
                }
            }
        }

        if let Some(err) = &walk.stopped {
            self.note_failure("list walk", err);
        }
        walk
    }

    /// Walk a chained hash map: `{bucket_count, buckets}` header, bucket
    /// array of chain heads, chain items `{next, key, value}`
    ///
    /// A broken chain skips to the next bucket.
    pub fn walk_hash_map(&self, map: u64, keys: KeyKind) -> Walk<(MapKey, u64)> {
        let layout = self.layout();
        let mut walk = Walk::default();

        let header = self.read_u32_at(map, layout.map_bucket_count_offset).and_then(|count| {
            if count == 0 || count > layout.max_buckets {
                return Err(UnresolvedPointer::Implausible {
                    address: map,
                    what: "bucket count",
                    value: count as u64,
                });
            }
            let buckets = self.read_pointer_at(map, layout.map_buckets_offset)?;
            Ok((count, buckets))
        });
        let (count, buckets) = match header {
            Ok(h) => h,
            Err(e) => {
                self.note_failure("hash map header", &e);
                walk.stopped = Some(e);
                return walk;
            }
        };

        let width = layout.pointer_width() as u64;
        let mut seen = HashSet::new();

        for bucket in 0..count as u64 {
            let mut item = match self.read_pointer_at(buckets, (bucket * width) as usize) {
                Ok(item) => item,
                Err(e) => {
                    // The bucket array itself ran out of the capture
                    self.note_failure("hash map buckets", &e);
                    walk.stopped = Some(e);
                    return walk;
                }
            };

            while item != 0 {
                if !seen.insert(item) {
                    let err = UnresolvedPointer::Cycle { address: item };
                    self.note_failure("hash map chain", &err);
                    walk.skipped += 1;
                    break;
                }
                if seen.len() > layout.max_walk {
                    let err = UnresolvedPointer::LimitReached {
                        limit: layout.max_walk,
                    };
                    self.note_failure("hash map", &err);
                    walk.stopped = Some(err);
                    return walk;
                }

                match self.map_entry(item, keys) {
                    Ok(entry) => walk.items.push(entry),
                    Err(e) => {
                        self.note_failure("hash map entry", &e);
                        walk.skipped += 1;
                    }
                }

                item = match self.read_pointer_at(item, layout.map_item_next_offset) {
                    Ok(next) => next,
                    Err(e) => {
                        self.note_failure("hash map chain", &e);
                        walk.skipped += 1;
                        break;
                    }
                };
            }
        }

        tracing::debug!(
            "Hash map at {:#x}: {} buckets, {} entries, {} skipped",
            map,
            count,
            walk.items.len(),
            walk.skipped
        );
        walk
    }

    fn map_entry(&self, item: u64, keys: KeyKind) -> Result<(MapKey, u64), UnresolvedPointer> {
        let layout = self.layout();
        let key_at = self.field_address(item, layout.map_item_key_offset)?;
        let key = match keys {
            KeyKind::FormId => MapKey::FormId(FormId(self.read_u32(key_at)?)),
            KeyKind::String => MapKey::String(self.read_cstring(self.read_pointer(key_at)?)?),
        };
        let value = self.read_pointer_at(item, layout.map_item_value_offset)?;
        Ok((key, value))
    }

    /// Form ids of the responses linked from a runtime dialogue topic
    pub fn topic_responses(&self, topic: u64) -> Walk<FormId> {
        let Some(offset) = self.layout().topic_responses_offset else {
            return Walk {
                stopped: Some(UnresolvedPointer::NotConfigured {
                    field: "topic_responses_offset",
                }),
                ..Walk::default()
            };
        };

        let list = match self.field_address(topic, offset) {
            Ok(head) => self.walk_list(head),
            Err(e) => {
                self.note_failure("topic responses", &e);
                return Walk {
                    stopped: Some(e),
                    ..Walk::default()
                };
            }
        };
        let mut walk = Walk {
            items: Vec::with_capacity(list.items.len()),
            stopped: list.stopped,
            skipped: list.skipped,
        };
        for info in list.items {
            match self.read_form(info, None, self.layout().info_form_type) {
                Ok(form) => walk.items.push(form.form_id),
                Err(e) => {
                    self.note_failure("topic response", &e);
                    walk.skipped += 1;
                }
            }
        }
        walk
    }
}
