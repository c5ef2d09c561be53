//! Interned marker names.
//!
//! Names are split in two tables by length so that short names (the vast majority)
//! stay packed together. The table is encoded in the high bit of the composite index.
use crate::common_types::MarkerId;
use log::{debug, log_enabled, Level};
use serde_derive::Serialize;
use std::collections::HashMap;

const LONG_NAME_BIT: u32 = 1 << 31;

/// Index of a name, table included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct NameIndex(u32);

impl NameIndex {
    fn short(index: usize) -> Self {
        debug_assert!((index as u32) & LONG_NAME_BIT == 0);
        NameIndex(index as u32)
    }

    fn long(index: usize) -> Self {
        debug_assert!((index as u32) & LONG_NAME_BIT == 0);
        NameIndex(index as u32 | LONG_NAME_BIT)
    }

    /// Is the name in the long names table.
    pub fn is_long(self) -> bool {
        self.0 & LONG_NAME_BIT != 0
    }

    /// Position inside its table.
    pub fn position(self) -> usize {
        (self.0 & !LONG_NAME_BIT) as usize
    }
}

/// The two names tables and the marker id lookup.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NameTables {
    threshold: usize,
    short_names: Vec<String>,
    long_names: Vec<String>,
    markers: HashMap<MarkerId, NameIndex>,
}

impl NameTables {
    /// Create empty tables. Names with more than `threshold` bytes are long.
    pub fn new(threshold: usize) -> Self {
        NameTables {
            threshold,
            ..Default::default()
        }
    }

    /// Remember the name of given marker.
    /// The first name seen for a marker wins, missing names are never cached.
    pub fn intern(&mut self, marker_id: MarkerId, name: Option<&str>) -> Option<NameIndex> {
        let name = name?;
        if let Some(&existing) = self.markers.get(&marker_id) {
            if log_enabled!(Level::Debug) && self.get(existing) != Some(name) {
                debug!(
                    "marker {} renamed to {:?}, keeping {:?}",
                    marker_id,
                    name,
                    self.get(existing)
                );
            }
            return Some(existing);
        }
        let index = if name.len() > self.threshold {
            self.long_names.push(name.to_string());
            NameIndex::long(self.long_names.len() - 1)
        } else {
            self.short_names.push(name.to_string());
            NameIndex::short(self.short_names.len() - 1)
        };
        self.markers.insert(marker_id, index);
        Some(index)
    }

    /// Name at given index.
    pub fn get(&self, index: NameIndex) -> Option<&str> {
        let table = if index.is_long() {
            &self.long_names
        } else {
            &self.short_names
        };
        table.get(index.position()).map(String::as_str)
    }

    /// Name of given marker.
    pub fn marker_name(&self, marker_id: MarkerId) -> Option<&str> {
        self.markers
            .get(&marker_id)
            .and_then(|index| self.get(*index))
    }

    /// Index of given marker's name.
    pub fn marker_index(&self, marker_id: MarkerId) -> Option<NameIndex> {
        self.markers.get(&marker_id).cloned()
    }

    /// Short names table.
    pub fn short_names(&self) -> &[String] {
        &self.short_names
    }

    /// Long names table.
    pub fn long_names(&self) -> &[String] {
        &self.long_names
    }

    /// Number of named markers.
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    /// No names at all.
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}
