use std::collections::BTreeMap;

use nook_model::{fields_by_key, first_field, Event, EventId, Field, FieldKind};
use rand::seq::SliceRandom;
use rand::RngCore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SayMode {
    #[default]
    Sequential,
    Cycle,
    Shuffle,
}

impl SayMode {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("cycle") => SayMode::Cycle,
            Some("shuffle") => SayMode::Shuffle,
            _ => SayMode::Sequential,
        }
    }

    pub fn of(event: &Event) -> Self {
        Self::parse(first_field(event, "say-mode", Some(FieldKind::Text)).and_then(Field::as_str))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SayRecord {
    order: Vec<String>,
    cursor: usize,
}

/// Per-event say-list playback, kept beside the project rather than inside
/// it so a restart or a save never sees play state.
#[derive(Debug, Default)]
pub struct DialogueSequencer {
    records: BTreeMap<EventId, SayRecord>,
}

impl DialogueSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Line to show for this trigger of `event`, or `None` when it has no
    /// `say` dialogue.
    pub fn next_line(&mut self, event: &Event, rng: &mut dyn RngCore) -> Option<String> {
        let mode = SayMode::of(event);
        if !self.records.contains_key(&event.id) {
            let mut order: Vec<String> = fields_by_key(event, "say", Some(FieldKind::Dialogue))
                .filter_map(Field::as_str)
                .map(str::to_string)
                .collect();
            if order.is_empty() {
                return None;
            }
            if mode == SayMode::Shuffle {
                order.shuffle(rng);
            }
            self.records.insert(event.id, SayRecord { order, cursor: 0 });
        }

        let record = self.records.get_mut(&event.id)?;
        let line = record.order.get(record.cursor).cloned();
        record.cursor += 1;
        if record.cursor >= record.order.len() {
            match mode {
                SayMode::Sequential => record.cursor = record.order.len() - 1,
                SayMode::Cycle | SayMode::Shuffle => {
                    self.records.remove(&event.id);
                }
            }
        }
        line
    }

    pub fn cursor(&self, event: EventId) -> Option<usize> {
        self.records.get(&event).map(|record| record.cursor)
    }

    pub fn forget(&mut self, event: EventId) {
        self.records.remove(&event);
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
