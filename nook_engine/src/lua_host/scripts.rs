use std::collections::BTreeMap;

use mlua::RegistryKey;
use nook_model::EventId;

#[derive(Debug)]
pub(super) struct ScriptRecord {
    label: String,
    event: EventId,
    thread: Option<RegistryKey>,
    yields: u32,
}

/// Live touch-script coroutines, keyed by a monotonically increasing handle.
#[derive(Debug)]
pub(super) struct ScriptRuntime {
    next_handle: u32,
    records: BTreeMap<u32, ScriptRecord>,
}

impl ScriptRuntime {
    pub(super) fn new() -> Self {
        ScriptRuntime {
            next_handle: 1,
            records: BTreeMap::new(),
        }
    }

    pub(super) fn start_script(&mut self, label: String, event: EventId) -> (u32, String) {
        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1);
        let message = format!("script.start {label} (#{handle})");
        self.records.insert(
            handle,
            ScriptRecord {
                label,
                event,
                thread: None,
                yields: 0,
            },
        );
        (handle, message)
    }

    pub(super) fn attach_thread(&mut self, handle: u32, key: RegistryKey) {
        if let Some(record) = self.records.get_mut(&handle) {
            record.thread = Some(key);
        }
    }

    pub(super) fn thread_key(&self, handle: u32) -> Option<&RegistryKey> {
        self.records
            .get(&handle)
            .and_then(|record| record.thread.as_ref())
    }

    pub(super) fn increment_yield(&mut self, handle: u32) {
        if let Some(record) = self.records.get_mut(&handle) {
            record.yields = record.yields.saturating_add(1);
        }
    }

    pub(super) fn yield_count(&self, handle: u32) -> Option<u32> {
        self.records.get(&handle).map(|record| record.yields)
    }

    pub(super) fn event(&self, handle: u32) -> Option<EventId> {
        self.records.get(&handle).map(|record| record.event)
    }

    pub(super) fn len(&self) -> usize {
        self.records.len()
    }

    /// Forgets the script and hands back its thread key for cleanup.
    pub(super) fn complete_script(&mut self, handle: u32) -> (Option<RegistryKey>, Option<String>) {
        match self.records.remove(&handle) {
            Some(record) => {
                let message = format!(
                    "script.complete {} (#{handle}, {} yields)",
                    record.label, record.yields
                );
                (record.thread, Some(message))
            }
            None => (None, None),
        }
    }

    pub(super) fn drain(&mut self) -> Vec<RegistryKey> {
        std::mem::take(&mut self.records)
            .into_values()
            .filter_map(|record| record.thread)
            .collect()
    }
}
