use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::dialogue::{DialogueOptions, DialogueRequest};
use crate::state::PlayerStatus;

/// Snapshot handed to observers whenever the player produces a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameSignal {
    pub frame: u64,
    pub elapsed: f64,
    pub status: PlayerStatus,
    pub dialogue_active: bool,
}

/// Receives player notifications. Every hook defaults to a no-op.
///
/// Hooks fire in the middle of a `Player` call, while the caller still holds
/// the player mutably. Record what is needed and read the player once the
/// call has returned.
pub trait PlayerObserver {
    fn render(&self, _frame: &FrameSignal) {}
    fn error(&self, _message: &str) {}
    fn page_color(&self, _color: &str) {}
    fn dialogue(&self, _request: &DialogueRequest) {}
}

impl fmt::Debug for dyn PlayerObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PlayerObserver")
    }
}

pub type SubscriptionId = u64;

#[derive(Debug, Default)]
pub(crate) struct Observers {
    next_id: SubscriptionId,
    entries: BTreeMap<SubscriptionId, Rc<dyn PlayerObserver>>,
}

impl Observers {
    pub(crate) fn subscribe(&mut self, observer: Rc<dyn PlayerObserver>) -> SubscriptionId {
        self.next_id += 1;
        self.entries.insert(self.next_id, observer);
        self.next_id
    }

    pub(crate) fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub(crate) fn each(&self, mut notify: impl FnMut(&dyn PlayerObserver)) {
        for observer in self.entries.values() {
            notify(observer.as_ref());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObservedSignal {
    Render {
        frame: u64,
        status: PlayerStatus,
    },
    Error {
        message: String,
    },
    PageColor {
        color: String,
    },
    Dialogue {
        text: String,
        options: DialogueOptions,
    },
}

/// Observer that keeps every signal it sees, for transcripts and tests.
#[derive(Clone, Default)]
pub struct RecordingObserver {
    signals: Rc<RefCell<Vec<ObservedSignal>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signals(&self) -> Vec<ObservedSignal> {
        self.signals.borrow().clone()
    }

    /// Texts of every dialogue request seen so far.
    pub fn dialogue_lines(&self) -> Vec<String> {
        self.signals
            .borrow()
            .iter()
            .filter_map(|signal| match signal {
                ObservedSignal::Dialogue { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.signals
            .borrow()
            .iter()
            .filter_map(|signal| match signal {
                ObservedSignal::Error { message } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }
}

impl PlayerObserver for RecordingObserver {
    fn render(&self, frame: &FrameSignal) {
        self.signals.borrow_mut().push(ObservedSignal::Render {
            frame: frame.frame,
            status: frame.status,
        });
    }

    fn error(&self, message: &str) {
        self.signals.borrow_mut().push(ObservedSignal::Error {
            message: message.to_string(),
        });
    }

    fn page_color(&self, color: &str) {
        self.signals.borrow_mut().push(ObservedSignal::PageColor {
            color: color.to_string(),
        });
    }

    fn dialogue(&self, request: &DialogueRequest) {
        self.signals.borrow_mut().push(ObservedSignal::Dialogue {
            text: request.text.clone(),
            options: request.options.clone(),
        });
    }
}
