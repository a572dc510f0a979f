use std::rc::Rc;

use log::{debug, info, warn};
use nook_model::{
    discard, find_event, find_event_mut, location_of_event, relocate, replace_fields, Event,
    EventId, Field, FieldKind, Location, Palette, Project,
};
use rand::RngCore;
use serde::Serialize;

use crate::dialogue::{DialogueBox, DialogueOptions, DialogueRequest};
use crate::observer::{FrameSignal, Observers, PlayerObserver, SubscriptionId};
use crate::sequencer::DialogueSequencer;
use crate::store::ProjectStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerStatus {
    Uninitialized,
    Ready,
    Error,
}

/// Everything the touch pipeline and the script capabilities read or
/// mutate. Shared between the player and the Lua bindings behind an
/// `Rc<RefCell<_>>`; borrows never live across a script resume.
pub(crate) struct PlayState {
    store: ProjectStore,
    pub(crate) avatar: Option<EventId>,
    pub(crate) status: PlayerStatus,
    dialogue: Box<dyn DialogueBox>,
    sequencer: DialogueSequencer,
    rng: Box<dyn RngCore>,
    events: Vec<String>,
    pub(crate) clock: f64,
    pub(crate) frame_time: f64,
    pub(crate) frame_count: u64,
    page_color: Option<String>,
    pub(crate) restart_requested: bool,
    observers: Observers,
}

impl PlayState {
    pub(crate) fn new(
        store: ProjectStore,
        dialogue: Box<dyn DialogueBox>,
        rng: Box<dyn RngCore>,
    ) -> Self {
        PlayState {
            store,
            avatar: None,
            status: PlayerStatus::Uninitialized,
            dialogue,
            sequencer: DialogueSequencer::new(),
            rng,
            events: Vec::new(),
            clock: 0.0,
            frame_time: 0.0,
            frame_count: 0,
            page_color: None,
            restart_requested: false,
            observers: Observers::default(),
        }
    }

    pub(crate) fn project(&self) -> &Project {
        self.store.present()
    }

    pub(crate) fn store(&self) -> &ProjectStore {
        &self.store
    }

    pub(crate) fn events(&self) -> &[String] {
        &self.events
    }

    pub(crate) fn log_event(&mut self, event: impl Into<String>) {
        let event = event.into();
        debug!(target: "nook_engine", "{event}");
        self.events.push(event);
    }

    pub(crate) fn page_color(&self) -> Option<&str> {
        self.page_color.as_deref()
    }

    pub(crate) fn dialogue(&self) -> &dyn DialogueBox {
        self.dialogue.as_ref()
    }

    pub(crate) fn dialogue_is_empty(&self) -> bool {
        self.dialogue.is_empty()
    }

    pub(crate) fn skip_dialogue(&mut self) {
        self.dialogue.skip();
    }

    pub(crate) fn update_dialogue(&mut self, dt: f64) {
        self.dialogue.update(dt);
    }

    pub(crate) fn find_event(&self, id: EventId) -> Option<&Event> {
        find_event(self.project(), id)
    }

    pub(crate) fn location_of(&self, id: EventId) -> Option<Location> {
        location_of_event(self.project(), id)
    }

    pub(crate) fn avatar_location(&self) -> Option<Location> {
        self.avatar.and_then(|avatar| self.location_of(avatar))
    }

    /// Palette of the room the avatar currently stands in.
    pub(crate) fn active_palette(&self) -> Option<Palette> {
        let room = self.avatar_location().map(|location| location.room).unwrap_or(0);
        self.project().palette_for_room(room).cloned()
    }

    pub(crate) fn next_say_line(&mut self, event: &Event) -> Option<String> {
        self.sequencer.next_line(event, self.rng.as_mut())
    }

    pub(crate) fn say(&mut self, text: &str, options: DialogueOptions) {
        let request = DialogueRequest::new(text, options);
        self.log_event(format!("dialogue.say {}", request.text));
        self.observers.each(|observer| observer.dialogue(&request));
        self.dialogue.queue(request);
    }

    /// Centered page on the active palette's background.
    pub(crate) fn title(&mut self, text: &str, options: DialogueOptions) {
        let background = self
            .active_palette()
            .map(|palette| palette.background().to_string());
        self.say(text, options.or(DialogueOptions::centered(background)));
    }

    /// Moves the avatar's position in place, keeping paint order.
    pub(crate) fn step_avatar(&mut self, position: [i32; 2]) -> bool {
        let Some(avatar) = self.avatar else {
            return false;
        };
        let moved = self.store.commit(|project| match find_event_mut(project, avatar) {
            Some(event) => {
                event.position = position;
                true
            }
            None => false,
        });
        if moved {
            self.log_event(format!("move.step {},{}", position[0], position[1]));
        }
        moved
    }

    pub(crate) fn relocate(&mut self, id: EventId, location: Location) -> bool {
        let moved = self
            .store
            .commit(|project| relocate(project, id, location));
        if moved {
            self.log_event(format!(
                "event.relocate {id} -> room {} {},{}",
                location.room, location.position[0], location.position[1]
            ));
        }
        moved
    }

    pub(crate) fn discard(&mut self, id: EventId) -> bool {
        let removed = self.store.commit(|project| discard(project, id)).is_some();
        if removed {
            self.sequencer.forget(id);
            self.log_event(format!("event.discard {id}"));
        }
        removed
    }

    pub(crate) fn replace_fields(
        &mut self,
        id: EventId,
        key: &str,
        kind: Option<FieldKind>,
        fields: Vec<Field>,
    ) -> bool {
        let count = fields.len();
        let replaced = self
            .store
            .commit(|project| match find_event_mut(project, id) {
                Some(event) => {
                    replace_fields(event, key, kind, fields);
                    true
                }
                None => false,
            });
        if replaced {
            self.log_event(format!("event.fields {id} {key} x{count}"));
        }
        replaced
    }

    pub(crate) fn set_page_color(&mut self, color: &str) {
        self.page_color = Some(color.to_string());
        self.log_event(format!("page.color {color}"));
        self.observers.each(|observer| observer.page_color(color));
    }

    /// Queues a fixed-style error page. Script failures leave the status
    /// alone; only a fatal error flips it.
    pub(crate) fn show_error(&mut self, message: &str, fatal: bool) {
        if fatal {
            self.status = PlayerStatus::Error;
            self.log_event(format!("player.error {message}"));
        } else {
            self.log_event(format!("script.error {message}"));
        }
        warn!(target: "nook_engine", "{message}");
        self.observers.each(|observer| observer.error(message));
        self.say(message, DialogueOptions::error());
    }

    pub(crate) fn advance_time(&mut self, dt: f64, frame_step: f64) {
        self.clock += dt;
        self.frame_time += dt;
        while self.frame_time >= frame_step {
            self.frame_count += 1;
            self.frame_time -= frame_step;
        }
    }

    pub(crate) fn emit_render(&self) {
        let frame = FrameSignal {
            frame: self.frame_count,
            elapsed: self.clock,
            status: self.status,
            dialogue_active: !self.dialogue.is_empty(),
        };
        self.observers.each(|observer| observer.render(&frame));
    }

    pub(crate) fn subscribe(&mut self, observer: Rc<dyn PlayerObserver>) -> SubscriptionId {
        self.observers.subscribe(observer)
    }

    pub(crate) fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Drops all play state and puts the backed-up project back.
    pub(crate) fn reset(&mut self) {
        self.store.restore();
        self.sequencer.clear();
        self.dialogue.clear();
        self.avatar = None;
        self.status = PlayerStatus::Uninitialized;
        self.clock = 0.0;
        self.frame_time = 0.0;
        self.frame_count = 0;
        self.page_color = None;
        self.restart_requested = false;
        info!(target: "nook_engine", "project restored from backup");
        self.log_event("player.restart");
    }
}
