//! Lifecycle orchestration and the cooperative task driver.
//!
//! Every touch chain is a [`Task`]: a stack of frames where the top frame is
//! the one that runs. A script that calls `TOUCH` pushes the nested touch on
//! top of itself and resumes once it has been popped again. `pump` keeps
//! stepping tasks until each one is blocked on dialogue, a delay deadline or
//! has finished.

use std::cell::{Ref, RefCell};
use std::rc::Rc;

use anyhow::Result;
use log::{debug, info};
use nook_model::{
    events_tagged, first_field, resolve_move, touch_target, EventId, Field, FieldKind,
    MoveResolution, Project,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::dialogue::{DialogueBox, DialogueRequest, HeadlessDialogue};
use crate::lua_host::{ScriptError, ScriptHost, ScriptRequest, ScriptStep, TouchBindings};
use crate::observer::{PlayerObserver, SubscriptionId};
use crate::pipeline::{Pipeline, StepOutcome};
use crate::state::{PlayState, PlayerStatus};
use crate::store::ProjectStore;

pub const MISSING_AVATAR_MESSAGE: &str = "NO EVENT WITH is-player TAG FOUND";

/// Seconds per tile-animation frame.
pub const DEFAULT_FRAME_STEP: f64 = 0.4;

/// Deepest stack of nested touches one chain may build. A `TOUCH` past it
/// fails the calling script instead of nesting.
pub const MAX_TOUCH_DEPTH: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerConfig {
    pub frame_step: f64,
    /// Seed for say-list shuffling; `None` seeds from entropy.
    pub rng_seed: Option<u64>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        PlayerConfig {
            frame_step: DEFAULT_FRAME_STEP,
            rng_seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Wait {
    None,
    Dialogue,
    Until(f64),
}

#[derive(Debug)]
enum Frame {
    Script {
        handle: u32,
        event: EventId,
        wait: Wait,
    },
    Standard {
        pipeline: Pipeline,
        wait: Wait,
    },
}

#[derive(Debug)]
struct Task {
    frames: Vec<Frame>,
    guards_movement: bool,
}

enum FrameStep {
    Blocked,
    Continue,
    Finished,
    Nested(Frame),
}

pub struct Player {
    state: Rc<RefCell<PlayState>>,
    host: ScriptHost,
    config: PlayerConfig,
    tasks: Vec<Task>,
    busy: bool,
}

impl Player {
    pub fn new(
        store: ProjectStore,
        dialogue: Box<dyn DialogueBox>,
        config: PlayerConfig,
    ) -> Result<Self> {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let state = Rc::new(RefCell::new(PlayState::new(store, dialogue, Box::new(rng))));
        let host = ScriptHost::new(state.clone())?;
        Ok(Player {
            state,
            host,
            config,
            tasks: Vec::new(),
            busy: false,
        })
    }

    /// Player backed by [`HeadlessDialogue`].
    pub fn headless(store: ProjectStore, config: PlayerConfig) -> Result<Self> {
        Self::new(store, Box::new(HeadlessDialogue::new()), config)
    }

    /// Finds the avatar, makes it topmost and runs its opening touch.
    pub fn start(&mut self) {
        self.begin();
        self.pump();
    }

    /// Throws away all play state, restores the backup and starts again.
    pub fn restart(&mut self) {
        self.reload();
        self.pump();
    }

    /// Steps the avatar by one cell and touches whatever it runs into.
    /// Returns `None` when the input was ignored.
    pub fn move_avatar(&mut self, dx: i32, dy: i32) -> Option<MoveResolution> {
        let (avatar, resolution, target) = {
            let state = self.state.borrow();
            if state.status != PlayerStatus::Ready || self.busy || !state.dialogue_is_empty() {
                return None;
            }
            let avatar = state.avatar?;
            let location = state.location_of(avatar)?;
            let room = state.project().room(location.room)?;
            let resolution = resolve_move(room, location.position, dx, dy);
            let target = touch_target(room, &resolution, avatar);
            (avatar, resolution, target)
        };

        {
            let mut state = self.state.borrow_mut();
            let [x, y] = resolution.target;
            if resolution.moved() {
                state.step_avatar(resolution.settled);
            } else if resolution.bounded {
                state.log_event(format!("move.bounded {x},{y}"));
            } else {
                state.log_event(format!("move.blocked {x},{y}"));
            }
        }
        debug!(target: "nook_engine", "avatar {avatar} step {dx},{dy} -> {:?}", resolution.settled);

        if let Some(target) = target {
            if self.spawn_task(target, true) {
                self.busy = true;
            }
        }
        self.pump();
        Some(resolution)
    }

    /// Touches an event from outside the movement path. Not guarded by the
    /// movement flag.
    pub fn touch_external(&mut self, id: EventId) -> bool {
        if self.status() != PlayerStatus::Ready {
            return false;
        }
        let spawned = self.spawn_task(id, false);
        self.pump();
        spawned
    }

    /// Advances clocks and dialogue pacing, resumes anything that became
    /// ready and emits a render signal.
    pub fn update(&mut self, dt: f64) {
        match self.status() {
            PlayerStatus::Uninitialized => {}
            PlayerStatus::Error => {
                let mut state = self.state.borrow_mut();
                state.update_dialogue(dt);
                state.emit_render();
            }
            PlayerStatus::Ready => {
                {
                    let mut state = self.state.borrow_mut();
                    state.advance_time(dt, self.config.frame_step);
                    state.update_dialogue(dt);
                }
                self.pump();
                self.state.borrow().emit_render();
            }
        }
    }

    /// Skips the current dialogue page and lets waiting touches continue.
    pub fn skip(&mut self) {
        self.state.borrow_mut().skip_dialogue();
        self.pump();
    }

    pub fn status(&self) -> PlayerStatus {
        self.state.borrow().status
    }

    pub fn avatar(&self) -> Option<EventId> {
        self.state.borrow().avatar
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn frame_count(&self) -> u64 {
        self.state.borrow().frame_count
    }

    pub fn elapsed(&self) -> f64 {
        self.state.borrow().clock
    }

    pub fn page_color(&self) -> Option<String> {
        self.state.borrow().page_color().map(str::to_string)
    }

    pub fn current_dialogue(&self) -> Option<DialogueRequest> {
        self.state.borrow().dialogue().current().cloned()
    }

    pub fn events(&self) -> Ref<'_, [String]> {
        Ref::map(self.state.borrow(), |state| state.events())
    }

    pub fn project(&self) -> Ref<'_, Project> {
        Ref::map(self.state.borrow(), |state| state.project())
    }

    pub fn backup(&self) -> Ref<'_, Project> {
        Ref::map(self.state.borrow(), |state| state.store().backup())
    }

    /// Touch chains that have not finished yet.
    pub fn pending_touches(&self) -> usize {
        self.tasks.len()
    }

    pub fn subscribe(&mut self, observer: Rc<dyn PlayerObserver>) -> SubscriptionId {
        self.state.borrow_mut().subscribe(observer)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.state.borrow_mut().unsubscribe(id)
    }

    fn begin(&mut self) {
        let avatar = {
            let mut state = self.state.borrow_mut();
            state.log_event("player.start");
            let avatar = events_tagged(state.project(), "is-player")
                .next()
                .map(|event| event.id);
            let Some(avatar) = avatar else {
                state.show_error(MISSING_AVATAR_MESSAGE, true);
                return;
            };
            if let Some(location) = state.location_of(avatar) {
                state.relocate(avatar, location);
            }
            state.avatar = Some(avatar);
            state.status = PlayerStatus::Ready;
            state.log_event(format!("player.ready {avatar}"));
            avatar
        };
        info!(target: "nook_engine", "player ready, avatar is event {avatar}");
        self.spawn_task(avatar, false);
    }

    fn reload(&mut self) {
        debug!(
            target: "nook_engine",
            "restarting with {} touches and {} scripts in flight",
            self.tasks.len(),
            self.host.running()
        );
        self.tasks.clear();
        self.busy = false;
        self.host.reset();
        self.state.borrow_mut().reset();
        self.begin();
    }

    fn take_restart_request(&mut self) -> bool {
        std::mem::take(&mut self.state.borrow_mut().restart_requested)
    }

    fn spawn_task(&mut self, id: EventId, guards_movement: bool) -> bool {
        match self.touch_frame(id) {
            Some(frame) => {
                self.tasks.push(Task {
                    frames: vec![frame],
                    guards_movement,
                });
                true
            }
            None => false,
        }
    }

    /// Chooses between the event's `touch` script and the standard pipeline.
    fn touch_frame(&mut self, id: EventId) -> Option<Frame> {
        let (event, source, touch) = {
            let state = self.state.borrow();
            let event = state.find_event(id)?.clone();
            let source = first_field(&event, "touch", Some(FieldKind::Script))
                .and_then(Field::as_str)
                .map(str::to_string);
            let touch = TouchBindings {
                avatar: state.avatar,
                palette: state.active_palette(),
            };
            (event, source, touch)
        };

        match source {
            Some(source) => {
                self.state
                    .borrow_mut()
                    .log_event(format!("touch.script {id}"));
                match self.host.spawn(id, &source, touch) {
                    Ok(handle) => Some(Frame::Script {
                        handle,
                        event: id,
                        wait: Wait::None,
                    }),
                    Err(err) => {
                        self.report_script_error(id, &err);
                        None
                    }
                }
            }
            None => {
                self.state
                    .borrow_mut()
                    .log_event(format!("touch.standard {id}"));
                Some(Frame::Standard {
                    pipeline: Pipeline::new(event),
                    wait: Wait::None,
                })
            }
        }
    }

    fn report_script_error(&mut self, event: EventId, err: &ScriptError) {
        debug!(target: "nook_engine", "touch script of event {event} failed: {err:?}");
        self.state.borrow_mut().show_error(&err.to_string(), false);
    }

    fn pump(&mut self) {
        loop {
            let mut progressed = false;
            let mut index = 0;
            while index < self.tasks.len() {
                let advanced = self.step_task(index);
                if self.take_restart_request() {
                    self.reload();
                    progressed = true;
                    break;
                }
                if self.tasks[index].frames.is_empty() {
                    let task = self.tasks.remove(index);
                    if task.guards_movement {
                        self.busy = false;
                    }
                    progressed = true;
                    continue;
                }
                progressed |= advanced;
                index += 1;
            }
            if !progressed {
                break;
            }
        }
    }

    fn step_task(&mut self, index: usize) -> bool {
        let Some(mut frame) = self.tasks[index].frames.pop() else {
            return false;
        };
        let depth = self.tasks[index].frames.len() + 1;
        match self.step_frame(&mut frame, depth) {
            FrameStep::Blocked => {
                self.tasks[index].frames.push(frame);
                false
            }
            FrameStep::Continue => {
                self.tasks[index].frames.push(frame);
                true
            }
            FrameStep::Finished => true,
            FrameStep::Nested(child) => {
                let frames = &mut self.tasks[index].frames;
                frames.push(frame);
                frames.push(child);
                true
            }
        }
    }

    fn is_blocked(&self, wait: Wait) -> bool {
        let state = self.state.borrow();
        match wait {
            Wait::None => false,
            Wait::Dialogue => !state.dialogue_is_empty(),
            Wait::Until(deadline) => state.clock < deadline,
        }
    }

    fn step_frame(&mut self, frame: &mut Frame, depth: usize) -> FrameStep {
        match frame {
            Frame::Script {
                handle,
                event,
                wait,
            } => {
                if self.is_blocked(*wait) {
                    return FrameStep::Blocked;
                }
                *wait = Wait::None;
                match self.host.resume(*handle) {
                    ScriptStep::Yielded(ScriptRequest::Dialogue) => {
                        *wait = Wait::Dialogue;
                        FrameStep::Continue
                    }
                    ScriptStep::Yielded(ScriptRequest::Delay(seconds)) => {
                        *wait = Wait::Until(self.state.borrow().clock + seconds);
                        FrameStep::Continue
                    }
                    ScriptStep::Yielded(ScriptRequest::Touch(Some(_))) if depth >= MAX_TOUCH_DEPTH => {
                        let err = ScriptError::Runtime(format!(
                            "TOUCH nested deeper than {MAX_TOUCH_DEPTH} touches"
                        ));
                        self.report_script_error(*event, &err);
                        self.host.cancel(*handle);
                        FrameStep::Finished
                    }
                    ScriptStep::Yielded(ScriptRequest::Touch(Some(id))) => {
                        match self.touch_frame(id) {
                            Some(child) => FrameStep::Nested(child),
                            None => FrameStep::Continue,
                        }
                    }
                    ScriptStep::Yielded(ScriptRequest::Touch(None)) => FrameStep::Continue,
                    ScriptStep::Completed => FrameStep::Finished,
                    ScriptStep::Failed(err) => {
                        self.report_script_error(*event, &err);
                        FrameStep::Finished
                    }
                }
            }
            Frame::Standard { pipeline, wait } => {
                if self.is_blocked(*wait) {
                    return FrameStep::Blocked;
                }
                *wait = Wait::None;
                let outcome = pipeline.advance(&mut self.state.borrow_mut());
                match outcome {
                    StepOutcome::Continue => FrameStep::Continue,
                    StepOutcome::AwaitDialogue => {
                        *wait = Wait::Dialogue;
                        FrameStep::Continue
                    }
                    StepOutcome::Finished => {
                        debug!(target: "nook_engine", "standard touch of event {} done", pipeline.event_id());
                        FrameStep::Finished
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::RecordingObserver;
    use nook_model::{Event, Palette, Room};

    fn project(events: Vec<Event>) -> Project {
        let mut project = Project::default();
        project.palettes.push(Palette::new("#101010", "#e0e0e0", "#ffcc00"));
        let mut room = Room::new(0);
        room.events = events;
        project.rooms.push(room);
        project
    }

    fn player(events: Vec<Event>) -> Player {
        let config = PlayerConfig {
            rng_seed: Some(3),
            ..PlayerConfig::default()
        };
        Player::headless(ProjectStore::new(project(events)), config).expect("player")
    }

    fn avatar_at(x: i32, y: i32) -> Event {
        Event::new(1, [x, y]).with_field(Field::tag("is-player"))
    }

    #[test]
    fn start_promotes_avatar_to_topmost() {
        let mut player = player(vec![avatar_at(2, 2), Event::new(2, [5, 5])]);
        player.start();
        assert_eq!(player.status(), PlayerStatus::Ready);
        assert_eq!(player.avatar(), Some(1));
        let ids: Vec<_> = player.project().rooms[0].events.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn missing_avatar_is_fatal() {
        let recorder = RecordingObserver::new();
        let mut player = player(vec![Event::new(2, [5, 5])]);
        player.subscribe(Rc::new(recorder.clone()));
        player.start();

        assert_eq!(player.status(), PlayerStatus::Error);
        assert_eq!(
            player.current_dialogue().map(|request| request.text),
            Some(MISSING_AVATAR_MESSAGE.to_string())
        );
        assert_eq!(recorder.errors(), vec![MISSING_AVATAR_MESSAGE]);
        assert!(player.move_avatar(1, 0).is_none());

        player.update(1.0);
        assert_eq!(player.frame_count(), 0);
    }

    #[test]
    fn update_before_start_does_nothing() {
        let recorder = RecordingObserver::new();
        let mut player = player(vec![avatar_at(0, 0)]);
        player.subscribe(Rc::new(recorder.clone()));
        player.update(1.0);
        assert_eq!(player.elapsed(), 0.0);
        assert!(recorder.signals().is_empty());
    }

    #[test]
    fn frame_counter_carries_remainder() {
        let mut player = player(vec![avatar_at(0, 0)]);
        player.start();
        player.update(0.3);
        assert_eq!(player.frame_count(), 0);
        player.update(0.3);
        assert_eq!(player.frame_count(), 1);
        player.update(1.0);
        assert_eq!(player.frame_count(), 3);
    }

    #[test]
    fn movement_is_ignored_while_dialogue_is_open() {
        let speaker = Event::new(2, [3, 2]).with_field(Field::dialogue("say", "hello"));
        let mut player = player(vec![avatar_at(2, 2), speaker]);
        player.start();

        let resolution = player.move_avatar(1, 0).expect("accepted");
        assert!(resolution.moved());
        assert_eq!(resolution.settled, [3, 2]);
        assert!(player.is_busy());
        assert!(player.move_avatar(0, 1).is_none());

        player.skip();
        assert!(!player.is_busy());
        assert_eq!(player.pending_touches(), 0);
        assert!(player.move_avatar(0, 1).is_some());
    }

    #[test]
    fn movement_is_ignored_while_a_touch_is_in_flight() {
        let sleeper = Event::new(2, [3, 2]).with_field(Field::script("touch", "DELAY(1)"));
        let mut player = player(vec![avatar_at(2, 2), sleeper]);
        player.start();

        assert!(player.move_avatar(1, 0).is_some());
        assert!(player.current_dialogue().is_none());
        assert!(player.is_busy());
        assert!(player.move_avatar(0, 1).is_none());

        player.update(0.5);
        assert!(player.is_busy());
        assert!(player.move_avatar(0, 1).is_none());

        player.update(0.6);
        assert!(!player.is_busy());
        assert_eq!(player.pending_touches(), 0);
        let resolution = player.move_avatar(0, 1).expect("accepted");
        assert_eq!(resolution.settled, [3, 3]);
    }

    #[test]
    fn runaway_touch_recursion_becomes_a_script_error() {
        let mirror = Event::new(2, [3, 2]).with_field(Field::script(
            "touch",
            "TOUCH(EVENT) LOG('unwound')",
        ));
        let mut player = player(vec![avatar_at(2, 2), mirror]);
        player.start();

        assert!(player.move_avatar(1, 0).is_some());
        assert_eq!(player.status(), PlayerStatus::Ready);
        assert_eq!(player.pending_touches(), 0);
        assert!(!player.is_busy());
        let request = player.current_dialogue().expect("error page");
        assert!(request.text.contains("TOUCH nested deeper"), "{}", request.text);

        let unwound = player
            .events()
            .iter()
            .filter(|line| *line == "script.log unwound")
            .count();
        assert_eq!(unwound, MAX_TOUCH_DEPTH - 1);

        player.skip();
        assert!(player.move_avatar(0, 1).is_some());
    }

    #[test]
    fn script_delay_waits_on_player_clock() {
        let waiter = Event::new(2, [3, 2])
            .with_field(Field::script("touch", "DELAY(1) SAY('late')"));
        let mut player = player(vec![avatar_at(2, 2), waiter]);
        player.start();
        player.touch_external(2);
        assert!(player.current_dialogue().is_none());

        player.update(0.5);
        assert!(player.current_dialogue().is_none());
        player.update(0.6);
        assert_eq!(
            player.current_dialogue().map(|request| request.text),
            Some("late".to_string())
        );
    }

    #[test]
    fn nested_touch_finishes_before_caller_resumes() {
        let caller = Event::new(2, [3, 2]).with_field(Field::script(
            "touch",
            "LOG('before') TOUCH(3) LOG('after')",
        ));
        let callee = Event::new(3, [9, 9]).with_field(Field::dialogue("say", "inner"));
        let mut player = player(vec![avatar_at(2, 2), caller, callee]);
        player.start();
        player.touch_external(2);

        let logged = |player: &Player| -> Vec<String> {
            player
                .events()
                .iter()
                .filter(|line| line.starts_with("script.log"))
                .cloned()
                .collect()
        };
        assert_eq!(logged(&player), vec!["script.log before"]);
        assert_eq!(
            player.current_dialogue().map(|request| request.text),
            Some("inner".to_string())
        );

        player.skip();
        assert_eq!(logged(&player), vec!["script.log before", "script.log after"]);
        assert_eq!(player.pending_touches(), 0);
    }

    #[test]
    fn script_restart_takes_effect_on_yield() {
        let resetter = Event::new(2, [9, 9]).with_field(Field::script(
            "touch",
            "REMOVE(EVENT) PLAYER.restart() LOG('still running')",
        ));
        let mut player = player(vec![avatar_at(2, 2), resetter]);
        player.start();
        player.touch_external(2);

        assert!(player.project().rooms[0].events.iter().any(|e| e.id == 2));
        assert!(player.events().iter().any(|line| line == "player.restart"));
        assert!(player.events().iter().any(|line| line == "script.log still running"));
        assert_eq!(player.status(), PlayerStatus::Ready);
    }
}
