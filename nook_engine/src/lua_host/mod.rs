//! Sandboxed touch scripts.
//!
//! Every script runs as its own coroutine with an environment that holds only
//! the language core, the capability table and the per-touch `EVENT`,
//! `AVATAR`, `PALETTE` and `PLAYER` bindings. Suspending capabilities yield a request back to the
//! host; the player decides when to resume.

mod bindings;
mod scripts;

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{Context, Result};
use log::debug;
use mlua::{
    Error as LuaError, Lua, LuaOptions, MultiValue, RegistryKey, StdLib, Table, Thread,
    ThreadStatus, Value,
};
use nook_model::{EventId, Palette};
use thiserror::Error;

use crate::state::PlayState;
use scripts::ScriptRuntime;

pub use bindings::EventHandle;
use bindings::{describe_value, event_id_from_value};

/// What a suspended script is waiting on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScriptRequest {
    Dialogue,
    /// Seconds of play time, measured on the clock that `Player::update`
    /// advances rather than on the wall clock. A player that is not updated
    /// never wakes the script.
    Delay(f64),
    /// Nested touch. `None` when the script passed something that is not an
    /// event; the host resumes it straight away.
    Touch(Option<EventId>),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    #[error("script failed to compile: {0}")]
    Compile(String),
    #[error("{0}")]
    Runtime(String),
    #[error("script yielded an unknown request: {0}")]
    UnknownRequest(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    Yielded(ScriptRequest),
    Completed,
    Failed(ScriptError),
}

/// Per-touch bindings that vary with the moment the script starts.
#[derive(Debug, Clone, Default)]
pub struct TouchBindings {
    pub avatar: Option<EventId>,
    pub palette: Option<Palette>,
}

pub(crate) struct ScriptHost {
    lua: Lua,
    state: Rc<RefCell<PlayState>>,
    capabilities: RegistryKey,
    runtime: ScriptRuntime,
}

impl ScriptHost {
    pub(crate) fn new(state: Rc<RefCell<PlayState>>) -> Result<Self> {
        let lua = Lua::new_with(StdLib::ALL_SAFE, LuaOptions::default())
            .context("creating Lua state for touch scripts")?;
        let capabilities = {
            let table = bindings::install_capabilities(&lua, state.clone())
                .context("installing script capabilities")?;
            lua.create_registry_value(table)?
        };
        Ok(ScriptHost {
            lua,
            state,
            capabilities,
            runtime: ScriptRuntime::new(),
        })
    }

    /// Compiles `source` for `event` and parks it as a fresh coroutine.
    pub(crate) fn spawn(
        &mut self,
        event: EventId,
        source: &str,
        touch: TouchBindings,
    ) -> Result<u32, ScriptError> {
        let label = format!("event {event} touch");
        let thread = {
            let lua = &self.lua;
            let env = script_environment(lua, &self.capabilities, event, &touch)
                .map_err(runtime_error)?;
            let function = lua
                .load(source)
                .set_name(label.as_str())
                .set_environment(env)
                .into_function()
                .map_err(|err| ScriptError::Compile(describe_error(&err)))?;
            let thread = lua.create_thread(function).map_err(runtime_error)?;
            lua.create_registry_value(thread).map_err(runtime_error)?
        };

        let (handle, message) = self.runtime.start_script(label, event);
        self.runtime.attach_thread(handle, thread);
        self.state.borrow_mut().log_event(message);
        Ok(handle)
    }

    /// Runs the script until it yields, ends or fails. Finished scripts are
    /// forgotten; resuming an unknown handle reports completion.
    pub(crate) fn resume(&mut self, handle: u32) -> ScriptStep {
        let step = {
            let Some(key) = self.runtime.thread_key(handle) else {
                return ScriptStep::Completed;
            };
            match self.lua.registry_value::<Thread>(key) {
                Ok(thread) => resume_thread(&thread),
                Err(err) => ScriptStep::Failed(runtime_error(err)),
            }
        };

        match &step {
            ScriptStep::Yielded(_) => self.runtime.increment_yield(handle),
            ScriptStep::Completed => self.finish(handle, true),
            ScriptStep::Failed(_) => self.finish(handle, false),
        }
        step
    }

    /// Drops a suspended script without resuming it again.
    pub(crate) fn cancel(&mut self, handle: u32) {
        self.finish(handle, false);
    }

    pub(crate) fn running(&self) -> usize {
        self.runtime.len()
    }

    /// Drops every live coroutine.
    pub(crate) fn reset(&mut self) {
        for key in self.runtime.drain() {
            let _ = self.lua.remove_registry_value(key);
        }
        self.lua.expire_registry_values();
    }

    fn finish(&mut self, handle: u32, completed: bool) {
        if !completed {
            if let (Some(event), Some(yields)) =
                (self.runtime.event(handle), self.runtime.yield_count(handle))
            {
                debug!(
                    target: "nook_engine::script",
                    "script #{handle} of event {event} failed after {yields} yields"
                );
            }
        }
        let (key, message) = self.runtime.complete_script(handle);
        if let Some(key) = key {
            let _ = self.lua.remove_registry_value(key);
        }
        if let (true, Some(message)) = (completed, message) {
            self.state.borrow_mut().log_event(message);
        }
    }
}

/// Language builtins visible to scripts. Everything that reaches outside the
/// sandbox (`print`, `io`, `os`, `require`, `load*`, `coroutine`, `debug`)
/// stays out.
const LANGUAGE_CORE: &[&str] = &[
    "assert", "error", "ipairs", "next", "pairs", "select", "tonumber", "tostring", "type",
    "unpack",
];

/// Library tables copied per script so one script cannot patch another's.
const LANGUAGE_LIBRARIES: &[&str] = &["math", "string", "table"];

fn script_environment<'lua>(
    lua: &'lua Lua,
    capabilities: &RegistryKey,
    event: EventId,
    touch: &TouchBindings,
) -> mlua::Result<Table<'lua>> {
    let globals = lua.globals();
    let env = lua.create_table()?;
    for name in LANGUAGE_CORE {
        env.set(*name, globals.get::<_, Value>(*name)?)?;
    }
    for name in LANGUAGE_LIBRARIES {
        let library: Table = globals.get(*name)?;
        let copy = lua.create_table()?;
        for pair in library.pairs::<Value, Value>() {
            let (key, value) = pair?;
            copy.set(key, value)?;
        }
        env.set(*name, copy)?;
    }

    let capabilities: Table = lua.registry_value(capabilities)?;
    for pair in capabilities.pairs::<Value, Value>() {
        let (name, value) = pair?;
        env.set(name, value)?;
    }
    env.set("EVENT", EventHandle(event))?;
    env.set("AVATAR", touch.avatar.map(EventHandle))?;
    if let Some(palette) = &touch.palette {
        env.set("PALETTE", bindings::palette_table(lua, palette)?)?;
    }
    Ok(env)
}

fn resume_thread(thread: &Thread) -> ScriptStep {
    if !matches!(thread.status(), ThreadStatus::Resumable) {
        return ScriptStep::Completed;
    }
    match thread.resume::<_, MultiValue>(MultiValue::new()) {
        Ok(values) => match thread.status() {
            ThreadStatus::Resumable => match parse_request(values) {
                Ok(request) => ScriptStep::Yielded(request),
                Err(err) => ScriptStep::Failed(err),
            },
            ThreadStatus::Unresumable | ThreadStatus::Error => ScriptStep::Completed,
        },
        Err(LuaError::CoroutineInactive) => ScriptStep::Completed,
        Err(err) => ScriptStep::Failed(ScriptError::Runtime(describe_error(&err))),
    }
}

fn parse_request(values: MultiValue) -> Result<ScriptRequest, ScriptError> {
    let mut values = values.into_iter();
    let kind = values.next().unwrap_or(Value::Nil);
    let argument = values.next().unwrap_or(Value::Nil);
    let name = match &kind {
        Value::String(text) => text.to_str().unwrap_or_default().to_string(),
        other => return Err(ScriptError::UnknownRequest(describe_value(other))),
    };
    match name.as_str() {
        "dialogue" => Ok(ScriptRequest::Dialogue),
        "delay" => {
            let seconds = match argument {
                Value::Integer(seconds) => seconds as f64,
                Value::Number(seconds) => seconds,
                _ => 0.0,
            };
            Ok(ScriptRequest::Delay(seconds.max(0.0)))
        }
        "touch" => Ok(ScriptRequest::Touch(event_id_from_value(&argument))),
        _ => Err(ScriptError::UnknownRequest(name)),
    }
}

fn runtime_error(err: LuaError) -> ScriptError {
    ScriptError::Runtime(describe_error(&err))
}

/// Innermost message of a Lua error, without callback wrapping.
pub fn describe_error(err: &LuaError) -> String {
    match err {
        LuaError::CallbackError { cause, .. } => describe_error(cause),
        LuaError::RuntimeError(message) => message.clone(),
        LuaError::SyntaxError { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::HeadlessDialogue;
    use crate::store::ProjectStore;
    use nook_model::{find_event, first_field, Event, Field, FieldKind, Project, Room};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn host_with(events: Vec<Event>) -> (ScriptHost, Rc<RefCell<PlayState>>) {
        let mut project = Project::default();
        project.palettes.push(Palette::new("#000000", "#ffffff", "#ff0000"));
        let mut room = Room::new(0);
        room.events = events;
        project.rooms.push(room);
        project.rooms.push(Room::new(1));
        let state = Rc::new(RefCell::new(PlayState::new(
            ProjectStore::new(project),
            Box::new(HeadlessDialogue::new()),
            Box::new(StdRng::seed_from_u64(1)),
        )));
        let host = ScriptHost::new(state.clone()).expect("script host");
        (host, state)
    }

    fn run(host: &mut ScriptHost, event: EventId, source: &str) -> Vec<ScriptStep> {
        let handle = host
            .spawn(event, source, TouchBindings::default())
            .expect("spawn");
        let mut steps = Vec::new();
        loop {
            let step = host.resume(handle);
            let done = !matches!(step, ScriptStep::Yielded(_));
            steps.push(step);
            if done {
                return steps;
            }
        }
    }

    #[test]
    fn suspending_capabilities_yield_requests() {
        let (mut host, _) = host_with(vec![Event::new(1, [0, 0]), Event::new(2, [1, 0])]);
        let steps = run(&mut host, 1, "DIALOGUE() DELAY(1.5) TOUCH(2) DIALOG()");
        assert_eq!(
            steps,
            vec![
                ScriptStep::Yielded(ScriptRequest::Dialogue),
                ScriptStep::Yielded(ScriptRequest::Delay(1.5)),
                ScriptStep::Yielded(ScriptRequest::Touch(Some(2))),
                ScriptStep::Yielded(ScriptRequest::Dialogue),
                ScriptStep::Completed,
            ]
        );
        assert_eq!(host.running(), 0);
    }

    #[test]
    fn environment_hides_standard_library() {
        let (mut host, _) = host_with(vec![Event::new(1, [0, 0])]);
        let steps = run(&mut host, 1, "print('hi')");
        assert!(matches!(steps.as_slice(), [ScriptStep::Failed(ScriptError::Runtime(_))]));

        let steps = run(
            &mut host,
            1,
            r#"
            if _G ~= nil or rawget ~= nil or getfenv ~= nil or setfenv ~= nil then error("leak") end
            if os ~= nil or io ~= nil or coroutine ~= nil or debug ~= nil then error("leak") end
            if require ~= nil or load ~= nil or loadstring ~= nil or dofile ~= nil then
                error("leak")
            end
            "#,
        );
        assert_eq!(steps, vec![ScriptStep::Completed]);
    }

    #[test]
    fn environment_keeps_the_language_core() {
        let (mut host, state) = host_with(vec![Event::new(1, [0, 0])]);
        let steps = run(
            &mut host,
            1,
            r##"
            assert(type(EVENT) == "userdata")
            local parts = {}
            for _, word in ipairs({"b", "a"}) do table.insert(parts, string.upper(word)) end
            table.sort(parts)
            LOG(table.concat(parts, ","), math.max(2, tonumber("7")), select("#", 1, 2))
            string.upper = nil
            "##,
        );
        assert_eq!(steps, vec![ScriptStep::Completed]);
        assert!(state.borrow().events().iter().any(|line| line == "script.log A,B 7 2"));

        let steps = run(&mut host, 1, "LOG(string.upper('still here'))");
        assert_eq!(steps, vec![ScriptStep::Completed]);
        assert!(state
            .borrow()
            .events()
            .iter()
            .any(|line| line == "script.log STILL HERE"));
    }

    #[test]
    fn compile_errors_are_reported_at_spawn() {
        let (mut host, state) = host_with(vec![Event::new(1, [0, 0])]);
        let err = host
            .spawn(1, "this is not lua", TouchBindings::default())
            .expect_err("syntax error");
        assert!(matches!(err, ScriptError::Compile(_)));
        assert!(state.borrow().events().is_empty());
    }

    #[test]
    fn runtime_errors_carry_the_message() {
        let (mut host, _) = host_with(vec![Event::new(1, [0, 0])]);
        let steps = run(&mut host, 1, "error('x marks the spot')");
        match steps.as_slice() {
            [ScriptStep::Failed(ScriptError::Runtime(message))] => {
                assert!(message.contains("x marks the spot"), "{message}")
            }
            other => panic!("unexpected steps {other:?}"),
        }
    }

    #[test]
    fn field_capabilities_read_and_replace() {
        let event = Event::new(1, [0, 0])
            .with_field(Field::dialogue("say", "old"))
            .with_field(Field::text("mood", "calm"));
        let (mut host, state) = host_with(vec![event]);
        let steps = run(
            &mut host,
            1,
            r#"
            SET_FIELDS(EVENT, "say", "dialogue", "new one", "new two")
            if #FIELDS(EVENT, "say") ~= 2 then error("count") end
            SET_FIELDS(EVENT.id, "mood", "text", FIELD(EVENT, "mood") .. " again")
            "#,
        );
        assert_eq!(steps, vec![ScriptStep::Completed]);

        let state = state.borrow();
        let event = find_event(state.project(), 1).expect("event");
        let says: Vec<_> = nook_model::fields_by_key(event, "say", None)
            .filter_map(Field::as_str)
            .collect();
        assert_eq!(says, vec!["new one", "new two"]);
        let mood = first_field(event, "mood", Some(FieldKind::Text)).and_then(Field::as_str);
        assert_eq!(mood, Some("calm again"));
    }

    #[test]
    fn field_reads_with_an_unknown_type_find_nothing() {
        let event = Event::new(1, [0, 0]).with_field(Field::dialogue("say", "hello"));
        let (mut host, state) = host_with(vec![event]);
        let steps = run(
            &mut host,
            1,
            r#"
            LOG("typed", FIELD(EVENT, "say", "dialogue"), #FIELDS(EVENT, "say", "dialogue"))
            LOG("unknown", FIELD(EVENT, "say", "bogus"), #FIELDS(EVENT, "say", "bogus"))
            "#,
        );
        assert_eq!(steps, vec![ScriptStep::Completed]);
        let state = state.borrow();
        let logged: Vec<_> = state
            .events()
            .iter()
            .filter(|line| line.starts_with("script.log"))
            .cloned()
            .collect();
        assert_eq!(
            logged,
            vec!["script.log typed hello 1", "script.log unknown nil 0"]
        );
    }

    #[test]
    fn locator_capabilities_move_and_find_events() {
        let (mut host, state) = host_with(vec![Event::new(1, [0, 0]), Event::new(2, [4, 4])]);
        let steps = run(
            &mut host,
            1,
            r#"
            local here = LOCATION_OF(2)
            if EVENT_AT(here) ~= EVENT_AT({room = 0, position = {4, 4}}) then error("lookup") end
            MOVE(EVENT, {room = 1, position = {2, 3}})
            LOG("moved", EVENT, LOCATION_OF(EVENT).room)
            "#,
        );
        assert_eq!(steps, vec![ScriptStep::Completed]);
        let state = state.borrow();
        assert_eq!(
            state.location_of(1),
            Some(nook_model::Location::new(1, [2, 3]))
        );
        assert!(state
            .events()
            .iter()
            .any(|line| line == "script.log moved event#1 1"));
    }

    #[test]
    fn reset_forgets_parked_scripts() {
        let (mut host, _) = host_with(vec![Event::new(1, [0, 0])]);
        let handle = host
            .spawn(1, "DIALOGUE()", TouchBindings::default())
            .expect("spawn");
        assert_eq!(
            host.resume(handle),
            ScriptStep::Yielded(ScriptRequest::Dialogue)
        );
        host.reset();
        assert_eq!(host.running(), 0);
        assert_eq!(host.resume(handle), ScriptStep::Completed);
    }
}
