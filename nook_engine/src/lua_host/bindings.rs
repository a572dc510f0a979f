use std::cell::RefCell;
use std::rc::Rc;

use log::info;
use mlua::{
    Error as LuaError, Function, Lua, LuaSerdeExt, MetaMethod, Result as LuaResult, Table,
    UserData, UserDataFields, UserDataMethods, Value, Variadic,
};
use nook_model::{
    event_at_location, fields_by_key, first_field, in_bounds, EventId, Field, FieldKind, Location,
    Palette,
};

use crate::dialogue::DialogueOptions;
use crate::state::PlayState;

/// Opaque event reference handed to scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHandle(pub EventId);

impl UserData for EventHandle {
    fn add_fields<'lua, F: UserDataFields<'lua, Self>>(fields: &mut F) {
        fields.add_field_method_get("id", |_, this| Ok(this.0));
    }

    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Eq, |_, this, other: Value| {
            Ok(event_id_from_value(&other) == Some(this.0))
        });
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(format!("event#{}", this.0))
        });
    }
}

// Suspending capabilities are plain Lua closures over `coroutine.yield`; the
// host reads the yielded values back as requests.
const PRELUDE: &str = r#"
local yield = coroutine.yield
local function dialogue()
    return yield("dialogue")
end
return {
    DIALOGUE = dialogue,
    DIALOG = dialogue,
    DELAY = function(seconds) return yield("delay", seconds) end,
    TOUCH = function(event) return yield("touch", event) end,
}
"#;

/// Builds the table of capabilities copied into every script environment.
pub(super) fn install_capabilities<'lua>(
    lua: &'lua Lua,
    state: Rc<RefCell<PlayState>>,
) -> LuaResult<Table<'lua>> {
    let capabilities = lua.create_table()?;

    install_prelude(lua, &capabilities)?;
    install_field_functions(lua, &capabilities, state.clone())?;
    install_locator_functions(lua, &capabilities, state.clone())?;
    install_dialogue_functions(lua, &capabilities, state.clone())?;
    install_logging_function(lua, &capabilities, state.clone())?;
    capabilities.set("PLAYER", player_table(lua, state)?)?;

    Ok(capabilities)
}

fn install_prelude<'lua>(lua: &'lua Lua, capabilities: &Table<'lua>) -> LuaResult<()> {
    let prelude: Table = lua.load(PRELUDE).set_name("prelude").call(())?;
    for pair in prelude.pairs::<Value, Value>() {
        let (name, function) = pair?;
        capabilities.set(name, function)?;
    }
    Ok(())
}

fn install_field_functions<'lua>(
    lua: &'lua Lua,
    capabilities: &Table<'lua>,
    state: Rc<RefCell<PlayState>>,
) -> LuaResult<()> {
    let set_state = state.clone();
    capabilities.set(
        "SET_FIELDS",
        lua.create_function(
            move |lua_ctx, (event, key, kind, values): (Value, String, Option<String>, Variadic<Value>)| {
                let id = require_event(&event, "SET_FIELDS")?;
                let kind = match kind {
                    Some(name) => FieldKind::parse(&name).ok_or_else(|| {
                        LuaError::RuntimeError(format!("SET_FIELDS: unknown field type '{name}'"))
                    })?,
                    None => FieldKind::Json,
                };
                let fields = values
                    .into_iter()
                    .map(|value| field_data(lua_ctx, kind, value).map(|data| Field::new(&key, kind, data)))
                    .collect::<LuaResult<Vec<_>>>()?;
                Ok(set_state
                    .borrow_mut()
                    .replace_fields(id, &key, Some(kind), fields))
            },
        )?,
    )?;

    let field_state = state.clone();
    capabilities.set(
        "FIELD",
        lua.create_function(
            move |lua_ctx, (event, key, kind): (Value, String, Option<String>)| {
                let data = kind_filter(kind.as_deref()).and_then(|kind| {
                    let state = field_state.borrow();
                    event_id_from_value(&event)
                        .and_then(|id| state.find_event(id))
                        .and_then(|event| first_field(event, &key, kind))
                        .map(|field| field.data.clone())
                });
                match data {
                    Some(data) => lua_ctx.to_value(&data),
                    None => Ok(Value::Nil),
                }
            },
        )?,
    )?;

    let fields_state = state;
    capabilities.set(
        "FIELDS",
        lua.create_function(
            move |lua_ctx, (event, key, kind): (Value, String, Option<String>)| {
                let data: Vec<serde_json::Value> = match kind_filter(kind.as_deref()) {
                    Some(kind) => {
                        let state = fields_state.borrow();
                        event_id_from_value(&event)
                            .and_then(|id| state.find_event(id))
                            .map(|event| {
                                fields_by_key(event, &key, kind)
                                    .map(|field| field.data.clone())
                                    .collect()
                            })
                            .unwrap_or_default()
                    }
                    None => Vec::new(),
                };
                let list = lua_ctx.create_table()?;
                for (index, value) in data.iter().enumerate() {
                    list.set(index + 1, lua_ctx.to_value(value)?)?;
                }
                Ok(list)
            },
        )?,
    )?;

    Ok(())
}

fn install_locator_functions<'lua>(
    lua: &'lua Lua,
    capabilities: &Table<'lua>,
    state: Rc<RefCell<PlayState>>,
) -> LuaResult<()> {
    let move_state = state.clone();
    capabilities.set(
        "MOVE",
        lua.create_function(move |_, (event, location): (Value, Value)| {
            let id = require_event(&event, "MOVE")?;
            let location = location_from_value(&location)?;
            let mut state = move_state.borrow_mut();
            if state.project().room(location.room).is_none() {
                return Err(LuaError::RuntimeError(format!(
                    "MOVE: no room {}",
                    location.room
                )));
            }
            Ok(state.relocate(id, location))
        })?,
    )?;

    let remove_state = state.clone();
    capabilities.set(
        "REMOVE",
        lua.create_function(move |_, event: Value| {
            let id = require_event(&event, "REMOVE")?;
            Ok(remove_state.borrow_mut().discard(id))
        })?,
    )?;

    let at_state = state.clone();
    capabilities.set(
        "EVENT_AT",
        lua.create_function(move |_, location: Value| {
            let location = location_from_value(&location)?;
            let state = at_state.borrow();
            Ok(event_at_location(state.project(), &location).map(|event| EventHandle(event.id)))
        })?,
    )?;

    let location_state = state;
    capabilities.set(
        "LOCATION_OF",
        lua.create_function(move |lua_ctx, event: Value| {
            let location = event_id_from_value(&event)
                .and_then(|id| location_state.borrow().location_of(id));
            match location {
                Some(location) => Ok(Value::Table(location_to_table(lua_ctx, location)?)),
                None => Ok(Value::Nil),
            }
        })?,
    )?;

    Ok(())
}

fn install_dialogue_functions<'lua>(
    lua: &'lua Lua,
    capabilities: &Table<'lua>,
    state: Rc<RefCell<PlayState>>,
) -> LuaResult<()> {
    let say_state = state.clone();
    capabilities.set(
        "SAY",
        lua.create_function(move |lua_ctx, (text, options): (Value, Value)| {
            let options = dialogue_options(lua_ctx, options)?;
            say_state.borrow_mut().say(&describe_value(&text), options);
            Ok(())
        })?,
    )?;

    let title_state = state;
    capabilities.set(
        "TITLE",
        lua.create_function(move |lua_ctx, (text, options): (Value, Value)| {
            let options = dialogue_options(lua_ctx, options)?;
            title_state
                .borrow_mut()
                .title(&describe_value(&text), options);
            Ok(())
        })?,
    )?;

    Ok(())
}

fn install_logging_function<'lua>(
    lua: &'lua Lua,
    capabilities: &Table<'lua>,
    state: Rc<RefCell<PlayState>>,
) -> LuaResult<()> {
    capabilities.set(
        "LOG",
        lua.create_function(move |_, args: Variadic<Value>| {
            let line = args
                .iter()
                .map(describe_value)
                .collect::<Vec<_>>()
                .join(" ");
            info!(target: "nook_engine::script", "{line}");
            state.borrow_mut().log_event(format!("script.log {line}"));
            Ok(())
        })?,
    )?;
    Ok(())
}

fn player_table<'lua>(lua: &'lua Lua, state: Rc<RefCell<PlayState>>) -> LuaResult<Table<'lua>> {
    let player = lua.create_table()?;

    let frame_state = state.clone();
    player.set(
        "frame",
        lua.create_function(move |_, ()| Ok(frame_state.borrow().frame_count))?,
    )?;

    let time_state = state.clone();
    player.set(
        "time",
        lua.create_function(move |_, ()| Ok(time_state.borrow().clock))?,
    )?;

    let restart_state = state.clone();
    player.set(
        "restart",
        lua.create_function(move |_, ()| {
            restart_state.borrow_mut().restart_requested = true;
            Ok(())
        })?,
    )?;

    let avatar_state = state.clone();
    player.set(
        "avatar",
        lua.create_function(move |_, ()| Ok(avatar_state.borrow().avatar.map(EventHandle)))?,
    )?;

    let skip_state = state;
    player.set(
        "skip",
        lua.create_function(move |_, ()| {
            skip_state.borrow_mut().skip_dialogue();
            Ok(())
        })?,
    )?;

    Ok(player)
}

/// Palette exposed as `{bg, fg, hl}` plus named fields.
pub(super) fn palette_table<'lua>(lua: &'lua Lua, palette: &Palette) -> LuaResult<Table<'lua>> {
    let table = lua.create_table()?;
    for (index, color) in palette.colors.iter().enumerate() {
        table.set(index + 1, color.as_str())?;
    }
    table.set("background", palette.background())?;
    table.set("foreground", palette.foreground())?;
    table.set("highlight", palette.highlight())?;
    Ok(table)
}

pub(crate) fn event_id_from_value(value: &Value) -> Option<EventId> {
    match value {
        Value::UserData(data) => data.borrow::<EventHandle>().ok().map(|handle| handle.0),
        Value::Integer(id) => EventId::try_from(*id).ok(),
        Value::Number(id) if id.fract() == 0.0 && *id >= 0.0 => EventId::try_from(*id as i64).ok(),
        Value::Table(table) => table
            .get::<_, Value>("id")
            .ok()
            .and_then(|id| event_id_from_value(&id)),
        _ => None,
    }
}

fn require_event(value: &Value, function: &str) -> LuaResult<EventId> {
    event_id_from_value(value).ok_or_else(|| {
        LuaError::RuntimeError(format!(
            "{function}: expected an event, got {}",
            describe_value(value)
        ))
    })
}

pub(super) fn location_from_value(value: &Value) -> LuaResult<Location> {
    let Value::Table(table) = value else {
        return Err(LuaError::RuntimeError(format!(
            "expected a location table, got {}",
            describe_value(value)
        )));
    };
    let room: i64 = table.get("room")?;
    let position: Table = table.get("position")?;
    let x: i32 = position.get(1)?;
    let y: i32 = position.get(2)?;
    let room = usize::try_from(room)
        .map_err(|_| LuaError::RuntimeError(format!("invalid room index {room}")))?;
    if !in_bounds(x, y) {
        return Err(LuaError::RuntimeError(format!(
            "position {x},{y} is outside the room"
        )));
    }
    Ok(Location::new(room, [x, y]))
}

pub(super) fn location_to_table(lua: &Lua, location: Location) -> LuaResult<Table<'_>> {
    let table = lua.create_table()?;
    table.set("room", location.room)?;
    let position = lua.create_table()?;
    position.set(1, location.position[0])?;
    position.set(2, location.position[1])?;
    table.set("position", position)?;
    Ok(table)
}

fn field_data<'lua>(
    lua: &'lua Lua,
    kind: FieldKind,
    value: Value<'lua>,
) -> LuaResult<serde_json::Value> {
    match kind {
        FieldKind::Location => {
            let location = location_from_value(&value)?;
            serde_json::to_value(location).map_err(LuaError::external)
        }
        FieldKind::Tag if value.is_nil() => Ok(serde_json::Value::Bool(true)),
        FieldKind::Tile => match value {
            Value::Integer(tile) => Ok(serde_json::Value::from(tile as i64)),
            Value::Number(tile) if tile.fract() == 0.0 => Ok(serde_json::Value::from(tile as i64)),
            other => lua.from_value(other),
        },
        _ => lua.from_value(value),
    }
}

/// Type filter for field reads. The outer `None` is a type name no field can
/// carry, which matches nothing.
fn kind_filter(kind: Option<&str>) -> Option<Option<FieldKind>> {
    match kind {
        Some(name) => FieldKind::parse(name).map(Some),
        None => Some(None),
    }
}

fn dialogue_options<'lua>(lua: &'lua Lua, value: Value<'lua>) -> LuaResult<DialogueOptions> {
    match value {
        Value::Nil => Ok(DialogueOptions::default()),
        other => lua.from_value(other),
    }
}

pub(crate) fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => text.to_str().ok().map(|s| s.to_string()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Boolean(b) => Some(b.to_string()),
        Value::Nil => Some("nil".to_string()),
        _ => None,
    }
}

pub(crate) fn describe_value(value: &Value) -> String {
    if let Some(text) = value_to_string(value) {
        return text;
    }
    match value {
        Value::UserData(data) => match data.borrow::<EventHandle>() {
            Ok(handle) => format!("event#{}", handle.0),
            Err(_) => "<userdata>".to_string(),
        },
        Value::Function(function) => describe_function(function),
        _ => format!("<{}>", value.type_name()),
    }
}

fn describe_function(function: &Function) -> String {
    let info = function.info();
    match info.name {
        Some(name) => format!("<function {name}>"),
        None => "<function>".to_string(),
    }
}
