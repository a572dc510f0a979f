//! Project data shared by the nook runtime and its tooling.
//!
//! A project is an ordered list of 16×16 rooms. Rooms own their events and
//! events carry an ordered list of typed fields; every gameplay convention
//! (solidity, dialogue, exits, scripts) is expressed through those fields.

pub mod collision;
pub mod fields;
pub mod locate;
pub mod project;

pub use collision::{cell_is_solid, in_bounds, resolve_move, touch_target, MoveResolution};
pub use fields::{fields_by_key, first_field, is_tagged, replace_fields};
pub use locate::{
    discard, event_at_location, events_at, events_tagged, find_event, find_event_mut,
    location_of_event, relocate,
};
pub use project::{
    Event, EventId, Field, FieldKind, Grid, Location, Palette, Position, Project, Room, Tile,
    ROOM_SIZE,
};
