//! Solidity and the single-step movement rule.

use crate::fields::is_tagged;
use crate::locate::events_at;
use crate::project::{EventId, Position, Room, ROOM_SIZE};

pub fn in_bounds(x: i32, y: i32) -> bool {
    (0..ROOM_SIZE).contains(&x) && (0..ROOM_SIZE).contains(&y)
}

/// A cell is solid when its wall value is set or any event on it is tagged
/// `solid`.
pub fn cell_is_solid(room: &Room, x: i32, y: i32) -> bool {
    room.wall(x, y) > 0 || events_at(room, [x, y]).any(|event| is_tagged(event, "solid"))
}

/// Outcome of a single-cell step. `bounded` and `blocked` are exclusive: a
/// step leaving the grid is never classified as blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveResolution {
    pub target: Position,
    pub settled: Position,
    pub bounded: bool,
    pub blocked: bool,
}

impl MoveResolution {
    pub fn moved(&self) -> bool {
        !self.bounded && !self.blocked
    }
}

pub fn resolve_move(room: &Room, from: Position, dx: i32, dy: i32) -> MoveResolution {
    let target = [from[0] + dx, from[1] + dy];
    let bounded = !in_bounds(target[0], target[1]);
    let blocked = !bounded && cell_is_solid(room, target[0], target[1]);
    let settled = if !bounded && !blocked { target } else { from };
    MoveResolution {
        target,
        settled,
        bounded,
        blocked,
    }
}

/// Picks the event a step interacts with: something other than the avatar
/// on the target cell wins, otherwise something sharing the avatar's settled
/// cell. At most one event is chosen, first in paint order.
pub fn touch_target(room: &Room, resolution: &MoveResolution, avatar: EventId) -> Option<EventId> {
    let at_target = if resolution.bounded {
        None
    } else {
        events_at(room, resolution.target).find(|event| event.id != avatar)
    };
    at_target
        .or_else(|| events_at(room, resolution.settled).find(|event| event.id != avatar))
        .map(|event| event.id)
}
