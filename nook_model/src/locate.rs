//! Event lookup and ownership transfer between rooms.

use crate::fields::is_tagged;
use crate::project::{Event, EventId, Location, Position, Project, Room};

pub fn find_event(project: &Project, id: EventId) -> Option<&Event> {
    project.events().find(|event| event.id == id)
}

pub fn find_event_mut(project: &mut Project, id: EventId) -> Option<&mut Event> {
    project
        .rooms
        .iter_mut()
        .flat_map(|room| room.events.iter_mut())
        .find(|event| event.id == id)
}

pub fn location_of_event(project: &Project, id: EventId) -> Option<Location> {
    project.rooms.iter().enumerate().find_map(|(index, room)| {
        room.events
            .iter()
            .find(|event| event.id == id)
            .map(|event| Location::new(index, event.position))
    })
}

/// Events standing on `position`, in paint order.
pub fn events_at<'a>(room: &'a Room, position: Position) -> impl Iterator<Item = &'a Event> + 'a {
    room.events
        .iter()
        .filter(move |event| event.position == position)
}

/// First event (in paint order) at `location`.
pub fn event_at_location<'a>(project: &'a Project, location: &Location) -> Option<&'a Event> {
    let room = project.room(location.room)?;
    events_at(room, location.position).next()
}

pub fn events_tagged<'a>(project: &'a Project, key: &'a str) -> impl Iterator<Item = &'a Event> + 'a {
    project.events().filter(move |event| is_tagged(event, key))
}

/// Moves the event to the end of the destination room's list and overwrites
/// its position. Returns `false` when the event or the room does not exist,
/// in which case nothing changes.
pub fn relocate(project: &mut Project, id: EventId, location: Location) -> bool {
    if location.room >= project.rooms.len() {
        return false;
    }
    let Some(mut event) = discard(project, id) else {
        return false;
    };
    event.position = location.position;
    project.rooms[location.room].events.push(event);
    true
}

/// Removes the event from its owning room and hands it back to the caller.
pub fn discard(project: &mut Project, id: EventId) -> Option<Event> {
    project.rooms.iter_mut().find_map(|room| {
        let index = room.events.iter().position(|event| event.id == id)?;
        Some(room.events.remove(index))
    })
}
