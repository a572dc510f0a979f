use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Rooms are square grids of this many cells per side.
pub const ROOM_SIZE: i32 = 16;

pub type EventId = u32;

/// Cell coordinates as `[x, y]`.
pub type Position = [i32; 2];

/// Row-major grid indexed as `grid[y][x]`.
pub type Grid = Vec<Vec<u32>>;

fn empty_grid() -> Grid {
    vec![vec![0; ROOM_SIZE as usize]; ROOM_SIZE as usize]
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub rooms: Vec<Room>,
    #[serde(default)]
    pub palettes: Vec<Palette>,
    #[serde(default)]
    pub tiles: Vec<Tile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tileset: Option<String>,
}

impl Project {
    pub fn room(&self, index: usize) -> Option<&Room> {
        self.rooms.get(index)
    }

    pub fn room_mut(&mut self, index: usize) -> Option<&mut Room> {
        self.rooms.get_mut(index)
    }

    /// Palette of the given room, falling back to the first palette when the
    /// room points past the end of the list.
    pub fn palette_for_room(&self, index: usize) -> Option<&Palette> {
        let room = self.rooms.get(index)?;
        self.palettes
            .get(room.palette)
            .or_else(|| self.palettes.first())
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.rooms.iter().flat_map(|room| room.events.iter())
    }
}

/// Background, foreground and highlight colours, in that order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Palette {
    pub colors: [String; 3],
}

impl Palette {
    pub fn new(background: &str, foreground: &str, highlight: &str) -> Self {
        Palette {
            colors: [
                background.to_string(),
                foreground.to_string(),
                highlight.to_string(),
            ],
        }
    }

    pub fn background(&self) -> &str {
        &self.colors[0]
    }

    pub fn foreground(&self) -> &str {
        &self.colors[1]
    }

    pub fn highlight(&self) -> &str {
        &self.colors[2]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub id: u32,
    #[serde(default)]
    pub frames: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: u32,
    #[serde(default)]
    pub palette: usize,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default = "empty_grid")]
    pub tilemap: Grid,
    #[serde(default = "empty_grid")]
    pub wallmap: Grid,
    #[serde(default = "empty_grid")]
    pub highmap: Grid,
    #[serde(default = "empty_grid")]
    pub backmap: Grid,
    #[serde(default = "empty_grid")]
    pub foremap: Grid,
}

impl Room {
    pub fn new(id: u32) -> Self {
        Room {
            id,
            palette: 0,
            events: Vec::new(),
            tilemap: empty_grid(),
            wallmap: empty_grid(),
            highmap: empty_grid(),
            backmap: empty_grid(),
            foremap: empty_grid(),
        }
    }

    /// Value of the wall layer at `(x, y)`; cells outside the grid read as 0.
    pub fn wall(&self, x: i32, y: i32) -> u32 {
        if x < 0 || y < 0 {
            return 0;
        }
        self.wallmap
            .get(y as usize)
            .and_then(|row| row.get(x as usize))
            .copied()
            .unwrap_or(0)
    }

    pub fn set_wall(&mut self, x: i32, y: i32, value: u32) {
        if x < 0 || y < 0 {
            return;
        }
        if let Some(cell) = self
            .wallmap
            .get_mut(y as usize)
            .and_then(|row| row.get_mut(x as usize))
        {
            *cell = value;
        }
    }

    pub fn cell_is_solid(&self, x: i32, y: i32) -> bool {
        crate::collision::cell_is_solid(self, x, y)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub position: Position,
    #[serde(default)]
    pub fields: Vec<Field>,
}

impl Event {
    pub fn new(id: EventId, position: Position) -> Self {
        Event {
            id,
            position,
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }
}

/// A room index plus a cell inside that room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub room: usize,
    pub position: Position,
}

impl Location {
    pub fn new(room: usize, position: Position) -> Self {
        Location { room, position }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Tag,
    Tile,
    Dialogue,
    Location,
    #[serde(alias = "javascript", alias = "lua")]
    Script,
    Json,
    Text,
    File,
}

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Tag => "tag",
            FieldKind::Tile => "tile",
            FieldKind::Dialogue => "dialogue",
            FieldKind::Location => "location",
            FieldKind::Script => "script",
            FieldKind::Json => "json",
            FieldKind::Text => "text",
            FieldKind::File => "file",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "tag" => Some(FieldKind::Tag),
            "tile" => Some(FieldKind::Tile),
            "dialogue" => Some(FieldKind::Dialogue),
            "location" => Some(FieldKind::Location),
            "script" | "javascript" | "lua" => Some(FieldKind::Script),
            "json" => Some(FieldKind::Json),
            "text" => Some(FieldKind::Text),
            "file" => Some(FieldKind::File),
            _ => None,
        }
    }
}

/// Keyed, typed datum attached to an event. The shape of `data` depends on
/// `kind` and is trusted as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default)]
    pub data: Value,
}

impl Field {
    pub fn new(key: &str, kind: FieldKind, data: Value) -> Self {
        Field {
            key: key.to_string(),
            kind,
            data,
        }
    }

    pub fn tag(key: &str) -> Self {
        Field::new(key, FieldKind::Tag, Value::Bool(true))
    }

    pub fn dialogue(key: &str, text: &str) -> Self {
        Field::new(key, FieldKind::Dialogue, Value::String(text.to_string()))
    }

    pub fn text(key: &str, text: &str) -> Self {
        Field::new(key, FieldKind::Text, Value::String(text.to_string()))
    }

    pub fn script(key: &str, source: &str) -> Self {
        Field::new(key, FieldKind::Script, Value::String(source.to_string()))
    }

    pub fn tile(key: &str, tile: u32) -> Self {
        Field::new(key, FieldKind::Tile, Value::from(tile))
    }

    pub fn location(key: &str, location: Location) -> Self {
        let data = serde_json::to_value(location).unwrap_or(Value::Null);
        Field::new(key, FieldKind::Location, data)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.data.as_str()
    }

    pub fn as_tile(&self) -> Option<u32> {
        self.data.as_u64().and_then(|tile| u32::try_from(tile).ok())
    }

    pub fn as_location(&self) -> Option<Location> {
        serde_json::from_value(self.data.clone()).ok()
    }
}
