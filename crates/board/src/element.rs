use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ElementId(pub Uuid);

impl ElementId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ElementId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canvas coordinate in board pixels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn offset(&self, dx: f64, dy: f64) -> Point {
        Point::new(self.x + dx, self.y + dy)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn translate(&mut self, dx: f64, dy: f64) {
        self.x += dx;
        self.y += dy;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementKind {
    Rectangle,
    Ellipse,
    Text {
        content: String,
        #[serde(default = "default_font_size")]
        font_size: f32,
    },
    StickyNote {
        content: String,
    },
    Line {
        points: Vec<Point>,
        #[serde(default)]
        arrow: bool,
    },
    Freehand {
        points: Vec<Point>,
    },
    Image {
        src: String,
    },
}

fn default_font_size() -> f32 {
    16.0
}

/// A single drawable item on a board.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Element {
    pub id: ElementId,
    #[serde(flatten)]
    pub kind: ElementKind,
    pub bounds: Bounds,
    #[serde(default)]
    pub rotation: f64,
    #[serde(default)]
    pub z_index: i32,
    #[serde(default)]
    pub style: serde_json::Value,
}

impl Element {
    pub fn new(kind: ElementKind, bounds: Bounds) -> Self {
        Self {
            id: ElementId::new(),
            kind,
            bounds,
            rotation: 0.0,
            z_index: 0,
            style: serde_json::Value::Null,
        }
    }

    pub fn with_z_index(mut self, z_index: i32) -> Self {
        self.z_index = z_index;
        self
    }

    pub fn with_style(mut self, style: serde_json::Value) -> Self {
        self.style = style;
        self
    }

    /// Translates the element, including any points it carries.
    pub fn translate(&mut self, dx: f64, dy: f64) {
        self.bounds.translate(dx, dy);
        match &mut self.kind {
            ElementKind::Line { points, .. } | ElementKind::Freehand { points } => {
                for point in points.iter_mut() {
                    *point = point.offset(dx, dy);
                }
            }
            _ => {}
        }
    }
}

/// Partial update addressed by a dotted field path, e.g. `bounds.width`.
/// A patch without a path replaces the whole element; a patch without a
/// value removes the field at its path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElementPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub value: Option<serde_json::Value>,
}

impl ElementPatch {
    pub fn field(path: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            path: Some(path.into()),
            value: Some(value),
        }
    }

    pub fn replace(value: serde_json::Value) -> Self {
        Self {
            path: None,
            value: Some(value),
        }
    }

    pub fn unset(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            value: None,
        }
    }
}

/// Reads a present field as `Some`, explicit `null` included. With
/// `#[serde(default)]` a missing field stays `None`.
pub fn present<'de, D>(deserializer: D) -> std::result::Result<Option<serde_json::Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}
