use std::io::Cursor;
use std::sync::OnceLock;
use std::time::Instant;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::MappingError;

/// Maximum distance, in physical pixels, between an input event and a target that still counts as a hit.
pub const POSITION_TOLERANCE: f64 = 20.0;
pub const DOUBLE_CLICK_WINDOW_MS: u64 = 550;

pub const FALLBACK_CALLOUT_TEXT: &str = "Follow the on-screen guidance.";
pub const CALLOUT_HEADING: &str = "Call Out";
pub const TASK_COMPLETED_MARKER: &str = "<<TASK_COMPLETED>>";

pub const PINPOINT_COLOR: &str = "#7dd3fc";
pub const HIGHLIGHT_COLOR: &str = "#f59e0b";

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
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
}

/// Snapshot of the shared monitor, taken when screen sharing starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayInfo {
    #[serde(default)]
    pub id: Option<String>,
    /// Logical (DIP) bounds in the virtual desktop.
    pub bounds: Rect,
    #[serde(default = "unit_scale")]
    pub scale_factor: f64,
    /// Measured device-pixel bounds, when the platform query provides them.
    #[serde(default)]
    pub physical_bounds: Option<Rect>,
    /// Scale factor of the primary monitor; positions physical origins.
    #[serde(default)]
    pub virtual_scale_factor: Option<f64>,
}

fn unit_scale() -> f64 {
    1.0
}

fn usable_scale(value: f64) -> Option<f64> {
    (value.is_finite() && value > 0.0).then_some(value)
}

impl DisplayInfo {
    pub fn new(bounds: Rect, scale_factor: f64) -> Self {
        Self {
            id: None,
            bounds,
            scale_factor,
            physical_bounds: None,
            virtual_scale_factor: None,
        }
    }

    pub fn scale(&self) -> f64 {
        usable_scale(self.scale_factor).unwrap_or(1.0)
    }

    pub fn origin_scale(&self) -> f64 {
        self.virtual_scale_factor
            .and_then(usable_scale)
            .unwrap_or_else(|| self.scale())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    DoubleClick,
    Drag,
    Scroll,
    ScrollUp,
    ScrollDown,
    Keypress,
    Type,
    Wait,
    Pinpoint,
    Callout,
}

impl ActionKind {
    pub fn parse(tag: &str) -> Option<Self> {
        let kind = match tag.trim().to_ascii_lowercase().as_str() {
            "click" => ActionKind::Click,
            "double_click" => ActionKind::DoubleClick,
            "drag" => ActionKind::Drag,
            "scroll" => ActionKind::Scroll,
            "scroll_up" => ActionKind::ScrollUp,
            "scroll_down" => ActionKind::ScrollDown,
            "keypress" => ActionKind::Keypress,
            "type" => ActionKind::Type,
            "wait" => ActionKind::Wait,
            "pinpoint" => ActionKind::Pinpoint,
            "callout" => ActionKind::Callout,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Click => "click",
            ActionKind::DoubleClick => "double_click",
            ActionKind::Drag => "drag",
            ActionKind::Scroll => "scroll",
            ActionKind::ScrollUp => "scroll_up",
            ActionKind::ScrollDown => "scroll_down",
            ActionKind::Keypress => "keypress",
            ActionKind::Type => "type",
            ActionKind::Wait => "wait",
            ActionKind::Pinpoint => "pinpoint",
            ActionKind::Callout => "callout",
        }
    }

    /// Kinds that make no sense without a target point.
    pub fn requires_pointer(self) -> bool {
        matches!(
            self,
            ActionKind::Click | ActionKind::DoubleClick | ActionKind::Drag | ActionKind::Pinpoint
        )
    }

    /// Kinds a physical input event cannot fully confirm, so the shell offers a Next button.
    pub fn manual_advance(self) -> bool {
        match self {
            ActionKind::Scroll
            | ActionKind::ScrollUp
            | ActionKind::ScrollDown
            | ActionKind::Keypress
            | ActionKind::Type
            | ActionKind::Wait
            | ActionKind::Pinpoint => true,
            ActionKind::Click
            | ActionKind::DoubleClick
            | ActionKind::Drag
            | ActionKind::Callout => false,
        }
    }

    /// Whether pressing Next counts as performing the action.
    pub fn confirmable_by_next(self) -> bool {
        !matches!(
            self,
            ActionKind::Click | ActionKind::DoubleClick | ActionKind::Drag
        )
    }

    pub fn heading(self) -> &'static str {
        match self {
            ActionKind::Click => "Click",
            ActionKind::DoubleClick => "Double click",
            ActionKind::Drag => "Drag",
            ActionKind::Scroll | ActionKind::ScrollUp | ActionKind::ScrollDown => "Scroll",
            ActionKind::Keypress => "Key press",
            ActionKind::Type => "Type",
            ActionKind::Wait => "Wait",
            ActionKind::Pinpoint => "Pinpoint",
            ActionKind::Callout => CALLOUT_HEADING,
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            ActionKind::Click => "#1f2937",
            ActionKind::DoubleClick => "#22c55e",
            ActionKind::Drag => "#facc15",
            ActionKind::Scroll | ActionKind::ScrollUp | ActionKind::ScrollDown => "#a855f7",
            ActionKind::Keypress => "#0f766e",
            ActionKind::Type => "#3b82f6",
            ActionKind::Wait => "#a16207",
            ActionKind::Pinpoint => PINPOINT_COLOR,
            ActionKind::Callout => "#ef4444",
        }
    }

    pub fn completion_message(self) -> &'static str {
        match self {
            ActionKind::Click => "Click complete.",
            ActionKind::DoubleClick => "Double click complete.",
            ActionKind::Drag => "Drag complete.",
            ActionKind::Scroll | ActionKind::ScrollUp | ActionKind::ScrollDown => {
                "Scroll complete."
            }
            ActionKind::Keypress | ActionKind::Type => "Input complete.",
            ActionKind::Wait => "Wait complete.",
            ActionKind::Pinpoint => "Pinpoint acknowledged.",
            ActionKind::Callout => "Step complete.",
        }
    }
}

/// Severity the reasoner attaches to its callout text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CalloutTone {
    Info,
    Hint,
    Warning,
    ErrorSolving,
}

impl CalloutTone {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "info" => Some(CalloutTone::Info),
            "hint" => Some(CalloutTone::Hint),
            "warning" => Some(CalloutTone::Warning),
            "error-solving" => Some(CalloutTone::ErrorSolving),
            _ => None,
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            CalloutTone::Info => "#38bdf8",
            CalloutTone::Hint => "#a78bfa",
            CalloutTone::Warning => "#f59e0b",
            CalloutTone::ErrorSolving => "#ef4444",
        }
    }
}

/// Normalized answer of the pointer service, in captured-frame pixel space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionProposal {
    pub kind: ActionKind,
    #[serde(default)]
    pub point: Option<Point>,
    #[serde(default)]
    pub end: Option<Point>,
    #[serde(default)]
    pub path: Vec<Point>,
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

impl ActionProposal {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            point: None,
            end: None,
            path: Vec::new(),
            keys: Vec::new(),
            text: None,
            summary: None,
        }
    }

    pub fn at(kind: ActionKind, x: f64, y: f64) -> Self {
        Self {
            point: Some(Point::new(x, y)),
            ..Self::new(kind)
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    fn drag_path(&self) -> Option<(Point, Point)> {
        if self.kind == ActionKind::Drag && self.path.len() > 1 {
            Some((self.path[0], self.path[self.path.len() - 1]))
        } else {
            None
        }
    }

    pub fn start_point(&self) -> Option<Point> {
        let start = match self.drag_path() {
            Some((start, _)) => Some(start),
            None => self.point,
        };
        start.filter(|p| p.is_finite())
    }

    pub fn end_point(&self) -> Option<Point> {
        let end = match self.drag_path() {
            Some((_, end)) => Some(end),
            None => self.end,
        };
        end.filter(|p| p.is_finite())
    }
}

/// A proposal mapped onto the shared display, owned by the action session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedAction {
    pub kind: ActionKind,
    /// Absolute physical pixels across the whole desktop.
    pub at: Option<Point>,
    pub end: Option<Point>,
    /// Logical per-display coordinates used to place the callout.
    pub dip: Option<Point>,
    pub dip_end: Option<Point>,
    pub keys: Vec<String>,
}

/// Presentation command for the overlay shell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Callout {
    pub heading: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading_color: Option<String>,
    pub x: i32,
    pub y: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_x: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_y: Option<i32>,
    #[serde(default)]
    pub keys: Vec<String>,
    pub show_next: bool,
    #[serde(default)]
    pub fade_out: bool,
    #[serde(default)]
    pub allow_click_through: bool,
}

impl Callout {
    /// The "hide guidance" sentinel.
    pub fn hidden() -> Self {
        Self {
            heading: String::new(),
            body: String::new(),
            border_color: None,
            heading_color: None,
            x: -1,
            y: -1,
            end_x: None,
            end_y: None,
            keys: Vec::new(),
            show_next: false,
            fade_out: false,
            allow_click_through: false,
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.x == -1 && self.y == -1 && self.heading.is_empty() && self.body.is_empty()
    }

    pub fn faded(&self) -> Self {
        Self {
            fade_out: true,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::System => "SYSTEM",
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
        }
    }
}

/// A message in the conversation history sent to the reasoner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// One captured PNG frame of the shared display.
#[derive(Debug)]
pub struct Frame {
    pub id: u64,
    pub width: u32,
    pub height: u32,
    pub captured_at: Instant,
    png: Vec<u8>,
    data_url: OnceLock<String>,
}

impl Frame {
    pub fn new(id: u64, width: u32, height: u32, png: Vec<u8>) -> Self {
        Self {
            id,
            width,
            height,
            captured_at: Instant::now(),
            png,
            data_url: OnceLock::new(),
        }
    }

    /// Reads the dimensions from the image header without decoding pixels.
    pub fn from_png(id: u64, png: Vec<u8>) -> Result<Self, MappingError> {
        let (width, height) = image::ImageReader::new(Cursor::new(png.as_slice()))
            .with_guessed_format()
            .map_err(|e| MappingError::InvalidFrame(e.to_string()))?
            .into_dimensions()
            .map_err(|e| MappingError::InvalidFrame(e.to_string()))?;
        if width == 0 || height == 0 {
            return Err(MappingError::InvalidFrame(format!(
                "empty frame {width}x{height}"
            )));
        }
        Ok(Self::new(id, width, height, png))
    }

    pub fn size(&self) -> Size {
        Size::new(f64::from(self.width), f64::from(self.height))
    }

    pub fn png(&self) -> &[u8] {
        &self.png
    }

    pub fn data_url(&self) -> &str {
        self.data_url
            .get_or_init(|| format!("data:image/png;base64,{}", STANDARD.encode(&self.png)))
    }
}
