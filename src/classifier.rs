//! Completion rules: does a raw input event satisfy the pending action?
//!
//! The rules themselves are pure. The only memory they need (a first click of a double click,
//! an armed drag) lives in [`GestureState`], which the session owns and resets whenever the
//! pending action changes.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::types::{ActionKind, DOUBLE_CLICK_WINDOW_MS, POSITION_TOLERANCE, Point, ResolvedAction};

/// One keydown as reported by the global input hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyStroke {
    #[serde(default)]
    pub keycode: u32,
    /// Platform virtual-key code.
    #[serde(default)]
    pub rawcode: u32,
    #[serde(default)]
    pub ctrl_key: bool,
    #[serde(default)]
    pub alt_key: bool,
    #[serde(default)]
    pub shift_key: bool,
    #[serde(default)]
    pub meta_key: bool,
}

impl KeyStroke {
    fn code(&self) -> u32 {
        if self.rawcode != 0 {
            self.rawcode
        } else {
            self.keycode
        }
    }
}

/// Raw events from the platform monitor, in absolute physical pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InputEvent {
    Click {
        #[serde(alias = "absoluteX")]
        x: f64,
        #[serde(alias = "absoluteY")]
        y: f64,
    },
    MouseDown {
        #[serde(alias = "absoluteX")]
        x: f64,
        #[serde(alias = "absoluteY")]
        y: f64,
        #[serde(default)]
        button: u8,
    },
    MouseUp {
        #[serde(alias = "absoluteX")]
        x: f64,
        #[serde(alias = "absoluteY")]
        y: f64,
        #[serde(default)]
        button: u8,
    },
    MouseMove {
        #[serde(alias = "absoluteX")]
        x: f64,
        #[serde(alias = "absoluteY")]
        y: f64,
    },
    Wheel {
        #[serde(default)]
        amount: i32,
        #[serde(default)]
        rotation: i32,
    },
    KeyDown(KeyStroke),
}

impl InputEvent {
    pub fn position(&self) -> Option<Point> {
        match *self {
            InputEvent::Click { x, y }
            | InputEvent::MouseDown { x, y, .. }
            | InputEvent::MouseUp { x, y, .. }
            | InputEvent::MouseMove { x, y } => Some(Point::new(x, y)),
            InputEvent::Wheel { .. } | InputEvent::KeyDown(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The action's completion criteria are satisfied.
    Met,
    /// First half of a two-part gesture registered.
    Armed,
    /// An armed gesture was abandoned.
    Disarmed,
    /// Relevant event, wrong place or wrong key.
    Miss,
    /// Event has nothing to do with the pending action.
    Ignored,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GestureState {
    first_click: Option<(Instant, Point)>,
    drag_armed: bool,
}

impl GestureState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn drag_armed(&self) -> bool {
        self.drag_armed
    }

    pub fn awaiting_second_click(&self) -> bool {
        self.first_click.is_some()
    }
}

/// Inclusive: a distance of exactly [`POSITION_TOLERANCE`] is a hit.
pub fn within_tolerance(point: Point, target: Point) -> bool {
    point.distance_to(target) <= POSITION_TOLERANCE
}

pub fn classify(
    action: &ResolvedAction,
    gesture: &mut GestureState,
    event: &InputEvent,
    now: Instant,
) -> Verdict {
    match action.kind {
        ActionKind::Click => match (event, action.at) {
            (InputEvent::Click { x, y }, Some(target)) => {
                if within_tolerance(Point::new(*x, *y), target) {
                    Verdict::Met
                } else {
                    Verdict::Miss
                }
            }
            _ => Verdict::Ignored,
        },
        ActionKind::DoubleClick => classify_double_click(action, gesture, event, now),
        ActionKind::Drag => classify_drag(action, gesture, event),
        // Direction is not distinguished.
        ActionKind::Scroll | ActionKind::ScrollUp | ActionKind::ScrollDown => match event {
            InputEvent::Wheel { .. } => Verdict::Met,
            _ => Verdict::Ignored,
        },
        ActionKind::Keypress => match event {
            InputEvent::KeyDown(stroke) => {
                let required = expand_keys(&action.keys);
                if required.len() <= 1 || matches_key_combo(&required, stroke) {
                    Verdict::Met
                } else {
                    Verdict::Miss
                }
            }
            _ => Verdict::Ignored,
        },
        ActionKind::Pinpoint => match (event, action.at) {
            (InputEvent::MouseMove { x, y }, Some(target))
                if within_tolerance(Point::new(*x, *y), target) =>
            {
                Verdict::Met
            }
            _ => Verdict::Ignored,
        },
        // Completed by a timer or the Next button, never by input.
        ActionKind::Type | ActionKind::Wait | ActionKind::Callout => Verdict::Ignored,
    }
}

fn classify_double_click(
    action: &ResolvedAction,
    gesture: &mut GestureState,
    event: &InputEvent,
    now: Instant,
) -> Verdict {
    let (InputEvent::Click { x, y }, Some(target)) = (event, action.at) else {
        return Verdict::Ignored;
    };
    let point = Point::new(*x, *y);
    if !within_tolerance(point, target) {
        return Verdict::Miss;
    }

    // The second click is measured against the first click, not the target, so a slight
    // drift between the two clicks still counts.
    if let Some((first_at, first_point)) = gesture.first_click {
        let elapsed = now.saturating_duration_since(first_at);
        if elapsed <= Duration::from_millis(DOUBLE_CLICK_WINDOW_MS)
            && within_tolerance(point, first_point)
        {
            gesture.first_click = None;
            return Verdict::Met;
        }
    }
    gesture.first_click = Some((now, point));
    Verdict::Armed
}

fn classify_drag(action: &ResolvedAction, gesture: &mut GestureState, event: &InputEvent) -> Verdict {
    match *event {
        InputEvent::MouseDown { x, y, .. } => match action.at {
            Some(start) if within_tolerance(Point::new(x, y), start) => {
                gesture.drag_armed = true;
                Verdict::Armed
            }
            _ => Verdict::Miss,
        },
        InputEvent::MouseMove { x, y } if gesture.drag_armed => match action.end {
            Some(end) if within_tolerance(Point::new(x, y), end) => {
                gesture.drag_armed = false;
                Verdict::Met
            }
            _ => Verdict::Ignored,
        },
        InputEvent::MouseUp { .. } if gesture.drag_armed => {
            gesture.drag_armed = false;
            Verdict::Disarmed
        }
        _ => Verdict::Ignored,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Modifier {
    Ctrl,
    Alt,
    Shift,
    Meta,
}

fn modifier_for(name: &str) -> Option<Modifier> {
    match name {
        "ctrl" | "control" => Some(Modifier::Ctrl),
        "alt" | "option" => Some(Modifier::Alt),
        "shift" => Some(Modifier::Shift),
        "meta" | "cmd" | "command" | "win" | "super" => Some(Modifier::Meta),
        _ => None,
    }
}

// shift, ctrl, alt, left/right win, then the left/right variants of shift, ctrl and alt.
const MODIFIER_CODES: [u32; 11] = [16, 17, 18, 91, 92, 160, 161, 162, 163, 164, 165];

/// Splits `"ctrl+s"` style entries and normalizes each name.
pub fn expand_keys(keys: &[String]) -> Vec<String> {
    keys.iter()
        .flat_map(|key| key.split('+'))
        .map(|key| key.trim().to_ascii_lowercase())
        .filter(|key| !key.is_empty())
        .collect()
}

/// Virtual-key code for a non-modifier key name, if the name is known.
pub fn key_code(name: &str) -> Option<u32> {
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return c.is_ascii_alphanumeric().then(|| u32::from(c.to_ascii_uppercase()));
    }

    if let Some(number) = name.strip_prefix('f').and_then(|n| n.parse::<u32>().ok()) {
        return (1..=24).contains(&number).then_some(111 + number);
    }

    let code = match name {
        "backspace" => 8,
        "tab" => 9,
        "enter" | "return" => 13,
        "escape" | "esc" => 27,
        "space" | "spacebar" => 32,
        "pageup" | "page_up" => 33,
        "pagedown" | "page_down" => 34,
        "end" => 35,
        "home" => 36,
        "left" | "arrowleft" => 37,
        "up" | "arrowup" => 38,
        "right" | "arrowright" => 39,
        "down" | "arrowdown" => 40,
        "insert" => 45,
        "delete" | "del" => 46,
        "semicolon" => 186,
        "equal" | "plus" => 187,
        "comma" => 188,
        "minus" => 189,
        "period" => 190,
        "slash" => 191,
        "backquote" => 192,
        "bracketleft" => 219,
        "backslash" => 220,
        "bracketright" => 221,
        "quote" => 222,
        _ => return None,
    };
    Some(code)
}

/// Matches a keydown against an already expanded key combination.
///
/// Every modifier in the combination must be held. A bare modifier keydown never completes a
/// combination that names another key.
pub fn matches_key_combo(required: &[String], stroke: &KeyStroke) -> bool {
    let mut keys = Vec::new();
    for name in required {
        let held = match modifier_for(name) {
            Some(Modifier::Ctrl) => stroke.ctrl_key,
            Some(Modifier::Alt) => stroke.alt_key,
            Some(Modifier::Shift) => stroke.shift_key,
            Some(Modifier::Meta) => stroke.meta_key,
            None => {
                keys.push(name.as_str());
                continue;
            }
        };
        if !held {
            return false;
        }
    }

    if keys.is_empty() {
        return true;
    }
    let code = stroke.code();
    if MODIFIER_CODES.contains(&code) {
        return false;
    }

    let mut unknown = false;
    for name in &keys {
        match key_code(name) {
            Some(expected) if expected == code => return true,
            Some(_) => {}
            None => unknown = true,
        }
    }
    // Names outside the table cannot be checked; accept any real key for a lone unknown name.
    unknown && keys.len() == 1
}
