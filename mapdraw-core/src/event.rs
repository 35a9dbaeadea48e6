//! Input events for map interaction.

use serde::{Deserialize, Serialize};

use crate::geometry::{Coordinate, Pixel};

/// Phase of a pointer event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerPhase {
    /// Pointer moved (hover or drag).
    Move,
    /// Button or finger went down.
    Down,
    /// Button or finger went up.
    Up,
    /// A completed single click/tap.
    Click,
    /// A completed double click/tap.
    DoubleClick,
}

/// The device that produced a pointer event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerKind {
    /// Mouse or trackpad.
    #[default]
    Mouse,
    /// Finger on a touch screen.
    Touch,
    /// Stylus.
    Pen,
}

/// A pointer event on the map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerEvent {
    /// Phase of this event.
    pub phase: PointerPhase,
    /// Screen position, if the host knows it.
    pub pixel: Option<Pixel>,
    /// Map position, if the host knows it.
    pub coordinate: Option<Coordinate>,
    /// Input device.
    #[serde(default)]
    pub kind: PointerKind,
    /// Whether a drag gesture is in progress.
    #[serde(default)]
    pub dragging: bool,
}

impl PointerEvent {
    /// Create a pointer event with both positions known.
    #[must_use]
    pub fn new(phase: PointerPhase, pixel: Pixel, coordinate: Coordinate) -> Self {
        Self {
            phase,
            pixel: Some(pixel),
            coordinate: Some(coordinate),
            kind: PointerKind::Mouse,
            dragging: false,
        }
    }

    /// Mark the event as part of a drag gesture.
    #[must_use]
    pub fn dragging(mut self) -> Self {
        self.dragging = true;
        self
    }

    /// Set the input device.
    #[must_use]
    pub fn with_kind(mut self, kind: PointerKind) -> Self {
        self.kind = kind;
        self
    }

    /// An event that carries no pointer context at all.
    #[must_use]
    pub fn detached(phase: PointerPhase) -> Self {
        Self {
            phase,
            pixel: None,
            coordinate: None,
            kind: PointerKind::Mouse,
            dragging: false,
        }
    }
}

/// All input events the map can receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum InputEvent {
    /// Pointer (mouse, touch, pen) event.
    Pointer(PointerEvent),

    /// Keyboard event.
    Key {
        /// Key name or code.
        key: String,
        /// Whether the key is pressed.
        pressed: bool,
        /// Active modifier keys.
        #[serde(default)]
        modifiers: KeyModifiers,
    },

    /// A measurement overlay became draggable or stopped being draggable.
    OverlayDrag {
        /// Whether an overlay is currently draggable.
        draggable: bool,
    },
}

/// Keyboard modifiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct KeyModifiers {
    /// Shift key pressed.
    pub shift: bool,
    /// Control key pressed.
    pub ctrl: bool,
    /// Alt/Option key pressed.
    pub alt: bool,
    /// Meta/Command key pressed.
    pub meta: bool,
}

/// Keyboard commands understood by the measurement tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// Remove the last sketch point or the current selection.
    RemoveLast,
    /// Abort the current sketch and start a new one.
    Reset,
}

impl KeyAction {
    /// Map a key event to an action.
    ///
    /// Only key release triggers, so holding a key does not repeat the action.
    #[must_use]
    pub fn from_event(event: &InputEvent) -> Option<Self> {
        let InputEvent::Key { key, pressed, .. } = event else {
            return None;
        };
        if *pressed {
            return None;
        }
        match key.as_str() {
            "Delete" | "Backspace" => Some(Self::RemoveLast),
            "Escape" | "Esc" => Some(Self::Reset),
            _ => None,
        }
    }
}
