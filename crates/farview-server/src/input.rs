//! Input injection port.
//!
//! Platform-specific mouse/keyboard simulation lives behind
//! [`InputInjector`]; the session layer only maps protocol payloads onto
//! port calls. The default [`TracingInjector`] logs events, which keeps
//! headless deployments and tests observable.

use farview_proto::payloads::{KeyboardEvent, MouseEvent};

/// Mouse buttons addressable by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    /// Left button (bit 0x01).
    Left,
    /// Right button (bit 0x02).
    Right,
    /// Middle button (bit 0x04).
    Middle,
}

/// Platform input injection port.
pub trait InputInjector: Send {
    /// Move the cursor to absolute screen coordinates.
    fn mouse_move(&mut self, x: i32, y: i32);

    /// Press or release a mouse button at the given position.
    fn mouse_button(&mut self, x: i32, y: i32, button: MouseButton, pressed: bool);

    /// Rotate the wheel by `delta` at the given position.
    fn mouse_wheel(&mut self, x: i32, y: i32, delta: i32);

    /// Press or release a key.
    fn key(&mut self, key: u32, modifiers: u32, pressed: bool);
}

/// Injector that logs events instead of synthesizing them.
#[derive(Debug, Default)]
pub struct TracingInjector;

impl InputInjector for TracingInjector {
    fn mouse_move(&mut self, x: i32, y: i32) {
        tracing::debug!(x, y, "mouse move");
    }

    fn mouse_button(&mut self, x: i32, y: i32, button: MouseButton, pressed: bool) {
        tracing::debug!(x, y, ?button, pressed, "mouse button");
    }

    fn mouse_wheel(&mut self, x: i32, y: i32, delta: i32) {
        tracing::debug!(x, y, delta, "mouse wheel");
    }

    fn key(&mut self, key: u32, modifiers: u32, pressed: bool) {
        tracing::debug!(key, modifiers, pressed, "key");
    }
}

/// Map a mouse payload onto injector calls.
///
/// The payload carries button *state*: a set bit injects a press, a clear
/// bit injects a release. Movement fires for non-negative coordinates and
/// a non-zero wheel delta fires a wheel event.
pub fn apply_mouse_event(injector: &mut dyn InputInjector, event: &MouseEvent) {
    if event.x >= 0 && event.y >= 0 {
        injector.mouse_move(event.x, event.y);
    }
    injector.mouse_button(event.x, event.y, MouseButton::Left, event.left());
    injector.mouse_button(event.x, event.y, MouseButton::Right, event.right());
    injector.mouse_button(event.x, event.y, MouseButton::Middle, event.middle());
    if event.wheel_delta != 0 {
        injector.mouse_wheel(event.x, event.y, event.wheel_delta);
    }
}

/// Map a keyboard payload onto an injector call.
pub fn apply_keyboard_event(injector: &mut dyn InputInjector, event: &KeyboardEvent) {
    injector.key(event.key, event.modifiers, event.pressed);
}
