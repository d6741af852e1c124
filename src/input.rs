use std::collections::{HashSet, VecDeque};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use bitflags::bitflags;

bitflags! {
    /// Modifier keys carried on every key event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct KeyModifiers: u8 {
        const SHIFT = 0b001;
        const CTRL  = 0b010;
        const ALT   = 0b100;
    }
}

/// Key codes with the classic PC scan codes as discriminants, so BASIC's
/// KEY(n) sees the same numbers a DOS program would.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum KeyCode {
    Escape = 0x01,
    Num1 = 0x02,
    Num2 = 0x03,
    Num3 = 0x04,
    Num4 = 0x05,
    Num5 = 0x06,
    Num6 = 0x07,
    Num7 = 0x08,
    Num8 = 0x09,
    Num9 = 0x0A,
    Num0 = 0x0B,
    Minus = 0x0C,
    Equals = 0x0D,
    Backspace = 0x0E,
    Tab = 0x0F,
    Q = 0x10,
    W = 0x11,
    E = 0x12,
    R = 0x13,
    T = 0x14,
    Y = 0x15,
    U = 0x16,
    I = 0x17,
    O = 0x18,
    P = 0x19,
    LeftBracket = 0x1A,
    RightBracket = 0x1B,
    Enter = 0x1C,
    Ctrl = 0x1D,
    A = 0x1E,
    S = 0x1F,
    D = 0x20,
    F = 0x21,
    G = 0x22,
    H = 0x23,
    J = 0x24,
    K = 0x25,
    L = 0x26,
    Semicolon = 0x27,
    Quote = 0x28,
    Backquote = 0x29,
    Shift = 0x2A,
    Backslash = 0x2B,
    Z = 0x2C,
    X = 0x2D,
    C = 0x2E,
    V = 0x2F,
    B = 0x30,
    N = 0x31,
    M = 0x32,
    Comma = 0x33,
    Period = 0x34,
    Slash = 0x35,
    Alt = 0x38,
    Space = 0x39,
    F1 = 0x3B,
    F2 = 0x3C,
    F3 = 0x3D,
    F4 = 0x3E,
    F5 = 0x3F,
    F6 = 0x40,
    F7 = 0x41,
    F8 = 0x42,
    F9 = 0x43,
    F10 = 0x44,
    Home = 0x47,
    Up = 0x48,
    PageUp = 0x49,
    Left = 0x4B,
    Right = 0x4D,
    End = 0x4F,
    Down = 0x50,
    PageDown = 0x51,
    Insert = 0x52,
    Delete = 0x53,
    F11 = 0x85,
    F12 = 0x86,
}

impl KeyCode {
    pub fn scan_code(self) -> u8 {
        self as u8
    }

    pub fn from_scan_code(scan: u8) -> Option<KeyCode> {
        use KeyCode::*;
        let code = match scan {
            0x01 => Escape,
            0x02 => Num1,
            0x03 => Num2,
            0x04 => Num3,
            0x05 => Num4,
            0x06 => Num5,
            0x07 => Num6,
            0x08 => Num7,
            0x09 => Num8,
            0x0A => Num9,
            0x0B => Num0,
            0x0C => Minus,
            0x0D => Equals,
            0x0E => Backspace,
            0x0F => Tab,
            0x10 => Q,
            0x11 => W,
            0x12 => E,
            0x13 => R,
            0x14 => T,
            0x15 => Y,
            0x16 => U,
            0x17 => I,
            0x18 => O,
            0x19 => P,
            0x1A => LeftBracket,
            0x1B => RightBracket,
            0x1C => Enter,
            0x1D => Ctrl,
            0x1E => A,
            0x1F => S,
            0x20 => D,
            0x21 => F,
            0x22 => G,
            0x23 => H,
            0x24 => J,
            0x25 => K,
            0x26 => L,
            0x27 => Semicolon,
            0x28 => Quote,
            0x29 => Backquote,
            0x2A => Shift,
            0x2B => Backslash,
            0x2C => Z,
            0x2D => X,
            0x2E => C,
            0x2F => V,
            0x30 => B,
            0x31 => N,
            0x32 => M,
            0x33 => Comma,
            0x34 => Period,
            0x35 => Slash,
            0x38 => Alt,
            0x39 => Space,
            0x3B => F1,
            0x3C => F2,
            0x3D => F3,
            0x3E => F4,
            0x3F => F5,
            0x40 => F6,
            0x41 => F7,
            0x42 => F8,
            0x43 => F9,
            0x44 => F10,
            0x47 => Home,
            0x48 => Up,
            0x49 => PageUp,
            0x4B => Left,
            0x4D => Right,
            0x4F => End,
            0x50 => Down,
            0x51 => PageDown,
            0x52 => Insert,
            0x53 => Delete,
            0x85 => F11,
            0x86 => F12,
            _ => return None,
        };
        Some(code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEventKind {
    Down,
    Up,
}

/// One keyboard event as the host delivers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub kind: KeyEventKind,
    pub code: KeyCode,
    pub ch: Option<char>,
    pub modifiers: KeyModifiers,
}

impl KeyEvent {
    pub fn down(code: KeyCode, ch: Option<char>) -> Self {
        KeyEvent {
            kind: KeyEventKind::Down,
            code,
            ch,
            modifiers: KeyModifiers::empty(),
        }
    }

    pub fn up(code: KeyCode) -> Self {
        KeyEvent {
            kind: KeyEventKind::Up,
            code,
            ch: None,
            modifiers: KeyModifiers::empty(),
        }
    }

    pub fn with_modifiers(mut self, modifiers: KeyModifiers) -> Self {
        self.modifiers = modifiers;
        self
    }
}

/// Latest mouse snapshot. The host overwrites this each UI tick; programs
/// poll the newest state, there is no mouse event queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MouseState {
    pub x: i64,
    pub y: i64,
    pub left: bool,
    pub right: bool,
    pub middle: bool,
}

/// Fallback key producer consulted when the FIFO is empty.
pub type KeySource = Box<dyn FnMut() -> Option<KeyEvent> + Send>;

#[derive(Default)]
struct QueueInner {
    events: VecDeque<KeyEvent>,
    held: HashSet<KeyCode>,
    modifiers: KeyModifiers,
    mouse: MouseState,
    source: Option<KeySource>,
}

/// The single host-to-interpreter touchpoint: a FIFO of key events plus the
/// held-key set and the latest mouse state. One producer (the host), one
/// consumer (the interpreter); a condvar wakes key waits.
#[derive(Default)]
pub struct InputQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
}

impl InputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, update the held set, wake any waiter.
    pub fn inject(&self, event: KeyEvent) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match event.kind {
            KeyEventKind::Down => {
                inner.held.insert(event.code);
            }
            KeyEventKind::Up => {
                inner.held.remove(&event.code);
            }
        }
        inner.modifiers = event.modifiers;
        inner.events.push_back(event);
        self.available.notify_all();
    }

    /// Pop the head of the FIFO, falling back to the optional host callback.
    pub fn try_pop(&self) -> Option<KeyEvent> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(ev) = inner.events.pop_front() {
            return Some(ev);
        }
        if let Some(source) = inner.source.as_mut() {
            return source();
        }
        None
    }

    /// Block up to `timeout` for an event. The caller loops and checks its
    /// cancel token between waits.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<KeyEvent> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(ev) = inner.events.pop_front() {
            return Some(ev);
        }
        if let Some(source) = inner.source.as_mut() {
            if let Some(ev) = source() {
                return Some(ev);
            }
        }
        let (mut inner, _) = self
            .available
            .wait_timeout(inner, timeout)
            .unwrap_or_else(|e| e.into_inner());
        inner.events.pop_front()
    }

    pub fn is_down(&self, code: KeyCode) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.held.contains(&code)
    }

    pub fn modifiers(&self) -> KeyModifiers {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.modifiers
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.events.clear();
    }

    /// Install the fallback key producer consulted when the FIFO is empty.
    pub fn set_key_source(&self, source: Option<KeySource>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.source = source;
    }

    pub fn set_mouse_state(&self, state: MouseState) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.mouse = state;
    }

    pub fn mouse(&self) -> MouseState {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.mouse
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_preserved() {
        let q = InputQueue::new();
        q.inject(KeyEvent::down(KeyCode::A, Some('a')));
        q.inject(KeyEvent::down(KeyCode::B, Some('b')));
        q.inject(KeyEvent::down(KeyCode::C, Some('c')));
        assert_eq!(q.try_pop().unwrap().code, KeyCode::A);
        assert_eq!(q.try_pop().unwrap().code, KeyCode::B);
        assert_eq!(q.try_pop().unwrap().code, KeyCode::C);
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn held_set_follows_down_up() {
        let q = InputQueue::new();
        q.inject(KeyEvent::down(KeyCode::Left, None));
        assert!(q.is_down(KeyCode::Left));
        q.inject(KeyEvent::up(KeyCode::Left));
        assert!(!q.is_down(KeyCode::Left));
    }

    #[test]
    fn key_source_feeds_empty_queue() {
        let q = InputQueue::new();
        let mut fed = false;
        q.set_key_source(Some(Box::new(move || {
            if fed {
                None
            } else {
                fed = true;
                Some(KeyEvent::down(KeyCode::Z, Some('z')))
            }
        })));
        assert_eq!(q.try_pop().unwrap().code, KeyCode::Z);
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn scan_codes_round_trip() {
        for code in [KeyCode::Escape, KeyCode::Enter, KeyCode::Space, KeyCode::F12] {
            assert_eq!(KeyCode::from_scan_code(code.scan_code()), Some(code));
        }
        assert_eq!(KeyCode::from_scan_code(0x37), None);
    }
}
