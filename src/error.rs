use std::io;

/// Errors produced by the IO emulator core.
///
/// Strict accessors carry the name of the method that rejected the call so a
/// diagnostic printed by the interpreter points at the offending operation.
/// Clipped drawing paths never produce these; they silently drop writes.
#[derive(Debug, thiserror::Error)]
pub enum EmuError {
    #[error("{context}: pixel ({x}, {y}) out of range")]
    PixelOutOfRange {
        context: &'static str,
        x: i64,
        y: i64,
    },

    #[error("{context}: text position ({col}, {row}) out of range")]
    TextOutOfRange {
        context: &'static str,
        col: i64,
        row: i64,
    },

    #[error("{context}: color index {index} out of range (palette has {len} entries)")]
    ColorOutOfRange {
        context: &'static str,
        index: i64,
        len: usize,
    },

    #[error("set_view: invalid view rectangle ({x1}, {y1})-({x2}, {y2})")]
    InvalidView { x1: i64, y1: i64, x2: i64, y2: i64 },

    #[error("set_window: invalid window rectangle ({wx1}, {wy1})-({wx2}, {wy2})")]
    InvalidWindow { wx1: f64, wy1: f64, wx2: f64, wy2: f64 },

    #[error("scroll_text_up: invalid scroll amount {lines} (valid range 1..={max})")]
    InvalidScroll { lines: i64, max: usize },

    #[error("{context}: invalid image block ({width}x{height}, {len} pixels)")]
    InvalidBlock {
        context: &'static str,
        width: usize,
        height: usize,
        len: usize,
    },

    #[error("unsupported screen mode {mode}")]
    UnsupportedScreenMode { mode: i64 },

    #[error("{context}: byte range {offset}+{length} exceeds VRAM size {size}")]
    OutOfRange {
        context: &'static str,
        offset: usize,
        length: usize,
        size: usize,
    },

    #[error("invalid font data: {0}")]
    BadFont(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Convenience alias for emulator results.
pub type Result<T> = std::result::Result<T, EmuError>;
