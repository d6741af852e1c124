use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::codepage::{CodePage, FontSize, Glyph};
use crate::error::{EmuError, Result};
use crate::framebuffer::Framebuffer;
use crate::input::{InputQueue, KeyCode, KeyEvent, KeyModifiers, MouseState};
use crate::palette::Color;
use crate::scheduler::CancelToken;
use crate::screen::{PaletteKind, ScreenMode};

/// Inclusive clipping rectangle in screen pixels (the VIEW).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipRect {
    pub x1: usize,
    pub y1: usize,
    pub x2: usize,
    pub y2: usize,
}

impl ClipRect {
    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.x1 as i64 && x <= self.x2 as i64 && y >= self.y1 as i64 && y <= self.y2 as i64
    }
}

/// World rectangle mapped onto the current clip rect (the WINDOW).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldWindow {
    pub wx1: f64,
    pub wy1: f64,
    pub wx2: f64,
    pub wy2: f64,
}

/// Raster operation for PUT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlitOp {
    Pset,
    And,
    Or,
    Xor,
}

impl BlitOp {
    fn apply(self, stored: u8, source: u8) -> u8 {
        match self {
            BlitOp::Pset => source,
            BlitOp::And => stored & source,
            BlitOp::Or => stored | source,
            BlitOp::Xor => stored ^ source,
        }
    }
}

/// A rectangle of palette indices captured from the framebuffer (GET/PUT).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBlock {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

/// Tab stops for the HT control code.
const TAB_WIDTH: usize = 8;

/// The IO emulator: framebuffer + palette + code page + text cursor +
/// clip/window + input queue + mouse, with the graphics primitives and the
/// glyph rasterizer on top.
pub struct IoEmulator {
    mode: ScreenMode,
    fb: Framebuffer,
    palette: Vec<Color>,
    codepage: CodePage,
    cursor_col: usize,
    cursor_row: usize,
    fg: u8,
    bg: u8,
    clip: ClipRect,
    window: Option<WorldWindow>,
    input: Arc<InputQueue>,
}

impl Default for IoEmulator {
    fn default() -> Self {
        Self::new()
    }
}

impl IoEmulator {
    /// Power-on state: SCREEN 0 (320x200 EGA, 40x25 text).
    pub fn new() -> Self {
        let mode = ScreenMode {
            mode: 0,
            width: 320,
            height: 200,
            palette: PaletteKind::Ega,
            font: FontSize::F8x8,
        };
        let palette = mode.palette.colors();
        let fg = default_fg(palette.len());
        IoEmulator {
            fb: Framebuffer::new(mode.width, mode.height, 0),
            palette,
            codepage: mode.code_page(),
            cursor_col: 0,
            cursor_row: 0,
            fg,
            bg: 0,
            clip: ClipRect {
                x1: 0,
                y1: 0,
                x2: mode.width - 1,
                y2: mode.height - 1,
            },
            window: None,
            mode,
            input: Arc::new(InputQueue::new()),
        }
    }

    // ------------------------------------------------------------------
    // Mode, palette, host surface
    // ------------------------------------------------------------------

    /// Install SCREEN mode `n`: fresh VRAM, palette and code page, clip and
    /// window reset, cursor home. The input queue persists across modes.
    pub fn load_screen_mode(&mut self, n: i64) -> Result<()> {
        let mode = ScreenMode::lookup(n)?;
        debug!("screen mode {} ({}x{})", n, mode.width, mode.height);
        let double = self.fb.is_double_buffered();
        self.fb = Framebuffer::new(mode.width, mode.height, 0);
        if double {
            self.fb.enable_double_buffer();
        }
        self.palette = mode.palette.colors();
        self.codepage = mode.code_page();
        self.cursor_col = 0;
        self.cursor_row = 0;
        self.fg = default_fg(self.palette.len());
        self.bg = 0;
        self.clip = ClipRect {
            x1: 0,
            y1: 0,
            x2: mode.width - 1,
            y2: mode.height - 1,
        };
        self.window = None;
        self.mode = mode;
        Ok(())
    }

    pub fn mode(&self) -> &ScreenMode {
        &self.mode
    }

    pub fn text_cols(&self) -> usize {
        self.mode.width / self.codepage.width()
    }

    pub fn text_rows(&self) -> usize {
        self.mode.height / self.codepage.height()
    }

    pub fn palette(&self) -> &[Color] {
        &self.palette
    }

    pub fn get_color(&self, index: i64) -> Result<Color> {
        if index < 0 || index as usize >= self.palette.len() {
            return Err(EmuError::ColorOutOfRange {
                context: "get_color",
                index,
                len: self.palette.len(),
            });
        }
        Ok(self.palette[index as usize])
    }

    pub fn set_color(&mut self, index: i64, color: Color) -> Result<()> {
        if index < 0 || index as usize >= self.palette.len() {
            return Err(EmuError::ColorOutOfRange {
                context: "set_color",
                index,
                len: self.palette.len(),
            });
        }
        self.palette[index as usize] = color;
        Ok(())
    }

    /// Replace the active code page (binary font files, see
    /// [`CodePage::parse_font`]).
    pub fn set_code_page(&mut self, page: CodePage) {
        self.codepage = page;
        self.cursor_col = self.cursor_col.min(self.text_cols().saturating_sub(1));
        self.cursor_row = self.cursor_row.min(self.text_rows().saturating_sub(1));
    }

    pub fn code_page(&self) -> &CodePage {
        &self.codepage
    }

    /// The pixels the host presents (front buffer only).
    pub fn frame(&self) -> &[u8] {
        self.fb.front()
    }

    pub fn take_dirty(&mut self) -> bool {
        self.fb.take_dirty()
    }

    pub fn is_dirty(&self) -> bool {
        self.fb.is_dirty()
    }

    pub fn enable_double_buffer(&mut self) {
        self.fb.enable_double_buffer();
    }

    pub fn swap(&mut self) {
        self.fb.swap();
    }

    pub fn is_double_buffered(&self) -> bool {
        self.fb.is_double_buffered()
    }

    // ------------------------------------------------------------------
    // Colors and cursor
    // ------------------------------------------------------------------

    pub fn foreground(&self) -> u8 {
        self.fg
    }

    pub fn background(&self) -> u8 {
        self.bg
    }

    pub fn set_colors(&mut self, fg: i64, bg: Option<i64>) -> Result<()> {
        if fg < 0 || fg as usize >= self.palette.len() {
            return Err(EmuError::ColorOutOfRange {
                context: "set_colors",
                index: fg,
                len: self.palette.len(),
            });
        }
        if let Some(bg) = bg {
            if bg < 0 || bg as usize >= self.palette.len() {
                return Err(EmuError::ColorOutOfRange {
                    context: "set_colors",
                    index: bg,
                    len: self.palette.len(),
                });
            }
            self.bg = bg as u8;
        }
        self.fg = fg as u8;
        Ok(())
    }

    pub fn cursor(&self) -> (usize, usize) {
        (self.cursor_col, self.cursor_row)
    }

    pub fn locate_cursor(&mut self, col: i64, row: i64) -> Result<()> {
        if col < 0 || row < 0 || col as usize >= self.text_cols() || row as usize >= self.text_rows()
        {
            return Err(EmuError::TextOutOfRange {
                context: "locate_cursor",
                col,
                row,
            });
        }
        self.cursor_col = col as usize;
        self.cursor_row = row as usize;
        Ok(())
    }

    /// Clear the whole surface to the background and home the cursor.
    pub fn cls(&mut self) {
        self.fb.clear(self.bg);
        self.cursor_col = 0;
        self.cursor_row = 0;
    }

    // ------------------------------------------------------------------
    // Text overlay
    // ------------------------------------------------------------------

    /// Print one character code at the cursor, handling the control codes
    /// the way the BIOS teletype output does.
    pub fn put_char(&mut self, code: u8) {
        match code {
            0x07 => {} // BEL: the overlay has no speaker
            0x08 => {
                // Backspace moves the cursor; it does not erase.
                self.cursor_col = self.cursor_col.saturating_sub(1);
            }
            0x09 => {
                let next = (self.cursor_col / TAB_WIDTH + 1) * TAB_WIDTH;
                if next >= self.text_cols() {
                    self.cursor_col = 0;
                    self.advance_row();
                } else {
                    self.cursor_col = next;
                }
            }
            0x0A => {
                self.advance_row();
            }
            0x0D => {
                self.cursor_col = 0;
            }
            _ => {
                let (cw, ch) = (self.codepage.width(), self.codepage.height());
                let glyph = self.codepage.glyph(code).clone();
                let x0 = (self.cursor_col * cw) as i64;
                let y0 = (self.cursor_row * ch) as i64;
                self.draw_glyph(&glyph, x0, y0, self.fg, self.bg);
                self.cursor_col += 1;
                if self.cursor_col >= self.text_cols() {
                    self.cursor_col = 0;
                    self.advance_row();
                }
            }
        }
    }

    fn advance_row(&mut self) {
        self.cursor_row += 1;
        if self.cursor_row >= self.text_rows() {
            self.cursor_row = self.text_rows() - 1;
            // Scrolling a freshly-loaded 0-row grid cannot happen: every
            // mode in the table has at least one text row.
            let _ = self.scroll_text_up(1);
        }
    }

    pub fn put_string(&mut self, s: &str) {
        for ch in s.chars() {
            let code = if (ch as u32) < 256 { ch as u32 as u8 } else { b'?' };
            self.put_char(code);
        }
    }

    /// Shift the text surface up by `lines` cell heights, filling the bottom
    /// band with the background index. Ignores the clip.
    pub fn scroll_text_up(&mut self, lines: i64) -> Result<()> {
        if lines < 1 || lines as usize > self.text_rows() {
            return Err(EmuError::InvalidScroll {
                lines,
                max: self.text_rows(),
            });
        }
        let band = lines as usize * self.codepage.height() * self.mode.width;
        let total = self.fb.byte_len();
        let kept = self.fb.read_bytes(band, total - band)?;
        self.fb.write_bytes(0, &kept)?;
        self.fb.write_bytes(total - band, &vec![self.bg; band])?;
        Ok(())
    }

    /// Compose a glyph into a text cell without touching the cursor.
    pub fn write_text_at(
        &mut self,
        col: i64,
        row: i64,
        code: u8,
        fg: Option<u8>,
        bg: Option<u8>,
    ) -> Result<()> {
        if col < 0 || row < 0 || col as usize >= self.text_cols() || row as usize >= self.text_rows()
        {
            return Err(EmuError::TextOutOfRange {
                context: "write_text_at",
                col,
                row,
            });
        }
        let (cw, ch) = (self.codepage.width(), self.codepage.height());
        let glyph = self.codepage.glyph(code).clone();
        let x0 = col * cw as i64;
        let y0 = row * ch as i64;
        self.draw_glyph(&glyph, x0, y0, fg.unwrap_or(self.fg), bg.unwrap_or(self.bg));
        Ok(())
    }

    /// Rasterize a glyph at pixel (x0, y0) through the clipped writer:
    /// foreground where the bitmap is set, background elsewhere.
    pub fn draw_glyph(&mut self, glyph: &Glyph, x0: i64, y0: i64, fg: u8, bg: u8) {
        for y in 0..glyph.height {
            for x in 0..glyph.width {
                let index = if glyph.pixel(x, y) != 0 { fg } else { bg };
                self.write_pixel_clipped(x0 + x as i64, y0 + y as i64, index);
            }
        }
    }

    // ------------------------------------------------------------------
    // Pixels and primitives
    // ------------------------------------------------------------------

    /// Write that silently drops anything outside the clip or the surface.
    pub fn write_pixel_clipped(&mut self, x: i64, y: i64, index: u8) {
        if self.clip.contains(x, y) {
            self.fb.write_bounded(x, y, index);
        }
    }

    /// Read that returns the background index outside the clip or surface.
    pub fn read_pixel_clipped(&self, x: i64, y: i64) -> u8 {
        if self.clip.contains(x, y) {
            self.fb.read_bounded(x, y).unwrap_or(self.bg)
        } else {
            self.bg
        }
    }

    /// Strict accessors: fail on out-of-range coordinates.
    pub fn read_pixel_at(&self, x: i64, y: i64) -> Result<u8> {
        self.fb.read_at(x, y)
    }

    pub fn write_pixel_at(&mut self, x: i64, y: i64, index: u8) -> Result<()> {
        self.fb.write_at(x, y, index)
    }

    /// VRAM as a linear byte stream.
    pub fn read_vram(&self, offset: usize, length: usize) -> Result<Vec<u8>> {
        self.fb.read_bytes(offset, length)
    }

    pub fn write_vram(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.fb.write_bytes(offset, data)
    }

    pub fn vram_len(&self) -> usize {
        self.fb.byte_len()
    }

    /// PSET: one clipped pixel, world-mapped when a WINDOW is active.
    pub fn pset(&mut self, x: i64, y: i64, index: u8) {
        let (sx, sy) = self.map_point(x, y);
        self.write_pixel_clipped(sx, sy, index);
    }

    /// POINT: the stored index, or the background outside clip/bounds.
    pub fn point(&self, x: i64, y: i64) -> u8 {
        let (sx, sy) = self.map_point(x, y);
        self.read_pixel_clipped(sx, sy)
    }

    /// Integer Bresenham, endpoints inclusive, every write clipped.
    pub fn line(&mut self, x1: i64, y1: i64, x2: i64, y2: i64, index: u8) {
        let (mut x, mut y) = self.map_point(x1, y1);
        let (ex, ey) = self.map_point(x2, y2);

        let dx = (ex - x).abs();
        let dy = -(ey - y).abs();
        let sx = if x < ex { 1 } else { -1 };
        let sy = if y < ey { 1 } else { -1 };
        let mut err = dx + dy;

        loop {
            self.write_pixel_clipped(x, y, index);
            if x == ex && y == ey {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    // ------------------------------------------------------------------
    // Block operations (GET/PUT)
    // ------------------------------------------------------------------

    /// Capture a rectangle of indices. Source cells outside the surface are
    /// recorded as index 0.
    pub fn get_block(&self, x: i64, y: i64, width: usize, height: usize) -> Result<ImageBlock> {
        if width == 0 || height == 0 {
            return Err(EmuError::InvalidBlock {
                context: "get_block",
                width,
                height,
                len: 0,
            });
        }
        let mut pixels = Vec::with_capacity(width * height);
        for dy in 0..height {
            for dx in 0..width {
                pixels.push(
                    self.fb
                        .read_bounded(x + dx as i64, y + dy as i64)
                        .unwrap_or(0),
                );
            }
        }
        Ok(ImageBlock {
            width,
            height,
            pixels,
        })
    }

    /// Blit a captured block. Every write respects the clip; destination
    /// cells outside the surface are skipped.
    pub fn put_block(&mut self, x: i64, y: i64, block: &ImageBlock, op: BlitOp) -> Result<()> {
        if block.width == 0 || block.height == 0 || block.pixels.len() != block.width * block.height
        {
            return Err(EmuError::InvalidBlock {
                context: "put_block",
                width: block.width,
                height: block.height,
                len: block.pixels.len(),
            });
        }
        for dy in 0..block.height {
            for dx in 0..block.width {
                let tx = x + dx as i64;
                let ty = y + dy as i64;
                if !self.clip.contains(tx, ty) {
                    continue;
                }
                let Some(stored) = self.fb.read_bounded(tx, ty) else {
                    continue;
                };
                let source = block.pixels[dy * block.width + dx];
                self.fb.write_bounded(tx, ty, op.apply(stored, source));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // VIEW and WINDOW
    // ------------------------------------------------------------------

    /// Set the clip rectangle, clamped to the surface.
    pub fn set_view(&mut self, x1: i64, y1: i64, x2: i64, y2: i64) -> Result<()> {
        if x2 < x1 || y2 < y1 {
            return Err(EmuError::InvalidView { x1, y1, x2, y2 });
        }
        let w = self.mode.width as i64;
        let h = self.mode.height as i64;
        self.clip = ClipRect {
            x1: x1.clamp(0, w - 1) as usize,
            y1: y1.clamp(0, h - 1) as usize,
            x2: x2.clamp(0, w - 1) as usize,
            y2: y2.clamp(0, h - 1) as usize,
        };
        Ok(())
    }

    pub fn reset_view(&mut self) {
        self.clip = ClipRect {
            x1: 0,
            y1: 0,
            x2: self.mode.width - 1,
            y2: self.mode.height - 1,
        };
    }

    pub fn view(&self) -> ClipRect {
        self.clip
    }

    /// Enable the world-to-screen mapping onto the current clip rect.
    pub fn set_window(&mut self, wx1: f64, wy1: f64, wx2: f64, wy2: f64) -> Result<()> {
        if wx1 == wx2 || wy1 == wy2 {
            return Err(EmuError::InvalidWindow { wx1, wy1, wx2, wy2 });
        }
        self.window = Some(WorldWindow { wx1, wy1, wx2, wy2 });
        Ok(())
    }

    pub fn reset_window(&mut self) {
        self.window = None;
    }

    /// Map world coordinates onto the clip rect; identity when no window is
    /// active.
    pub fn world_to_screen(&self, x: f64, y: f64) -> (i64, i64) {
        match self.window {
            None => (x.round() as i64, y.round() as i64),
            Some(w) => {
                let u = (x - w.wx1) / (w.wx2 - w.wx1);
                let v = (y - w.wy1) / (w.wy2 - w.wy1);
                let sx = self.clip.x1 as f64 + u * (self.clip.x2 - self.clip.x1) as f64;
                let sy = self.clip.y1 as f64 + v * (self.clip.y2 - self.clip.y1) as f64;
                (sx.round() as i64, sy.round() as i64)
            }
        }
    }

    fn map_point(&self, x: i64, y: i64) -> (i64, i64) {
        if self.window.is_some() {
            self.world_to_screen(x as f64, y as f64)
        } else {
            (x, y)
        }
    }

    // ------------------------------------------------------------------
    // BSAVE / BLOAD
    // ------------------------------------------------------------------

    /// Dump `length` bytes of VRAM starting at `offset` to a raw file.
    pub fn bsave(&self, path: &Path, offset: usize, length: usize) -> Result<()> {
        let data = self.fb.read_bytes(offset, length)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Load a raw byte image into VRAM at `offset`.
    pub fn bload(&mut self, path: &Path, offset: usize) -> Result<()> {
        let data = std::fs::read(path)?;
        self.fb.write_bytes(offset, &data)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Input facade
    // ------------------------------------------------------------------

    /// Shared handle for the host side (event producer).
    pub fn input(&self) -> Arc<InputQueue> {
        Arc::clone(&self.input)
    }

    pub fn inject_key(&self, event: KeyEvent) {
        self.input.inject(event);
    }

    pub fn try_read_key(&self) -> Option<KeyEvent> {
        self.input.try_pop()
    }

    /// Block until a key arrives or the token fires.
    pub fn wait_for_key(&self, cancel: &CancelToken) -> Result<KeyEvent> {
        loop {
            cancel.check()?;
            if let Some(ev) = self.input.pop_timeout(Duration::from_millis(10)) {
                return Ok(ev);
            }
        }
    }

    pub fn is_key_down(&self, code: KeyCode) -> bool {
        self.input.is_down(code)
    }

    /// Modifier state carried on the most recent key event.
    pub fn input_modifiers(&self) -> KeyModifiers {
        self.input.modifiers()
    }

    pub fn set_mouse_state(&self, x: i64, y: i64, left: bool, right: bool, middle: bool) {
        self.input.set_mouse_state(MouseState {
            x,
            y,
            left,
            right,
            middle,
        });
    }

    pub fn mouse(&self) -> MouseState {
        self.input.mouse()
    }
}

fn default_fg(palette_len: usize) -> u8 {
    // Light gray on EGA/VGA, the brightest entry on smaller palettes.
    7u8.min(palette_len.saturating_sub(1) as u8)
}
