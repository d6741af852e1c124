use crate::error::{EmuError, Result};

/// Palette-indexed VRAM: one byte per pixel, row-major.
///
/// The host observes the front buffer through [`Framebuffer::front`] and the
/// dirty flag; when double buffering is enabled all mutations land in the
/// back buffer and become visible only at [`Framebuffer::swap`].
pub struct Framebuffer {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
    back: Option<Vec<u8>>,
    dirty: bool,
}

impl Framebuffer {
    pub fn new(width: usize, height: usize, bg: u8) -> Self {
        Framebuffer {
            width,
            height,
            pixels: vec![bg; width * height],
            back: None,
            dirty: true,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// VRAM size in bytes (one byte per pixel).
    pub fn byte_len(&self) -> usize {
        self.width * self.height
    }

    /// The buffer the host presents. Never the in-progress back buffer.
    pub fn front(&self) -> &[u8] {
        &self.pixels
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Read-then-reset for the host present loop.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    pub fn is_double_buffered(&self) -> bool {
        self.back.is_some()
    }

    /// Enable double buffering. The back buffer starts as a copy of the
    /// current front so drawing continues from the visible frame.
    pub fn enable_double_buffer(&mut self) {
        if self.back.is_none() {
            self.back = Some(self.pixels.clone());
        }
    }

    /// Promote the back buffer to front and allocate a fresh back buffer.
    /// No-op when double buffering is off.
    pub fn swap(&mut self) {
        if let Some(back) = self.back.take() {
            let size = back.len();
            self.pixels = back;
            self.back = Some(vec![0; size]);
            self.dirty = true;
        }
    }

    /// The buffer mutations should target.
    fn buf_mut(&mut self) -> &mut Vec<u8> {
        self.back.as_mut().unwrap_or(&mut self.pixels)
    }

    /// The buffer reads (POINT, GET) should observe.
    fn buf(&self) -> &Vec<u8> {
        self.back.as_ref().unwrap_or(&self.pixels)
    }

    /// Fill the whole surface, ignoring any clip.
    pub fn clear(&mut self, bg: u8) {
        self.buf_mut().fill(bg);
        self.dirty = true;
    }

    fn offset(&self, context: &'static str, x: i64, y: i64) -> Result<usize> {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return Err(EmuError::PixelOutOfRange { context, x, y });
        }
        Ok(y as usize * self.width + x as usize)
    }

    /// Strict read: fails outside the surface.
    pub fn read_at(&self, x: i64, y: i64) -> Result<u8> {
        let off = self.offset("read_pixel_at", x, y)?;
        Ok(self.buf()[off])
    }

    /// Strict write: fails outside the surface.
    pub fn write_at(&mut self, x: i64, y: i64, index: u8) -> Result<()> {
        let off = self.offset("write_pixel_at", x, y)?;
        self.buf_mut()[off] = index;
        self.dirty = true;
        Ok(())
    }

    /// Bounds-checked write that silently drops out-of-range pixels.
    /// Returns true when a pixel was stored.
    pub fn write_bounded(&mut self, x: i64, y: i64, index: u8) -> bool {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return false;
        }
        let off = y as usize * self.width + x as usize;
        self.buf_mut()[off] = index;
        self.dirty = true;
        true
    }

    /// Bounds-checked read; None outside the surface.
    pub fn read_bounded(&self, x: i64, y: i64) -> Option<u8> {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return None;
        }
        Some(self.buf()[y as usize * self.width + x as usize])
    }

    /// Linear byte view: contiguous copy of `length` bytes at `offset`.
    pub fn read_bytes(&self, offset: usize, length: usize) -> Result<Vec<u8>> {
        if offset + length > self.byte_len() {
            return Err(EmuError::OutOfRange {
                context: "read_bytes",
                offset,
                length,
                size: self.byte_len(),
            });
        }
        Ok(self.buf()[offset..offset + length].to_vec())
    }

    /// Linear byte view write.
    pub fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        if offset + data.len() > self.byte_len() {
            return Err(EmuError::OutOfRange {
                context: "write_bytes",
                offset,
                length: data.len(),
                size: self.byte_len(),
            });
        }
        self.buf_mut()[offset..offset + data.len()].copy_from_slice(data);
        self.dirty = true;
        Ok(())
    }
}
