use font8x8::{BASIC_FONTS, UnicodeFonts};

use crate::error::{EmuError, Result};

/// Built-in font cell sizes used by the screen mode table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontSize {
    F8x8,
    F8x16,
}

impl FontSize {
    pub fn cell(self) -> (usize, usize) {
        match self {
            FontSize::F8x8 => (8, 8),
            FontSize::F8x16 => (8, 16),
        }
    }

    pub fn builtin(self) -> CodePage {
        match self {
            FontSize::F8x8 => CodePage::builtin_8x8(),
            FontSize::F8x16 => CodePage::builtin_8x16(),
        }
    }
}

/// A fixed-size character bitmap: one byte per pixel, 0 = background,
/// 1 = foreground, laid out row-major. `bitmap.len() == width * height`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Glyph {
    pub width: usize,
    pub height: usize,
    pub bitmap: Vec<u8>,
}

impl Glyph {
    pub fn blank(width: usize, height: usize) -> Self {
        Glyph {
            width,
            height,
            bitmap: vec![0; width * height],
        }
    }

    /// Pixel at (x, y) within the glyph cell. 0 outside the cell.
    pub fn pixel(&self, x: usize, y: usize) -> u8 {
        if x < self.width && y < self.height {
            self.bitmap[y * self.width + x]
        } else {
            0
        }
    }
}

/// An ordered table of exactly 256 glyphs sharing one cell size.
#[derive(Debug, Clone)]
pub struct CodePage {
    width: usize,
    height: usize,
    glyphs: Vec<Glyph>,
}

/// Header paddings probed when parsing a binary font stream.
const FONT_HEADER_PADDINGS: [usize; 11] = [0, 6, 8, 12, 14, 16, 18, 20, 24, 28, 32];

impl CodePage {
    /// Build a page from up to 256 glyphs; short tables are padded with
    /// blanks, long ones clipped.
    pub fn new(width: usize, height: usize, mut glyphs: Vec<Glyph>) -> Result<CodePage> {
        if width == 0 || height == 0 {
            return Err(EmuError::BadFont(format!(
                "glyph cell {}x{} is empty",
                width, height
            )));
        }
        for g in &glyphs {
            if g.width != width || g.height != height || g.bitmap.len() != width * height {
                return Err(EmuError::BadFont(format!(
                    "glyph size mismatch: expected {}x{}, got {}x{} ({} bytes)",
                    width,
                    height,
                    g.width,
                    g.height,
                    g.bitmap.len()
                )));
            }
        }
        glyphs.truncate(256);
        while glyphs.len() < 256 {
            glyphs.push(Glyph::blank(width, height));
        }
        Ok(CodePage {
            width,
            height,
            glyphs,
        })
    }

    /// The stock 8x8 page, built from the font8x8 tables. Codes past 0x7F
    /// have no bitmap there and come out blank.
    pub fn builtin_8x8() -> CodePage {
        let mut glyphs = Vec::with_capacity(256);
        for code in 0..256u32 {
            let glyph = match char::from_u32(code).and_then(|ch| BASIC_FONTS.get(ch)) {
                Some(rows) => {
                    let mut bitmap = Vec::with_capacity(64);
                    for row in rows {
                        for x in 0..8 {
                            bitmap.push((row >> x) & 1);
                        }
                    }
                    Glyph {
                        width: 8,
                        height: 8,
                        bitmap,
                    }
                }
                None => Glyph::blank(8, 8),
            };
            glyphs.push(glyph);
        }
        CodePage {
            width: 8,
            height: 8,
            glyphs,
        }
    }

    /// The 8x16 page: every 8x8 row doubled vertically, the same stretch the
    /// text renderer applies to fill tall cells.
    pub fn builtin_8x16() -> CodePage {
        let base = CodePage::builtin_8x8();
        let glyphs = base
            .glyphs
            .iter()
            .map(|g| {
                let mut bitmap = Vec::with_capacity(128);
                for y in 0..8 {
                    let row = &g.bitmap[y * 8..y * 8 + 8];
                    bitmap.extend_from_slice(row);
                    bitmap.extend_from_slice(row);
                }
                Glyph {
                    width: 8,
                    height: 16,
                    bitmap,
                }
            })
            .collect();
        CodePage {
            width: 8,
            height: 16,
            glyphs,
        }
    }

    /// Parse a binary font stream.
    ///
    /// Layout: byte width, byte height, an unknown header padding (one of a
    /// small set of observed sizes), then contiguous glyphs of
    /// ceil(width/8) * height bytes each, bit 7 = leftmost pixel. The padding
    /// is probed so that the remaining stream is a whole number of glyphs in
    /// the 128..=1024 range; a truncated payload is accepted by flooring the
    /// glyph count.
    pub fn parse_font(data: &[u8]) -> Result<CodePage> {
        if data.len() < 2 {
            return Err(EmuError::BadFont("font stream shorter than header".into()));
        }
        let width = data[0] as usize;
        let height = data[1] as usize;
        if width == 0 || width > 32 || height == 0 || height > 64 {
            return Err(EmuError::BadFont(format!(
                "implausible glyph cell {}x{}",
                width, height
            )));
        }
        let row_bytes = width.div_ceil(8);
        let glyph_bytes = row_bytes * height;
        let body = &data[2..];

        let mut chosen: Option<(usize, usize)> = None; // (padding, glyph count)
        for pad in FONT_HEADER_PADDINGS {
            if pad > body.len() {
                break;
            }
            let remaining = body.len() - pad;
            let count = remaining / glyph_bytes;
            if remaining % glyph_bytes == 0 && (128..=1024).contains(&count) {
                chosen = Some((pad, count));
                break;
            }
        }
        if chosen.is_none() {
            // Truncated payload: floor the glyph count instead.
            for pad in FONT_HEADER_PADDINGS {
                if pad > body.len() {
                    break;
                }
                let count = (body.len() - pad) / glyph_bytes;
                if (128..=1024).contains(&count) {
                    chosen = Some((pad, count));
                    break;
                }
            }
        }
        let (pad, count) = chosen.ok_or_else(|| {
            EmuError::BadFont(format!(
                "no header padding yields 128..=1024 glyphs of {} bytes",
                glyph_bytes
            ))
        })?;

        let mut glyphs = Vec::with_capacity(count.min(256));
        for i in 0..count.min(256) {
            let start = pad + i * glyph_bytes;
            let mut bitmap = Vec::with_capacity(width * height);
            for y in 0..height {
                let row = &body[start + y * row_bytes..start + (y + 1) * row_bytes];
                for x in 0..width {
                    let byte = row[x / 8];
                    let bit = 7 - (x % 8);
                    bitmap.push((byte >> bit) & 1);
                }
            }
            glyphs.push(Glyph {
                width,
                height,
                bitmap,
            });
        }
        CodePage::new(width, height, glyphs)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn glyph(&self, code: u8) -> &Glyph {
        &self.glyphs[code as usize]
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_page_has_256_uniform_glyphs() {
        let page = CodePage::builtin_8x8();
        assert_eq!(page.len(), 256);
        for code in 0..=255u8 {
            let g = page.glyph(code);
            assert_eq!((g.width, g.height), (8, 8));
            assert_eq!(g.bitmap.len(), 64);
        }
        // 'A' must have some lit pixels, code 0 must be blank.
        assert!(page.glyph(b'A').bitmap.iter().any(|&p| p == 1));
        assert!(page.glyph(0).bitmap.iter().all(|&p| p == 0));
    }

    #[test]
    fn tall_page_doubles_rows() {
        let short = CodePage::builtin_8x8();
        let tall = CodePage::builtin_8x16();
        let a8 = short.glyph(b'A');
        let a16 = tall.glyph(b'A');
        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(a8.pixel(x, y), a16.pixel(x, 2 * y));
                assert_eq!(a8.pixel(x, y), a16.pixel(x, 2 * y + 1));
            }
        }
    }
}
