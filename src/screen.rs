use crate::codepage::{CodePage, FontSize};
use crate::error::{EmuError, Result};
use crate::palette::{self, Color};

/// Which fixed palette a screen mode uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaletteKind {
    Cga,
    Ega,
    Vga,
}

impl PaletteKind {
    pub fn colors(self) -> Vec<Color> {
        match self {
            PaletteKind::Cga => palette::cga(),
            PaletteKind::Ega => palette::ega(),
            PaletteKind::Vga => palette::vga(),
        }
    }
}

/// A QBASIC SCREEN mode: resolution, palette and font cell.
///
/// The text grid is implied by resolution / glyph cell in every mode
/// (mode 0: 320x200 with an 8x8 font = the classic 40x25 grid).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenMode {
    pub mode: u8,
    pub width: usize,
    pub height: usize,
    pub palette: PaletteKind,
    pub font: FontSize,
}

impl ScreenMode {
    /// Look up a mode number in the SCREEN table.
    pub fn lookup(mode: i64) -> Result<ScreenMode> {
        let (width, height, palette, font) = match mode {
            0 | 1 | 3 | 5 | 7 => (320, 200, PaletteKind::Ega, FontSize::F8x8),
            2 | 4 | 6 | 8 => (640, 200, PaletteKind::Ega, FontSize::F8x8),
            9 | 10 => (640, 350, PaletteKind::Ega, FontSize::F8x16),
            11 | 12 => (640, 480, PaletteKind::Ega, FontSize::F8x16),
            13 => (320, 200, PaletteKind::Vga, FontSize::F8x8),
            _ => return Err(EmuError::UnsupportedScreenMode { mode }),
        };
        Ok(ScreenMode {
            mode: mode as u8,
            width,
            height,
            palette,
            font,
        })
    }

    pub fn code_page(&self) -> CodePage {
        self.font.builtin()
    }

    pub fn text_cols(&self) -> usize {
        self.width / self.font.cell().0
    }

    pub fn text_rows(&self) -> usize {
        self.height / self.font.cell().1
    }
}
