use rust_basic::emulator::{BlitOp, IoEmulator};
use rust_basic::error::EmuError;

fn emu_mode(mode: i64) -> IoEmulator {
    let mut emu = IoEmulator::new();
    emu.load_screen_mode(mode).unwrap();
    emu
}

// ----------------------------------------------------------------------
// Modes, palette, colors
// ----------------------------------------------------------------------

#[test]
fn test_mode_change_resets_surface_state() {
    let mut emu = emu_mode(13);
    emu.set_view(10, 10, 20, 20).unwrap();
    emu.set_window(0.0, 0.0, 100.0, 100.0).unwrap();
    emu.pset(15, 15, 7);
    emu.locate_cursor(5, 5).unwrap();

    emu.load_screen_mode(2).unwrap();
    assert_eq!((emu.mode().width, emu.mode().height), (640, 200));
    assert_eq!(emu.cursor(), (0, 0));
    let clip = emu.view();
    assert_eq!((clip.x1, clip.y1, clip.x2, clip.y2), (0, 0, 639, 199));
    // The new VRAM starts blank.
    assert!(emu.frame().iter().all(|&p| p == 0));
    // Identity mapping again: the window is gone.
    assert_eq!(emu.world_to_screen(50.0, 50.0), (50, 50));
}

#[test]
fn test_unsupported_mode_is_rejected() {
    let mut emu = IoEmulator::new();
    assert!(matches!(
        emu.load_screen_mode(99),
        Err(EmuError::UnsupportedScreenMode { mode: 99 })
    ));
}

#[test]
fn test_color_accessors_bounds() {
    let mut emu = emu_mode(0); // EGA: 16 entries
    assert!(emu.get_color(15).is_ok());
    assert!(matches!(
        emu.get_color(16),
        Err(EmuError::ColorOutOfRange { index: 16, .. })
    ));
    assert!(matches!(
        emu.set_colors(3, Some(16)),
        Err(EmuError::ColorOutOfRange { .. })
    ));
    emu.set_colors(14, Some(1)).unwrap();
    assert_eq!((emu.foreground(), emu.background()), (14, 1));
}

// ----------------------------------------------------------------------
// Text overlay
// ----------------------------------------------------------------------

#[test]
fn test_locate_rejects_out_of_grid() {
    let mut emu = emu_mode(0); // 40x25 text
    emu.locate_cursor(39, 24).unwrap();
    assert!(matches!(
        emu.locate_cursor(40, 0),
        Err(EmuError::TextOutOfRange { .. })
    ));
    assert!(matches!(
        emu.locate_cursor(0, 25),
        Err(EmuError::TextOutOfRange { .. })
    ));
}

#[test]
fn test_put_char_control_codes() {
    let mut emu = emu_mode(0);

    // BEL is a no-op on the overlay.
    emu.put_char(7);
    assert_eq!(emu.cursor(), (0, 0));

    emu.put_string("AB");
    assert_eq!(emu.cursor(), (2, 0));

    // Backspace moves left without erasing.
    emu.put_char(8);
    assert_eq!(emu.cursor(), (1, 0));
    emu.put_char(8);
    emu.put_char(8);
    assert_eq!(emu.cursor(), (0, 0), "backspace clamps at column 0");

    // Tab advances to the next multiple of 8.
    emu.put_char(9);
    assert_eq!(emu.cursor(), (8, 0));
    emu.put_char(9);
    assert_eq!(emu.cursor(), (16, 0));

    // CR returns to column 0; LF moves down one row.
    emu.put_char(13);
    assert_eq!(emu.cursor(), (0, 0));
    emu.put_char(10);
    assert_eq!(emu.cursor(), (0, 1));
}

#[test]
fn test_put_char_wraps_and_scrolls() {
    let mut emu = emu_mode(0); // 40 cols

    emu.locate_cursor(39, 0).unwrap();
    emu.put_char(b'X');
    assert_eq!(emu.cursor(), (0, 1), "printing in the last column wraps");

    // LF on the bottom row scrolls instead of leaving the grid.
    emu.locate_cursor(0, 24).unwrap();
    emu.put_char(10);
    assert_eq!(emu.cursor(), (0, 24));
}

#[test]
fn test_glyph_lands_in_the_right_cell() {
    let mut emu = emu_mode(0);
    emu.set_colors(15, Some(0)).unwrap();
    emu.write_text_at(2, 1, b'A', None, None).unwrap();

    // Cell (2,1) covers pixels x 16..24, y 8..16. 'A' must light some
    // foreground pixels there and nothing outside stays lit.
    let mut lit = 0;
    for y in 8..16 {
        for x in 16..24 {
            if emu.read_pixel_at(x, y).unwrap() == 15 {
                lit += 1;
            }
        }
    }
    assert!(lit > 0, "glyph body must be rendered in its cell");

    assert!(matches!(
        emu.write_text_at(40, 0, b'A', None, None),
        Err(EmuError::TextOutOfRange { .. })
    ));
}

#[test]
fn test_scroll_text_up_fills_bottom_with_background() {
    let mut emu = emu_mode(0);
    emu.set_colors(15, Some(3)).unwrap();

    // Paint a glyph on the bottom row, then scroll it away.
    emu.write_text_at(0, 24, b'M', None, None).unwrap();
    emu.scroll_text_up(1).unwrap();

    // The bottom cell row (pixels y 192..200) is now pure background.
    for y in 192..200 {
        for x in 0..320 {
            assert_eq!(
                emu.read_pixel_at(x, y).unwrap(),
                3,
                "scrolled-in band must be background at ({}, {})",
                x,
                y
            );
        }
    }
    // The glyph moved up one cell row.
    let moved: usize = (184..192)
        .flat_map(|y| (0..8).map(move |x| (x, y)))
        .filter(|&(x, y)| emu.read_pixel_at(x, y).unwrap() == 15)
        .count();
    assert!(moved > 0, "scroll must move pixel rows up");

    assert!(matches!(
        emu.scroll_text_up(0),
        Err(EmuError::InvalidScroll { lines: 0, .. })
    ));
    assert!(matches!(
        emu.scroll_text_up(26),
        Err(EmuError::InvalidScroll { .. })
    ));
}

// ----------------------------------------------------------------------
// Pixels, clipping, window
// ----------------------------------------------------------------------

#[test]
fn test_pset_point_respect_clip() {
    let mut emu = emu_mode(13);
    emu.set_view(8, 8, 15, 15).unwrap();

    emu.pset(10, 10, 4);
    assert_eq!(emu.point(10, 10), 4);
    assert_eq!(emu.read_pixel_at(10, 10).unwrap(), 4);

    // Outside the view nothing is written, and POINT reads background.
    emu.pset(2, 2, 4);
    assert_eq!(emu.read_pixel_at(2, 2).unwrap(), 0);
    assert_eq!(emu.point(2, 2), 0);
}

#[test]
fn test_view_is_clamped_and_validated() {
    let mut emu = emu_mode(13);
    assert!(matches!(
        emu.set_view(10, 10, 5, 20),
        Err(EmuError::InvalidView { .. })
    ));
    // Oversized views clamp to the surface.
    emu.set_view(-5, -5, 999, 999).unwrap();
    let clip = emu.view();
    assert_eq!((clip.x1, clip.y1, clip.x2, clip.y2), (0, 0, 319, 199));
}

#[test]
fn test_window_maps_world_corners_onto_view() {
    let mut emu = emu_mode(13);
    emu.set_view(8, 8, 15, 15).unwrap();
    emu.set_window(0.0, 0.0, 100.0, 100.0).unwrap();

    // World corners land on the clip corners (within rounding).
    assert_eq!(emu.world_to_screen(0.0, 0.0), (8, 8));
    assert_eq!(emu.world_to_screen(100.0, 100.0), (15, 15));

    // PSET in world space draws inside the view.
    emu.pset(0, 0, 9);
    assert_eq!(emu.read_pixel_at(8, 8).unwrap(), 9);

    assert!(matches!(
        emu.set_window(5.0, 0.0, 5.0, 10.0),
        Err(EmuError::InvalidWindow { .. })
    ));

    emu.reset_window();
    assert_eq!(emu.world_to_screen(3.0, 4.0), (3, 4));
}

#[test]
fn test_line_draws_bresenham_diagonal() {
    let mut emu = emu_mode(13);
    emu.line(0, 0, 10, 10, 15);

    // The perfect diagonal visits (i, i) for every step, inclusive.
    for i in 0..=10 {
        assert_eq!(
            emu.read_pixel_at(i, i).unwrap(),
            15,
            "diagonal pixel ({}, {}) missing",
            i,
            i
        );
    }
    assert_eq!(emu.read_pixel_at(5, 6).unwrap(), 0);
}

#[test]
fn test_line_is_clipped_by_view() {
    let mut emu = emu_mode(13);
    emu.set_view(8, 8, 15, 15).unwrap();
    emu.line(0, 0, 31, 31, 2);

    assert_eq!(emu.read_pixel_at(2, 2).unwrap(), 0, "outside the view");
    assert_eq!(emu.read_pixel_at(10, 10).unwrap(), 2, "inside the view");
    assert_eq!(emu.read_pixel_at(20, 20).unwrap(), 0, "past the view");
}

#[test]
fn test_line_endpoint_order_does_not_matter() {
    let mut a = emu_mode(13);
    let mut b = emu_mode(13);
    a.line(2, 9, 17, 3, 5);
    b.line(17, 3, 2, 9, 5);
    for y in 0..200 {
        for x in 0..320 {
            assert_eq!(
                a.read_pixel_at(x, y).unwrap(),
                b.read_pixel_at(x, y).unwrap(),
                "mismatch at ({}, {})",
                x,
                y
            );
        }
    }
}

// ----------------------------------------------------------------------
// Block operations
// ----------------------------------------------------------------------

#[test]
fn test_get_put_pset_round_trip() {
    let mut emu = emu_mode(13);
    emu.pset(4, 4, 1);
    emu.pset(5, 5, 2);
    emu.pset(6, 6, 3);

    let block = emu.get_block(4, 4, 3, 3).unwrap();
    let before: Vec<u8> = emu.frame().to_vec();

    emu.put_block(4, 4, &block, BlitOp::Pset).unwrap();
    assert_eq!(emu.frame(), &before[..], "GET then PUT PSET is identity");
}

#[test]
fn test_put_xor_twice_is_identity() {
    let mut emu = emu_mode(13);
    emu.line(0, 0, 7, 7, 9);
    let before: Vec<u8> = emu.frame().to_vec();
    let block = emu.get_block(0, 0, 8, 8).unwrap();

    emu.put_block(0, 0, &block, BlitOp::Xor).unwrap();
    // XOR with itself zeroes the captured diagonal.
    assert_eq!(emu.read_pixel_at(0, 0).unwrap(), 0);
    assert_eq!(emu.read_pixel_at(7, 7).unwrap(), 0);

    emu.put_block(0, 0, &block, BlitOp::Xor).unwrap();
    assert_eq!(emu.frame(), &before[..], "XOR twice restores the region");
}

#[test]
fn test_get_block_records_oob_as_zero() {
    let mut emu = emu_mode(13);
    emu.pset(0, 0, 7);
    // Capture a block hanging off the top-left corner.
    let block = emu.get_block(-1, -1, 2, 2).unwrap();
    assert_eq!(block.pixels, vec![0, 0, 0, 7]);
}

#[test]
fn test_put_block_respects_clip() {
    let mut emu = emu_mode(13);
    let block = emu.get_block(0, 0, 4, 4).map(|mut b| {
        b.pixels.fill(6);
        b
    })
    .unwrap();

    emu.set_view(2, 2, 10, 10).unwrap();
    emu.put_block(0, 0, &block, BlitOp::Pset).unwrap();
    assert_eq!(emu.read_pixel_at(0, 0).unwrap(), 0, "clipped corner");
    assert_eq!(emu.read_pixel_at(3, 3).unwrap(), 6, "inside the view");
}

#[test]
fn test_invalid_block_is_rejected() {
    let mut emu = emu_mode(13);
    assert!(matches!(
        emu.get_block(0, 0, 0, 5),
        Err(EmuError::InvalidBlock { .. })
    ));
    let mut block = emu.get_block(0, 0, 2, 2).unwrap();
    block.pixels.pop();
    assert!(matches!(
        emu.put_block(0, 0, &block, BlitOp::Pset),
        Err(EmuError::InvalidBlock { .. })
    ));
}

// ----------------------------------------------------------------------
// BSAVE / BLOAD
// ----------------------------------------------------------------------

#[test]
fn test_bsave_bload_round_trip() {
    let path = std::env::temp_dir().join(format!("rust_basic_vram_{}.bin", std::process::id()));
    let mut emu = emu_mode(13);
    emu.pset(1, 1, 6);
    emu.line(3, 0, 3, 10, 12);

    emu.bsave(&path, 0, emu.vram_len()).unwrap();
    let saved: Vec<u8> = emu.frame().to_vec();

    emu.cls();
    assert_eq!(emu.read_pixel_at(1, 1).unwrap(), 0);

    emu.bload(&path, 0).unwrap();
    assert_eq!(emu.frame(), &saved[..], "whole-VRAM BSAVE/BLOAD is identity");
    assert_eq!(emu.read_pixel_at(1, 1).unwrap(), 6);

    // Ranges past the VRAM end are rejected.
    assert!(emu.bsave(&path, 1, emu.vram_len()).is_err());
    let _ = std::fs::remove_file(&path);
}
