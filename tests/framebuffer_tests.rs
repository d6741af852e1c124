use rust_basic::error::EmuError;
use rust_basic::framebuffer::Framebuffer;

#[test]
fn test_dirty_flag_is_monotonic_per_mutation() {
    let mut fb = Framebuffer::new(8, 8, 0);

    // A fresh surface counts as dirty once (the host has never seen it).
    assert!(fb.take_dirty());
    assert!(!fb.is_dirty(), "take_dirty must reset the flag");

    fb.write_at(3, 3, 9).unwrap();
    assert!(fb.is_dirty(), "a pixel write must set the dirty flag");
    assert!(fb.take_dirty());
    assert!(!fb.is_dirty(), "flag stays false until the next mutation");

    fb.clear(1);
    assert!(fb.take_dirty(), "clear counts as a mutation");
}

#[test]
fn test_strict_accessors_reject_out_of_range() {
    let mut fb = Framebuffer::new(4, 4, 0);

    assert!(matches!(
        fb.read_at(4, 0),
        Err(EmuError::PixelOutOfRange { x: 4, y: 0, .. })
    ));
    assert!(matches!(
        fb.write_at(0, -1, 5),
        Err(EmuError::PixelOutOfRange { .. })
    ));

    // In-range read-back returns the written index.
    fb.write_at(2, 1, 7).unwrap();
    assert_eq!(fb.read_at(2, 1).unwrap(), 7);
}

#[test]
fn test_bounded_writes_drop_silently() {
    let mut fb = Framebuffer::new(4, 4, 0);
    fb.take_dirty();

    assert!(!fb.write_bounded(-1, 0, 5));
    assert!(!fb.write_bounded(0, 4, 5));
    assert!(!fb.is_dirty(), "dropped writes must not dirty the surface");

    assert!(fb.write_bounded(1, 1, 5));
    assert_eq!(fb.read_bounded(1, 1), Some(5));
    assert_eq!(fb.read_bounded(7, 7), None);
}

#[test]
fn test_byte_view_round_trip_and_bounds() {
    let mut fb = Framebuffer::new(4, 2, 0);
    assert_eq!(fb.byte_len(), 8);

    fb.write_bytes(2, &[1, 2, 3]).unwrap();
    assert_eq!(fb.read_bytes(0, 8).unwrap(), vec![0, 0, 1, 2, 3, 0, 0, 0]);

    // offset + length past the end must fail, not truncate.
    assert!(matches!(
        fb.read_bytes(6, 3),
        Err(EmuError::OutOfRange { offset: 6, length: 3, .. })
    ));
    assert!(matches!(
        fb.write_bytes(7, &[1, 2]),
        Err(EmuError::OutOfRange { .. })
    ));
}

#[test]
fn test_double_buffer_hides_writes_until_swap() {
    let mut fb = Framebuffer::new(2, 2, 0);
    fb.enable_double_buffer();
    fb.take_dirty();

    fb.write_at(0, 0, 9).unwrap();
    // The drawing side observes its own work...
    assert_eq!(fb.read_at(0, 0).unwrap(), 9);
    // ...but the host still sees the old front buffer.
    assert_eq!(fb.front()[0], 0);

    fb.swap();
    assert_eq!(fb.front()[0], 9);
    assert!(fb.take_dirty(), "swap must mark the surface dirty");

    // The fresh back buffer starts blank.
    assert_eq!(fb.read_at(0, 0).unwrap(), 0);
}
