use rust_basic::codepage::CodePage;
use rust_basic::error::EmuError;

/// Build a synthetic binary font: width, height, `pad` junk bytes, then
/// `count` glyphs of ceil(w/8)*h bytes.
fn make_font(width: u8, height: u8, pad: usize, count: usize, fill: u8) -> Vec<u8> {
    let row_bytes = (width as usize).div_ceil(8);
    let mut data = vec![width, height];
    data.extend(std::iter::repeat_n(0xEE, pad));
    data.extend(std::iter::repeat_n(
        fill,
        count * row_bytes * height as usize,
    ));
    data
}

#[test]
fn test_parse_font_without_padding() {
    // 8x8, 256 glyphs, first row of every glyph = 0x80 (leftmost pixel).
    let mut data = make_font(8, 8, 0, 256, 0x00);
    for g in 0..256 {
        data[2 + g * 8] = 0x80;
    }
    let page = CodePage::parse_font(&data).unwrap();
    assert_eq!((page.width(), page.height()), (8, 8));
    assert_eq!(page.len(), 256);

    // Big-endian bit order: bit 7 is the leftmost pixel of the row.
    let glyph = page.glyph(b'A');
    assert_eq!(glyph.pixel(0, 0), 1);
    assert_eq!(glyph.pixel(7, 0), 0);
    assert_eq!(glyph.pixel(0, 1), 0);
}

#[test]
fn test_parse_font_probes_header_padding() {
    // 8 bytes of junk between the two-byte header and the glyph data.
    let data = make_font(8, 16, 8, 256, 0xFF);
    let page = CodePage::parse_font(&data).unwrap();
    assert_eq!((page.width(), page.height()), (8, 16));
    // Every pixel of every parsed glyph is lit.
    assert!(page.glyph(0).bitmap.iter().all(|&p| p == 1));
}

#[test]
fn test_parse_font_wide_glyphs_use_ceil_row_bytes() {
    // 12 pixels wide -> 2 bytes per row.
    let data = make_font(12, 8, 0, 128, 0xFF);
    let page = CodePage::parse_font(&data).unwrap();
    assert_eq!(page.width(), 12);
    // Only 128 glyphs in the stream; the rest are padded blank.
    assert!(page.glyph(0).bitmap.iter().all(|&p| p == 1));
    assert!(page.glyph(200).bitmap.iter().all(|&p| p == 0));
}

#[test]
fn test_parse_font_accepts_truncated_payload() {
    // 256 glyphs minus a few trailing bytes: the count is floored.
    let mut data = make_font(8, 8, 0, 256, 0x55);
    data.truncate(data.len() - 3);
    let page = CodePage::parse_font(&data).unwrap();
    assert_eq!(page.len(), 256, "pages are always padded to 256 glyphs");
}

#[test]
fn test_parse_font_rejects_garbage() {
    assert!(matches!(
        CodePage::parse_font(&[8]),
        Err(EmuError::BadFont(_))
    ));
    assert!(matches!(
        CodePage::parse_font(&[0, 8, 1, 2, 3]),
        Err(EmuError::BadFont(_))
    ));
    // Far too little data for the minimum 128 glyphs.
    let data = make_font(8, 8, 0, 4, 0xFF);
    assert!(CodePage::parse_font(&data).is_err());
}
