use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::emulator::IoEmulator;
use crate::error::Result;
use crate::input::{KeyCode, KeyEventKind};
use crate::scheduler::{CancelToken, Scheduler};

/// Options for [`read_line`].
#[derive(Debug, Clone)]
pub struct LineOptions {
    pub blink: bool,
    pub blink_ms: u64,
    pub max_length: usize,
}

impl Default for LineOptions {
    fn default() -> Self {
        LineOptions {
            blink: true,
            blink_ms: 400,
            max_length: 255,
        }
    }
}

/// Poll interval while no key is pending.
const IDLE_POLL: Duration = Duration::from_millis(20);

/// Interactive line input over the text overlay (LINE INPUT / INPUT).
///
/// Prints the prompt at the cursor; the editable region runs from the column
/// after the prompt to the end of that row, and input past it is silently
/// truncated. The caret is drawn by inverting fg/bg on its cell. Runs in the
/// caller's thread under the cooperative scheduler, releasing the emulator
/// lock while idle so the host can present frames.
pub fn read_line(
    emu: &Mutex<IoEmulator>,
    scheduler: &Scheduler,
    cancel: &CancelToken,
    prompt: &str,
    options: &LineOptions,
) -> Result<String> {
    let (start_col, row, max_len) = {
        let mut emu = emu.lock().unwrap_or_else(|e| e.into_inner());
        emu.put_string(prompt);
        let (col, row) = emu.cursor();
        let editable = emu.text_cols().saturating_sub(col);
        (col, row, options.max_length.min(editable))
    };

    let mut buffer: Vec<u8> = Vec::new();
    let mut caret: usize = 0;
    let mut caret_on = true;
    let mut last_blink = Instant::now();
    let blink_interval = Duration::from_millis(options.blink_ms.max(1));

    render(emu, start_col, row, max_len, &buffer, caret, caret_on);

    loop {
        cancel.check()?;

        if options.blink && last_blink.elapsed() >= blink_interval {
            caret_on = !caret_on;
            last_blink = Instant::now();
            render(emu, start_col, row, max_len, &buffer, caret, caret_on);
        }

        let event = {
            let emu = emu.lock().unwrap_or_else(|e| e.into_inner());
            emu.try_read_key()
        };
        let Some(event) = event else {
            scheduler.sleep(IDLE_POLL, cancel)?;
            continue;
        };
        if event.kind != KeyEventKind::Down {
            continue;
        }

        match event.code {
            KeyCode::Enter => {
                // Drop the caret artifact, then emit CR+LF.
                render(emu, start_col, row, max_len, &buffer, caret, false);
                let mut emu = emu.lock().unwrap_or_else(|e| e.into_inner());
                emu.put_char(0x0D);
                emu.put_char(0x0A);
                return Ok(String::from_utf8_lossy(&buffer).into_owned());
            }
            KeyCode::Escape => {
                buffer.clear();
                render(emu, start_col, row, max_len, &buffer, 0, false);
                return Ok(String::new());
            }
            KeyCode::Backspace => {
                if caret > 0 {
                    caret -= 1;
                    buffer.remove(caret);
                }
            }
            KeyCode::Delete => {
                if caret < buffer.len() {
                    buffer.remove(caret);
                }
            }
            KeyCode::Left => caret = caret.saturating_sub(1),
            KeyCode::Right => caret = (caret + 1).min(buffer.len()),
            KeyCode::Home => caret = 0,
            KeyCode::End => caret = buffer.len(),
            _ => {
                if let Some(ch) = event.ch {
                    if !ch.is_control() && (ch as u32) < 256 && buffer.len() < max_len {
                        buffer.insert(caret, ch as u32 as u8);
                        caret += 1;
                    }
                }
            }
        }

        caret_on = true;
        last_blink = Instant::now();
        render(emu, start_col, row, max_len, &buffer, caret, caret_on);
    }
}

/// Redraw the editable region. The caret cell is drawn inverted.
fn render(
    emu: &Mutex<IoEmulator>,
    start_col: usize,
    row: usize,
    max_len: usize,
    buffer: &[u8],
    caret: usize,
    caret_on: bool,
) {
    let mut emu = emu.lock().unwrap_or_else(|e| e.into_inner());
    let (fg, bg) = (emu.foreground(), emu.background());
    let cols = emu.text_cols();
    for i in 0..=max_len {
        let col = start_col + i;
        if col >= cols {
            break;
        }
        let code = buffer.get(i).copied().unwrap_or(b' ');
        let inverted = caret_on && i == caret;
        let (cfg, cbg) = if inverted { (bg, fg) } else { (fg, bg) };
        // Cells are pre-validated against the grid; the write cannot fail.
        let _ = emu.write_text_at(col as i64, row as i64, code, Some(cfg), Some(cbg));
    }
}
