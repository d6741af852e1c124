//! The device-facing half of the interpreter: statement handlers that map
//! BASIC surface syntax onto the IO emulator, the scheduler and the sound
//! driver, plus the PRINT hook test harnesses tap.

use std::path::Path;
use std::time::Duration;

use super::BasicError;
use super::eval::{Value, is_reserved, is_string_name, normalize_name, val_of};
use super::interpreter::{Interpreter, split_toplevel};
use super::tokenizer::{is_kw, is_string_literal, unquote};
use crate::editor::{self, LineOptions};
use crate::emulator::BlitOp;
use crate::error::EmuError;
use crate::sound::MusicEvent;

/// PRINT's comma separator advances to the next 14-column zone.
const PRINT_ZONE: usize = 14;

impl Interpreter {
    /// Write a string to the overlay, announcing it to the PRINT hook first.
    pub(crate) fn emit(&mut self, s: &str) {
        if let Some(hook) = self.print_hook.as_mut() {
            hook(s);
        }
        self.emu().put_string(s);
    }

    fn color_index(&mut self, value: i64) -> Result<u8, BasicError> {
        let len = self.emu().palette().len();
        if value < 0 || value as usize >= len {
            return Err(BasicError::Emu(EmuError::ColorOutOfRange {
                context: "color",
                index: value,
                len,
            }));
        }
        Ok(value as u8)
    }

    /// `(x, y)` or bare `x, y`.
    fn parse_point(&mut self, t: &[String], p: &mut usize) -> Result<(i64, i64), BasicError> {
        let parens = t.get(*p).is_some_and(|tok| tok == "(");
        if parens {
            *p += 1;
        }
        let x = self.parse_expr(t, p)?;
        let x = self.want_int(x)?;
        if !t.get(*p).is_some_and(|tok| tok == ",") {
            return self.syntax("expected ',' in coordinate pair");
        }
        *p += 1;
        let y = self.parse_expr(t, p)?;
        let y = self.want_int(y)?;
        if parens {
            if !t.get(*p).is_some_and(|tok| tok == ")") {
                return self.syntax("expected ')' after coordinate pair");
            }
            *p += 1;
        }
        Ok((x, y))
    }

    // ------------------------------------------------------------------
    // Display statements
    // ------------------------------------------------------------------

    pub(crate) fn st_screen(&mut self, t: &[String]) -> Result<(), BasicError> {
        let mode = self.eval_int(t)?;
        self.emu().load_screen_mode(mode)?;
        Ok(())
    }

    pub(crate) fn st_color(&mut self, t: &[String]) -> Result<(), BasicError> {
        let groups = split_toplevel(t, ",");
        if groups.is_empty() || groups[0].is_empty() || groups.len() > 2 {
            return self.syntax("COLOR fg[, bg]");
        }
        let fg = self.eval_int(&groups[0])?;
        let bg = match groups.get(1) {
            Some(g) if !g.is_empty() => Some(self.eval_int(g)?),
            _ => None,
        };
        self.emu().set_colors(fg, bg)?;
        Ok(())
    }

    /// `LOCATE row, col` — 1-based at the BASIC surface.
    pub(crate) fn st_locate(&mut self, t: &[String]) -> Result<(), BasicError> {
        let groups = split_toplevel(t, ",");
        if groups.len() != 2 {
            return self.syntax("LOCATE row, col");
        }
        let row = self.eval_int(&groups[0])?;
        let col = self.eval_int(&groups[1])?;
        self.emu().locate_cursor(col - 1, row - 1)?;
        Ok(())
    }

    pub(crate) fn st_print(&mut self, t: &[String]) -> Result<(), BasicError> {
        let mut p = 0;
        let mut last_sep: Option<char> = None;
        while p < t.len() {
            match t[p].as_str() {
                ";" => {
                    last_sep = Some(';');
                    p += 1;
                }
                "," => {
                    last_sep = Some(',');
                    let col = self.emu().cursor().0;
                    let pad = PRINT_ZONE - (col % PRINT_ZONE);
                    self.emit(&" ".repeat(pad));
                    p += 1;
                }
                _ => {
                    let value = self.parse_expr(t, &mut p)?;
                    self.emit(&value.display());
                    last_sep = None;
                }
            }
        }
        if !matches!(last_sep, Some(';') | Some(',')) {
            self.emit("\r\n");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Graphics statements
    // ------------------------------------------------------------------

    /// `PSET (x,y)[,color]` or `PSET x,y[,color]`.
    pub(crate) fn st_pset(&mut self, t: &[String]) -> Result<(), BasicError> {
        let mut p = 0;
        let (x, y) = self.parse_point(t, &mut p)?;
        let index = self.opt_color(t, &mut p)?;
        if p != t.len() {
            return self.syntax(format!("unexpected '{}'", t[p]));
        }
        self.emu().pset(x, y, index);
        Ok(())
    }

    /// `LINE (x1,y1)-(x2,y2)[,color]` or `LINE x1,y1,x2,y2[,color]`.
    pub(crate) fn st_line(&mut self, t: &[String]) -> Result<(), BasicError> {
        let mut p = 0;
        let (x1, y1) = self.parse_point(t, &mut p)?;
        let (x2, y2) = match t.get(p).map(|s| s.as_str()) {
            Some("-") => {
                p += 1;
                self.parse_point(t, &mut p)?
            }
            Some(",") => {
                p += 1;
                self.parse_point(t, &mut p)?
            }
            _ => return self.syntax("LINE needs two endpoints"),
        };
        let index = self.opt_color(t, &mut p)?;
        if p != t.len() {
            return self.syntax(format!("unexpected '{}'", t[p]));
        }
        self.emu().line(x1, y1, x2, y2, index);
        Ok(())
    }

    /// Optional trailing `,color`; defaults to the current foreground.
    fn opt_color(&mut self, t: &[String], p: &mut usize) -> Result<u8, BasicError> {
        if t.get(*p).is_some_and(|tok| tok == ",") {
            *p += 1;
            let value = self.parse_expr(t, p)?;
            let value = self.want_int(value)?;
            return self.color_index(value);
        }
        Ok(self.emu().foreground())
    }

    /// `VIEW (x1,y1)-(x2,y2)`; bare VIEW resets to the full screen.
    pub(crate) fn st_view(&mut self, t: &[String]) -> Result<(), BasicError> {
        if t.is_empty() {
            self.emu().reset_view();
            return Ok(());
        }
        let mut p = 0;
        let (x1, y1) = self.parse_point(t, &mut p)?;
        if !t.get(p).is_some_and(|tok| tok == "-") {
            return self.syntax("VIEW needs two corners");
        }
        p += 1;
        let (x2, y2) = self.parse_point(t, &mut p)?;
        self.emu().set_view(x1, y1, x2, y2)?;
        Ok(())
    }

    /// `WINDOW (wx1,wy1)-(wx2,wy2)`; bare WINDOW disables the mapping.
    pub(crate) fn st_window(&mut self, t: &[String]) -> Result<(), BasicError> {
        if t.is_empty() {
            self.emu().reset_window();
            return Ok(());
        }
        let mut p = 0;
        let (wx1, wy1) = self.parse_point(t, &mut p)?;
        if !t.get(p).is_some_and(|tok| tok == "-") {
            return self.syntax("WINDOW needs two corners");
        }
        p += 1;
        let (wx2, wy2) = self.parse_point(t, &mut p)?;
        self.emu()
            .set_window(wx1 as f64, wy1 as f64, wx2 as f64, wy2 as f64)?;
        Ok(())
    }

    /// `GET (x1,y1)-(x2,y2), NAME` captures into a named image block.
    pub(crate) fn st_get(&mut self, t: &[String]) -> Result<(), BasicError> {
        let mut p = 0;
        let (x1, y1) = self.parse_point(t, &mut p)?;
        if !t.get(p).is_some_and(|tok| tok == "-") {
            return self.syntax("GET needs two corners");
        }
        p += 1;
        let (x2, y2) = self.parse_point(t, &mut p)?;
        if !t.get(p).is_some_and(|tok| tok == ",") {
            return self.syntax("GET needs a name for the block");
        }
        p += 1;
        let Some(name) = t.get(p) else {
            return self.syntax("GET needs a name for the block");
        };
        let name = normalize_name(name);

        let x = x1.min(x2);
        let y = y1.min(y2);
        let w = x1.abs_diff(x2) as usize + 1;
        let h = y1.abs_diff(y2) as usize + 1;
        let block = self.emu().get_block(x, y, w, h)?;
        self.images.insert(name, block);
        Ok(())
    }

    /// `PUT (x,y), NAME[, PSET|AND|OR|XOR]`.
    pub(crate) fn st_put(&mut self, t: &[String]) -> Result<(), BasicError> {
        let mut p = 0;
        let (x, y) = self.parse_point(t, &mut p)?;
        if !t.get(p).is_some_and(|tok| tok == ",") {
            return self.syntax("PUT needs an image name");
        }
        p += 1;
        let Some(name) = t.get(p).cloned() else {
            return self.syntax("PUT needs an image name");
        };
        p += 1;

        let op = if t.get(p).is_some_and(|tok| tok == ",") {
            p += 1;
            let Some(word) = t.get(p) else {
                return self.syntax("missing raster operation");
            };
            p += 1;
            if is_kw(word, "PSET") {
                BlitOp::Pset
            } else if is_kw(word, "AND") {
                BlitOp::And
            } else if is_kw(word, "OR") {
                BlitOp::Or
            } else if is_kw(word, "XOR") {
                BlitOp::Xor
            } else {
                return self.syntax(format!("unknown raster operation '{}'", word));
            }
        } else {
            BlitOp::Pset
        };
        if p != t.len() {
            return self.syntax(format!("unexpected '{}'", t[p]));
        }

        let key = normalize_name(&name);
        let Some(block) = self.images.get(&key).cloned() else {
            return self.runtime(format!("no image block named '{}'", name));
        };
        self.emu().put_block(x, y, &block, op)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // BSAVE / BLOAD
    // ------------------------------------------------------------------

    /// `BSAVE "file", offset, length` — raw VRAM byte image, no header.
    pub(crate) fn st_bsave(&mut self, t: &[String]) -> Result<(), BasicError> {
        let groups = split_toplevel(t, ",");
        if groups.len() != 3 {
            return self.syntax("BSAVE \"file\", offset, length");
        }
        let file = self.eval_full(&groups[0])?;
        let file = self.want_str(file)?;
        let offset = self.eval_int(&groups[1])?;
        let length = self.eval_int(&groups[2])?;
        if offset < 0 || length < 0 {
            return self.runtime("negative BSAVE range");
        }
        self.emu()
            .bsave(Path::new(&file), offset as usize, length as usize)?;
        Ok(())
    }

    /// `BLOAD "file"[, offset]`.
    pub(crate) fn st_bload(&mut self, t: &[String]) -> Result<(), BasicError> {
        let groups = split_toplevel(t, ",");
        if groups.is_empty() || groups.len() > 2 {
            return self.syntax("BLOAD \"file\"[, offset]");
        }
        let file = self.eval_full(&groups[0])?;
        let file = self.want_str(file)?;
        let offset = match groups.get(1) {
            Some(g) if !g.is_empty() => self.eval_int(g)?,
            _ => 0,
        };
        if offset < 0 {
            return self.runtime("negative BLOAD offset");
        }
        self.emu().bload(Path::new(&file), offset as usize)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sound
    // ------------------------------------------------------------------

    pub(crate) fn st_beep(&mut self) -> Result<(), BasicError> {
        self.sound.beep();
        if !self.sound.blocking() {
            self.scheduler.sleep(
                Duration::from_millis(crate::sound::BEEP_MS as u64),
                &self.cancel,
            )?;
        }
        Ok(())
    }

    /// `SOUND freq, duration_ms`.
    pub(crate) fn st_sound(&mut self, t: &[String]) -> Result<(), BasicError> {
        let groups = split_toplevel(t, ",");
        if groups.len() != 2 {
            return self.syntax("SOUND freq, duration_ms");
        }
        let freq = self.eval_int(&groups[0])?.clamp(0, 32767) as u32;
        let ms = self.eval_int(&groups[1])?.max(0) as u32;
        self.sound.play_tone(freq, ms);
        if !self.sound.blocking() {
            self.scheduler
                .sleep(Duration::from_millis(ms as u64), &self.cancel)?;
        }
        Ok(())
    }

    /// `PLAY "music"` — notes go to the driver; rests (and non-blocking
    /// drivers) keep time through the scheduler so the music's shape
    /// survives.
    pub(crate) fn st_play(&mut self, t: &[String]) -> Result<(), BasicError> {
        let music = self.eval_full(t)?;
        let music = self.want_str(music)?;
        for event in crate::sound::parse_music_string(&music) {
            match event {
                MusicEvent::Note { freq, ms } => {
                    self.sound.play_tone(freq, ms);
                    if !self.sound.blocking() {
                        self.scheduler
                            .sleep(Duration::from_millis(ms as u64), &self.cancel)?;
                    }
                }
                MusicEvent::Rest { ms } => {
                    self.scheduler
                        .sleep(Duration::from_millis(ms as u64), &self.cancel)?;
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // SLEEP and input
    // ------------------------------------------------------------------

    /// `SLEEP [seconds]` — fractional allowed; without an argument, block
    /// until a key arrives.
    pub(crate) fn st_sleep(&mut self, t: &[String]) -> Result<(), BasicError> {
        if t.is_empty() {
            let queue = self.emu().input();
            self.scheduler.wait_for_key(&queue, &self.cancel)?;
            return Ok(());
        }
        let seconds = if t.len() == 1 {
            match t[0].parse::<f64>() {
                Ok(f) => f,
                Err(_) => self.eval_int(t)? as f64,
            }
        } else {
            self.eval_int(t)? as f64
        };
        if seconds > 0.0 {
            self.scheduler
                .sleep(Duration::from_secs_f64(seconds), &self.cancel)?;
        }
        Ok(())
    }

    /// `LINE INPUT [;] ["prompt";] var$`.
    pub(crate) fn st_line_input(&mut self, t: &[String]) -> Result<(), BasicError> {
        let mut p = 0;
        if t.get(p).is_some_and(|tok| tok == ";") {
            p += 1;
        }
        let mut prompt = String::new();
        if t.get(p).is_some_and(|tok| is_string_literal(tok)) {
            prompt = unquote(&t[p]);
            p += 1;
            if t.get(p).is_some_and(|tok| tok == ";" || tok == ",") {
                p += 1;
            }
        }
        let Some(var) = t.get(p) else {
            return self.syntax("LINE INPUT needs a string variable");
        };
        if is_reserved(var) {
            return Err(BasicError::ReservedKeyword {
                name: var.clone(),
                line: self.cur_line,
            });
        }
        let name = normalize_name(var);
        if !is_string_name(&name) {
            return self.runtime("LINE INPUT needs a string variable");
        }
        if p + 1 != t.len() {
            return self.syntax(format!("unexpected '{}'", t[p + 1]));
        }

        let line = editor::read_line(
            &self.emu,
            &self.scheduler,
            &self.cancel,
            &prompt,
            &LineOptions::default(),
        )?;
        self.str_vars.insert(name, line);
        Ok(())
    }

    /// `INPUT ["prompt" {;|,}] var[, var...]` — fields split on commas,
    /// integers through VAL.
    pub(crate) fn st_input(&mut self, t: &[String]) -> Result<(), BasicError> {
        let mut p = 0;
        if t.get(p).is_some_and(|tok| tok == ";") {
            p += 1;
        }
        let mut prompt = "? ".to_string();
        if t.get(p).is_some_and(|tok| is_string_literal(tok)) {
            prompt = unquote(&t[p]);
            p += 1;
            match t.get(p).map(|s| s.as_str()) {
                Some(";") => {
                    prompt.push_str("? ");
                    p += 1;
                }
                Some(",") => {
                    p += 1;
                }
                _ => return self.syntax("expected ';' or ',' after the INPUT prompt"),
            }
        }
        let targets = split_toplevel(&t[p..], ",");
        if targets.iter().all(|g| g.is_empty()) {
            return self.syntax("INPUT needs at least one variable");
        }

        let line = editor::read_line(
            &self.emu,
            &self.scheduler,
            &self.cancel,
            &prompt,
            &LineOptions::default(),
        )?;
        let mut fields = line.split(',');

        for group in targets {
            if group.is_empty() {
                continue;
            }
            let field = fields.next().unwrap_or("").trim().to_string();
            let name_token = &group[0];
            if is_reserved(name_token) {
                return Err(BasicError::ReservedKeyword {
                    name: name_token.clone(),
                    line: self.cur_line,
                });
            }
            let name = normalize_name(name_token);
            let value = if is_string_name(&name) {
                Value::Str(field)
            } else {
                Value::Int(val_of(&field))
            };
            if group.len() > 1 {
                if !group.get(1).is_some_and(|tok| tok == "(") {
                    return self.syntax("malformed INPUT target");
                }
                let mut q = 1;
                let args = self.parse_args(&group, &mut q)?;
                let mut indices = Vec::with_capacity(args.len());
                for arg in args {
                    indices.push(self.want_int(arg)?);
                }
                self.array_write(&name, &indices, value)?;
            } else {
                self.assign_scalar(&name, value)?;
            }
        }
        Ok(())
    }
}
