use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Local;
use log::debug;

use super::eval::{Lcg, Value, is_reserved, is_string_name, normalize_name, val_of};
use super::program::Program;
use super::tokenizer::is_kw;
use super::validator;
use super::{BasicError, DataValue};
use crate::emulator::{ImageBlock, IoEmulator};
use crate::scheduler::{CancelToken, Scheduler};
use crate::sound::SoundDriver;

/// Callback receiving every string PRINT hands to the overlay.
pub type PrintHook = Box<dyn FnMut(&str) + Send>;

/// How a program run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Ran to END or off the end of the program.
    Completed,
    /// A diagnostic was printed and the run terminated.
    Errored(String),
    /// The cancel token fired; nothing was printed.
    Cancelled,
}

/// One open control-flow frame.
#[derive(Debug, Clone)]
pub(crate) enum Frame {
    For {
        var: String,
        limit: i64,
        step: i64,
        body: usize,
    },
    While {
        entry: usize,
    },
    Do {
        entry: usize,
    },
}

#[derive(Debug, Clone)]
pub(crate) enum ArrayData {
    Int(Vec<i64>),
    Str(Vec<String>),
}

/// A DIMmed (or implicitly created) array: flat storage, rank 1 or 2.
#[derive(Debug, Clone)]
pub(crate) struct ArrayVar {
    pub dims: Vec<usize>,
    pub data: ArrayData,
}

impl ArrayVar {
    fn new(dims: Vec<usize>, string: bool) -> Self {
        let size = dims.iter().product();
        ArrayVar {
            dims,
            data: if string {
                ArrayData::Str(vec![String::new(); size])
            } else {
                ArrayData::Int(vec![0; size])
            },
        }
    }
}

/// A SUB or FUNCTION definition found at load time.
#[derive(Debug, Clone)]
pub(crate) struct Routine {
    pub name: String,
    pub params: Vec<String>,
    /// First statement inside the body.
    pub body: usize,
    /// Index of the END SUB / END FUNCTION statement.
    pub end: usize,
    pub is_function: bool,
}

/// The BASIC interpreter: executes one statement at a time against the IO
/// emulator, the scheduler and the sound driver.
pub struct Interpreter {
    pub(crate) emu: Arc<Mutex<IoEmulator>>,
    pub(crate) scheduler: Scheduler,
    pub(crate) sound: Box<dyn SoundDriver>,
    pub(crate) cancel: CancelToken,
    pub(crate) print_hook: Option<PrintHook>,

    pub(crate) program: Program,
    pub(crate) ip: usize,
    pub(crate) next_ip: usize,
    pub(crate) halted: bool,
    pub(crate) cur_line: usize,

    pub(crate) int_vars: HashMap<String, i64>,
    pub(crate) str_vars: HashMap<String, String>,
    pub(crate) arrays: HashMap<String, ArrayVar>,
    pub(crate) images: HashMap<String, ImageBlock>,
    pub(crate) data: Vec<(usize, DataValue)>,
    pub(crate) data_ptr: usize,
    pub(crate) frames: Vec<Frame>,
    pub(crate) gosub_stack: Vec<usize>,
    pub(crate) routines: HashMap<String, Routine>,
    pub(crate) rng: Lcg,
    pub(crate) call_depth: usize,
    pub(crate) exit_routine: bool,
}

impl Interpreter {
    pub fn new(emu: Arc<Mutex<IoEmulator>>, sound: Box<dyn SoundDriver>) -> Self {
        Interpreter {
            emu,
            scheduler: Scheduler::default(),
            sound,
            cancel: CancelToken::new(),
            print_hook: None,
            program: Program::default(),
            ip: 0,
            next_ip: 0,
            halted: false,
            cur_line: 0,
            int_vars: HashMap::new(),
            str_vars: HashMap::new(),
            arrays: HashMap::new(),
            images: HashMap::new(),
            data: Vec::new(),
            data_ptr: 0,
            frames: Vec::new(),
            gosub_stack: Vec::new(),
            routines: HashMap::new(),
            rng: Lcg::new(0x1989),
            call_depth: 0,
            exit_routine: false,
        }
    }

    /// The token the host cancels a run with.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn set_speed_factor(&mut self, factor: f64) {
        self.scheduler.set_speed_factor(factor);
    }

    pub fn set_print_hook(&mut self, hook: PrintHook) {
        self.print_hook = Some(hook);
    }

    pub(crate) fn emu(&self) -> MutexGuard<'_, IoEmulator> {
        self.emu.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn syntax<T>(&self, message: impl Into<String>) -> Result<T, BasicError> {
        Err(BasicError::SyntaxError {
            message: message.into(),
            line: self.cur_line,
        })
    }

    pub(crate) fn runtime<T>(&self, message: impl Into<String>) -> Result<T, BasicError> {
        Err(BasicError::Runtime {
            message: message.into(),
            line: self.cur_line,
        })
    }

    // ------------------------------------------------------------------
    // Run loop
    // ------------------------------------------------------------------

    /// Load, validate and execute a program. Every failure except
    /// cancellation prints a one-line diagnostic on the overlay and ends the
    /// run normally.
    pub fn run(&mut self, source: &str) -> RunOutcome {
        self.reset();

        let program = match Program::parse(source) {
            Ok(program) => program,
            Err(e) => return self.finish_with_error(e),
        };
        if let Err(e) = validator::validate(&program) {
            return self.finish_with_error(e);
        }
        self.data = program.collect_data();
        self.program = program;
        if let Err(e) = self.scan_routines() {
            return self.finish_with_error(e);
        }

        loop {
            if self.cancel.is_cancelled() {
                return RunOutcome::Cancelled;
            }
            if self.halted || self.ip >= self.program.statements.len() {
                return RunOutcome::Completed;
            }
            let stmt = self.program.statements[self.ip].clone();
            self.cur_line = stmt.line;
            self.next_ip = self.ip + 1;
            match self.exec_tokens(&stmt.tokens) {
                Ok(()) => self.ip = self.next_ip,
                Err(e) if e.is_cancelled() => return RunOutcome::Cancelled,
                Err(e) => return self.finish_with_error(e),
            }
        }
    }

    fn reset(&mut self) {
        self.program = Program::default();
        self.ip = 0;
        self.next_ip = 0;
        self.halted = false;
        self.cur_line = 0;
        self.int_vars.clear();
        self.str_vars.clear();
        self.arrays.clear();
        self.images.clear();
        self.data.clear();
        self.data_ptr = 0;
        self.frames.clear();
        self.gosub_stack.clear();
        self.routines.clear();
        self.call_depth = 0;
        self.exit_routine = false;
    }

    fn finish_with_error(&mut self, error: BasicError) -> RunOutcome {
        let message = error.to_string();
        debug!("run terminated: {}", message);
        // Best effort; a failure while reporting is suppressed.
        self.emit(&format!("Error: {}\r\n", message));
        RunOutcome::Errored(message)
    }

    /// Find SUB/FUNCTION bodies so calls can jump straight in and the main
    /// flow can jump straight past.
    fn scan_routines(&mut self) -> Result<(), BasicError> {
        let statements = &self.program.statements;
        let mut idx = 0;
        while idx < statements.len() {
            let tokens = &statements[idx].tokens;
            let Some(head) = tokens.first() else {
                idx += 1;
                continue;
            };
            let is_function = is_kw(head, "FUNCTION");
            if !is_function && !is_kw(head, "SUB") {
                idx += 1;
                continue;
            }
            self.cur_line = statements[idx].line;
            let Some(raw_name) = tokens.get(1) else {
                return self.syntax("missing procedure name");
            };
            if is_reserved(raw_name) {
                return Err(BasicError::ReservedKeyword {
                    name: raw_name.clone(),
                    line: self.cur_line,
                });
            }
            let name = normalize_name(raw_name);
            let mut params = Vec::new();
            for token in &tokens[2..] {
                if token == "(" || token == ")" || token == "," {
                    continue;
                }
                params.push(normalize_name(token));
            }

            let closer = if is_function { "FUNCTION" } else { "SUB" };
            let mut end = None;
            for (j, stmt) in statements.iter().enumerate().skip(idx + 1) {
                let t = &stmt.tokens;
                if t.first().is_some_and(|h| is_kw(h, "END"))
                    && t.get(1).is_some_and(|w| is_kw(w, closer))
                {
                    end = Some(j);
                    break;
                }
            }
            let Some(end) = end else {
                return self.syntax(format!("{} {} is never closed", closer, raw_name));
            };
            if self.routines.contains_key(&name) {
                return self.runtime(format!("duplicate procedure '{}'", raw_name));
            }
            self.routines.insert(
                name.clone(),
                Routine {
                    name,
                    params,
                    body: idx + 1,
                    end,
                    is_function,
                },
            );
            idx = end + 1;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Statement dispatch
    // ------------------------------------------------------------------

    pub(crate) fn exec_tokens(&mut self, t: &[String]) -> Result<(), BasicError> {
        let Some(head) = t.first() else {
            return Ok(());
        };
        let upper = head.to_ascii_uppercase();
        match upper.as_str() {
            "REM" | "DATA" | "DECLARE" => Ok(()),
            "SCREEN" => self.st_screen(&t[1..]),
            "COLOR" => self.st_color(&t[1..]),
            "CLS" => {
                self.emu().cls();
                Ok(())
            }
            "LOCATE" => self.st_locate(&t[1..]),
            "PRINT" => self.st_print(&t[1..]),
            "PSET" => self.st_pset(&t[1..]),
            "LINE" => {
                if t.get(1).is_some_and(|n| is_kw(n, "INPUT")) {
                    self.st_line_input(&t[2..])
                } else {
                    self.st_line(&t[1..])
                }
            }
            "VIEW" => self.st_view(&t[1..]),
            "WINDOW" => self.st_window(&t[1..]),
            "GET" => self.st_get(&t[1..]),
            "PUT" => self.st_put(&t[1..]),
            "BLOAD" => self.st_bload(&t[1..]),
            "BSAVE" => self.st_bsave(&t[1..]),
            "BEEP" => self.st_beep(),
            "SOUND" => self.st_sound(&t[1..]),
            "PLAY" => self.st_play(&t[1..]),
            "SLEEP" => self.st_sleep(&t[1..]),
            "INPUT" => self.st_input(&t[1..]),
            "LET" => self.st_assign(&t[1..]),
            "DIM" => self.st_dim(&t[1..]),
            "READ" => self.st_read(&t[1..]),
            "RESTORE" => self.st_restore(&t[1..]),
            "RANDOMIZE" => self.st_randomize(&t[1..]),
            "IF" => self.st_if(t),
            "ELSEIF" | "ELSE" => self.skip_to_end_if(),
            "FOR" => self.st_for(t),
            "NEXT" => self.st_next(t),
            "WHILE" => self.st_while(t),
            "WEND" => self.st_wend(),
            "DO" => self.st_do(t),
            "LOOP" => self.st_loop(t),
            "SELECT" => self.st_select(t),
            "CASE" => self.skip_to_end_select(),
            "GOTO" => self.st_goto(t),
            "GOSUB" => self.st_gosub(t),
            "RETURN" => self.st_return(),
            "EXIT" => self.st_exit(t),
            "END" => self.st_end(t),
            "STOP" => {
                self.halted = true;
                Ok(())
            }
            "CALL" => self.st_call(&t[1..]),
            "SUB" | "FUNCTION" => self.skip_routine_body(t),
            _ => {
                // Assignment (with or without LET) or a bare SUB call.
                if has_toplevel_eq(t) {
                    return self.st_assign(t);
                }
                let name = normalize_name(head);
                if self.routines.get(&name).is_some_and(|r| !r.is_function) {
                    return self.st_call(t);
                }
                Err(BasicError::UnknownStatement {
                    token: head.clone(),
                    line: self.cur_line,
                })
            }
        }
    }

    // ------------------------------------------------------------------
    // Assignment, DIM, arrays
    // ------------------------------------------------------------------

    /// `name = expr` or `name(i[,j]) = expr`.
    pub(crate) fn st_assign(&mut self, t: &[String]) -> Result<(), BasicError> {
        let Some(name) = t.first() else {
            return self.syntax("missing assignment target");
        };
        if is_reserved(name) {
            return Err(BasicError::ReservedKeyword {
                name: name.clone(),
                line: self.cur_line,
            });
        }
        let normalized = normalize_name(name);

        if t.get(1).is_some_and(|tok| tok == "(") {
            let mut p = 1;
            let args = self.parse_args(t, &mut p)?;
            let mut indices = Vec::with_capacity(args.len());
            for arg in args {
                indices.push(self.want_int(arg)?);
            }
            if !t.get(p).is_some_and(|tok| tok == "=") {
                return self.syntax("expected '=' after array element");
            }
            let value = self.eval_full(&t[p + 1..])?;
            return self.array_write(&normalized, &indices, value);
        }

        if !t.get(1).is_some_and(|tok| tok == "=") {
            return self.syntax("expected '='");
        }
        let value = self.eval_full(&t[2..])?;
        self.assign_scalar(&normalized, value)
    }

    pub(crate) fn assign_scalar(&mut self, name: &str, value: Value) -> Result<(), BasicError> {
        if is_string_name(name) {
            let s = self.want_str(value)?;
            self.str_vars.insert(name.to_string(), s);
        } else {
            let n = self.want_int(value)?;
            self.int_vars.insert(name.to_string(), n);
        }
        Ok(())
    }

    /// `DIM name(n1[,n2]) [AS INTEGER|STRING]` — n+1 entries per dimension.
    fn st_dim(&mut self, t: &[String]) -> Result<(), BasicError> {
        let Some(name) = t.first() else {
            return self.syntax("missing array name");
        };
        if is_reserved(name) {
            return Err(BasicError::ReservedKeyword {
                name: name.clone(),
                line: self.cur_line,
            });
        }
        let normalized = normalize_name(name);

        let mut p = 1;
        let args = self.parse_args(t, &mut p)?;
        if args.is_empty() || args.len() > 2 {
            return self.syntax("arrays have one or two dimensions");
        }
        let mut dims = Vec::with_capacity(args.len());
        for arg in args {
            let n = self.want_int(arg)?;
            if n < 0 {
                return self.runtime("negative array bound");
            }
            dims.push(n as usize + 1);
        }

        let mut string = is_string_name(&normalized);
        if t.get(p).is_some_and(|tok| is_kw(tok, "AS")) {
            match t.get(p + 1) {
                Some(ty) if is_kw(ty, "INTEGER") => string = false,
                Some(ty) if is_kw(ty, "STRING") => string = true,
                _ => return self.syntax("expected INTEGER or STRING after AS"),
            }
            p += 2;
        }
        if p != t.len() {
            return self.syntax(format!("unexpected '{}'", t[p]));
        }

        self.arrays
            .insert(normalized, ArrayVar::new(dims, string));
        Ok(())
    }

    fn array_offset(&self, array: &ArrayVar, indices: &[i64]) -> Result<usize, BasicError> {
        if indices.len() != array.dims.len() {
            return self.runtime(format!(
                "array expects {} subscript(s), got {}",
                array.dims.len(),
                indices.len()
            ));
        }
        for (i, &idx) in indices.iter().enumerate() {
            if idx < 0 || idx as usize >= array.dims[i] {
                return self.runtime("subscript out of range");
            }
        }
        Ok(if indices.len() == 1 {
            indices[0] as usize
        } else {
            indices[0] as usize * array.dims[1] + indices[1] as usize
        })
    }

    /// Undeclared arrays spring into being with 11 entries per dimension,
    /// the classic implicit DIM.
    fn ensure_array(&mut self, name: &str, rank: usize) -> Result<(), BasicError> {
        if self.arrays.contains_key(name) {
            return Ok(());
        }
        if rank == 0 || rank > 2 {
            return self.runtime("arrays have one or two dimensions");
        }
        self.arrays.insert(
            name.to_string(),
            ArrayVar::new(vec![11; rank], is_string_name(name)),
        );
        Ok(())
    }

    pub(crate) fn array_read(
        &mut self,
        name: &str,
        indices: &[i64],
    ) -> Result<Value, BasicError> {
        self.ensure_array(name, indices.len())?;
        let Some(array) = self.arrays.get(name) else {
            return self.runtime(format!("unknown array '{}'", name));
        };
        let offset = self.array_offset(array, indices)?;
        Ok(match &array.data {
            ArrayData::Int(v) => Value::Int(v[offset]),
            ArrayData::Str(v) => Value::Str(v[offset].clone()),
        })
    }

    pub(crate) fn array_write(
        &mut self,
        name: &str,
        indices: &[i64],
        value: Value,
    ) -> Result<(), BasicError> {
        self.ensure_array(name, indices.len())?;
        let offset = match self.arrays.get(name) {
            Some(array) => self.array_offset(array, indices)?,
            None => return self.runtime(format!("unknown array '{}'", name)),
        };
        let mismatch = self.runtime::<()>("type mismatch in array assignment");
        let Some(array) = self.arrays.get_mut(name) else {
            return self.runtime(format!("unknown array '{}'", name));
        };
        match (&mut array.data, value) {
            (ArrayData::Int(v), Value::Int(n)) => v[offset] = n,
            (ArrayData::Str(v), Value::Str(s)) => v[offset] = s,
            _ => return mismatch,
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // DATA / READ / RESTORE
    // ------------------------------------------------------------------

    fn st_read(&mut self, t: &[String]) -> Result<(), BasicError> {
        for group in split_toplevel(t, ",") {
            if group.is_empty() {
                continue;
            }
            let Some((_, value)) = self.data.get(self.data_ptr).cloned() else {
                return Err(BasicError::DataExhausted);
            };
            self.data_ptr += 1;

            let name_token = &group[0];
            if is_reserved(name_token) {
                return Err(BasicError::ReservedKeyword {
                    name: name_token.clone(),
                    line: self.cur_line,
                });
            }
            let name = normalize_name(name_token);
            let coerced = if is_string_name(&name) {
                Value::Str(match value {
                    DataValue::Str(s) => s,
                    DataValue::Int(n) => n.to_string(),
                })
            } else {
                Value::Int(match value {
                    DataValue::Int(n) => n,
                    DataValue::Str(s) => val_of(&s),
                })
            };

            if group.len() > 1 {
                if !group.get(1).is_some_and(|tok| tok == "(") {
                    return self.syntax("malformed READ target");
                }
                let mut p = 1;
                let args = self.parse_args(&group, &mut p)?;
                let mut indices = Vec::with_capacity(args.len());
                for arg in args {
                    indices.push(self.want_int(arg)?);
                }
                self.array_write(&name, &indices, coerced)?;
            } else {
                self.assign_scalar(&name, coerced)?;
            }
        }
        Ok(())
    }

    fn st_restore(&mut self, t: &[String]) -> Result<(), BasicError> {
        match t.first() {
            None => {
                self.data_ptr = 0;
                Ok(())
            }
            Some(target) => {
                let stmt = self.resolve_label(target)?;
                self.data_ptr = self
                    .data
                    .iter()
                    .position(|(idx, _)| *idx >= stmt)
                    .unwrap_or(self.data.len());
                Ok(())
            }
        }
    }

    fn st_randomize(&mut self, t: &[String]) -> Result<(), BasicError> {
        let seed = if t.is_empty() {
            Local::now().timestamp_millis() as u64
        } else {
            self.eval_int(t)? as u64
        };
        self.rng = Lcg::new(seed);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Control flow
    // ------------------------------------------------------------------

    pub(crate) fn resolve_label(&self, token: &str) -> Result<usize, BasicError> {
        match self.program.labels.get(&token.to_ascii_uppercase()) {
            Some(&idx) => Ok(idx),
            None => Err(BasicError::UndefinedLabel {
                label: token.to_string(),
                line: self.cur_line,
            }),
        }
    }

    fn st_goto(&mut self, t: &[String]) -> Result<(), BasicError> {
        let Some(target) = t.get(1) else {
            return self.syntax("GOTO without a target");
        };
        self.next_ip = self.resolve_label(target)?;
        Ok(())
    }

    fn st_gosub(&mut self, t: &[String]) -> Result<(), BasicError> {
        let Some(target) = t.get(1) else {
            return self.syntax("GOSUB without a target");
        };
        let target = self.resolve_label(target)?;
        self.gosub_stack.push(self.ip + 1);
        self.next_ip = target;
        Ok(())
    }

    fn st_return(&mut self) -> Result<(), BasicError> {
        match self.gosub_stack.pop() {
            Some(ret) => {
                self.next_ip = ret;
                Ok(())
            }
            None => self.runtime("RETURN without GOSUB"),
        }
    }

    fn st_end(&mut self, t: &[String]) -> Result<(), BasicError> {
        if t.len() == 1 {
            self.halted = true;
        }
        // END IF / END SELECT / END SUB / END FUNCTION are flow markers.
        Ok(())
    }

    fn st_if(&mut self, t: &[String]) -> Result<(), BasicError> {
        let Some(then_idx) = t.iter().position(|tok| is_kw(tok, "THEN")) else {
            return self.syntax("IF without THEN");
        };

        if then_idx == t.len() - 1 {
            // Block form: a false condition jumps to the live branch.
            let cond = self.eval_full(&t[1..then_idx])?;
            if !self.truthy(cond)? {
                self.next_ip = self.scan_if_branch(self.ip)?;
            }
            return Ok(());
        }

        // Single-line form, with optional ELSE bound to this IF.
        let cond = self.eval_full(&t[1..then_idx])?;
        let rest = &t[then_idx + 1..];
        let mut pending = 0usize;
        let mut else_idx = None;
        for (i, tok) in rest.iter().enumerate() {
            if is_kw(tok, "IF") {
                pending += 1;
            } else if is_kw(tok, "ELSE") {
                if pending == 0 {
                    else_idx = Some(i);
                    break;
                }
                pending -= 1;
            }
        }
        let (then_actions, else_actions) = match else_idx {
            Some(i) => (&rest[..i], &rest[i + 1..]),
            None => (rest, &rest[rest.len()..]),
        };
        if self.truthy(cond)? {
            self.run_actions(then_actions)
        } else {
            self.run_actions(else_actions)
        }
    }

    /// Execute the ':'-separated actions of a single-line IF. A bare label
    /// or line number is an implicit GOTO. Stops once a jump was taken.
    fn run_actions(&mut self, actions: &[String]) -> Result<(), BasicError> {
        let fallthrough = self.ip + 1;
        for piece in split_toplevel(actions, ":") {
            if piece.is_empty() {
                continue;
            }
            if piece.len() == 1 && self.program.labels.contains_key(&piece[0].to_ascii_uppercase())
            {
                self.next_ip = self.resolve_label(&piece[0])?;
                return Ok(());
            }
            self.exec_tokens(&piece)?;
            if self.halted || self.next_ip != fallthrough {
                return Ok(());
            }
        }
        Ok(())
    }

    /// From a false block-IF (or ELSEIF) at `from`, find the statement to
    /// run next: a matching true ELSEIF branch, the ELSE body, or past
    /// END IF.
    fn scan_if_branch(&mut self, from: usize) -> Result<usize, BasicError> {
        let mut depth = 0usize;
        let mut j = from + 1;
        while j < self.program.statements.len() {
            let tokens = self.program.statements[j].tokens.clone();
            let Some(head) = tokens.first() else {
                j += 1;
                continue;
            };
            if is_kw(head, "IF") && tokens.last().is_some_and(|l| is_kw(l, "THEN")) {
                depth += 1;
            } else if is_kw(head, "END") && tokens.get(1).is_some_and(|w| is_kw(w, "IF")) {
                if depth == 0 {
                    return Ok(j + 1);
                }
                depth -= 1;
            } else if depth == 0 && is_kw(head, "ELSEIF") {
                let cond = self.eval_full(&tokens[1..tokens.len() - 1])?;
                if self.truthy(cond)? {
                    return Ok(j + 1);
                }
            } else if depth == 0 && is_kw(head, "ELSE") && tokens.len() == 1 {
                return Ok(j + 1);
            }
            j += 1;
        }
        self.runtime("IF without END IF")
    }

    /// A branch body ran into ELSEIF/ELSE: skip past the matching END IF.
    fn skip_to_end_if(&mut self) -> Result<(), BasicError> {
        let mut depth = 0usize;
        for j in self.ip + 1..self.program.statements.len() {
            let tokens = &self.program.statements[j].tokens;
            let Some(head) = tokens.first() else { continue };
            if is_kw(head, "IF") && tokens.last().is_some_and(|l| is_kw(l, "THEN")) {
                depth += 1;
            } else if is_kw(head, "END") && tokens.get(1).is_some_and(|w| is_kw(w, "IF")) {
                if depth == 0 {
                    self.next_ip = j + 1;
                    return Ok(());
                }
                depth -= 1;
            }
        }
        self.runtime("IF without END IF")
    }

    fn st_select(&mut self, t: &[String]) -> Result<(), BasicError> {
        if !t.get(1).is_some_and(|w| is_kw(w, "CASE")) {
            return self.syntax("SELECT without CASE");
        }
        let value = self.eval_full(&t[2..])?;

        let mut depth = 0usize;
        let mut j = self.ip + 1;
        while j < self.program.statements.len() {
            let tokens = self.program.statements[j].tokens.clone();
            let Some(head) = tokens.first() else {
                j += 1;
                continue;
            };
            if is_kw(head, "SELECT") {
                depth += 1;
            } else if is_kw(head, "END") && tokens.get(1).is_some_and(|w| is_kw(w, "SELECT")) {
                if depth == 0 {
                    // No CASE matched.
                    self.next_ip = j + 1;
                    return Ok(());
                }
                depth -= 1;
            } else if depth == 0 && is_kw(head, "CASE") {
                if tokens.get(1).is_some_and(|w| is_kw(w, "ELSE")) {
                    self.next_ip = j + 1;
                    return Ok(());
                }
                for group in split_toplevel(&tokens[1..], ",") {
                    if group.is_empty() {
                        continue;
                    }
                    let candidate = self.eval_full(&group)?;
                    if candidate == value {
                        self.next_ip = j + 1;
                        return Ok(());
                    }
                }
            }
            j += 1;
        }
        self.runtime("SELECT CASE without END SELECT")
    }

    /// A case body ran into the next CASE: skip past END SELECT.
    fn skip_to_end_select(&mut self) -> Result<(), BasicError> {
        let mut depth = 0usize;
        for j in self.ip + 1..self.program.statements.len() {
            let tokens = &self.program.statements[j].tokens;
            let Some(head) = tokens.first() else { continue };
            if is_kw(head, "SELECT") {
                depth += 1;
            } else if is_kw(head, "END") && tokens.get(1).is_some_and(|w| is_kw(w, "SELECT")) {
                if depth == 0 {
                    self.next_ip = j + 1;
                    return Ok(());
                }
                depth -= 1;
            }
        }
        self.runtime("SELECT CASE without END SELECT")
    }

    fn st_for(&mut self, t: &[String]) -> Result<(), BasicError> {
        let Some(var) = t.get(1) else {
            return self.syntax("FOR without a loop variable");
        };
        if is_reserved(var) {
            return Err(BasicError::ReservedKeyword {
                name: var.clone(),
                line: self.cur_line,
            });
        }
        let name = normalize_name(var);
        if is_string_name(&name) {
            return self.runtime("FOR variable must be an integer");
        }
        if !t.get(2).is_some_and(|tok| tok == "=") {
            return self.syntax("expected '=' in FOR");
        }
        let Some(to_idx) = t.iter().position(|tok| is_kw(tok, "TO")) else {
            return self.syntax("FOR without TO");
        };
        let start = self.eval_int(&t[3..to_idx])?;
        let step_idx = t.iter().position(|tok| is_kw(tok, "STEP"));
        let limit = match step_idx {
            Some(s) => self.eval_int(&t[to_idx + 1..s])?,
            None => self.eval_int(&t[to_idx + 1..])?,
        };
        let step = match step_idx {
            Some(s) => self.eval_int(&t[s + 1..])?,
            None => 1,
        };

        self.int_vars.insert(name.clone(), start);
        let entered = if step >= 0 { start <= limit } else { start >= limit };
        if entered {
            self.frames.push(Frame::For {
                var: name,
                limit,
                step,
                body: self.ip + 1,
            });
        } else {
            self.next_ip = self.scan_loop_closer(self.ip, "FOR", "NEXT")? + 1;
        }
        Ok(())
    }

    fn st_next(&mut self, t: &[String]) -> Result<(), BasicError> {
        let frame = match self.frames.last().cloned() {
            Some(Frame::For {
                var,
                limit,
                step,
                body,
            }) => (var, limit, step, body),
            _ => {
                return Err(BasicError::MismatchedNext {
                    message: "NEXT without FOR".into(),
                    line: self.cur_line,
                });
            }
        };
        let (var, limit, step, body) = frame;
        if let Some(named) = t.get(1) {
            if normalize_name(named) != var {
                return Err(BasicError::MismatchedNext {
                    message: format!("NEXT {} does not match FOR {}", named, var),
                    line: self.cur_line,
                });
            }
        }
        let value = self.int_vars.get(&var).copied().unwrap_or(0).wrapping_add(step);
        self.int_vars.insert(var, value);
        let continues = if step >= 0 { value <= limit } else { value >= limit };
        if continues {
            self.next_ip = body;
        } else {
            self.frames.pop();
        }
        Ok(())
    }

    fn st_while(&mut self, t: &[String]) -> Result<(), BasicError> {
        let cond = self.eval_full(&t[1..])?;
        if self.truthy(cond)? {
            self.frames.push(Frame::While { entry: self.ip });
        } else {
            self.next_ip = self.scan_loop_closer(self.ip, "WHILE", "WEND")? + 1;
        }
        Ok(())
    }

    fn st_wend(&mut self) -> Result<(), BasicError> {
        match self.frames.pop() {
            Some(Frame::While { entry }) => {
                self.next_ip = entry;
                Ok(())
            }
            _ => self.runtime("WEND without WHILE"),
        }
    }

    fn st_do(&mut self, t: &[String]) -> Result<(), BasicError> {
        let entered = match t.get(1) {
            Some(w) if is_kw(w, "WHILE") => {
                let cond = self.eval_full(&t[2..])?;
                self.truthy(cond)?
            }
            Some(w) if is_kw(w, "UNTIL") => {
                let cond = self.eval_full(&t[2..])?;
                !self.truthy(cond)?
            }
            Some(other) => return self.syntax(format!("unexpected '{}' after DO", other)),
            None => true,
        };
        if entered {
            self.frames.push(Frame::Do { entry: self.ip });
        } else {
            self.next_ip = self.scan_loop_closer(self.ip, "DO", "LOOP")? + 1;
        }
        Ok(())
    }

    fn st_loop(&mut self, t: &[String]) -> Result<(), BasicError> {
        let entry = match self.frames.pop() {
            Some(Frame::Do { entry }) => entry,
            _ => return self.runtime("LOOP without DO"),
        };
        let continues = match t.get(1) {
            Some(w) if is_kw(w, "WHILE") => {
                let cond = self.eval_full(&t[2..])?;
                self.truthy(cond)?
            }
            Some(w) if is_kw(w, "UNTIL") => {
                let cond = self.eval_full(&t[2..])?;
                !self.truthy(cond)?
            }
            Some(other) => return self.syntax(format!("unexpected '{}' after LOOP", other)),
            None => true,
        };
        if continues {
            // Re-dispatching DO re-evaluates its leading condition and
            // re-pushes the frame.
            self.next_ip = entry;
        }
        Ok(())
    }

    fn st_exit(&mut self, t: &[String]) -> Result<(), BasicError> {
        let target = t.get(1).cloned().unwrap_or_default();
        if is_kw(&target, "SUB") || is_kw(&target, "FUNCTION") {
            if self.call_depth == 0 {
                return self.runtime(format!(
                    "EXIT {} outside a procedure",
                    target.to_ascii_uppercase()
                ));
            }
            self.exit_routine = true;
            return Ok(());
        }
        let (opener, closer, want_for) = if is_kw(&target, "FOR") {
            ("FOR", "NEXT", true)
        } else if is_kw(&target, "DO") {
            ("DO", "LOOP", false)
        } else {
            return self.syntax(format!("cannot EXIT '{}'", target));
        };

        // Drop inner frames down to and including the loop being left.
        loop {
            match self.frames.pop() {
                Some(Frame::For { .. }) if want_for => break,
                Some(Frame::Do { .. }) if !want_for => break,
                Some(_) => continue,
                None => return self.runtime(format!("EXIT {} outside such a loop", opener)),
            }
        }
        self.next_ip = self.scan_loop_closer(self.ip, opener, closer)? + 1;
        Ok(())
    }

    /// Find the matching closer for a loop opener, scanning forward from
    /// `from` with nesting. Returns the closer's statement index.
    fn scan_loop_closer(
        &self,
        from: usize,
        opener: &str,
        closer: &str,
    ) -> Result<usize, BasicError> {
        let mut depth = 0usize;
        for j in from + 1..self.program.statements.len() {
            let tokens = &self.program.statements[j].tokens;
            let Some(head) = tokens.first() else { continue };
            if is_kw(head, opener) {
                depth += 1;
            } else if is_kw(head, closer) {
                if depth == 0 {
                    return Ok(j);
                }
                depth -= 1;
            }
        }
        self.runtime(format!("{} without {}", opener, closer))
    }

    // ------------------------------------------------------------------
    // SUB / FUNCTION
    // ------------------------------------------------------------------

    /// A SUB/FUNCTION header reached in normal flow skips its whole body.
    fn skip_routine_body(&mut self, t: &[String]) -> Result<(), BasicError> {
        let Some(name) = t.get(1) else {
            return self.syntax("missing procedure name");
        };
        let name = normalize_name(name);
        match self.routines.get(&name) {
            Some(routine) => {
                self.next_ip = routine.end + 1;
                Ok(())
            }
            None => self.runtime(format!("unknown procedure '{}'", name)),
        }
    }

    fn st_call(&mut self, t: &[String]) -> Result<(), BasicError> {
        let Some(raw_name) = t.first() else {
            return self.syntax("CALL without a procedure name");
        };
        let name = normalize_name(raw_name);
        if !self.routines.contains_key(&name) {
            return self.runtime(format!("unknown SUB '{}'", raw_name));
        }
        let args = if t.get(1).is_some_and(|tok| tok == "(") {
            let mut p = 1;
            let args = self.parse_args(t, &mut p)?;
            if p != t.len() {
                return self.syntax(format!("unexpected '{}'", t[p]));
            }
            args
        } else if t.len() > 1 {
            let mut args = Vec::new();
            for group in split_toplevel(&t[1..], ",") {
                if !group.is_empty() {
                    args.push(self.eval_full(&group)?);
                }
            }
            args
        } else {
            Vec::new()
        };
        self.call_routine(&name, args)?;
        Ok(())
    }

    /// Invoke a SUB or FUNCTION with by-value arguments and a fresh local
    /// scope. Arrays remain shared. A FUNCTION's return value is whatever
    /// its body assigned to the function name.
    pub(crate) fn call_routine(
        &mut self,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, BasicError> {
        let Some(routine) = self.routines.get(name).cloned() else {
            return self.runtime(format!("unknown procedure '{}'", name));
        };
        if args.len() != routine.params.len() {
            return self.runtime(format!(
                "{} expects {} argument(s), got {}",
                routine.name,
                routine.params.len(),
                args.len()
            ));
        }

        let mut local_int = HashMap::new();
        let mut local_str = HashMap::new();
        for (param, arg) in routine.params.iter().zip(args) {
            if is_string_name(param) {
                local_str.insert(param.clone(), self.want_str(arg)?);
            } else {
                local_int.insert(param.clone(), self.want_int(arg)?);
            }
        }

        let saved_int = std::mem::replace(&mut self.int_vars, local_int);
        let saved_str = std::mem::replace(&mut self.str_vars, local_str);
        let saved_ip = self.ip;
        let saved_next = self.next_ip;
        let saved_line = self.cur_line;
        let saved_frames = self.frames.len();
        let saved_gosub = self.gosub_stack.len();
        self.call_depth += 1;

        self.ip = routine.body;
        let run = loop {
            if self.cancel.is_cancelled() {
                break Err(BasicError::Emu(crate::error::EmuError::Cancelled));
            }
            if self.exit_routine || self.halted || self.ip >= routine.end {
                self.exit_routine = false;
                break Ok(());
            }
            let stmt = self.program.statements[self.ip].clone();
            self.cur_line = stmt.line;
            self.next_ip = self.ip + 1;
            match self.exec_tokens(&stmt.tokens) {
                Ok(()) => self.ip = self.next_ip,
                Err(e) => break Err(e),
            }
        };

        let result = if routine.is_function {
            if is_string_name(&routine.name) {
                Value::Str(
                    self.str_vars
                        .get(&routine.name)
                        .cloned()
                        .unwrap_or_default(),
                )
            } else {
                Value::Int(self.int_vars.get(&routine.name).copied().unwrap_or(0))
            }
        } else {
            Value::Int(0)
        };

        self.call_depth -= 1;
        self.frames.truncate(saved_frames);
        self.gosub_stack.truncate(saved_gosub);
        self.int_vars = saved_int;
        self.str_vars = saved_str;
        self.ip = saved_ip;
        self.next_ip = saved_next;
        self.cur_line = saved_line;

        run?;
        Ok(result)
    }

}

/// Is there a top-level '=' (outside parentheses)? Distinguishes
/// assignments from bare SUB calls.
fn has_toplevel_eq(t: &[String]) -> bool {
    let mut depth = 0i32;
    for tok in t {
        match tok.as_str() {
            "(" => depth += 1,
            ")" => depth -= 1,
            "=" if depth == 0 => return true,
            _ => {}
        }
    }
    false
}

/// Split a token slice on a separator token at parenthesis depth 0.
pub(crate) fn split_toplevel(t: &[String], sep: &str) -> Vec<Vec<String>> {
    let mut groups = Vec::new();
    let mut current = Vec::new();
    let mut depth = 0i32;
    for tok in t {
        match tok.as_str() {
            "(" => {
                depth += 1;
                current.push(tok.clone());
            }
            ")" => {
                depth -= 1;
                current.push(tok.clone());
            }
            s if s == sep && depth == 0 => {
                groups.push(std::mem::take(&mut current));
            }
            _ => current.push(tok.clone()),
        }
    }
    groups.push(current);
    groups
}
