use chrono::{Local, Timelike};

use super::BasicError;
use super::interpreter::Interpreter;
use super::tokenizer::{is_kw, is_string_literal, unquote};
use crate::input::{KeyCode, KeyEventKind, KeyModifiers};

/// A BASIC value: 64-bit integer or string. The dialect has no floats;
/// trig results are fixed-point (x100).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Str(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::Str(_) => "string",
        }
    }

    /// The text PRINT emits for this value.
    pub fn display(&self) -> String {
        match self {
            Value::Int(n) => n.to_string(),
            Value::Str(s) => s.clone(),
        }
    }
}

/// Base names (sigils stripped) that may never be assigned to.
pub const RESERVED_BASE: &[&str] = &[
    "LEN", "SQR", "SIN", "COS", "ATN", "RND", "VAL", "LEFT", "RIGHT", "MID", "STR", "LTRIM",
    "RTRIM", "TRIM", "CHR", "ASC", "INKEY", "TIMER", "TIME", "DATE", "POINT", "PC", "PX",
    "MOUSEX", "MOUSEY", "MOUSE_LEFT", "MOUSE_RIGHT", "MOUSE_MIDDLE", "KEY", "SHIFT", "CTRL",
    "ALT",
];

/// True when `name` (any case, with or without a trailing sigil) collides
/// with a built-in function name.
pub fn is_reserved(name: &str) -> bool {
    let base = strip_sigils(&name.to_ascii_uppercase());
    RESERVED_BASE.iter().any(|r| *r == base)
}

fn strip_sigils(name: &str) -> String {
    name.trim_end_matches(['$', '%', '&', '!', '#']).to_string()
}

/// Canonical variable key: uppercase, numeric sigils dropped (one integer
/// namespace), '$' kept (separate string namespace).
pub fn normalize_name(name: &str) -> String {
    let mut n = name.to_ascii_uppercase();
    while n.ends_with(['%', '&', '!', '#']) {
        n.pop();
    }
    n
}

pub fn is_string_name(name: &str) -> bool {
    normalize_name(name).ends_with('$')
}

/// Multiplicative congruential generator, the classic 64-bit constants.
/// Deterministic under RANDOMIZE with a fixed seed.
#[derive(Debug, Clone)]
pub struct Lcg {
    state: u64,
}

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Lcg {
            state: seed ^ 0x5DEECE66D,
        }
    }

    fn next_u32(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.state >> 32) as u32
    }

    /// Uniform integer in [1, n]; n below 1 is treated as 1.
    pub fn range(&mut self, n: i64) -> i64 {
        let n = n.max(1) as u64;
        1 + (self.next_u32() as u64 % n) as i64
    }
}

/// Integer power with saturation; negative exponents follow integer math
/// (only +/-1 survive).
fn ipow(base: i64, exp: i64) -> i64 {
    if exp < 0 {
        return match base {
            1 => 1,
            -1 => {
                if exp % 2 == 0 {
                    1
                } else {
                    -1
                }
            }
            _ => 0,
        };
    }
    let mut result: i64 = 1;
    for _ in 0..exp.min(127) {
        result = match result.checked_mul(base) {
            Some(r) => r,
            None => {
                return if (base < 0) && (exp % 2 == 1) {
                    i64::MIN
                } else {
                    i64::MAX
                };
            }
        };
    }
    result
}

/// VAL: parse the leading number of a string, 0 when there is none.
/// Fractions are truncated toward zero.
pub fn val_of(s: &str) -> i64 {
    let t = s.trim_start();
    let mut end = 0;
    let bytes = t.as_bytes();
    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end == digits_start {
        return 0;
    }
    t[..end].parse::<f64>().map(|f| f.trunc() as i64).unwrap_or(0)
}

impl Interpreter {
    // ------------------------------------------------------------------
    // Entry points
    // ------------------------------------------------------------------

    /// Evaluate a full token slice; trailing tokens are a syntax error.
    pub(crate) fn eval_full(&mut self, tokens: &[String]) -> Result<Value, BasicError> {
        if tokens.is_empty() {
            return self.syntax("expected an expression");
        }
        let mut pos = 0;
        let value = self.parse_expr(tokens, &mut pos)?;
        if pos != tokens.len() {
            return self.syntax(format!("unexpected '{}'", tokens[pos]));
        }
        Ok(value)
    }

    pub(crate) fn eval_int(&mut self, tokens: &[String]) -> Result<i64, BasicError> {
        let value = self.eval_full(tokens)?;
        self.want_int(value)
    }

    pub(crate) fn want_int(&self, value: Value) -> Result<i64, BasicError> {
        match value {
            Value::Int(n) => Ok(n),
            Value::Str(_) => self.runtime("type mismatch: expected an integer"),
        }
    }

    pub(crate) fn want_str(&self, value: Value) -> Result<String, BasicError> {
        match value {
            Value::Str(s) => Ok(s),
            Value::Int(_) => self.runtime("type mismatch: expected a string"),
        }
    }

    /// Truthiness: any non-zero integer.
    pub(crate) fn truthy(&self, value: Value) -> Result<bool, BasicError> {
        Ok(self.want_int(value)? != 0)
    }

    // ------------------------------------------------------------------
    // Precedence climbing: OR < AND < NOT < comparison < add < mul < pow
    // < unary
    // ------------------------------------------------------------------

    pub(crate) fn parse_expr(
        &mut self,
        t: &[String],
        p: &mut usize,
    ) -> Result<Value, BasicError> {
        self.parse_or(t, p)
    }

    fn parse_or(&mut self, t: &[String], p: &mut usize) -> Result<Value, BasicError> {
        let mut left = self.parse_and(t, p)?;
        while peek_kw(t, *p, "OR") {
            *p += 1;
            let right = self.parse_and(t, p)?;
            left = Value::Int(self.want_int(left)? | self.want_int(right)?);
        }
        Ok(left)
    }

    fn parse_and(&mut self, t: &[String], p: &mut usize) -> Result<Value, BasicError> {
        let mut left = self.parse_not(t, p)?;
        while peek_kw(t, *p, "AND") {
            *p += 1;
            let right = self.parse_not(t, p)?;
            left = Value::Int(self.want_int(left)? & self.want_int(right)?);
        }
        Ok(left)
    }

    fn parse_not(&mut self, t: &[String], p: &mut usize) -> Result<Value, BasicError> {
        if peek_kw(t, *p, "NOT") {
            *p += 1;
            let value = self.parse_not(t, p)?;
            return Ok(Value::Int(!self.want_int(value)?));
        }
        self.parse_comparison(t, p)
    }

    fn parse_comparison(&mut self, t: &[String], p: &mut usize) -> Result<Value, BasicError> {
        let mut left = self.parse_add(t, p)?;
        while let Some(op) = t.get(*p).filter(|op| {
            matches!(op.as_str(), "=" | "<>" | "<" | "<=" | ">" | ">=")
        }) {
            let op = op.clone();
            *p += 1;
            let right = self.parse_add(t, p)?;
            let holds = match (&left, &right) {
                (Value::Int(a), Value::Int(b)) => compare(&op, a, b),
                (Value::Str(a), Value::Str(b)) => compare(&op, a, b),
                _ => {
                    return self.runtime(format!(
                        "type mismatch: cannot compare {} with {}",
                        left.type_name(),
                        right.type_name()
                    ));
                }
            };
            // BASIC truth is -1.
            left = Value::Int(if holds { -1 } else { 0 });
        }
        Ok(left)
    }

    fn parse_add(&mut self, t: &[String], p: &mut usize) -> Result<Value, BasicError> {
        let mut left = self.parse_mul(t, p)?;
        while let Some(op) = t.get(*p).filter(|op| matches!(op.as_str(), "+" | "-")) {
            let op = op.clone();
            *p += 1;
            let right = self.parse_mul(t, p)?;
            left = match (left, right, op.as_str()) {
                (Value::Int(a), Value::Int(b), "+") => Value::Int(a.wrapping_add(b)),
                (Value::Int(a), Value::Int(b), "-") => Value::Int(a.wrapping_sub(b)),
                (Value::Str(a), Value::Str(b), "+") => Value::Str(a + &b),
                (l, r, op) => {
                    return self.runtime(format!(
                        "type mismatch: {} {} {}",
                        l.type_name(),
                        op,
                        r.type_name()
                    ));
                }
            };
        }
        Ok(left)
    }

    fn parse_mul(&mut self, t: &[String], p: &mut usize) -> Result<Value, BasicError> {
        let mut left = self.parse_pow(t, p)?;
        loop {
            let op = match t.get(*p) {
                Some(op) if matches!(op.as_str(), "*" | "/" | "\\") => op.clone(),
                Some(op) if is_kw(op, "MOD") => "MOD".to_string(),
                _ => break,
            };
            *p += 1;
            let right = self.parse_pow(t, p)?;
            let a = self.want_int(left)?;
            let b = self.want_int(right)?;
            let result = match op.as_str() {
                "*" => a.wrapping_mul(b),
                // Integer division; dividing by zero yields 0, not a fault.
                "/" | "\\" => a.checked_div(b).unwrap_or(0),
                _ => a.checked_rem(b).unwrap_or(0),
            };
            left = Value::Int(result);
        }
        Ok(left)
    }

    fn parse_pow(&mut self, t: &[String], p: &mut usize) -> Result<Value, BasicError> {
        let mut left = self.parse_unary(t, p)?;
        while t.get(*p).is_some_and(|op| op == "^") {
            *p += 1;
            let right = self.parse_unary(t, p)?;
            let base = self.want_int(left)?;
            let exp = self.want_int(right)?;
            left = Value::Int(ipow(base, exp));
        }
        Ok(left)
    }

    fn parse_unary(&mut self, t: &[String], p: &mut usize) -> Result<Value, BasicError> {
        match t.get(*p).map(|s| s.as_str()) {
            Some("-") => {
                *p += 1;
                let value = self.parse_unary(t, p)?;
                Ok(Value::Int(self.want_int(value)?.wrapping_neg()))
            }
            Some("+") => {
                *p += 1;
                self.parse_unary(t, p)
            }
            _ => self.parse_atom(t, p),
        }
    }

    // ------------------------------------------------------------------
    // Atoms: literals, parens, variables, arrays, builtins, functions
    // ------------------------------------------------------------------

    fn parse_atom(&mut self, t: &[String], p: &mut usize) -> Result<Value, BasicError> {
        let Some(token) = t.get(*p).cloned() else {
            return self.syntax("unexpected end of expression");
        };

        if token == "(" {
            *p += 1;
            let value = self.parse_expr(t, p)?;
            self.expect(t, p, ")")?;
            return Ok(value);
        }

        if is_string_literal(&token) {
            *p += 1;
            return Ok(Value::Str(unquote(&token)));
        }

        if token.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            *p += 1;
            if let Ok(n) = token.parse::<i64>() {
                return Ok(Value::Int(n));
            }
            if let Ok(f) = token.parse::<f64>() {
                return Ok(Value::Int(f.trunc() as i64));
            }
            return self.syntax(format!("malformed number '{}'", token));
        }

        if token.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
            *p += 1;
            return self.parse_name(t, p, &token);
        }

        self.syntax(format!("unexpected '{}'", token))
    }

    fn parse_name(
        &mut self,
        t: &[String],
        p: &mut usize,
        token: &str,
    ) -> Result<Value, BasicError> {
        let upper = token.to_ascii_uppercase();

        if let Some(value) = self.builtin_no_args(&upper)? {
            return Ok(value);
        }
        if is_builtin_with_args(&upper) {
            let args = self.parse_args(t, p)?;
            return self.call_builtin(&upper, args);
        }

        let name = normalize_name(token);
        if self.routines.contains_key(&name) {
            let args = if t.get(*p).is_some_and(|tok| tok == "(") {
                self.parse_args(t, p)?
            } else {
                Vec::new()
            };
            return self.call_routine(&name, args);
        }

        // Reserved names that survived the builtin dispatch (PC, PX, or a
        // sigil variant of a function name) are not readable as variables.
        if is_reserved(token) {
            return self.syntax(format!("'{}' is a reserved name", token));
        }

        if t.get(*p).is_some_and(|tok| tok == "(") {
            let args = self.parse_args(t, p)?;
            let mut indices = Vec::with_capacity(args.len());
            for arg in args {
                indices.push(self.want_int(arg)?);
            }
            return self.array_read(&name, &indices);
        }

        // Plain variable; unset integers read 0, unset strings "".
        if is_string_name(&name) {
            Ok(Value::Str(
                self.str_vars.get(&name).cloned().unwrap_or_default(),
            ))
        } else {
            Ok(Value::Int(self.int_vars.get(&name).copied().unwrap_or(0)))
        }
    }

    pub(crate) fn parse_args(
        &mut self,
        t: &[String],
        p: &mut usize,
    ) -> Result<Vec<Value>, BasicError> {
        self.expect(t, p, "(")?;
        let mut args = Vec::new();
        if t.get(*p).is_some_and(|tok| tok == ")") {
            *p += 1;
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr(t, p)?);
            match t.get(*p).map(|s| s.as_str()) {
                Some(",") => *p += 1,
                Some(")") => {
                    *p += 1;
                    return Ok(args);
                }
                _ => return self.syntax("expected ',' or ')' in argument list"),
            }
        }
    }

    fn expect(&self, t: &[String], p: &mut usize, what: &str) -> Result<(), BasicError> {
        if t.get(*p).is_some_and(|tok| tok == what) {
            *p += 1;
            Ok(())
        } else {
            self.syntax(format!("expected '{}'", what))
        }
    }

    // ------------------------------------------------------------------
    // Builtins
    // ------------------------------------------------------------------

    /// Builtins that take no argument list.
    fn builtin_no_args(&mut self, upper: &str) -> Result<Option<Value>, BasicError> {
        let value = match upper {
            "INKEY$" => Some(Value::Str(self.inkey())),
            "TIMER" => {
                let now = Local::now();
                Some(Value::Int(now.num_seconds_from_midnight() as i64))
            }
            "TIME$" => Some(Value::Str(Local::now().format("%H:%M:%S").to_string())),
            "DATE$" => Some(Value::Str(Local::now().format("%m-%d-%Y").to_string())),
            "MOUSEX" => Some(Value::Int(self.emu().mouse().x)),
            "MOUSEY" => Some(Value::Int(self.emu().mouse().y)),
            "MOUSE_LEFT" => Some(Value::Int(bool_val(self.emu().mouse().left))),
            "MOUSE_RIGHT" => Some(Value::Int(bool_val(self.emu().mouse().right))),
            "MOUSE_MIDDLE" => Some(Value::Int(bool_val(self.emu().mouse().middle))),
            "SHIFT" => Some(Value::Int(bool_val(self.modifier_down(
                KeyModifiers::SHIFT,
                KeyCode::Shift,
            )))),
            "CTRL" => Some(Value::Int(bool_val(self.modifier_down(
                KeyModifiers::CTRL,
                KeyCode::Ctrl,
            )))),
            "ALT" => Some(Value::Int(bool_val(
                self.modifier_down(KeyModifiers::ALT, KeyCode::Alt),
            ))),
            _ => None,
        };
        Ok(value)
    }

    fn call_builtin(&mut self, upper: &str, args: Vec<Value>) -> Result<Value, BasicError> {
        let argc = args.len();
        let mut args = args.into_iter();
        let mut next = || args.next();
        let wrong = |this: &Self| -> Result<Value, BasicError> {
            this.syntax(format!("wrong number of arguments to {}", upper))
        };

        match upper {
            "LEN" => {
                let Some(s) = next() else { return wrong(self) };
                Ok(Value::Int(self.want_str(s)?.chars().count() as i64))
            }
            "SQR" => {
                let Some(n) = next() else { return wrong(self) };
                let n = self.want_int(n)?;
                Ok(Value::Int(if n > 0 {
                    (n as f64).sqrt().trunc() as i64
                } else {
                    0
                }))
            }
            "SIN" | "COS" => {
                let Some(n) = next() else { return wrong(self) };
                let degrees = self.want_int(n)? as f64;
                let r = degrees.to_radians();
                let v = if upper == "SIN" { r.sin() } else { r.cos() };
                // Fixed-point: result scaled by 100 and truncated.
                Ok(Value::Int((v * 100.0).trunc() as i64))
            }
            "ATN" => {
                let Some(n) = next() else { return wrong(self) };
                // Argument on the same x100 scale the other trig functions
                // produce; the result is degrees x100.
                let ratio = self.want_int(n)? as f64 / 100.0;
                Ok(Value::Int((ratio.atan().to_degrees() * 100.0).trunc() as i64))
            }
            "RND" => {
                let Some(n) = next() else { return wrong(self) };
                let n = self.want_int(n)?;
                Ok(Value::Int(self.rng.range(n)))
            }
            "VAL" => {
                let Some(s) = next() else { return wrong(self) };
                Ok(Value::Int(val_of(&self.want_str(s)?)))
            }
            "LEFT$" => {
                let (Some(s), Some(n)) = (next(), next()) else {
                    return wrong(self);
                };
                let s = self.want_str(s)?;
                let n = self.want_int(n)?.max(0) as usize;
                Ok(Value::Str(s.chars().take(n).collect()))
            }
            "RIGHT$" => {
                let (Some(s), Some(n)) = (next(), next()) else {
                    return wrong(self);
                };
                let s = self.want_str(s)?;
                let n = self.want_int(n)?.max(0) as usize;
                let len = s.chars().count();
                Ok(Value::Str(s.chars().skip(len.saturating_sub(n)).collect()))
            }
            "MID$" => {
                let (Some(s), Some(start)) = (next(), next()) else {
                    return wrong(self);
                };
                let s = self.want_str(s)?;
                let start = (self.want_int(start)?.max(1) - 1) as usize;
                let len = match next() {
                    Some(v) => self.want_int(v)?.max(0) as usize,
                    None => usize::MAX,
                };
                if argc > 3 {
                    return wrong(self);
                }
                Ok(Value::Str(s.chars().skip(start).take(len).collect()))
            }
            "STR$" => {
                let Some(n) = next() else { return wrong(self) };
                Ok(Value::Str(self.want_int(n)?.to_string()))
            }
            "LTRIM$" => {
                let Some(s) = next() else { return wrong(self) };
                Ok(Value::Str(self.want_str(s)?.trim_start().to_string()))
            }
            "RTRIM$" => {
                let Some(s) = next() else { return wrong(self) };
                Ok(Value::Str(self.want_str(s)?.trim_end().to_string()))
            }
            "TRIM$" => {
                let Some(s) = next() else { return wrong(self) };
                Ok(Value::Str(self.want_str(s)?.trim().to_string()))
            }
            "CHR$" => {
                let Some(n) = next() else { return wrong(self) };
                let code = (self.want_int(n)? & 0xFF) as u32;
                let ch = char::from_u32(code).unwrap_or('\u{0}');
                Ok(Value::Str(ch.to_string()))
            }
            "ASC" => {
                let Some(s) = next() else { return wrong(self) };
                let s = self.want_str(s)?;
                Ok(Value::Int(
                    s.chars().next().map(|c| c as u32 as i64).unwrap_or(0),
                ))
            }
            "POINT" => {
                let (Some(x), Some(y)) = (next(), next()) else {
                    return wrong(self);
                };
                let x = self.want_int(x)?;
                let y = self.want_int(y)?;
                Ok(Value::Int(self.emu().point(x, y) as i64))
            }
            "KEY" => {
                let Some(n) = next() else { return wrong(self) };
                let scan = self.want_int(n)?;
                let down = u8::try_from(scan)
                    .ok()
                    .and_then(KeyCode::from_scan_code)
                    .is_some_and(|code| self.emu().is_key_down(code));
                Ok(Value::Int(bool_val(down)))
            }
            _ => self.syntax(format!("unknown function {}", upper)),
        }
    }

    /// Pop the next Down event and map it to INKEY$'s string form.
    /// Control keys map to their classic codes; Enter echoes LF.
    fn inkey(&mut self) -> String {
        loop {
            let Some(ev) = self.emu().try_read_key() else {
                return String::new();
            };
            if ev.kind != KeyEventKind::Down {
                continue;
            }
            return match ev.code {
                KeyCode::Enter => "\n".to_string(),
                KeyCode::Backspace => "\u{8}".to_string(),
                KeyCode::Tab => "\t".to_string(),
                KeyCode::Escape => "\u{1b}".to_string(),
                _ => match ev.ch {
                    Some(ch) if !ch.is_control() => ch.to_string(),
                    _ => String::new(),
                },
            };
        }
    }

    fn modifier_down(&self, flag: KeyModifiers, code: KeyCode) -> bool {
        let emu = self.emu();
        emu.is_key_down(code) || emu.input_modifiers().contains(flag)
    }
}

fn bool_val(b: bool) -> i64 {
    if b { -1 } else { 0 }
}

fn compare<T: PartialOrd + PartialEq>(op: &str, a: &T, b: &T) -> bool {
    match op {
        "=" => a == b,
        "<>" => a != b,
        "<" => a < b,
        "<=" => a <= b,
        ">" => a > b,
        ">=" => a >= b,
        _ => false,
    }
}

fn peek_kw(t: &[String], p: usize, kw: &str) -> bool {
    t.get(p).is_some_and(|tok| is_kw(tok, kw))
}

/// Builtins invoked with a parenthesized argument list.
fn is_builtin_with_args(upper: &str) -> bool {
    matches!(
        upper,
        "LEN"
            | "SQR"
            | "SIN"
            | "COS"
            | "ATN"
            | "RND"
            | "VAL"
            | "LEFT$"
            | "RIGHT$"
            | "MID$"
            | "STR$"
            | "LTRIM$"
            | "RTRIM$"
            | "TRIM$"
            | "CHR$"
            | "ASC"
            | "POINT"
            | "KEY"
    )
}
