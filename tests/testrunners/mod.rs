use std::sync::{Arc, Mutex};

use rust_basic::basic::{Interpreter, RunOutcome};
use rust_basic::emulator::IoEmulator;
use rust_basic::input::{KeyCode, KeyEvent};
use rust_basic::sound::{NullSoundDriver, SoundDriver};

/// Everything a test wants to inspect after a run.
#[allow(dead_code)]
pub struct RunResult {
    pub outcome: RunOutcome,
    /// Concatenation of every string PRINT emitted (including CR/LF).
    pub output: String,
    pub emu: Arc<Mutex<IoEmulator>>,
}

#[allow(dead_code)]
pub fn new_emu() -> Arc<Mutex<IoEmulator>> {
    Arc::new(Mutex::new(IoEmulator::new()))
}

/// Run a program headless against a fresh emulator.
#[allow(dead_code)]
pub fn run_program(source: &str) -> RunResult {
    run_program_on(source, new_emu())
}

/// Run a program against a prepared emulator (pre-injected keys, modes...).
/// The speed factor collapses SLEEP/SOUND waits so tests stay fast.
#[allow(dead_code)]
pub fn run_program_on(source: &str, emu: Arc<Mutex<IoEmulator>>) -> RunResult {
    let output = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&output);

    let mut interpreter = Interpreter::new(Arc::clone(&emu), Box::new(NullSoundDriver::new()));
    interpreter.set_speed_factor(10_000.0);
    interpreter.set_print_hook(Box::new(move |s| {
        sink.lock().unwrap().push_str(s);
    }));

    let outcome = interpreter.run(source);
    let output = output.lock().unwrap().clone();
    RunResult {
        outcome,
        output,
        emu,
    }
}

/// Type a whole line into the input queue: one Down per character plus the
/// final Enter, the way LINE INPUT sees a user typing.
#[allow(dead_code)]
pub fn type_line(emu: &Arc<Mutex<IoEmulator>>, text: &str) {
    let emu = emu.lock().unwrap();
    for ch in text.chars() {
        let code = char_key(ch);
        emu.inject_key(KeyEvent::down(code, Some(ch)));
        emu.inject_key(KeyEvent::up(code));
    }
    emu.inject_key(KeyEvent::down(KeyCode::Enter, Some('\r')));
    emu.inject_key(KeyEvent::up(KeyCode::Enter));
}

/// Rough char-to-keycode mapping; tests only need something plausible.
#[allow(dead_code)]
fn char_key(ch: char) -> KeyCode {
    match ch.to_ascii_lowercase() {
        'a' => KeyCode::A,
        'b' => KeyCode::B,
        'c' => KeyCode::C,
        'd' => KeyCode::D,
        'e' => KeyCode::E,
        'f' => KeyCode::F,
        'g' => KeyCode::G,
        'h' => KeyCode::H,
        'i' => KeyCode::I,
        'j' => KeyCode::J,
        'k' => KeyCode::K,
        'l' => KeyCode::L,
        'm' => KeyCode::M,
        'n' => KeyCode::N,
        'o' => KeyCode::O,
        'p' => KeyCode::P,
        'q' => KeyCode::Q,
        'r' => KeyCode::R,
        's' => KeyCode::S,
        't' => KeyCode::T,
        'u' => KeyCode::U,
        'v' => KeyCode::V,
        'w' => KeyCode::W,
        'x' => KeyCode::X,
        'y' => KeyCode::Y,
        'z' => KeyCode::Z,
        '0' => KeyCode::Num0,
        '1' => KeyCode::Num1,
        '2' => KeyCode::Num2,
        '3' => KeyCode::Num3,
        '4' => KeyCode::Num4,
        '5' => KeyCode::Num5,
        '6' => KeyCode::Num6,
        '7' => KeyCode::Num7,
        '8' => KeyCode::Num8,
        '9' => KeyCode::Num9,
        ' ' => KeyCode::Space,
        _ => KeyCode::Period,
    }
}

/// A sound driver that records every tone for later assertions.
#[allow(dead_code)]
pub struct RecordingDriver {
    pub tones: Arc<Mutex<Vec<(u32, u32)>>>,
}

impl SoundDriver for RecordingDriver {
    fn play_tone(&mut self, freq: u32, ms: u32) {
        self.tones.lock().unwrap().push((freq, ms));
    }
}
