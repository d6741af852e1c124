//! SDL2 desktop host: window + streaming texture for the framebuffer,
//! keyboard/mouse forwarding into the input queue, and a square-wave tone
//! driver over an audio queue.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{info, warn};
use sdl2::audio::AudioQueue;
use sdl2::event::Event;
use sdl2::keyboard::{Keycode, Mod};
use sdl2::pixels::PixelFormatEnum;

use crate::basic::{Interpreter, RunOutcome};
use crate::emulator::IoEmulator;
use crate::input::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crate::recorder::ScreenRecorder;
use crate::sound::SoundDriver;

const SAMPLE_RATE: u32 = 44100;
const VOLUME: i16 = 3000;

/// Tone requests crossing from the interpreter thread to the audio queue.
struct Tone {
    freq: u32,
    ms: u32,
}

/// Sound driver handed to the interpreter: forwards tones to the host loop,
/// which owns the SDL audio queue. Non-blocking; the interpreter keeps
/// musical time itself.
struct ChannelToneDriver {
    tx: Sender<Tone>,
}

impl SoundDriver for ChannelToneDriver {
    fn play_tone(&mut self, freq: u32, ms: u32) {
        let _ = self.tx.send(Tone { freq, ms });
    }
}

/// Run a BASIC program inside an SDL window until it finishes or the window
/// closes. `scale` multiplies the emulator resolution for the window size.
pub fn run(
    source: &str,
    screen_mode: i64,
    speed_factor: f64,
    scale: u32,
) -> Result<RunOutcome, String> {
    let sdl_context = sdl2::init()?;
    let video_subsystem = sdl_context.video()?;
    let audio_subsystem = sdl_context.audio()?;
    let desired_spec = sdl2::audio::AudioSpecDesired {
        freq: Some(SAMPLE_RATE as i32),
        channels: Some(1), // Mono is fine for a PC speaker
        samples: None,
    };
    let audio_device: AudioQueue<i16> = audio_subsystem
        .open_queue(None, &desired_spec)
        .map_err(|e| e.to_string())?;
    audio_device.resume();

    let emu = Arc::new(Mutex::new(IoEmulator::new()));
    {
        let mut emu = emu.lock().map_err(|e| e.to_string())?;
        emu.load_screen_mode(screen_mode).map_err(|e| e.to_string())?;
    }
    let (mut width, mut height) = {
        let emu = emu.lock().map_err(|e| e.to_string())?;
        (emu.mode().width as u32, emu.mode().height as u32)
    };

    let window = video_subsystem
        .window("Rust BASIC", width * scale, height * scale)
        .position_centered()
        .build()
        .map_err(|e| e.to_string())?;
    let mut canvas = window.into_canvas().build().map_err(|e| e.to_string())?;
    let texture_creator = canvas.texture_creator();
    let mut texture = texture_creator
        .create_texture_streaming(PixelFormatEnum::RGB24, width, height)
        .map_err(|e| e.to_string())?;

    let (tone_tx, tone_rx): (Sender<Tone>, Receiver<Tone>) = mpsc::channel();
    let input = emu.lock().map_err(|e| e.to_string())?.input();

    let mut interpreter =
        Interpreter::new(Arc::clone(&emu), Box::new(ChannelToneDriver { tx: tone_tx }));
    interpreter.set_speed_factor(speed_factor);
    let cancel = interpreter.cancel_token();

    let program = source.to_string();
    let worker = std::thread::spawn(move || interpreter.run(&program));

    let mut recorder = ScreenRecorder::new(width as usize, height as usize, 15);
    let mut event_pump = sdl_context.event_pump()?;

    'running: loop {
        for event in event_pump.poll_iter() {
            match event {
                Event::Quit { .. } => {
                    cancel.cancel();
                    break 'running;
                }
                Event::KeyDown {
                    keycode: Some(keycode),
                    keymod,
                    ..
                } => {
                    if keycode == Keycode::F12 {
                        recorder.toggle();
                        continue;
                    }
                    if let Some((code, ch)) = map_sdl_key(keycode, keymod) {
                        input.inject(
                            KeyEvent::down(code, ch).with_modifiers(map_modifiers(keymod)),
                        );
                    }
                }
                Event::KeyUp {
                    keycode: Some(keycode),
                    keymod,
                    ..
                } => {
                    if let Some((code, _)) = map_sdl_key(keycode, keymod) {
                        input.inject(KeyEvent {
                            kind: KeyEventKind::Up,
                            code,
                            ch: None,
                            modifiers: map_modifiers(keymod),
                        });
                    }
                }
                _ => {}
            }
        }

        // Mouse is state-polled, not event-queued.
        let mouse = event_pump.mouse_state();
        {
            let emu = emu.lock().unwrap_or_else(|e| e.into_inner());
            emu.set_mouse_state(
                (mouse.x() / scale as i32) as i64,
                (mouse.y() / scale as i32) as i64,
                mouse.left(),
                mouse.right(),
                mouse.middle(),
            );
        }

        // Drain pending tones into the audio queue as square waves.
        while let Ok(tone) = tone_rx.try_recv() {
            queue_square_wave(&audio_device, tone.freq, tone.ms);
        }

        // Present when the framebuffer changed (or the mode did).
        {
            let mut emu = emu.lock().unwrap_or_else(|e| e.into_inner());
            let (w, h) = (emu.mode().width as u32, emu.mode().height as u32);
            if (w, h) != (width, height) {
                width = w;
                height = h;
                texture = texture_creator
                    .create_texture_streaming(PixelFormatEnum::RGB24, width, height)
                    .map_err(|e| e.to_string())?;
                recorder = ScreenRecorder::new(width as usize, height as usize, 15);
            }
            if emu.take_dirty() {
                let palette = emu.palette().to_vec();
                let frame = emu.frame();
                texture
                    .with_lock(None, |buffer: &mut [u8], _pitch: usize| {
                        for (i, &index) in frame.iter().enumerate() {
                            let color = palette
                                .get(index as usize)
                                .copied()
                                .unwrap_or(crate::palette::Color::rgb(0, 0, 0));
                            buffer[i * 3] = color.r();
                            buffer[i * 3 + 1] = color.g();
                            buffer[i * 3 + 2] = color.b();
                        }
                    })
                    .map_err(|e| e.to_string())?;
                recorder.capture(frame, &palette);
                canvas.copy(&texture, None, None)?;
                canvas.present();
            }
        }

        if worker.is_finished() {
            break 'running;
        }
        std::thread::sleep(Duration::from_millis(16));
    }

    cancel.cancel();
    match worker.join() {
        Ok(outcome) => {
            info!("program finished: {:?}", outcome);
            Ok(outcome)
        }
        Err(_) => {
            warn!("interpreter thread panicked");
            Err("interpreter thread panicked".to_string())
        }
    }
}

fn queue_square_wave(device: &AudioQueue<i16>, freq: u32, ms: u32) {
    if freq == 0 || ms == 0 {
        return;
    }
    let samples_count = (SAMPLE_RATE as u64 * ms as u64) / 1000;
    let period = SAMPLE_RATE as f32 / freq as f32;
    let mut buffer = Vec::with_capacity(samples_count as usize);
    for i in 0..samples_count {
        // Square wave: high for the first half of each period.
        let t = i as f32 % period;
        buffer.push(if t < period / 2.0 { VOLUME } else { -VOLUME });
    }
    if let Err(e) = device.queue_audio(&buffer) {
        warn!("audio queue rejected tone: {}", e);
    }
    device.resume();
}

fn map_modifiers(keymod: Mod) -> KeyModifiers {
    let mut m = KeyModifiers::empty();
    if keymod.intersects(Mod::LSHIFTMOD | Mod::RSHIFTMOD) {
        m |= KeyModifiers::SHIFT;
    }
    if keymod.intersects(Mod::LCTRLMOD | Mod::RCTRLMOD) {
        m |= KeyModifiers::CTRL;
    }
    if keymod.intersects(Mod::LALTMOD | Mod::RALTMOD) {
        m |= KeyModifiers::ALT;
    }
    m
}

/// Map an SDL keycode to our key code plus the character it types,
/// respecting shift.
fn map_sdl_key(keycode: Keycode, keymod: Mod) -> Option<(KeyCode, Option<char>)> {
    let shift = keymod.intersects(Mod::LSHIFTMOD | Mod::RSHIFTMOD);

    // Letters
    let letter = |code: KeyCode, lower: char, upper: char| {
        Some((code, Some(if shift { upper } else { lower })))
    };
    // Shifted symbol rows
    let sym = |code: KeyCode, plain: char, shifted: char| {
        Some((code, Some(if shift { shifted } else { plain })))
    };

    match keycode {
        Keycode::A => letter(KeyCode::A, 'a', 'A'),
        Keycode::B => letter(KeyCode::B, 'b', 'B'),
        Keycode::C => letter(KeyCode::C, 'c', 'C'),
        Keycode::D => letter(KeyCode::D, 'd', 'D'),
        Keycode::E => letter(KeyCode::E, 'e', 'E'),
        Keycode::F => letter(KeyCode::F, 'f', 'F'),
        Keycode::G => letter(KeyCode::G, 'g', 'G'),
        Keycode::H => letter(KeyCode::H, 'h', 'H'),
        Keycode::I => letter(KeyCode::I, 'i', 'I'),
        Keycode::J => letter(KeyCode::J, 'j', 'J'),
        Keycode::K => letter(KeyCode::K, 'k', 'K'),
        Keycode::L => letter(KeyCode::L, 'l', 'L'),
        Keycode::M => letter(KeyCode::M, 'm', 'M'),
        Keycode::N => letter(KeyCode::N, 'n', 'N'),
        Keycode::O => letter(KeyCode::O, 'o', 'O'),
        Keycode::P => letter(KeyCode::P, 'p', 'P'),
        Keycode::Q => letter(KeyCode::Q, 'q', 'Q'),
        Keycode::R => letter(KeyCode::R, 'r', 'R'),
        Keycode::S => letter(KeyCode::S, 's', 'S'),
        Keycode::T => letter(KeyCode::T, 't', 'T'),
        Keycode::U => letter(KeyCode::U, 'u', 'U'),
        Keycode::V => letter(KeyCode::V, 'v', 'V'),
        Keycode::W => letter(KeyCode::W, 'w', 'W'),
        Keycode::X => letter(KeyCode::X, 'x', 'X'),
        Keycode::Y => letter(KeyCode::Y, 'y', 'Y'),
        Keycode::Z => letter(KeyCode::Z, 'z', 'Z'),

        Keycode::Num0 => sym(KeyCode::Num0, '0', ')'),
        Keycode::Num1 => sym(KeyCode::Num1, '1', '!'),
        Keycode::Num2 => sym(KeyCode::Num2, '2', '@'),
        Keycode::Num3 => sym(KeyCode::Num3, '3', '#'),
        Keycode::Num4 => sym(KeyCode::Num4, '4', '$'),
        Keycode::Num5 => sym(KeyCode::Num5, '5', '%'),
        Keycode::Num6 => sym(KeyCode::Num6, '6', '^'),
        Keycode::Num7 => sym(KeyCode::Num7, '7', '&'),
        Keycode::Num8 => sym(KeyCode::Num8, '8', '*'),
        Keycode::Num9 => sym(KeyCode::Num9, '9', '('),

        Keycode::Space => Some((KeyCode::Space, Some(' '))),
        Keycode::Return | Keycode::KpEnter => Some((KeyCode::Enter, Some('\r'))),
        Keycode::Backspace => Some((KeyCode::Backspace, Some('\u{8}'))),
        Keycode::Tab => Some((KeyCode::Tab, Some('\t'))),
        Keycode::Escape => Some((KeyCode::Escape, Some('\u{1b}'))),

        Keycode::Minus => sym(KeyCode::Minus, '-', '_'),
        Keycode::Equals => sym(KeyCode::Equals, '=', '+'),
        Keycode::LeftBracket => sym(KeyCode::LeftBracket, '[', '{'),
        Keycode::RightBracket => sym(KeyCode::RightBracket, ']', '}'),
        Keycode::Backslash => sym(KeyCode::Backslash, '\\', '|'),
        Keycode::Semicolon => sym(KeyCode::Semicolon, ';', ':'),
        Keycode::Quote => sym(KeyCode::Quote, '\'', '"'),
        Keycode::Comma => sym(KeyCode::Comma, ',', '<'),
        Keycode::Period => sym(KeyCode::Period, '.', '>'),
        Keycode::Slash => sym(KeyCode::Slash, '/', '?'),
        Keycode::Backquote => sym(KeyCode::Backquote, '`', '~'),

        Keycode::F1 => Some((KeyCode::F1, None)),
        Keycode::F2 => Some((KeyCode::F2, None)),
        Keycode::F3 => Some((KeyCode::F3, None)),
        Keycode::F4 => Some((KeyCode::F4, None)),
        Keycode::F5 => Some((KeyCode::F5, None)),
        Keycode::F6 => Some((KeyCode::F6, None)),
        Keycode::F7 => Some((KeyCode::F7, None)),
        Keycode::F8 => Some((KeyCode::F8, None)),
        Keycode::F9 => Some((KeyCode::F9, None)),
        Keycode::F10 => Some((KeyCode::F10, None)),
        Keycode::F11 => Some((KeyCode::F11, None)),

        Keycode::Up => Some((KeyCode::Up, None)),
        Keycode::Down => Some((KeyCode::Down, None)),
        Keycode::Left => Some((KeyCode::Left, None)),
        Keycode::Right => Some((KeyCode::Right, None)),
        Keycode::Home => Some((KeyCode::Home, None)),
        Keycode::End => Some((KeyCode::End, None)),
        Keycode::PageUp => Some((KeyCode::PageUp, None)),
        Keycode::PageDown => Some((KeyCode::PageDown, None)),
        Keycode::Insert => Some((KeyCode::Insert, None)),
        Keycode::Delete => Some((KeyCode::Delete, None)),

        Keycode::LShift | Keycode::RShift => Some((KeyCode::Shift, None)),
        Keycode::LCtrl | Keycode::RCtrl => Some((KeyCode::Ctrl, None)),
        Keycode::LAlt | Keycode::RAlt => Some((KeyCode::Alt, None)),

        Keycode::Kp0 => Some((KeyCode::Num0, Some('0'))),
        Keycode::Kp1 => Some((KeyCode::Num1, Some('1'))),
        Keycode::Kp2 => Some((KeyCode::Num2, Some('2'))),
        Keycode::Kp3 => Some((KeyCode::Num3, Some('3'))),
        Keycode::Kp4 => Some((KeyCode::Num4, Some('4'))),
        Keycode::Kp5 => Some((KeyCode::Num5, Some('5'))),
        Keycode::Kp6 => Some((KeyCode::Num6, Some('6'))),
        Keycode::Kp7 => Some((KeyCode::Num7, Some('7'))),
        Keycode::Kp8 => Some((KeyCode::Num8, Some('8'))),
        Keycode::Kp9 => Some((KeyCode::Num9, Some('9'))),
        Keycode::KpPeriod => Some((KeyCode::Period, Some('.'))),
        Keycode::KpPlus => Some((KeyCode::Equals, Some('+'))),
        Keycode::KpMinus => Some((KeyCode::Minus, Some('-'))),
        Keycode::KpMultiply => Some((KeyCode::Num8, Some('*'))),
        Keycode::KpDivide => Some((KeyCode::Slash, Some('/'))),

        _ => None,
    }
}
