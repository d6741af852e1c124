use std::sync::{Arc, Mutex};

use rust_basic::basic::{Interpreter, RunOutcome};
use rust_basic::sound::{BEEP_FREQ, BEEP_MS, MIN_FREQ, MusicEvent, parse_music_string};

mod testrunners;
use testrunners::{RecordingDriver, new_emu};

fn run_with_recorder(source: &str) -> (RunOutcome, Vec<(u32, u32)>) {
    let tones = Arc::new(Mutex::new(Vec::new()));
    let driver = RecordingDriver {
        tones: Arc::clone(&tones),
    };
    let mut interpreter = Interpreter::new(new_emu(), Box::new(driver));
    interpreter.set_speed_factor(100_000.0);
    let outcome = interpreter.run(source);
    let recorded = tones.lock().unwrap().clone();
    (outcome, recorded)
}

#[test]
fn test_beep_statement_plays_the_classic_tone() {
    let (outcome, tones) = run_with_recorder("BEEP");
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(tones, vec![(BEEP_FREQ, BEEP_MS)]);
}

#[test]
fn test_sound_statement_passes_frequency_and_duration() {
    let (outcome, tones) = run_with_recorder("SOUND 440, 250\nSOUND 1000, 10");
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(tones, vec![(440, 250), (1000, 10)]);
}

#[test]
fn test_play_statement_walks_the_music_string() {
    // T60: quarter note = 1000 ms. O4 A = 440 Hz.
    let (outcome, tones) = run_with_recorder("PLAY \"T60 O4 A P4 A8\"");
    assert_eq!(outcome, RunOutcome::Completed);
    // The rest never reaches the driver; it is timing only.
    assert_eq!(tones, vec![(440, 1000), (440, 500)]);
}

#[test]
fn test_play_string_grammar_corner_cases() {
    // Octave shifts persist across notes.
    let events = parse_music_string("T120 L4 O3 > C < C");
    let freqs: Vec<u32> = events
        .iter()
        .map(|e| match *e {
            MusicEvent::Note { freq, .. } => freq,
            MusicEvent::Rest { .. } => 0,
        })
        .collect();
    assert_eq!(freqs, vec![262, 131], "O4 C then O3 C");

    // Dotted rests, both spellings.
    let events = parse_music_string("T60 P8. R8.");
    assert_eq!(
        events,
        vec![MusicEvent::Rest { ms: 750 }, MusicEvent::Rest { ms: 750 }]
    );

    // Sub-audible notes clamp to the speaker floor.
    let events = parse_music_string("O0 C");
    assert!(matches!(
        events[0],
        MusicEvent::Note { freq, .. } if freq == MIN_FREQ
    ));
}
