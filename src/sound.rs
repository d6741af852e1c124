use log::debug;

/// One event of a parsed PLAY string.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MusicEvent {
    /// A tone at `freq` Hz for `ms` milliseconds.
    Note { freq: u32, ms: u32 },
    /// Silence for `ms` milliseconds.
    Rest { ms: u32 },
}

impl MusicEvent {
    pub fn duration_ms(&self) -> u32 {
        match *self {
            MusicEvent::Note { ms, .. } | MusicEvent::Rest { ms } => ms,
        }
    }
}

/// The PC speaker cannot go below ~37 Hz; the divisor caps the top end.
pub const MIN_FREQ: u32 = 37;
pub const MAX_FREQ: u32 = 32767;

/// The classic beep: 880 Hz for 200 ms.
pub const BEEP_FREQ: u32 = 880;
pub const BEEP_MS: u32 = 200;

/// Pluggable sound output.
///
/// The contract is synchronous: a blocking driver returns from `play_tone`
/// only after the tone has sounded. Drivers that merely queue audio report
/// `blocking() == false` and the BASIC layer sleeps the equivalent duration
/// itself so musical timing survives.
pub trait SoundDriver: Send {
    fn beep(&mut self) {
        self.play_tone(BEEP_FREQ, BEEP_MS);
    }

    fn play_tone(&mut self, freq: u32, ms: u32);

    /// Play a full PLAY string. The default parses it and hands each note to
    /// `play_tone`; rests are timing-only and are handled by the caller.
    fn play_music_string(&mut self, music: &str) {
        for event in parse_music_string(music) {
            if let MusicEvent::Note { freq, ms } = event {
                self.play_tone(freq, ms);
            }
        }
    }

    /// Whether `play_tone` returns only after the sound finished.
    fn blocking(&self) -> bool {
        false
    }
}

/// Driver that swallows output, recording it for tests.
#[derive(Default)]
pub struct NullSoundDriver {
    pub tones: Vec<(u32, u32)>,
}

impl NullSoundDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SoundDriver for NullSoundDriver {
    fn play_tone(&mut self, freq: u32, ms: u32) {
        debug!("tone {} Hz for {} ms", freq, ms);
        self.tones.push((freq, ms));
    }
}

/// Parse the QBASIC PLAY subset:
/// `T<bpm>`, `L<denom>`, `O<octave>`, `<`, `>`, `P<len>[.]`/`R<len>[.]`,
/// and notes `A-G[#|+|-][len][.]`.
///
/// A quarter note lasts 60000/bpm ms; a length denominator `d` scales that
/// by 4/d; a dot multiplies by 1.5. Pitch is
/// `midi = 12*(octave+1) + semitone`, `freq = 440 * 2^((midi-69)/12)`,
/// clamped to the speaker range. Unrecognized characters are skipped.
pub fn parse_music_string(music: &str) -> Vec<MusicEvent> {
    let mut events = Vec::new();
    let chars: Vec<char> = music.chars().collect();
    let mut pos = 0;

    let mut bpm: u32 = 120;
    let mut default_len: u32 = 4;
    let mut octave: i32 = 4;

    while pos < chars.len() {
        let c = chars[pos].to_ascii_uppercase();
        pos += 1;
        match c {
            'T' => {
                if let Some(n) = read_number(&chars, &mut pos) {
                    if n > 0 {
                        bpm = n;
                    }
                }
            }
            'L' => {
                if let Some(n) = read_number(&chars, &mut pos) {
                    if n > 0 {
                        default_len = n;
                    }
                }
            }
            'O' => {
                if let Some(n) = read_number(&chars, &mut pos) {
                    octave = n as i32;
                }
            }
            '<' => octave -= 1,
            '>' => octave += 1,
            'P' | 'R' => {
                let len = read_number(&chars, &mut pos).unwrap_or(default_len);
                let dotted = read_dot(&chars, &mut pos);
                events.push(MusicEvent::Rest {
                    ms: note_ms(bpm, len, dotted),
                });
            }
            'A'..='G' => {
                let mut semitone = match c {
                    'C' => 0,
                    'D' => 2,
                    'E' => 4,
                    'F' => 5,
                    'G' => 7,
                    'A' => 9,
                    _ => 11, // B
                };
                if pos < chars.len() {
                    match chars[pos] {
                        '#' | '+' => {
                            semitone += 1;
                            pos += 1;
                        }
                        '-' => {
                            semitone -= 1;
                            pos += 1;
                        }
                        _ => {}
                    }
                }
                let len = read_number(&chars, &mut pos).unwrap_or(default_len);
                let dotted = read_dot(&chars, &mut pos);
                let midi = 12 * (octave + 1) + semitone;
                let freq = (440.0 * 2f64.powf((midi as f64 - 69.0) / 12.0)).round() as i64;
                events.push(MusicEvent::Note {
                    freq: freq.clamp(MIN_FREQ as i64, MAX_FREQ as i64) as u32,
                    ms: note_ms(bpm, len, dotted),
                });
            }
            c if c.is_whitespace() => {}
            other => debug!("PLAY: skipping unrecognized '{}'", other),
        }
    }
    events
}

fn read_number(chars: &[char], pos: &mut usize) -> Option<u32> {
    let start = *pos;
    while *pos < chars.len() && chars[*pos].is_ascii_digit() {
        *pos += 1;
    }
    if *pos == start {
        return None;
    }
    chars[start..*pos].iter().collect::<String>().parse().ok()
}

fn read_dot(chars: &[char], pos: &mut usize) -> bool {
    if *pos < chars.len() && chars[*pos] == '.' {
        *pos += 1;
        true
    } else {
        false
    }
}

fn note_ms(bpm: u32, len: u32, dotted: bool) -> u32 {
    let quarter = 60000.0 / bpm as f64;
    let mut ms = quarter * 4.0 / len.max(1) as f64;
    if dotted {
        ms *= 1.5;
    }
    ms.round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a4_is_440() {
        let events = parse_music_string("O4 A");
        assert_eq!(events, vec![MusicEvent::Note { freq: 440, ms: 500 }]);
    }

    #[test]
    fn tempo_and_length_scale_duration() {
        // T60: quarter = 1000 ms. L8 halves it. Dot multiplies by 1.5.
        let events = parse_music_string("T60 L8 C C. P4");
        assert_eq!(events[0].duration_ms(), 500);
        assert_eq!(events[1].duration_ms(), 750);
        assert_eq!(events[2], MusicEvent::Rest { ms: 1000 });
    }

    #[test]
    fn octave_shifts_and_accidentals() {
        let up = parse_music_string("O4 > C");
        let MusicEvent::Note { freq: c5, .. } = up[0] else {
            panic!("expected note");
        };
        // C5 = 523 Hz
        assert_eq!(c5, 523);

        let sharp = parse_music_string("O4 C#");
        let flat = parse_music_string("O4 D-");
        assert_eq!(sharp, flat, "C# and D- are the same pitch");
    }

    #[test]
    fn frequency_clamped_to_speaker_range() {
        let low = parse_music_string("O0 C");
        let MusicEvent::Note { freq, .. } = low[0] else {
            panic!("expected note");
        };
        assert!(freq >= MIN_FREQ, "C0 must clamp up to {} Hz", MIN_FREQ);
    }
}
