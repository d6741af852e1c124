use std::fs::File;
use std::io::BufWriter;
use std::time::{Duration, Instant};

use chrono::Local;
use gif::{Encoder, Frame, Repeat};
use log::{info, warn};

use crate::palette::Color;

/// Captures the palette-indexed framebuffer to an animated GIF.
///
/// The palette is applied at capture time, so palette swaps mid-recording
/// show up the way the viewer saw them.
pub struct ScreenRecorder {
    is_recording: bool,
    width: u16,
    height: u16,
    encoder: Option<Encoder<BufWriter<File>>>,
    last_frame_time: Instant,
    frame_delay: Duration,
}

impl ScreenRecorder {
    pub fn new(width: usize, height: usize, fps: u64) -> Self {
        Self {
            is_recording: false,
            width: width as u16,
            height: height as u16,
            encoder: None,
            last_frame_time: Instant::now(),
            frame_delay: Duration::from_millis(1000 / fps.max(1)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_recording
    }

    pub fn toggle(&mut self) {
        if self.is_recording {
            self.stop();
        } else {
            self.start();
        }
    }

    fn start(&mut self) {
        let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
        let filename = format!("rust-basic_capture_{}.gif", timestamp);

        let file = match File::create(&filename) {
            Ok(file) => file,
            Err(e) => {
                warn!("recorder: cannot create {}: {}", filename, e);
                return;
            }
        };
        info!("recorder: started recording to {}", filename);
        let writer = BufWriter::new(file);

        match Encoder::new(writer, self.width, self.height, &[]) {
            Ok(mut encoder) => {
                let _ = encoder.set_repeat(Repeat::Infinite);
                self.encoder = Some(encoder);
                self.is_recording = true;
                self.last_frame_time = Instant::now();
            }
            Err(e) => warn!("recorder: encoder init failed: {}", e),
        }
    }

    fn stop(&mut self) {
        info!("recorder: stopped recording");
        // Dropping the encoder flushes and writes the file trailer.
        self.encoder = None;
        self.is_recording = false;
    }

    /// Feed one indexed frame; drops frames faster than the target fps.
    pub fn capture(&mut self, indexed: &[u8], palette: &[Color]) {
        if !self.is_recording {
            return;
        }
        if self.last_frame_time.elapsed() < self.frame_delay {
            return;
        }
        if let Some(enc) = &mut self.encoder {
            let mut rgb = Vec::with_capacity(indexed.len() * 3);
            for &index in indexed {
                let color = palette
                    .get(index as usize)
                    .copied()
                    .unwrap_or(Color::rgb(0, 0, 0));
                rgb.push(color.r());
                rgb.push(color.g());
                rgb.push(color.b());
            }

            let mut frame = Frame::from_rgb(self.width, self.height, &rgb);
            // GIF frame delay is in units of 10 ms.
            frame.delay = (self.frame_delay.as_millis() / 10) as u16;

            if let Err(e) = enc.write_frame(&frame) {
                warn!("recorder: error writing frame: {}", e);
            }
        }
        self.last_frame_time = Instant::now();
    }
}
