//! Amplitude-driven lip sync.
//!
//! When TTS lip-sync mode is on, decoded speech audio replaces the
//! text-length mouth animation: a windowed amplitude analysis of the PCM
//! buffer drives the mouth-open weight for the duration of playback. A new
//! job supersedes the previous one; the stage keeps only the latest job id.

/// Minimum time between mouth weight updates, seconds
pub const LIPS_SYNC_INTERVAL: f64 = 0.066;

/// Amplitude gate below which the mouth stays closed
const MOUTH_THRESHOLD: f32 = 10.0;
/// Output boost, tens of percent
const MOUTH_BOOST: f32 = 10.0;
/// Damping applied to the amplitude-to-weight mapping
const VOWEL_DAMP: f32 = 53.0;
/// Amplitude floor subtracted before damping
const VOWEL_MIN: f32 = 12.0;
/// Samples analyzed around the playback cursor
const ANALYSIS_WINDOW: usize = 1024;

/// Decoded mono PCM audio
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate: sample_rate.max(1),
        }
    }

    /// Decode 16-bit little-endian PCM
    pub fn from_pcm16(bytes: &[u8], sample_rate: u32) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
            .collect();
        Self::new(samples, sample_rate)
    }

    /// Playback length in seconds
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Mean absolute amplitude in a window around `t`, expressed on the
    /// 0-255 scale of the original byte-frequency analyser.
    fn level_at(&self, t: f64) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let center = (t * self.sample_rate as f64) as usize;
        let start = center.saturating_sub(ANALYSIS_WINDOW / 2);
        let end = (start + ANALYSIS_WINDOW).min(self.samples.len());
        if start >= end {
            return 0.0;
        }

        let sum: f32 = self.samples[start..end].iter().map(|s| s.abs()).sum();
        (sum / (end - start) as f32) * 255.0
    }
}

/// One lip-sync playback bound to a character
pub struct LipSyncJob {
    pub id: u64,
    pub character: String,
    buffer: AudioBuffer,
    cursor: f64,
    last_update: f64,
    level: f32,
}

impl LipSyncJob {
    pub fn new(id: u64, character: &str, buffer: AudioBuffer) -> Self {
        Self {
            id,
            character: character.to_string(),
            buffer,
            cursor: 0.0,
            last_update: f64::NEG_INFINITY,
            level: 0.0,
        }
    }

    /// Advance playback by `dt` and return the current mouth weight, or
    /// None once the buffer has played out. Weight updates are throttled
    /// to one per `LIPS_SYNC_INTERVAL`; the last value holds in between.
    pub fn advance(&mut self, dt: f64) -> Option<f32> {
        self.cursor += dt;
        if self.cursor >= self.buffer.duration() {
            return None;
        }

        if self.cursor - self.last_update >= LIPS_SYNC_INTERVAL {
            let average = self.buffer.level_at(self.cursor);
            let volume = average * (self.buffer.sample_rate as f32 / 48000.0);

            self.level = if volume > MOUTH_THRESHOLD * 2.0 {
                (((average - VOWEL_MIN) / VOWEL_DAMP) * (MOUTH_BOOST / 10.0)).clamp(0.0, 1.0)
            } else {
                0.0
            };
            self.last_update = self.cursor;
        }

        Some(self.level)
    }
}
