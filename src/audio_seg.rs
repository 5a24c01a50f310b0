//! Audio segmentation module
//!
//! Classifies fixed-size PCM frames as speech or silence with a mean-amplitude
//! energy gate, and accumulates frames into turns bounded by trailing silence.
//! Time is supplied by the caller so the state machine can be driven by a
//! synthetic clock.

use std::time::{Duration, Instant};
use tracing::{debug, span, Level};

/// Capture sample rate (16 kHz mono)
pub const SAMPLE_RATE: u32 = 16_000;

/// Samples per frame read from the device (64 ms at 16 kHz)
pub const FRAME_SAMPLES: usize = 1024;

/// Mean absolute amplitude above which a frame counts as speech
pub const ENERGY_THRESHOLD: f32 = 400.0;

/// Mean of absolute sample values. Empty frames have zero energy.
pub fn frame_energy(frame: &[i16]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum: u64 = frame.iter().map(|&s| (s as i32).unsigned_abs() as u64).sum();
    (sum as f64 / frame.len() as f64) as f32
}

/// Convert i16 PCM to normalized f32 in [-1.0, 1.0]
pub fn pcm_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Fixed-threshold speech/silence classifier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyGate {
    threshold: f32,
}

impl EnergyGate {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// A frame is speech iff its energy strictly exceeds the threshold.
    pub fn is_speech(&self, frame: &[i16]) -> bool {
        frame_energy(frame) > self.threshold
    }
}

impl Default for EnergyGate {
    fn default() -> Self {
        Self::new(ENERGY_THRESHOLD)
    }
}

/// Configuration for turn segmentation
#[derive(Debug, Clone)]
pub struct SegConfig {
    /// Energy threshold for the speech gate
    pub threshold: f32,

    /// Trailing silence that closes a turn
    pub silence_duration: Duration,

    /// Shortest accumulated turn, trailing silence included, handed downstream
    pub min_speech_duration: Duration,

    /// Sample rate of incoming frames
    pub sample_rate: u32,
}

impl Default for SegConfig {
    fn default() -> Self {
        Self {
            threshold: ENERGY_THRESHOLD,
            silence_duration: Duration::from_secs(1),
            min_speech_duration: Duration::from_millis(500),
            sample_rate: SAMPLE_RATE,
        }
    }
}

/// Segmenter state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegState {
    Idle,
    Recording,
    TrailingSilence { since: Instant },
}

/// A finalized turn
#[derive(Debug, Clone)]
pub struct CompletedTurn {
    /// Concatenated PCM of every accumulated frame, trailing silence included
    pub pcm: Vec<i16>,

    /// Number of frames accumulated
    pub frames: usize,

    /// Frames of the final silence run that closed the turn
    pub trailing_silence_frames: usize,

    pub sample_rate: u32,
}

impl CompletedTurn {
    /// Frames from the first speech frame through the last speech frame
    pub fn span_frames(&self) -> usize {
        self.frames - self.trailing_silence_frames
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.pcm.len() as f64 / self.sample_rate as f64)
    }

    /// Normalized float audio for the recognizer
    pub fn samples_f32(&self) -> Vec<f32> {
        pcm_to_f32(&self.pcm)
    }
}

/// Notifications produced while pushing frames
#[derive(Debug, Clone)]
pub enum SegmentEvent {
    /// First speech frame of a new turn
    SpeechStarted,

    /// Turn closed by trailing silence with enough voiced audio
    TurnCompleted(CompletedTurn),

    /// Turn closed by trailing silence but too short to keep, or with no speech
    TurnDiscarded { frames: usize },
}

/// Stateful accumulator turning frames into turns
pub struct TurnSegmenter {
    gate: EnergyGate,
    cfg: SegConfig,
    state: SegState,

    /// PCM of every frame in the current turn
    buffer: Vec<i16>,

    /// Frames accumulated in the current turn
    frames: usize,

    /// Frames in the current silence run
    trailing_frames: usize,

    speech_detected: bool,
}

impl TurnSegmenter {
    pub fn new(cfg: SegConfig) -> Self {
        Self {
            gate: EnergyGate::new(cfg.threshold),
            cfg,
            state: SegState::Idle,
            buffer: Vec::with_capacity(SAMPLE_RATE as usize * 8),
            frames: 0,
            trailing_frames: 0,
            speech_detected: false,
        }
    }

    /// Classify one frame and advance the state machine.
    pub fn push_frame(&mut self, frame: &[i16], now: Instant) -> Option<SegmentEvent> {
        let _span = span!(Level::TRACE, "segment.push_frame").entered();
        let is_speech = self.gate.is_speech(frame);

        match (self.state, is_speech) {
            (SegState::Idle, true) => {
                debug!("Speech started");
                self.append(frame);
                self.speech_detected = true;
                self.state = SegState::Recording;
                Some(SegmentEvent::SpeechStarted)
            }
            (SegState::Idle, false) => None,
            (SegState::Recording, true) => {
                self.append(frame);
                None
            }
            (SegState::Recording, false) => {
                self.append(frame);
                self.trailing_frames = 1;
                self.state = SegState::TrailingSilence { since: now };
                None
            }
            (SegState::TrailingSilence { .. }, true) => {
                // Speech resumed before the timeout; same turn
                self.append(frame);
                self.trailing_frames = 0;
                self.state = SegState::Recording;
                None
            }
            (SegState::TrailingSilence { since }, false) => {
                self.append(frame);
                self.trailing_frames += 1;
                if now.saturating_duration_since(since) >= self.cfg.silence_duration {
                    Some(self.finalize_turn())
                } else {
                    None
                }
            }
        }
    }

    fn append(&mut self, frame: &[i16]) {
        self.buffer.extend_from_slice(frame);
        self.frames += 1;
    }

    fn finalize_turn(&mut self) -> SegmentEvent {
        let span_frames = self.frames - self.trailing_frames;
        let secs = self.buffer.len() as f64 / self.cfg.sample_rate as f64;
        let long_enough = secs >= self.cfg.min_speech_duration.as_secs_f64();

        let event = if self.speech_detected && long_enough {
            debug!(
                "Closing turn: {} frames ({} before trailing silence, {:.2}s)",
                self.frames, span_frames, secs
            );
            SegmentEvent::TurnCompleted(CompletedTurn {
                pcm: std::mem::take(&mut self.buffer),
                frames: self.frames,
                trailing_silence_frames: self.trailing_frames,
                sample_rate: self.cfg.sample_rate,
            })
        } else {
            debug!("Discarding short turn: {:.2}s accumulated", secs);
            SegmentEvent::TurnDiscarded {
                frames: self.frames,
            }
        };

        self.reset();
        event
    }

    /// Drop any partially accumulated turn and return to idle.
    pub fn reset(&mut self) {
        self.state = SegState::Idle;
        self.buffer.clear();
        self.frames = 0;
        self.trailing_frames = 0;
        self.speech_detected = false;
    }

    pub fn state(&self) -> SegState {
        self.state
    }

    /// Check if a turn is currently being captured
    pub fn is_capturing(&self) -> bool {
        self.state != SegState::Idle
    }

    /// Get the current buffer duration in seconds
    pub fn buffer_duration(&self) -> f32 {
        self.buffer.len() as f32 / self.cfg.sample_rate as f32
    }
}
