//! Audio device access
//!
//! Capture and playback go through PulseAudio's simple API. Capture is
//! 16-bit little-endian mono PCM at 16 kHz, read in fixed-size frames;
//! playback takes mono f32 at whatever rate the speech engine produced.

use crate::audio_seg::SAMPLE_RATE;
use crate::speech::{AudioOutput, SpeechAudio, SynthesisError};
use libpulse_binding::sample::{Format, Spec};
use libpulse_binding::stream::Direction;
use libpulse_simple_binding::Simple;
use tracing::{debug, info};

const APP_NAME: &str = "voiceloop";

/// Error type for audio device operations
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("Cannot open {direction} stream on {device}: {reason}")]
    Open {
        direction: &'static str,
        device: String,
        reason: String,
    },

    #[error("Audio read failed: {0}")]
    Read(String),

    #[error("Audio write failed: {0}")]
    Write(String),

    #[error("Invalid sample rate {0}")]
    InvalidRate(u32),
}

pub type Result<T> = std::result::Result<T, AudioError>;

/// A blocking source of fixed-size PCM frames.
pub trait FrameSource {
    /// Fill `frame` with the next samples, blocking until they are available.
    fn read_frame(&mut self, frame: &mut [i16]) -> Result<()>;

    /// Drop audio buffered by the device but not yet read.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Microphone capture through PulseAudio
pub struct PulseCapture {
    simple: Simple,
    bytes: Vec<u8>,
}

impl PulseCapture {
    /// Open the named source, or the default source when `device` is `None`.
    pub fn open(device: Option<&str>) -> Result<Self> {
        let spec = Spec {
            format: Format::S16le,
            channels: 1,
            rate: SAMPLE_RATE,
        };
        info!(
            "Opening capture on {}",
            device.unwrap_or("default source")
        );
        let simple = Simple::new(
            None, // default server
            APP_NAME,
            Direction::Record,
            device,
            "microphone",
            &spec,
            None, // default channel map
            None, // default buffering
        )
        .map_err(|e| AudioError::Open {
            direction: "record",
            device: device.unwrap_or("default").to_string(),
            reason: format!("{}", e),
        })?;

        Ok(Self {
            simple,
            bytes: Vec::new(),
        })
    }
}

impl FrameSource for PulseCapture {
    fn read_frame(&mut self, frame: &mut [i16]) -> Result<()> {
        self.bytes.resize(frame.len() * 2, 0);
        self.simple
            .read(&mut self.bytes)
            .map_err(|e| AudioError::Read(format!("{}", e)))?;
        le_bytes_to_i16(&self.bytes, frame);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        debug!("Flushing capture buffer");
        self.simple
            .flush()
            .map_err(|e| AudioError::Read(format!("{}", e)))
    }
}

/// Speaker output through PulseAudio. The stream is reopened whenever the
/// sample rate changes.
pub struct PulsePlayback {
    stream: Option<(Simple, u32)>,
}

impl PulsePlayback {
    pub fn new() -> Self {
        Self { stream: None }
    }

    fn stream_for(&mut self, rate: u32) -> Result<&Simple> {
        if rate == 0 {
            return Err(AudioError::InvalidRate(rate));
        }
        if !matches!(&self.stream, Some((_, r)) if *r == rate) {
            debug!("Opening playback stream at {} Hz", rate);
            let spec = Spec {
                format: Format::F32le,
                channels: 1,
                rate,
            };
            let simple = Simple::new(
                None,
                APP_NAME,
                Direction::Playback,
                None,
                "speech",
                &spec,
                None,
                None,
            )
            .map_err(|e| AudioError::Open {
                direction: "playback",
                device: "default".to_string(),
                reason: format!("{}", e),
            })?;
            self.stream = Some((simple, rate));
        }
        match &self.stream {
            Some((simple, _)) => Ok(simple),
            None => Err(AudioError::InvalidRate(rate)),
        }
    }

    /// Write the samples and wait until the server has played them.
    pub fn play_samples(&mut self, samples: &[f32], rate: u32) -> Result<()> {
        let bytes = f32_to_le_bytes(samples);
        let simple = self.stream_for(rate)?;
        simple
            .write(&bytes)
            .map_err(|e| AudioError::Write(format!("{}", e)))?;
        simple
            .drain()
            .map_err(|e| AudioError::Write(format!("{}", e)))
    }
}

impl Default for PulsePlayback {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for PulsePlayback {
    fn play(&mut self, audio: &SpeechAudio) -> std::result::Result<(), SynthesisError> {
        self.play_samples(&audio.samples, audio.sample_rate)
            .map_err(|e| SynthesisError::Playback(e.to_string()))
    }
}

/// Decode little-endian 16-bit PCM into `out`. Extra bytes or samples are
/// ignored.
pub fn le_bytes_to_i16(bytes: &[u8], out: &mut [i16]) {
    for (sample, chunk) in out.iter_mut().zip(bytes.chunks_exact(2)) {
        *sample = i16::from_le_bytes([chunk[0], chunk[1]]);
    }
}

/// Encode f32 samples as little-endian bytes, clamped to [-1.0, 1.0].
pub fn f32_to_le_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 4);
    for s in samples {
        bytes.extend_from_slice(&s.clamp(-1.0, 1.0).to_le_bytes());
    }
    bytes
}
