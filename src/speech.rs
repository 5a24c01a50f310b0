//! Text-to-speech and synchronous playback

use crate::events::Event;
use crate::ipc::EventSink;
use serde::Serialize;
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, error, info};

/// Language passed to the speech engine
pub const DEFAULT_LANGUAGE: &str = "en-us";

/// Phrase synthesised once at startup to warm the engine
pub const PREWARM_PHRASE: &str = "Ready.";

const SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(60);

/// Error type for synthesis and playback
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("TTS request failed: {0}")]
    Http(String),

    #[error("TTS endpoint returned HTTP {0}")]
    Status(u16),

    #[error("Cannot decode TTS audio: {0}")]
    Decode(String),

    #[error("Playback failed: {0}")]
    Playback(String),
}

pub type Result<T> = std::result::Result<T, SynthesisError>;

impl From<reqwest::Error> for SynthesisError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => SynthesisError::Status(status.as_u16()),
            None => SynthesisError::Http(e.to_string()),
        }
    }
}

impl From<hound::Error> for SynthesisError {
    fn from(e: hound::Error) -> Self {
        SynthesisError::Decode(e.to_string())
    }
}

/// Mono float audio as produced by a speech engine
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl SpeechAudio {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Turns text into audio
pub trait SpeechEngine {
    fn create(&self, text: &str, voice: &str, language: &str) -> Result<SpeechAudio>;
}

/// Plays audio, blocking until it has finished
pub trait AudioOutput {
    fn play(&mut self, audio: &SpeechAudio) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
    language: &'a str,
}

/// OpenAI-compatible `/v1/audio/speech` endpoint (Kokoro-FastAPI and friends)
pub struct HttpSpeechEngine {
    base_url: String,
    model: String,
    client: reqwest::blocking::Client,
}

impl HttpSpeechEngine {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(SYNTHESIS_TIMEOUT)
            .build()?;
        let base_url = base_url.into();
        info!("TTS endpoint {}", base_url);
        Ok(Self {
            base_url,
            model: model.into(),
            client,
        })
    }
}

impl SpeechEngine for HttpSpeechEngine {
    fn create(&self, text: &str, voice: &str, language: &str) -> Result<SpeechAudio> {
        let url = format!("{}/v1/audio/speech", self.base_url.trim_end_matches('/'));
        let body = SpeechRequest {
            model: &self.model,
            input: text,
            voice,
            response_format: "wav",
            language,
        };
        let res = self.client.post(&url).json(&body).send()?;
        if !res.status().is_success() {
            return Err(SynthesisError::Status(res.status().as_u16()));
        }
        let bytes = res.bytes()?;
        decode_wav(&bytes)
    }
}

/// Decode a WAV payload into mono f32, averaging channels.
pub fn decode_wav(bytes: &[u8]) -> Result<SpeechAudio> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    let channels = spec.channels.max(1) as usize;
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok(SpeechAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Speaks replies and reports failures as events instead of returning them
pub struct Synthesizer {
    engine: Box<dyn SpeechEngine>,
    output: Box<dyn AudioOutput>,
    language: String,
    events: EventSink,
}

impl Synthesizer {
    pub fn new(engine: Box<dyn SpeechEngine>, output: Box<dyn AudioOutput>, events: EventSink) -> Self {
        Self {
            engine,
            output,
            language: DEFAULT_LANGUAGE.to_string(),
            events,
        }
    }

    /// Synthesise and play `text`, blocking until playback ends. Failures are
    /// logged and emitted as an `error` event.
    pub fn speak(&mut self, text: &str, voice: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if let Err(e) = self.try_speak(text, voice) {
            error!("TTS failed: {}", e);
            self.events.send(Event::error(format!("TTS failed: {}", e)));
        }
    }

    fn try_speak(&mut self, text: &str, voice: &str) -> Result<()> {
        let audio = self.engine.create(text, voice, &self.language)?;
        debug!(
            "Playing {:.2}s of speech at {} Hz",
            audio.duration().as_secs_f32(),
            audio.sample_rate
        );
        self.output.play(&audio)
    }

    /// Synthesise a short phrase and discard it so the first real reply does
    /// not pay the engine's cold start.
    pub fn prewarm(&self, voice: &str) -> Result<()> {
        let audio = self.engine.create(PREWARM_PHRASE, voice, &self.language)?;
        debug!("TTS warm-up produced {} samples", audio.samples.len());
        Ok(())
    }
}
