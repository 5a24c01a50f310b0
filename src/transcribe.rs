//! Speech-to-text for completed turns

use std::path::Path;
use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, WhisperState};

/// Language hint passed to the recognizer
pub const DEFAULT_LANGUAGE: &str = "en";

/// Whisper only accepts 16 kHz mono
const WHISPER_SAMPLE_RATE: u32 = 16_000;

/// Error type for transcription
#[derive(Debug, thiserror::Error)]
pub enum TranscribeError {
    #[error("Whisper model not found at {0}")]
    ModelNotFound(String),

    #[error("Failed to load Whisper model: {0}")]
    Load(String),

    #[error("Unsupported sample rate {0} Hz (expected 16000)")]
    UnsupportedRate(u32),

    #[error("Whisper inference failed: {0}")]
    Inference(String),
}

pub type Result<T> = std::result::Result<T, TranscribeError>;

/// A speech-to-text engine returning raw segments.
pub trait SpeechRecognizer {
    fn recognize(&mut self, samples: &[f32], sample_rate: u32, language: &str) -> Result<Vec<String>>;
}

/// whisper.cpp through whisper-rs
pub struct WhisperRecognizer {
    _ctx: WhisperContext,
    state: WhisperState,
}

impl WhisperRecognizer {
    pub fn load(model_path: &Path) -> Result<Self> {
        if !model_path.exists() {
            return Err(TranscribeError::ModelNotFound(model_path.display().to_string()));
        }
        let path = model_path
            .to_str()
            .ok_or_else(|| TranscribeError::Load(format!("non UTF-8 path {:?}", model_path)))?;

        info!("Loading Whisper model from {}", model_path.display());
        let ctx = WhisperContext::new_with_params(path, WhisperContextParameters::default())
            .map_err(|e| TranscribeError::Load(e.to_string()))?;
        let state = ctx
            .create_state()
            .map_err(|e| TranscribeError::Load(e.to_string()))?;

        Ok(Self { _ctx: ctx, state })
    }
}

impl SpeechRecognizer for WhisperRecognizer {
    fn recognize(&mut self, samples: &[f32], sample_rate: u32, language: &str) -> Result<Vec<String>> {
        if sample_rate != WHISPER_SAMPLE_RATE {
            return Err(TranscribeError::UnsupportedRate(sample_rate));
        }

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_print_special(false);
        params.set_suppress_blank(true);
        params.set_language(Some(language));
        params.set_translate(false);
        params.set_no_context(true);

        self.state
            .full(params, samples)
            .map_err(|e| TranscribeError::Inference(e.to_string()))?;

        let n = self
            .state
            .full_n_segments()
            .map_err(|e| TranscribeError::Inference(e.to_string()))?;
        let mut segments = Vec::with_capacity(n.max(0) as usize);
        for i in 0..n {
            let text = self
                .state
                .full_get_segment_text(i)
                .map_err(|e| TranscribeError::Inference(e.to_string()))?;
            segments.push(text);
        }
        Ok(segments)
    }
}

/// Text of one finalized turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
    pub language: String,
}

impl Transcript {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Runs the recognizer and normalises its output
pub struct Transcriber {
    recognizer: Box<dyn SpeechRecognizer>,
    language: String,
}

impl Transcriber {
    pub fn new(recognizer: Box<dyn SpeechRecognizer>) -> Self {
        Self {
            recognizer,
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Segments joined by single spaces and trimmed. An empty transcript is
    /// a valid result.
    pub fn transcribe(&mut self, samples: &[f32], sample_rate: u32) -> Result<Transcript> {
        let segments = self.recognizer.recognize(samples, sample_rate, &self.language)?;
        let text = segments
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        debug!(
            "Transcribed {:.2}s into {} segments: {:?}",
            samples.len() as f32 / sample_rate.max(1) as f32,
            segments.len(),
            text
        );
        Ok(Transcript {
            text,
            language: self.language.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRecognizer {
        segments: Vec<&'static str>,
        calls: Vec<(usize, u32, String)>,
    }

    impl SpeechRecognizer for FixedRecognizer {
        fn recognize(&mut self, samples: &[f32], sample_rate: u32, language: &str) -> Result<Vec<String>> {
            self.calls.push((samples.len(), sample_rate, language.to_string()));
            Ok(self.segments.iter().map(|s| s.to_string()).collect())
        }
    }

    fn transcriber(segments: Vec<&'static str>) -> Transcriber {
        Transcriber::new(Box::new(FixedRecognizer {
            segments,
            calls: Vec::new(),
        }))
    }

    #[test]
    fn test_segments_joined_and_trimmed() {
        let mut t = transcriber(vec![" Hello there,", "  how are you? "]);
        let out = t.transcribe(&[0.0; 1600], 16_000).unwrap();
        assert_eq!(out.text, "Hello there, how are you?");
        assert_eq!(out.language, "en");
    }

    #[test]
    fn test_silence_yields_empty_transcript() {
        let mut t = transcriber(vec!["", "   "]);
        let out = t.transcribe(&[0.0; 1600], 16_000).unwrap();
        assert!(out.is_empty());

        let mut t = transcriber(vec![]);
        assert!(t.transcribe(&[], 16_000).unwrap().is_empty());
    }

    #[test]
    fn test_language_hint_forwarded() {
        let mut t = transcriber(vec!["bonjour"]).with_language("fr");
        let out = t.transcribe(&[0.1; 320], 16_000).unwrap();
        assert_eq!(out.language, "fr");
        assert_eq!(out.text, "bonjour");
    }

    #[test]
    fn test_missing_model() {
        let err = WhisperRecognizer::load(Path::new("/nonexistent/ggml-tiny.bin"))
            .err()
            .unwrap();
        assert!(matches!(err, TranscribeError::ModelNotFound(_)));
    }
}
