//! Startup configuration read from the environment

use crate::events::DEFAULT_VOICE;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?} ({reason})")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Process configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Whisper model size (`tiny`, `base`, ...) or a path to a ggml model
    pub whisper_model: String,

    /// Directory searched for `ggml-<size>.bin`
    pub whisper_model_dir: PathBuf,

    /// Trailing silence that closes a turn
    pub silence_timeout: Duration,

    pub ollama_url: String,
    pub ollama_model: String,

    /// Speak sentences as tokens arrive instead of waiting for the full reply
    pub stream_responses: bool,

    pub tts_url: String,
    pub tts_model: String,
    pub voice: String,

    /// PulseAudio source name, default device when unset
    pub audio_device: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            whisper_model: "tiny".to_string(),
            whisper_model_dir: PathBuf::from("models"),
            silence_timeout: Duration::from_secs(1),
            ollama_url: "http://localhost:11434".to_string(),
            ollama_model: "gpt-oss:20b".to_string(),
            stream_responses: false,
            tts_url: "http://localhost:8880".to_string(),
            tts_model: "kokoro".to_string(),
            voice: DEFAULT_VOICE.to_string(),
            audio_device: None,
        }
    }
}

impl Config {
    /// Build from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup; unset or empty values keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut cfg = Config::default();

        if let Some(v) = get("WHISPER_MODEL") {
            cfg.whisper_model = v;
        }
        if let Some(v) = get("WHISPER_MODEL_DIR") {
            cfg.whisper_model_dir = PathBuf::from(v);
        }
        if let Some(v) = get("SILENCE_TIMEOUT") {
            cfg.silence_timeout = parse_seconds("SILENCE_TIMEOUT", &v)?;
        }
        if let Some(v) = get("OLLAMA_URL") {
            cfg.ollama_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("OLLAMA_MODEL") {
            cfg.ollama_model = v;
        }
        if let Some(v) = get("LLM_STREAM") {
            cfg.stream_responses = parse_flag("LLM_STREAM", &v)?;
        }
        if let Some(v) = get("TTS_URL") {
            cfg.tts_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("TTS_MODEL") {
            cfg.tts_model = v;
        }
        if let Some(v) = get("TTS_VOICE") {
            cfg.voice = v;
        }
        cfg.audio_device = get("AUDIO_DEVICE");

        Ok(cfg)
    }

    /// Resolve the Whisper model file. A value that already names a file
    /// (contains a path separator or ends in `.bin`) is used as is.
    pub fn whisper_model_path(&self) -> PathBuf {
        let model = self.whisper_model.as_str();
        if model.ends_with(".bin") || model.contains('/') || model.contains('\\') {
            return Path::new(model).to_path_buf();
        }
        self.whisper_model_dir.join(format!("ggml-{}.bin", model))
    }
}

fn parse_seconds(name: &'static str, value: &str) -> Result<Duration> {
    let secs: f64 = value.trim().parse().map_err(|e: std::num::ParseFloatError| {
        ConfigError::InvalidValue {
            name,
            value: value.to_string(),
            reason: e.to_string(),
        }
    })?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigError::InvalidValue {
            name,
            value: value.to_string(),
            reason: "must be a positive number of seconds".to_string(),
        });
    }
    Ok(Duration::from_secs_f64(secs))
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: value.to_string(),
            reason: "expected true/false".to_string(),
        }),
    }
}
