//! voiceloop - voice conversation service driven over stdin/stdout
//!
//! stdout carries IPC events only; logs go to stderr.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Context as _};
use std::io::BufReader;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use voiceloop::audio::{PulseCapture, PulsePlayback};
use voiceloop::audio_seg::SegConfig;
use voiceloop::config::Config;
use voiceloop::context::CONTEXT_TIMEOUT;
use voiceloop::events::{Command, Event};
use voiceloop::ipc::{self, EventSink};
use voiceloop::llm::{LlmConfig, OllamaClient};
use voiceloop::orchestrator::{Components, LoopSettings, Orchestrator};
use voiceloop::responder::ResponseGenerator;
use voiceloop::speech::{HttpSpeechEngine, Synthesizer};
use voiceloop::transcribe::{Transcriber, WhisperRecognizer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    info!("Starting voiceloop");

    let (events, event_rx) = EventSink::channel();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(ipc::run_event_writer_or_shutdown(
        event_rx,
        tokio::io::stdout(),
        cmd_tx.clone(),
    ));

    ipc::spawn_command_reader(BufReader::new(std::io::stdin()), cmd_tx, events.clone())
        .context("starting command listener")?;

    // Blocking HTTP clients and device handles live on a blocking thread
    let loop_events = events.clone();
    let outcome = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let config = Config::from_env()?;
        info!("Configuration: {:?}", config);
        let mut orchestrator = build_orchestrator(&config, loop_events.clone(), cmd_rx)?;
        loop_events.send(Event::Ready);
        orchestrator.run();
        Ok(())
    })
    .await
    .unwrap_or_else(|e| Err(anyhow!("main loop panicked: {}", e)));

    if let Err(e) = &outcome {
        error!("Voice service failed: {:#}", e);
        events.send(Event::error(format!("Failed to start: {:#}", e)));
        events.send(Event::ShutdownComplete);
    }
    drop(events);

    match writer.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Event writer failed: {}", e),
        Err(e) => warn!("Event writer task failed: {}", e),
    }

    outcome
}

fn build_orchestrator(
    config: &Config,
    events: EventSink,
    commands: UnboundedReceiver<Command>,
) -> anyhow::Result<Orchestrator> {
    events.send(Event::status("Loading Whisper STT..."));
    let recognizer = WhisperRecognizer::load(&config.whisper_model_path())
        .context("loading Whisper model")?;

    events.send(Event::status("Loading TTS..."));
    let engine = HttpSpeechEngine::new(config.tts_url.as_str(), config.tts_model.as_str())?;
    let synthesizer = Synthesizer::new(
        Box::new(engine),
        Box::new(PulsePlayback::new()),
        events.clone(),
    );

    events.send(Event::status("Pre-warming TTS..."));
    if let Err(e) = synthesizer.prewarm(&config.voice) {
        warn!("TTS warm-up failed: {}", e);
        events.send(Event::error(format!("TTS warm-up failed: {}", e)));
    }

    let backend = OllamaClient::new(LlmConfig {
        url: config.ollama_url.clone(),
        model: config.ollama_model.clone(),
        ..LlmConfig::default()
    })?;

    events.send(Event::status("Opening microphone..."));
    let source = PulseCapture::open(config.audio_device.as_deref())
        .context("opening microphone")?;

    let parts = Components {
        source: Box::new(source),
        transcriber: Transcriber::new(Box::new(recognizer)),
        responder: ResponseGenerator::new(Box::new(backend)),
        synthesizer,
    };
    let settings = LoopSettings {
        segmentation: SegConfig {
            silence_duration: config.silence_timeout,
            ..SegConfig::default()
        },
        voice: config.voice.clone(),
        stream_responses: config.stream_responses,
        context_timeout: CONTEXT_TIMEOUT,
    };

    Ok(Orchestrator::new(parts, settings, events, commands))
}
