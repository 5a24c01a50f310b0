//! Main conversation loop.
//!
//! The loop owns every piece of mutable state: mute and stop flags, the
//! active voice, the conversation context and the audio devices. Commands
//! arrive as messages and are applied here at the top of each iteration, so
//! a command takes effect at most one frame later and nothing is shared
//! behind a lock.

use crate::announce::{compose_announcement, format_for_tts};
use crate::audio::FrameSource;
use crate::audio_seg::{CompletedTurn, SegConfig, SegmentEvent, TurnSegmenter, FRAME_SAMPLES};
use crate::context::{ConversationContext, Role, MAX_TURNS};
use crate::events::{Command, Event};
use crate::ipc::EventSink;
use crate::responder::ResponseGenerator;
use crate::speech::Synthesizer;
use crate::transcribe::Transcriber;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, span, warn, Level};

/// Sleep per iteration while muted
const MUTED_POLL: Duration = Duration::from_millis(100);

/// Back-off after a failed device read
const READ_RETRY: Duration = Duration::from_millis(500);

const GOODBYE: &str = "Goodbye!";

/// External collaborators driven by the loop
pub struct Components {
    pub source: Box<dyn FrameSource>,
    pub transcriber: Transcriber,
    pub responder: ResponseGenerator,
    pub synthesizer: Synthesizer,
}

/// Loop behaviour fixed at startup
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub segmentation: SegConfig,
    pub voice: String,
    /// Speak sentences while the reply is still streaming
    pub stream_responses: bool,
    /// Idle time after which the conversation history is dropped
    pub context_timeout: Duration,
}

pub struct Orchestrator {
    source: Box<dyn FrameSource>,
    segmenter: TurnSegmenter,
    transcriber: Transcriber,
    context: ConversationContext,
    responder: ResponseGenerator,
    synth: Synthesizer,
    events: EventSink,
    commands: UnboundedReceiver<Command>,
    frame: Vec<i16>,
    muted: bool,
    stop: bool,
    voice: String,
    stream_responses: bool,
}

impl Orchestrator {
    pub fn new(
        parts: Components,
        settings: LoopSettings,
        events: EventSink,
        commands: UnboundedReceiver<Command>,
    ) -> Self {
        Self {
            source: parts.source,
            segmenter: TurnSegmenter::new(settings.segmentation),
            transcriber: parts.transcriber,
            context: ConversationContext::new(MAX_TURNS, settings.context_timeout, Instant::now()),
            responder: parts.responder,
            synth: parts.synthesizer,
            events,
            commands,
            frame: vec![0; FRAME_SAMPLES],
            muted: false,
            stop: false,
            voice: settings.voice,
            stream_responses: settings.stream_responses,
        }
    }

    /// Run until a `shutdown` command or an exit phrase, then emit
    /// `shutdown_complete`.
    pub fn run(&mut self) {
        info!("Listening (voice {})", self.voice);
        self.events.send(Event::Listening);
        while self.step() {}
        info!("Main loop stopped");
        self.events.send(Event::ShutdownComplete);
    }

    /// One loop iteration. Returns false once the loop should stop.
    pub fn step(&mut self) -> bool {
        self.drain_commands();
        if self.stop {
            return false;
        }

        if self.context.check_timeout(Instant::now()) {
            self.events.send(Event::debug(format!(
                "Auto-resetting context after {}s of inactivity",
                self.context.timeout().as_secs()
            )));
        }

        if self.muted {
            thread::sleep(MUTED_POLL);
            return true;
        }

        if let Err(e) = self.source.read_frame(&mut self.frame) {
            error!("Audio read failed: {}", e);
            self.events.send(Event::error(format!("Error in audio loop: {}", e)));
            thread::sleep(READ_RETRY);
            return true;
        }

        let now = Instant::now();
        match self.segmenter.push_frame(&self.frame, now) {
            Some(SegmentEvent::SpeechStarted) => self.events.send(Event::UserSpeaking),
            Some(SegmentEvent::TurnCompleted(turn)) => self.handle_turn(turn),
            Some(SegmentEvent::TurnDiscarded { frames }) => {
                debug!("Dropped {} frames of noise", frames)
            }
            None => {}
        }

        !self.stop
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            self.apply_command(cmd, Instant::now());
        }
    }

    /// Apply one inbound command.
    pub fn apply_command(&mut self, cmd: Command, now: Instant) {
        debug!("Applying command {:?}", cmd);
        match cmd {
            Command::Mute => {
                self.muted = true;
                self.segmenter.reset();
                self.events.send(Event::Muted);
            }
            Command::Unmute => {
                self.muted = false;
                if let Err(e) = self.source.flush() {
                    warn!("Could not flush capture buffer: {}", e);
                }
                self.events.send(Event::Unmuted);
            }
            Command::ResetContext => {
                self.context.reset(now);
                self.events
                    .send(Event::debug("Conversation context manually reset"));
            }
            Command::ChangeVoice { voice } => {
                self.events
                    .send(Event::debug(format!("Voice changed to: {}", voice)));
                self.voice = voice;
            }
            Command::Shutdown => {
                info!("Shutdown requested");
                self.stop = true;
            }
            Command::Announce(announcement) => {
                let text = format_for_tts(&compose_announcement(&announcement));
                // Kept in the history so follow-up questions have context
                self.context.add_turn(Role::Assistant, text.as_str(), now);
                self.events
                    .send(Event::debug(format!("Announcing: {}", text)));
                self.events.send(Event::JarvisSpeaking { text: text.clone() });
                self.synth.speak(&text, &self.voice);
            }
        }
    }

    fn handle_turn(&mut self, turn: CompletedTurn) {
        let _span = span!(Level::INFO, "turn", frames = turn.frames).entered();
        info!("Turn complete: {:.2}s of audio", turn.duration().as_secs_f32());

        let transcript = match self
            .transcriber
            .transcribe(&turn.samples_f32(), turn.sample_rate)
        {
            Ok(t) => t,
            Err(e) => {
                error!("Transcription failed: {}", e);
                self.events
                    .send(Event::error(format!("Transcription failed: {}", e)));
                return;
            }
        };
        if transcript.is_empty() {
            debug!("Empty transcript, dropping turn");
            return;
        }

        let user_text = transcript.text;
        info!("User: {}", user_text);
        self.events.send(Event::Transcription {
            text: user_text.clone(),
        });

        if is_exit_phrase(&user_text) {
            self.events.send(Event::JarvisSpeaking {
                text: GOODBYE.to_string(),
            });
            self.synth.speak(GOODBYE, &self.voice);
            self.stop = true;
            return;
        }

        self.respond(&user_text);
    }

    fn respond(&mut self, user_text: &str) {
        let reply = if self.stream_responses {
            let events = &self.events;
            let synth = &mut self.synth;
            let voice = self.voice.as_str();
            self.responder
                .generate_streaming(user_text, &self.context, events, &mut |sentence: &str| {
                    events.send(Event::JarvisSpeaking {
                        text: sentence.to_string(),
                    });
                    synth.speak(sentence, voice);
                })
        } else {
            let reply = self.responder.generate(user_text, &self.context, &self.events);
            self.events.send(Event::JarvisSpeaking {
                text: reply.answer.clone(),
            });
            reply
        };
        info!("Jarvis: {}", reply.answer);

        self.context.add_turn(Role::User, user_text, Instant::now());
        self.context
            .add_turn(Role::Assistant, reply.answer.as_str(), Instant::now());
        self.events.send(Event::ConversationTurn {
            user_text: user_text.to_string(),
            jarvis_response: reply.answer.clone(),
        });

        if !self.stream_responses {
            self.synth.speak(&reply.answer, &self.voice);
        }
        self.events.send(Event::Listening);
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }
}

/// "goodbye" or "exit" as a whole word
fn is_exit_phrase(text: &str) -> bool {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .any(|w| w == "goodbye" || w == "exit")
}
