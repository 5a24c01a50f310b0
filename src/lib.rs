//! voiceloop - spoken conversation front end for a coding agent
//!
//! Microphone audio is segmented into turns by an energy gate, transcribed
//! with Whisper, answered by a local language model and spoken back through
//! a TTS endpoint. A parent process drives the service over line-delimited
//! JSON: events on stdout, commands on stdin.

#![forbid(unsafe_code)]

/// Announcement composition and TTS text clean-up
pub mod announce;
/// PulseAudio capture and playback
pub mod audio;
/// Energy gate and turn segmentation
pub mod audio_seg;
/// Environment configuration
pub mod config;
/// Bounded conversation history
pub mod context;
/// IPC message types
pub mod events;
/// Line-delimited JSON transport
pub mod ipc;
/// Language model client
pub mod llm;
/// Main conversation loop
pub mod orchestrator;
/// Reply generation and dual-channel parsing
pub mod responder;
/// Speech synthesis
pub mod speech;
/// Speech recognition
pub mod transcribe;
