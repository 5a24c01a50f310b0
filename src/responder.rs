//! Reply generation: prompt assembly, dual-channel parsing and the
//! rule-based fallback used whenever the model cannot answer.
//!
//! A model reply carries two channels. The `[ANSWER]` section is spoken to
//! the user; the optional `[INSTRUCTION]` section is forwarded to the parent
//! process as an `instruction_detected` event. Markers match
//! case-insensitively and each section runs to the next marker or the end
//! of the text.

use crate::context::{ConversationContext, Role, TurnRecord};
use crate::events::Event;
use crate::ipc::EventSink;
use crate::llm::{ChatBackend, LlmError};
use tracing::{debug, info, warn};

const ANSWER_MARKER: &str = "[answer]";
const INSTRUCTION_MARKER: &str = "[instruction]";

/// Context records sent with each request
pub const CONTEXT_WINDOW: usize = 8;

pub const SYSTEM_PROMPT: &str = "\
You are Jarvis, a British coding assistant. You respond in TWO parts:

[ANSWER] - What you SAY to the user (at most 3 sentences, brief and conversational)
[INSTRUCTION] - What to send to the code agent (high-level only)

RULES:
1. Always include [ANSWER]
2. Include [INSTRUCTION] for ANY action request, not just file changes
3. If the user asks you to DO something (push, commit, deploy, install, run, create, fix, delete) send [INSTRUCTION]
4. If the user asks HOW, WHAT or WHY, respond with [ANSWER] only
5. If you just asked \"Would you like me to X?\" and the user says yes, send [INSTRUCTION] to do X
6. Keep [INSTRUCTION] concise and let the code agent work out the details

Examples:
User: \"I want to make a hello world app\"
[ANSWER] Right, I'll get that started.
[INSTRUCTION] Create a hello world application

User: \"How do I push to GitHub?\"
[ANSWER] You'd use git add, git commit, and git push. Want me to do it for you?

User: \"Fix the login bug\"
[ANSWER] I'll sort that out now.
[INSTRUCTION] Fix the authentication bug

Keep [ANSWER] SHORT and natural. No tutorials or step-by-step lists in [ANSWER].";

/// Result of splitting a model reply into its two channels
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedResponse {
    /// Text to speak; may be empty straight out of the parser
    pub answer: String,
    /// Instruction for the parent process, never empty when present
    pub instruction: Option<String>,
}

/// Split a raw reply into answer and instruction channels.
pub fn parse_dual_channel(raw: &str) -> ParsedResponse {
    // ASCII lowercasing keeps byte offsets valid for `raw`.
    let lower = raw.to_ascii_lowercase();
    let answer = section(raw, &lower, ANSWER_MARKER);
    let instruction = section(raw, &lower, INSTRUCTION_MARKER);

    if answer.is_none() && instruction.is_none() {
        return ParsedResponse {
            answer: raw.trim().to_string(),
            instruction: None,
        };
    }

    ParsedResponse {
        answer: answer.unwrap_or_default(),
        instruction: instruction.filter(|s| !s.is_empty()),
    }
}

fn section(raw: &str, lower: &str, marker: &str) -> Option<String> {
    let start = lower.find(marker)? + marker.len();
    let end = next_marker(lower, start).unwrap_or(raw.len());
    Some(raw[start..end].trim().to_string())
}

fn next_marker(lower: &str, from: usize) -> Option<usize> {
    [ANSWER_MARKER, INSTRUCTION_MARKER]
        .iter()
        .filter_map(|m| lower[from..].find(m).map(|i| from + i))
        .min()
}

/// Length of the longest suffix of `lower` that could still grow into a marker.
fn partial_marker_len(lower: &str) -> usize {
    let bytes = lower.as_bytes();
    [ANSWER_MARKER, INSTRUCTION_MARKER]
        .iter()
        .flat_map(|m| {
            let m = m.as_bytes();
            (1..m.len()).filter(move |&k| k <= bytes.len() && bytes[bytes.len() - k..] == m[..k])
        })
        .max()
        .unwrap_or(0)
}

/// Deterministic reply used when the model is unavailable. Never empty.
pub fn fallback_response(user_text: &str) -> String {
    let lower = user_text.to_lowercase();

    let greeting = lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|w| matches!(w, "hello" | "hi" | "hey"));
    if greeting {
        return "Hello!".to_string();
    }

    if ["let's", "please", "can you", "could you"]
        .iter()
        .any(|p| lower.contains(p))
    {
        return "I'll work on that.".to_string();
    }

    if user_text.contains('?') {
        return "Let me think about that.".to_string();
    }

    "I'm listening.".to_string()
}

/// Incremental splitter for streamed replies.
///
/// Accumulates tokens and yields complete sentences of the answer channel as
/// soon as they end in `.`, `!` or `?`. Text that might be the start of a
/// marker is held back until the next token resolves it. Nothing is spoken
/// before an `[ANSWER]` marker has been seen; a reply without markers is
/// released whole by [`AnswerStream::finish`].
#[derive(Debug, Default)]
pub struct AnswerStream {
    buffer: String,
    spoken: usize,
    closed: bool,
    spoke_any: bool,
}

/// What remains once the stream has ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutcome {
    pub parsed: ParsedResponse,
    /// Answer text not yet handed out as a sentence
    pub tail: Option<String>,
}

impl AnswerStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one token; returns the sentences that became complete.
    pub fn push(&mut self, token: &str) -> Vec<String> {
        self.buffer.push_str(token);
        if self.closed {
            return Vec::new();
        }

        let lower = self.buffer.to_ascii_lowercase();
        let Some(marker) = lower.find(ANSWER_MARKER) else {
            return Vec::new();
        };
        let start = marker + ANSWER_MARKER.len();
        self.spoken = self.spoken.max(start);

        if let Some(end) = next_marker(&lower, start) {
            self.closed = true;
            let rest = self.take(end);
            return rest.into_iter().collect();
        }

        let end = lower.len() - partial_marker_len(&lower[self.spoken..]);
        let pending = self.buffer[self.spoken..end].trim_end();
        if pending.ends_with(['.', '!', '?']) {
            return self.take(end).into_iter().collect();
        }
        Vec::new()
    }

    pub fn has_spoken(&self) -> bool {
        self.spoke_any
    }

    /// Close the stream and parse everything received.
    pub fn finish(mut self) -> StreamOutcome {
        let parsed = parse_dual_channel(&self.buffer);
        let lower = self.buffer.to_ascii_lowercase();

        let tail = if self.closed {
            None
        } else if lower.contains(ANSWER_MARKER) {
            let end = next_marker(&lower, self.spoken).unwrap_or(self.buffer.len());
            self.take(end)
        } else if parsed.answer.is_empty() {
            None
        } else {
            Some(parsed.answer.clone())
        };

        StreamOutcome { parsed, tail }
    }

    fn take(&mut self, end: usize) -> Option<String> {
        let text = self.buffer[self.spoken..end].trim().to_string();
        self.spoken = end;
        if text.is_empty() {
            None
        } else {
            self.spoke_any = true;
            Some(text)
        }
    }
}

/// Produces the spoken reply for one user turn
pub struct ResponseGenerator {
    backend: Box<dyn ChatBackend>,
    system_prompt: String,
    window: usize,
}

impl ResponseGenerator {
    pub fn new(backend: Box<dyn ChatBackend>) -> Self {
        Self {
            backend,
            system_prompt: SYSTEM_PROMPT.to_string(),
            window: CONTEXT_WINDOW,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// System prompt, the last `window` context records, then the new turn.
    pub fn build_messages(&self, user_text: &str, context: &ConversationContext) -> Vec<TurnRecord> {
        let mut messages = Vec::with_capacity(self.window + 2);
        messages.push(TurnRecord::new(Role::System, self.system_prompt.as_str()));
        messages.extend(context.recent(self.window).cloned());
        messages.push(TurnRecord::new(Role::User, user_text));
        messages
    }

    /// Ask the model for a reply. The returned answer is never empty.
    pub fn generate(
        &self,
        user_text: &str,
        context: &ConversationContext,
        events: &EventSink,
    ) -> ParsedResponse {
        let messages = self.build_messages(user_text, context);
        events.send(Event::debug(format!(
            "Generating LLM response for: {}",
            preview(user_text, 50)
        )));

        let raw = match self.backend.chat(&messages) {
            Ok(raw) => raw,
            Err(e) => {
                report_failure(&e, events);
                return ParsedResponse {
                    answer: fallback_response(user_text),
                    instruction: None,
                };
            }
        };

        if raw.trim().is_empty() {
            events.send(Event::debug("LLM returned empty content, using fallback"));
            return ParsedResponse {
                answer: fallback_response(user_text),
                instruction: None,
            };
        }
        events.send(Event::debug(format!("LLM content: '{}'", preview(&raw, 100))));

        let mut parsed = parse_dual_channel(&raw);
        if let Some(instruction) = &parsed.instruction {
            info!("Instruction detected: {}", instruction);
            events.send(Event::InstructionDetected {
                instruction: instruction.clone(),
            });
        }
        if parsed.answer.is_empty() {
            parsed.answer = fallback_response(user_text);
        }
        parsed
    }

    /// Streaming variant. Each finished answer sentence is handed to `speak`
    /// before the next token is read, so playback stays in order. The
    /// returned answer is the full spoken text and is never empty.
    pub fn generate_streaming(
        &self,
        user_text: &str,
        context: &ConversationContext,
        events: &EventSink,
        speak: &mut dyn FnMut(&str),
    ) -> ParsedResponse {
        let messages = self.build_messages(user_text, context);
        events.send(Event::debug(format!(
            "Streaming LLM response for: {}",
            preview(user_text, 50)
        )));

        let mut stream = AnswerStream::new();
        let result = self.backend.chat_stream(&messages, &mut |token: &str| {
            for sentence in stream.push(token) {
                debug!("Streamed sentence: {}", sentence);
                speak(&sentence);
            }
        });

        if let Err(e) = result {
            report_failure(&e, events);
            if !stream.has_spoken() {
                let answer = fallback_response(user_text);
                speak(&answer);
                return ParsedResponse {
                    answer,
                    instruction: None,
                };
            }
            warn!("Stream ended early, keeping the partial reply");
        }

        let outcome = stream.finish();
        if let Some(tail) = &outcome.tail {
            speak(tail);
        }

        let mut parsed = outcome.parsed;
        if let Some(instruction) = &parsed.instruction {
            info!("Instruction detected: {}", instruction);
            events.send(Event::InstructionDetected {
                instruction: instruction.clone(),
            });
        }
        if parsed.answer.is_empty() {
            parsed.answer = fallback_response(user_text);
            speak(&parsed.answer);
        }
        parsed
    }
}

fn report_failure(e: &LlmError, events: &EventSink) {
    warn!("LLM call failed: {}", e);
    match e {
        LlmError::Status(code) => {
            events.send(Event::debug(format!("Non-200 response ({}), using fallback", code)))
        }
        LlmError::Timeout => {
            events.send(Event::error("LLM timeout - is the model server slow or not running?"))
        }
        LlmError::Connection(_) => {
            events.send(Event::error("Cannot connect to the LLM server - is it running?"))
        }
        other => events.send(Event::error(format!("LLM response failed: {}", other))),
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
