//! Bounded conversation history with inactivity reset

use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

/// Records kept before the oldest is evicted
pub const MAX_TURNS: usize = 8;

/// Inactivity after which the history is cleared
pub const CONTEXT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry of the conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnRecord {
    pub role: Role,
    pub content: String,
}

impl TurnRecord {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// FIFO-bounded turn history. Expiry is checked lazily by the caller.
#[derive(Debug)]
pub struct ConversationContext {
    turns: VecDeque<TurnRecord>,
    max_turns: usize,
    timeout: Duration,
    last_activity: Instant,
}

impl ConversationContext {
    pub fn new(max_turns: usize, timeout: Duration, now: Instant) -> Self {
        Self {
            turns: VecDeque::with_capacity(max_turns + 1),
            max_turns,
            timeout,
            last_activity: now,
        }
    }

    /// Append a record, evicting the oldest on overflow.
    pub fn add_turn(&mut self, role: Role, content: impl Into<String>, now: Instant) {
        self.turns.push_back(TurnRecord::new(role, content));
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
        self.last_activity = now;
    }

    /// The last `k` records, oldest first.
    pub fn recent(&self, k: usize) -> impl Iterator<Item = &TurnRecord> {
        let skip = self.turns.len().saturating_sub(k);
        self.turns.iter().skip(skip)
    }

    /// Clear the history if it has been idle longer than the timeout.
    /// Returns whether a reset happened.
    pub fn check_timeout(&mut self, now: Instant) -> bool {
        if self.turns.is_empty() {
            return false;
        }
        if now.saturating_duration_since(self.last_activity) > self.timeout {
            debug!(
                "Context idle for {:?}, clearing {} records",
                now.saturating_duration_since(self.last_activity),
                self.turns.len()
            );
            self.turns.clear();
            self.last_activity = now;
            return true;
        }
        false
    }

    /// Explicit clear; always refreshes the activity timestamp.
    pub fn reset(&mut self, now: Instant) {
        self.turns.clear();
        self.last_activity = now;
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(ctx: &ConversationContext, k: usize) -> Vec<String> {
        ctx.recent(k).map(|r| r.content.clone()).collect()
    }

    #[test]
    fn test_fifo_eviction() {
        let t0 = Instant::now();
        let mut ctx = ConversationContext::new(MAX_TURNS, CONTEXT_TIMEOUT, t0);
        for i in 0..20 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            ctx.add_turn(role, format!("m{}", i), t0);
            assert!(ctx.len() <= MAX_TURNS);
        }
        assert_eq!(ctx.len(), 8);
        assert_eq!(
            contents(&ctx, 8),
            vec!["m12", "m13", "m14", "m15", "m16", "m17", "m18", "m19"]
        );
    }

    #[test]
    fn test_recent_preserves_order() {
        let t0 = Instant::now();
        let mut ctx = ConversationContext::new(MAX_TURNS, CONTEXT_TIMEOUT, t0);
        ctx.add_turn(Role::User, "a", t0);
        ctx.add_turn(Role::Assistant, "b", t0);
        ctx.add_turn(Role::User, "c", t0);
        assert_eq!(contents(&ctx, 2), vec!["b", "c"]);
        assert_eq!(contents(&ctx, 10), vec!["a", "b", "c"]);
        assert!(contents(&ctx, 0).is_empty());
    }

    #[test]
    fn test_timeout_boundary() {
        let t0 = Instant::now();
        let mut ctx = ConversationContext::new(8, Duration::from_secs(120), t0);
        ctx.add_turn(Role::User, "hello", t0);

        assert!(!ctx.check_timeout(t0 + Duration::from_secs(60)));
        assert!(!ctx.check_timeout(t0 + Duration::from_secs(120)));
        assert_eq!(ctx.len(), 1);

        let later = t0 + Duration::from_secs(121);
        assert!(ctx.check_timeout(later));
        assert!(ctx.is_empty());
        assert_eq!(ctx.last_activity(), later);
    }

    #[test]
    fn test_timeout_on_empty_is_noop() {
        let t0 = Instant::now();
        let mut ctx = ConversationContext::new(8, Duration::from_secs(120), t0);
        assert!(!ctx.check_timeout(t0 + Duration::from_secs(600)));
        assert_eq!(ctx.last_activity(), t0);
    }

    #[test]
    fn test_activity_extends_window() {
        let t0 = Instant::now();
        let mut ctx = ConversationContext::new(8, Duration::from_secs(120), t0);
        ctx.add_turn(Role::User, "one", t0);
        ctx.add_turn(Role::Assistant, "two", t0 + Duration::from_secs(100));
        assert!(!ctx.check_timeout(t0 + Duration::from_secs(200)));
        ctx.add_turn(Role::User, "three", t0 + Duration::from_secs(200));
        assert!(!ctx.check_timeout(t0 + Duration::from_secs(300)));
        assert!(ctx.check_timeout(t0 + Duration::from_secs(321)));
    }

    #[test]
    fn test_reset_twice() {
        let t0 = Instant::now();
        let mut ctx = ConversationContext::new(8, Duration::from_secs(120), t0);
        ctx.add_turn(Role::User, "hi", t0);

        let t1 = t0 + Duration::from_secs(5);
        ctx.reset(t1);
        assert!(ctx.is_empty());
        assert_eq!(ctx.last_activity(), t1);

        let t2 = t0 + Duration::from_secs(9);
        ctx.reset(t2);
        assert!(ctx.is_empty());
        assert_eq!(ctx.last_activity(), t2);
    }

    #[test]
    fn test_role_serialization() {
        let rec = TurnRecord::new(Role::Assistant, "ok");
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "ok"}));
    }
}
