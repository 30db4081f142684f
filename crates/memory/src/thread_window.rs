//! Per-thread rolling window memory: keeps every turn appended so far and
//! renders a tail-truncated transcript as a preamble for the next call.

use std::collections::HashMap;

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    fn label(self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
        }
    }
}

#[derive(Debug, Clone)]
struct Turn {
    role: Role,
    content: String,
}

/// `max(64, max_context_tokens * 4)` — a coarse 4-chars-per-token proxy.
fn char_budget(max_context_tokens: u32) -> usize {
    (max_context_tokens as usize * 4).max(64)
}

pub struct ThreadWindow {
    store: Mutex<HashMap<String, Vec<Turn>>>,
    max_context_tokens: u32,
}

impl ThreadWindow {
    pub fn new(max_context_tokens: u32) -> Self {
        Self {
            store: Mutex::new(HashMap::new()),
            max_context_tokens,
        }
    }

    /// Joins all turns as `ROLE: content` lines, then keeps the tail within
    /// the character budget. Returns `None` when the thread is empty.
    pub fn preamble(&self, thread_id: &str, max_context_tokens_override: Option<u32>) -> Option<String> {
        let store = self.store.lock();
        let turns = store.get(thread_id)?;
        if turns.is_empty() {
            return None;
        }

        let transcript = turns
            .iter()
            .map(|t| format!("{}: {}", t.role.label(), t.content))
            .collect::<Vec<_>>()
            .join("\n");

        let budget = char_budget(max_context_tokens_override.unwrap_or(self.max_context_tokens));
        if transcript.len() <= budget {
            return Some(transcript);
        }

        let start = transcript.len() - budget;
        let boundary = floor_char_boundary(&transcript, start);
        Some(transcript[boundary..].to_string())
    }

    pub fn on_user_message(&self, thread_id: &str, text: &str) {
        self.append(thread_id, Role::User, text);
    }

    pub fn on_assistant_message(&self, thread_id: &str, text: &str) {
        self.append(thread_id, Role::Assistant, text);
    }

    fn append(&self, thread_id: &str, role: Role, text: &str) {
        if thread_id.is_empty() {
            return;
        }
        let mut store = self.store.lock();
        store.entry(thread_id.to_string()).or_default().push(Turn {
            role,
            content: text.to_string(),
        });
    }
}

/// Backport of the nightly-only `str::floor_char_boundary`: the largest
/// index `<= idx` that lies on a UTF-8 character boundary.
fn floor_char_boundary(s: &str, idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    let mut i = idx;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_thread_returns_none() {
        let mem = ThreadWindow::new(1024);
        assert!(mem.preamble("t1", None).is_none());
    }

    #[test]
    fn preamble_joins_turns_in_order() {
        let mem = ThreadWindow::new(1024);
        mem.on_user_message("t1", "hi");
        mem.on_assistant_message("t1", "hello");
        let p = mem.preamble("t1", None).unwrap();
        assert_eq!(p, "USER: hi\nASSISTANT: hello");
    }

    #[test]
    fn budget_keeps_tail_not_head() {
        let mem = ThreadWindow::new(16); // budget = max(64, 64) = 64
        for i in 0..30 {
            mem.on_user_message("t1", &format!("turn-{i}"));
        }
        let p = mem.preamble("t1", None).unwrap();
        assert!(p.len() <= 64);
        assert!(p.ends_with("turn-29"));
        assert!(!p.contains("turn-0\n"));
    }

    #[test]
    fn override_widens_budget_for_one_call() {
        let mem = ThreadWindow::new(16);
        for i in 0..30 {
            mem.on_user_message("t1", &format!("turn-{i}"));
        }
        let narrow = mem.preamble("t1", None).unwrap();
        let wide = mem.preamble("t1", Some(1024)).unwrap();
        assert!(wide.len() > narrow.len());
    }

    #[test]
    fn empty_thread_id_is_a_no_op() {
        let mem = ThreadWindow::new(1024);
        mem.on_user_message("", "ignored");
        assert!(mem.preamble("", None).is_none());
    }
}
