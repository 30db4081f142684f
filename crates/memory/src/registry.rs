//! Name → strategy map. Names are normalised (trim + lowercase) so lookups
//! are forgiving of client-supplied casing.

use std::collections::HashMap;
use std::sync::Arc;

use crate::thread_window::ThreadWindow;

pub struct MemoryRegistry {
    strategies: HashMap<String, Arc<ThreadWindow>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, strategy: Arc<ThreadWindow>) {
        self.strategies
            .insert(normalize(name), strategy);
    }

    pub fn get(&self, name: &str) -> Option<Arc<ThreadWindow>> {
        self.strategies.get(&normalize(name)).cloned()
    }

    pub fn available(&self) -> Vec<String> {
        let mut names: Vec<String> = self.strategies.keys().cloned().collect();
        names.sort();
        names
    }

    /// Builds a registry from config, registering `thread_window` only
    /// when `memory.strategies.thread_window` is present.
    pub fn from_config(cfg: &relay_domain::config::MemoryConfig) -> Self {
        let mut registry = Self::new();
        if let Some(tw) = &cfg.strategies.thread_window {
            registry.register(
                "thread_window",
                Arc::new(ThreadWindow::new(tw.max_context_tokens)),
            );
        }
        registry
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_and_whitespace_insensitive() {
        let mut registry = MemoryRegistry::new();
        registry.register("Thread_Window", Arc::new(ThreadWindow::new(1024)));
        assert!(registry.get("  thread_window ").is_some());
    }

    #[test]
    fn available_is_sorted() {
        let mut registry = MemoryRegistry::new();
        registry.register("b", Arc::new(ThreadWindow::new(1024)));
        registry.register("a", Arc::new(ThreadWindow::new(1024)));
        assert_eq!(registry.available(), vec!["a", "b"]);
    }

    #[test]
    fn from_config_skips_unconfigured_strategy() {
        let cfg = relay_domain::config::MemoryConfig::default();
        let registry = MemoryRegistry::from_config(&cfg);
        assert!(registry.get("thread_window").is_none());
    }
}
