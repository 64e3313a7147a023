// Scripted in-memory reader for tests and host-independent runs.

use super::CounterReader;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Default)]
struct Script {
    /// Queued contents per path; the last entry sticks once the queue drains.
    files: HashMap<String, VecDeque<Option<String>>>,
    reads: HashMap<String, usize>,
}

/// Minimal fake counter filesystem used in tests to script successive reads.
#[derive(Default)]
pub struct FakeReader {
    script: Mutex<Script>,
}

impl FakeReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever is scripted for `path` with a single sticky value.
    pub fn set(&self, path: &str, text: impl Into<String>) {
        let mut s = self.lock();
        s.files
            .insert(path.to_string(), VecDeque::from([Some(text.into())]));
    }

    /// Queue a value to be returned after the ones already scripted.
    pub fn push(&self, path: &str, text: impl Into<String>) {
        let mut s = self.lock();
        s.files
            .entry(path.to_string())
            .or_default()
            .push_back(Some(text.into()));
    }

    /// Queue an unreadable result for `path`.
    pub fn push_unreadable(&self, path: &str) {
        let mut s = self.lock();
        s.files.entry(path.to_string()).or_default().push_back(None);
    }

    /// Make `path` unreadable from now on.
    pub fn remove(&self, path: &str) {
        self.lock().files.remove(path);
    }

    /// How many times `path` was read (any method).
    pub fn read_count(&self, path: &str) -> usize {
        self.lock().reads.get(path).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CounterReader for FakeReader {
    fn read_text(&self, path: &str) -> Option<String> {
        let mut s = self.lock();
        *s.reads.entry(path.to_string()).or_default() += 1;
        let queue = s.files.get_mut(path)?;
        if queue.len() > 1 {
            queue.pop_front().flatten()
        } else {
            queue.front().cloned().flatten()
        }
    }
}
