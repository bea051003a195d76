use std::sync::{Arc, Mutex};

use dtexec::msglog::MessageSink;

/// Message sink that keeps every `(tag, body)` entry in memory.
///
/// Clones share the same storage, so a test can hand one clone to the
/// reactor and inspect the other.
#[derive(Debug, Clone, Default)]
pub struct CaptureSink {
    entries: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(String, Vec<u8>)> {
        self.entries.lock().unwrap().clone()
    }

    /// Every body logged under `tag`, concatenated.
    pub fn text_for(&self, tag: &str) -> String {
        let entries = self.entries.lock().unwrap();
        let bytes: Vec<u8> = entries
            .iter()
            .filter(|(t, _)| t == tag)
            .flat_map(|(_, body)| body.iter().copied())
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl MessageSink for CaptureSink {
    fn log(&mut self, tag: &str, body: &[u8]) {
        self.entries
            .lock()
            .unwrap()
            .push((tag.to_string(), body.to_vec()));
    }
}
