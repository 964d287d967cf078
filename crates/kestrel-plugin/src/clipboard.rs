//! Clipboard access seam.
//!
//! The launcher owns the real system clipboard; the runtime only sees this
//! trait. [`MemoryClipboard`] is the default and is what tests use.

use std::sync::Mutex;

/// Clipboard backend used by `readClipboard`/`writeClipboard`.
pub trait Clipboard: Send + Sync {
    /// Current text contents, if any.
    fn read(&self) -> Option<String>;

    /// Replace the contents. Returns whether the write succeeded.
    fn write(&self, text: &str) -> bool;
}

/// Process-local clipboard.
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    contents: Mutex<Option<String>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clipboard holding `text`.
    pub fn with_contents(text: impl Into<String>) -> Self {
        Self {
            contents: Mutex::new(Some(text.into())),
        }
    }
}

impl Clipboard for MemoryClipboard {
    fn read(&self) -> Option<String> {
        self.contents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn write(&self, text: &str) -> bool {
        *self.contents.lock().unwrap_or_else(|e| e.into_inner()) = Some(text.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_clipboard() {
        let clipboard = MemoryClipboard::new();
        assert_eq!(clipboard.read(), None);
        assert!(clipboard.write("copied"));
        assert_eq!(clipboard.read().as_deref(), Some("copied"));
        assert_eq!(MemoryClipboard::with_contents("x").read().as_deref(), Some("x"));
    }
}
