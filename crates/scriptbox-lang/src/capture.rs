//! Output capture sink.
//!
//! Script output never reaches the process stdout. `print` writes into an
//! `OutputSink`; the sandbox attaches the captured lines to the result.

use tracing::trace;

pub trait OutputSink: Send {
    fn write(&mut self, text: &str);
    fn is_enabled(&self) -> bool;
    /// Switch capturing on or off, returning the previous setting.
    fn set_enabled(&mut self, enabled: bool) -> bool;
}

#[derive(Debug, Clone)]
pub struct CaptureSink {
    enabled: bool,
    lines: Vec<String>,
}

impl Default for CaptureSink {
    fn default() -> Self {
        Self {
            enabled: true,
            lines: Vec::new(),
        }
    }
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Drop captured lines and start capturing again.
    pub fn reset(&mut self) {
        self.lines.clear();
        self.enabled = true;
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn take_lines(&mut self) -> Vec<String> {
        std::mem::take(&mut self.lines)
    }
}

impl OutputSink for CaptureSink {
    /// Whitespace-only text is ignored.
    fn write(&mut self, text: &str) {
        if self.enabled && !text.trim().is_empty() {
            trace!(len = text.len(), "captured output");
            self.lines.push(text.to_string());
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) -> bool {
        std::mem::replace(&mut self.enabled, enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_is_dropped() {
        let mut sink = CaptureSink::new();
        sink.write("hello");
        sink.write("   ");
        sink.write("\n");
        assert_eq!(sink.lines(), ["hello"]);
    }

    #[test]
    fn disable_keeps_lines_and_reset_clears() {
        let mut sink = CaptureSink::new();
        sink.write("a");
        sink.disable();
        sink.write("b");
        sink.enable();
        sink.write("c");
        assert_eq!(sink.lines(), ["a", "c"]);

        sink.disable();
        sink.reset();
        assert!(sink.is_enabled());
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn take_lines_drains() {
        let mut sink = CaptureSink::new();
        sink.write("x");
        assert_eq!(sink.take_lines(), vec!["x".to_string()]);
        assert!(sink.lines().is_empty());
        assert!(sink.set_enabled(false));
        assert!(!sink.is_enabled());
    }
}
