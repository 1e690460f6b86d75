//! Destinations for subprocess output
//!
//! One sink is created per operation invocation. Lines are delivered as the
//! subprocess produces them.

use super::OperationOutcome;
use serde::Serialize;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// Which subprocess stream a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

/// One line of subprocess output, without its trailing newline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub stream: Stream,
    pub text: String,
}

impl LogLine {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stream: Stream::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            stream: Stream::Stderr,
            text: text.into(),
        }
    }
}

/// Receiver of streamed operation output
pub trait LogSink: Send + Sync {
    fn line(&self, line: LogLine);
}

/// Event delivered through a [`ChannelSink`]
#[derive(Debug, Clone)]
pub enum OperationEvent {
    Line(LogLine),
    Done(OperationOutcome),
}

/// Forwards lines over an unbounded channel, followed by a single `Done`
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<OperationEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OperationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Signal completion. The receiver may already be gone.
    pub fn done(&self, outcome: OperationOutcome) {
        let _ = self.tx.send(OperationEvent::Done(outcome));
    }
}

impl LogSink for ChannelSink {
    fn line(&self, line: LogLine) {
        let _ = self.tx.send(OperationEvent::Line(line));
    }
}

/// Collects every line in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<LogLine>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<LogLine> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Text of every collected line, newline-joined
    pub fn text(&self) -> String {
        self.lines()
            .into_iter()
            .map(|l| l.text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl LogSink for MemorySink {
    fn line(&self, line: LogLine) {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(line);
    }
}

/// Forwards lines to the tracing subscriber at debug level
#[derive(Debug, Clone)]
pub struct TracingSink {
    unit: String,
}

impl TracingSink {
    pub fn new(unit: impl Into<String>) -> Self {
        Self { unit: unit.into() }
    }
}

impl LogSink for TracingSink {
    fn line(&self, line: LogLine) {
        debug!(unit = %self.unit, stream = ?line.stream, "{}", line.text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Operation;

    #[test]
    fn test_memory_sink_preserves_order() {
        let sink = MemorySink::new();
        sink.line(LogLine::stdout("one"));
        sink.line(LogLine::stderr("two"));
        sink.line(LogLine::stdout("three"));

        assert_eq!(sink.text(), "one\ntwo\nthree");
        assert_eq!(sink.lines()[1].stream, Stream::Stderr);
    }

    #[tokio::test]
    async fn test_channel_sink_lines_then_done() {
        let (sink, mut rx) = ChannelSink::new();
        sink.line(LogLine::stdout("Building web"));
        sink.done(OperationOutcome::succeeded(Operation::Build, "XBEN-001-24"));

        match rx.recv().await {
            Some(OperationEvent::Line(line)) => assert_eq!(line.text, "Building web"),
            other => panic!("expected line, got {:?}", other),
        }
        match rx.recv().await {
            Some(OperationEvent::Done(outcome)) => {
                assert!(outcome.success);
                assert_eq!(outcome.unit, "XBEN-001-24");
            }
            other => panic!("expected done, got {:?}", other),
        }
    }

    #[test]
    fn test_channel_sink_tolerates_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.line(LogLine::stdout("nobody listening"));
        sink.done(OperationOutcome::succeeded(Operation::Stop, "XBEN-002-24"));
    }
}
