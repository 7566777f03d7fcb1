//! Explicit flush control.

use render_core::{FlushPolicy, SinkError};

use crate::sink::OutputSink;

/// Decides when content emitted by the scheduler reaches the sink.
#[derive(Debug)]
pub struct FlushController {
    policy: FlushPolicy,
    buffer: String,
    written: usize,
}

impl FlushController {
    /// Create a new flush controller with given policy.
    pub fn new(policy: FlushPolicy) -> Self {
        Self {
            policy,
            buffer: String::new(),
            written: 0,
        }
    }

    /// Accept one emitted segment. Returns the bytes handed to the sink.
    pub fn push(&mut self, chunk: &str, sink: &mut dyn OutputSink) -> Result<usize, SinkError> {
        if chunk.is_empty() {
            return Ok(0);
        }

        match self.policy {
            FlushPolicy::EachSegment => self.write(chunk, sink),
            FlushPolicy::PerPass => {
                self.buffer.push_str(chunk);
                Ok(0)
            }
            FlushPolicy::Threshold { bytes } => {
                self.buffer.push_str(chunk);
                if self.buffer.len() >= bytes {
                    self.drain(sink)
                } else {
                    Ok(0)
                }
            }
        }
    }

    /// Close a flush pass.
    pub fn end_pass(&mut self, sink: &mut dyn OutputSink) -> Result<usize, SinkError> {
        match self.policy {
            FlushPolicy::PerPass => self.drain(sink),
            FlushPolicy::EachSegment | FlushPolicy::Threshold { .. } => Ok(0),
        }
    }

    /// Hand every buffered byte to the sink.
    pub fn drain(&mut self, sink: &mut dyn OutputSink) -> Result<usize, SinkError> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let chunk = std::mem::take(&mut self.buffer);
        self.write(&chunk, sink)
    }

    fn write(&mut self, chunk: &str, sink: &mut dyn OutputSink) -> Result<usize, SinkError> {
        sink.write(chunk)?;
        self.written += chunk.len();
        tracing::trace!(bytes = chunk.len(), "wrote chunk to sink");
        Ok(chunk.len())
    }

    /// Bytes buffered but not yet written.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes written to the sink so far.
    pub fn total_written(&self) -> usize {
        self.written
    }

    /// Get current policy.
    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }
}

impl Default for FlushController {
    fn default() -> Self {
        Self::new(FlushPolicy::default())
    }
}
