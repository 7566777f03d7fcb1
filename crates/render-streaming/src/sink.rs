//! Output sink adapters.

use std::io::Write;

use futures::channel::mpsc::UnboundedSender;
use render_core::SinkError;

/// Destination for flushed render output.
///
/// Sinks are driven from inside the render's critical section and must not
/// call back into the render that owns them.
pub trait OutputSink: Send {
    /// Accept the next chunk of output, in final order.
    fn write(&mut self, chunk: &str) -> Result<(), SinkError>;

    /// Signal that no more output will follow.
    fn finish(&mut self) -> Result<(), SinkError>;

    /// Everything written so far, for sinks that keep it in memory.
    fn output(&self) -> Option<String> {
        None
    }
}

/// In-memory accumulator. The default destination of a render.
#[derive(Debug, Default)]
pub struct MemorySink {
    buffer: String,
    finished: bool,
}

impl MemorySink {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `finish` has been called.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl OutputSink for MemorySink {
    fn write(&mut self, chunk: &str) -> Result<(), SinkError> {
        if self.finished {
            return Err(SinkError::AlreadyFinished);
        }
        self.buffer.push_str(chunk);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.finished = true;
        Ok(())
    }

    fn output(&self) -> Option<String> {
        Some(self.buffer.clone())
    }
}

/// Adapter over any `io::Write` destination (files, stdout, sockets).
///
/// The writer is flushed on `finish` and dropped with the sink.
#[derive(Debug)]
pub struct WriterSink<W: Write + Send> {
    inner: Option<W>,
}

impl<W: Write + Send> WriterSink<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self {
            inner: Some(writer),
        }
    }

    /// Get the underlying writer, if the sink is still open.
    pub fn get_ref(&self) -> Option<&W> {
        self.inner.as_ref()
    }
}

impl<W: Write + Send> OutputSink for WriterSink<W> {
    fn write(&mut self, chunk: &str) -> Result<(), SinkError> {
        let writer = self.inner.as_mut().ok_or(SinkError::AlreadyFinished)?;
        writer.write_all(chunk.as_bytes())?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        let mut writer = self.inner.take().ok_or(SinkError::AlreadyFinished)?;
        writer.flush()?;
        Ok(())
    }
}

/// Streaming adapter that forwards chunks to an async consumer.
///
/// The receiving half is a `futures::Stream<Item = Vec<u8>>` that ends once
/// the render finishes.
#[derive(Debug)]
pub struct ChannelSink {
    tx: UnboundedSender<Vec<u8>>,
}

impl ChannelSink {
    /// Wrap the sending half of a channel.
    pub fn new(tx: UnboundedSender<Vec<u8>>) -> Self {
        Self { tx }
    }
}

impl OutputSink for ChannelSink {
    fn write(&mut self, chunk: &str) -> Result<(), SinkError> {
        self.tx
            .unbounded_send(chunk.as_bytes().to_vec())
            .map_err(|_| SinkError::Closed)
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.tx.close_channel();
        Ok(())
    }
}
