//! The trace stream.
//!
//! Tracing is disabled by default and enabled by handing the process an
//! explicit handle; there is no global stream. The EBREAK instruction always
//! writes to the configured handle, which is how programs dump their state
//! for inspection.

use std::{
    io::Write,
    sync::{Arc, Mutex},
};

/// A shared, cloneable handle to the trace sink.
#[derive(Clone, Default)]
pub struct TraceStream {
    sink: Option<Arc<Mutex<Box<dyn Write + Send>>>>,
}

impl TraceStream {
    /// A disabled stream: all writes are dropped.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// A stream writing into the given sink.
    pub fn to(sink: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Some(Arc::new(Mutex::new(sink))),
        }
    }

    /// A stream writing to standard error.
    pub fn to_stderr() -> Self {
        Self::to(Box::new(std::io::stderr()))
    }

    /// A stream accumulating into a shared buffer; the buffer is returned
    /// alongside so tests can inspect what was written.
    pub fn to_buffer() -> (Self, Arc<Mutex<Vec<u8>>>) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = SharedBuffer(Arc::clone(&buffer));
        (Self::to(Box::new(sink)), buffer)
    }

    /// Is a sink configured?
    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Write one line to the sink, if one is configured.
    pub fn line(&self, line: core::fmt::Arguments<'_>) {
        if let Some(sink) = &self.sink {
            let mut sink = sink.lock().expect("trace sink poisoned");
            let _ = writeln!(sink, "{line}");
        }
    }
}

impl core::fmt::Debug for TraceStream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TraceStream")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("trace buffer poisoned").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
