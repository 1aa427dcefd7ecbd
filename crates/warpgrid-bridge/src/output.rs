//! Blocking `std::io::Write` over a push sink.
//!
//! [`SinkWriter`] turns every `write(buf)` into exactly one
//! [`WriteStream::write`] of a copied chunk. Under
//! [`WritePolicy::AwaitDrain`] it additionally parks the calling thread
//! while the sink reports a full write queue.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::config::WritePolicy;
use crate::error::{BridgeError, BridgeResult};
use crate::monitor::Monitor;
use crate::stream::{VoidHandler, WriteStream};

/// Counts drain and exception signals so a waiting writer can tell a
/// fresh wakeup from one it has already seen.
struct Signals {
    monitor: Monitor<u64>,
}

impl Signals {
    fn bump(&self) {
        *self.monitor.lock() += 1;
        self.monitor.notify_all();
    }
}

/// Drain hook owned by an `AwaitDrain` writer.
struct DrainWait {
    signals: Arc<Signals>,
    hook: VoidHandler,
}

pub struct SinkWriter<S: WriteStream> {
    sink: S,
    closed: bool,
    drain: Option<DrainWait>,
}

impl<S: WriteStream> SinkWriter<S> {
    /// Writer that returns as soon as the sink accepted each chunk.
    pub fn new(sink: S) -> Self {
        Self::with_policy(sink, WritePolicy::FireAndForget)
    }

    /// Writer with an explicit full-queue policy.
    ///
    /// `AwaitDrain` takes over the sink's drain and exception handlers.
    pub fn with_policy(sink: S, policy: WritePolicy) -> Self {
        let drain = match policy {
            WritePolicy::FireAndForget => None,
            WritePolicy::AwaitDrain => {
                let signals = Arc::new(Signals {
                    monitor: Monitor::new(0),
                });
                let on_drain = Arc::clone(&signals);
                let hook: VoidHandler = Arc::new(move || on_drain.bump());
                sink.set_drain_handler(Arc::clone(&hook));
                let on_error = Arc::clone(&signals);
                sink.set_exception_handler(Arc::new(move |_: &BridgeError| on_error.bump()));
                Some(DrainWait { signals, hook })
            }
        };
        Self {
            sink,
            closed: false,
            drain,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.sink
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// End the underlying sink. Only the first call reaches the sink.
    pub fn close(&mut self) -> BridgeResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!("sink writer closed");
        self.sink.end()
    }

    fn await_drain(&self) {
        let Some(drain) = &self.drain else {
            return;
        };
        if !self.sink.write_queue_full() {
            return;
        }
        // A one-shot sink drops its hook after firing; register it again
        // so this wait, and a close while waiting, can still be signalled.
        self.sink.set_drain_handler(Arc::clone(&drain.hook));

        let mut seen = drain.signals.monitor.lock();
        let start = *seen;
        while *seen == start && self.sink.write_queue_full() {
            trace!("sink full, waiting for drain");
            seen = drain.signals.monitor.wait(seen);
        }
    }
}

impl<S: WriteStream> io::Write for SinkWriter<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(BridgeError::Ended.into());
        }
        if buf.is_empty() {
            return Ok(0);
        }
        self.sink.write(Bytes::copy_from_slice(buf))?;
        self.await_drain();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: WriteStream> Drop for SinkWriter<S> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
