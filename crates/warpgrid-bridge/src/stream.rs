//! Push-stream contracts and handler types.
//!
//! [`WriteStream`] is the non-blocking sink a producer pushes chunks into;
//! [`ReadStream`] is the non-blocking source a consumer registers handlers
//! on. [`Channel`] is the open/close half of the blocking contract whose
//! data half is `std::io::Read` / `std::io::Write`.
//!
//! Handlers are shared closures. Bridges never invoke them while holding
//! an internal lock, so a handler may call back into the stream it was
//! registered on.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::{BridgeError, BridgeResult};

/// Handler for signals that carry no payload (drain, end).
pub type VoidHandler = Arc<dyn Fn() + Send + Sync>;

/// Handler receiving each delivered chunk.
pub type DataHandler = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Handler receiving failures that cannot be returned to the caller.
pub type ExceptionHandler = Arc<dyn Fn(&BridgeError) + Send + Sync>;

/// Non-blocking sink for byte chunks.
pub trait WriteStream: Send + Sync {
    /// Push a chunk. Never blocks on the consumer.
    fn write(&self, data: Bytes) -> BridgeResult<()>;

    /// Signal end of input. Idempotent.
    fn end(&self) -> BridgeResult<()>;

    fn set_exception_handler(&self, handler: ExceptionHandler);

    /// Register the handler invoked when a full queue has drained.
    fn set_drain_handler(&self, handler: VoidHandler);

    /// Whether the producer should stop pushing until drain fires.
    fn write_queue_full(&self) -> bool;

    fn set_write_queue_max_size(&self, max_size: usize);
}

/// Non-blocking source of byte chunks with demand-based flow control.
pub trait ReadStream: Send + Sync {
    fn set_data_handler(&self, handler: DataHandler);

    fn set_end_handler(&self, handler: VoidHandler);

    fn set_exception_handler(&self, handler: ExceptionHandler);

    /// Stop unconstrained delivery.
    fn pause(&self);

    /// Return to unconstrained delivery.
    fn resume(&self);

    /// Allow `amount` more bytes while paused.
    fn fetch(&self, amount: usize);

    /// Tear the source down. Idempotent.
    fn close(&self);
}

/// Open/close state of a blocking channel half.
pub trait Channel {
    fn is_open(&self) -> bool;

    /// Close the channel, waking any thread blocked on it. Idempotent.
    fn close(&self);
}

/// Invoke an optional exception handler.
pub(crate) fn report(handler: Option<ExceptionHandler>, err: &BridgeError) {
    tracing::warn!(error = %err, "stream failure");
    if let Some(handler) = handler {
        handler(err);
    }
}

impl<T: WriteStream + ?Sized> WriteStream for Arc<T> {
    fn write(&self, data: Bytes) -> BridgeResult<()> {
        (**self).write(data)
    }

    fn end(&self) -> BridgeResult<()> {
        (**self).end()
    }

    fn set_exception_handler(&self, handler: ExceptionHandler) {
        (**self).set_exception_handler(handler)
    }

    fn set_drain_handler(&self, handler: VoidHandler) {
        (**self).set_drain_handler(handler)
    }

    fn write_queue_full(&self) -> bool {
        (**self).write_queue_full()
    }

    fn set_write_queue_max_size(&self, max_size: usize) {
        (**self).set_write_queue_max_size(max_size)
    }
}
