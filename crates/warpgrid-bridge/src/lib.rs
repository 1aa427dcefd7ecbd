//! WarpGrid stream bridges between push-based byte streams and blocking
//! `std::io` ports.
//!
//! A push stream hands chunks to registered handlers whenever data is
//! ready; a blocking port is a `Read`/`Write` object whose calls park the
//! thread. Each bridge returns two halves sharing one piece of state:
//!
//! | Constructor | Push half | Blocking half | Backpressure |
//! |---|---|---|---|
//! | [`queued::channel`] | [`QueuedSink`] | [`QueuedReader`] (`Read`) | queue byte count vs. watermarks |
//! | [`demand::channel`] | [`DemandSource`] | [`DemandWriter`] (`Write`) | pause / resume / fetch credits |
//! | [`pipe::pipe`] | [`PipeSink`] | [`PipeReader`] (`Read`) | kernel pipe buffer only |
//! | [`pipe::watermarked_pipe`] | [`PipeSink`] | [`PipeReader`] (`Read`) | unread bytes vs. watermarks |
//!
//! [`SinkWriter`] adapts any [`WriteStream`] to `Write`, and [`forward`]
//! wires a [`ReadStream`] into a [`WriteStream`].
//!
//! # Lifecycle
//!
//! Dropping a push half ends the stream, so the blocking reader sees
//! end-of-stream once the buffered bytes are consumed. Dropping a blocking
//! half closes the bridge, so later pushes fail with
//! [`BridgeError::Closed`].
//!
//! # Memory
//!
//! The queued bridge does not cap its queue: a producer that ignores
//! `write_queue_full()` grows it without bound. The watermarks only tell a
//! cooperating producer when to stop and when to continue.

pub mod buffer;
pub mod config;
pub mod demand;
mod error;
pub mod flow;
pub mod forward;
pub(crate) mod monitor;
pub mod output;
pub mod pipe;
pub mod queued;
pub mod stream;

pub use buffer::ByteQueue;
pub use config::{BridgeConfig, PipeConfig, QueueConfig, WritePolicy, WriterConfig};
pub use demand::{DemandSource, DemandWriter};
pub use error::{BridgeError, BridgeResult};
pub use flow::{DrainMode, FlowState};
pub use forward::{forward, forward_stream, ByteStream};
pub use output::SinkWriter;
pub use pipe::{PipeReader, PipeSink};
pub use queued::{QueuedReader, QueuedSink};
pub use stream::{Channel, DataHandler, ExceptionHandler, ReadStream, VoidHandler, WriteStream};
