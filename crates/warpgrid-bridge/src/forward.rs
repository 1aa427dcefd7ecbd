//! Forwarding between push streams with backpressure.
//!
//! [`forward`] connects a [`ReadStream`] to a [`WriteStream`] with handlers
//! only, so it never blocks. [`forward_stream`] drives an async byte stream
//! into a sink and suspends while the sink is full.

use std::future::poll_fn;
use std::pin::Pin;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use futures_core::Stream;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::error::{BridgeError, BridgeResult};
use crate::stream::{ReadStream, WriteStream};

/// Boxed async source of byte chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = BridgeResult<Bytes>> + Send>>;

/// Pipe every chunk of `source` into `sink`.
///
/// The source is paused while the sink reports a full write queue and
/// resumed from the sink's drain handler. The sink is ended when the source
/// ends; the source is closed when the sink fails. Sink handlers hold only
/// a weak reference to the source.
pub fn forward<R, W>(source: &Arc<R>, sink: Arc<W>)
where
    R: ReadStream + 'static,
    W: WriteStream + 'static,
{
    let weak: Weak<R> = Arc::downgrade(source);

    let on_drain = weak.clone();
    sink.set_drain_handler(Arc::new(move || {
        if let Some(source) = on_drain.upgrade() {
            trace!("sink drained, resuming source");
            source.resume();
        }
    }));

    let on_error = weak.clone();
    sink.set_exception_handler(Arc::new(move |err: &BridgeError| {
        if let Some(source) = on_error.upgrade() {
            debug!(error = %err, "sink failed, closing source");
            source.close();
        }
    }));

    let data_sink = Arc::clone(&sink);
    let on_data = weak;
    source.set_data_handler(Arc::new(move |chunk: Bytes| {
        if data_sink.write(chunk).is_err() {
            return;
        }
        if !data_sink.write_queue_full() {
            return;
        }
        if let Some(source) = on_data.upgrade() {
            trace!("sink full, pausing source");
            source.pause();
            // A drain that raced the pause would otherwise be lost.
            if !data_sink.write_queue_full() {
                source.resume();
            }
        }
    }));

    let end_sink = Arc::clone(&sink);
    source.set_end_handler(Arc::new(move || {
        debug!("source ended, ending sink");
        let _ = end_sink.end();
    }));

    source.set_exception_handler(Arc::new(move |err: &BridgeError| {
        debug!(error = %err, "source failed, ending sink");
        let _ = sink.end();
    }));
}

/// Drive `stream` into `sink` until it finishes, then end the sink.
///
/// Returns the number of bytes forwarded. A stream error ends the sink and
/// is returned as is.
pub async fn forward_stream<W>(mut stream: ByteStream, sink: &W) -> BridgeResult<u64>
where
    W: WriteStream + ?Sized,
{
    let drained = Arc::new(Notify::new());
    let on_drain = Arc::clone(&drained);
    sink.set_drain_handler(Arc::new(move || on_drain.notify_one()));

    let mut total = 0u64;
    while let Some(item) = poll_fn(|cx| stream.as_mut().poll_next(cx)).await {
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(err) => {
                let _ = sink.end();
                return Err(err);
            }
        };
        total += chunk.len() as u64;
        sink.write(chunk)?;

        while sink.write_queue_full() {
            drained.notified().await;
        }
    }

    sink.end()?;
    debug!(bytes = total, "stream forwarded");
    Ok(total)
}
