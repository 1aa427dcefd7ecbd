//! Push-to-pull bridge backed by an in-memory chunk queue.
//!
//! [`channel`] returns a [`QueuedSink`] that a non-blocking producer pushes
//! chunks into, and a [`QueuedReader`] that a dedicated thread drains with
//! blocking `std::io::Read` calls.
//!
//! ```text
//!   producer ──write()──▶ [ByteQueue] ──read()──▶ blocking reader
//!            ◀──drain───  high / low watermarks
//!            ──end()────▶ reader sees Ok(0) once the queue is empty
//! ```
//!
//! Dropping the sink ends the stream; dropping the reader closes it.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::buffer::ByteQueue;
use crate::config::QueueConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::flow::{DrainTrigger, LowMark, Watermarks};
use crate::monitor::Monitor;
use crate::stream::{report, Channel, ExceptionHandler, VoidHandler, WriteStream};

struct State {
    queue: ByteQueue,
    /// The producer called `end()`.
    ended: bool,
    /// The reader closed early or already observed end-of-stream.
    closed: bool,
    marks: Watermarks,
    exception: Option<ExceptionHandler>,
}

/// Create a connected sink/reader pair.
pub fn channel(config: &QueueConfig) -> (QueuedSink, QueuedReader) {
    let low = match config.low_water_mark {
        Some(low) => LowMark::AtOrBelow(low),
        None => LowMark::BelowHigh,
    };
    let state = State {
        queue: ByteQueue::new(),
        ended: false,
        closed: false,
        marks: Watermarks::new(config.high_water_mark, low, DrainTrigger::Level, config.drain_mode),
        exception: None,
    };
    let shared = Arc::new(Monitor::new(state));
    (
        QueuedSink {
            shared: Arc::clone(&shared),
        },
        QueuedReader { shared },
    )
}

/// Push side of a queued bridge.
pub struct QueuedSink {
    shared: Arc<Monitor<State>>,
}

/// Blocking read side of a queued bridge.
pub struct QueuedReader {
    shared: Arc<Monitor<State>>,
}

impl QueuedSink {
    /// Bytes pushed but not yet read.
    pub fn queued_bytes(&self) -> usize {
        self.shared.lock().queue.queued_bytes()
    }

    pub fn is_ended(&self) -> bool {
        self.shared.lock().ended
    }
}

impl WriteStream for QueuedSink {
    fn write(&self, data: Bytes) -> BridgeResult<()> {
        let mut state = self.shared.lock();
        let refusal = if state.ended {
            Some(BridgeError::Ended)
        } else if state.closed {
            Some(BridgeError::Closed)
        } else {
            None
        };
        if let Some(err) = refusal {
            let handler = state.exception.clone();
            drop(state);
            report(handler, &err);
            return Err(err);
        }

        if data.is_empty() {
            return Ok(());
        }

        let len = state.queue.push(data);
        let queued = state.queue.queued_bytes();
        let drain = state.marks.update(queued);
        drop(state);

        trace!(bytes = len, queued, "chunk enqueued");
        self.shared.notify_all();
        if let Some(drain) = drain {
            drain();
        }
        Ok(())
    }

    fn end(&self) -> BridgeResult<()> {
        let mut state = self.shared.lock();
        if state.ended {
            return Ok(());
        }
        state.ended = true;
        let queued = state.queue.queued_bytes();
        drop(state);

        debug!(queued, "queued bridge ended by producer");
        self.shared.notify_all();
        Ok(())
    }

    fn set_exception_handler(&self, handler: ExceptionHandler) {
        self.shared.lock().exception = Some(handler);
    }

    fn set_drain_handler(&self, handler: VoidHandler) {
        self.shared.lock().marks.set_drain_handler(handler);
    }

    fn write_queue_full(&self) -> bool {
        let state = self.shared.lock();
        state.marks.is_full(state.queue.queued_bytes())
    }

    fn set_write_queue_max_size(&self, max_size: usize) {
        self.shared.lock().marks.set_high(max_size);
    }
}

impl Drop for QueuedSink {
    fn drop(&mut self) {
        let _ = self.end();
    }
}

impl QueuedReader {
    /// Bytes currently queued and readable without blocking.
    pub fn available(&self) -> usize {
        self.shared.lock().queue.queued_bytes()
    }

    /// Wake a blocked reader without changing any state.
    ///
    /// The reader re-checks its wait condition and, if nothing changed,
    /// goes back to sleep.
    pub fn interrupt(&self) {
        self.shared.notify_all();
    }

    fn read_into(&self, dst: &mut [u8]) -> io::Result<usize> {
        if dst.is_empty() {
            return Ok(0);
        }

        let mut state = self.shared.lock();
        let mut announced = false;
        loop {
            if state.closed {
                return Ok(0);
            }

            if !state.queue.is_empty() {
                let n = state.queue.read_into(dst);
                let queued = state.queue.queued_bytes();
                let drain = if state.ended {
                    None
                } else {
                    state.marks.update(queued)
                };
                drop(state);

                trace!(bytes = n, queued, "chunk read");
                if let Some(drain) = drain {
                    drain();
                }
                return Ok(n);
            }

            if state.ended {
                state.closed = true;
                debug!("queued bridge reached end of stream");
                return Ok(0);
            }

            // About to block on an empty queue: let the producer know it
            // may push, once per call.
            if !announced {
                announced = true;
                if let Some(drain) = state.marks.update(0) {
                    drop(state);
                    drain();
                    state = self.shared.lock();
                    continue;
                }
            }

            state = self.shared.wait(state);
        }
    }
}

impl Channel for QueuedReader {
    fn is_open(&self) -> bool {
        !self.shared.lock().closed
    }

    fn close(&self) {
        let mut state = self.shared.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let discarded = state.queue.clear();
        let drain = if state.ended {
            None
        } else {
            state.marks.force_drain()
        };
        drop(state);

        debug!(discarded, "queued bridge closed by reader");
        self.shared.notify_all();
        if let Some(drain) = drain {
            drain();
        }
    }
}

impl io::Read for QueuedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_into(buf)
    }
}

impl io::Read for &QueuedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_into(buf)
    }
}

impl Drop for QueuedReader {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::DrainMode;
    use std::io::Read;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn counter() -> (VoidHandler, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (
            Arc::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
            count,
        )
    }

    fn spawn_reader(reader: Arc<QueuedReader>, size: usize) -> mpsc::Receiver<io::Result<Vec<u8>>> {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = vec![0u8; size];
            let result = (&*reader).read(&mut buf).map(|n| buf[..n].to_vec());
            let _ = tx.send(result);
        });
        rx
    }

    #[test]
    fn reads_chunks_in_order_with_small_buffer() {
        let (sink, mut reader) = channel(&QueueConfig::default());
        sink.write(Bytes::from_static(b"hello ")).unwrap();
        sink.write(Bytes::from_static(b"")).unwrap();
        sink.write(Bytes::from_static(b"world")).unwrap();
        sink.end().unwrap();

        let mut out = Vec::new();
        let mut buf = [0u8; 4];
        loop {
            let n = reader.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"hello world");
        assert!(!reader.is_open());

        // End-of-stream is sticky.
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn read_never_spans_chunks() {
        let (sink, mut reader) = channel(&QueueConfig::default());
        sink.write(Bytes::from_static(b"ab")).unwrap();
        sink.write(Bytes::from_static(b"cd")).unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ab");
        assert_eq!(reader.available(), 2);
    }

    #[test]
    fn blocked_reader_wakes_on_write() {
        let (sink, reader) = channel(&QueueConfig::default());
        let rx = spawn_reader(Arc::new(reader), 64);

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        sink.write(Bytes::from_static(b"late")).unwrap();

        let got = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!(got, b"late");
    }

    #[test]
    fn blocked_reader_wakes_on_end() {
        let (sink, reader) = channel(&QueueConfig::default());
        let rx = spawn_reader(Arc::new(reader), 64);

        thread::sleep(Duration::from_millis(20));
        sink.end().unwrap();

        let got = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn blocked_reader_wakes_on_close() {
        let (_sink, reader) = channel(&QueueConfig::default());
        let reader = Arc::new(reader);
        let rx = spawn_reader(Arc::clone(&reader), 64);

        thread::sleep(Duration::from_millis(20));
        reader.close();

        let got = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn interrupt_is_not_end_of_stream() {
        let (sink, reader) = channel(&QueueConfig::default());
        let reader = Arc::new(reader);
        let rx = spawn_reader(Arc::clone(&reader), 64);

        thread::sleep(Duration::from_millis(20));
        reader.interrupt();
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        sink.write(Bytes::from_static(b"x")).unwrap();
        let got = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!(got, b"x");
    }

    #[test]
    fn write_after_end_fails_and_reports() {
        let (sink, _reader) = channel(&QueueConfig::default());
        let failures = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&failures);
        sink.set_exception_handler(Arc::new(move |err: &BridgeError| {
            assert!(matches!(err, BridgeError::Ended));
            f.fetch_add(1, Ordering::SeqCst);
        }));

        sink.end().unwrap();
        sink.end().unwrap();
        assert!(matches!(
            sink.write(Bytes::from_static(b"x")),
            Err(BridgeError::Ended)
        ));
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn write_after_reader_close_fails_and_reports() {
        let (sink, reader) = channel(&QueueConfig::default());
        let failures = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&failures);
        sink.set_exception_handler(Arc::new(move |err: &BridgeError| {
            assert!(matches!(err, BridgeError::Closed));
            f.fetch_add(1, Ordering::SeqCst);
        }));

        sink.write(Bytes::from_static(b"dropped")).unwrap();
        drop(reader);

        assert_eq!(sink.queued_bytes(), 0);
        assert!(sink.write(Bytes::from_static(b"x")).is_err());
        assert!(sink.write(Bytes::from_static(b"y")).is_err());
        assert_eq!(failures.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn queue_full_at_high_water_mark() {
        let config = QueueConfig::default().with_high_water_mark(8).with_low_water_mark(4);
        let (sink, mut reader) = channel(&config);

        sink.write(Bytes::from(vec![1; 5])).unwrap();
        assert!(!sink.write_queue_full());
        sink.write(Bytes::from(vec![2; 3])).unwrap();
        assert!(sink.write_queue_full());

        let (drain, drains) = counter();
        sink.set_drain_handler(drain);

        // 8 -> 3 queued, at or below the low mark.
        let mut buf = [0u8; 5];
        assert_eq!(reader.read(&mut buf).unwrap(), 5);
        assert!(!sink.write_queue_full());
        assert_eq!(drains.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn set_write_queue_max_size_moves_high_mark() {
        let (sink, _reader) = channel(&QueueConfig::default());
        sink.write(Bytes::from(vec![0; 10])).unwrap();
        assert!(!sink.write_queue_full());

        sink.set_write_queue_max_size(10);
        assert!(sink.write_queue_full());
    }

    #[test]
    fn no_drain_above_low_water_mark() {
        let config = QueueConfig::default().with_high_water_mark(100).with_low_water_mark(10);
        let (sink, mut reader) = channel(&config);
        let (drain, drains) = counter();
        sink.set_drain_handler(drain);

        sink.write(Bytes::from(vec![0; 50])).unwrap();
        let mut buf = [0u8; 20];
        reader.read(&mut buf).unwrap();
        assert_eq!(drains.load(Ordering::SeqCst), 0);

        let mut buf = [0u8; 25];
        reader.read(&mut buf).unwrap();
        assert_eq!(drains.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reader_about_to_block_announces_drain() {
        let (sink, reader) = channel(&QueueConfig::default());
        let (drain, drains) = counter();
        sink.set_drain_handler(drain);

        let _rx = spawn_reader(Arc::new(reader), 8);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(drains.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn one_shot_drain_stays_silent_until_reregistered() {
        let config = QueueConfig::default()
            .with_high_water_mark(8)
            .with_low_water_mark(2)
            .with_drain_mode(DrainMode::OneShot);
        let (sink, mut reader) = channel(&config);
        let (drain, drains) = counter();
        sink.set_drain_handler(Arc::clone(&drain));

        let mut buf = [0u8; 8];
        sink.write(Bytes::from_static(b"abcdefgh")).unwrap();
        assert_eq!(reader.read(&mut buf[..4]).unwrap(), 4);
        assert_eq!(drains.load(Ordering::SeqCst), 0);
        assert_eq!(reader.read(&mut buf[..4]).unwrap(), 4);
        assert_eq!(drains.load(Ordering::SeqCst), 1);

        // The hook is spent: a second full cycle fires nothing.
        sink.write(Bytes::from_static(b"ijklmnop")).unwrap();
        assert_eq!(reader.read(&mut buf).unwrap(), 8);
        assert_eq!(drains.load(Ordering::SeqCst), 1);

        sink.set_drain_handler(drain);
        sink.write(Bytes::from_static(b"q")).unwrap();
        assert_eq!(drains.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn one_shot_drain_is_spent_by_reader_about_to_block() {
        let config = QueueConfig::default().with_drain_mode(DrainMode::OneShot);
        let (sink, reader) = channel(&config);
        let (drain, drains) = counter();
        sink.set_drain_handler(Arc::clone(&drain));

        let rx = spawn_reader(Arc::new(reader), 8);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(drains.load(Ordering::SeqCst), 1);

        sink.write(Bytes::from_static(b"x")).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap(), b"x");
        assert_eq!(drains.load(Ordering::SeqCst), 1);

        sink.set_drain_handler(drain);
        sink.write(Bytes::from_static(b"y")).unwrap();
        assert_eq!(drains.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn close_wakes_producer_waiting_for_drain() {
        let (sink, reader) = channel(&QueueConfig::default().with_high_water_mark(4));
        sink.write(Bytes::from(vec![0; 4])).unwrap();
        assert!(sink.write_queue_full());

        let (drain, drains) = counter();
        sink.set_drain_handler(drain);
        reader.close();
        reader.close();

        assert_eq!(drains.load(Ordering::SeqCst), 1);
        assert!(!sink.write_queue_full());
    }

    #[test]
    fn dropping_sink_ends_stream() {
        let (sink, mut reader) = channel(&QueueConfig::default());
        sink.write(Bytes::from_static(b"tail")).unwrap();
        drop(sink);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"tail");
    }

    #[test]
    fn drain_handler_may_write_back_into_sink() {
        let (sink, mut reader) = channel(&QueueConfig::default().with_high_water_mark(4));
        let sink = Arc::new(sink);
        let weak = Arc::downgrade(&sink);
        sink.set_drain_handler(Arc::new(move || {
            if let Some(sink) = weak.upgrade() {
                if sink.queued_bytes() == 0 {
                    let _ = sink.write(Bytes::from_static(b"!"));
                }
            }
        }));

        sink.write(Bytes::from_static(b"abcd")).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(reader.available(), 1);
    }
}
