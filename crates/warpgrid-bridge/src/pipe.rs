//! Push-to-pull bridges backed by an OS pipe.
//!
//! [`pipe`] and [`watermarked_pipe`] both return a [`PipeSink`] that copies
//! pushed chunks into the write end of a kernel pipe, and a [`PipeReader`]
//! exposing the read end as `std::io::Read`.
//!
//! - **Bare**: no accounting of its own. The kernel buffer is the only
//!   backpressure: once it is full, `write` blocks inside the `write(2)`
//!   call until the reader catches up.
//! - **Watermarked**: additionally counts unread bytes. The sink reports
//!   `write_queue_full()` at the high watermark, and the drain handler
//!   fires once the count falls below half of it.
//!
//! File descriptors are held as `Arc<OwnedFd>` and cloned out of the lock
//! for each system call, so a blocked `read(2)`/`write(2)` never holds the
//! bridge's mutex. Closing drops the shared references; the descriptor is
//! released when the last in-flight call returns.

use std::io;
use std::sync::{Arc, MutexGuard};

use bytes::Bytes;
use rustix::fd::OwnedFd;
use rustix::io::Errno;
use tracing::{debug, trace};

use crate::config::PipeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::flow::{DrainTrigger, LowMark, Watermarks};
use crate::monitor::Monitor;
use crate::stream::{report, Channel, ExceptionHandler, VoidHandler, WriteStream};

struct State {
    reader: Option<Arc<OwnedFd>>,
    writer: Option<Arc<OwnedFd>>,
    ended: bool,
    closed: bool,
    /// Bytes written by the sink and not yet consumed by the reader.
    available: usize,
    marks: Option<Watermarks>,
    exception: Option<ExceptionHandler>,
}

struct Shared {
    state: Monitor<State>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock()
    }

    /// Tear down after an I/O failure: report it and behave as if the
    /// producer had ended the stream.
    fn fail(&self, err: io::Error) -> BridgeError {
        let mut state = self.lock();
        state.ended = true;
        let writer = state.writer.take();
        let handler = state.exception.clone();
        drop(state);
        drop(writer);

        let err = BridgeError::Io(err);
        report(handler, &err);
        err
    }
}

/// Open a pipe bridge without flow control.
pub fn pipe() -> BridgeResult<(PipeSink, PipeReader)> {
    open(None)
}

/// Open a pipe bridge that tracks unread bytes against watermarks.
pub fn watermarked_pipe(config: &PipeConfig) -> BridgeResult<(PipeSink, PipeReader)> {
    open(Some(Watermarks::new(
        config.high_water_mark,
        LowMark::BelowHalfHigh,
        DrainTrigger::Edge,
        config.drain_mode,
    )))
}

fn open(marks: Option<Watermarks>) -> BridgeResult<(PipeSink, PipeReader)> {
    let (read_fd, write_fd) = rustix::pipe::pipe().map_err(io::Error::from)?;
    debug!(watermarked = marks.is_some(), "opened pipe bridge");

    let shared = Arc::new(Shared {
        state: Monitor::new(State {
            reader: Some(Arc::new(read_fd)),
            writer: Some(Arc::new(write_fd)),
            ended: false,
            closed: false,
            available: 0,
            marks,
            exception: None,
        }),
    });
    Ok((
        PipeSink {
            shared: Arc::clone(&shared),
        },
        PipeReader { shared },
    ))
}

/// Write all of `data`. On failure, returns the error together with the
/// number of bytes that never reached the pipe.
fn write_all_fd(fd: &OwnedFd, mut data: &[u8]) -> Result<(), (usize, io::Error)> {
    while !data.is_empty() {
        match rustix::io::write(fd, data) {
            Ok(n) => data = &data[n..],
            Err(Errno::INTR) => continue,
            Err(e) => return Err((data.len(), e.into())),
        }
    }
    Ok(())
}

fn read_fd(fd: &OwnedFd, dst: &mut [u8]) -> io::Result<usize> {
    loop {
        match rustix::io::read(fd, &mut *dst) {
            Ok(n) => return Ok(n),
            Err(Errno::INTR) => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Push side of a pipe bridge.
pub struct PipeSink {
    shared: Arc<Shared>,
}

/// Blocking read side of a pipe bridge.
pub struct PipeReader {
    shared: Arc<Shared>,
}

impl PipeSink {
    pub fn is_ended(&self) -> bool {
        self.shared.lock().ended
    }
}

impl WriteStream for PipeSink {
    fn write(&self, data: Bytes) -> BridgeResult<()> {
        let mut state = self.shared.lock();
        let fd = match (&state.writer, state.ended, state.closed) {
            (_, true, _) => Err(BridgeError::Ended),
            (_, _, true) => Err(BridgeError::Closed),
            (Some(fd), _, _) => Ok(Arc::clone(fd)),
            (None, _, _) => Err(BridgeError::Ended),
        };
        let fd = match fd {
            Ok(fd) => fd,
            Err(err) => {
                let handler = state.exception.clone();
                drop(state);
                report(handler, &err);
                return Err(err);
            }
        };

        if data.is_empty() {
            return Ok(());
        }

        state.available += data.len();
        let available = state.available;
        if let Some(marks) = state.marks.as_mut() {
            // Rising level only arms the drain; it never fires here.
            let _ = marks.update(available);
        }
        drop(state);

        trace!(bytes = data.len(), available, "writing chunk to pipe");
        match write_all_fd(&fd, &data) {
            Ok(()) => Ok(()),
            Err((unwritten, e)) => {
                let mut state = self.shared.lock();
                state.available = state.available.saturating_sub(unwritten);
                drop(state);
                Err(self.shared.fail(e))
            }
        }
    }

    fn end(&self) -> BridgeResult<()> {
        let mut state = self.shared.lock();
        if state.ended {
            return Ok(());
        }
        state.ended = true;
        let writer = state.writer.take();
        drop(state);

        drop(writer);
        debug!("pipe bridge ended by producer");
        Ok(())
    }

    fn set_exception_handler(&self, handler: ExceptionHandler) {
        self.shared.lock().exception = Some(handler);
    }

    fn set_drain_handler(&self, handler: VoidHandler) {
        // Without watermarks the queue is never reported full, so there
        // is nothing to drain.
        if let Some(marks) = self.shared.lock().marks.as_mut() {
            marks.set_drain_handler(handler);
        }
    }

    fn write_queue_full(&self) -> bool {
        let state = self.shared.lock();
        state
            .marks
            .as_ref()
            .is_some_and(|marks| marks.is_full(state.available))
    }

    fn set_write_queue_max_size(&self, max_size: usize) {
        if let Some(marks) = self.shared.lock().marks.as_mut() {
            marks.set_high(max_size);
        }
    }
}

impl Drop for PipeSink {
    fn drop(&mut self) {
        let _ = self.end();
    }
}

impl PipeReader {
    /// Bytes written into the pipe and not read yet.
    pub fn available(&self) -> usize {
        self.shared.lock().available
    }

    fn read_into(&self, dst: &mut [u8]) -> io::Result<usize> {
        if dst.is_empty() {
            return Ok(0);
        }

        let Some(fd) = self.shared.lock().reader.clone() else {
            return Ok(0);
        };

        let n = match read_fd(&fd, dst) {
            Ok(n) => n,
            Err(e) => {
                drop(fd);
                self.shared.fail(e);
                self.close();
                return Ok(0);
            }
        };
        drop(fd);

        if n == 0 {
            debug!("pipe bridge reached end of stream");
            self.close();
            return Ok(0);
        }

        let mut state = self.shared.lock();
        state.available = state.available.saturating_sub(n);
        let available = state.available;
        let drain = state.marks.as_mut().and_then(|marks| marks.update(available));
        drop(state);

        trace!(bytes = n, available, "read from pipe");
        if let Some(drain) = drain {
            drain();
        }
        Ok(n)
    }
}

impl Channel for PipeReader {
    fn is_open(&self) -> bool {
        !self.shared.lock().closed
    }

    /// Close both ends of the pipe.
    fn close(&self) {
        let mut state = self.shared.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        // Unread bytes die with the pipe.
        state.available = 0;
        let reader = state.reader.take();
        let writer = state.writer.take();
        let drain = if state.ended {
            None
        } else {
            state.marks.as_mut().and_then(Watermarks::force_drain)
        };
        drop(state);

        drop(reader);
        drop(writer);
        debug!("pipe bridge closed by reader");
        if let Some(drain) = drain {
            drain();
        }
    }
}

impl io::Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_into(buf)
    }
}

impl io::Read for &PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_into(buf)
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.close();
    }
}
