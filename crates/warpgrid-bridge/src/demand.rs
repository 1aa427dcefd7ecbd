//! Pull-to-push bridge with demand-credit flow control.
//!
//! A producer thread writes into a [`DemandWriter`] with blocking
//! `std::io::Write` calls; the bytes come out of the paired
//! [`DemandSource`] as chunks handed to its data handler.
//!
//! The consumer controls the pace through [`ReadStream`]:
//!
//! - `resume()`: flowing, every write is delivered in full.
//! - `pause()`: writes block until demand is granted.
//! - `fetch(n)`: grant `n` more bytes while paused. A write larger than
//!   the outstanding demand delivers exactly the demand and returns a
//!   short count; `write_all` then blocks for the rest.
//!
//! Writes also block while no data handler is registered, so nothing is
//! delivered into the void.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::error::BridgeError;
use crate::flow::{FlowState, Grant};
use crate::monitor::Monitor;
use crate::stream::{
    report, Channel, DataHandler, ExceptionHandler, ReadStream, VoidHandler,
};

struct State {
    flow: FlowState,
    data: Option<DataHandler>,
    end: Option<VoidHandler>,
    exception: Option<ExceptionHandler>,
}

type Shared = Arc<Monitor<State>>;

/// Create a connected writer/source pair. The source starts flowing.
pub fn channel() -> (DemandWriter, DemandSource) {
    let shared = Arc::new(Monitor::new(State {
        flow: FlowState::Flowing,
        data: None,
        end: None,
        exception: None,
    }));
    (
        DemandWriter {
            shared: Arc::clone(&shared),
        },
        DemandSource { shared },
    )
}

/// Blocking write side of a demand bridge.
pub struct DemandWriter {
    shared: Shared,
}

/// Push side of a demand bridge.
pub struct DemandSource {
    shared: Shared,
}

/// Mark the bridge closed and fire the end handler the first time.
fn close_shared(shared: &Monitor<State>) {
    let mut state = shared.lock();
    if !state.flow.close() {
        return;
    }
    let end = state.end.clone();
    drop(state);

    debug!("demand bridge closed");
    shared.notify_all();
    if let Some(end) = end {
        end();
    }
}

impl DemandWriter {
    /// Wake a blocked writer without changing any state.
    pub fn interrupt(&self) {
        self.shared.notify_all();
    }

    fn write_from(&self, src: &[u8]) -> io::Result<usize> {
        if src.is_empty() {
            return Ok(0);
        }

        let mut state = self.shared.lock();
        loop {
            if state.flow.is_closed() {
                let handler = state.exception.clone();
                drop(state);
                let err = BridgeError::Closed;
                report(handler, &err);
                return Err(err.into());
            }

            let Some(handler) = state.data.clone() else {
                state = self.shared.wait(state);
                continue;
            };

            match state.flow.grant(src.len()) {
                Grant::Deliver(n) => {
                    let remaining = match state.flow {
                        FlowState::Paused { demand } => Some(demand),
                        _ => None,
                    };
                    drop(state);

                    trace!(bytes = n, requested = src.len(), demand = ?remaining, "delivering chunk");
                    handler(Bytes::copy_from_slice(&src[..n]));
                    return Ok(n);
                }
                Grant::Wait => state = self.shared.wait(state),
                // Checked above; unreachable while the lock is held.
                Grant::Closed => continue,
            }
        }
    }
}

impl Channel for DemandWriter {
    fn is_open(&self) -> bool {
        !self.shared.lock().flow.is_closed()
    }

    fn close(&self) {
        close_shared(&self.shared);
    }
}

impl io::Write for DemandWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_from(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Write for &DemandWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_from(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for DemandWriter {
    fn drop(&mut self) {
        close_shared(&self.shared);
    }
}

impl DemandSource {
    /// Snapshot of the current flow state.
    pub fn flow_state(&self) -> FlowState {
        self.shared.lock().flow
    }

    pub fn is_closed(&self) -> bool {
        self.flow_state().is_closed()
    }

    fn update(&self, f: impl FnOnce(&mut FlowState)) {
        let mut state = self.shared.lock();
        f(&mut state.flow);
        let flow = state.flow;
        drop(state);

        trace!(flow = ?flow, "demand bridge flow updated");
        self.shared.notify_all();
    }
}

impl ReadStream for DemandSource {
    fn set_data_handler(&self, handler: DataHandler) {
        self.shared.lock().data = Some(handler);
        self.shared.notify_all();
    }

    fn set_end_handler(&self, handler: VoidHandler) {
        self.shared.lock().end = Some(handler);
    }

    fn set_exception_handler(&self, handler: ExceptionHandler) {
        self.shared.lock().exception = Some(handler);
    }

    fn pause(&self) {
        self.update(FlowState::pause);
    }

    fn resume(&self) {
        self.update(FlowState::resume);
    }

    fn fetch(&self, amount: usize) {
        self.update(|flow| flow.fetch(amount));
    }

    fn close(&self) {
        close_shared(&self.shared);
    }
}

impl Drop for DemandSource {
    fn drop(&mut self) {
        close_shared(&self.shared);
    }
}
