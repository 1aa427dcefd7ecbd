//! Flow-control state shared by the bridges.
//!
//! Two policies live here:
//!
//! - [`FlowState`]: demand-credit control for bridges that push data out
//!   (flowing, paused with an outstanding byte demand, or closed).
//! - [`Watermarks`]: level-based control for bridges that accept pushed
//!   data: a high watermark that reports "queue full" and a low watermark
//!   below which the producer's drain handler is invoked.

use serde::{Deserialize, Serialize};

use crate::stream::VoidHandler;

// ── Demand credits ──────────────────────────────────────────────────

/// Delivery state of a push-out bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// Every write is delivered in full.
    Flowing,
    /// At most `demand` more bytes may be delivered.
    Paused { demand: usize },
    /// Terminal. Nothing is delivered any more.
    Closed,
}

/// Outcome of asking a [`FlowState`] for permission to deliver bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Grant {
    /// Deliver this many bytes now.
    Deliver(usize),
    /// Nothing may be delivered until demand arrives.
    Wait,
    Closed,
}

impl FlowState {
    /// Stop unconstrained delivery. Outstanding demand is discarded.
    pub fn pause(&mut self) {
        if !self.is_closed() {
            *self = FlowState::Paused { demand: 0 };
        }
    }

    /// Return to unconstrained delivery.
    pub fn resume(&mut self) {
        if !self.is_closed() {
            *self = FlowState::Flowing;
        }
    }

    /// Grant `amount` more bytes of demand. Ignored unless paused.
    pub fn fetch(&mut self, amount: usize) {
        if let FlowState::Paused { demand } = self {
            *demand = demand.saturating_add(amount);
        }
    }

    /// Transition to `Closed`. Returns `true` only for the first call.
    pub fn close(&mut self) -> bool {
        let was_open = !self.is_closed();
        *self = FlowState::Closed;
        was_open
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, FlowState::Closed)
    }

    /// Reserve up to `wanted` bytes for delivery, consuming demand.
    pub(crate) fn grant(&mut self, wanted: usize) -> Grant {
        match self {
            FlowState::Closed => Grant::Closed,
            FlowState::Flowing => Grant::Deliver(wanted),
            FlowState::Paused { demand: 0 } => Grant::Wait,
            FlowState::Paused { demand } => {
                let n = wanted.min(*demand);
                *demand -= n;
                Grant::Deliver(n)
            }
        }
    }
}

// ── Watermarks ──────────────────────────────────────────────────────

/// Whether a drain handler stays registered after it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainMode {
    /// The handler stays registered and fires on every drain.
    #[default]
    Persistent,
    /// The handler is cleared after firing; the producer must register
    /// it again to hear about the next drain.
    OneShot,
}

/// When the drain handler is eligible to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainTrigger {
    /// Every level update at or below the low watermark fires.
    Level,
    /// Only the first update at or below the low watermark after the
    /// level reached the high watermark fires.
    Edge,
}

/// Where the low watermark sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LowMark {
    /// Drain once the level is at or below this many bytes.
    AtOrBelow(usize),
    /// Drain whenever the queue is not full.
    BelowHigh,
    /// Drain once the level is below half the high watermark.
    BelowHalfHigh,
}

/// Level-based flow control with a drain handler slot.
pub struct Watermarks {
    high: usize,
    low: LowMark,
    trigger: DrainTrigger,
    mode: DrainMode,
    armed: bool,
    drain: Option<VoidHandler>,
}

impl Watermarks {
    pub fn new(high: usize, low: LowMark, trigger: DrainTrigger, mode: DrainMode) -> Self {
        Self {
            high,
            low,
            trigger,
            mode,
            armed: false,
            drain: None,
        }
    }

    pub fn high(&self) -> usize {
        self.high
    }

    pub fn set_high(&mut self, high: usize) {
        self.high = high;
    }

    pub fn is_full(&self, level: usize) -> bool {
        level >= self.high
    }

    pub fn set_drain_handler(&mut self, handler: VoidHandler) {
        self.drain = Some(handler);
    }

    pub fn has_drain_handler(&self) -> bool {
        self.drain.is_some()
    }

    fn drain_eligible(&self, level: usize) -> bool {
        match self.low {
            LowMark::AtOrBelow(low) => level <= low,
            LowMark::BelowHigh => level < self.high,
            LowMark::BelowHalfHigh => level < self.high / 2,
        }
    }

    /// Record a new level. Returns the drain handler if it should fire.
    ///
    /// The handler must be invoked after the caller releases its lock.
    pub fn update(&mut self, level: usize) -> Option<VoidHandler> {
        if self.is_full(level) {
            self.armed = true;
            return None;
        }
        if !self.drain_eligible(level) {
            return None;
        }
        if self.trigger == DrainTrigger::Edge && !self.armed {
            return None;
        }
        self.armed = false;
        self.take_drain()
    }

    /// Fire the drain handler regardless of level, e.g. on close so a
    /// producer parked on backpressure wakes up.
    pub fn force_drain(&mut self) -> Option<VoidHandler> {
        self.armed = false;
        self.take_drain()
    }

    fn take_drain(&mut self) -> Option<VoidHandler> {
        match self.mode {
            DrainMode::Persistent => self.drain.clone(),
            DrainMode::OneShot => self.drain.take(),
        }
    }
}

impl std::fmt::Debug for Watermarks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watermarks")
            .field("high", &self.high)
            .field("low", &self.low)
            .field("trigger", &self.trigger)
            .field("mode", &self.mode)
            .field("armed", &self.armed)
            .field("drain", &self.drain.is_some())
            .finish()
    }
}
