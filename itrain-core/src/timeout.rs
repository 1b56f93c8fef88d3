//! Per-connection timer slots.
//!
//! Every connection owns a [`TimeoutRegistry`] with a fixed set of
//! independent slots. The reactor sweeps all registries once per tick and
//! hands each fired slot to the dialect's `on_timeout` handler.
//!
//! Deadlines use the monotonic clock, so wall-clock jumps neither fire nor
//! starve a timer.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

/// Number of slots each connection carries.
pub const TIMER_SLOTS: usize = 4;

/// Identifies one timer slot.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerSlot {
    /// Send a heartbeat request to the peer.
    SendHeartbeat = 0,
    /// Peer liveness; reset by every valid frame received.
    RecvHeartbeat = 1,
    Reserved2 = 2,
    Reserved3 = 3,
}

impl TimerSlot {
    pub const ALL: [TimerSlot; TIMER_SLOTS] = [
        TimerSlot::SendHeartbeat,
        TimerSlot::RecvHeartbeat,
        TimerSlot::Reserved2,
        TimerSlot::Reserved3,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for TimerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerSlot::SendHeartbeat => write!(f, "send-heartbeat"),
            TimerSlot::RecvHeartbeat => write!(f, "recv-heartbeat"),
            TimerSlot::Reserved2 => write!(f, "reserved-2"),
            TimerSlot::Reserved3 => write!(f, "reserved-3"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    enabled: bool,
    interval: Duration,
    expiry: Instant,
}

/// Fixed array of timer slots.
#[derive(Debug, Clone)]
pub struct TimeoutRegistry {
    slots: [Timer; TIMER_SLOTS],
}

impl TimeoutRegistry {
    /// All slots disabled.
    pub fn new(now: Instant) -> Self {
        Self {
            slots: [Timer {
                enabled: false,
                interval: Duration::ZERO,
                expiry: now,
            }; TIMER_SLOTS],
        }
    }

    /// Enable `slot`, first firing at `now + interval`.
    ///
    /// A zero interval makes the slot one-shot: it fires on the next sweep
    /// and disables itself.
    pub fn arm(&mut self, slot: TimerSlot, interval: Duration, now: Instant) {
        self.slots[slot.index()] = Timer {
            enabled: true,
            interval,
            expiry: now + interval,
        };
    }

    pub fn disarm(&mut self, slot: TimerSlot) {
        self.slots[slot.index()].enabled = false;
    }

    /// Push the deadline of an armed slot out to `now + interval`.
    pub fn reset(&mut self, slot: TimerSlot, now: Instant) {
        let timer = &mut self.slots[slot.index()];
        if timer.enabled {
            timer.expiry = now + timer.interval;
        }
    }

    pub fn is_armed(&self, slot: TimerSlot) -> bool {
        self.slots[slot.index()].enabled
    }

    /// Deadline of an armed slot.
    pub fn expiry(&self, slot: TimerSlot) -> Option<Instant> {
        let timer = &self.slots[slot.index()];
        timer.enabled.then_some(timer.expiry)
    }

    /// Collect the slots whose deadline has passed, in slot order.
    ///
    /// Periodic slots are re-armed with catch-up semantics: the expiry
    /// advances by whole intervals until it lies in the future, so a late
    /// sweep fires a slot once rather than once per missed interval, and
    /// the phase never drifts.
    pub fn sweep(&mut self, now: Instant) -> Vec<TimerSlot> {
        let mut fired = Vec::new();
        for slot in TimerSlot::ALL {
            let timer = &mut self.slots[slot.index()];
            if !timer.enabled || timer.expiry > now {
                continue;
            }
            if timer.interval.is_zero() {
                timer.enabled = false;
            } else {
                while timer.expiry <= now {
                    timer.expiry += timer.interval;
                }
            }
            fired.push(slot);
        }
        fired
    }
}
