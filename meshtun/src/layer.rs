//! Seams between an engine and its neighbours.
//!
//! ```text
//!          Upstream (application / mesh layer)
//!               ▲ created, connected, read, destroyed, closed
//!               │
//!            engine ── FlowTable ── control blocks
//!               │
//!               ▼ send_packet(dst, framed buffer)
//!          Downstream (virtual interface / mesh socket)
//! ```
//!
//! Both sides are trait objects handed to the engine at construction.
//! Packets go down while the flow lock is held (fire-and-forget); upward
//! notifications are queued in an [`EventQueue`] and dispatched once the lock
//! is released, so an upper layer may call straight back into the engine.

use meshtun_codec::NetBuffer;

use crate::flow::{Endpoint, FlowInfo};

/// Lower layer that puts framed packets on the wire.
pub trait Downstream: Send + Sync {
    /// Hand off one fully framed packet. Never blocks, never fails back.
    fn send_packet(&self, dst: &Endpoint, packet: NetBuffer);
}

/// Upper layer receiving payloads and lifecycle notifications.
pub trait Upstream: Send + Sync {
    fn on_created(&self, _flow: &FlowInfo) {}

    fn on_connected(&self, _flow: &FlowInfo) {}

    /// In-order payload; the buffer's read position is at the payload start.
    fn on_read(&self, flow: &FlowInfo, payload: NetBuffer);

    fn on_destroyed(&self, _flow: &FlowInfo) {}

    /// `force` is false for a graceful close and true for resets and evictions.
    fn on_closed(&self, _flow: &FlowInfo, _force: bool) {}
}

#[derive(Debug)]
pub enum FlowEvent {
    Created,
    Connected,
    Read(NetBuffer),
    Destroyed,
    Closed { force: bool },
}

/// Notifications collected under a flow lock, dispatched after it.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Vec<(FlowInfo, FlowEvent)>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, flow: FlowInfo, event: FlowEvent) {
        self.events.push((flow, event));
    }

    pub fn created(&mut self, flow: &FlowInfo) {
        self.push(*flow, FlowEvent::Created);
    }

    pub fn connected(&mut self, flow: &FlowInfo) {
        self.push(*flow, FlowEvent::Connected);
    }

    pub fn read(&mut self, flow: &FlowInfo, payload: NetBuffer) {
        self.push(*flow, FlowEvent::Read(payload));
    }

    /// The terminal pair every torn-down flow gets exactly once.
    pub fn destroyed(&mut self, flow: &FlowInfo, force: bool) {
        self.push(*flow, FlowEvent::Destroyed);
        self.push(*flow, FlowEvent::Closed { force });
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn append(&mut self, other: &mut EventQueue) {
        self.events.append(&mut other.events);
    }

    pub fn dispatch(self, upstream: &dyn Upstream) {
        for (flow, event) in self.events {
            match event {
                FlowEvent::Created => upstream.on_created(&flow),
                FlowEvent::Connected => upstream.on_connected(&flow),
                FlowEvent::Read(payload) => upstream.on_read(&flow, payload),
                FlowEvent::Destroyed => upstream.on_destroyed(&flow),
                FlowEvent::Closed { force } => upstream.on_closed(&flow, force),
            }
        }
    }
}
