//! # meshtun-rudp
//!
//! Reliable UDP between mesh nodes.
//!
//! Each flow is a byte stream addressed by (node uid, port) on both ends.
//! A 16-byte header carries TCP-like flags, a window and 32-bit seq/ack
//! numbers; reliability comes from a retransmission timer with a fixed base
//! RTO and exponential backoff, duplicate-ACK fast retransmit, and extended
//! ACKs (EACK) that let the sender skip what already arrived out of order.
//!
//! ```text
//!   node A                                              node B
//!   connect(B:port) ── SYN(1) ─────────────────────────► created + connected
//!   write ──────────── ACK(2, data) ───────────────────► read
//!                      ACK(4382, data)  ╳ lost
//!                      ACK(5842, data) ────────────────► buffered
//!                   ◄─ ACK|EAK(ack 2922, [5842..7302]) ─
//!   RTO / 3 dup ACKs ─ ACK(4382, data) ────────────────► read 4382.., 5842..
//!   close ──────────── FIN ────────────────────────────► CloseWait ─► LastAck
//!                   ◄─ FIN ─────────────────────────────
//!                      ACK ────────────────────────────► closed(false)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use meshtun::{Endpoint, RudpConfig, StackConfig, StackContext};
//! use meshtun_rudp::RudpProcessor;
//!
//! let ctx = StackContext::new(StackConfig::default());
//! let _timer = ctx.start_timer()?;
//! let rudp = RudpProcessor::new(ctx, my_uid, RudpConfig::default(), mesh_link, app)?;
//! let flow = rudp.connect(Endpoint::mesh(peer_uid, 7000), |flow| println!("{:?}", flow))?;
//! rudp.write(&flow.key, NetBuffer::backward_with_payload(b"hello"))?;
//! ```

// Tracing macros - no-op when feature disabled
#[cfg(feature = "tracing")]
macro_rules! trace_debug { ($($arg:tt)*) => { tracing::debug!($($arg)*) } }
#[cfg(not(feature = "tracing"))]
macro_rules! trace_debug { ($($arg:tt)*) => {} }

#[cfg(feature = "tracing")]
macro_rules! trace_warn { ($($arg:tt)*) => { tracing::warn!($($arg)*) } }
#[cfg(not(feature = "tracing"))]
macro_rules! trace_warn { ($($arg:tt)*) => {} }

#[cfg(feature = "tracing")]
macro_rules! trace_error { ($($arg:tt)*) => { tracing::error!($($arg)*) } }
#[cfg(not(feature = "tracing"))]
macro_rules! trace_error { ($($arg:tt)*) => {} }

mod processor;
mod rucb;
mod timer;
mod window;

pub use processor::RudpProcessor;
pub use rucb::{Rucb, RucbFlags, RucbState};
pub use timer::{RetransmitTimer, TimerActions};
pub use window::{EackScoreboard, Reassembly, ReorderWindow};
