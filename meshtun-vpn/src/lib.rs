//! # meshtun-vpn
//!
//! Engines terminating traffic captured by a virtual network interface.
//!
//! The local OS talks plain TCP/UDP to the tunnel; these engines answer as
//! if they were the remote host, hand payloads to an upper layer, and frame
//! whatever the upper layer writes back as IPv4 packets for the tunnel.
//!
//! ```text
//!   tunnel fd ──► input(IPv4 frame)
//!                    │
//!        ┌───────────┴───────────┐
//!        ▼                       ▼
//!   TcpProcessor             UdpProcessor
//!   (TCB per flow,           (UCB per flow,
//!    handshake, ACKs,         DNS rewrite,
//!    delayed ACK, close)      idle eviction)
//!        │                       │
//!        └───────────┬───────────┘
//!                    ▼
//!   Upstream: created / connected / read / destroyed / closed
//!
//!   write(backward buffer) ──► [IPv4][TCP|UDP][payload] ──► Downstream
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use meshtun::{StackConfig, StackContext, TcpConfig};
//! use meshtun_vpn::TcpProcessor;
//!
//! let ctx = StackContext::new(StackConfig::default());
//! let _timer = ctx.start_timer()?;
//! let tcp = TcpProcessor::new(ctx, TcpConfig::default(), tunnel, app)?;
//! tcp.input(frame)?;
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

mod packet;
mod tcb;
mod tcp;
mod ucb;
mod udp;

pub use packet::{inbound_dns, outbound_dns};
pub use tcb::{Tcb, TcbFlags, TcbState};
pub use tcp::TcpProcessor;
pub use ucb::Ucb;
pub use udp::UdpProcessor;
