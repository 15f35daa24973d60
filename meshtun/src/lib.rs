//! # meshtun
//!
//! Shared plumbing for the meshtun transport engines.
//!
//! ```text
//!   meshtun-vpn (TCP / UDP)     meshtun-rudp (mesh reliable UDP)
//!            │                          │
//!            └────────────┬─────────────┘
//!                         ▼
//!   meshtun: StackContext ── TimerService ── IdPool ── PortAllocator
//!            FlowTable ── FlowRegistry (LRU) ── SendBuffer ── seq math
//!            Upstream / Downstream traits
//!                         │
//!                         ▼
//!                  meshtun-codec (NetBuffer, headers)
//! ```
//!
//! ## Flow registry
//!
//! ```rust
//! use meshtun::FlowRegistry;
//!
//! let mut reg = FlowRegistry::new(2).unwrap();
//! reg.attach_cleanup(|key: u32, _value: &str| println!("evicted {}", key));
//! reg.put(1, "a");
//! reg.put(2, "b");
//! reg.put(3, "c"); // evicts 1
//! assert!(!reg.exists(&1));
//! ```

// Tracing macros - no-op when feature disabled
#[cfg(feature = "tracing")]
macro_rules! trace_debug { ($($arg:tt)*) => { tracing::debug!($($arg)*) } }
#[cfg(not(feature = "tracing"))]
macro_rules! trace_debug { ($($arg:tt)*) => {} }

pub mod config;
pub mod context;
pub mod error;
pub mod flow;
pub mod ids;
pub mod layer;
pub mod registry;
pub mod send_buffer;
pub mod seq;
pub mod table;
pub mod timer;

pub use config::{DnsTunnelConfig, IdleConfig, RudpConfig, SpuriousPolicy, StackConfig, TcpConfig, UdpConfig};
pub use context::StackContext;
pub use error::{Result, StackError};
pub use flow::{Address, Endpoint, FlowId, FlowInfo, FlowKey, Protocol};
pub use ids::{IdLease, IdPool, PortAllocator, PortGuard};
pub use layer::{Downstream, EventQueue, FlowEvent, Upstream};
pub use registry::FlowRegistry;
pub use send_buffer::SendBuffer;
pub use table::{FlowRef, FlowTable, Insertion};
pub use timer::{TaskId, TimerService, TimerThread};
