//! # meshtun-test-support
//!
//! Shared fixtures for the engine crates' tests:
//!
//! - [`recorder`]: `Upstream`/`Downstream` doubles that record everything
//! - [`loss`]: deterministic packet-loss patterns
//! - [`link`]: lossy downstreams that queue packets for the test to pump
//! - [`packets`]: builders for client-side frames and parsers for engine output

pub mod link;
pub mod loss;
pub mod packets;
pub mod recorder;

pub use link::{LinkPair, LossyLink};
pub use loss::{DropDecision, LossGenerator, LossPattern};
pub use packets::{parse_rudp, parse_tcp, parse_udp, rudp_packet, tcp_packet, udp_packet, ParsedRudp, ParsedTcp, ParsedUdp};
pub use recorder::{Note, RecordingDownstream, RecordingUpstream};
