//! Engine configuration.
//!
//! Every struct has a `Default` matching the values the engines were tuned
//! with, and derives serde so an embedding application can load overrides
//! from its own config file. Durations are stored as milliseconds.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What to do with a segment whose sequence number is below the next
/// expected one (already received and acknowledged).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpuriousPolicy {
    /// Log and drop.
    Drop,
    /// Drop and answer with a duplicate ACK so the peer resynchronizes.
    ReAck,
}

/// Shared context settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Tick period of the shared timer thread
    pub timer_granularity_ms: u64,
    /// First assignable port for locally initiated mesh flows
    pub first_port: u16,
    /// Last assignable port
    pub last_port: u16,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            timer_granularity_ms: 100,
            // 0..=100 are reserved for well-known mesh services
            first_port: 101,
            last_port: 65534,
        }
    }
}

impl StackConfig {
    pub fn timer_granularity(&self) -> Duration {
        Duration::from_millis(self.timer_granularity_ms)
    }
}

/// Idle sweep settings shared by every engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleConfig {
    /// Flows without traffic for this long are evicted
    pub idle_timeout_ms: u64,
    /// Period of the sweep that counts idle ticks
    pub sweep_interval_ms: u64,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 5 * 60 * 1000,
            sweep_interval_ms: 10 * 1000,
        }
    }
}

impl IdleConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Sweep ticks after which a flow counts as expired.
    pub fn expire_ticks(&self) -> u32 {
        if self.sweep_interval_ms == 0 {
            return 1;
        }
        (self.idle_timeout_ms / self.sweep_interval_ms).max(1) as u32
    }
}

/// Addresses used to tunnel DNS through the virtual interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsTunnelConfig {
    /// Address of the virtual interface itself
    pub vpn_address: Ipv4Addr,
    /// DNS server address the OS is told to use
    pub tunnel_address: Ipv4Addr,
    /// Real resolver queries are forwarded to
    pub server_address: Ipv4Addr,
    pub dns_port: u16,
}

impl Default for DnsTunnelConfig {
    fn default() -> Self {
        Self {
            vpn_address: Ipv4Addr::new(10, 0, 0, 1),
            tunnel_address: Ipv4Addr::new(10, 0, 0, 2),
            server_address: Ipv4Addr::new(8, 8, 8, 8),
            dns_port: 53,
        }
    }
}

/// TCP-emulation engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Receive window advertised to the tunnel client
    pub window: u16,
    pub window_scale: u8,
    pub mss: u16,
    /// Bounded number of live TCBs, LRU evicted beyond it
    pub capacity: usize,
    /// Resend the oldest unacked segment after three duplicate ACKs
    pub fast_retransmit: bool,
    pub dup_ack_threshold: u16,
    pub spurious: SpuriousPolicy,
    pub delayed_ack_ms: u64,
    pub idle: IdleConfig,
    pub dns: DnsTunnelConfig,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            window: 65535,
            window_scale: 0,
            mss: 7960,
            capacity: 4096,
            fast_retransmit: true,
            dup_ack_threshold: 3,
            spurious: SpuriousPolicy::Drop,
            delayed_ack_ms: 100,
            idle: IdleConfig::default(),
            dns: DnsTunnelConfig::default(),
        }
    }
}

/// VPN UDP processor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    pub capacity: usize,
    pub idle: IdleConfig,
    pub dns: DnsTunnelConfig,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            idle: IdleConfig::default(),
            dns: DnsTunnelConfig::default(),
        }
    }
}

/// Mesh reliable-UDP engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RudpConfig {
    pub segment_size: u16,
    pub window: u16,
    pub window_scale: u8,
    /// Base retransmission timeout before backoff
    pub rto_ms: u64,
    /// RTO multiplier per consecutive timeout
    pub backoff: Vec<u32>,
    pub dup_ack_threshold: u16,
    pub spurious: SpuriousPolicy,
    /// Answer out-of-order data with extended ACKs
    pub eack: bool,
    pub max_eack_ranges: usize,
    pub delayed_ack_ms: u64,
    pub capacity: usize,
    pub idle: IdleConfig,
}

impl Default for RudpConfig {
    fn default() -> Self {
        Self {
            segment_size: 1460,
            window: 8000,
            window_scale: 2,
            rto_ms: 600,
            backoff: vec![1, 1, 1, 2, 2, 4, 8, 16, 16, 16, 16, 16, 16],
            dup_ack_threshold: 3,
            spurious: SpuriousPolicy::ReAck,
            eack: true,
            max_eack_ranges: 8,
            delayed_ack_ms: 100,
            capacity: 4096,
            idle: IdleConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_expire_ticks() {
        let idle = IdleConfig::default();
        assert_eq!(idle.expire_ticks(), 30);

        let tight = IdleConfig {
            idle_timeout_ms: 50,
            sweep_interval_ms: 100,
        };
        assert_eq!(tight.expire_ticks(), 1, "never expire before the first sweep");
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg: RudpConfig = serde_json::from_str(r#"{"rto_ms": 250, "spurious": "drop"}"#).unwrap();
        assert_eq!(cfg.rto_ms, 250);
        assert_eq!(cfg.spurious, SpuriousPolicy::Drop);
        assert_eq!(cfg.segment_size, 1460);
        assert_eq!(cfg.backoff.len(), 13);
    }

    #[test]
    fn test_tcp_defaults() {
        let cfg = TcpConfig::default();
        assert_eq!((cfg.window, cfg.window_scale, cfg.mss), (65535, 0, 7960));
        assert!(cfg.fast_retransmit);
        assert_eq!(cfg.dns.tunnel_address, Ipv4Addr::new(10, 0, 0, 2));
    }
}
