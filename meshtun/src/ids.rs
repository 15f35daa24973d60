//! Control-block ids and local port assignment.
//!
//! Both resources are handed out as guards: an [`IdLease`] or a
//! [`PortGuard`] returns its value to the pool when dropped, so every exit
//! path of a flow (close, reset, eviction, shutdown) releases it.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;

use crate::error::{Result, StackError};
use crate::flow::FlowId;

/// Pool of control-block ids: random, non-zero, unique among live flows.
#[derive(Debug, Default)]
pub struct IdPool {
    live: Mutex<HashSet<u16>>,
}

impl IdPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Draw an unused id.
    pub fn acquire(self: &Arc<Self>) -> Result<IdLease> {
        let mut live = self.live.lock();
        if live.len() >= u16::MAX as usize {
            return Err(StackError::IdsExhausted);
        }
        // Random start, then probe linearly so a crowded pool stays O(n)
        let mut id: u16 = rand::thread_rng().gen_range(1..=u16::MAX);
        while live.contains(&id) {
            id = if id == u16::MAX { 1 } else { id + 1 };
        }
        live.insert(id);
        Ok(IdLease {
            id: FlowId(id),
            pool: Arc::clone(self),
        })
    }

    /// Number of ids currently leased.
    pub fn live(&self) -> usize {
        self.live.lock().len()
    }

    fn release(&self, id: u16) {
        self.live.lock().remove(&id);
    }
}

/// A leased control-block id; released on drop.
pub struct IdLease {
    id: FlowId,
    pool: Arc<IdPool>,
}

impl IdLease {
    #[inline]
    pub fn id(&self) -> FlowId {
        self.id
    }
}

impl Drop for IdLease {
    fn drop(&mut self) {
        self.pool.release(self.id.0);
    }
}

impl fmt::Debug for IdLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("IdLease").field(&self.id).finish()
    }
}

struct PortBitmap {
    /// One bit per port in `first..=last`
    words: Vec<u64>,
    /// Next port offset to try
    cursor: usize,
    in_use: usize,
}

/// Bitset allocator over a fixed port range.
pub struct PortAllocator {
    first: u16,
    last: u16,
    bitmap: Mutex<PortBitmap>,
}

impl PortAllocator {
    pub fn new(first: u16, last: u16) -> Arc<Self> {
        let (first, last) = if first <= last { (first, last) } else { (last, first) };
        let span = (last - first) as usize + 1;
        Arc::new(Self {
            first,
            last,
            bitmap: Mutex::new(PortBitmap {
                words: vec![0; span.div_ceil(64)],
                cursor: 0,
                in_use: 0,
            }),
        })
    }

    #[inline]
    fn span(&self) -> usize {
        (self.last - self.first) as usize + 1
    }

    /// Lease the next free port, scanning from just past the last one handed out.
    pub fn acquire(self: &Arc<Self>) -> Result<PortGuard> {
        let span = self.span();
        let mut bits = self.bitmap.lock();
        if bits.in_use >= span {
            return Err(StackError::PortsExhausted {
                first: self.first,
                last: self.last,
            });
        }
        let mut offset = bits.cursor;
        loop {
            let (word, bit) = (offset / 64, offset % 64);
            if bits.words[word] & (1 << bit) == 0 {
                bits.words[word] |= 1 << bit;
                bits.in_use += 1;
                bits.cursor = (offset + 1) % span;
                break;
            }
            offset = (offset + 1) % span;
        }
        Ok(PortGuard {
            port: self.first + offset as u16,
            pool: Arc::clone(self),
        })
    }

    pub fn is_in_use(&self, port: u16) -> bool {
        if port < self.first || port > self.last {
            return false;
        }
        let offset = (port - self.first) as usize;
        self.bitmap.lock().words[offset / 64] & (1 << (offset % 64)) != 0
    }

    pub fn in_use(&self) -> usize {
        self.bitmap.lock().in_use
    }

    pub fn available(&self) -> usize {
        self.span() - self.in_use()
    }

    fn release(&self, port: u16) {
        let offset = (port - self.first) as usize;
        let mut bits = self.bitmap.lock();
        let mask = 1 << (offset % 64);
        if bits.words[offset / 64] & mask != 0 {
            bits.words[offset / 64] &= !mask;
            bits.in_use -= 1;
        }
    }
}

/// A leased port; released on drop.
pub struct PortGuard {
    port: u16,
    pool: Arc<PortAllocator>,
}

impl PortGuard {
    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortGuard {
    fn drop(&mut self) {
        self.pool.release(self.port);
    }
}

impl fmt::Debug for PortGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PortGuard").field(&self.port).finish()
    }
}
