//! Flow table: LRU registry of keys plus an arena of lockable control blocks.
//!
//! ```text
//!   FlowKey ──► FlowRegistry<FlowKey, FlowId> ──► arena[FlowId] ──► Arc<Mutex<T>>
//!                   (LRU order, capacity)            (slot owns the id lease)
//! ```
//!
//! The registry and timers address flows by [`FlowId`] handles; the control
//! block itself sits behind its own lock. Lock order is always
//! flow lock, then table lock. The table lock is never held while a flow lock
//! is being acquired, so evicted and snapshotted flows are handed back to
//! the caller to lock afterwards.
//!
//! Whoever gets `true` from [`FlowTable::remove_flow`] (or receives a flow in
//! an eviction list or a drain) owns the teardown of that flow and is the
//! only one that fires its `destroyed`/`closed` notifications.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::error::Result;
use crate::flow::{FlowId, FlowInfo, FlowKey};
use crate::ids::{IdLease, IdPool};
use crate::registry::FlowRegistry;

/// Shared handle to one control block.
pub struct FlowRef<T> {
    info: FlowInfo,
    cb: Arc<Mutex<T>>,
}

impl<T> Clone for FlowRef<T> {
    fn clone(&self) -> Self {
        Self {
            info: self.info,
            cb: Arc::clone(&self.cb),
        }
    }
}

impl<T> FlowRef<T> {
    #[inline]
    pub fn info(&self) -> &FlowInfo {
        &self.info
    }

    #[inline]
    pub fn id(&self) -> FlowId {
        self.info.id
    }

    #[inline]
    pub fn key(&self) -> &FlowKey {
        &self.info.key
    }

    /// Take the per-flow lock.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.cb.lock()
    }
}

struct Slot<T> {
    cb: Arc<Mutex<T>>,
    _lease: IdLease,
}

struct Inner<T> {
    registry: FlowRegistry<FlowKey, FlowId>,
    arena: HashMap<FlowId, Slot<T>>,
}

/// Result of [`FlowTable::insert`].
pub struct Insertion<T> {
    pub flow: FlowRef<T>,
    /// False when the key was already present and `flow` is the live entry
    pub created: bool,
    /// Flows pushed out by capacity pressure, least-recently-used first
    pub evicted: Vec<FlowRef<T>>,
}

pub struct FlowTable<T> {
    inner: Mutex<Inner<T>>,
    evicted: Arc<Mutex<Vec<(FlowKey, FlowId)>>>,
    ids: Arc<IdPool>,
}

impl<T> FlowTable<T> {
    pub fn new(capacity: usize, ids: Arc<IdPool>) -> Result<Self> {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let mut registry = FlowRegistry::new(capacity)?;
        let sink = Arc::clone(&evicted);
        registry.attach_cleanup(move |key, id| sink.lock().push((key, id)));
        Ok(Self {
            inner: Mutex::new(Inner {
                registry,
                arena: HashMap::new(),
            }),
            evicted,
            ids,
        })
    }

    /// Insert a control block for `key`, built by `make` once an id is leased.
    ///
    /// An existing entry for `key` is returned untouched (and promoted).
    pub fn insert(&self, key: FlowKey, make: impl FnOnce(FlowInfo) -> T) -> Result<Insertion<T>> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if let Some(&id) = inner.registry.find(&key) {
            if let Some(slot) = inner.arena.get(&id) {
                return Ok(Insertion {
                    flow: FlowRef {
                        info: FlowInfo { id, key },
                        cb: Arc::clone(&slot.cb),
                    },
                    created: false,
                    evicted: Vec::new(),
                });
            }
        }

        let lease = self.ids.acquire()?;
        let info = FlowInfo {
            id: lease.id(),
            key,
        };
        let cb = Arc::new(Mutex::new(make(info)));
        inner.arena.insert(
            info.id,
            Slot {
                cb: Arc::clone(&cb),
                _lease: lease,
            },
        );
        inner.registry.put(key, info.id);

        let evicted: Vec<(FlowKey, FlowId)> = std::mem::take(&mut *self.evicted.lock());
        let evicted = evicted
            .into_iter()
            .filter_map(|(key, id)| {
                inner.arena.remove(&id).map(|slot| FlowRef {
                    info: FlowInfo { id, key },
                    cb: slot.cb,
                })
            })
            .collect();

        Ok(Insertion {
            flow: FlowRef { info, cb },
            created: true,
            evicted,
        })
    }

    /// Look up `key`, promoting it to most-recently-used.
    pub fn find(&self, key: &FlowKey) -> Option<FlowRef<T>> {
        let mut inner = self.inner.lock();
        let id = *inner.registry.find(key)?;
        inner.arena.get(&id).map(|slot| FlowRef {
            info: FlowInfo { id, key: *key },
            cb: Arc::clone(&slot.cb),
        })
    }

    pub fn contains(&self, key: &FlowKey) -> bool {
        self.inner.lock().registry.exists(key)
    }

    /// Unregister `key`. The caller owns the teardown of the returned flow.
    pub fn remove(&self, key: &FlowKey) -> Option<FlowRef<T>> {
        let mut inner = self.inner.lock();
        let id = inner.registry.take(key)?;
        inner.arena.remove(&id).map(|slot| FlowRef {
            info: FlowInfo { id, key: *key },
            cb: slot.cb,
        })
    }

    /// Unregister `flow` only if it is still the live entry for its key.
    pub fn remove_flow(&self, flow: &FlowInfo) -> bool {
        let mut inner = self.inner.lock();
        if inner.registry.peek(&flow.key) != Some(&flow.id) {
            return false;
        }
        inner.registry.remove(&flow.key);
        inner.arena.remove(&flow.id).is_some()
    }

    /// Handles of every live flow, most-recently-used first.
    pub fn snapshot(&self) -> Vec<FlowRef<T>> {
        let inner = self.inner.lock();
        inner
            .registry
            .iter()
            .filter_map(|(key, id)| {
                inner.arena.get(id).map(|slot| FlowRef {
                    info: FlowInfo { id: *id, key: *key },
                    cb: Arc::clone(&slot.cb),
                })
            })
            .collect()
    }

    /// Unregister every flow, least-recently-used first.
    pub fn drain(&self) -> Vec<FlowRef<T>> {
        let mut inner = self.inner.lock();
        let entries = inner.registry.drain();
        entries
            .into_iter()
            .filter_map(|(key, id)| {
                inner.arena.remove(&id).map(|slot| FlowRef {
                    info: FlowInfo { id, key },
                    cb: slot.cb,
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().registry.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{Endpoint, Protocol};
    use std::net::Ipv4Addr;

    fn key(port: u16) -> FlowKey {
        FlowKey::new(
            Endpoint::ipv4(Ipv4Addr::new(10, 0, 0, 1), port, Protocol::Tcp),
            Endpoint::ipv4(Ipv4Addr::new(1, 1, 1, 1), 443, Protocol::Tcp),
        )
    }

    #[test]
    fn test_insert_and_find() {
        let table: FlowTable<u32> = FlowTable::new(4, IdPool::new()).unwrap();
        let ins = table.insert(key(1), |_| 7).unwrap();
        assert!(ins.created);
        assert!(ins.evicted.is_empty());

        let found = table.find(&key(1)).unwrap();
        assert_eq!(found.id(), ins.flow.id());
        *found.lock() += 1;
        assert_eq!(*ins.flow.lock(), 8, "handles share one control block");
    }

    #[test]
    fn test_insert_existing_returns_live_entry() {
        let table: FlowTable<u32> = FlowTable::new(4, IdPool::new()).unwrap();
        let first = table.insert(key(1), |_| 1).unwrap();
        let second = table.insert(key(1), |_| 2).unwrap();
        assert!(!second.created);
        assert_eq!(second.flow.id(), first.flow.id());
        assert_eq!(*second.flow.lock(), 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_capacity_eviction_hands_back_flow_and_releases_id() {
        let ids = IdPool::new();
        let table: FlowTable<u16> = FlowTable::new(2, ids.clone()).unwrap();
        let a = table.insert(key(1), |_| 1).unwrap().flow;
        table.insert(key(2), |_| 2).unwrap();
        let ins = table.insert(key(3), |_| 3).unwrap();

        assert_eq!(ins.evicted.len(), 1);
        assert_eq!(ins.evicted[0].id(), a.id());
        assert!(!table.contains(&key(1)));
        assert_eq!(ids.live(), 2);
    }

    #[test]
    fn test_remove_flow_is_exactly_once() {
        let table: FlowTable<u8> = FlowTable::new(4, IdPool::new()).unwrap();
        let flow = table.insert(key(1), |_| 0).unwrap().flow;
        assert!(table.remove_flow(flow.info()));
        assert!(!table.remove_flow(flow.info()));
        assert!(table.remove(&key(1)).is_none());
    }

    #[test]
    fn test_stale_handle_cannot_remove_successor() {
        let table: FlowTable<u8> = FlowTable::new(4, IdPool::new()).unwrap();
        let old = table.insert(key(1), |_| 0).unwrap().flow;
        assert!(table.remove(&key(1)).is_some());
        let new = table.insert(key(1), |_| 1).unwrap().flow;

        if old.id() != new.id() {
            assert!(!table.remove_flow(old.info()));
        }
        assert!(table.contains(&key(1)));
    }

    #[test]
    fn test_drain_empties_table() {
        let ids = IdPool::new();
        let table: FlowTable<u8> = FlowTable::new(8, ids.clone()).unwrap();
        for port in 1..=5 {
            table.insert(key(port), |_| 0).unwrap();
        }
        let drained = table.drain();
        assert_eq!(drained.len(), 5);
        assert_eq!(drained[0].key(), &key(1));
        assert!(table.is_empty());
        assert_eq!(ids.live(), 0);
    }
}
