//! Stack context shared by every engine of one stack instance.
//!
//! Holds the timer service, the control-block id pool and the port
//! allocator. Engines take an `Arc<StackContext>` at construction; two
//! contexts are fully independent, which is what lets tests run several
//! stacks side by side in one process.

use std::sync::Arc;

use crate::config::StackConfig;
use crate::ids::{IdPool, PortAllocator};
use crate::timer::{TimerService, TimerThread};

pub struct StackContext {
    config: StackConfig,
    timer: Arc<TimerService>,
    ids: Arc<IdPool>,
    ports: Arc<PortAllocator>,
}

impl StackContext {
    pub fn new(config: StackConfig) -> Arc<Self> {
        let timer = TimerService::new(config.timer_granularity());
        let ports = PortAllocator::new(config.first_port, config.last_port);
        Arc::new(Self {
            config,
            timer,
            ids: IdPool::new(),
            ports,
        })
    }

    #[inline]
    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    #[inline]
    pub fn timer(&self) -> &Arc<TimerService> {
        &self.timer
    }

    #[inline]
    pub fn ids(&self) -> &Arc<IdPool> {
        &self.ids
    }

    #[inline]
    pub fn ports(&self) -> &Arc<PortAllocator> {
        &self.ports
    }

    /// Start ticking the timer service on a background thread.
    pub fn start_timer(&self) -> std::io::Result<TimerThread> {
        trace_debug!(granularity_ms = self.config.timer_granularity_ms, "starting timer thread");
        self.timer.spawn()
    }
}

impl Default for StackContext {
    fn default() -> Self {
        let config = StackConfig::default();
        Self {
            timer: TimerService::new(config.timer_granularity()),
            ids: IdPool::new(),
            ports: PortAllocator::new(config.first_port, config.last_port),
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contexts_are_independent() {
        let a = StackContext::new(StackConfig::default());
        let b = StackContext::new(StackConfig::default());
        let _port = a.ports().acquire().unwrap();
        let _id = a.ids().acquire().unwrap();
        assert_eq!(a.ports().in_use(), 1);
        assert_eq!(b.ports().in_use(), 0);
        assert_eq!(b.ids().live(), 0);
    }

    #[test]
    fn test_granularity_from_config() {
        let ctx = StackContext::new(StackConfig {
            timer_granularity_ms: 20,
            ..StackConfig::default()
        });
        assert_eq!(ctx.timer().granularity().as_millis(), 20);
    }
}
