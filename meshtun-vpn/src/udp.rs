//! UDP engine for the tunnel endpoint.
//!
//! UDP has no handshake, so the first datagram of a flow creates its UCB and
//! reports it created and connected at once. Flows end by explicit close,
//! LRU pressure (graceful) or the idle sweep (forced).

use std::sync::Arc;

use parking_lot::Mutex;

use meshtun::{
    Downstream, EventQueue, FlowKey, FlowRef, FlowTable, Result, StackContext, StackError, TaskId, UdpConfig,
    Upstream,
};
use meshtun_codec::NetBuffer;

use crate::packet::{frame_udp, parse_udp};
use crate::ucb::Ucb;

pub struct UdpProcessor {
    ctx: Arc<StackContext>,
    config: UdpConfig,
    table: FlowTable<Ucb>,
    downstream: Arc<dyn Downstream>,
    upstream: Arc<dyn Upstream>,
    sweep_task: Mutex<Option<TaskId>>,
}

impl UdpProcessor {
    pub fn new(
        ctx: Arc<StackContext>,
        config: UdpConfig,
        downstream: Arc<dyn Downstream>,
        upstream: Arc<dyn Upstream>,
    ) -> Result<Arc<Self>> {
        let table = FlowTable::new(config.capacity, Arc::clone(ctx.ids()))?;
        let processor = Arc::new(Self {
            ctx,
            config,
            table,
            downstream,
            upstream,
            sweep_task: Mutex::new(None),
        });
        let sweep = processor
            .ctx
            .timer()
            .schedule_for(processor.config.idle.sweep_interval(), &processor, |p: &UdpProcessor| {
                p.sweep()
            })?;
        *processor.sweep_task.lock() = Some(sweep);
        Ok(processor)
    }

    pub fn config(&self) -> &UdpConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn contains(&self, key: &FlowKey) -> bool {
        self.table.contains(key)
    }

    /// Process one IPv4 frame read from the tunnel and deliver its payload.
    pub fn input(&self, frame: NetBuffer) -> Result<()> {
        let Some(datagram) = parse_udp(&frame, &self.config.dns) else {
            return Ok(());
        };
        let mut events = EventQueue::new();
        let flow = match self.table.find(&datagram.key) {
            Some(flow) => flow,
            None => {
                let insertion = self.table.insert(datagram.key, Ucb::new)?;
                if insertion.created {
                    trace_debug!("new UDP flow {} as {}", datagram.key, insertion.flow.id());
                    events.created(insertion.flow.info());
                    events.connected(insertion.flow.info());
                }
                self.teardown(insertion.evicted, &mut events, false);
                insertion.flow
            }
        };
        flow.lock().idle_ticks = 0;
        events.read(flow.info(), datagram.payload);
        events.dispatch(&*self.upstream);
        Ok(())
    }

    /// Frame `buf` as a datagram from `key.dst` back to `key.src`.
    ///
    /// `buf` must be in backward mode. Writing does not require a live flow:
    /// late answers to an evicted flow are still delivered.
    pub fn write(&self, key: &FlowKey, buf: NetBuffer) -> Result<()> {
        if !buf.is_backward() {
            return Err(StackError::backward_required());
        }
        let packet = frame_udp(buf, key, &self.config.dns)?;
        if let Some(flow) = self.table.find(key) {
            flow.lock().idle_ticks = 0;
        }
        self.downstream.send_packet(&key.src, packet);
        Ok(())
    }

    /// Remove the flow under `key`. Closing an unknown flow is a no-op.
    pub fn close(&self, key: &FlowKey, force: bool) {
        let Some(flow) = self.table.remove(key) else {
            return;
        };
        let mut events = EventQueue::new();
        events.destroyed(flow.info(), force);
        events.dispatch(&*self.upstream);
    }

    /// Idle sweep: flows silent for the idle budget are closed forcibly.
    pub fn sweep(&self) {
        let expire = self.config.idle.expire_ticks();
        let mut events = EventQueue::new();
        for flow in self.table.snapshot() {
            let expired = {
                let mut ucb = flow.lock();
                ucb.idle_ticks += 1;
                ucb.idle_ticks >= expire
            };
            if expired && self.table.remove_flow(flow.info()) {
                trace_debug!("UDP flow {} expired", flow.key());
                events.destroyed(flow.info(), true);
            }
        }
        events.dispatch(&*self.upstream);
    }

    pub fn shutdown(&self) {
        if let Some(task) = self.sweep_task.lock().take() {
            self.ctx.timer().cancel(task);
        }
        self.clear();
    }

    /// Remove every flow, reporting each one closed forcibly.
    pub fn clear(&self) {
        let mut events = EventQueue::new();
        let drained = self.table.drain();
        self.teardown(drained, &mut events, true);
        events.dispatch(&*self.upstream);
    }

    fn teardown(&self, flows: Vec<FlowRef<Ucb>>, events: &mut EventQueue, force: bool) {
        for flow in flows {
            events.destroyed(flow.info(), force);
        }
    }
}

impl Drop for UdpProcessor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
