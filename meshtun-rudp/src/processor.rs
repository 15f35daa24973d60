//! Reliable-UDP engine for mesh peers.
//!
//! ```text
//!   read(packet, src)
//!     ├─ unknown flow: SYN ──► accept (created + connected)
//!     │                FIN ──► stateless ACK
//!     │                RST, bare ACK ──► ignore
//!     │                data ─► ACK(0,0): "send your SYN again"
//!     └─ known flow (under the flow lock)
//!          SYN ──► ignore          RST ──► teardown
//!          ACK(0,0) ──► resend SYN (initiator) / teardown (acceptor)
//!          EAK ──► record ranges
//!          ACK ──► process_ack ──► process_data
//!
//!   SynSent ─ACK─► Established ─close─► FinWait1 ─ACK(FIN)─► FinWait2 ─FIN─► Closed
//!                      │                    └─FIN─► Closing ─ACK(FIN)─► Closed
//!                      └─FIN─► CloseWait ─(FIN sent)─► LastAck ─ACK(FIN)─► Closed
//! ```
//!
//! Both processors of a flow run the same code; the only asymmetry is that
//! the initiator owns a leased port and can resend its SYN.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;

use meshtun::seq::{seq_cmp, seq_gt, seq_le};
use meshtun::{
    Address, Downstream, Endpoint, EventQueue, FlowInfo, FlowKey, FlowRef, FlowTable, Protocol, Result, RudpConfig,
    SpuriousPolicy, StackContext, StackError, TaskId, Upstream,
};
use meshtun_codec::{
    NetBuffer, RudpHeader, RudpHeaderBuilder, DEFAULT_HEADROOM, RUDP_ACK, RUDP_EAK, RUDP_FIN, RUDP_RST, RUDP_SYN,
};

use crate::rucb::{Rucb, RucbFlags, RucbState, SYN_SEQ};
use crate::timer::TimerActions;
use crate::window::Reassembly;

/// Whether a packet still has data to offer after its ACK was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Done,
}

/// One packet received from a mesh peer.
struct RudpInput {
    key: FlowKey,
    header: RudpHeader,
    /// Positioned at the first payload byte
    payload: NetBuffer,
}

impl RudpInput {
    #[inline]
    fn has(&self, flag: u8) -> bool {
        self.header.has(flag)
    }

    /// Stream bytes carried; EACK payloads hold ranges, not data.
    fn data_len(&self) -> u32 {
        if self.has(RUDP_EAK) {
            0
        } else {
            self.payload.remaining_len() as u32
        }
    }

    /// ACK(seq = 0, ack = 0): the peer has no flow for us.
    fn is_syn_request(&self) -> bool {
        self.header.seq() == 0 && self.header.ack() == 0
    }
}

pub struct RudpProcessor {
    ctx: Arc<StackContext>,
    uid: Uuid,
    config: RudpConfig,
    table: FlowTable<Rucb>,
    downstream: Arc<dyn Downstream>,
    upstream: Arc<dyn Upstream>,
    tasks: Mutex<Vec<TaskId>>,
}

impl RudpProcessor {
    /// Create the engine for the node `uid` and register its timer tick and
    /// idle sweep with the context's timer.
    pub fn new(
        ctx: Arc<StackContext>,
        uid: Uuid,
        config: RudpConfig,
        downstream: Arc<dyn Downstream>,
        upstream: Arc<dyn Upstream>,
    ) -> Result<Arc<Self>> {
        let table = FlowTable::new(config.capacity, Arc::clone(ctx.ids()))?;
        let processor = Arc::new(Self {
            ctx,
            uid,
            config,
            table,
            downstream,
            upstream,
            tasks: Mutex::new(Vec::new()),
        });

        let timer = processor.ctx.timer();
        let tick = timer.schedule_for(
            Duration::from_millis(processor.config.delayed_ack_ms),
            &processor,
            |p: &RudpProcessor| p.tick(),
        )?;
        let sweep = timer.schedule_for(processor.config.idle.sweep_interval(), &processor, |p: &RudpProcessor| {
            p.sweep()
        })?;
        processor.tasks.lock().extend([tick, sweep]);
        Ok(processor)
    }

    /// Mesh uid of this node.
    pub fn uid(&self) -> Uuid {
        self.uid
    }

    pub fn config(&self) -> &RudpConfig {
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

    /// Run `f` on the live RUCB under `key`, holding its lock.
    pub fn inspect<R>(&self, key: &FlowKey, f: impl FnOnce(&Rucb) -> R) -> Option<R> {
        self.table.find(key).map(|flow| f(&*flow.lock()))
    }

    pub fn state(&self, key: &FlowKey) -> Option<RucbState> {
        self.inspect(key, Rucb::state)
    }

    /// Open a flow to `dst`, which must be a mesh RUDP endpoint.
    ///
    /// The SYN is sent without waiting for an answer: the flow is writable
    /// as soon as this returns. `callback` receives the new flow, or `None`
    /// when opening failed; the same outcome is returned.
    pub fn connect(&self, dst: Endpoint, callback: impl FnOnce(Option<&FlowInfo>)) -> Result<FlowInfo> {
        let result = self.open(dst);
        callback(result.as_ref().ok());
        result
    }

    fn open(&self, dst: Endpoint) -> Result<FlowInfo> {
        if !dst.addr.is_mesh() || dst.protocol != Protocol::MeshRudp {
            trace_error!("RUDP connect to non-mesh endpoint {}", dst);
            return Err(StackError::UnsupportedAddress(dst.to_string()));
        }
        let port = self.ctx.ports().acquire()?;
        let key = FlowKey::new(Endpoint::mesh(self.uid, port.port()), dst);
        let insertion = self
            .table
            .insert(key, |info| Rucb::connect(info, &self.config, port))?;
        if !insertion.created {
            trace_warn!("flow {} already open", key);
            return Err(StackError::invalid_address(format!("{} already in use", key)));
        }

        let mut events = EventQueue::new();
        let flow = insertion.flow;
        let result = {
            let mut rucb = flow.lock();
            match self.emit(&rucb, RUDP_SYN, SYN_SEQ, NetBuffer::backward(DEFAULT_HEADROOM)) {
                Ok(()) => {
                    rucb.seq = SYN_SEQ.wrapping_add(1);
                    rucb.acked = rucb.seq;
                    trace_debug!("connecting {} as {}", flow.key(), flow.id());
                    events.created(flow.info());
                    Ok(*flow.info())
                }
                Err(e) => {
                    rucb.release();
                    self.table.remove_flow(flow.info());
                    Err(e)
                }
            }
        };
        self.teardown_evicted(insertion.evicted, &mut events);
        events.dispatch(&*self.upstream);
        result
    }

    /// Process one packet from the mesh peer `src`, positioned at the RUDP
    /// header. Only the uid of `src` is used; ports come from the header.
    pub fn read(&self, buf: NetBuffer, src: Endpoint) -> Result<()> {
        let Address::Mesh(peer) = src.addr else {
            trace_error!("RUDP packet from non-mesh source {}", src);
            return Err(StackError::UnsupportedAddress(src.to_string()));
        };
        let Some(mut input) = self.parse(buf, peer) else {
            return Ok(());
        };

        let mut events = EventQueue::new();
        let result = match self.table.find(&input.key) {
            Some(flow) => {
                let mut rucb = flow.lock();
                self.process(&mut rucb, &mut input, &mut events)
            }
            None => self.read_unknown(input, &mut events),
        };
        events.dispatch(&*self.upstream);
        result
    }

    /// Queue `buf` for the flow under `key` and send what the window allows.
    ///
    /// `buf` must be in backward mode. Writes to unknown or closing flows
    /// are dropped with a log.
    pub fn write(&self, key: &FlowKey, buf: NetBuffer) -> Result<()> {
        if !buf.is_backward() {
            return Err(StackError::backward_required());
        }
        if buf.remaining_len() == 0 {
            trace_error!("empty write to {}", key);
            return Ok(());
        }
        let Some(flow) = self.table.find(key) else {
            trace_warn!("write to unknown flow {}", key);
            return Ok(());
        };
        let mut rucb = flow.lock();
        if !rucb.is_open() {
            trace_warn!("write to {} in state {:?} dropped", key, rucb.state);
            return Ok(());
        }
        rucb.write.push(buf.remaining().to_vec());
        rucb.idle_ticks = 0;
        if rucb.remain_send_window() > 0 {
            self.flush_data(&mut rucb)?;
        }
        Ok(())
    }

    /// Close the flow under `key`. Closing an unknown flow is a no-op.
    ///
    /// A graceful close sends FIN once everything written has been
    /// acknowledged; `force` resets the flow at once.
    pub fn close(&self, key: &FlowKey, force: bool) -> Result<()> {
        let Some(flow) = self.table.find(key) else {
            return Ok(());
        };
        let mut events = EventQueue::new();
        let result = {
            let mut rucb = flow.lock();
            self.close_impl(&mut rucb, &mut events, force)
        };
        events.dispatch(&*self.upstream);
        result
    }

    /// Timer tick: send owed delayed ACKs and retransmit on RTO expiry.
    pub fn tick(&self) {
        for flow in self.table.snapshot() {
            let mut rucb = flow.lock();
            if rucb.state == RucbState::Closed {
                continue;
            }
            let actions = rucb.tick_timers(&self.config);
            if actions.contains(TimerActions::ACK_NOW) {
                if let Err(_e) = self.ack_and_flush(&mut rucb) {
                    trace_error!("delayed ACK for {} failed: {}", flow.key(), _e);
                }
            }
            if actions.contains(TimerActions::RETRANSMIT) {
                trace_debug!(
                    "RTO on {} (shift {}), resending from {}",
                    flow.key(),
                    rucb.rexmt.shift(),
                    rucb.acked
                );
                if let Err(_e) = self.retransmit_all(&mut rucb) {
                    trace_error!("retransmission for {} failed: {}", flow.key(), _e);
                }
            }
        }
    }

    /// Idle sweep: reset and tear down flows silent for the idle budget.
    pub fn sweep(&self) {
        let expire = self.config.idle.expire_ticks();
        let mut events = EventQueue::new();
        for flow in self.table.snapshot() {
            let mut rucb = flow.lock();
            rucb.idle_ticks += 1;
            if rucb.idle_ticks < expire {
                continue;
            }
            trace_debug!("flow {} idle, resetting", flow.key());
            if rucb.state != RucbState::Closed {
                if let Err(_e) = self.send_control(&rucb, RUDP_RST | RUDP_ACK) {
                    trace_warn!("RST for idle flow {} failed: {}", flow.key(), _e);
                }
            }
            self.finish(&mut rucb, &mut events, true);
        }
        events.dispatch(&*self.upstream);
    }

    /// Stop the timer tasks and tear down every flow.
    pub fn shutdown(&self) {
        let tasks: Vec<TaskId> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            self.ctx.timer().cancel(task);
        }
        self.clear();
    }

    /// Tear down every flow without touching the wire.
    pub fn clear(&self) {
        let mut events = EventQueue::new();
        for flow in self.table.drain() {
            flow.lock().release();
            events.destroyed(flow.info(), true);
        }
        events.dispatch(&*self.upstream);
    }

    fn parse(&self, mut buf: NetBuffer, peer: Uuid) -> Option<RudpInput> {
        let header = match RudpHeader::from_bytes(buf.remaining()) {
            Ok(header) => header,
            Err(_e) => {
                trace_warn!("dropping packet from {}: {}", peer, _e);
                return None;
            }
        };
        let start = buf.read_pos() + RudpHeader::SIZE;
        buf.set_read_pos(start).ok()?;
        let key = FlowKey::new(
            Endpoint::mesh(self.uid, header.dst_port()),
            Endpoint::mesh(peer, header.src_port()),
        );
        let _flags = header.flags;
        trace_debug!(
            "{} flags={:#04x} seq={} ack={} len={} win={}",
            key,
            _flags,
            header.seq(),
            header.ack(),
            buf.remaining_len(),
            header.window()
        );
        Some(RudpInput {
            key,
            header,
            payload: buf,
        })
    }

    fn process(&self, rucb: &mut Rucb, input: &mut RudpInput, events: &mut EventQueue) -> Result<()> {
        if rucb.state == RucbState::Closed {
            return Ok(());
        }
        rucb.idle_ticks = 0;

        if input.has(RUDP_SYN) {
            trace_debug!("duplicate SYN on {}", rucb.info().key);
            return Ok(());
        }
        if input.has(RUDP_RST) {
            trace_debug!("RST from peer on {}", rucb.info().key);
            self.finish(rucb, events, true);
            return Ok(());
        }
        if !input.has(RUDP_ACK) {
            return Ok(());
        }
        if input.is_syn_request() {
            return self.resend_syn(rucb, events);
        }
        if input.has(RUDP_EAK) {
            self.record_eack(rucb, input);
        }
        if self.process_ack(rucb, input, events)? == Step::Continue {
            self.process_data(rucb, input, events)?;
        }
        Ok(())
    }

    /// The peer lost (or never saw) our SYN.
    fn resend_syn(&self, rucb: &mut Rucb, events: &mut EventQueue) -> Result<()> {
        if rucb.port.is_none() || rucb.state > RucbState::Established {
            trace_warn!("peer forgot {}, resetting", rucb.info().key);
            self.finish(rucb, events, true);
            return Ok(());
        }
        trace_debug!("resending SYN on {}", rucb.info().key);
        self.emit(rucb, RUDP_SYN, SYN_SEQ, NetBuffer::backward(DEFAULT_HEADROOM))?;
        rucb.rexmt.backoff(self.config.backoff.len());
        Ok(())
    }

    fn record_eack(&self, rucb: &mut Rucb, input: &RudpInput) {
        match RudpHeader::decode_eak_ranges(input.payload.remaining()) {
            Ok(ranges) => {
                let (acked, seq) = (rucb.acked, rucb.seq);
                rucb.eacked.record(acked, seq, &ranges);
            }
            Err(_e) => {
                trace_warn!("bad EACK on {}: {}", rucb.info().key, _e);
            }
        }
    }

    fn process_ack(&self, rucb: &mut Rucb, input: &RudpInput, events: &mut EventQueue) -> Result<Step> {
        let ack = input.header.ack();
        if seq_gt(ack, rucb.seq) {
            trace_warn!("ACK {} beyond sent {} on {}", ack, rucb.seq, rucb.info().key);
            return Ok(Step::Done);
        }
        rucb.send_window = input.header.window();
        if rucb.state == RucbState::SynSent {
            rucb.state = RucbState::Established;
        }

        let duplicate = input.data_len() == 0 && !input.has(RUDP_FIN) && ack == rucb.acked && rucb.unacked() > 0;
        if duplicate {
            // One fast retransmit per run of duplicates; the RTO covers a lost resend
            rucb.dup_acks = rucb.dup_acks.saturating_add(1);
            if rucb.dup_acks == self.config.dup_ack_threshold {
                trace_debug!("fast retransmit from {} on {}", rucb.acked, rucb.info().key);
                self.retransmit_all(rucb)?;
            }
            return Ok(Step::Continue);
        }
        if seq_gt(ack, rucb.acked) {
            rucb.dup_acks = 0;
        }

        let fin_acked = self.take_acked(rucb, ack);
        match rucb.state {
            RucbState::FinWait1 if fin_acked => {
                rucb.state = RucbState::FinWait2;
                Ok(Step::Continue)
            }
            RucbState::Closing | RucbState::LastAck if fin_acked => {
                self.finish(rucb, events, false);
                Ok(Step::Done)
            }
            _ => Ok(Step::Continue),
        }
    }

    /// Release acknowledged bytes. Returns true when `ack` also covers our FIN.
    fn take_acked(&self, rucb: &mut Rucb, ack: u32) -> bool {
        if !seq_gt(ack, rucb.acked) {
            return false;
        }
        let newly = ack.wrapping_sub(rucb.acked) as usize;
        let excess = rucb.write.drop_front(newly);
        rucb.acked = ack;
        rucb.eacked.prune(ack);
        if rucb.rexmt.is_active() && seq_le(rucb.rexmt.seq(), ack) {
            rucb.rexmt.deactivate();
        }
        excess > 0
    }

    fn process_data(&self, rucb: &mut Rucb, input: &mut RudpInput, events: &mut EventQueue) -> Result<()> {
        let len = input.data_len();
        let fin = input.has(RUDP_FIN);
        if len == 0 && !fin {
            return self.after_ack(rucb);
        }
        if !self.validate_ordering(rucb, input)? {
            return Ok(());
        }

        match rucb.state {
            RucbState::SynSent | RucbState::Established => {
                let drained = len > 0 && self.deliver(rucb, input, events);
                if fin {
                    rucb.state = RucbState::CloseWait;
                    rucb.ack = rucb.ack.wrapping_add(1);
                    self.ack_and_flush(rucb)?;
                    // No half-close towards the upper layer: answer with our FIN
                    self.close_impl(rucb, events, false)?;
                } else if drained || rucb.flags.take(RucbFlags::DELAYED_ACK) {
                    self.ack_and_flush(rucb)?;
                } else {
                    rucb.flags.insert(RucbFlags::DELAYED_ACK);
                }
            }
            RucbState::FinWait1 | RucbState::FinWait2 if len > 0 => {
                trace_debug!("data after close on {}, resetting", rucb.info().key);
                self.send_control(rucb, RUDP_RST | RUDP_ACK)?;
                self.finish(rucb, events, true);
            }
            RucbState::FinWait1 => {
                rucb.state = RucbState::Closing;
                rucb.ack = rucb.ack.wrapping_add(1);
                self.send_control(rucb, RUDP_ACK)?;
                self.after_ack(rucb)?;
            }
            RucbState::FinWait2 => {
                rucb.ack = rucb.ack.wrapping_add(1);
                self.send_control(rucb, RUDP_ACK)?;
                self.finish(rucb, events, false);
            }
            RucbState::Closing | RucbState::CloseWait | RucbState::LastAck => {
                self.send_control(rucb, RUDP_ACK)?;
            }
            RucbState::Closed => {}
        }
        Ok(())
    }

    /// Hand in-order payload upstream, followed by whatever it unblocked
    /// in the reorder window. Returns whether held segments were released.
    fn deliver(&self, rucb: &mut Rucb, input: &mut RudpInput, events: &mut EventQueue) -> bool {
        rucb.ack = input.header.seq().wrapping_add(input.data_len());
        events.read(rucb.info(), std::mem::take(&mut input.payload));
        let ready = rucb.reorder.drain_ready(&mut rucb.ack);
        let drained = !ready.is_empty();
        for data in ready {
            events.read(rucb.info(), NetBuffer::from_vec(data));
        }
        drained
    }

    /// Check `input` carries the next expected sequence number, answering
    /// gaps and retransmissions on the wire.
    fn validate_ordering(&self, rucb: &mut Rucb, input: &RudpInput) -> Result<bool> {
        let seq = input.header.seq();
        match seq_cmp(seq, rucb.ack) {
            std::cmp::Ordering::Equal => Ok(true),
            std::cmp::Ordering::Greater => {
                trace_warn!("gap on {}: got {} expected {}", rucb.info().key, seq, rucb.ack);
                if self.config.eack && input.data_len() > 0 && rucb.is_open() {
                    let next = rucb.ack;
                    if rucb.reorder.insert(next, seq, input.payload.remaining()) == Reassembly::OutOfWindow {
                        trace_debug!("segment {} outside the receive window of {}", seq, rucb.info().key);
                    }
                    self.send_eack(rucb)?;
                } else {
                    self.ack_and_flush(rucb)?;
                }
                Ok(false)
            }
            std::cmp::Ordering::Less => {
                trace_warn!("spurious retransmission on {}: got {} expected {}", rucb.info().key, seq, rucb.ack);
                if self.config.spurious == SpuriousPolicy::ReAck {
                    self.send_control(rucb, RUDP_ACK)?;
                }
                Ok(false)
            }
        }
    }

    /// A bare ACK moved the window: push pending data and a deferred FIN.
    fn after_ack(&self, rucb: &mut Rucb) -> Result<()> {
        match rucb.state {
            RucbState::FinWait1 | RucbState::Closing | RucbState::LastAck => {
                self.flush_data(rucb)?;
                self.send_deferred_fin(rucb)?;
            }
            RucbState::SynSent | RucbState::Established | RucbState::CloseWait => {
                if rucb.remain_send_window() > 0 && rucb.has_unsent() {
                    self.flush_data(rucb)?;
                }
            }
            RucbState::FinWait2 | RucbState::Closed => {}
        }
        Ok(())
    }

    fn close_impl(&self, rucb: &mut Rucb, events: &mut EventQueue, force: bool) -> Result<()> {
        match rucb.state {
            RucbState::Closed => {}
            _ if force => {
                self.send_control(rucb, RUDP_RST | RUDP_ACK)?;
                self.finish(rucb, events, true);
            }
            RucbState::SynSent | RucbState::Established => {
                rucb.state = RucbState::FinWait1;
                self.flush_data(rucb)?;
                rucb.flags.insert(RucbFlags::DO_FIN);
                self.send_deferred_fin(rucb)?;
            }
            RucbState::CloseWait => {
                rucb.state = RucbState::LastAck;
                self.flush_data(rucb)?;
                rucb.flags.insert(RucbFlags::DO_FIN);
                self.send_deferred_fin(rucb)?;
            }
            _ => {
                trace_debug!("close on {} already in progress", rucb.info().key);
            }
        }
        Ok(())
    }

    /// Mark `rucb` closed, release its port and, if this caller unregisters
    /// it, queue its terminal notifications.
    fn finish(&self, rucb: &mut Rucb, events: &mut EventQueue, force: bool) {
        rucb.release();
        if self.table.remove_flow(rucb.info()) {
            events.destroyed(rucb.info(), force);
        }
    }

    fn read_unknown(&self, input: RudpInput, events: &mut EventQueue) -> Result<()> {
        if input.has(RUDP_RST) {
            return Ok(());
        }
        if input.has(RUDP_SYN) {
            return self.accept(input, events);
        }
        if input.has(RUDP_FIN) && input.data_len() == 0 {
            // Late FIN of a flow already gone: let the peer finish
            let (seq, ack) = (input.header.ack(), input.header.seq().wrapping_add(1));
            return self.send_stateless(&input.key, RUDP_ACK, seq, ack);
        }
        if input.data_len() == 0 && !input.has(RUDP_FIN) {
            // Bare ACKs (ACK(0,0) included) need no flow; answering could reset a peer still closing
            return Ok(());
        }
        trace_debug!("data for unknown flow {}, requesting SYN", input.key);
        self.send_stateless(&input.key, RUDP_ACK, 0, 0)
    }

    fn accept(&self, input: RudpInput, events: &mut EventQueue) -> Result<()> {
        let insertion = self
            .table
            .insert(input.key, |info| Rucb::accept(info, &input.header, &self.config))?;
        if insertion.created {
            trace_debug!("accepted {} as {}", insertion.flow.key(), insertion.flow.id());
            events.created(insertion.flow.info());
            events.connected(insertion.flow.info());
        }
        self.teardown_evicted(insertion.evicted, events);
        Ok(())
    }

    /// Reset flows pushed out of the table by a new one.
    fn teardown_evicted(&self, evicted: Vec<FlowRef<Rucb>>, events: &mut EventQueue) {
        for flow in evicted {
            let mut rucb = flow.lock();
            trace_debug!("evicting {}", flow.key());
            if rucb.state != RucbState::Closed {
                if let Err(_e) = self.send_control(&rucb, RUDP_RST | RUDP_ACK) {
                    trace_warn!("RST for evicted flow {} failed: {}", flow.key(), _e);
                }
            }
            rucb.release();
            events.destroyed(flow.info(), true);
        }
    }

    fn send_fin(&self, rucb: &mut Rucb) -> Result<()> {
        self.send_control(rucb, RUDP_FIN | RUDP_ACK)?;
        rucb.seq = rucb.seq.wrapping_add(1);
        rucb.flags.remove(RucbFlags::DO_FIN);
        rucb.rexmt.activate(rucb.seq);
        Ok(())
    }

    fn send_deferred_fin(&self, rucb: &mut Rucb) -> Result<()> {
        if rucb.flags.contains(RucbFlags::DO_FIN) && rucb.write.is_empty() && rucb.remain_send_window() > 0 {
            self.send_fin(rucb)?;
        }
        Ok(())
    }

    /// Send unsent data while the window has room. Returns whether
    /// anything went out.
    fn flush_data(&self, rucb: &mut Rucb) -> Result<bool> {
        let mut sent = false;
        loop {
            let remain = rucb.remain_send_window();
            if remain <= 0 {
                break;
            }
            let max = remain.min(rucb.mss as i64) as usize;
            let Some(chunk) = rucb.write.slice(rucb.unacked() as usize, max) else {
                break;
            };
            let len = chunk.len() as u32;
            self.emit(rucb, RUDP_ACK, rucb.seq, NetBuffer::backward_with_payload(&chunk))?;
            rucb.seq = rucb.seq.wrapping_add(len);
            sent = true;
        }
        if sent {
            rucb.flags.remove(RucbFlags::DELAYED_ACK);
            rucb.rexmt.activate(rucb.seq);
        }
        Ok(sent)
    }

    /// Acknowledge now, piggybacked on data when there is any.
    fn ack_and_flush(&self, rucb: &mut Rucb) -> Result<()> {
        if !self.flush_data(rucb)? {
            self.send_control(rucb, RUDP_ACK)?;
        }
        rucb.flags.remove(RucbFlags::DELAYED_ACK);
        Ok(())
    }

    /// Acknowledge with the out-of-order ranges we hold.
    fn send_eack(&self, rucb: &mut Rucb) -> Result<()> {
        let ranges = rucb.reorder.ranges(self.config.max_eack_ranges);
        if ranges.is_empty() {
            return self.ack_and_flush(rucb);
        }
        let payload = RudpHeader::encode_eak_ranges(&ranges);
        self.emit(rucb, RUDP_ACK | RUDP_EAK, rucb.seq, NetBuffer::backward_with_payload(&payload))?;
        rucb.flags.remove(RucbFlags::DELAYED_ACK);
        Ok(())
    }

    /// Resend everything in flight from `acked`, within the peer's window,
    /// skipping ranges the peer reported holding. A sent FIN goes last.
    fn retransmit_all(&self, rucb: &mut Rucb) -> Result<()> {
        let in_flight = rucb.unacked_data();
        let budget = (rucb.calculated_send_window() as usize).max(rucb.mss as usize);
        let mut offset = 0usize;
        let mut sent = 0usize;
        while offset < in_flight && sent < budget {
            let seq = rucb.acked.wrapping_add(offset as u32);
            if let Some(end) = rucb.eacked.covering(seq) {
                offset = end.wrapping_sub(rucb.acked) as usize;
                continue;
            }
            let mut max = (rucb.mss as usize).min(in_flight - offset).min(budget - sent);
            if let Some(start) = rucb.eacked.next_start(seq) {
                max = max.min(start.wrapping_sub(seq) as usize);
            }
            let Some(chunk) = rucb.write.slice(offset, max) else {
                break;
            };
            let len = chunk.len();
            self.emit(rucb, RUDP_ACK, seq, NetBuffer::backward_with_payload(&chunk))?;
            offset += len;
            sent += len;
        }
        if rucb.fin_in_flight() {
            let fin_seq = rucb.acked.wrapping_add(rucb.write.len() as u32);
            self.emit(rucb, RUDP_FIN | RUDP_ACK, fin_seq, NetBuffer::backward(DEFAULT_HEADROOM))?;
        } else if in_flight == 0 {
            rucb.rexmt.deactivate();
            return Ok(());
        }
        rucb.rexmt.backoff(self.config.backoff.len());
        Ok(())
    }

    fn send_control(&self, rucb: &Rucb, flags: u8) -> Result<()> {
        self.emit(rucb, flags, rucb.seq, NetBuffer::backward(DEFAULT_HEADROOM))
    }

    fn send_stateless(&self, key: &FlowKey, flags: u8, seq: u32, ack: u32) -> Result<()> {
        let mut buf = NetBuffer::backward(DEFAULT_HEADROOM);
        RudpHeaderBuilder::new(key.src.port, key.dst.port)
            .flags(flags)
            .seq(seq)
            .ack(ack)
            .build(&mut buf)?;
        self.downstream.send_packet(&key.dst, buf);
        Ok(())
    }

    fn emit(&self, rucb: &Rucb, flags: u8, seq: u32, mut buf: NetBuffer) -> Result<()> {
        let key = &rucb.info().key;
        RudpHeaderBuilder::new(key.src.port, key.dst.port)
            .flags(flags)
            .window(rucb.recv_window)
            .seq(seq)
            .ack(rucb.ack)
            .build(&mut buf)?;
        self.downstream.send_packet(&key.dst, buf);
        Ok(())
    }
}

impl Drop for RudpProcessor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
