//! TCP-emulation engine for the tunnel endpoint.
//!
//! ```text
//!   input(frame)
//!     ├─ unknown flow: SYN ──► accept (SYN-ACK)
//!     │                FIN ──► stateless ACK
//!     │                RST ──► ignore
//!     │                else ─► stateless RST
//!     └─ known flow (under the flow lock)
//!          RST ──► teardown
//!          ACK ──► process_ack ──► process_data
//!
//!   SynReceived ─ACK─► Established ─close─► FinWait1 ─ACK(FIN)─► FinWait2 ─FIN─► Closed
//!                          │                    └─FIN─► Closing ─ACK(FIN)─► Closed
//!                          └─FIN─► CloseWait ─(FIN sent)─► LastAck ─ACK─► Closed
//! ```
//!
//! Outbound data is sent straight from the write buffer whenever the
//! client's window has room. Incoming data is acknowledged on every second
//! segment or on the next delayed-ACK tick, whichever comes first.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use meshtun::seq::{seq_cmp, seq_ge, seq_gt};
use meshtun::{
    Downstream, EventQueue, FlowKey, FlowTable, Result, SpuriousPolicy, StackContext, StackError, TaskId, TcpConfig,
    Upstream,
};
use meshtun_codec::{NetBuffer, TcpOption, DEFAULT_HEADROOM, TCP_ACK, TCP_FIN, TCP_RST, TCP_SYN};

use crate::packet::{parse_tcp, TcpInput, TcpReply};
use crate::tcb::{Tcb, TcbFlags, TcbState};

/// Whether a segment still has data to offer after its ACK was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Done,
}

pub struct TcpProcessor {
    ctx: Arc<StackContext>,
    config: TcpConfig,
    table: FlowTable<Tcb>,
    downstream: Arc<dyn Downstream>,
    upstream: Arc<dyn Upstream>,
    tasks: Mutex<Vec<TaskId>>,
}

impl TcpProcessor {
    /// Create the engine and register its delayed-ACK tick and idle sweep
    /// with the context's timer.
    pub fn new(
        ctx: Arc<StackContext>,
        config: TcpConfig,
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
            tasks: Mutex::new(Vec::new()),
        });

        let timer = processor.ctx.timer();
        let tick = timer.schedule_for(
            Duration::from_millis(processor.config.delayed_ack_ms),
            &processor,
            |p: &TcpProcessor| p.tick(),
        )?;
        let sweep = timer.schedule_for(processor.config.idle.sweep_interval(), &processor, |p: &TcpProcessor| {
            p.sweep()
        })?;
        processor.tasks.lock().extend([tick, sweep]);
        Ok(processor)
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    /// Number of live TCBs.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn contains(&self, key: &FlowKey) -> bool {
        self.table.contains(key)
    }

    /// Run `f` on the live TCB under `key`, holding its lock.
    pub fn inspect<R>(&self, key: &FlowKey, f: impl FnOnce(&Tcb) -> R) -> Option<R> {
        self.table.find(key).map(|flow| f(&*flow.lock()))
    }

    /// State of the flow under `key`, if it is live.
    pub fn state(&self, key: &FlowKey) -> Option<TcbState> {
        self.inspect(key, Tcb::state)
    }

    /// Process one IPv4 frame read from the tunnel.
    ///
    /// Frames that are not IPv4/TCP or fail to parse are dropped with a log.
    /// Errors only report contract violations while framing a reply.
    pub fn input(&self, frame: NetBuffer) -> Result<()> {
        let Some(mut seg) = parse_tcp(&frame, &self.config.dns) else {
            return Ok(());
        };
        let mut events = EventQueue::new();
        let result = match self.table.find(&seg.key) {
            Some(flow) => {
                let mut tcb = flow.lock();
                self.process(&mut tcb, &mut seg, &mut events)
            }
            None => self.input_unknown(seg, &mut events),
        };
        events.dispatch(&*self.upstream);
        result
    }

    /// Queue `buf` for the flow under `key` and send what the window allows.
    ///
    /// `buf` must be in backward mode so headers can be prepended in place.
    /// Writes to unknown or non-established flows are dropped with a log.
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
        let mut tcb = flow.lock();
        if tcb.state != TcbState::Established {
            trace_debug!("write to {} in state {:?} dropped", key, tcb.state);
            return Ok(());
        }
        tcb.write.push(buf.remaining().to_vec());
        tcb.idle_ticks = 0;
        if tcb.remain_send_window() > 0 {
            self.flush_data(&mut tcb)?;
        }
        Ok(())
    }

    /// Close the flow under `key`. Closing an unknown flow is a no-op.
    ///
    /// A graceful close sends FIN once everything written has been
    /// acknowledged; `force` discards unsent data and resets the flow.
    pub fn close(&self, key: &FlowKey, force: bool) -> Result<()> {
        let Some(flow) = self.table.find(key) else {
            return Ok(());
        };
        let mut events = EventQueue::new();
        let result = {
            let mut tcb = flow.lock();
            self.close_impl(&mut tcb, &mut events, force)
        };
        events.dispatch(&*self.upstream);
        result
    }

    /// Delayed-ACK timer: acknowledge every flow with an armed delayed ACK.
    pub fn tick(&self) {
        for flow in self.table.snapshot() {
            let mut tcb = flow.lock();
            if tcb.state == TcbState::Closed || !tcb.flags.take(TcbFlags::DELAYED_ACK) {
                continue;
            }
            if let Err(_e) = self.ack_and_flush(&mut tcb) {
                trace_error!("delayed ACK for {} failed: {}", flow.key(), _e);
            }
        }
    }

    /// Idle sweep: reset and tear down flows silent for the idle budget.
    pub fn sweep(&self) {
        let expire = self.config.idle.expire_ticks();
        let mut events = EventQueue::new();
        for flow in self.table.snapshot() {
            let mut tcb = flow.lock();
            tcb.idle_ticks += 1;
            if tcb.idle_ticks < expire {
                continue;
            }
            trace_debug!("flow {} idle, resetting", flow.key());
            if tcb.state != TcbState::Closed {
                if let Err(_e) = self.send_control(&tcb, TCP_RST | TCP_ACK) {
                    trace_warn!("RST for idle flow {} failed: {}", flow.key(), _e);
                }
            }
            self.finish(&mut tcb, &mut events, true);
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
            let mut tcb = flow.lock();
            tcb.state = TcbState::Closed;
            tcb.write.clear();
            events.destroyed(flow.info(), true);
        }
        events.dispatch(&*self.upstream);
    }

    fn process(&self, tcb: &mut Tcb, seg: &mut TcpInput, events: &mut EventQueue) -> Result<()> {
        if tcb.state == TcbState::Closed {
            return Ok(());
        }
        tcb.idle_ticks = 0;

        if seg.has(TCP_SYN) {
            // SYN-ACK lost: the client retries its SYN
            if tcb.state == TcbState::SynReceived && seg.seq.wrapping_add(1) == tcb.ack {
                return self.send_syn_ack(tcb);
            }
            trace_debug!("duplicate SYN on {}", tcb.info().key);
            return Ok(());
        }
        if seg.has(TCP_RST) {
            trace_debug!("RST from client on {}", tcb.info().key);
            self.finish(tcb, events, true);
            return Ok(());
        }
        if !seg.has(TCP_ACK) {
            return Ok(());
        }
        if self.process_ack(tcb, seg, events)? == Step::Continue {
            self.process_data(tcb, seg, events)?;
        }
        Ok(())
    }

    /// Check `seg` carries the next expected sequence number, answering
    /// gaps and retransmissions on the wire.
    fn validate_ordering(&self, tcb: &mut Tcb, seg: &TcpInput) -> Result<bool> {
        match seq_cmp(seg.seq, tcb.ack) {
            std::cmp::Ordering::Equal => Ok(true),
            std::cmp::Ordering::Greater => {
                trace_warn!("gap on {}: got {} expected {}", tcb.info().key, seg.seq, tcb.ack);
                self.ack_and_flush(tcb)?;
                Ok(false)
            }
            std::cmp::Ordering::Less => {
                trace_warn!("spurious segment on {}: got {} expected {}", tcb.info().key, seg.seq, tcb.ack);
                if self.config.spurious == SpuriousPolicy::ReAck {
                    self.send_control(tcb, TCP_ACK)?;
                }
                Ok(false)
            }
        }
    }

    fn process_ack(&self, tcb: &mut Tcb, seg: &TcpInput, events: &mut EventQueue) -> Result<Step> {
        tcb.send_window = seg.window;
        if !self.validate_ordering(tcb, seg)? {
            return Ok(Step::Done);
        }
        if seq_gt(seg.ack, tcb.seq) {
            trace_warn!("ACK {} beyond sent {} on {}", seg.ack, tcb.seq, tcb.info().key);
            return Ok(Step::Done);
        }

        match tcb.state {
            TcbState::SynReceived => {
                if seg.ack != tcb.seq {
                    trace_warn!("handshake ACK {} does not cover SYN {} on {}", seg.ack, tcb.seq, tcb.info().key);
                    self.send_stateless(&seg.key, seg.ack, 0, TCP_RST)?;
                    return Ok(Step::Done);
                }
                tcb.state = TcbState::Established;
                tcb.acked = seg.ack;
                events.connected(tcb.info());
                Ok(Step::Continue)
            }
            TcbState::LastAck => {
                if seg.ack == tcb.seq {
                    self.finish(tcb, events, false);
                    return Ok(Step::Done);
                }
                self.take_acked(tcb, seg.ack);
                Ok(Step::Done)
            }
            TcbState::FinWait1 => {
                if self.take_acked(tcb, seg.ack) {
                    tcb.state = TcbState::FinWait2;
                }
                Ok(Step::Continue)
            }
            TcbState::Closing => {
                if self.take_acked(tcb, seg.ack) {
                    self.finish(tcb, events, false);
                    return Ok(Step::Done);
                }
                Ok(Step::Continue)
            }
            TcbState::Established => {
                let duplicate = seg.payload_len() == 0 && seg.ack == tcb.acked && tcb.unacked() > 0;
                if duplicate {
                    tcb.dup_acks += 1;
                    if tcb.dup_acks >= self.config.dup_ack_threshold {
                        tcb.dup_acks = 0;
                        if self.config.fast_retransmit {
                            self.retransmit_oldest(tcb)?;
                        }
                    }
                } else if seq_ge(seg.ack, tcb.acked) {
                    if seg.ack != tcb.acked {
                        tcb.dup_acks = 0;
                    }
                    self.take_acked(tcb, seg.ack);
                }
                Ok(Step::Continue)
            }
            _ => Ok(Step::Continue),
        }
    }

    /// Release acknowledged bytes. Returns true when `ack` also covers our FIN.
    fn take_acked(&self, tcb: &mut Tcb, ack: u32) -> bool {
        if !seq_gt(ack, tcb.acked) {
            return false;
        }
        let newly = ack.wrapping_sub(tcb.acked) as usize;
        let excess = tcb.write.drop_front(newly);
        tcb.acked = ack;
        excess > 0
    }

    fn process_data(&self, tcb: &mut Tcb, seg: &mut TcpInput, events: &mut EventQueue) -> Result<()> {
        if tcb.state < TcbState::Established {
            return Ok(());
        }
        let len = seg.payload_len() as u32;
        let fin = seg.has(TCP_FIN);

        match tcb.state {
            TcbState::Established => {
                if fin {
                    tcb.state = TcbState::CloseWait;
                    tcb.ack = seg.seq.wrapping_add(len).wrapping_add(1);
                    if len > 0 {
                        events.read(tcb.info(), std::mem::take(&mut seg.payload));
                    }
                    self.ack_and_flush(tcb)?;
                    // No half-close towards the upper layer: answer with our FIN
                    self.close_impl(tcb, events, false)?;
                } else if len > 0 {
                    tcb.ack = seg.seq.wrapping_add(len);
                    events.read(tcb.info(), std::mem::take(&mut seg.payload));
                    if tcb.flags.take(TcbFlags::DELAYED_ACK) {
                        self.ack_and_flush(tcb)?;
                    } else {
                        tcb.flags.insert(TcbFlags::DELAYED_ACK);
                    }
                } else if tcb.remain_send_window() > 0 && tcb.has_unsent() {
                    self.flush_data(tcb)?;
                }
            }
            TcbState::FinWait1 => {
                if len > 0 {
                    trace_debug!("data after close on {}, resetting", tcb.info().key);
                    self.send_control(tcb, TCP_RST | TCP_ACK)?;
                    self.finish(tcb, events, true);
                    return Ok(());
                }
                self.flush_data(tcb)?;
                self.send_deferred_fin(tcb)?;
                if fin {
                    tcb.state = TcbState::Closing;
                    tcb.ack = tcb.ack.wrapping_add(1);
                    self.send_control(tcb, TCP_ACK)?;
                }
            }
            TcbState::FinWait2 => {
                if len > 0 {
                    trace_debug!("data after close on {}, resetting", tcb.info().key);
                    self.send_control(tcb, TCP_RST | TCP_ACK)?;
                    self.finish(tcb, events, true);
                } else if fin {
                    tcb.ack = tcb.ack.wrapping_add(1);
                    self.send_control(tcb, TCP_ACK)?;
                    self.finish(tcb, events, false);
                }
            }
            TcbState::Closing => {
                if len == 0 {
                    self.flush_data(tcb)?;
                    self.send_deferred_fin(tcb)?;
                }
            }
            TcbState::CloseWait | TcbState::LastAck => {
                if len > 0 || fin {
                    self.send_control(tcb, TCP_ACK)?;
                }
            }
            TcbState::Closed | TcbState::SynReceived => {}
        }
        Ok(())
    }

    fn close_impl(&self, tcb: &mut Tcb, events: &mut EventQueue, force: bool) -> Result<()> {
        match tcb.state {
            TcbState::Established if force => {
                let in_flight = tcb.unacked() as usize;
                tcb.write.truncate(in_flight);
                self.send_control(tcb, TCP_RST | TCP_ACK)?;
                self.finish(tcb, events, true);
            }
            TcbState::Established => {
                tcb.state = TcbState::FinWait1;
                self.flush_data(tcb)?;
                if tcb.remain_send_window() > 0 && tcb.write.is_empty() {
                    self.send_fin(tcb)?;
                } else {
                    tcb.flags.insert(TcbFlags::DO_FIN);
                }
            }
            TcbState::CloseWait => {
                let in_flight = tcb.unacked() as usize;
                tcb.write.truncate(in_flight);
                self.send_fin(tcb)?;
                tcb.state = TcbState::LastAck;
            }
            TcbState::Closed => {}
            _ if force => {
                self.send_control(tcb, TCP_RST | TCP_ACK)?;
                self.finish(tcb, events, true);
            }
            TcbState::SynReceived => {
                self.send_control(tcb, TCP_RST | TCP_ACK)?;
                self.finish(tcb, events, false);
            }
            _ => {
                trace_debug!("close on {} already in progress", tcb.info().key);
            }
        }
        Ok(())
    }

    /// Mark `tcb` closed and, if this caller unregisters it, queue its
    /// terminal notifications.
    fn finish(&self, tcb: &mut Tcb, events: &mut EventQueue, force: bool) {
        tcb.state = TcbState::Closed;
        tcb.write.clear();
        if self.table.remove_flow(tcb.info()) {
            events.destroyed(tcb.info(), force);
        }
    }

    fn input_unknown(&self, seg: TcpInput, events: &mut EventQueue) -> Result<()> {
        if seg.has(TCP_RST) {
            return Ok(());
        }
        if seg.has(TCP_SYN) && !seg.has(TCP_ACK) {
            return self.accept(seg, events);
        }
        if seg.has(TCP_FIN) && seg.payload_len() == 0 {
            // Late FIN of a flow already gone: let the client finish
            return self.send_stateless(&seg.key, seg.ack, seg.seq.wrapping_add(1), TCP_ACK);
        }
        trace_debug!("segment for unknown flow {}, resetting", seg.key);
        self.send_stateless(&seg.key, seg.ack, 0, TCP_RST)
    }

    fn accept(&self, seg: TcpInput, events: &mut EventQueue) -> Result<()> {
        let isn: u32 = rand::random();
        let insertion = self
            .table
            .insert(seg.key, |info| Tcb::accept(info, &seg, &self.config, isn))?;
        if !insertion.created {
            return Ok(());
        }

        let flow = insertion.flow;
        {
            let mut tcb = flow.lock();
            if let Err(e) = self.send_syn_ack(&mut tcb) {
                tcb.state = TcbState::Closed;
                self.table.remove_flow(flow.info());
                drop(tcb);
                self.teardown_evicted(insertion.evicted, events);
                return Err(e);
            }
            trace_debug!("accepted {} as {}", flow.key(), flow.id());
            events.created(flow.info());
        }
        self.teardown_evicted(insertion.evicted, events);
        Ok(())
    }

    /// Reset flows pushed out of the table by a new one.
    fn teardown_evicted(&self, evicted: Vec<meshtun::FlowRef<Tcb>>, events: &mut EventQueue) {
        for flow in evicted {
            let mut tcb = flow.lock();
            trace_debug!("evicting {}", flow.key());
            if tcb.state != TcbState::Closed {
                if let Err(_e) = self.send_control(&tcb, TCP_RST | TCP_ACK) {
                    trace_warn!("RST for evicted flow {} failed: {}", flow.key(), _e);
                }
            }
            tcb.state = TcbState::Closed;
            tcb.write.clear();
            events.destroyed(flow.info(), true);
        }
    }

    fn send_syn_ack(&self, tcb: &mut Tcb) -> Result<()> {
        let isn = if tcb.unacked() == 0 { tcb.seq } else { tcb.seq.wrapping_sub(1) };
        let reply = TcpReply::new(isn, tcb.ack, TCP_SYN | TCP_ACK, tcb.recv_window).options(vec![
            TcpOption::Mss(tcb.mss),
            TcpOption::WindowScale(tcb.recv_ws),
            TcpOption::SackPermitted,
        ]);
        self.emit(tcb, reply, NetBuffer::backward(DEFAULT_HEADROOM))?;
        tcb.seq = isn.wrapping_add(1);
        Ok(())
    }

    fn send_fin(&self, tcb: &mut Tcb) -> Result<()> {
        self.send_control(tcb, TCP_FIN | TCP_ACK)?;
        tcb.seq = tcb.seq.wrapping_add(1);
        tcb.flags.remove(TcbFlags::DO_FIN);
        Ok(())
    }

    fn send_deferred_fin(&self, tcb: &mut Tcb) -> Result<()> {
        if tcb.flags.contains(TcbFlags::DO_FIN) && tcb.remain_send_window() > 0 && tcb.write.is_empty() {
            self.send_fin(tcb)?;
        }
        Ok(())
    }

    /// Send unsent data while the window has room. Returns whether
    /// anything went out.
    fn flush_data(&self, tcb: &mut Tcb) -> Result<bool> {
        let mut sent = false;
        loop {
            let remain = tcb.remain_send_window();
            if remain <= 0 {
                break;
            }
            let max = remain.min(tcb.mss as i64) as usize;
            let Some(chunk) = tcb.write.slice(tcb.unacked() as usize, max) else {
                break;
            };
            let len = chunk.len() as u32;
            let reply = TcpReply::new(tcb.seq, tcb.ack, TCP_ACK, tcb.recv_window);
            self.emit(tcb, reply, NetBuffer::backward_with_payload(&chunk))?;
            tcb.seq = tcb.seq.wrapping_add(len);
            sent = true;
        }
        if sent {
            tcb.flags.remove(TcbFlags::DELAYED_ACK);
        }
        Ok(sent)
    }

    /// Acknowledge now, piggybacked on data when there is any.
    fn ack_and_flush(&self, tcb: &mut Tcb) -> Result<()> {
        if !self.flush_data(tcb)? {
            self.send_control(tcb, TCP_ACK)?;
        }
        tcb.flags.remove(TcbFlags::DELAYED_ACK);
        Ok(())
    }

    fn retransmit_oldest(&self, tcb: &mut Tcb) -> Result<()> {
        let max = (tcb.mss as usize).min(tcb.unacked() as usize);
        let Some(chunk) = tcb.write.slice(0, max) else {
            return Ok(());
        };
        trace_debug!("fast retransmit of {} bytes at {} on {}", chunk.len(), tcb.acked, tcb.info().key);
        let reply = TcpReply::new(tcb.acked, tcb.ack, TCP_ACK, tcb.recv_window);
        self.emit(tcb, reply, NetBuffer::backward_with_payload(&chunk))
    }

    fn send_control(&self, tcb: &Tcb, flags: u8) -> Result<()> {
        let reply = TcpReply::new(tcb.seq, tcb.ack, flags, tcb.recv_window);
        self.emit(tcb, reply, NetBuffer::backward(DEFAULT_HEADROOM))
    }

    fn send_stateless(&self, key: &FlowKey, seq: u32, ack: u32, flags: u8) -> Result<()> {
        let packet = TcpReply::new(seq, ack, flags, self.config.window).frame_empty(key, &self.config.dns)?;
        self.downstream.send_packet(&key.src, packet);
        Ok(())
    }

    fn emit(&self, tcb: &Tcb, reply: TcpReply, buf: NetBuffer) -> Result<()> {
        let key = &tcb.info().key;
        let packet = reply.frame(buf, key, &self.config.dns)?;
        self.downstream.send_packet(&key.src, packet);
        Ok(())
    }
}

impl Drop for TcpProcessor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshtun::{Endpoint, Protocol, StackConfig};
    use meshtun_test_support::{parse_tcp, tcp_packet, RecordingDownstream, RecordingUpstream};
    use std::net::{Ipv4Addr, SocketAddrV4};

    const CLIENT: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 40000);
    const SERVER: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(1, 1, 1, 1), 443);

    fn key() -> FlowKey {
        FlowKey::new(
            Endpoint::ipv4(*CLIENT.ip(), CLIENT.port(), Protocol::Tcp),
            Endpoint::ipv4(*SERVER.ip(), SERVER.port(), Protocol::Tcp),
        )
    }

    #[test]
    fn test_send_sequence_wraps() {
        let ctx = StackContext::new(StackConfig::default());
        let down = Arc::new(RecordingDownstream::new());
        let tcp = TcpProcessor::new(ctx, TcpConfig::default(), down.clone(), Arc::new(RecordingUpstream::new())).unwrap();

        tcp.input(tcp_packet(CLIENT, SERVER, 100, 0, TCP_SYN, 65535, vec![], b"")).unwrap();
        let syn_ack = parse_tcp(&down.take().pop().unwrap().1);
        tcp.input(tcp_packet(CLIENT, SERVER, 101, syn_ack.seq.wrapping_add(1), TCP_ACK, 65535, vec![], b""))
            .unwrap();
        assert_eq!(tcp.state(&key()), Some(TcbState::Established));

        let start = u32::MAX - 3;
        {
            let flow = tcp.table.find(&key()).unwrap();
            let mut tcb = flow.lock();
            tcb.seq = start;
            tcb.acked = start;
        }

        tcp.write(&key(), NetBuffer::backward_with_payload(b"0123456789")).unwrap();
        let sent: Vec<_> = down.take().iter().map(|(_, p)| parse_tcp(p)).collect();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].seq, start);
        assert_eq!(tcp.inspect(&key(), |t| (t.seq(), t.unacked())), Some((6, 10)));

        // Partial ACK lands just past the wrap
        tcp.input(tcp_packet(CLIENT, SERVER, 101, 0, TCP_ACK, 65535, vec![], b"")).unwrap();
        assert_eq!(tcp.inspect(&key(), |t| (t.acked(), t.unacked(), t.buffered())), Some((0, 6, 6)));

        tcp.write(&key(), NetBuffer::backward_with_payload(b"ab")).unwrap();
        let sent: Vec<_> = down.take().iter().map(|(_, p)| parse_tcp(p)).collect();
        assert_eq!(sent[0].seq, 6);
        assert_eq!(sent[0].payload, b"ab");

        tcp.input(tcp_packet(CLIENT, SERVER, 101, 8, TCP_ACK, 65535, vec![], b"")).unwrap();
        assert_eq!(tcp.inspect(&key(), |t| (t.unacked(), t.buffered())), Some((0, 0)));
    }
}
