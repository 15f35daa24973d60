//! Recording doubles for the engine seams.

use parking_lot::Mutex;

use meshtun::{Downstream, Endpoint, FlowId, FlowInfo, Upstream};
use meshtun_codec::NetBuffer;

/// Captures every packet an engine sends.
#[derive(Default)]
pub struct RecordingDownstream {
    packets: Mutex<Vec<(Endpoint, NetBuffer)>>,
}

impl RecordingDownstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything captured so far.
    pub fn take(&self) -> Vec<(Endpoint, NetBuffer)> {
        std::mem::take(&mut *self.packets.lock())
    }

    pub fn len(&self) -> usize {
        self.packets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Downstream for RecordingDownstream {
    fn send_packet(&self, dst: &Endpoint, packet: NetBuffer) {
        self.packets.lock().push((*dst, packet));
    }
}

/// One upward notification, with the payload copied out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Note {
    Created(FlowInfo),
    Connected(FlowInfo),
    Read(FlowInfo, Vec<u8>),
    Destroyed(FlowInfo),
    Closed(FlowInfo, bool),
}

impl Note {
    pub fn flow(&self) -> &FlowInfo {
        match self {
            Note::Created(f) | Note::Connected(f) | Note::Destroyed(f) => f,
            Note::Read(f, _) | Note::Closed(f, _) => f,
        }
    }
}

/// Captures every notification an engine fires.
#[derive(Default)]
pub struct RecordingUpstream {
    notes: Mutex<Vec<Note>>,
}

impl RecordingUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notes(&self) -> Vec<Note> {
        self.notes.lock().clone()
    }

    pub fn clear(&self) {
        self.notes.lock().clear();
    }

    fn count(&self, pred: impl Fn(&Note) -> bool) -> usize {
        self.notes.lock().iter().filter(|n| pred(n)).count()
    }

    pub fn created(&self) -> usize {
        self.count(|n| matches!(n, Note::Created(_)))
    }

    pub fn connected(&self, id: FlowId) -> usize {
        self.count(|n| matches!(n, Note::Connected(f) if f.id == id))
    }

    pub fn destroyed(&self, id: FlowId) -> usize {
        self.count(|n| matches!(n, Note::Destroyed(f) if f.id == id))
    }

    /// `force` flags of every `closed` fired for `id`.
    pub fn closed(&self, id: FlowId) -> Vec<bool> {
        self.notes
            .lock()
            .iter()
            .filter_map(|n| match n {
                Note::Closed(f, force) if f.id == id => Some(*force),
                _ => None,
            })
            .collect()
    }

    /// Every payload byte delivered for `id`, in delivery order.
    pub fn received(&self, id: FlowId) -> Vec<u8> {
        self.notes
            .lock()
            .iter()
            .filter_map(|n| match n {
                Note::Read(f, bytes) if f.id == id => Some(bytes.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn reads(&self) -> usize {
        self.count(|n| matches!(n, Note::Read(..)))
    }

    /// Id of the most recently created flow.
    pub fn last_created(&self) -> Option<FlowInfo> {
        self.notes.lock().iter().rev().find_map(|n| match n {
            Note::Created(f) => Some(*f),
            _ => None,
        })
    }
}

impl Upstream for RecordingUpstream {
    fn on_created(&self, flow: &FlowInfo) {
        self.notes.lock().push(Note::Created(*flow));
    }

    fn on_connected(&self, flow: &FlowInfo) {
        self.notes.lock().push(Note::Connected(*flow));
    }

    fn on_read(&self, flow: &FlowInfo, payload: NetBuffer) {
        self.notes.lock().push(Note::Read(*flow, payload.remaining().to_vec()));
    }

    fn on_destroyed(&self, flow: &FlowInfo) {
        self.notes.lock().push(Note::Destroyed(*flow));
    }

    fn on_closed(&self, flow: &FlowInfo, force: bool) {
        self.notes.lock().push(Note::Closed(*flow, force));
    }
}
