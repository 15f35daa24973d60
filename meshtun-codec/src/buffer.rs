//! Packet buffer with read/write cursors and a backward (prepend) mode.
//!
//! Inbound packets arrive in *forward* mode: the whole frame is present and
//! the read cursor is moved past headers until it sits on the payload.
//!
//! Outbound packets are built in *backward* mode: the payload is written
//! first and each header builder prepends its bytes in front of it, so the
//! IPv4 header is the last thing written and ends up first on the wire.
//!
//! ```text
//!   backward mode
//!   ┌──────────── headroom ───────────┬──────────── contents ──────────┐
//!   │ . . . . . . . . . . . . . . . . │ IPv4 │ TCP │ payload ...     │
//!   └─────────────────────────────────┴──────────────────────────────────┘
//!                                     ^ start            data.len() ^
//! ```
//!
//! All positions in the public API are relative to the first content byte.

use crate::error::{CodecError, Result};

/// Headroom reserved in front of a payload: IPv4 (20) plus TCP with
/// a full 40 bytes of options (60).
pub const DEFAULT_HEADROOM: usize = 80;

/// Byte buffer carrying one packet or one payload chunk.
#[derive(Clone, PartialEq, Eq)]
pub struct NetBuffer {
    data: Vec<u8>,
    /// Index of the first content byte inside `data`
    start: usize,
    /// Read cursor, relative to `start`
    read_pos: usize,
    backward: bool,
}

impl Default for NetBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NetBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetBuffer")
            .field("len", &self.len())
            .field("read_pos", &self.read_pos)
            .field("backward", &self.backward)
            .finish()
    }
}

impl NetBuffer {
    /// Empty forward-mode buffer.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Empty forward-mode buffer with preallocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            start: 0,
            read_pos: 0,
            backward: false,
        }
    }

    /// Forward-mode buffer over a received frame.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data,
            start: 0,
            read_pos: 0,
            backward: false,
        }
    }

    /// Empty backward-mode buffer with `headroom` bytes reserved for headers.
    pub fn backward(headroom: usize) -> Self {
        Self {
            data: vec![0u8; headroom],
            start: headroom,
            read_pos: 0,
            backward: true,
        }
    }

    /// Backward-mode buffer holding `payload`, ready for headers to be prepended.
    pub fn backward_with_payload(payload: &[u8]) -> Self {
        let mut data = Vec::with_capacity(DEFAULT_HEADROOM + payload.len());
        data.resize(DEFAULT_HEADROOM, 0);
        data.extend_from_slice(payload);
        Self {
            data,
            start: DEFAULT_HEADROOM,
            read_pos: 0,
            backward: true,
        }
    }

    #[inline]
    pub fn is_backward(&self) -> bool {
        self.backward
    }

    #[inline]
    pub fn set_backward(&mut self, backward: bool) {
        self.backward = backward;
    }

    /// Number of content bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unused bytes in front of the contents.
    #[inline]
    pub fn headroom(&self) -> usize {
        self.start
    }

    /// Write cursor: one past the last content byte.
    #[inline]
    pub fn write_pos(&self) -> usize {
        self.len()
    }

    #[inline]
    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    /// Move the read cursor; `pos` may equal `len()` (nothing left to read).
    pub fn set_read_pos(&mut self, pos: usize) -> Result<()> {
        if pos > self.len() {
            return Err(CodecError::OutOfBounds {
                pos,
                len: self.len(),
            });
        }
        self.read_pos = pos;
        Ok(())
    }

    /// All content bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.start..]
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[self.start..]
    }

    /// Bytes between the read cursor and the write cursor.
    #[inline]
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.start + self.read_pos..]
    }

    #[inline]
    pub fn remaining_len(&self) -> usize {
        self.len() - self.read_pos
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    fn check(&self, pos: usize, width: usize) -> Result<usize> {
        match pos.checked_add(width) {
            Some(end) if end <= self.len() => Ok(self.start + pos),
            _ => Err(CodecError::OutOfBounds {
                pos,
                len: self.len(),
            }),
        }
    }

    pub fn get_u8(&self, pos: usize) -> Result<u8> {
        let at = self.check(pos, 1)?;
        Ok(self.data[at])
    }

    /// Big-endian u16 at `pos`.
    pub fn get_u16(&self, pos: usize) -> Result<u16> {
        let at = self.check(pos, 2)?;
        Ok(u16::from_be_bytes([self.data[at], self.data[at + 1]]))
    }

    /// Big-endian u32 at `pos`.
    pub fn get_u32(&self, pos: usize) -> Result<u32> {
        let at = self.check(pos, 4)?;
        Ok(u32::from_be_bytes([
            self.data[at],
            self.data[at + 1],
            self.data[at + 2],
            self.data[at + 3],
        ]))
    }

    pub fn put_u8(&mut self, pos: usize, value: u8) -> Result<()> {
        let at = self.check(pos, 1)?;
        self.data[at] = value;
        Ok(())
    }

    pub fn put_u16(&mut self, pos: usize, value: u16) -> Result<()> {
        let at = self.check(pos, 2)?;
        self.data[at..at + 2].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn put_u32(&mut self, pos: usize, value: u32) -> Result<()> {
        let at = self.check(pos, 4)?;
        self.data[at..at + 4].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    /// Append at the write cursor.
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn append_u16(&mut self, value: u16) {
        self.append(&value.to_be_bytes());
    }

    pub fn append_u32(&mut self, value: u32) {
        self.append(&value.to_be_bytes());
    }

    /// Prepend `bytes` in front of the contents.
    ///
    /// Only valid in backward mode. Grows the headroom when it runs out.
    pub fn prepend(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.backward {
            return Err(CodecError::WrongDirection);
        }
        if self.start < bytes.len() {
            let grow = bytes.len() - self.start + DEFAULT_HEADROOM;
            let mut data = Vec::with_capacity(self.data.len() + grow);
            data.resize(grow, 0);
            data.extend_from_slice(&self.data);
            self.data = data;
            self.start += grow;
        }
        self.start -= bytes.len();
        self.data[self.start..self.start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_cursors() {
        let mut buf = NetBuffer::from_vec(vec![0xde, 0xad, 0xbe, 0xef, 1, 2]);
        assert_eq!(buf.get_u16(0).unwrap(), 0xdead);
        assert_eq!(buf.get_u32(0).unwrap(), 0xdeadbeef);

        buf.set_read_pos(4).unwrap();
        assert_eq!(buf.remaining(), &[1, 2]);
        assert_eq!(buf.remaining_len(), 2);

        assert!(buf.set_read_pos(7).is_err());
        assert!(buf.get_u32(4).is_err(), "u32 at 4 would cross the end");
    }

    #[test]
    fn test_prepend_requires_backward_mode() {
        let mut buf = NetBuffer::from_vec(b"payload".to_vec());
        assert_eq!(buf.prepend(&[1, 2]), Err(CodecError::WrongDirection));
    }

    #[test]
    fn test_prepend_stacks_headers_right_to_left() {
        let mut buf = NetBuffer::backward_with_payload(b"data");
        buf.prepend(&[2, 2]).unwrap();
        buf.prepend(&[1]).unwrap();
        assert_eq!(buf.as_slice(), &[1, 2, 2, b'd', b'a', b't', b'a']);
        assert_eq!(buf.headroom(), DEFAULT_HEADROOM - 3);
    }

    #[test]
    fn test_prepend_grows_headroom() {
        let mut buf = NetBuffer::backward(2);
        buf.append(b"xy");
        buf.prepend(&[9; 5]).unwrap();
        assert_eq!(buf.as_slice(), &[9, 9, 9, 9, 9, b'x', b'y']);
    }

    #[test]
    fn test_random_position_put() {
        let mut buf = NetBuffer::from_vec(vec![0; 8]);
        buf.put_u16(2, 0x1234).unwrap();
        buf.put_u32(4, 0xa0b0c0d0).unwrap();
        assert_eq!(buf.as_slice(), &[0, 0, 0x12, 0x34, 0xa0, 0xb0, 0xc0, 0xd0]);
        assert!(buf.put_u8(8, 1).is_err());
    }
}
