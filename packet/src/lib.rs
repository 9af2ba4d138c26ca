//! Refcounted packet buffers with headroom, header offsets, and annotations.
//!
//! A [`Packet`] is a view into a shared byte allocation. The view (the "data"
//! region) sits between a *headroom* and a *tailroom*, so that prepending or
//! appending a protocol header is usually just a pointer adjustment. Cloning a
//! packet shares the allocation; each clone carries its own annotation area
//! and header offsets. Mutation goes through [`Packet::uniqueify`], which
//! copies the allocation only when it is actually shared.
//!
//! # Examples
//!
//! ```
//! use switchyard_packet::Packet;
//!
//! let mut p = Packet::new(100).unwrap();
//! assert_eq!(p.len(), 100);
//! assert!(p.headroom() >= Packet::DEFAULT_HEADROOM);
//!
//! // A clone shares the data but not the annotations.
//! let mut q = p.clone();
//! assert!(p.shared() && q.shared());
//! q.set_anno_u8(0, 77);
//! assert_eq!(p.anno_u8(0), 0);
//!
//! // Writing forces a private copy.
//! q.uniqueify();
//! assert!(!q.shared());
//! q.data_mut()[0] = 1;
//! assert_eq!(p.data()[0], 0);
//! ```
#![forbid(missing_docs)]

use std::sync::Arc;
use std::time::SystemTime;

use byteorder::{ByteOrder, NativeEndian, NetworkEndian};

/// Conventional annotation byte offsets shared by cooperating elements.
///
/// The annotation area is an untyped scratchpad; these offsets are the layout
/// convention the standard elements agree on. User elements may claim further
/// space through an annotation name database.
pub mod anno {
    /// Destination IPv4 address, network order (4 bytes).
    pub const DST_IP: usize = 0;
    /// Destination IPv6 address (16 bytes, shadows `DST_IP`).
    pub const DST_IP6: usize = 0;
    /// Paint byte, used by Paint/CheckPaint-style elements.
    pub const PAINT: usize = 16;
    /// ICMP parameter-problem pointer (1 byte).
    pub const PARAM_OFF: usize = 17;
    /// Fix-IP-source flag byte.
    pub const FIX_IP_SRC: usize = 18;
    /// Aggregate identifier, native order (4 bytes).
    pub const AGGREGATE: usize = 20;
    /// Packet-count annotation, native order (4 bytes).
    pub const PACKET_COUNT: usize = 24;
    /// Sequence-number annotation, native order (4 bytes).
    pub const SEQUENCE_NUMBER: usize = 28;
    /// First byte available for user elements.
    pub const USER: usize = 32;
}

/// Size in bytes of the per-packet annotation area.
pub const ANNO_SIZE: usize = 48;

/// Per-packet metadata: header offsets, timestamp, annotation bytes.
///
/// Always exclusively owned, even when the data buffer is shared.
#[derive(Clone)]
struct Anno {
    /// Offsets are absolute positions in the backing buffer, `usize::MAX`
    /// when unset, so they survive `pull`/`push` adjustments of the data
    /// region without rewriting.
    mac: usize,
    network: usize,
    transport: usize,
    timestamp: Option<SystemTime>,
    bytes: [u8; ANNO_SIZE],
}

impl Anno {
    fn new() -> Self {
        Anno {
            mac: usize::MAX,
            network: usize::MAX,
            transport: usize::MAX,
            timestamp: None,
            bytes: [0; ANNO_SIZE],
        }
    }

    fn shift(&mut self, delta: isize) {
        for off in [&mut self.mac, &mut self.network, &mut self.transport] {
            if *off != usize::MAX {
                *off = off.wrapping_add_signed(delta);
            }
        }
    }
}

/// A packet: a refcounted byte allocation, a data region within it, and an
/// exclusively owned annotation area.
pub struct Packet {
    buffer: Arc<Vec<u8>>,
    /// Data region is `buffer[start .. start + len]`.
    start: usize,
    len: usize,
    anno: Anno,
}

impl Packet {
    /// Headroom reserved in front of the data by the plain constructors.
    pub const DEFAULT_HEADROOM: usize = 128;
    /// Buffer sizes are rounded up to a multiple of this.
    const MIN_BUFFER_SIZE: usize = 64;

    fn alloc(headroom: usize, len: usize, tailroom: usize) -> Option<Packet> {
        let want = headroom.checked_add(len)?.checked_add(tailroom)?;
        if want > isize::MAX as usize / 2 {
            return None;
        }
        let size = want.div_ceil(Self::MIN_BUFFER_SIZE) * Self::MIN_BUFFER_SIZE;
        let size = size.max(Self::MIN_BUFFER_SIZE);
        Some(Packet {
            buffer: Arc::new(vec![0; size]),
            start: headroom,
            len,
            anno: Anno::new(),
        })
    }

    /// Creates a zero-filled packet of `len` data bytes with default headroom.
    ///
    /// Returns `None` when the requested size cannot be represented; callers
    /// are expected to drop rather than panic.
    pub fn new(len: usize) -> Option<Packet> {
        Self::alloc(Self::DEFAULT_HEADROOM, len, 0)
    }

    /// Creates a packet with explicit headroom and tailroom.
    pub fn with_rooms(headroom: usize, len: usize, tailroom: usize) -> Option<Packet> {
        Self::alloc(headroom, len, tailroom)
    }

    /// Creates a packet whose data region is a copy of `data`.
    pub fn from_data(data: &[u8]) -> Option<Packet> {
        let mut p = Self::alloc(Self::DEFAULT_HEADROOM, data.len(), 0)?;
        Arc::get_mut(&mut p.buffer).unwrap()[p.start..p.start + p.len].copy_from_slice(data);
        Some(p)
    }

    /// Length of the data region.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the data region is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes before the data region available for `push`.
    pub fn headroom(&self) -> usize {
        self.start
    }

    /// Bytes after the data region available for `put`.
    pub fn tailroom(&self) -> usize {
        self.buffer.len() - self.start - self.len
    }

    /// The data region.
    pub fn data(&self) -> &[u8] {
        &self.buffer[self.start..self.start + self.len]
    }

    /// True when another packet shares this packet's allocation.
    pub fn shared(&self) -> bool {
        Arc::strong_count(&self.buffer) > 1
    }

    /// Ensures exclusive ownership of the allocation, copying it if shared.
    ///
    /// After this call `data_mut` will not copy. Header offsets and
    /// annotations are preserved.
    pub fn uniqueify(&mut self) {
        if self.shared() {
            self.buffer = Arc::new(self.buffer.as_ref().clone());
        }
    }

    /// Mutable access to the data region, copying the allocation if shared.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.uniqueify();
        let (start, len) = (self.start, self.len);
        &mut Arc::get_mut(&mut self.buffer).expect("unshared after uniqueify")[start..start + len]
    }

    /// Reallocates into a fresh buffer with at least the requested rooms.
    fn expand(&mut self, headroom: usize, tailroom: usize) -> bool {
        let Some(mut fresh) = Self::alloc(headroom, self.len, tailroom) else {
            return false;
        };
        let dst = Arc::get_mut(&mut fresh.buffer).unwrap();
        dst[fresh.start..fresh.start + self.len].copy_from_slice(self.data());
        let delta = fresh.start as isize - self.start as isize;
        fresh.anno = self.anno.clone();
        fresh.anno.shift(delta);
        *self = fresh;
        true
    }

    /// Prepends `n` bytes to the data region, growing into the headroom.
    ///
    /// Uniqueifies, and reallocates with fresh headroom when the current
    /// headroom is too small. Returns false only on allocation failure.
    pub fn push(&mut self, n: usize) -> bool {
        if n > self.start && !self.expand(n + Self::DEFAULT_HEADROOM, self.tailroom()) {
            return false;
        }
        self.uniqueify();
        self.start -= n;
        self.len += n;
        true
    }

    /// Removes `n` bytes from the front of the data region.
    ///
    /// `n` is capped at the data length.
    pub fn pull(&mut self, n: usize) {
        let n = n.min(self.len);
        self.start += n;
        self.len -= n;
    }

    /// Appends `n` zero bytes at the back, growing into the tailroom.
    pub fn put(&mut self, n: usize) -> bool {
        if n > self.tailroom() && !self.expand(self.start, n + Self::MIN_BUFFER_SIZE) {
            return false;
        }
        self.uniqueify();
        let end = self.start + self.len;
        Arc::get_mut(&mut self.buffer).expect("unshared after uniqueify")[end..end + n].fill(0);
        self.len += n;
        true
    }

    /// Removes `n` bytes from the back of the data region.
    pub fn take(&mut self, n: usize) {
        self.len -= n.min(self.len);
    }

    /// Shortens the data region to `len` bytes, if it is longer.
    pub fn truncate(&mut self, len: usize) {
        if len < self.len {
            self.len = len;
        }
    }

    // --- header offsets ---
    //
    // Offsets are expressed relative to the data start in the public API and
    // must satisfy mac <= network <= transport <= len when all are set.

    /// Marks the link-layer header at `offset` bytes into the data.
    pub fn set_mac_header(&mut self, offset: usize) {
        assert!(offset <= self.len);
        self.anno.mac = self.start + offset;
    }

    /// Marks the network-layer header, and the transport header right after
    /// `header_len` bytes.
    pub fn set_network_header(&mut self, offset: usize, header_len: usize) {
        assert!(offset + header_len <= self.len);
        self.anno.network = self.start + offset;
        self.anno.transport = self.start + offset + header_len;
    }

    fn header_at(&self, abs: usize) -> Option<&[u8]> {
        let end = self.start + self.len;
        if abs == usize::MAX || abs < self.start || abs > end {
            None
        } else {
            Some(&self.buffer[abs..end])
        }
    }

    /// Link-layer header through the end of the data, when marked.
    pub fn mac_header(&self) -> Option<&[u8]> {
        self.header_at(self.anno.mac)
    }

    /// Network-layer header through the end of the data, when marked.
    pub fn network_header(&self) -> Option<&[u8]> {
        self.header_at(self.anno.network)
    }

    /// Transport-layer header through the end of the data, when marked.
    pub fn transport_header(&self) -> Option<&[u8]> {
        self.header_at(self.anno.transport)
    }

    /// Offset of the network header from the data start, when marked and in
    /// range.
    pub fn network_header_offset(&self) -> Option<usize> {
        self.header_at(self.anno.network).map(|_| self.anno.network - self.start)
    }

    // --- timestamp ---

    /// Timestamp annotation, if one has been set.
    pub fn timestamp(&self) -> Option<SystemTime> {
        self.anno.timestamp
    }

    /// Sets the timestamp annotation.
    pub fn set_timestamp(&mut self, when: SystemTime) {
        self.anno.timestamp = Some(when);
    }

    // --- annotation area ---

    /// Reads one annotation byte.
    pub fn anno_u8(&self, offset: usize) -> u8 {
        self.anno.bytes[offset]
    }

    /// Writes one annotation byte.
    pub fn set_anno_u8(&mut self, offset: usize, value: u8) {
        self.anno.bytes[offset] = value;
    }

    /// Reads a native-order u16 annotation.
    pub fn anno_u16(&self, offset: usize) -> u16 {
        NativeEndian::read_u16(&self.anno.bytes[offset..offset + 2])
    }

    /// Writes a native-order u16 annotation.
    pub fn set_anno_u16(&mut self, offset: usize, value: u16) {
        NativeEndian::write_u16(&mut self.anno.bytes[offset..offset + 2], value);
    }

    /// Reads a native-order u32 annotation.
    pub fn anno_u32(&self, offset: usize) -> u32 {
        NativeEndian::read_u32(&self.anno.bytes[offset..offset + 4])
    }

    /// Writes a native-order u32 annotation.
    pub fn set_anno_u32(&mut self, offset: usize, value: u32) {
        NativeEndian::write_u32(&mut self.anno.bytes[offset..offset + 4], value);
    }

    /// Reads a network-order u32 annotation (addresses, for example).
    pub fn anno_net_u32(&self, offset: usize) -> u32 {
        NetworkEndian::read_u32(&self.anno.bytes[offset..offset + 4])
    }

    /// Writes a network-order u32 annotation.
    pub fn set_anno_net_u32(&mut self, offset: usize, value: u32) {
        NetworkEndian::write_u32(&mut self.anno.bytes[offset..offset + 4], value);
    }

    /// The whole annotation area.
    pub fn anno_bytes(&self) -> &[u8; ANNO_SIZE] {
        &self.anno.bytes
    }

    /// Mutable access to the whole annotation area.
    pub fn anno_bytes_mut(&mut self) -> &mut [u8; ANNO_SIZE] {
        &mut self.anno.bytes
    }

    /// Clears annotations, header marks, and the timestamp.
    pub fn clear_annotations(&mut self) {
        self.anno = Anno::new();
    }
}

impl Clone for Packet {
    /// Shares the data allocation; annotations and header marks are copied
    /// and thereafter independent.
    fn clone(&self) -> Self {
        Packet {
            buffer: Arc::clone(&self.buffer),
            start: self.start,
            len: self.len,
            anno: self.anno.clone(),
        }
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.len)
            .field("headroom", &self.headroom())
            .field("tailroom", &self.tailroom())
            .field("shared", &self.shared())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rooms_and_push_pull() {
        let mut p = Packet::new(10).unwrap();
        assert_eq!(p.headroom(), Packet::DEFAULT_HEADROOM);
        assert!(p.push(14));
        assert_eq!(p.len(), 24);
        p.pull(14);
        assert_eq!(p.len(), 10);
        assert!(p.put(6));
        assert_eq!(p.len(), 16);
        p.take(16);
        assert!(p.is_empty());
    }

    #[test]
    fn push_beyond_headroom_reallocates() {
        let mut p = Packet::with_rooms(4, 8, 0).unwrap();
        p.data_mut().copy_from_slice(&[9; 8]);
        assert!(p.push(100));
        assert_eq!(p.len(), 108);
        assert_eq!(&p.data()[100..], &[9; 8]);
    }

    #[test]
    fn clone_shares_data_not_annotations() {
        let mut p = Packet::from_data(&[1, 2, 3, 4]).unwrap();
        p.set_anno_u32(anno::AGGREGATE, 42);
        let mut q = p.clone();
        assert!(p.shared());
        assert_eq!(q.anno_u32(anno::AGGREGATE), 42);
        q.set_anno_u32(anno::AGGREGATE, 7);
        assert_eq!(p.anno_u32(anno::AGGREGATE), 42);

        // Clone-on-write leaves the original untouched.
        q.data_mut()[0] = 99;
        assert_eq!(p.data()[0], 1);
        assert!(!q.shared());
        assert!(!p.shared());
    }

    #[test]
    fn header_offsets_survive_pull() {
        let mut p = Packet::new(64).unwrap();
        p.set_mac_header(0);
        p.set_network_header(14, 20);
        p.pull(14);
        // The network header mark still points at the same buffer position.
        assert_eq!(p.network_header().unwrap().len(), 50);
        assert_eq!(p.network_header_offset(), Some(0));
        assert_eq!(p.transport_header().unwrap().len(), 30);
        // The mac mark now lies before the data region.
        assert!(p.mac_header().is_none());
    }

    #[test]
    fn header_offsets_survive_expand() {
        let mut p = Packet::with_rooms(0, 40, 0).unwrap();
        p.set_network_header(8, 20);
        assert!(p.push(16));
        assert_eq!(p.network_header_offset(), Some(24));
        assert_eq!(p.network_header().unwrap().len(), 48);
    }

    #[test]
    fn network_order_annotations() {
        let mut p = Packet::new(1).unwrap();
        p.set_anno_net_u32(anno::DST_IP, 0x0a000001);
        assert_eq!(p.anno_bytes()[0..4], [10, 0, 0, 1]);
        assert_eq!(p.anno_net_u32(anno::DST_IP), 0x0a000001);
    }

    #[test]
    fn oversized_allocations_fail() {
        assert!(Packet::new(usize::MAX).is_none());
        assert!(Packet::with_rooms(usize::MAX, 1, usize::MAX).is_none());
    }
}
