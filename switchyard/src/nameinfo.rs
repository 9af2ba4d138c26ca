//! Context-scoped name databases.
//!
//! A database maps names to fixed-format byte values, keyed by a type code
//! and a context prefix. Lookups from an element walk its compound scopes
//! from deepest to global: a `LAN` defined inside compound `c` shadows a
//! root-scope `LAN` for every element under `c/`. Routers own their
//! databases; the master carries a global fallback, pre-populated with the
//! conventional service-port and annotation tables.
//!
//! Typed access goes through [`NameValue`], which pairs a type code with an
//! encoding; information elements such as `AddressInfo` define values at
//! configure time.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use byteorder::{ByteOrder, NetworkEndian};
use serde::{Deserialize, Serialize};

use switchyard_packet::anno;

/// Database type codes.
pub mod db_type {
    /// Annotation offset/width table.
    pub const ANNOTATION: u32 = 1;
    /// Ethernet addresses.
    pub const ETHER_ADDR: u32 = 2;
    /// IPv4 addresses.
    pub const IP_ADDR: u32 = 3;
    /// IPv4 prefixes.
    pub const IP_PREFIX: u32 = 4;
    /// TCP port names.
    pub const TCP_PORT: u32 = 5;
    /// UDP port names.
    pub const UDP_PORT: u32 = 6;
    /// IPv6 addresses.
    pub const IP6_ADDR: u32 = 7;
    /// IPv6 prefixes.
    pub const IP6_PREFIX: u32 = 8;
}

/// A value storable in a name database: a type code plus a byte encoding.
pub trait NameValue: Sized {
    /// The database type this value lives in.
    const DB_TYPE: u32;
    /// Encodes the value.
    fn to_name_bytes(&self) -> Vec<u8>;
    /// Decodes a value; `None` on size or format mismatch.
    fn from_name_bytes(bytes: &[u8]) -> Option<Self>;
}

impl NameValue for Ipv4Addr {
    const DB_TYPE: u32 = db_type::IP_ADDR;
    fn to_name_bytes(&self) -> Vec<u8> {
        self.octets().to_vec()
    }
    fn from_name_bytes(bytes: &[u8]) -> Option<Self> {
        let octets: [u8; 4] = bytes.try_into().ok()?;
        Some(Ipv4Addr::from(octets))
    }
}

impl NameValue for Ipv6Addr {
    const DB_TYPE: u32 = db_type::IP6_ADDR;
    fn to_name_bytes(&self) -> Vec<u8> {
        self.octets().to_vec()
    }
    fn from_name_bytes(bytes: &[u8]) -> Option<Self> {
        let octets: [u8; 16] = bytes.try_into().ok()?;
        Some(Ipv6Addr::from(octets))
    }
}

/// An IPv4 prefix, `addr/len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpPrefix {
    /// The network address.
    pub addr: Ipv4Addr,
    /// The prefix length in bits.
    pub prefix_len: u8,
}

impl IpPrefix {
    /// The netmask corresponding to the prefix length.
    pub fn mask(&self) -> Ipv4Addr {
        let bits = if self.prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - self.prefix_len as u32)
        };
        Ipv4Addr::from(bits)
    }

    /// True when `addr` falls within the prefix.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let mask = u32::from(self.mask());
        u32::from(addr) & mask == u32::from(self.addr) & mask
    }
}

impl FromStr for IpPrefix {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s.split_once('/').ok_or_else(|| format!("bad prefix {:?}", s))?;
        let addr = addr.parse().map_err(|_| format!("bad prefix address {:?}", s))?;
        let prefix_len: u8 = len.parse().map_err(|_| format!("bad prefix length {:?}", s))?;
        if prefix_len > 32 {
            return Err(format!("bad prefix length {:?}", s));
        }
        Ok(IpPrefix { addr, prefix_len })
    }
}

impl std::fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

impl NameValue for IpPrefix {
    const DB_TYPE: u32 = db_type::IP_PREFIX;
    fn to_name_bytes(&self) -> Vec<u8> {
        let mut bytes = self.addr.octets().to_vec();
        bytes.push(self.prefix_len);
        bytes
    }
    fn from_name_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 5 || bytes[4] > 32 {
            return None;
        }
        Some(IpPrefix {
            addr: Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]),
            prefix_len: bytes[4],
        })
    }
}

/// An IPv6 prefix, `addr/len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ip6Prefix {
    /// The network address.
    pub addr: Ipv6Addr,
    /// The prefix length in bits.
    pub prefix_len: u8,
}

impl FromStr for Ip6Prefix {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s.split_once('/').ok_or_else(|| format!("bad prefix {:?}", s))?;
        let addr = addr.parse().map_err(|_| format!("bad prefix address {:?}", s))?;
        let prefix_len: u8 = len.parse().map_err(|_| format!("bad prefix length {:?}", s))?;
        if prefix_len > 128 {
            return Err(format!("bad prefix length {:?}", s));
        }
        Ok(Ip6Prefix { addr, prefix_len })
    }
}

impl std::fmt::Display for Ip6Prefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

impl NameValue for Ip6Prefix {
    const DB_TYPE: u32 = db_type::IP6_PREFIX;
    fn to_name_bytes(&self) -> Vec<u8> {
        let mut bytes = self.addr.octets().to_vec();
        bytes.push(self.prefix_len);
        bytes
    }
    fn from_name_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 17 || bytes[16] > 128 {
            return None;
        }
        let octets: [u8; 16] = bytes[..16].try_into().ok()?;
        Some(Ip6Prefix {
            addr: Ipv6Addr::from(octets),
            prefix_len: bytes[16],
        })
    }
}

/// A 48-bit Ethernet address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtherAddress(pub [u8; 6]);

impl FromStr for EtherAddress {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut n = 0;
        for part in s.split(':') {
            if n == 6 || part.len() > 2 || part.is_empty() {
                return Err(format!("bad Ethernet address {:?}", s));
            }
            octets[n] = u8::from_str_radix(part, 16).map_err(|_| format!("bad Ethernet address {:?}", s))?;
            n += 1;
        }
        if n != 6 {
            return Err(format!("bad Ethernet address {:?}", s));
        }
        Ok(EtherAddress(octets))
    }
}

impl std::fmt::Display for EtherAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl NameValue for EtherAddress {
    const DB_TYPE: u32 = db_type::ETHER_ADDR;
    fn to_name_bytes(&self) -> Vec<u8> {
        self.0.to_vec()
    }
    fn from_name_bytes(bytes: &[u8]) -> Option<Self> {
        Some(EtherAddress(bytes.try_into().ok()?))
    }
}

/// A named TCP port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpPort(pub u16);

impl NameValue for TcpPort {
    const DB_TYPE: u32 = db_type::TCP_PORT;
    fn to_name_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0; 2];
        NetworkEndian::write_u16(&mut bytes, self.0);
        bytes
    }
    fn from_name_bytes(bytes: &[u8]) -> Option<Self> {
        (bytes.len() == 2).then(|| TcpPort(NetworkEndian::read_u16(bytes)))
    }
}

/// A named UDP port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpPort(pub u16);

impl NameValue for UdpPort {
    const DB_TYPE: u32 = db_type::UDP_PORT;
    fn to_name_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0; 2];
        NetworkEndian::write_u16(&mut bytes, self.0);
        bytes
    }
    fn from_name_bytes(bytes: &[u8]) -> Option<Self> {
        (bytes.len() == 2).then(|| UdpPort(NetworkEndian::read_u16(bytes)))
    }
}

/// A named region of the packet annotation area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationSpec {
    /// Byte offset within the annotation area.
    pub offset: u8,
    /// Width in bytes.
    pub size: u8,
}

impl NameValue for AnnotationSpec {
    const DB_TYPE: u32 = db_type::ANNOTATION;
    fn to_name_bytes(&self) -> Vec<u8> {
        vec![self.offset, self.size]
    }
    fn from_name_bytes(bytes: &[u8]) -> Option<Self> {
        (bytes.len() == 2).then(|| AnnotationSpec { offset: bytes[0], size: bytes[1] })
    }
}

/// Dynamic databases self-sort once this many unsorted entries accumulate.
const DYNAMIC_SORT_THRESHOLD: usize = 8;

enum DbKind {
    /// Read-only, fully sorted.
    Static,
    /// Insertable; `entries[..sorted]` is sorted, the tail is insertion
    /// order.
    Dynamic { sorted: usize },
}

/// One database: a (type, context) scope of name-to-bytes entries.
struct NameDb {
    db_type: u32,
    context: String,
    entries: Vec<(String, Vec<u8>)>,
    kind: DbKind,
}

impl NameDb {
    fn query(&self, name: &str) -> Option<&[u8]> {
        let sorted = match self.kind {
            DbKind::Static => self.entries.len(),
            DbKind::Dynamic { sorted } => sorted,
        };
        if let Ok(i) = self.entries[..sorted].binary_search_by(|(n, _)| n.as_str().cmp(name)) {
            return Some(&self.entries[i].1);
        }
        self.entries[sorted..]
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    fn define(&mut self, name: &str, value: Vec<u8>) {
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| n == name) {
            entry.1 = value;
            return;
        }
        self.entries.push((name.to_owned(), value));
        if let DbKind::Dynamic { sorted } = &mut self.kind {
            if self.entries.len() - *sorted > DYNAMIC_SORT_THRESHOLD {
                self.entries.sort_by(|a, b| a.0.cmp(&b.0));
                *sorted = self.entries.len();
            }
        }
    }

    fn remove(&mut self, name: &str) -> bool {
        let Some(pos) = self.entries.iter().position(|(n, _)| n == name) else {
            return false;
        };
        self.entries.remove(pos);
        if let DbKind::Dynamic { sorted } = &mut self.kind {
            if pos < *sorted {
                *sorted -= 1;
            }
        }
        true
    }
}

/// A tree of name databases scoped by (type, context).
pub struct NameInfo {
    dbs: Vec<NameDb>,
}

impl NameInfo {
    /// Creates an empty set of databases.
    pub fn new() -> Self {
        NameInfo { dbs: Vec::new() }
    }

    /// Creates the global fallback databases: conventional TCP/UDP service
    /// names and the standard annotation layout.
    pub fn with_defaults() -> Self {
        let mut info = NameInfo::new();
        let services: &[(&str, u16)] = &[
            ("auth", 113),
            ("chargen", 19),
            ("daytime", 13),
            ("discard", 9),
            ("domain", 53),
            ("dns", 53),
            ("echo", 7),
            ("finger", 79),
            ("ftp", 21),
            ("http", 80),
            ("https", 443),
            ("imap", 143),
            ("imaps", 993),
            ("ntp", 123),
            ("pop3", 110),
            ("smtp", 25),
            ("ssh", 22),
            ("telnet", 23),
            ("tftp", 69),
            ("www", 80),
        ];
        for ty in [db_type::TCP_PORT, db_type::UDP_PORT] {
            let entries = services
                .iter()
                .map(|(name, port)| {
                    let mut bytes = vec![0; 2];
                    NetworkEndian::write_u16(&mut bytes, *port);
                    (name.to_string(), bytes)
                })
                .collect();
            info.install_static(ty, "", entries);
        }

        let annotations: &[(&str, u8, u8)] = &[
            ("AGGREGATE", anno::AGGREGATE as u8, 4),
            ("DST_IP", anno::DST_IP as u8, 4),
            ("DST_IP6", anno::DST_IP6 as u8, 16),
            ("FIX_IP_SRC", anno::FIX_IP_SRC as u8, 1),
            ("PACKET_COUNT", anno::PACKET_COUNT as u8, 4),
            ("PAINT", anno::PAINT as u8, 1),
            ("PARAM_OFF", anno::PARAM_OFF as u8, 1),
            ("SEQUENCE_NUMBER", anno::SEQUENCE_NUMBER as u8, 4),
        ];
        info.install_static(
            db_type::ANNOTATION,
            "",
            annotations
                .iter()
                .map(|(name, offset, size)| (name.to_string(), vec![*offset, *size]))
                .collect(),
        );
        info
    }

    /// The context prefix of an element's full name: `"a/b/c"` has context
    /// `"a/b"`, a top-level element the global context `""`.
    pub fn context_of(element_name: &str) -> &str {
        element_name.rfind('/').map(|pos| &element_name[..pos]).unwrap_or("")
    }

    fn parent_context(context: &str) -> Option<&str> {
        if context.is_empty() {
            None
        } else {
            Some(Self::context_of(context))
        }
    }

    fn db(&self, db_type: u32, context: &str) -> Option<&NameDb> {
        self.dbs
            .iter()
            .find(|db| db.db_type == db_type && db.context == context)
    }

    /// Installs a read-only database at `context`; entries are sorted here.
    pub fn install_static(&mut self, db_type: u32, context: &str, mut entries: Vec<(String, Vec<u8>)>) {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        self.dbs.push(NameDb {
            db_type,
            context: context.to_owned(),
            entries,
            kind: DbKind::Static,
        });
    }

    /// Defines `name` in the dynamic database at `context`, creating the
    /// database on first use. Shadows shallower scopes for elements below
    /// `context`.
    pub fn define(&mut self, db_type: u32, context: &str, name: &str, value: Vec<u8>) {
        let existing = self
            .dbs
            .iter_mut()
            .find(|db| db.db_type == db_type && db.context == context && matches!(db.kind, DbKind::Dynamic { .. }));
        match existing {
            Some(db) => db.define(name, value),
            None => {
                let mut db = NameDb {
                    db_type,
                    context: context.to_owned(),
                    entries: Vec::new(),
                    kind: DbKind::Dynamic { sorted: 0 },
                };
                db.define(name, value);
                self.dbs.push(db);
            }
        }
    }

    /// Defines a typed value in `context`.
    pub fn define_value<T: NameValue>(&mut self, context: &str, name: &str, value: &T) {
        self.define(T::DB_TYPE, context, name, value.to_name_bytes());
    }

    /// Removes `name` from the dynamic database at exactly `context`.
    /// Shallower definitions become visible again.
    pub fn remove(&mut self, db_type: u32, context: &str, name: &str) -> bool {
        self.dbs
            .iter_mut()
            .filter(|db| db.db_type == db_type && db.context == context && matches!(db.kind, DbKind::Dynamic { .. }))
            .any(|db| db.remove(name))
    }

    /// Looks `name` up for the element named `element_name`, walking its
    /// compound scopes from deepest to global. Returns the value from the
    /// deepest scope that has a binding.
    pub fn query(&self, db_type: u32, element_name: &str, name: &str) -> Option<Vec<u8>> {
        let mut context = Self::context_of(element_name);
        loop {
            // Dynamic definitions shadow static tables within one scope.
            let hit = self
                .dbs
                .iter()
                .filter(|db| db.db_type == db_type && db.context == context)
                .find_map(|db| db.query(name));
            if let Some(bytes) = hit {
                return Some(bytes.to_vec());
            }
            context = Self::parent_context(context)?;
        }
    }

    /// Typed lookup; see [`NameInfo::query`].
    pub fn query_value<T: NameValue>(&self, element_name: &str, name: &str) -> Option<T> {
        T::from_name_bytes(&self.query(T::DB_TYPE, element_name, name)?)
    }
}

impl Default for NameInfo {
    fn default() -> Self {
        Self::new()
    }
}
