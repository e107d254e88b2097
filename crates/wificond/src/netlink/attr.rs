//! Netlink attribute (nlattr) encoding and decoding.
//!
//! Attributes are type-length-value records: a 2-byte length (header plus
//! payload, padding excluded), a 2-byte type, then the payload. Consecutive
//! attributes start on 4-byte boundaries, so a writer pads after each one and
//! a reader advances by the aligned length.
//!
//! Payloads received from the kernel are untrusted. Every reader in this
//! module checks a declared length against the bytes actually present before
//! slicing.

use super::error::{Error, Result};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Netlink attribute alignment.
pub const NLA_ALIGNTO: usize = 4;

/// Align a length to NLA_ALIGNTO boundary.
#[inline]
pub const fn nla_align(len: usize) -> usize {
    (len + NLA_ALIGNTO - 1) & !(NLA_ALIGNTO - 1)
}

/// Size of the attribute header.
pub const NLA_HDRLEN: usize = 4;

/// Largest payload an attribute can declare.
pub const NLA_MAX_PAYLOAD: usize = u16::MAX as usize - NLA_HDRLEN;

/// Attribute type flags.
pub const NLA_F_NESTED: u16 = 1 << 15;
pub const NLA_F_NET_BYTEORDER: u16 = 1 << 14;
pub const NLA_TYPE_MASK: u16 = !(NLA_F_NESTED | NLA_F_NET_BYTEORDER);

/// Netlink attribute header (mirrors struct nlattr).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NlAttr {
    /// Length including header, excluding trailing padding.
    pub nla_len: u16,
    /// Attribute type, possibly carrying NLA_F_* flags.
    pub nla_type: u16,
}

impl NlAttr {
    /// Get the attribute type without flags.
    pub fn kind(&self) -> u16 {
        self.nla_type & NLA_TYPE_MASK
    }

    /// Check if the nested flag is set.
    pub fn is_nested(&self) -> bool {
        self.nla_type & NLA_F_NESTED != 0
    }

    /// Get the payload length (total length minus header).
    pub fn payload_len(&self) -> usize {
        (self.nla_len as usize).saturating_sub(NLA_HDRLEN)
    }

    /// Read a header from the start of `data`.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::read_from_prefix(data)
            .map(|(hdr, _)| hdr)
            .map_err(|_| Error::Truncated {
                expected: NLA_HDRLEN,
                actual: data.len(),
            })
    }
}

/// A value that can be carried as an attribute payload.
///
/// Integers use host byte order, as nl80211 does. Decoding is strict: a
/// payload whose length differs from the type's width is rejected.
pub trait AttrValue: Sized {
    /// Encode into payload bytes.
    fn to_payload(&self) -> Vec<u8>;

    /// Decode from payload bytes.
    fn from_payload(payload: &[u8]) -> Result<Self>;
}

macro_rules! impl_attr_value_int {
    ($($ty:ty),*) => {
        $(
            impl AttrValue for $ty {
                fn to_payload(&self) -> Vec<u8> {
                    self.to_ne_bytes().to_vec()
                }

                fn from_payload(payload: &[u8]) -> Result<Self> {
                    let bytes: [u8; std::mem::size_of::<$ty>()] =
                        payload.try_into().map_err(|_| {
                            Error::InvalidAttribute(format!(
                                "expected {} byte {} payload, got {} bytes",
                                std::mem::size_of::<$ty>(),
                                stringify!($ty),
                                payload.len()
                            ))
                        })?;
                    Ok(<$ty>::from_ne_bytes(bytes))
                }
            }
        )*
    };
}

impl_attr_value_int!(u8, u16, u32, u64, i8, i16, i32, i64);

impl AttrValue for bool {
    fn to_payload(&self) -> Vec<u8> {
        vec![u8::from(*self)]
    }

    fn from_payload(payload: &[u8]) -> Result<Self> {
        u8::from_payload(payload).map(|b| b != 0)
    }
}

impl AttrValue for Vec<u8> {
    fn to_payload(&self) -> Vec<u8> {
        self.clone()
    }

    fn from_payload(payload: &[u8]) -> Result<Self> {
        Ok(payload.to_vec())
    }
}

/// Strings are written NUL-terminated; trailing NULs are stripped on read.
impl AttrValue for String {
    fn to_payload(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.len() + 1);
        data.extend_from_slice(self.as_bytes());
        data.push(0);
        data
    }

    fn from_payload(payload: &[u8]) -> Result<Self> {
        get::string(payload).map(str::to_owned)
    }
}

/// An encoded attribute: header followed by payload.
///
/// Containers hold their children back to back, each padded to 4 bytes,
/// and the header length always covers everything appended so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    buf: Vec<u8>,
}

impl Attribute {
    /// Build an attribute from a raw payload.
    pub fn new(kind: u16, payload: &[u8]) -> Result<Self> {
        if payload.len() > NLA_MAX_PAYLOAD {
            return Err(Error::InvalidAttribute(format!(
                "payload of {} bytes does not fit attribute {}",
                payload.len(),
                kind
            )));
        }
        let mut buf = Vec::with_capacity(NLA_HDRLEN + payload.len());
        let hdr = NlAttr {
            nla_len: (NLA_HDRLEN + payload.len()) as u16,
            nla_type: kind,
        };
        buf.extend_from_slice(hdr.as_bytes());
        buf.extend_from_slice(payload);
        Ok(Self { buf })
    }

    /// Build a scalar, string or byte-string attribute.
    pub fn encode<T: AttrValue>(kind: u16, value: &T) -> Result<Self> {
        Self::new(kind, &value.to_payload())
    }

    /// Build a zero-length flag attribute.
    pub fn flag(kind: u16) -> Self {
        let hdr = NlAttr {
            nla_len: NLA_HDRLEN as u16,
            nla_type: kind,
        };
        Self {
            buf: hdr.as_bytes().to_vec(),
        }
    }

    /// Start an empty container attribute.
    pub fn nested(kind: u16) -> Self {
        Self::flag(kind | NLA_F_NESTED)
    }

    /// Copy one attribute out of `data`, which must start with its header.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let hdr = NlAttr::from_bytes(data)?;
        let len = hdr.nla_len as usize;
        if len < NLA_HDRLEN {
            return Err(Error::InvalidAttribute(format!(
                "declared length {} shorter than header",
                len
            )));
        }
        if len > data.len() {
            return Err(Error::Truncated {
                expected: len,
                actual: data.len(),
            });
        }
        Ok(Self {
            buf: data[..len].to_vec(),
        })
    }

    /// Append a child and grow the declared length to cover it.
    ///
    /// The child is placed at the next 4-byte boundary. On overflow of the
    /// 16-bit length field the container is left unchanged.
    pub fn add_child(&mut self, child: &Attribute) -> Result<()> {
        let start = nla_align(self.buf.len());
        let new_len = start + child.buf.len();
        if new_len > u16::MAX as usize {
            return Err(Error::InvalidAttribute(format!(
                "container {} would exceed {} bytes",
                self.kind(),
                u16::MAX
            )));
        }
        self.buf.resize(start, 0);
        self.buf.extend_from_slice(&child.buf);
        self.set_len(new_len);
        Ok(())
    }

    fn set_len(&mut self, len: usize) {
        self.buf[..2].copy_from_slice(&(len as u16).to_ne_bytes());
    }

    fn header(&self) -> NlAttr {
        // `buf` always starts with a header written by a constructor.
        NlAttr::from_bytes(&self.buf).unwrap_or_default()
    }

    /// Attribute type without flags.
    pub fn kind(&self) -> u16 {
        self.header().kind()
    }

    /// Whether the nested flag is set.
    pub fn is_nested(&self) -> bool {
        self.header().is_nested()
    }

    /// Declared length (header plus payload).
    pub fn len(&self) -> usize {
        self.header().nla_len as usize
    }

    /// True if the attribute carries no payload.
    pub fn is_empty(&self) -> bool {
        self.len() <= NLA_HDRLEN
    }

    /// The payload region.
    pub fn payload(&self) -> &[u8] {
        let end = self.len().min(self.buf.len());
        &self.buf[NLA_HDRLEN.min(end)..end]
    }

    /// Encoded bytes, without trailing padding.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Decode the payload as a typed value.
    pub fn value<T: AttrValue>(&self) -> Result<T> {
        T::from_payload(self.payload())
    }

    /// Iterate over the children of a container.
    pub fn children(&self) -> AttrIter<'_> {
        AttrIter::new(self.payload())
    }

    /// Find a direct child by type and return its payload.
    pub fn find_child(&self, kind: u16) -> Option<&[u8]> {
        find(self.payload(), kind)
    }

    /// Find a direct child and decode it as a typed value.
    pub fn child_value<T: AttrValue>(&self, kind: u16) -> Option<T> {
        find_value(self.payload(), kind)
    }
}

/// Decode a single attribute at the start of `bytes` if it has type `kind`.
///
/// Returns `None` if the header is short, the declared length runs past the
/// buffer, the type differs, or the payload width does not match `T`.
pub fn decode_typed<T: AttrValue>(bytes: &[u8], kind: u16) -> Option<T> {
    let hdr = NlAttr::from_bytes(bytes).ok()?;
    let len = hdr.nla_len as usize;
    if len < NLA_HDRLEN || len > bytes.len() || hdr.kind() != kind {
        return None;
    }
    T::from_payload(&bytes[NLA_HDRLEN..len]).ok()
}

/// Linear scan of an attribute region for the first attribute of type `kind`.
pub fn find(data: &[u8], kind: u16) -> Option<&[u8]> {
    AttrIter::new(data).find(|(k, _)| *k == kind).map(|(_, p)| p)
}

/// Find an attribute and decode its payload.
pub fn find_value<T: AttrValue>(data: &[u8], kind: u16) -> Option<T> {
    find(data, kind).and_then(|p| T::from_payload(p).ok())
}

/// Iterator over netlink attributes in a buffer.
///
/// Stops at the first attribute whose declared length is shorter than a
/// header or runs past the end of the buffer.
pub struct AttrIter<'a> {
    data: &'a [u8],
    truncated: bool,
}

impl<'a> AttrIter<'a> {
    /// Create a new attribute iterator.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            truncated: false,
        }
    }

    /// Check if there are no more attributes.
    pub fn is_empty(&self) -> bool {
        self.data.len() < NLA_HDRLEN
    }

    /// True once iteration hit a malformed length.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

impl<'a> Iterator for AttrIter<'a> {
    /// Returns (attribute type, payload data).
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < NLA_HDRLEN {
            return None;
        }

        let attr = NlAttr::from_bytes(self.data).ok()?;
        let len = attr.nla_len as usize;
        if len < NLA_HDRLEN || len > self.data.len() {
            self.truncated = true;
            self.data = &[];
            return None;
        }

        let payload = &self.data[NLA_HDRLEN..len];
        let aligned_len = nla_align(len);
        self.data = self.data.get(aligned_len..).unwrap_or(&[]);

        Some((attr.kind(), payload))
    }
}

/// Helper functions for extracting typed values from attribute payloads.
pub mod get {
    use super::*;

    /// Extract a u8 value.
    pub fn u8(data: &[u8]) -> Result<u8> {
        <u8 as AttrValue>::from_payload(data)
    }

    /// Extract an i8 value.
    pub fn i8(data: &[u8]) -> Result<i8> {
        <i8 as AttrValue>::from_payload(data)
    }

    /// Extract a u16 value (native endian).
    pub fn u16(data: &[u8]) -> Result<u16> {
        <u16 as AttrValue>::from_payload(data)
    }

    /// Extract a u32 value (native endian).
    pub fn u32(data: &[u8]) -> Result<u32> {
        <u32 as AttrValue>::from_payload(data)
    }

    /// Extract a u64 value (native endian).
    pub fn u64(data: &[u8]) -> Result<u64> {
        <u64 as AttrValue>::from_payload(data)
    }

    /// Extract an i32 value (native endian).
    pub fn i32(data: &[u8]) -> Result<i32> {
        <i32 as AttrValue>::from_payload(data)
    }

    /// Extract a null-terminated string.
    pub fn string(data: &[u8]) -> Result<&str> {
        let len = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        std::str::from_utf8(&data[..len])
            .map_err(|e| Error::InvalidAttribute(format!("invalid UTF-8: {}", e)))
    }

    /// Extract a fixed-size byte array such as a MAC address.
    pub fn array<const N: usize>(data: &[u8]) -> Result<[u8; N]> {
        data.try_into().map_err(|_| {
            Error::InvalidAttribute(format!("expected {} bytes, got {}", N, data.len()))
        })
    }
}
