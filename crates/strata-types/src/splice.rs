//! Binary cursor buffer.
//!
//! A [`Splice`] is a byte buffer with a single read/write cursor. Writers chain
//! typed appends that advance the cursor by the exact field width; readers pull
//! typed values back out in the same order. Every read checks the remaining
//! length first and reports [`SpliceError::TooShort`] rather than reading past
//! the end.
//!
//! Encoders pre-size the buffer to the known encoded length with
//! [`Splice::new`]. Writes past the end grow the buffer; reads never do.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::{
    magic_str, Id, Iv, Magic, Result, SpliceError, ADDR_BODY_LEN, ID_LEN, IV_LEN, MAGIC_LEN,
};

const V4_BODY_LEN: u8 = 6;
const V6_BODY_LEN: u8 = 18;

/// A byte buffer with a cursor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Splice {
    buf: Vec<u8>,
    cursor: usize,
}

impl Splice {
    /// A zeroed buffer of `len` bytes with the cursor at the start.
    pub fn new(len: usize) -> Self {
        Self {
            buf: vec![0u8; len],
            cursor: 0,
        }
    }

    /// Wrap received bytes for decoding.
    pub fn load(buf: Vec<u8>) -> Self {
        Self { buf, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor.min(self.buf.len());
    }

    /// Bytes from the cursor to the end of the buffer.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.cursor)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// The unread tail of the buffer.
    pub fn rest(&self) -> &[u8] {
        self.buf.get(self.cursor..).unwrap_or_default()
    }

    pub fn rest_mut(&mut self) -> &mut [u8] {
        let cursor = self.cursor;
        self.buf.get_mut(cursor..).unwrap_or_default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Drop everything before the cursor, making the unread tail the whole buffer.
    pub fn budge_up(mut self) -> Self {
        let cut = self.cursor.min(self.buf.len());
        self.buf.drain(..cut);
        self.cursor = 0;
        self
    }

    /// Fail with `TooShort` unless at least `required` bytes remain.
    pub fn check(&self, required: usize, magic: &[u8]) -> Result<()> {
        let available = self.remaining();
        if available < required {
            return Err(SpliceError::TooShort {
                available,
                required,
                magic: magic_str(magic),
            });
        }
        Ok(())
    }

    /// Return a writable window of `n` bytes at the cursor and advance past it.
    pub fn reserve(&mut self, n: usize) -> &mut [u8] {
        let start = self.cursor;
        let end = start + n;
        if self.buf.len() < end {
            self.buf.resize(end, 0);
        }
        self.cursor = end;
        &mut self.buf[start..end]
    }

    // ---- writers ----

    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.reserve(data.len()).copy_from_slice(data);
        self
    }

    pub fn magic(&mut self, magic: &Magic) -> &mut Self {
        self.bytes(magic)
    }

    pub fn id(&mut self, id: &Id) -> &mut Self {
        self.bytes(id.as_bytes())
    }

    pub fn iv(&mut self, iv: &Iv) -> &mut Self {
        self.bytes(iv)
    }

    pub fn byte(&mut self, b: u8) -> &mut Self {
        self.bytes(&[b])
    }

    pub fn uint16(&mut self, v: u16) -> &mut Self {
        self.bytes(&v.to_le_bytes())
    }

    pub fn uint32(&mut self, v: u32) -> &mut Self {
        self.bytes(&v.to_le_bytes())
    }

    pub fn uint64(&mut self, v: u64) -> &mut Self {
        self.bytes(&v.to_le_bytes())
    }

    /// A timestamp in unix seconds.
    pub fn time(&mut self, secs: u64) -> &mut Self {
        self.uint64(secs)
    }

    /// A socket address: length byte, address bytes and port, zero padded to
    /// a fixed width.
    pub fn addr(&mut self, addr: &SocketAddr) -> &mut Self {
        let mut body = [0u8; ADDR_BODY_LEN];
        let len = match addr.ip() {
            IpAddr::V4(ip) => {
                body[..4].copy_from_slice(&ip.octets());
                body[4..6].copy_from_slice(&addr.port().to_le_bytes());
                V4_BODY_LEN
            }
            IpAddr::V6(ip) => {
                body[..16].copy_from_slice(&ip.octets());
                body[16..18].copy_from_slice(&addr.port().to_le_bytes());
                V6_BODY_LEN
            }
        };
        self.byte(len).bytes(&body)
    }

    /// A variable-length byte string with a u32 length prefix.
    pub fn payload(&mut self, data: &[u8]) -> &mut Self {
        self.uint32(data.len() as u32).bytes(data)
    }

    // ---- readers ----

    /// The magic tag at the cursor, without consuming it.
    pub fn peek_magic(&self) -> Option<Magic> {
        let slice = self.buf.get(self.cursor..self.cursor + MAGIC_LEN)?;
        let mut magic = [0u8; MAGIC_LEN];
        magic.copy_from_slice(slice);
        Some(magic)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.check(N, b"splice")?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.cursor..self.cursor + N]);
        self.cursor += N;
        Ok(out)
    }

    /// Read `n` bytes into a new vector.
    pub fn read_vec(&mut self, n: usize) -> Result<Vec<u8>> {
        self.check(n, b"splice")?;
        let out = self.buf[self.cursor..self.cursor + n].to_vec();
        self.cursor += n;
        Ok(out)
    }

    pub fn read_magic(&mut self) -> Result<Magic> {
        self.read_array::<MAGIC_LEN>()
    }

    pub fn read_id(&mut self) -> Result<Id> {
        Ok(Id(self.read_array::<ID_LEN>()?))
    }

    pub fn read_iv(&mut self) -> Result<Iv> {
        self.read_array::<IV_LEN>()
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        let [b] = self.read_array::<1>()?;
        Ok(b)
    }

    pub fn read_uint16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_uint32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_uint64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_time(&mut self) -> Result<u64> {
        self.read_uint64()
    }

    pub fn read_addr(&mut self) -> Result<SocketAddr> {
        let len = self.read_byte()?;
        let body = self.read_array::<ADDR_BODY_LEN>()?;
        match len {
            V4_BODY_LEN => {
                let ip = Ipv4Addr::new(body[0], body[1], body[2], body[3]);
                let port = u16::from_le_bytes([body[4], body[5]]);
                Ok(SocketAddr::new(IpAddr::V4(ip), port))
            }
            V6_BODY_LEN => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&body[..16]);
                let port = u16::from_le_bytes([body[16], body[17]]);
                Ok(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
            }
            other => Err(SpliceError::InvalidAddress(other)),
        }
    }

    pub fn read_payload(&mut self) -> Result<Vec<u8>> {
        let len = self.read_uint32()? as usize;
        self.read_vec(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ADDR_LEN;

    #[test]
    fn test_typed_fields_roundtrip() {
        let id = Id([7u8; ID_LEN]);
        let iv = [9u8; IV_LEN];
        let v4: SocketAddr = "10.1.2.3:4567".parse().expect("addr");
        let v6: SocketAddr = "[2001:db8::1]:80".parse().expect("addr");

        let mut s = Splice::new(0);
        s.magic(b"test")
            .id(&id)
            .iv(&iv)
            .uint16(0xBEEF)
            .uint32(0xDEAD_BEEF)
            .uint64(u64::MAX)
            .time(1_700_000_000)
            .addr(&v4)
            .addr(&v6)
            .payload(b"hello");

        let mut r = Splice::load(s.into_bytes());
        assert_eq!(&r.read_magic().expect("magic"), b"test");
        assert_eq!(r.read_id().expect("id"), id);
        assert_eq!(r.read_iv().expect("iv"), iv);
        assert_eq!(r.read_uint16().expect("u16"), 0xBEEF);
        assert_eq!(r.read_uint32().expect("u32"), 0xDEAD_BEEF);
        assert_eq!(r.read_uint64().expect("u64"), u64::MAX);
        assert_eq!(r.read_time().expect("time"), 1_700_000_000);
        assert_eq!(r.read_addr().expect("v4"), v4);
        assert_eq!(r.read_addr().expect("v6"), v6);
        assert_eq!(r.read_payload().expect("payload"), b"hello");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_addr_fixed_width() {
        let mut s = Splice::new(0);
        s.addr(&"127.0.0.1:1".parse().expect("addr"));
        assert_eq!(s.len(), ADDR_LEN);
    }

    #[test]
    fn test_presized_writes_do_not_grow() {
        let mut s = Splice::new(12);
        s.uint32(1).uint64(2);
        assert_eq!(s.len(), 12);
        assert_eq!(s.cursor(), 12);
    }

    #[test]
    fn test_too_short_reports_sizes() {
        let mut s = Splice::load(vec![1, 2, 3]);
        let err = s.read_uint64().expect_err("short read");
        assert_eq!(
            err,
            SpliceError::TooShort {
                available: 3,
                required: 8,
                magic: "splice".into(),
            }
        );
        // A failed read leaves the cursor untouched.
        assert_eq!(s.cursor(), 0);
    }

    #[test]
    fn test_check_carries_magic() {
        let s = Splice::load(vec![0u8; 4]);
        match s.check(10, b"forw") {
            Err(SpliceError::TooShort { magic, .. }) => assert_eq!(magic, "forw"),
            other => assert!(other.is_err(), "expected TooShort, got {other:?}"),
        }
    }

    #[test]
    fn test_payload_length_overrun() {
        let mut s = Splice::new(0);
        s.uint32(100).bytes(b"abc");
        let mut r = Splice::load(s.into_bytes());
        assert!(r.read_payload().is_err());
    }

    #[test]
    fn test_bad_addr_length() {
        let mut s = Splice::new(0);
        s.byte(5).bytes(&[0u8; ADDR_BODY_LEN]);
        let mut r = Splice::load(s.into_bytes());
        assert_eq!(r.read_addr(), Err(SpliceError::InvalidAddress(5)));
    }

    #[test]
    fn test_peek_does_not_consume() {
        let s = Splice::load(b"forwrest".to_vec());
        assert_eq!(s.peek_magic(), Some(*b"forw"));
        assert_eq!(s.cursor(), 0);
        assert_eq!(Splice::load(b"fo".to_vec()).peek_magic(), None);
    }

    #[test]
    fn test_budge_up() {
        let mut s = Splice::load(b"headbody".to_vec());
        s.set_cursor(4);
        let s = s.budge_up();
        assert_eq!(s.as_bytes(), b"body");
        assert_eq!(s.cursor(), 0);
    }
}
