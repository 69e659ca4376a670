use bytes::{Buf, BufMut};

use crate::errors::{Error, Result};

/// Byte order used when marshalling records to and from the kernel.
///
/// The kernel expects host order; other orders exist so that the codec
/// can be exercised for either layout on any machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// The byte order of the machine this crate was compiled for.
    #[inline]
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }
}

impl Default for ByteOrder {
    #[inline(always)]
    fn default() -> Self {
        Self::native()
    }
}

pub struct Encoder<B> {
    buf: B,
    order: ByteOrder,
}

impl<B: BufMut> Encoder<B> {
    pub fn new(buf: B, order: ByteOrder) -> Self {
        Self { buf, order }
    }

    pub fn into_inner(self) -> B {
        self.buf
    }

    #[inline]
    pub fn u32(&mut self, v: u32) {
        match self.order {
            ByteOrder::Little => self.buf.put_u32_le(v),
            ByteOrder::Big => self.buf.put_u32(v),
        }
    }

    #[inline]
    pub fn i32(&mut self, v: i32) {
        match self.order {
            ByteOrder::Little => self.buf.put_i32_le(v),
            ByteOrder::Big => self.buf.put_i32(v),
        }
    }

    #[inline]
    pub fn u64(&mut self, v: u64) {
        match self.order {
            ByteOrder::Little => self.buf.put_u64_le(v),
            ByteOrder::Big => self.buf.put_u64(v),
        }
    }

    #[inline]
    pub fn bytes(&mut self, v: &[u8]) {
        self.buf.put_slice(v);
    }

    #[inline]
    pub fn zeros(&mut self, n: usize) {
        self.buf.put_bytes(0, n);
    }
}

pub struct Decoder<B> {
    buf: B,
    order: ByteOrder,
}

impl<B: Buf> Decoder<B> {
    pub fn new(buf: B, order: ByteOrder) -> Self {
        Self { buf, order }
    }

    #[inline]
    pub fn u32(&mut self) -> u32 {
        match self.order {
            ByteOrder::Little => self.buf.get_u32_le(),
            ByteOrder::Big => self.buf.get_u32(),
        }
    }

    #[inline]
    pub fn i32(&mut self) -> i32 {
        match self.order {
            ByteOrder::Little => self.buf.get_i32_le(),
            ByteOrder::Big => self.buf.get_i32(),
        }
    }

    #[inline]
    pub fn u64(&mut self) -> u64 {
        match self.order {
            ByteOrder::Little => self.buf.get_u64_le(),
            ByteOrder::Big => self.buf.get_u64(),
        }
    }

    #[inline]
    pub fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0; N];
        self.buf.copy_to_slice(&mut out);
        out
    }

    #[inline]
    pub fn skip(&mut self, n: usize) {
        self.buf.advance(n);
    }
}

/// A kernel ABI structure with a fixed wire size.
///
/// Implementations write and read every field in declaration order,
/// padding included; `put` must emit exactly `SIZE` bytes and `get`
/// must consume exactly `SIZE` bytes.
pub trait Record: Sized {
    /// Wire size in bytes.
    const SIZE: usize;
    /// The kernel's name for the structure, used in error reports.
    const NAME: &'static str;

    fn put<B: BufMut>(&self, enc: &mut Encoder<B>);

    fn get<B: Buf>(dec: &mut Decoder<B>) -> Self;

    fn encode(&self, order: ByteOrder) -> Vec<u8> {
        let mut enc = Encoder::new(Vec::with_capacity(Self::SIZE), order);
        self.put(&mut enc);
        let buf = enc.into_inner();
        debug_assert_eq!(buf.len(), Self::SIZE, "{} encoded to wrong size", Self::NAME);
        buf
    }

    fn encode_into(&self, out: &mut [u8], order: ByteOrder) -> Result<()> {
        check_size::<Self>(out.len())?;
        let mut enc = Encoder::new(out, order);
        self.put(&mut enc);
        Ok(())
    }

    fn decode(buf: &[u8], order: ByteOrder) -> Result<Self> {
        check_size::<Self>(buf.len())?;
        Ok(Self::get(&mut Decoder::new(buf, order)))
    }
}

#[inline]
fn check_size<R: Record>(actual: usize) -> Result<()> {
    if actual != R::SIZE {
        return Err(Error::SizeMismatch {
            record: R::NAME,
            expected: R::SIZE,
            actual,
        });
    }
    Ok(())
}
