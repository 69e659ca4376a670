//! NUL padded strings as the kernel stores them in its fixed size records.

use std::borrow::Cow;

use bstr::{BStr, ByteSlice};

/// A string of at most `N - 1` bytes, stored NUL padded in an `N` byte array.
///
/// The bytes are kept exactly as the kernel supplied them (including
/// anything after the first NUL) so that a decoded record encodes back
/// to the same bytes. Kernel names are not guaranteed to be UTF-8, so
/// the textual views are lossy.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedStr<const N: usize> {
    s: [u8; N],
}

impl<const N: usize> FixedStr<N> {
    #[inline]
    pub const fn empty() -> Self {
        Self { s: [0; N] }
    }

    /// Build from a string, leaving room for the terminating NUL.
    pub fn new(s: &str) -> Result<Self, FixedStrErr> {
        if s.len() >= N {
            return Err(FixedStrErr::CapacityOverflow {
                capacity: N - 1,
                required: s.len(),
            });
        }
        if s.as_bytes().contains(&0) {
            return Err(FixedStrErr::InteriorNul);
        }

        let mut f = Self::empty();
        f.s[..s.len()].copy_from_slice(s.as_bytes());
        Ok(f)
    }

    #[inline]
    pub const fn from_byte_array(bytes: [u8; N]) -> Self {
        Self { s: bytes }
    }

    #[inline]
    pub const fn into_byte_array(self) -> [u8; N] {
        self.s
    }

    /// The bytes up to (not including) the first NUL.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.s[..self.len()]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.s.find_byte(0).unwrap_or(N)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        N == 0 || self.s[0] == 0
    }

    #[inline]
    pub fn to_str_lossy(&self) -> Cow<'_, str> {
        self.as_bytes().to_str_lossy()
    }
}

impl<const N: usize> Default for FixedStr<N> {
    #[inline(always)]
    fn default() -> Self {
        Self::empty()
    }
}

impl<const N: usize> std::fmt::Debug for FixedStr<N> {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FixedStr")
            .field(&BStr::new(self.as_bytes()))
            .finish()
    }
}

impl<const N: usize> std::fmt::Display for FixedStr<N> {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(BStr::new(self.as_bytes()), f)
    }
}

impl<const N: usize> TryFrom<&str> for FixedStr<N> {
    type Error = FixedStrErr;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FixedStrErr {
    #[error(
        "Exceeded fixed string size: required {required} bytes with only {capacity} available"
    )]
    CapacityOverflow { capacity: usize, required: usize },
    #[error("String contains an interior NUL byte")]
    InteriorNul,
}

impl From<FixedStrErr> for std::io::Error {
    fn from(value: FixedStrErr) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, value)
    }
}
