//! The one place raw descriptors and syscalls live.
//!
//! Everything above this module deals in typed records (see
//! [`uapi::v2`](crate::uapi::v2)); a [`Transport`] only ever sees a
//! command and the already encoded bytes.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;

use nix::errno::Errno;

/// ABI magic of the GPIO character device ioctls.
pub const GPIO_IOCTL_MAGIC: u8 = 0xB4;

const SHIFT_CMD: u32 = 0;
const SHIFT_ABI: u32 = 8;
const SHIFT_LENGTH: u32 = 16;
const SHIFT_DIR: u32 = 30;

const DIR_READ: u32 = 2;
const DIR_READ_WRITE: u32 = 3;

/// The GPIO character device command table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    GetChipInfo = 0x01,
    GetLineInfo = 0x05,
    GetLineInfoWatch = 0x06,
    GetLine = 0x07,
    GetLineInfoUnwatch = 0x0c,
    LineSetConfig = 0x0d,
    LineGetValues = 0x0e,
    LineSetValues = 0x0f,
}

impl Command {
    #[inline]
    pub const fn number(self) -> u8 {
        self as u8
    }

    /// Only the chip info query is read-only; everything else is
    /// read-write.
    #[inline]
    const fn direction(self) -> u32 {
        match self {
            Command::GetChipInfo => DIR_READ,
            _ => DIR_READ_WRITE,
        }
    }

    /// The ioctl request number for this command carrying a `len` byte
    /// payload, packed the way the kernel's `_IOC()` does.
    #[inline]
    pub const fn request_code(self, len: usize) -> u32 {
        (self.direction() << SHIFT_DIR)
            | ((len as u32) << SHIFT_LENGTH)
            | ((GPIO_IOCTL_MAGIC as u32) << SHIFT_ABI)
            | ((self.number() as u32) << SHIFT_CMD)
    }
}

/// Carries GPIO requests to a chip.
///
/// The real implementation is [`Ioctl`]; anything else (a simulated
/// chip, a recording proxy) only needs to interpret the encoded records
/// the same way the kernel would.
pub trait Transport: Send + Sync + 'static {
    /// An open chip or line descriptor.
    type Fd: Send + Sync + 'static;

    /// Open the chip device at `path`.
    fn open(&self, path: &Path) -> std::io::Result<Self::Fd>;

    /// Issue `cmd` against `fd`. The buffer is read by the callee and
    /// overwritten in place with its reply, if the command has one.
    fn issue(&self, fd: &Self::Fd, cmd: Command, buf: &mut [u8]) -> Result<(), Errno>;

    /// Take ownership of a line descriptor returned by [`Command::GetLine`].
    fn adopt(&self, raw: RawFd) -> std::io::Result<Self::Fd>;

    /// Release a descriptor.
    fn close(&self, fd: Self::Fd) {
        drop(fd);
    }
}

/// Talks to the kernel through `ioctl(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ioctl;

impl Transport for Ioctl {
    type Fd = OwnedFd;

    fn open(&self, path: &Path) -> std::io::Result<OwnedFd> {
        let f = std::fs::OpenOptions::new().read(true).open(path)?;
        Ok(OwnedFd::from(f))
    }

    fn issue(&self, fd: &OwnedFd, cmd: Command, buf: &mut [u8]) -> Result<(), Errno> {
        let request = cmd.request_code(buf.len()) as nix::sys::ioctl::ioctl_num_type;
        // SAFETY: the request's encoded size is the buffer's length, so the
        // kernel reads and writes only within `buf`.
        let res = unsafe { libc::ioctl(fd.as_raw_fd(), request, buf.as_mut_ptr()) };
        Errno::result(res).map(drop)
    }

    fn adopt(&self, raw: RawFd) -> std::io::Result<OwnedFd> {
        if raw < 0 {
            return Err(Errno::EBADF.into());
        }
        // SAFETY: the kernel just handed this descriptor to us and nothing
        // else owns it.
        Ok(unsafe { OwnedFd::from_raw_fd(raw) })
    }
}
