use std::path::PathBuf;

use nix::errno::Errno;

use crate::ioctl::Command;
use crate::line::Direction;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong talking to a GPIO chip or one of the
/// software containers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A line, flag or vector index outside the container's domain.
    #[error("index {index} is out of range [0,{limit})")]
    InvalidIndex { index: usize, limit: usize },

    #[error("failed to open {}: {source}", .path.display())]
    DeviceOpenFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The kernel rejected a request. `line` is set when the request
    /// was made on behalf of a single line.
    #[error("{op:?} failed{}: {errno}", for_line(.line))]
    IoctlFailed {
        op: Command,
        line: Option<u32>,
        errno: Errno,
    },

    /// The line is not enabled, or not enabled as an output when
    /// `output` is set.
    #[error("line {line} is not {}", if_output(.output))]
    LineNotEnabled { line: u32, output: bool },

    /// The kernel refused to hand out a descriptor for a group of lines.
    #[error("failed to enable {mask:#b} for {direction}: {errno}")]
    LineEnableFailed {
        mask: u64,
        direction: Direction,
        errno: Errno,
    },

    /// A record codec was handed a buffer of the wrong length.
    #[error("{record} needs {expected} bytes, got {actual}")]
    SizeMismatch {
        record: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("bank is closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The OS error code behind this error, if there is one.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Error::IoctlFailed { errno, .. } | Error::LineEnableFailed { errno, .. } => {
                Some(*errno)
            }
            Error::DeviceOpenFailed { source, .. } | Error::Io(source) => {
                source.raw_os_error().map(Errno::from_raw)
            }
            _ => None,
        }
    }
}

fn for_line(line: &Option<u32>) -> String {
    line.map(|l| format!(" for line {l}")).unwrap_or_default()
}

fn if_output(output: &bool) -> &'static str {
    if *output {
        "write-enabled"
    } else {
        "enabled"
    }
}
