use std::fs::ReadDir;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use bstr::ByteSlice;

use crate::errors::Result;

/// Iterate over the GPIO chip devices currently present on this system.
///
/// Each item is a path that can be handed to [`Bank::open`](crate::Bank::open).
pub fn chips() -> Result<Chips> {
    chips_in("/dev")
}

pub(crate) fn chips_in(dir: impl AsRef<Path>) -> Result<Chips> {
    Ok(Chips {
        readdir: std::fs::read_dir(dir)?,
    })
}

/// Iterator over chip device paths
#[derive(Debug)]
pub struct Chips {
    readdir: ReadDir,
}

impl Iterator for Chips {
    type Item = Result<PathBuf>;

    fn next(&mut self) -> Option<Result<PathBuf>> {
        for entry in &mut self.readdir {
            let e = match entry {
                Ok(e) => e,
                Err(e) => {
                    return Some(Err(e.into()));
                }
            };
            if e.file_name().as_bytes().starts_with_str("gpiochip") {
                return Some(Ok(e.path()));
            }
        }

        None
    }
}
