// Copyright (c) 2018 The rust-gpio-cdev Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `gpio-bank` crate exposes the lines of a Linux GPIO chip as a
//! cached, indexable bank of booleans, driven through the v2 [GPIO
//! character device ABI].
//!
//! A [`Bank`] keeps one kernel line request for all of its enabled
//! inputs and one for all of its enabled outputs. Output values are
//! cached and written on every change; inputs are refreshed by a
//! background poller and on every read of an input line. Writes go
//! through a one-shot [`Hold`] handle that locks the whole bank until
//! it is released, so a value can be decided while nothing else on the
//! chip moves.
//!
//! [`Flag`] and [`Vector`] are software containers with the same write
//! protocol: 64 booleans and a fixed length array of integers.
//!
//! Every container can feed a [`Tracer`] with `(mask, value)` samples
//! whenever its observable state changes.
//!
//! # Examples
//!
//! Mirror input line 10 onto output line 17:
//!
//! ```no_run
//! use std::time::Duration;
//! use gpio_bank::{Bank, CancellationToken};
//!
//! # fn main() -> Result<(), gpio_bank::Error> {
//! let cancel = CancellationToken::new();
//! let bank = Bank::open("/dev/gpiochip0", Duration::from_millis(4), cancel.clone())?;
//! bank.enable(10)?;
//! bank.enable(17)?;
//! bank.output(17, true)?;
//!
//! let level = bank.get(10)?;
//! let mut hold = bank.set_hold(17)?;
//! hold.write(level);
//! hold.release()?;
//!
//! cancel.cancel();
//! bank.close()
//! # }
//! ```
//!
//! A [`Hold`] locks the entire bank, so line 10 has to be read before
//! the hold is taken: a `bank.get` while the hold is outstanding on the
//! same thread would never return.
//!
//! [GPIO character device ABI]: https://www.kernel.org/doc/Documentation/ABI/testing/gpio-cdev

#![cfg_attr(docsrs, feature(doc_cfg))]

mod errors;

pub mod fixed_str;

pub mod uapi;

pub mod ioctl;

pub mod line;

mod hold;

pub mod trace;

pub mod bank;

pub mod flag;

pub mod vector;

pub mod chip;

pub use bank::{Bank, BankOptions};
pub use chip::{chips, Chips};
pub use errors::{Error, Result};
pub use flag::Flag;
pub use hold::Hold;
pub use ioctl::{Command, Ioctl, Transport};
pub use line::Direction;
pub use tokio_util::sync::CancellationToken;
pub use trace::{SharedTracer, Tracer};
pub use vector::Vector;
