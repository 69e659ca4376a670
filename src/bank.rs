use std::borrow::Cow;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::errors::{Error, Result};
use crate::hold::{Hold, HoldLock};
use crate::ioctl::{Command, Ioctl, Transport};
use crate::line::{self, Direction};
use crate::trace::SharedTracer;
use crate::uapi::v2::{
    ChipInfo, LineAttribute, LineConfig, LineConfigAttribute, LineFlags, LineInfo, LineRequest,
    LineValues, Name, GPIO_LINES_MAX,
};
use crate::uapi::{ByteOrder, Record};

mod options;
mod poller;

pub use options::BankOptions;

/// Encode `record`, issue `op` with it against `fd` and decode the reply.
fn query<T: Transport, R: Record>(
    transport: &T,
    order: ByteOrder,
    fd: &T::Fd,
    op: Command,
    record: &R,
    line: Option<u32>,
) -> Result<R> {
    let mut buf = record.encode(order);
    transport
        .issue(fd, op, &mut buf)
        .map_err(|errno| Error::IoctlFailed { op, line, errno })?;
    R::decode(&buf, order)
}

/// Everything a bank caches about its chip. Masks are chip-wide: bit
/// `n` is line `n`.
struct State<F> {
    chip: Option<F>,
    ins_mask: u64,
    outs_mask: u64,
    ins: u64,
    outs: u64,
    ins_when: Option<Instant>,
    outs_when: Option<Instant>,
    /// Low-order mask covering one bit per enabled input, in the
    /// request-relative numbering the kernel answers in.
    poll_mask: u64,
    ins_fd: Option<F>,
    outs_fd: Option<F>,
    tracer: Option<SharedTracer>,
}

impl<F> State<F> {
    fn ensure_open(&self) -> Result<()> {
        match self.chip {
            Some(_) => Ok(()),
            None => Err(Error::Closed),
        }
    }

    fn sample(&self) {
        let mask = self.ins_mask | self.outs_mask;
        if let (Some(tracer), true) = (&self.tracer, mask != 0) {
            tracer.sample(mask, (self.ins & self.ins_mask) | (self.outs & self.outs_mask));
        }
    }
}

struct Shared<T: Transport> {
    transport: T,
    order: ByteOrder,
    consumer: Name,
    info: ChipInfo,
    lock: HoldLock<State<T::Fd>>,
}

impl<T: Transport> Shared<T> {
    fn issue<R: Record>(&self, fd: &T::Fd, op: Command, record: &R, line: Option<u32>) -> Result<R> {
        query(&self.transport, self.order, fd, op, record, line)
    }

    /// Ask the kernel for a descriptor covering every line in `mask`.
    fn request_lines(&self, chip: &T::Fd, direction: Direction, mask: u64, outs: u64) -> Result<T::Fd> {
        let offsets = line::unpack_mask(mask);
        let n_lines = offsets.len() as u32;

        let mut config = LineConfig {
            flags: match direction {
                Direction::Input => LineFlags::INPUT,
                Direction::Output => LineFlags::OUTPUT,
            },
            ..LineConfig::default()
        };
        if direction == Direction::Output && outs & mask != 0 {
            // an empty config has room for every attribute
            let _ = config.attrs.push(LineConfigAttribute {
                attr: LineAttribute::OutputValues(line::compact(outs, mask)),
                mask: line::low_mask(n_lines),
            });
        }

        let req = LineRequest {
            offsets,
            consumer: self.consumer,
            config,
            ..LineRequest::default()
        };

        let enable_failed = |errno| Error::LineEnableFailed {
            mask,
            direction,
            errno,
        };
        let reply = self
            .issue(chip, Command::GetLine, &req, None)
            .map_err(|err| match err {
                Error::IoctlFailed { errno, .. } => enable_failed(errno),
                err => err,
            })?;
        trace!(%direction, mask, fd = reply.fd, "requested lines");

        self.transport.adopt(reply.fd).map_err(|err| {
            enable_failed(err.raw_os_error().map_or(Errno::EBADF, Errno::from_raw))
        })
    }

    /// Close both value descriptors and reopen them for the current
    /// masks, then re-assert the cached outputs.
    fn reopen(&self, st: &mut State<T::Fd>) -> Result<()> {
        if let Some(fd) = st.ins_fd.take() {
            self.transport.close(fd);
        }
        if let Some(fd) = st.outs_fd.take() {
            self.transport.close(fd);
        }

        let chip = st.chip.as_ref().ok_or(Error::Closed)?;
        if st.outs_mask != 0 {
            st.outs_fd = Some(self.request_lines(chip, Direction::Output, st.outs_mask, st.outs)?);
        }
        if st.ins_mask != 0 {
            st.ins_fd = Some(self.request_lines(chip, Direction::Input, st.ins_mask, 0)?);
        }
        st.poll_mask = line::low_mask(st.ins_mask.count_ones());
        st.ins &= st.ins_mask;

        debug!(ins = st.ins_mask, outs = st.outs_mask, "reconfigured lines");
        self.set_outs(st, None)
    }

    /// Move to the given masks. If the kernel refuses, the previous
    /// masks are restored and their descriptors reopened.
    fn redirect(&self, st: &mut State<T::Fd>, ins_mask: u64, outs_mask: u64) -> Result<()> {
        debug_assert_eq!(ins_mask & outs_mask, 0);
        let prev = (st.ins_mask, st.outs_mask);
        st.ins_mask = ins_mask;
        st.outs_mask = outs_mask;

        let Err(err) = self.reopen(st) else {
            return Ok(());
        };

        (st.ins_mask, st.outs_mask) = prev;
        if let Err(restore) = self.reopen(st) {
            warn!(%restore, "failed to restore previous line configuration");
        }
        Err(err)
    }

    /// Write every cached output value to the hardware.
    fn set_outs(&self, st: &mut State<T::Fd>, line: Option<u32>) -> Result<()> {
        let Some(fd) = &st.outs_fd else {
            return Ok(());
        };
        let values = LineValues {
            bits: line::compact(st.outs, st.outs_mask),
            mask: line::low_mask(st.outs_mask.count_ones()),
        };
        self.issue(fd, Command::LineSetValues, &values, line)?;
        st.sample();
        Ok(())
    }

    /// Read all inputs. Returns whether the cached input state changed.
    fn refresh(&self, st: &mut State<T::Fd>, line: Option<u32>) -> Result<bool> {
        let (Some(_), Some(fd)) = (&st.chip, &st.ins_fd) else {
            return Ok(false);
        };
        let query = LineValues {
            bits: 0,
            mask: st.poll_mask,
        };
        let reply = self.issue(fd, Command::LineGetValues, &query, line)?;

        let ins = line::expand(reply.bits & st.poll_mask, st.ins_mask);
        if ins == st.ins {
            return Ok(false);
        }
        st.ins = ins;
        st.ins_when = Some(Instant::now());
        st.sample();
        Ok(true)
    }
}

impl<T: Transport> Drop for Shared<T> {
    fn drop(&mut self) {
        let st = self.lock.get_mut();
        for fd in [st.ins_fd.take(), st.outs_fd.take(), st.chip.take()]
            .into_iter()
            .flatten()
        {
            self.transport.close(fd);
        }
    }
}

/// A cached view of the lines of one GPIO chip.
///
/// Lines are enabled one at a time as inputs or outputs. Output values
/// are cached and pushed to the hardware on every change; input values
/// are refreshed by a background poller and on every [`get`](Bank::get)
/// of an input.
///
/// All access to a bank, the poller's included, is serialized: one
/// operation at a time per bank, and nothing at all while a
/// [`set_hold`](Bank::set_hold) handle is outstanding.
///
/// ```no_run
/// use std::time::Duration;
/// use gpio_bank::Bank;
/// use gpio_bank::CancellationToken;
///
/// # fn main() -> Result<(), gpio_bank::Error> {
/// let cancel = CancellationToken::new();
/// let bank = Bank::open("/dev/gpiochip0", Duration::from_millis(4), cancel.clone())?;
/// bank.enable(17)?;
/// bank.output(17, true)?;
/// bank.enable(10)?;
///
/// bank.set(17, true)?;
/// println!("line 10 reads {}", bank.get(10)?);
///
/// bank.close()?;
/// cancel.cancel();
/// # Ok(()) }
/// ```
pub struct Bank<T: Transport = Ioctl> {
    shared: Arc<Shared<T>>,
}

impl Bank<Ioctl> {
    /// Open the GPIO chip at `path` (e.g. `/dev/gpiochip0`) and start
    /// polling its inputs every `poll` until `cancel` fires.
    pub fn open(path: impl AsRef<Path>, poll: Duration, cancel: CancellationToken) -> Result<Self> {
        let options = BankOptions::new().with_poll_interval(poll);
        Self::open_with(Ioctl, path, options, cancel)
    }
}

impl<T: Transport> Bank<T> {
    /// Open a chip through an arbitrary transport.
    ///
    /// Cancelling `cancel` stops the poller; [`close`](Bank::close)
    /// does not.
    pub fn open_with(
        transport: T,
        path: impl AsRef<Path>,
        options: BankOptions,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let path = path.as_ref();
        let order = options.byte_order();
        let chip = transport
            .open(path)
            .map_err(|source| Error::DeviceOpenFailed {
                path: path.to_owned(),
                source,
            })?;

        let info = match query(&transport, order, &chip, Command::GetChipInfo, &ChipInfo::default(), None) {
            Ok(info) => info,
            Err(err) => {
                transport.close(chip);
                return Err(err);
            }
        };
        debug!(
            path = %path.display(),
            name = %info.name,
            label = %info.label,
            lines = info.lines,
            "opened gpio chip"
        );

        let shared = Arc::new(Shared {
            transport,
            order,
            consumer: options.consumer_name(),
            info,
            lock: HoldLock::new(State {
                chip: Some(chip),
                ins_mask: 0,
                outs_mask: 0,
                ins: 0,
                outs: 0,
                ins_when: None,
                outs_when: None,
                poll_mask: 0,
                ins_fd: None,
                outs_fd: None,
                tracer: None,
            }),
        });
        poller::spawn(Arc::downgrade(&shared), options.poll_interval(), cancel)?;

        Ok(Self { shared })
    }

    /// The number of lines on the chip.
    pub fn lines(&self) -> u32 {
        self.shared.info.lines
    }

    /// The kernel's name for the chip.
    pub fn name(&self) -> Cow<'_, str> {
        self.shared.info.name.to_str_lossy()
    }

    /// The chip's label, possibly empty.
    pub fn label(&self) -> Cow<'_, str> {
        self.shared.info.label.to_str_lossy()
    }

    pub fn chip_info(&self) -> &ChipInfo {
        &self.shared.info
    }

    fn bit(&self, line: u32) -> Result<u64> {
        let limit = self.shared.info.lines.min(GPIO_LINES_MAX as u32);
        if line >= limit {
            return Err(Error::InvalidIndex {
                index: line as usize,
                limit: limit as usize,
            });
        }
        Ok(1 << line)
    }

    /// The kernel's current description of `line`. Bounds are left for
    /// the kernel to check.
    pub fn line_info(&self, line: u32) -> Result<LineInfo> {
        let st = self.shared.lock.lock();
        let chip = st.chip.as_ref().ok_or(Error::Closed)?;
        self.shared
            .issue(chip, Command::GetLineInfo, &LineInfo::for_offset(line), Some(line))
    }

    /// Enable `line` as an input. Does nothing if it is already enabled
    /// either way.
    pub fn enable(&self, line: u32) -> Result<()> {
        self.enable_as(line, Direction::Input)
    }

    /// Enable `line` in the given direction. Does nothing if it is
    /// already enabled either way.
    pub fn enable_as(&self, line: u32, direction: Direction) -> Result<()> {
        let bit = self.bit(line)?;
        let mut st = self.shared.lock.lock();
        st.ensure_open()?;
        if (st.ins_mask | st.outs_mask) & bit != 0 {
            return Ok(());
        }

        let (ins, outs) = match direction {
            Direction::Input => (st.ins_mask | bit, st.outs_mask),
            Direction::Output => (st.ins_mask, st.outs_mask | bit),
        };
        self.shared.redirect(&mut st, ins, outs)
    }

    /// Make `line` an output (`true`) or an input (`false`).
    ///
    /// Every direction change closes and re-requests the descriptors of
    /// all enabled lines and re-asserts all cached outputs. A line that
    /// is not yet enabled is enabled in the requested direction.
    pub fn output(&self, line: u32, output: bool) -> Result<()> {
        let bit = self.bit(line)?;
        let mut st = self.shared.lock.lock();
        st.ensure_open()?;
        if output && st.outs_mask & bit != 0 || !output && st.ins_mask & bit != 0 {
            return Ok(());
        }

        let (ins, outs) = if output {
            (st.ins_mask & !bit, st.outs_mask | bit)
        } else {
            (st.ins_mask | bit, st.outs_mask & !bit)
        };
        self.shared.redirect(&mut st, ins, outs)
    }

    /// Lock the bank for a write to output `line`.
    ///
    /// Blocks while another hold on this bank is outstanding. Until the
    /// returned handle is released no other operation on any line of
    /// this bank completes, and the poller is paused.
    pub fn set_hold(&self, line: u32) -> Result<Hold<bool>> {
        let bit = self.bit(line)?;
        let st = self.shared.lock.lock();
        st.ensure_open()?;
        if st.outs_mask & bit == 0 {
            return Err(Error::LineNotEnabled { line, output: true });
        }
        let ticket = st.hold();

        let shared = self.shared.clone();
        Ok(Hold::new(move |value| {
            shared.lock.commit(ticket, |st| {
                let Some(on) = value else {
                    return Ok(());
                };
                if (st.outs & bit != 0) == on {
                    return Ok(());
                }
                let prev = (st.outs, st.outs_when);
                st.outs ^= bit;
                st.outs_when = Some(Instant::now());
                let res = shared.set_outs(st, Some(line));
                if res.is_err() {
                    // the cache never claims a level the line was not driven to
                    (st.outs, st.outs_when) = prev;
                }
                res
            })
        }))
    }

    /// Drive output `line` to `on`.
    pub fn set(&self, line: u32, on: bool) -> Result<()> {
        let mut hold = self.set_hold(line)?;
        hold.write(on);
        hold.release()
    }

    /// The value of `line`: the cached value for an output, a fresh
    /// read for an input.
    pub fn get(&self, line: u32) -> Result<bool> {
        let bit = self.bit(line)?;
        let mut st = self.shared.lock.lock();
        st.ensure_open()?;
        if st.outs_mask & bit != 0 {
            return Ok(st.outs & bit != 0);
        }
        if st.ins_mask & bit == 0 {
            return Err(Error::LineNotEnabled {
                line,
                output: false,
            });
        }
        self.shared.refresh(&mut st, Some(line))?;
        Ok(st.ins & bit != 0)
    }

    /// Read all inputs now, exactly as the poller does. Returns whether
    /// any input changed.
    pub fn refresh(&self) -> Result<bool> {
        let mut st = self.shared.lock.lock();
        self.shared.refresh(&mut st, None)
    }

    /// Lines enabled as inputs, as a chip-wide mask.
    pub fn inputs(&self) -> u64 {
        self.shared.lock.lock().ins_mask
    }

    /// Lines enabled as outputs, as a chip-wide mask.
    pub fn outputs(&self) -> u64 {
        self.shared.lock.lock().outs_mask
    }

    /// When the cached inputs last changed.
    pub fn last_input_change(&self) -> Option<Instant> {
        self.shared.lock.lock().ins_when
    }

    /// When a cached output last changed.
    pub fn last_output_change(&self) -> Option<Instant> {
        self.shared.lock.lock().outs_when
    }

    /// Install (or with `None`, remove) the tracer. Installing one
    /// samples all enabled lines straight away.
    pub fn set_tracer(&self, tracer: Option<SharedTracer>) {
        let mut st = self.shared.lock.lock();
        st.tracer = tracer;
        st.sample();
    }

    /// Release the line descriptors and the chip.
    ///
    /// The poller keeps running until its cancellation token fires; it
    /// finds nothing to read once the bank is closed.
    pub fn close(&self) -> Result<()> {
        let mut st = self.shared.lock.lock();
        let chip = st.chip.take().ok_or(Error::Closed)?;
        for fd in [st.ins_fd.take(), st.outs_fd.take()].into_iter().flatten() {
            self.shared.transport.close(fd);
        }
        self.shared.transport.close(chip);
        debug!(name = %self.shared.info.name, "closed gpio chip");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock.lock().chip.is_none()
    }
}

impl<T: Transport> fmt::Display for Bank<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_closed() {
            return f.write_str("closed");
        }
        write!(f, "{:?} {:?} ({})", self.name(), self.label(), self.lines())
    }
}

impl<T: Transport> fmt::Debug for Bank<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bank")
            .field("info", &self.shared.info)
            .field("held", &self.shared.lock.is_held())
            .finish_non_exhaustive()
    }
}
