//! An in-memory GPIO chip speaking the v2 record protocol, for driving a
//! [`Bank`] without hardware.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use gpio_bank::fixed_str::FixedStr;
use gpio_bank::uapi::v2::{
    ChipInfo, LineAttribute, LineFlags, LineInfo, LineRequest, LineValues,
};
use gpio_bank::uapi::{ByteOrder, Record};
use gpio_bank::{Bank, BankOptions, CancellationToken, Command, Transport};
use nix::errno::Errno;

pub const CHIP_FD: RawFd = 3;

#[derive(Debug, Clone)]
pub struct Granted {
    pub offsets: Vec<u32>,
    pub output: bool,
}

#[derive(Debug, Default)]
pub struct ChipState {
    pub lines: u32,
    pub levels: u64,
    /// Output line -> input line wired to it.
    pub mirrors: Vec<(u32, u32)>,
    pub granted: HashMap<RawFd, Granted>,
    pub next_fd: RawFd,
    pub chip_open: bool,
    pub closed: Vec<RawFd>,
    pub get_line_calls: usize,
    pub get_values_calls: usize,
    pub set_values_calls: usize,
    /// Fail this many upcoming line requests.
    pub refuse_requests: usize,
    /// Fail this many upcoming value writes with EIO.
    pub refuse_writes: usize,
}

impl ChipState {
    fn level(&self, line: u32) -> bool {
        self.levels & (1 << line) != 0
    }

    fn drive(&mut self, line: u32, on: bool) {
        if on {
            self.levels |= 1 << line;
        } else {
            self.levels &= !(1 << line);
        }
    }

    fn propagate(&mut self) {
        for (from, to) in self.mirrors.clone() {
            let on = self.level(from);
            self.drive(to, on);
        }
    }

    fn busy(&self, line: u32) -> bool {
        self.granted.values().any(|g| g.offsets.contains(&line))
    }
}

#[derive(Debug, Default)]
pub struct FakeChip {
    state: Mutex<ChipState>,
}

impl FakeChip {
    pub fn new(lines: u32) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ChipState {
                lines,
                next_fd: CHIP_FD + 1,
                ..ChipState::default()
            }),
        })
    }

    /// A chip whose outputs 17, 27 and 22 are wired to inputs 10, 9 and 11.
    pub fn mirrored() -> Arc<Self> {
        let chip = Self::new(54);
        chip.state().mirrors = vec![(17, 10), (27, 9), (22, 11)];
        chip
    }

    pub fn state(&self) -> MutexGuard<'_, ChipState> {
        self.state.lock().unwrap()
    }

    pub fn level(&self, line: u32) -> bool {
        self.state().level(line)
    }

    pub fn set_level(&self, line: u32, on: bool) {
        self.state().drive(line, on);
    }

    /// Every line currently granted to some descriptor, with its direction.
    pub fn granted_lines(&self) -> Vec<(u32, bool)> {
        let st = self.state();
        let mut lines: Vec<_> = st
            .granted
            .values()
            .flat_map(|g| g.offsets.iter().map(move |&o| (o, g.output)))
            .collect();
        lines.sort();
        lines
    }

    pub fn open_descriptors(&self) -> usize {
        let st = self.state();
        st.granted.len() + usize::from(st.chip_open)
    }

    fn chip_info(&self, buf: &mut [u8]) -> Result<(), Errno> {
        let info = ChipInfo {
            name: FixedStr::new("gpiochip0").unwrap(),
            label: FixedStr::new("fake-gpio").unwrap(),
            lines: self.state().lines,
        };
        info.encode_into(buf, ByteOrder::native())
            .map_err(|_| Errno::EINVAL)
    }

    fn line_info(&self, buf: &mut [u8]) -> Result<(), Errno> {
        let mut info = LineInfo::decode(buf, ByteOrder::native()).map_err(|_| Errno::EINVAL)?;
        let st = self.state();
        if info.offset >= st.lines {
            return Err(Errno::EINVAL);
        }
        info.name = FixedStr::new(&format!("GPIO{}", info.offset)).unwrap();
        if let Some(g) = st.granted.values().find(|g| g.offsets.contains(&info.offset)) {
            info.consumer = FixedStr::new("gpio-bank").unwrap();
            info.flags = LineFlags::USED
                | if g.output {
                    LineFlags::OUTPUT
                } else {
                    LineFlags::INPUT
                };
        } else {
            info.flags = LineFlags::INPUT;
        }
        info.encode_into(buf, ByteOrder::native())
            .map_err(|_| Errno::EINVAL)
    }

    fn get_line(&self, buf: &mut [u8]) -> Result<(), Errno> {
        let mut req = LineRequest::decode(buf, ByteOrder::native()).map_err(|_| Errno::EINVAL)?;
        let mut st = self.state();
        st.get_line_calls += 1;
        if st.refuse_requests > 0 {
            st.refuse_requests -= 1;
            return Err(Errno::EBUSY);
        }

        let offsets: Vec<u32> = req.offsets.iter().copied().collect();
        if offsets.is_empty() || offsets.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Errno::EINVAL);
        }
        if offsets.iter().any(|&o| o >= st.lines) {
            return Err(Errno::EINVAL);
        }
        if offsets.iter().any(|&o| st.busy(o)) {
            return Err(Errno::EBUSY);
        }

        let output = req.config.flags.contains(LineFlags::OUTPUT);
        if output {
            for attr in &req.config.attrs {
                if let LineAttribute::OutputValues(bits) = attr.attr {
                    for (i, &o) in offsets.iter().enumerate() {
                        if attr.mask & (1 << i) != 0 {
                            st.drive(o, bits & (1 << i) != 0);
                        }
                    }
                }
            }
            st.propagate();
        }

        let fd = st.next_fd;
        st.next_fd += 1;
        st.granted.insert(fd, Granted { offsets, output });
        req.fd = fd;
        req.encode_into(buf, ByteOrder::native())
            .map_err(|_| Errno::EINVAL)
    }

    fn values(&self, fd: RawFd, cmd: Command, buf: &mut [u8]) -> Result<(), Errno> {
        let mut values = LineValues::decode(buf, ByteOrder::native()).map_err(|_| Errno::EINVAL)?;
        let mut st = self.state();
        let granted = st.granted.get(&fd).cloned().ok_or(Errno::EBADF)?;
        if values.mask >> granted.offsets.len() != 0 {
            return Err(Errno::EINVAL);
        }

        match cmd {
            Command::LineGetValues => {
                st.get_values_calls += 1;
                values.bits = 0;
                for (i, &o) in granted.offsets.iter().enumerate() {
                    if values.mask & (1 << i) != 0 && st.level(o) {
                        values.bits |= 1 << i;
                    }
                }
            }
            _ => {
                if !granted.output {
                    return Err(Errno::EPERM);
                }
                if st.refuse_writes > 0 {
                    st.refuse_writes -= 1;
                    return Err(Errno::EIO);
                }
                st.set_values_calls += 1;
                for (i, &o) in granted.offsets.iter().enumerate() {
                    if values.mask & (1 << i) != 0 {
                        st.drive(o, values.bits & (1 << i) != 0);
                    }
                }
                st.propagate();
            }
        }
        values
            .encode_into(buf, ByteOrder::native())
            .map_err(|_| Errno::EINVAL)
    }
}

/// [`Transport`] over a shared [`FakeChip`].
#[derive(Debug, Clone)]
pub struct FakeTransport(pub Arc<FakeChip>);

impl Transport for FakeTransport {
    type Fd = RawFd;

    fn open(&self, path: &Path) -> io::Result<RawFd> {
        if !path.starts_with("/dev") || !path.to_string_lossy().contains("gpiochip") {
            return Err(io::ErrorKind::NotFound.into());
        }
        self.0.state().chip_open = true;
        Ok(CHIP_FD)
    }

    fn issue(&self, fd: &RawFd, cmd: Command, buf: &mut [u8]) -> Result<(), Errno> {
        let chip = &self.0;
        if *fd == CHIP_FD {
            if !chip.state().chip_open {
                return Err(Errno::EBADF);
            }
            return match cmd {
                Command::GetChipInfo => chip.chip_info(buf),
                Command::GetLineInfo => chip.line_info(buf),
                Command::GetLine => chip.get_line(buf),
                _ => Err(Errno::ENOTTY),
            };
        }
        match cmd {
            Command::LineGetValues | Command::LineSetValues => chip.values(*fd, cmd, buf),
            _ => Err(Errno::ENOTTY),
        }
    }

    fn adopt(&self, raw: RawFd) -> io::Result<RawFd> {
        if self.0.state().granted.contains_key(&raw) {
            Ok(raw)
        } else {
            Err(io::Error::from_raw_os_error(Errno::EBADF as i32))
        }
    }

    fn close(&self, fd: RawFd) {
        let mut st = self.0.state();
        if fd == CHIP_FD {
            st.chip_open = false;
        } else {
            st.granted.remove(&fd);
        }
        st.closed.push(fd);
    }
}

/// Polling so slow it never interferes with a test.
pub const NO_POLL: Duration = Duration::from_secs(3600);

pub fn open(chip: &Arc<FakeChip>, poll: Duration) -> (Bank<FakeTransport>, CancellationToken) {
    let cancel = CancellationToken::new();
    let bank = Bank::open_with(
        FakeTransport(chip.clone()),
        "/dev/gpiochip0",
        BankOptions::new().with_poll_interval(poll),
        cancel.clone(),
    )
    .unwrap();
    (bank, cancel)
}

/// Wait up to two seconds for `cond` to hold.
pub fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}
