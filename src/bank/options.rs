use std::time::Duration;

use crate::fixed_str::{FixedStr, FixedStrErr};
use crate::uapi::{v2::Name, ByteOrder};

/// How a [`Bank`](crate::Bank) is opened.
///
/// ```
/// use std::time::Duration;
/// use gpio_bank::BankOptions;
///
/// let options = BankOptions::new()
///     .with_poll_interval(Duration::from_millis(10))
///     .with_consumer("door-sensor")
///     .unwrap();
/// assert_eq!(options.consumer(), "door-sensor");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankOptions {
    poll_interval: Duration,
    consumer: Name,
    byte_order: ByteOrder,
}

impl BankOptions {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(4);
    pub const DEFAULT_CONSUMER: &'static str = "gpio-bank";

    pub fn new() -> Self {
        Self {
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            consumer: FixedStr::new(Self::DEFAULT_CONSUMER).unwrap_or_default(),
            byte_order: ByteOrder::native(),
        }
    }

    /// Period of the background input poller.
    pub const fn with_poll_interval(self, poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            ..self
        }
    }

    /// The consumer label the kernel reports for lines this bank holds.
    pub fn with_consumer(self, consumer: &str) -> Result<Self, FixedStrErr> {
        Ok(Self {
            consumer: FixedStr::new(consumer)?,
            ..self
        })
    }

    /// Override the byte order records are marshalled in. Only useful
    /// with a [`Transport`](crate::ioctl::Transport) that is not the
    /// local kernel.
    pub const fn with_byte_order(self, byte_order: ByteOrder) -> Self {
        Self { byte_order, ..self }
    }

    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn consumer(&self) -> &str {
        // only ever built from a &str
        std::str::from_utf8(self.consumer.as_bytes()).unwrap_or_default()
    }

    pub(crate) const fn consumer_name(&self) -> Name {
        self.consumer
    }

    pub const fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }
}

impl Default for BankOptions {
    fn default() -> Self {
        Self::new()
    }
}
