// Copyright (c) 2018 The rust-gpio-cdev Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `gpio_v2_*` structures of the kernel's [gpio.h], as plain Rust
//! records that marshal to and from their exact wire layout.
//!
//! [gpio.h]: https://github.com/torvalds/linux/blob/v5.19/include/uapi/linux/gpio.h

use std::fmt;
use std::time::Duration;

use bitflags::bitflags;
use bytes::{Buf, BufMut};
use itertools::Itertools;

use super::codec::{Decoder, Encoder, Record};
use crate::fixed_str::FixedStr;
use crate::line::Direction;

pub const GPIO_LINES_MAX: usize = 64;
pub const GPIO_MAX_NAME_SIZE: usize = 32;
pub const GPIO_LINE_NUM_ATTRS_MAX: usize = 10;

pub type Name = FixedStr<GPIO_MAX_NAME_SIZE>;

bitflags! {
    /// Informational Flags
    ///
    /// Maps to kernel [`GPIO_V2_LINE_FLAG_*`] flags.
    ///
    /// [`GPIO_V2_LINE_FLAG_*`]: https://github.com/torvalds/linux/blob/v5.19/include/uapi/linux/gpio.h
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LineFlags: u64 {
        const USED = (1 << 0);
        const ACTIVE_LOW = (1 << 1);
        const INPUT = (1 << 2);
        const OUTPUT = (1 << 3);
        const EDGE_RISING = (1 << 4);
        const EDGE_FALLING = (1 << 5);
        const OPEN_DRAIN = (1 << 6);
        const OPEN_SOURCE = (1 << 7);
        const BIAS_PULL_UP = (1 << 8);
        const BIAS_PULL_DOWN = (1 << 9);
        const BIAS_DISABLED = (1 << 10);
        const EVENT_CLOCK_REALTIME = (1 << 11);
        const EVENT_CLOCK_HTE = (1 << 12);
    }
}

/// Label for a flag when set, and when clear (empty: say nothing).
const FLAG_LABELS: [(LineFlags, &str, &str); 12] = [
    (LineFlags::USED, "in-use", "unused"),
    (LineFlags::ACTIVE_LOW, "active-low", "active-high"),
    (LineFlags::INPUT, "input", ""),
    (LineFlags::OUTPUT, "output", ""),
    (LineFlags::EDGE_RISING, "rising-edge", ""),
    (LineFlags::EDGE_FALLING, "falling-edge", ""),
    (LineFlags::OPEN_DRAIN, "open-drain", ""),
    (LineFlags::OPEN_SOURCE, "open-source", ""),
    (LineFlags::BIAS_PULL_UP, "pull-up", ""),
    (LineFlags::BIAS_PULL_DOWN, "pull-down", ""),
    (LineFlags::BIAS_DISABLED, "bias-disabled", ""),
    (LineFlags::EVENT_CLOCK_REALTIME, "realtime-clock", ""),
];

impl fmt::Display for LineFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels = FLAG_LABELS
            .iter()
            .map(|(flag, on, off)| if self.contains(*flag) { on } else { off })
            .filter(|label| !label.is_empty())
            .join(",");
        f.write_str(&labels)
    }
}

/// Attribute IDs
///
/// Maps to kernel [`GPIO_V2_LINE_ATTR_ID_*`] values.
///
/// [`GPIO_V2_LINE_ATTR_ID_*`]: https://github.com/torvalds/linux/blob/v5.19/include/uapi/linux/gpio.h
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LineAttrId {
    Flags = 1,
    OutputValues = 2,
    Debounce = 3,
}

/// `struct gpio_v2_line_attribute`: an id followed by a union wide
/// enough for a `u64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineAttribute {
    /// Flags for the line, overriding the config's default flags.
    Flags(LineFlags),
    /// Output values, one bit per index into the request's offsets.
    OutputValues(u64),
    /// Debounce period in microseconds.
    DebouncePeriod(u32),
    /// An attribute id this crate does not know about, kept verbatim.
    Unknown { id: u32, raw: [u8; 8] },
}

impl LineAttribute {
    pub fn id(&self) -> u32 {
        match self {
            LineAttribute::Flags(_) => LineAttrId::Flags as u32,
            LineAttribute::OutputValues(_) => LineAttrId::OutputValues as u32,
            LineAttribute::DebouncePeriod(_) => LineAttrId::Debounce as u32,
            LineAttribute::Unknown { id, .. } => *id,
        }
    }

    pub fn debounce(&self) -> Option<Duration> {
        match self {
            LineAttribute::DebouncePeriod(us) => Some(Duration::from_micros(u64::from(*us))),
            _ => None,
        }
    }
}

impl Record for LineAttribute {
    const SIZE: usize = 16;
    const NAME: &'static str = "gpio_v2_line_attribute";

    fn put<B: BufMut>(&self, enc: &mut Encoder<B>) {
        enc.u32(self.id());
        enc.u32(0);
        match self {
            LineAttribute::Flags(flags) => enc.u64(flags.bits()),
            LineAttribute::OutputValues(values) => enc.u64(*values),
            LineAttribute::DebouncePeriod(us) => {
                enc.u32(*us);
                enc.zeros(4);
            }
            LineAttribute::Unknown { raw, .. } => enc.bytes(raw),
        }
    }

    fn get<B: Buf>(dec: &mut Decoder<B>) -> Self {
        let id = dec.u32();
        let _padding = dec.u32();
        match id {
            1 => LineAttribute::Flags(LineFlags::from_bits_retain(dec.u64())),
            2 => LineAttribute::OutputValues(dec.u64()),
            3 => {
                let us = dec.u32();
                dec.skip(4);
                LineAttribute::DebouncePeriod(us)
            }
            id => LineAttribute::Unknown {
                id,
                raw: dec.array(),
            },
        }
    }
}

impl fmt::Display for LineAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineAttribute::Flags(flags) => fmt::Display::fmt(flags, f),
            LineAttribute::OutputValues(values) => fmt::Display::fmt(values, f),
            LineAttribute::DebouncePeriod(us) => {
                write!(f, "{:?}", Duration::from_micros(u64::from(*us)))
            }
            LineAttribute::Unknown { id, raw } => {
                write!(f, "{id}:{}", raw.iter().map(|b| format!("{b:02x}")).join(""))
            }
        }
    }
}

/// `struct gpiochip_info`
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChipInfo {
    /// The name of the device driving this GPIO chip in the kernel
    pub name: Name,
    /// A functional name for this GPIO chip, such as a product number.
    /// Might be empty.
    pub label: Name,
    /// The number of lines/pins indexable through this chip
    pub lines: u32,
}

impl Record for ChipInfo {
    const SIZE: usize = 2 * GPIO_MAX_NAME_SIZE + 4;
    const NAME: &'static str = "gpiochip_info";

    fn put<B: BufMut>(&self, enc: &mut Encoder<B>) {
        enc.bytes(&self.name.into_byte_array());
        enc.bytes(&self.label.into_byte_array());
        enc.u32(self.lines);
    }

    fn get<B: Buf>(dec: &mut Decoder<B>) -> Self {
        Self {
            name: FixedStr::from_byte_array(dec.array()),
            label: FixedStr::from_byte_array(dec.array()),
            lines: dec.u32(),
        }
    }
}

/// `struct gpio_v2_line_info`
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LineInfo {
    pub name: Name,
    pub consumer: Name,
    pub offset: u32,
    pub flags: LineFlags,
    pub attrs: heapless::Vec<LineAttribute, GPIO_LINE_NUM_ATTRS_MAX>,
    pub padding: [u32; 4],
}

impl LineInfo {
    /// A query for the line at `offset`; the kernel fills in the rest.
    pub fn for_offset(offset: u32) -> Self {
        Self {
            offset,
            ..Self::default()
        }
    }

    /// Lines are considered to be inputs if not explicitly
    /// marked as outputs in the line info flags by the kernel.
    pub fn direction(&self) -> Direction {
        if self.flags.contains(LineFlags::OUTPUT) {
            Direction::Output
        } else {
            Direction::Input
        }
    }

    /// True if the line is claimed by some consumer
    pub fn is_used(&self) -> bool {
        self.flags.contains(LineFlags::USED)
    }

    pub fn debounce(&self) -> Option<Duration> {
        self.attrs.iter().find_map(LineAttribute::debounce)
    }
}

impl Record for LineInfo {
    const SIZE: usize = 2 * GPIO_MAX_NAME_SIZE
        + 4
        + 4
        + 8
        + GPIO_LINE_NUM_ATTRS_MAX * LineAttribute::SIZE
        + 4 * 4;
    const NAME: &'static str = "gpio_v2_line_info";

    fn put<B: BufMut>(&self, enc: &mut Encoder<B>) {
        enc.bytes(&self.name.into_byte_array());
        enc.bytes(&self.consumer.into_byte_array());
        enc.u32(self.offset);
        enc.u32(self.attrs.len() as u32);
        enc.u64(self.flags.bits());
        put_slots(enc, &self.attrs, GPIO_LINE_NUM_ATTRS_MAX);
        self.padding.iter().for_each(|p| enc.u32(*p));
    }

    fn get<B: Buf>(dec: &mut Decoder<B>) -> Self {
        let name = FixedStr::from_byte_array(dec.array());
        let consumer = FixedStr::from_byte_array(dec.array());
        let offset = dec.u32();
        let num_attrs = dec.u32() as usize;
        let flags = LineFlags::from_bits_retain(dec.u64());
        let attrs = get_slots(dec, num_attrs);
        let padding = [dec.u32(), dec.u32(), dec.u32(), dec.u32()];

        Self {
            name,
            consumer,
            offset,
            flags,
            attrs,
            padding,
        }
    }
}

impl fmt::Display for LineInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{}>{:?}[{:?}]({}){}",
            self.offset,
            self.name.to_str_lossy(),
            self.consumer.to_str_lossy(),
            self.flags,
            self.attrs.iter().join(",")
        )
    }
}

/// `struct gpio_v2_line_config_attribute`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineConfigAttribute {
    pub attr: LineAttribute,
    /// The lines (as indices into the request's offsets) the attribute applies to
    pub mask: u64,
}

impl Record for LineConfigAttribute {
    const SIZE: usize = LineAttribute::SIZE + 8;
    const NAME: &'static str = "gpio_v2_line_config_attribute";

    fn put<B: BufMut>(&self, enc: &mut Encoder<B>) {
        self.attr.put(enc);
        enc.u64(self.mask);
    }

    fn get<B: Buf>(dec: &mut Decoder<B>) -> Self {
        Self {
            attr: LineAttribute::get(dec),
            mask: dec.u64(),
        }
    }
}

/// `struct gpio_v2_line_config`
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LineConfig {
    pub flags: LineFlags,
    pub attrs: heapless::Vec<LineConfigAttribute, GPIO_LINE_NUM_ATTRS_MAX>,
    pub padding: [u32; 5],
}

impl Record for LineConfig {
    const SIZE: usize = 8 + 4 + 5 * 4 + GPIO_LINE_NUM_ATTRS_MAX * LineConfigAttribute::SIZE;
    const NAME: &'static str = "gpio_v2_line_config";

    fn put<B: BufMut>(&self, enc: &mut Encoder<B>) {
        enc.u64(self.flags.bits());
        enc.u32(self.attrs.len() as u32);
        self.padding.iter().for_each(|p| enc.u32(*p));
        put_slots(enc, &self.attrs, GPIO_LINE_NUM_ATTRS_MAX);
    }

    fn get<B: Buf>(dec: &mut Decoder<B>) -> Self {
        let flags = LineFlags::from_bits_retain(dec.u64());
        let num_attrs = dec.u32() as usize;
        let padding = [dec.u32(), dec.u32(), dec.u32(), dec.u32(), dec.u32()];
        let attrs = get_slots(dec, num_attrs);

        Self {
            flags,
            attrs,
            padding,
        }
    }
}

/// `struct gpio_v2_line_request`
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LineRequest {
    /// Requested line offsets; the count is sent as `num_lines`
    pub offsets: heapless::Vec<u32, GPIO_LINES_MAX>,
    pub consumer: Name,
    pub config: LineConfig,
    pub event_buffer_size: u32,
    pub padding: [u32; 5],
    /// The line descriptor the kernel hands back on success
    pub fd: i32,
}

impl Record for LineRequest {
    const SIZE: usize =
        GPIO_LINES_MAX * 4 + GPIO_MAX_NAME_SIZE + LineConfig::SIZE + 4 + 4 + 5 * 4 + 4;
    const NAME: &'static str = "gpio_v2_line_request";

    fn put<B: BufMut>(&self, enc: &mut Encoder<B>) {
        (0..GPIO_LINES_MAX).for_each(|i| enc.u32(self.offsets.get(i).copied().unwrap_or(0)));
        enc.bytes(&self.consumer.into_byte_array());
        self.config.put(enc);
        enc.u32(self.offsets.len() as u32);
        enc.u32(self.event_buffer_size);
        self.padding.iter().for_each(|p| enc.u32(*p));
        enc.i32(self.fd);
    }

    fn get<B: Buf>(dec: &mut Decoder<B>) -> Self {
        let mut all = [0u32; GPIO_LINES_MAX];
        all.iter_mut().for_each(|o| *o = dec.u32());
        let consumer = FixedStr::from_byte_array(dec.array());
        let config = LineConfig::get(dec);
        let num_lines = (dec.u32() as usize).min(GPIO_LINES_MAX);
        let event_buffer_size = dec.u32();
        let padding = [dec.u32(), dec.u32(), dec.u32(), dec.u32(), dec.u32()];
        let fd = dec.i32();

        Self {
            offsets: all[..num_lines].iter().copied().collect(),
            consumer,
            config,
            event_buffer_size,
            padding,
            fd,
        }
    }
}

/// `struct gpio_v2_line_values`
///
/// Bit `n` refers to the `n`th offset of the owning request, not to
/// line `n` of the chip.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LineValues {
    pub bits: u64,
    pub mask: u64,
}

impl Record for LineValues {
    const SIZE: usize = 16;
    const NAME: &'static str = "gpio_v2_line_values";

    fn put<B: BufMut>(&self, enc: &mut Encoder<B>) {
        enc.u64(self.bits);
        enc.u64(self.mask);
    }

    fn get<B: Buf>(dec: &mut Decoder<B>) -> Self {
        Self {
            bits: dec.u64(),
            mask: dec.u64(),
        }
    }
}

/// Write the used slots of a fixed-capacity array, then zero the rest.
fn put_slots<R: Record, B: BufMut>(enc: &mut Encoder<B>, used: &[R], capacity: usize) {
    used.iter().for_each(|r| r.put(enc));
    enc.zeros((capacity - used.len()) * R::SIZE);
}

/// Read all `N` slots, keeping the first `used` of them.
fn get_slots<R: Record, B: Buf, const N: usize>(
    dec: &mut Decoder<B>,
    used: usize,
) -> heapless::Vec<R, N> {
    let mut out = heapless::Vec::new();
    for idx in 0..N {
        let r = R::get(dec);
        if idx < used {
            // capacity is N, so this cannot overflow
            let _ = out.push(r);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uapi::ByteOrder;

    const ORDERS: [ByteOrder; 2] = [ByteOrder::Little, ByteOrder::Big];

    fn name(s: &str) -> Name {
        FixedStr::new(s).unwrap()
    }

    fn round_trip<R: Record + PartialEq + fmt::Debug>(r: &R) {
        for order in ORDERS {
            let bytes = r.encode(order);
            assert_eq!(bytes.len(), R::SIZE);
            assert_eq!(&R::decode(&bytes, order).unwrap(), r, "{order:?}");
        }
    }

    #[test]
    fn wire_sizes_match_kernel() {
        assert_eq!(ChipInfo::SIZE, 68);
        assert_eq!(LineAttribute::SIZE, 16);
        assert_eq!(LineInfo::SIZE, 256);
        assert_eq!(LineConfigAttribute::SIZE, 24);
        assert_eq!(LineConfig::SIZE, 272);
        assert_eq!(LineRequest::SIZE, 592);
        assert_eq!(LineValues::SIZE, 16);
    }

    #[test]
    fn chip_info_round_trip() {
        round_trip(&ChipInfo {
            name: name("gpiochip0"),
            label: name("pinctrl-bcm2711"),
            lines: 58,
        });
    }

    #[test]
    fn line_info_round_trip() {
        let mut attrs = heapless::Vec::new();
        attrs.push(LineAttribute::DebouncePeriod(1500)).unwrap();
        attrs
            .push(LineAttribute::Flags(LineFlags::INPUT | LineFlags::BIAS_PULL_UP))
            .unwrap();
        attrs
            .push(LineAttribute::Unknown {
                id: 9,
                raw: [1, 2, 3, 4, 5, 6, 7, 8],
            })
            .unwrap();

        round_trip(&LineInfo {
            name: name("GPIO17"),
            consumer: name("gpio-bank"),
            offset: 17,
            flags: LineFlags::USED | LineFlags::OUTPUT,
            attrs,
            padding: [0, 0, 0, 7],
        });
    }

    #[test]
    fn line_request_round_trip() {
        let mut config = LineConfig {
            flags: LineFlags::OUTPUT,
            ..LineConfig::default()
        };
        config
            .attrs
            .push(LineConfigAttribute {
                attr: LineAttribute::OutputValues(0b101),
                mask: 0b111,
            })
            .unwrap();

        round_trip(&LineRequest {
            offsets: [17, 22, 27].into_iter().collect(),
            consumer: name("gpio-bank"),
            config,
            event_buffer_size: 0,
            padding: [0; 5],
            fd: -1,
        });
        round_trip(&LineValues {
            bits: 0b10,
            mask: 0b11,
        });
    }

    #[test]
    fn values_follow_byte_order() {
        let v = LineValues {
            bits: 1,
            mask: 0x0102,
        };
        let le = v.encode(ByteOrder::Little);
        let be = v.encode(ByteOrder::Big);
        assert_eq!(le[0], 1);
        assert_eq!(be[7], 1);
        assert_eq!(&le[8..10], &[0x02, 0x01]);
        assert_eq!(&be[14..16], &[0x01, 0x02]);
    }

    #[test]
    fn debounce_leaves_trailing_union_bytes_zero() {
        let bytes = LineAttribute::DebouncePeriod(u32::MAX).encode(ByteOrder::Little);
        assert_eq!(&bytes[0..4], &3u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &[0xff; 4]);
        assert_eq!(&bytes[12..16], &[0; 4]);
    }

    #[test]
    fn request_count_follows_config() {
        let req = LineRequest {
            offsets: [4, 9].into_iter().collect(),
            ..LineRequest::default()
        };
        let bytes = req.encode(ByteOrder::Little);
        let at = GPIO_LINES_MAX * 4 + GPIO_MAX_NAME_SIZE + LineConfig::SIZE;
        assert_eq!(&bytes[at..at + 4], &2u32.to_le_bytes());
        assert_eq!(&bytes[0..8], &[4, 0, 0, 0, 9, 0, 0, 0]);
    }

    #[test]
    fn decode_rejects_wrong_size() {
        let err = ChipInfo::decode(&[0; 67], ByteOrder::native()).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::SizeMismatch {
                expected: 68,
                actual: 67,
                ..
            }
        ));
        let mut short = [0u8; 15];
        assert!(LineValues::default()
            .encode_into(&mut short, ByteOrder::native())
            .is_err());
    }

    #[test]
    fn flags_display() {
        assert_eq!(LineFlags::empty().to_string(), "unused,active-high");
        assert_eq!(
            (LineFlags::USED | LineFlags::OUTPUT | LineFlags::OPEN_DRAIN).to_string(),
            "in-use,active-high,output,open-drain"
        );
        assert_eq!(
            (LineFlags::ACTIVE_LOW | LineFlags::EVENT_CLOCK_REALTIME).to_string(),
            "unused,active-low,realtime-clock"
        );
    }

    #[test]
    fn line_info_display() {
        let mut info = LineInfo::for_offset(4);
        info.name = name("GPIO4");
        info.flags = LineFlags::USED | LineFlags::INPUT;
        info.attrs
            .push(LineAttribute::DebouncePeriod(10_000))
            .unwrap();
        assert_eq!(
            info.to_string(),
            "<4>\"GPIO4\"[\"\"](in-use,active-high,input)10ms"
        );
        assert_eq!(info.direction(), Direction::Input);
        assert_eq!(info.debounce(), Some(Duration::from_millis(10)));
    }
}
