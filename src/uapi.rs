//! Wire records of the GPIO character device ABI.

mod codec;

pub use codec::{ByteOrder, Decoder, Encoder, Record};

pub mod v2;
