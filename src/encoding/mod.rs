//! Binary primitives shared by every wire format in this crate.
//!
//! Unsigned integers use the usual 7-bit continuation varint. Signed
//! integers carry the sign in the second-highest bit of the first byte and
//! can represent a negative zero, which the run-length column encoders use
//! as a flag.

pub(crate) mod rle;
pub mod v1;
pub mod v2;

use crate::any::Any;
use crate::error::{Error, Result};
use crate::id::{ClientID, ID};

pub use self::v1::{DecoderV1, EncoderV1};
pub use self::v2::{DecoderV2, EncoderV2};

/// Field-level writer of an update. Both wire versions write the same
/// logical fields in the same order; they differ in where each field lands.
pub trait Encoder {
    /// Finish encoding and return the bytes.
    fn to_vec(self) -> Vec<u8>;

    /// The plain stream holding counts, clocks and delete sets.
    fn rest(&mut self) -> &mut Vec<u8>;

    /// Start a new client in a delete set.
    fn reset_ds_cur_val(&mut self);
    /// Write the start clock of a delete range.
    fn write_ds_clock(&mut self, clock: u32);
    /// Write the length of a delete range. Must not be zero.
    fn write_ds_len(&mut self, len: u32);

    /// Write an origin id.
    fn write_left_id(&mut self, id: &ID);
    /// Write a right-origin id.
    fn write_right_id(&mut self, id: &ID);
    /// Write the client of a block run.
    fn write_client(&mut self, client: ClientID);
    /// Write the info byte of a structure.
    fn write_info(&mut self, info: u8);
    /// Write whether the parent is addressed by root name (`true`) or item id.
    fn write_parent_info(&mut self, is_named: bool);
    /// Write a shared type reference.
    fn write_type_ref(&mut self, type_ref: u8);
    /// Write a content length.
    fn write_len(&mut self, len: u32);
    /// Write a dynamic value.
    fn write_any(&mut self, any: &Any);
    /// Write an embed or format value.
    fn write_json(&mut self, any: &Any);
    /// Write a format or node-name key.
    fn write_key(&mut self, key: &str);
    /// Write a string.
    fn write_string(&mut self, s: &str);
    /// Write a byte buffer.
    fn write_buf(&mut self, buf: &[u8]);
}

/// Field-level reader mirroring [Encoder].
pub trait Decoder {
    /// Read an unsigned varint from the plain stream holding counts, clocks
    /// and delete sets.
    fn read_var(&mut self) -> Result<u64>;

    /// Like [Decoder::read_var], for values that must fit into 32 bits.
    fn read_var_u32(&mut self) -> Result<u32> {
        let value = self.read_var()?;
        if value > u32::MAX as u64 {
            Err(Error::VarIntOverflow)
        } else {
            Ok(value as u32)
        }
    }

    /// Start a new client in a delete set.
    fn reset_ds_cur_val(&mut self);
    /// Read the start clock of a delete range.
    fn read_ds_clock(&mut self) -> Result<u32>;
    /// Read the length of a delete range.
    fn read_ds_len(&mut self) -> Result<u32>;

    /// Read an origin id.
    fn read_left_id(&mut self) -> Result<ID>;
    /// Read a right-origin id.
    fn read_right_id(&mut self) -> Result<ID>;
    /// Read the client of a block run.
    fn read_client(&mut self) -> Result<ClientID>;
    /// Read the info byte of a structure.
    fn read_info(&mut self) -> Result<u8>;
    /// Read whether the parent is addressed by root name.
    fn read_parent_info(&mut self) -> Result<bool>;
    /// Read a shared type reference.
    fn read_type_ref(&mut self) -> Result<u8>;
    /// Read a content length.
    fn read_len(&mut self) -> Result<u32>;
    /// Read a dynamic value.
    fn read_any(&mut self) -> Result<Any>;
    /// Read an embed or format value.
    fn read_json(&mut self) -> Result<Any>;
    /// Read a format or node-name key.
    fn read_key(&mut self) -> Result<String>;
    /// Read a string.
    fn read_string(&mut self) -> Result<String>;
    /// Read a byte buffer.
    fn read_buf(&mut self) -> Result<Vec<u8>>;
}

/// Append-only sink for the primitive wire types.
pub trait Write {
    /// Write raw bytes.
    fn write_all(&mut self, buf: &[u8]);

    /// Write a single byte.
    fn write_u8(&mut self, value: u8) {
        self.write_all(&[value])
    }

    /// Write an unsigned varint.
    fn write_var(&mut self, mut value: u64) {
        while value > 0b0111_1111 {
            self.write_u8(0b1000_0000 | (value as u8 & 0b0111_1111));
            value >>= 7;
        }
        self.write_u8(value as u8)
    }

    /// Write a signed varint given as magnitude and sign flag. `negative`
    /// with a zero magnitude encodes negative zero.
    fn write_var_signed(&mut self, magnitude: u64, negative: bool) {
        let mut first = (magnitude & 0b0011_1111) as u8;
        if negative {
            first |= 0b0100_0000;
        }
        if magnitude > 0b0011_1111 {
            first |= 0b1000_0000;
        }
        self.write_u8(first);
        let mut rest = magnitude >> 6;
        while rest > 0 {
            let mut byte = (rest & 0b0111_1111) as u8;
            if rest > 0b0111_1111 {
                byte |= 0b1000_0000;
            }
            self.write_u8(byte);
            rest >>= 7;
        }
    }

    /// Write a signed varint.
    fn write_var_int(&mut self, value: i64) {
        self.write_var_signed(value.unsigned_abs(), value < 0)
    }

    /// Write a length-prefixed byte buffer.
    fn write_buf(&mut self, buf: &[u8]) {
        self.write_var(buf.len() as u64);
        self.write_all(buf)
    }

    /// Write a length-prefixed UTF-8 string.
    fn write_string(&mut self, s: &str) {
        self.write_buf(s.as_bytes())
    }

    /// Write a big-endian 32-bit float.
    fn write_f32(&mut self, value: f32) {
        self.write_all(&value.to_be_bytes())
    }

    /// Write a big-endian 64-bit float.
    fn write_f64(&mut self, value: f64) {
        self.write_all(&value.to_be_bytes())
    }

    /// Write a big-endian 64-bit signed integer.
    fn write_i64(&mut self, value: i64) {
        self.write_all(&value.to_be_bytes())
    }
}

impl Write for Vec<u8> {
    fn write_all(&mut self, buf: &[u8]) {
        self.extend_from_slice(buf)
    }

    fn write_u8(&mut self, value: u8) {
        self.push(value)
    }
}

/// A signed varint as read from the wire, keeping track of negative zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signed {
    /// The decoded value.
    pub value: i64,
    /// The sign flag as written, set for negative zero too.
    pub negative: bool,
}

/// Read position over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    next: usize,
}

impl<'a> Cursor<'a> {
    /// Start reading at the beginning of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, next: 0 }
    }

    /// True while unread bytes remain.
    pub fn has_content(&self) -> bool {
        self.next < self.buf.len()
    }

    /// Read exactly `len` bytes.
    pub fn read_exact(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.next + len;
        if end > self.buf.len() {
            return Err(Error::EndOfBuffer {
                needed: end - self.buf.len(),
            });
        }
        let slice = &self.buf[self.next..end];
        self.next = end;
        Ok(slice)
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        match self.buf.get(self.next) {
            Some(byte) => {
                self.next += 1;
                Ok(*byte)
            }
            None => Err(Error::EndOfBuffer { needed: 1 }),
        }
    }

    /// Read an unsigned varint.
    pub fn read_var(&mut self) -> Result<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift >= 64 || (shift == 63 && byte & 0b0111_1110 != 0) {
                return Err(Error::VarIntOverflow);
            }
            value |= ((byte & 0b0111_1111) as u64) << shift;
            if byte < 0b1000_0000 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    /// Read an unsigned varint that must fit into 32 bits.
    pub fn read_var_u32(&mut self) -> Result<u32> {
        let value = self.read_var()?;
        if value > u32::MAX as u64 {
            Err(Error::VarIntOverflow)
        } else {
            Ok(value as u32)
        }
    }

    /// Read a signed varint.
    pub fn read_var_signed(&mut self) -> Result<Signed> {
        let first = self.read_u8()?;
        let negative = first & 0b0100_0000 != 0;
        let mut magnitude = (first & 0b0011_1111) as u64;
        if first & 0b1000_0000 != 0 {
            let mut shift = 6u32;
            loop {
                let byte = self.read_u8()?;
                if shift > 62 {
                    return Err(Error::VarIntOverflow);
                }
                magnitude |= ((byte & 0b0111_1111) as u64) << shift;
                if byte < 0b1000_0000 {
                    break;
                }
                shift += 7;
            }
        }
        if magnitude > i64::MAX as u64 {
            return Err(Error::VarIntOverflow);
        }
        let value = if negative {
            -(magnitude as i64)
        } else {
            magnitude as i64
        };
        Ok(Signed { value, negative })
    }

    /// Read a length-prefixed byte buffer.
    pub fn read_buf(&mut self) -> Result<&'a [u8]> {
        let len = self.read_var()? as usize;
        self.read_exact(len)
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<&'a str> {
        let buf = self.read_buf()?;
        std::str::from_utf8(buf).map_err(|_| Error::InvalidString)
    }

    /// Read a big-endian 32-bit float.
    pub fn read_f32(&mut self) -> Result<f32> {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(self.read_exact(4)?);
        Ok(f32::from_be_bytes(bytes))
    }

    /// Read a big-endian 64-bit float.
    pub fn read_f64(&mut self) -> Result<f64> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.read_exact(8)?);
        Ok(f64::from_be_bytes(bytes))
    }

    /// Read a big-endian 64-bit signed integer.
    pub fn read_i64(&mut self) -> Result<i64> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.read_exact(8)?);
        Ok(i64::from_be_bytes(bytes))
    }
}
