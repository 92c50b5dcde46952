//! Column encoders used by the v2 update format.
//!
//! Each encoder collapses runs of equal (or equally spaced) values. The run
//! counts are stored minus their smallest possible value and the "is this a
//! run" flag is folded into the sign (or lowest bit) of the value itself.

use crate::encoding::{Cursor, Write};
use crate::error::{Error, Result};

/// Run-length encoder for single bytes. The count of the last run is never
/// written; the decoder repeats the final value forever.
#[derive(Debug, Default)]
pub(crate) struct RleEncoder {
    buf: Vec<u8>,
    last: Option<u8>,
    count: u64,
}

impl RleEncoder {
    pub fn write(&mut self, value: u8) {
        if self.last == Some(value) {
            self.count += 1;
        } else {
            if self.count > 0 {
                self.buf.write_var(self.count - 1);
            }
            self.count = 1;
            self.buf.write_u8(value);
            self.last = Some(value);
        }
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

pub(crate) struct RleDecoder<'a> {
    cursor: Cursor<'a>,
    last: u8,
    // -1 repeats `last` until the column is exhausted
    count: i64,
}

impl<'a> RleDecoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        RleDecoder {
            cursor: Cursor::new(buf),
            last: 0,
            count: 0,
        }
    }

    pub fn read(&mut self) -> Result<u8> {
        if self.count == 0 {
            self.last = self.cursor.read_u8()?;
            self.count = if self.cursor.has_content() {
                self.cursor.read_var()? as i64 + 1
            } else {
                -1
            };
        }
        self.count -= 1;
        Ok(self.last)
    }
}

/// Run-length encoder for unsigned integers. A single value is written as a
/// positive signed varint, a run as a negative one followed by `count - 2`.
#[derive(Debug, Default)]
pub(crate) struct UIntOptRleEncoder {
    buf: Vec<u8>,
    last: u64,
    count: u64,
}

impl UIntOptRleEncoder {
    pub fn write(&mut self, value: u64) {
        if self.count > 0 && self.last == value {
            self.count += 1;
        } else {
            self.flush();
            self.count = 1;
            self.last = value;
        }
    }

    fn flush(&mut self) {
        if self.count > 0 {
            self.buf.write_var_signed(self.last, self.count > 1);
            if self.count > 1 {
                self.buf.write_var(self.count - 2);
            }
        }
    }

    pub fn into_vec(mut self) -> Vec<u8> {
        self.flush();
        self.buf
    }
}

pub(crate) struct UIntOptRleDecoder<'a> {
    cursor: Cursor<'a>,
    last: u64,
    count: u64,
}

impl<'a> UIntOptRleDecoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self::from_cursor(Cursor::new(buf))
    }

    fn from_cursor(cursor: Cursor<'a>) -> Self {
        UIntOptRleDecoder {
            cursor,
            last: 0,
            count: 0,
        }
    }

    pub fn read(&mut self) -> Result<u64> {
        if self.count == 0 {
            let signed = self.cursor.read_var_signed()?;
            self.last = signed.value.unsigned_abs();
            self.count = 1;
            if signed.negative {
                self.count = self.cursor.read_var()? + 2;
            }
        }
        self.count -= 1;
        Ok(self.last)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let value = self.read()?;
        if value > u32::MAX as u64 {
            Err(Error::VarIntOverflow)
        } else {
            Ok(value as u32)
        }
    }
}

/// Run-length encoder over the differences between consecutive values. The
/// lowest bit of the written diff tells whether a run count follows.
#[derive(Debug, Default)]
pub(crate) struct IntDiffOptRleEncoder {
    buf: Vec<u8>,
    last: i64,
    diff: i64,
    count: u64,
}

impl IntDiffOptRleEncoder {
    pub fn write(&mut self, value: u32) {
        let value = value as i64;
        if self.count > 0 && self.last + self.diff == value {
            self.last = value;
            self.count += 1;
        } else {
            self.flush();
            self.count = 1;
            self.diff = value - self.last;
            self.last = value;
        }
    }

    fn flush(&mut self) {
        if self.count > 0 {
            let encoded = self.diff * 2 + if self.count == 1 { 0 } else { 1 };
            self.buf.write_var_int(encoded);
            if self.count > 1 {
                self.buf.write_var(self.count - 2);
            }
        }
    }

    pub fn into_vec(mut self) -> Vec<u8> {
        self.flush();
        self.buf
    }
}

pub(crate) struct IntDiffOptRleDecoder<'a> {
    cursor: Cursor<'a>,
    last: i64,
    diff: i64,
    count: u64,
}

impl<'a> IntDiffOptRleDecoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        IntDiffOptRleDecoder {
            cursor: Cursor::new(buf),
            last: 0,
            diff: 0,
            count: 0,
        }
    }

    pub fn read(&mut self) -> Result<u32> {
        if self.count == 0 {
            let encoded = self.cursor.read_var_signed()?.value;
            self.diff = encoded >> 1;
            self.count = 1;
            if encoded & 1 == 1 {
                self.count = self.cursor.read_var()? + 2;
            }
        }
        self.last += self.diff;
        self.count -= 1;
        if self.last < 0 || self.last > u32::MAX as i64 {
            return Err(Error::VarIntOverflow);
        }
        Ok(self.last as u32)
    }
}

/// Concatenates every string into one buffer and stores the UTF-16 length of
/// each piece in a separate run-length column.
#[derive(Debug, Default)]
pub(crate) struct StringEncoder {
    buf: String,
    lens: UIntOptRleEncoder,
}

impl StringEncoder {
    pub fn write(&mut self, s: &str) {
        self.buf.push_str(s);
        self.lens.write(s.encode_utf16().count() as u64);
    }

    pub fn into_vec(self) -> Vec<u8> {
        let mut out = Vec::new();
        out.write_string(&self.buf);
        out.write_all(&self.lens.into_vec());
        out
    }
}

pub(crate) struct StringDecoder<'a> {
    units: Vec<u16>,
    pos: usize,
    lens: UIntOptRleDecoder<'a>,
}

impl<'a> StringDecoder<'a> {
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        let mut cursor = Cursor::new(buf);
        let units = cursor.read_string()?.encode_utf16().collect();
        Ok(StringDecoder {
            units,
            pos: 0,
            lens: UIntOptRleDecoder::from_cursor(cursor),
        })
    }

    pub fn read(&mut self) -> Result<String> {
        let len = self.lens.read()? as usize;
        let end = self.pos + len;
        if end > self.units.len() {
            return Err(Error::EndOfBuffer {
                needed: end - self.units.len(),
            });
        }
        let s = String::from_utf16(&self.units[self.pos..end]).map_err(|_| Error::InvalidString)?;
        self.pos = end;
        Ok(s)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use quickcheck::quickcheck;

    quickcheck! {
        fn prop_rle_round_trip(values: Vec<u8>) -> bool {
            let mut encoder = RleEncoder::default();
            for v in values.iter() {
                encoder.write(*v % 4);
            }
            let buf = encoder.into_vec();
            let mut decoder = RleDecoder::new(&buf);
            values.iter().all(|v| decoder.read().ok() == Some(*v % 4))
        }

        fn prop_uint_opt_rle_round_trip(values: Vec<u32>) -> bool {
            let mut encoder = UIntOptRleEncoder::default();
            for v in values.iter() {
                encoder.write((*v % 3) as u64);
            }
            let buf = encoder.into_vec();
            let mut decoder = UIntOptRleDecoder::new(&buf);
            values.iter().all(|v| decoder.read().ok() == Some((*v % 3) as u64))
        }

        fn prop_int_diff_round_trip(values: Vec<u32>) -> bool {
            let mut encoder = IntDiffOptRleEncoder::default();
            for v in values.iter() {
                encoder.write(*v);
            }
            let buf = encoder.into_vec();
            let mut decoder = IntDiffOptRleDecoder::new(&buf);
            values.iter().all(|v| decoder.read().ok() == Some(*v))
        }

        fn prop_string_round_trip(values: Vec<String>) -> bool {
            let mut encoder = StringEncoder::default();
            for v in values.iter() {
                encoder.write(v);
            }
            let buf = encoder.into_vec();
            let mut decoder = match StringDecoder::new(&buf) {
                Ok(decoder) => decoder,
                Err(_) => return false,
            };
            values.iter().all(|v| decoder.read().ok().as_ref() == Some(v))
        }
    }

    #[test]
    fn test_runs_of_zero_use_negative_zero() {
        let mut encoder = UIntOptRleEncoder::default();
        for _ in 0..5 {
            encoder.write(0);
        }
        assert_eq!(encoder.into_vec(), vec![0b0100_0000, 3]);
    }

    #[test]
    fn test_sequential_clocks_collapse() {
        let mut encoder = IntDiffOptRleEncoder::default();
        for clock in 10..110 {
            encoder.write(clock);
        }
        let buf = encoder.into_vec();
        assert!(buf.len() <= 4, "{:?}", buf);
        let mut decoder = IntDiffOptRleDecoder::new(&buf);
        for clock in 10..110 {
            assert_eq!(decoder.read().unwrap(), clock);
        }
    }

    #[test]
    fn test_rle_last_run_repeats() {
        let mut encoder = RleEncoder::default();
        encoder.write(7);
        encoder.write(7);
        let buf = encoder.into_vec();
        assert_eq!(buf, vec![7]);
        let mut decoder = RleDecoder::new(&buf);
        assert_eq!(decoder.read().unwrap(), 7);
        assert_eq!(decoder.read().unwrap(), 7);
    }
}
