//! The v1 update format: every field is written in place, in field order,
//! as a plain varint, byte or length-prefixed buffer.

use crate::any::Any;
use crate::encoding::{Cursor, Decoder, Encoder, Write};
use crate::error::{Error, Result};
use crate::id::{ClientID, ID};

/// Writer of the v1 update format.
#[derive(Debug, Default)]
pub struct EncoderV1 {
    buf: Vec<u8>,
}

impl EncoderV1 {
    /// Create an empty encoder.
    pub fn new() -> Self {
        EncoderV1::default()
    }

    fn write_id(&mut self, id: &ID) {
        self.buf.write_var(id.client);
        self.buf.write_var(id.clock as u64);
    }
}

impl Encoder for EncoderV1 {
    fn to_vec(self) -> Vec<u8> {
        self.buf
    }

    fn rest(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }

    fn reset_ds_cur_val(&mut self) {}

    fn write_ds_clock(&mut self, clock: u32) {
        self.buf.write_var(clock as u64)
    }

    fn write_ds_len(&mut self, len: u32) {
        assert!(len > 0, "delete set ranges are never empty");
        self.buf.write_var(len as u64)
    }

    fn write_left_id(&mut self, id: &ID) {
        self.write_id(id)
    }

    fn write_right_id(&mut self, id: &ID) {
        self.write_id(id)
    }

    fn write_client(&mut self, client: ClientID) {
        self.buf.write_var(client)
    }

    fn write_info(&mut self, info: u8) {
        self.buf.write_u8(info)
    }

    fn write_parent_info(&mut self, is_named: bool) {
        self.buf.write_var(if is_named { 1 } else { 0 })
    }

    fn write_type_ref(&mut self, type_ref: u8) {
        self.buf.write_var(type_ref as u64)
    }

    fn write_len(&mut self, len: u32) {
        self.buf.write_var(len as u64)
    }

    fn write_any(&mut self, any: &Any) {
        any.encode(&mut self.buf)
    }

    fn write_json(&mut self, any: &Any) {
        self.buf.write_string(&any.to_json_string())
    }

    fn write_key(&mut self, key: &str) {
        self.buf.write_string(key)
    }

    fn write_string(&mut self, s: &str) {
        self.buf.write_string(s)
    }

    fn write_buf(&mut self, buf: &[u8]) {
        self.buf.write_buf(buf)
    }
}

/// Reader of the v1 update format.
pub struct DecoderV1<'a> {
    cursor: Cursor<'a>,
}

impl<'a> DecoderV1<'a> {
    /// Start decoding `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        DecoderV1 {
            cursor: Cursor::new(buf),
        }
    }

    fn read_id(&mut self) -> Result<ID> {
        let client = self.cursor.read_var()?;
        let clock = self.cursor.read_var_u32()?;
        Ok(ID::new(client, clock))
    }
}

impl<'a> Decoder for DecoderV1<'a> {
    fn read_var(&mut self) -> Result<u64> {
        self.cursor.read_var()
    }

    fn reset_ds_cur_val(&mut self) {}

    fn read_ds_clock(&mut self) -> Result<u32> {
        self.cursor.read_var_u32()
    }

    fn read_ds_len(&mut self) -> Result<u32> {
        let len = self.cursor.read_var_u32()?;
        if len == 0 {
            return Err(Error::InvariantViolation(
                "zero-length delete range".to_string(),
            ));
        }
        Ok(len)
    }

    fn read_left_id(&mut self) -> Result<ID> {
        self.read_id()
    }

    fn read_right_id(&mut self) -> Result<ID> {
        self.read_id()
    }

    fn read_client(&mut self) -> Result<ClientID> {
        self.cursor.read_var()
    }

    fn read_info(&mut self) -> Result<u8> {
        self.cursor.read_u8()
    }

    fn read_parent_info(&mut self) -> Result<bool> {
        Ok(self.cursor.read_var()? == 1)
    }

    fn read_type_ref(&mut self) -> Result<u8> {
        let type_ref = self.cursor.read_var()?;
        if type_ref > u8::MAX as u64 {
            return Err(Error::UnexpectedValue(format!("type ref {}", type_ref)));
        }
        Ok(type_ref as u8)
    }

    fn read_len(&mut self) -> Result<u32> {
        self.cursor.read_var_u32()
    }

    fn read_any(&mut self) -> Result<Any> {
        Any::decode(&mut self.cursor)
    }

    fn read_json(&mut self) -> Result<Any> {
        let json = self.cursor.read_string()?;
        Any::from_json_str(json)
    }

    fn read_key(&mut self) -> Result<String> {
        Ok(self.cursor.read_string()?.to_owned())
    }

    fn read_string(&mut self) -> Result<String> {
        Ok(self.cursor.read_string()?.to_owned())
    }

    fn read_buf(&mut self) -> Result<Vec<u8>> {
        Ok(self.cursor.read_buf()?.to_vec())
    }
}
