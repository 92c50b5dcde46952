//! The v2 update format: every kind of field goes to its own column, each
//! column is run-length compressed on its own and the columns are
//! concatenated behind length prefixes. The plain "rest" stream is appended
//! last without a prefix.

use std::collections::HashMap;

use crate::any::Any;
use crate::encoding::rle::{
    IntDiffOptRleDecoder, IntDiffOptRleEncoder, RleDecoder, RleEncoder, StringDecoder,
    StringEncoder, UIntOptRleDecoder, UIntOptRleEncoder,
};
use crate::encoding::{Cursor, Decoder, Encoder, Write};
use crate::error::{Error, Result};
use crate::id::{ClientID, ID};

/// Writer of the v2 update format.
#[derive(Debug, Default)]
pub struct EncoderV2 {
    key_table: HashMap<String, u32>,
    key_clock: u32,
    ds_curr_val: u32,
    rest: Vec<u8>,
    key_clock_encoder: IntDiffOptRleEncoder,
    client_encoder: UIntOptRleEncoder,
    left_clock_encoder: IntDiffOptRleEncoder,
    right_clock_encoder: IntDiffOptRleEncoder,
    info_encoder: RleEncoder,
    string_encoder: StringEncoder,
    parent_info_encoder: RleEncoder,
    type_ref_encoder: UIntOptRleEncoder,
    len_encoder: UIntOptRleEncoder,
}

impl EncoderV2 {
    /// Create an empty encoder.
    pub fn new() -> Self {
        EncoderV2::default()
    }
}

impl Encoder for EncoderV2 {
    fn to_vec(self) -> Vec<u8> {
        let mut buf = Vec::new();
        // feature flag, reserved
        buf.write_var(0);
        buf.write_buf(&self.key_clock_encoder.into_vec());
        buf.write_buf(&self.client_encoder.into_vec());
        buf.write_buf(&self.left_clock_encoder.into_vec());
        buf.write_buf(&self.right_clock_encoder.into_vec());
        buf.write_buf(&self.info_encoder.into_vec());
        buf.write_buf(&self.string_encoder.into_vec());
        buf.write_buf(&self.parent_info_encoder.into_vec());
        buf.write_buf(&self.type_ref_encoder.into_vec());
        buf.write_buf(&self.len_encoder.into_vec());
        buf.write_all(&self.rest);
        buf
    }

    fn rest(&mut self) -> &mut Vec<u8> {
        &mut self.rest
    }

    fn reset_ds_cur_val(&mut self) {
        self.ds_curr_val = 0;
    }

    fn write_ds_clock(&mut self, clock: u32) {
        debug_assert!(clock >= self.ds_curr_val);
        let diff = clock - self.ds_curr_val;
        self.ds_curr_val = clock;
        self.rest.write_var(diff as u64);
    }

    fn write_ds_len(&mut self, len: u32) {
        assert!(len > 0, "delete set ranges are never empty");
        self.rest.write_var((len - 1) as u64);
        self.ds_curr_val += len;
    }

    fn write_left_id(&mut self, id: &ID) {
        self.client_encoder.write(id.client);
        self.left_clock_encoder.write(id.clock);
    }

    fn write_right_id(&mut self, id: &ID) {
        self.client_encoder.write(id.client);
        self.right_clock_encoder.write(id.clock);
    }

    fn write_client(&mut self, client: ClientID) {
        self.client_encoder.write(client);
    }

    fn write_info(&mut self, info: u8) {
        self.info_encoder.write(info);
    }

    fn write_parent_info(&mut self, is_named: bool) {
        self.parent_info_encoder.write(if is_named { 1 } else { 0 });
    }

    fn write_type_ref(&mut self, type_ref: u8) {
        self.type_ref_encoder.write(type_ref as u64);
    }

    fn write_len(&mut self, len: u32) {
        self.len_encoder.write(len as u64);
    }

    fn write_any(&mut self, any: &Any) {
        any.encode(&mut self.rest);
    }

    fn write_json(&mut self, any: &Any) {
        any.encode(&mut self.rest);
    }

    fn write_key(&mut self, key: &str) {
        match self.key_table.get(key) {
            Some(clock) => self.key_clock_encoder.write(*clock),
            None => {
                let clock = self.key_clock;
                self.key_clock += 1;
                self.key_clock_encoder.write(clock);
                self.string_encoder.write(key);
                self.key_table.insert(key.to_owned(), clock);
            }
        }
    }

    fn write_string(&mut self, s: &str) {
        self.string_encoder.write(s);
    }

    fn write_buf(&mut self, buf: &[u8]) {
        self.rest.write_buf(buf);
    }
}

/// Reader of the v2 update format.
pub struct DecoderV2<'a> {
    rest: Cursor<'a>,
    keys: Vec<String>,
    ds_curr_val: u32,
    key_clock_decoder: IntDiffOptRleDecoder<'a>,
    client_decoder: UIntOptRleDecoder<'a>,
    left_clock_decoder: IntDiffOptRleDecoder<'a>,
    right_clock_decoder: IntDiffOptRleDecoder<'a>,
    info_decoder: RleDecoder<'a>,
    string_decoder: StringDecoder<'a>,
    parent_info_decoder: RleDecoder<'a>,
    type_ref_decoder: UIntOptRleDecoder<'a>,
    len_decoder: UIntOptRleDecoder<'a>,
}

impl<'a> DecoderV2<'a> {
    /// Split `buf` into its columns. Fails if any column header is truncated.
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        let mut cursor = Cursor::new(buf);
        let _feature_flag = cursor.read_var()?;
        let key_clock_decoder = IntDiffOptRleDecoder::new(cursor.read_buf()?);
        let client_decoder = UIntOptRleDecoder::new(cursor.read_buf()?);
        let left_clock_decoder = IntDiffOptRleDecoder::new(cursor.read_buf()?);
        let right_clock_decoder = IntDiffOptRleDecoder::new(cursor.read_buf()?);
        let info_decoder = RleDecoder::new(cursor.read_buf()?);
        let string_decoder = StringDecoder::new(cursor.read_buf()?)?;
        let parent_info_decoder = RleDecoder::new(cursor.read_buf()?);
        let type_ref_decoder = UIntOptRleDecoder::new(cursor.read_buf()?);
        let len_decoder = UIntOptRleDecoder::new(cursor.read_buf()?);
        Ok(DecoderV2 {
            rest: cursor,
            keys: Vec::new(),
            ds_curr_val: 0,
            key_clock_decoder,
            client_decoder,
            left_clock_decoder,
            right_clock_decoder,
            info_decoder,
            string_decoder,
            parent_info_decoder,
            type_ref_decoder,
            len_decoder,
        })
    }
}

impl<'a> Decoder for DecoderV2<'a> {
    fn read_var(&mut self) -> Result<u64> {
        self.rest.read_var()
    }

    fn reset_ds_cur_val(&mut self) {
        self.ds_curr_val = 0;
    }

    fn read_ds_clock(&mut self) -> Result<u32> {
        let diff = self.rest.read_var_u32()?;
        self.ds_curr_val = self
            .ds_curr_val
            .checked_add(diff)
            .ok_or(Error::VarIntOverflow)?;
        Ok(self.ds_curr_val)
    }

    fn read_ds_len(&mut self) -> Result<u32> {
        let len = self
            .rest
            .read_var_u32()?
            .checked_add(1)
            .ok_or(Error::VarIntOverflow)?;
        self.ds_curr_val = self
            .ds_curr_val
            .checked_add(len)
            .ok_or(Error::VarIntOverflow)?;
        Ok(len)
    }

    fn read_left_id(&mut self) -> Result<ID> {
        let client = self.client_decoder.read()?;
        let clock = self.left_clock_decoder.read()?;
        Ok(ID::new(client, clock))
    }

    fn read_right_id(&mut self) -> Result<ID> {
        let client = self.client_decoder.read()?;
        let clock = self.right_clock_decoder.read()?;
        Ok(ID::new(client, clock))
    }

    fn read_client(&mut self) -> Result<ClientID> {
        self.client_decoder.read()
    }

    fn read_info(&mut self) -> Result<u8> {
        self.info_decoder.read()
    }

    fn read_parent_info(&mut self) -> Result<bool> {
        Ok(self.parent_info_decoder.read()? == 1)
    }

    fn read_type_ref(&mut self) -> Result<u8> {
        let type_ref = self.type_ref_decoder.read()?;
        if type_ref > u8::MAX as u64 {
            return Err(Error::UnexpectedValue(format!("type ref {}", type_ref)));
        }
        Ok(type_ref as u8)
    }

    fn read_len(&mut self) -> Result<u32> {
        self.len_decoder.read_u32()
    }

    fn read_any(&mut self) -> Result<Any> {
        Any::decode(&mut self.rest)
    }

    fn read_json(&mut self) -> Result<Any> {
        Any::decode(&mut self.rest)
    }

    fn read_key(&mut self) -> Result<String> {
        let clock = self.key_clock_decoder.read()? as usize;
        if clock < self.keys.len() {
            Ok(self.keys[clock].clone())
        } else {
            let key = self.string_decoder.read()?;
            self.keys.push(key.clone());
            Ok(key)
        }
    }

    fn read_string(&mut self) -> Result<String> {
        self.string_decoder.read()
    }

    fn read_buf(&mut self) -> Result<Vec<u8>> {
        Ok(self.rest.read_buf()?.to_vec())
    }
}
