use crate::encoding::{Decoder, DecoderV1, DecoderV2, Encoder, EncoderV1, EncoderV2};
use crate::error::Result;

/// Types with a binary representation in both update formats.
pub trait Encode {
    /// Write the fields of `self` through the given encoder.
    fn encode<E: Encoder>(&self, encoder: &mut E);

    /// Encode using the v1 format.
    fn encode_v1(&self) -> Vec<u8> {
        let mut encoder = EncoderV1::new();
        self.encode(&mut encoder);
        encoder.to_vec()
    }

    /// Encode using the v2 format.
    fn encode_v2(&self) -> Vec<u8> {
        let mut encoder = EncoderV2::new();
        self.encode(&mut encoder);
        encoder.to_vec()
    }
}

/// The inverse of [Encode].
pub trait Decode: Sized {
    /// Read a value through the given decoder.
    fn decode<D: Decoder>(decoder: &mut D) -> Result<Self>;

    /// Decode a v1 payload.
    fn decode_v1(data: &[u8]) -> Result<Self> {
        let mut decoder = DecoderV1::new(data);
        Self::decode(&mut decoder)
    }

    /// Decode a v2 payload.
    fn decode_v2(data: &[u8]) -> Result<Self> {
        let mut decoder = DecoderV2::new(data)?;
        Self::decode(&mut decoder)
    }
}
