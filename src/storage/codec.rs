use bytes::Bytes;

use crate::errors::CacheError;
use crate::object::Object;
use crate::Result;

/// Encodes and decodes cached objects.
///
/// The cache never looks inside payloads, but it verifies at construction
/// that the configured codec round-trips the cached type, so a mismatched
/// codec fails loudly instead of corrupting the first watch event.
pub trait Codec: Send + Sync + 'static {
    fn encode(
        &self,
        obj: &Object,
    ) -> Result<Bytes>;

    fn decode(
        &self,
        data: &[u8],
    ) -> Result<Object>;
}

/// Default codec: compact binary encoding of the object record.
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn encode(
        &self,
        obj: &Object,
    ) -> Result<Bytes> {
        let data = bincode::serialize(obj)
            .map_err(|e| CacheError::CodecMismatch(e.to_string()))?;
        Ok(Bytes::from(data))
    }

    fn decode(
        &self,
        data: &[u8],
    ) -> Result<Object> {
        let obj = bincode::deserialize(data)
            .map_err(|e| CacheError::CodecMismatch(e.to_string()))?;
        Ok(obj)
    }
}

/// Construction-time self check: the codec must round-trip an empty object
/// of the cached type.
pub fn check_codec(codec: &dyn Codec) -> Result<()> {
    let probe = Object::default();
    let encoded = codec.encode(&probe)?;
    let decoded = codec.decode(&encoded)?;
    if decoded != probe {
        return Err(CacheError::CodecMismatch(
            "encode/decode round trip altered the object".to_string(),
        )
        .into());
    }
    Ok(())
}
