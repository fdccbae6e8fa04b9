use bytes::Bytes;
use hpack::{Decoder, Encoder};

use crate::types::{Header, ProtocolError};

/// Outbound half of the connection's HPACK context. Header blocks must be
/// encoded in the order they are written to the wire.
pub struct HpackEncoder {
    encoder: Encoder<'static>,
}

/// Inbound half of the connection's HPACK context.
pub struct HpackDecoder {
    decoder: Decoder<'static>,
    max_table_size: usize,
}

impl HpackEncoder {
    pub fn new() -> Self {
        Self {
            encoder: Encoder::new(),
        }
    }

    pub fn encode(&mut self, headers: &[Header]) -> Bytes {
        let header_tuples = headers
            .iter()
            .map(|h| {
                let name = h.name.as_bytes();
                let value = h.value.as_ref().map(|v| v.as_bytes()).unwrap_or(&[]);
                (name, value)
            })
            .collect::<Vec<_>>();

        Bytes::from(self.encoder.encode(header_tuples))
    }
}

impl Default for HpackEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackDecoder {
    pub fn new(max_table_size: usize) -> Self {
        let mut decoder = Decoder::new();
        decoder.set_max_table_size(max_table_size);
        Self {
            decoder,
            max_table_size,
        }
    }

    pub fn max_table_size(&self) -> usize {
        self.max_table_size
    }

    /// Decode one complete header block. The dynamic table is updated before
    /// field names and values are checked for UTF-8, so a
    /// `HeaderEncodingError` leaves the context in step with the peer.
    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<Header>, ProtocolError> {
        match self.decoder.decode(block) {
            Ok(entries) => entries
                .into_iter()
                .map(|(name, value)| Self::into_header(name, value))
                .collect(),
            Err(err) => Err(ProtocolError::H2CompressionError(format!(
                "HPACK decode error: {:?}",
                err
            ))),
        }
    }

    fn into_header(name: Vec<u8>, value: Vec<u8>) -> Result<Header, ProtocolError> {
        let name = String::from_utf8(name).map_err(|e| {
            ProtocolError::HeaderEncodingError(format!("Invalid UTF-8 in header name: {}", e))
        })?;
        let value = if value.is_empty() {
            None
        } else {
            Some(String::from_utf8(value).map_err(|e| {
                ProtocolError::HeaderEncodingError(format!("Invalid UTF-8 in header value: {}", e))
            })?)
        };

        Ok(Header { name, value })
    }
}
