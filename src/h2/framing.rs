use crate::h2::consts::*;
use crate::types::{FrameH2, FrameTypeH2, ProtocolError};
use bytes::{BufMut, Bytes, BytesMut};

// HTTP/2 Frame Format (RFC 7540 Section 4.1):
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                 Length (24)                   |
// +---------------+---------------+---------------+
// |   Type (8)    |   Flags (8)   |
// +-+-+-----------+---------------+-------------------------------+
// |R|                 Stream Identifier (31)                      |
// +=+=============================================================+
// |                   Frame Payload (0...)                      ...
// +---------------------------------------------------------------+

impl FrameTypeH2 {
    pub fn from_u8(value: u8) -> Option<Self> {
        let frame_type = match value {
            DATA_FRAME_TYPE => FrameTypeH2::Data,
            HEADERS_FRAME_TYPE => FrameTypeH2::Headers,
            PRIORITY_FRAME_TYPE => FrameTypeH2::Priority,
            RST_STREAM_FRAME_TYPE => FrameTypeH2::RstStream,
            SETTINGS_FRAME_TYPE => FrameTypeH2::Settings,
            PUSH_PROMISE_FRAME_TYPE => FrameTypeH2::PushPromise,
            PING_FRAME_TYPE => FrameTypeH2::Ping,
            GOAWAY_FRAME_TYPE => FrameTypeH2::GoAway,
            WINDOW_UPDATE_FRAME_TYPE => FrameTypeH2::WindowUpdate,
            CONTINUATION_FRAME_TYPE => FrameTypeH2::Continuation,
            _ => return None,
        };
        Some(frame_type)
    }
}

impl FrameH2 {
    pub fn new(frame_type: FrameTypeH2, flags: u8, stream_id: u32, payload: Bytes) -> Self {
        Self {
            frame_type,
            flags,
            stream_id,
            payload,
        }
    }

    pub fn data(stream_id: u32, data: Bytes, end_stream: bool) -> Self {
        let flags = if end_stream { END_STREAM_FLAG } else { 0 };
        Self::new(FrameTypeH2::Data, flags, stream_id, data)
    }

    /// A HEADERS frame carrying an already HPACK-encoded block fragment.
    pub fn headers(stream_id: u32, fragment: Bytes, end_stream: bool, end_headers: bool) -> Self {
        let mut flags = 0;
        if end_stream {
            flags |= END_STREAM_FLAG;
        }
        if end_headers {
            flags |= END_HEADERS_FLAG;
        }
        Self::new(FrameTypeH2::Headers, flags, stream_id, fragment)
    }

    pub fn continuation(stream_id: u32, fragment: Bytes, end_headers: bool) -> Self {
        let flags = if end_headers { END_HEADERS_FLAG } else { 0 };
        Self::new(FrameTypeH2::Continuation, flags, stream_id, fragment)
    }

    pub fn settings(settings: &[(u16, u32)]) -> Self {
        let mut payload = BytesMut::with_capacity(settings.len() * 6);
        for &(id, value) in settings {
            payload.put_u16(id);
            payload.put_u32(value);
        }
        Self::new(FrameTypeH2::Settings, 0, 0, payload.freeze())
    }

    pub fn settings_ack() -> Self {
        Self::new(FrameTypeH2::Settings, ACK_FLAG, 0, Bytes::new())
    }

    pub fn window_update(stream_id: u32, increment: u32) -> Self {
        let mut payload = BytesMut::with_capacity(4);
        payload.put_u32(increment & MAX_WINDOW_SIZE);
        Self::new(FrameTypeH2::WindowUpdate, 0, stream_id, payload.freeze())
    }

    pub fn rst(stream_id: u32, error_code: u32) -> Self {
        let mut payload = BytesMut::with_capacity(4);
        payload.put_u32(error_code);
        Self::new(FrameTypeH2::RstStream, 0, stream_id, payload.freeze())
    }

    pub fn ping_ack(data: [u8; 8]) -> Self {
        let payload = Bytes::copy_from_slice(&data);
        Self::new(FrameTypeH2::Ping, ACK_FLAG, 0, payload)
    }

    pub fn goaway(last_stream_id: u32, error_code: u32, debug_data: Option<&[u8]>) -> Self {
        let mut payload = BytesMut::with_capacity(8 + debug_data.map(|d| d.len()).unwrap_or(0));

        payload.put_u32(last_stream_id & MAX_STREAM_ID);
        payload.put_u32(error_code);

        if let Some(debug) = debug_data {
            payload.put_slice(debug);
        }

        Self::new(FrameTypeH2::GoAway, 0, 0, payload.freeze())
    }

    pub fn frame_type_u8(&self) -> u8 {
        match self.frame_type {
            FrameTypeH2::Data => DATA_FRAME_TYPE,
            FrameTypeH2::Headers => HEADERS_FRAME_TYPE,
            FrameTypeH2::Priority => PRIORITY_FRAME_TYPE,
            FrameTypeH2::RstStream => RST_STREAM_FRAME_TYPE,
            FrameTypeH2::Settings => SETTINGS_FRAME_TYPE,
            FrameTypeH2::PushPromise => PUSH_PROMISE_FRAME_TYPE,
            FrameTypeH2::Ping => PING_FRAME_TYPE,
            FrameTypeH2::GoAway => GOAWAY_FRAME_TYPE,
            FrameTypeH2::WindowUpdate => WINDOW_UPDATE_FRAME_TYPE,
            FrameTypeH2::Continuation => CONTINUATION_FRAME_TYPE,
        }
    }

    pub fn is_end_stream(&self) -> bool {
        (self.flags & END_STREAM_FLAG) != 0
    }

    pub fn is_end_headers(&self) -> bool {
        (self.flags & END_HEADERS_FLAG) != 0
    }

    pub fn is_ack(&self) -> bool {
        (self.flags & ACK_FLAG) != 0
    }

    pub fn is_padded(&self) -> bool {
        (self.flags & PADDED_FLAG) != 0
    }

    pub fn has_priority(&self) -> bool {
        (self.flags & PRIORITY_FLAG) != 0
    }

    /// First four payload bytes as a big-endian integer (RST_STREAM,
    /// WINDOW_UPDATE).
    pub fn payload_u32(&self) -> Result<u32, ProtocolError> {
        if self.payload.len() != 4 {
            return Err(ProtocolError::H2FrameSizeError(format!(
                "{:?} frame must have a 4-byte payload, got {}",
                self.frame_type,
                self.payload.len()
            )));
        }
        Ok(u32::from_be_bytes([
            self.payload[0],
            self.payload[1],
            self.payload[2],
            self.payload[3],
        ]))
    }

    pub fn settings_entries(&self) -> Result<Vec<(u16, u32)>, ProtocolError> {
        if self.payload.len() % 6 != 0 {
            return Err(ProtocolError::H2FrameSizeError(
                "SETTINGS payload is not a multiple of 6 bytes".to_string(),
            ));
        }

        Ok(self
            .payload
            .chunks_exact(6)
            .map(|entry| {
                let id = u16::from_be_bytes([entry[0], entry[1]]);
                let value = u32::from_be_bytes([entry[2], entry[3], entry[4], entry[5]]);
                (id, value)
            })
            .collect())
    }

    /// DATA payload with padding removed.
    pub fn data_payload(&self) -> Result<Bytes, ProtocolError> {
        let payload = &self.payload;
        if !self.is_padded() {
            return Ok(payload.clone());
        }

        if payload.is_empty() {
            return Err(ProtocolError::H2ProtocolError(
                "DATA frame with PADDED flag set but empty payload".to_string(),
            ));
        }

        let pad_length = payload[0] as usize;
        if pad_length > payload.len().saturating_sub(1) {
            return Err(ProtocolError::H2ProtocolError(
                "Padding length exceeds DATA payload".to_string(),
            ));
        }

        let end = payload.len() - pad_length;
        Ok(payload.slice(1..end))
    }

    /// HEADERS header block fragment with padding and priority fields removed.
    pub fn header_fragment(&self) -> Result<Bytes, ProtocolError> {
        let payload = &self.payload;
        let mut offset = 0usize;
        let mut pad_length = 0usize;

        if self.is_padded() {
            if payload.is_empty() {
                return Err(ProtocolError::H2ProtocolError(
                    "PADDED flag set but no pad length available".to_string(),
                ));
            }
            pad_length = payload[0] as usize;
            offset += 1;
        }

        if self.has_priority() {
            if payload.len() < offset + 5 {
                return Err(ProtocolError::H2ProtocolError(
                    "PRIORITY flag set but insufficient payload".to_string(),
                ));
            }
            offset += 5;
        }

        if pad_length > payload.len().saturating_sub(offset) {
            return Err(ProtocolError::H2ProtocolError(
                "Padding exceeds payload size".to_string(),
            ));
        }

        let end = payload.len() - pad_length;
        Ok(payload.slice(offset..end))
    }

    pub fn serialize(&self) -> Result<Bytes, ProtocolError> {
        if self.payload.len() > MAX_FRAME_SIZE_UPPER_BOUND as usize {
            return Err(ProtocolError::H2FrameSizeError(format!(
                "Frame payload size {} exceeds maximum {}",
                self.payload.len(),
                MAX_FRAME_SIZE_UPPER_BOUND
            )));
        }

        let mut result = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.payload.len());

        // Length (24 bits)
        let length = self.payload.len() as u32;
        result.put_u8(((length >> 16) & 0xFF) as u8);
        result.put_u8(((length >> 8) & 0xFF) as u8);
        result.put_u8((length & 0xFF) as u8);

        result.put_u8(self.frame_type_u8());
        result.put_u8(self.flags);

        // Stream ID (31 bits, with reserved bit clear)
        result.put_u32(self.stream_id & MAX_STREAM_ID);

        result.put_slice(&self.payload);

        Ok(result.freeze())
    }

    /// Payload length announced by a 9-byte frame header.
    pub fn payload_length(header: &[u8; FRAME_HEADER_SIZE]) -> usize {
        ((header[0] as usize) << 16) | ((header[1] as usize) << 8) | (header[2] as usize)
    }

    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(ProtocolError::InvalidResponse(
                "Frame too short".to_string(),
            ));
        }

        let length = ((data[0] as u32) << 16) | ((data[1] as u32) << 8) | (data[2] as u32);
        let frame_type_u8 = data[3];
        let flags = data[4];

        // Stream Identifier (31 bits, R bit reserved)
        let stream_id = u32::from_be_bytes([data[5], data[6], data[7], data[8]]) & MAX_STREAM_ID;

        if data.len() < FRAME_HEADER_SIZE + length as usize {
            return Err(ProtocolError::InvalidResponse(
                "Incomplete frame payload".to_string(),
            ));
        }

        let frame_type = FrameTypeH2::from_u8(frame_type_u8).ok_or_else(|| {
            ProtocolError::InvalidResponse(format!("Unknown frame type: {}", frame_type_u8))
        })?;

        let payload =
            Bytes::copy_from_slice(&data[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + length as usize]);

        Ok(FrameH2 {
            frame_type,
            flags,
            stream_id,
            payload,
        })
    }
}
