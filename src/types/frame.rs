use super::error::{H2ErrorCode, ProtocolError};
use super::Header;
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTypeH2 {
    Data,         // 0x0
    Headers,      // 0x1
    Priority,     // 0x2
    RstStream,    // 0x3
    Settings,     // 0x4
    PushPromise,  // 0x5
    Ping,         // 0x6
    GoAway,       // 0x7
    WindowUpdate, // 0x8
    Continuation, // 0x9
}

/// A frame as it appears on the wire: header fields plus the raw payload.
#[derive(Debug, Clone)]
pub struct FrameH2 {
    pub frame_type: FrameTypeH2,
    pub flags: u8,
    pub stream_id: u32,
    pub payload: Bytes,
}

/// Stream-addressed frames exchanged between the dispatcher and its transport.
///
/// Header blocks are already decoded and padding already stripped; `padding`
/// on DATA counts the flow-controlled padding octets (including the pad length
/// field) so that credit can be returned for the whole frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Headers {
        stream_id: u32,
        headers: Vec<Header>,
        end_stream: bool,
    },
    Data {
        stream_id: u32,
        payload: Bytes,
        padding: u32,
        end_stream: bool,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    Reset {
        stream_id: u32,
        error_code: H2ErrorCode,
    },
}

impl Frame {
    pub fn headers(stream_id: u32, headers: Vec<Header>, end_stream: bool) -> Self {
        Frame::Headers {
            stream_id,
            headers,
            end_stream,
        }
    }

    pub fn data(stream_id: u32, payload: impl Into<Bytes>, end_stream: bool) -> Self {
        Frame::Data {
            stream_id,
            payload: payload.into(),
            padding: 0,
            end_stream,
        }
    }

    pub fn window_update(stream_id: u32, increment: u32) -> Self {
        Frame::WindowUpdate {
            stream_id,
            increment,
        }
    }

    pub fn reset(stream_id: u32, error_code: H2ErrorCode) -> Self {
        Frame::Reset {
            stream_id,
            error_code,
        }
    }

    pub fn stream_id(&self) -> u32 {
        match self {
            Frame::Headers { stream_id, .. }
            | Frame::Data { stream_id, .. }
            | Frame::WindowUpdate { stream_id, .. }
            | Frame::Reset { stream_id, .. } => *stream_id,
        }
    }

    pub fn is_end_stream(&self) -> bool {
        match self {
            Frame::Headers { end_stream, .. } | Frame::Data { end_stream, .. } => *end_stream,
            _ => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Headers { .. } => "HEADERS",
            Frame::Data { .. } => "DATA",
            Frame::WindowUpdate { .. } => "WINDOW_UPDATE",
            Frame::Reset { .. } => "RST_STREAM",
        }
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind())?;
        if self.is_end_stream() {
            write!(f, "(END_STREAM)")?;
        }
        Ok(())
    }
}

/// The byte transport a dispatcher multiplexes over.
///
/// Reads happen from a single task; writes may be submitted concurrently by
/// several tasks and must each land on the wire as a unit.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn read_frame(&self) -> Result<Frame, ProtocolError>;

    async fn write_frame(&self, frame: Frame) -> Result<(), ProtocolError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn read_frame(&self) -> Result<Frame, ProtocolError> {
        (**self).read_frame().await
    }

    async fn write_frame(&self, frame: Frame) -> Result<(), ProtocolError> {
        (**self).write_frame(frame).await
    }
}
