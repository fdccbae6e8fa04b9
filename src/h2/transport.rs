use crate::h2::consts::*;
use crate::h2::hpack::{HpackDecoder, HpackEncoder};
use crate::types::{
    DispatcherConfig, Frame, FrameH2, FrameTypeH2, H2ConnectionErrorKind, H2ErrorCode,
    H2StreamErrorKind, Header, LocalSettings, ProtocolError, Transport,
};
use crate::utils::timeout_result;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::sync::MutexGuard;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, error, trace};

/// Header block split across HEADERS and CONTINUATION frames.
struct PendingHeaderBlock {
    stream_id: u32,
    block: BytesMut,
    end_stream: bool,
}

struct ReadState<S> {
    io: ReadHalf<S>,
    decoder: HpackDecoder,
    pending: Option<PendingHeaderBlock>,
}

/// Outbound HPACK context. Blocks are queued for the writer task while this
/// is locked, so encoding order and wire order agree.
struct EncodeState {
    encoder: HpackEncoder,
    peer_max_frame_size: usize,
}

/// Serialized frames for the writer task, acknowledged once on the wire.
struct WriteJob {
    buf: BytesMut,
    done: oneshot::Sender<Result<(), ProtocolError>>,
}

type Written = oneshot::Receiver<Result<(), ProtocolError>>;

/// [`Transport`] over a byte stream speaking the HTTP/2 wire format.
///
/// Connection-scoped frames (SETTINGS, PING, GOAWAY, connection-level
/// WINDOW_UPDATE) are handled here; only stream-addressed frames reach the
/// dispatcher.
///
/// Writes are performed by a dedicated task, one whole job at a time, so a
/// caller that stops waiting never leaves half a frame on the wire. A failed
/// or timed-out write breaks the connection: later writes fail at once and
/// the read side reports `TransportFailure`.
pub struct H2Transport<S> {
    reader: Mutex<ReadState<S>>,
    encode: std::sync::Mutex<EncodeState>,
    jobs: mpsc::UnboundedSender<WriteJob>,
    broken: watch::Receiver<Option<String>>,
    settings: LocalSettings,
}

impl<S> H2Transport<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Split `io` and start its writer task. Must be called from within a
    /// tokio runtime.
    pub fn new(io: S, config: &DispatcherConfig) -> Self {
        let (read_half, write_half) = tokio::io::split(io);
        let settings = config.settings.clone();
        let (jobs, queue) = mpsc::unbounded_channel();
        let (broken_tx, broken) = watch::channel(None);

        tokio::spawn(write_loop(
            write_half,
            queue,
            config.timeouts.write,
            broken_tx,
        ));

        Self {
            reader: Mutex::new(ReadState {
                io: read_half,
                decoder: HpackDecoder::new(settings.header_table_size as usize),
                pending: None,
            }),
            encode: std::sync::Mutex::new(EncodeState {
                encoder: HpackEncoder::new(),
                peer_max_frame_size: DEFAULT_MAX_FRAME_SIZE as usize,
            }),
            jobs,
            broken,
            settings,
        }
    }

    /// Send the client connection preface followed by our SETTINGS. The
    /// peer's SETTINGS are consumed by the read side once it starts.
    pub async fn handshake(&self) -> Result<(), ProtocolError> {
        let settings = FrameH2::settings(&[
            (
                SETTINGS_HEADER_TABLE_SIZE,
                self.settings.header_table_size,
            ),
            (SETTINGS_ENABLE_PUSH, 0),
            (
                SETTINGS_MAX_CONCURRENT_STREAMS,
                self.settings.max_concurrent_streams,
            ),
            (
                SETTINGS_INITIAL_WINDOW_SIZE,
                self.settings.initial_window_size,
            ),
            (SETTINGS_MAX_FRAME_SIZE, self.settings.max_frame_size),
            (
                SETTINGS_MAX_HEADER_LIST_SIZE,
                self.settings.max_header_list_size,
            ),
        ]);

        let mut buf = BytesMut::from(CONNECTION_PREFACE);
        buf.extend_from_slice(&settings.serialize()?);

        let written = self.enqueue(buf)?;
        self.wait_written(written).await?;
        debug!("client preface sent");
        Ok(())
    }

    /// Whether a write has failed and the connection is unusable.
    pub fn is_broken(&self) -> bool {
        self.broken.borrow().is_some()
    }

    fn encode_state(&self) -> MutexGuard<'_, EncodeState> {
        self.encode.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn broken_error(&self) -> ProtocolError {
        let cause = self.broken.borrow().clone();
        ProtocolError::TransportFailure(
            cause.unwrap_or_else(|| "connection writer stopped".to_string()),
        )
    }

    fn enqueue(&self, buf: BytesMut) -> Result<Written, ProtocolError> {
        let (done, written) = oneshot::channel();
        self.jobs
            .send(WriteJob { buf, done })
            .map_err(|_| self.broken_error())?;
        Ok(written)
    }

    async fn wait_written(&self, written: Written) -> Result<(), ProtocolError> {
        match written.await {
            Ok(result) => result,
            Err(_) => Err(self.broken_error()),
        }
    }

    async fn send_control(&self, frame: FrameH2) -> Result<(), ProtocolError> {
        let written = self.enqueue(BytesMut::from(&frame.serialize()?[..]))?;
        self.wait_written(written).await
    }

    async fn next_frame(&self) -> Result<Frame, ProtocolError> {
        let mut reader = self.reader.lock().await;
        loop {
            let Some(raw) = self.read_raw(&mut reader).await? else {
                continue;
            };
            if let Some(frame) = self.process(&mut reader, raw).await? {
                return Ok(frame);
            }
        }
    }

    /// Read one wire frame. Frames of unknown type are skipped.
    async fn read_raw(&self, reader: &mut ReadState<S>) -> Result<Option<FrameH2>, ProtocolError> {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        reader.io.read_exact(&mut header).await?;

        let length = FrameH2::payload_length(&header);
        if length > self.settings.max_frame_size as usize {
            return Err(ProtocolError::H2FrameSizeError(format!(
                "Frame of {} bytes exceeds advertised MAX_FRAME_SIZE {}",
                length, self.settings.max_frame_size
            )));
        }

        let mut frame_buf = vec![0u8; FRAME_HEADER_SIZE + length];
        frame_buf[..FRAME_HEADER_SIZE].copy_from_slice(&header);
        if length > 0 {
            reader.io.read_exact(&mut frame_buf[FRAME_HEADER_SIZE..]).await?;
        }

        if FrameTypeH2::from_u8(header[3]).is_none() {
            trace!(frame_type = header[3], length, "unknown frame type skipped");
            return Ok(None);
        }

        FrameH2::parse(&frame_buf).map(Some)
    }

    /// Handle one wire frame, returning the stream-level frame it carries
    /// once one is complete.
    async fn process(
        &self,
        reader: &mut ReadState<S>,
        raw: FrameH2,
    ) -> Result<Option<Frame>, ProtocolError> {
        if let Some(pending) = &reader.pending {
            if raw.frame_type != FrameTypeH2::Continuation || raw.stream_id != pending.stream_id {
                return Err(ProtocolError::H2ProtocolError(format!(
                    "expected CONTINUATION on stream {}, got {:?} on stream {}",
                    pending.stream_id, raw.frame_type, raw.stream_id
                )));
            }
        }

        match raw.frame_type {
            FrameTypeH2::Data => {
                require_stream(&raw)?;
                let payload = raw.data_payload()?;
                let flow_controlled = raw.payload.len() as u32;
                let padding = flow_controlled - payload.len() as u32;
                if flow_controlled > 0 {
                    self.send_control(FrameH2::window_update(0, flow_controlled))
                        .await?;
                }
                Ok(Some(Frame::Data {
                    stream_id: raw.stream_id,
                    payload,
                    padding,
                    end_stream: raw.is_end_stream(),
                }))
            }
            FrameTypeH2::Headers => {
                require_stream(&raw)?;
                let fragment = raw.header_fragment()?;
                if raw.is_end_headers() {
                    return decode_block(reader, raw.stream_id, &fragment, raw.is_end_stream())
                        .map(Some);
                }
                reader.pending = Some(PendingHeaderBlock {
                    stream_id: raw.stream_id,
                    block: BytesMut::from(&fragment[..]),
                    end_stream: raw.is_end_stream(),
                });
                Ok(None)
            }
            FrameTypeH2::Continuation => {
                let mut pending = reader.pending.take().ok_or_else(|| {
                    ProtocolError::H2ProtocolError(
                        "CONTINUATION frame without pending header block".to_string(),
                    )
                })?;
                pending.block.extend_from_slice(&raw.payload);
                if !raw.is_end_headers() {
                    reader.pending = Some(pending);
                    return Ok(None);
                }
                decode_block(
                    reader,
                    pending.stream_id,
                    &pending.block,
                    pending.end_stream,
                )
                .map(Some)
            }
            FrameTypeH2::RstStream => {
                require_stream(&raw)?;
                let code = H2ErrorCode::from(raw.payload_u32()?);
                Ok(Some(Frame::reset(raw.stream_id, code)))
            }
            FrameTypeH2::WindowUpdate => {
                let increment = raw.payload_u32()? & MAX_WINDOW_SIZE;
                if raw.stream_id == 0 {
                    trace!(increment, "connection WINDOW_UPDATE");
                    return Ok(None);
                }
                Ok(Some(Frame::window_update(raw.stream_id, increment)))
            }
            FrameTypeH2::Settings => {
                if raw.is_ack() {
                    trace!("SETTINGS acknowledged by peer");
                    return Ok(None);
                }
                self.apply_peer_settings(&raw)?;
                self.send_control(FrameH2::settings_ack()).await?;
                Ok(None)
            }
            FrameTypeH2::Ping => {
                if raw.payload.len() != 8 {
                    return Err(ProtocolError::H2FrameSizeError(
                        "PING payload must be 8 bytes".to_string(),
                    ));
                }
                if !raw.is_ack() {
                    let mut data = [0u8; 8];
                    data.copy_from_slice(&raw.payload);
                    self.send_control(FrameH2::ping_ack(data)).await?;
                }
                Ok(None)
            }
            FrameTypeH2::Priority => Ok(None),
            FrameTypeH2::PushPromise => Err(ProtocolError::H2ConnectionError(
                H2ConnectionErrorKind::ProtocolViolation(
                    "PUSH_PROMISE received with push disabled".to_string(),
                ),
            )),
            FrameTypeH2::GoAway => Err(goaway_error(&raw)),
        }
    }

    fn apply_peer_settings(&self, raw: &FrameH2) -> Result<(), ProtocolError> {
        for (id, value) in raw.settings_entries()? {
            match id {
                SETTINGS_MAX_FRAME_SIZE => {
                    if !(DEFAULT_MAX_FRAME_SIZE..=MAX_FRAME_SIZE_UPPER_BOUND).contains(&value) {
                        return Err(ProtocolError::H2ProtocolError(format!(
                            "Invalid MAX_FRAME_SIZE value {}",
                            value
                        )));
                    }
                    self.encode_state().peer_max_frame_size = value as usize;
                }
                SETTINGS_INITIAL_WINDOW_SIZE if value > MAX_WINDOW_SIZE => {
                    return Err(ProtocolError::H2ProtocolError(
                        "Invalid INITIAL_WINDOW_SIZE value".to_string(),
                    ));
                }
                SETTINGS_ENABLE_PUSH if value > 1 => {
                    return Err(ProtocolError::H2ProtocolError(
                        "Invalid ENABLE_PUSH value".to_string(),
                    ));
                }
                _ => trace!(id, value, "peer setting"),
            }
        }
        Ok(())
    }

    /// HEADERS followed by as many CONTINUATION frames as the peer's
    /// MAX_FRAME_SIZE requires, serialized back to back.
    fn encode_header_block(
        state: &mut EncodeState,
        stream_id: u32,
        headers: &[Header],
        end_stream: bool,
    ) -> Result<BytesMut, ProtocolError> {
        let mut encoded = state.encoder.encode(headers);
        let max_frame = state.peer_max_frame_size;
        let mut out = BytesMut::new();
        let mut first = true;

        loop {
            let chunk = encoded.split_to(encoded.len().min(max_frame));
            let is_last = encoded.is_empty();
            let frame = if first {
                FrameH2::headers(stream_id, chunk, end_stream, is_last)
            } else {
                FrameH2::continuation(stream_id, chunk, is_last)
            };
            out.extend_from_slice(&frame.serialize()?);

            if is_last {
                return Ok(out);
            }
            first = false;
        }
    }

    fn encode_data(
        max_frame: usize,
        stream_id: u32,
        mut payload: Bytes,
        end_stream: bool,
    ) -> Result<BytesMut, ProtocolError> {
        let mut out = BytesMut::with_capacity(payload.len() + FRAME_HEADER_SIZE);
        loop {
            let chunk = payload.split_to(payload.len().min(max_frame));
            let is_last = payload.is_empty();
            out.extend_from_slice(&FrameH2::data(stream_id, chunk, end_stream && is_last).serialize()?);
            if is_last {
                return Ok(out);
            }
        }
    }
}

#[async_trait]
impl<S> Transport for H2Transport<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn read_frame(&self) -> Result<Frame, ProtocolError> {
        let mut broken = self.broken.clone();
        tokio::select! {
            biased;
            cause = broken.wait_for(|cause| cause.is_some()) => {
                let cause = match cause {
                    Ok(cause) => (*cause).clone().unwrap_or_default(),
                    Err(_) => "connection writer stopped".to_string(),
                };
                Err(ProtocolError::TransportFailure(cause))
            }
            frame = self.next_frame() => frame,
        }
    }

    async fn write_frame(&self, frame: Frame) -> Result<(), ProtocolError> {
        let written = {
            let mut state = self.encode_state();
            let buf = match frame {
                Frame::Headers {
                    stream_id,
                    headers,
                    end_stream,
                } => Self::encode_header_block(&mut state, stream_id, &headers, end_stream)?,
                Frame::Data {
                    stream_id,
                    payload,
                    end_stream,
                    ..
                } => Self::encode_data(state.peer_max_frame_size, stream_id, payload, end_stream)?,
                Frame::WindowUpdate {
                    stream_id,
                    increment,
                } => BytesMut::from(&FrameH2::window_update(stream_id, increment).serialize()?[..]),
                Frame::Reset {
                    stream_id,
                    error_code,
                } => BytesMut::from(&FrameH2::rst(stream_id, error_code as u32).serialize()?[..]),
            };
            self.enqueue(buf)?
        };
        self.wait_written(written).await
    }
}

/// Owns the write half. Each job is written and flushed completely before
/// the next one starts; after the first failure every job is refused.
async fn write_loop<S>(
    mut io: WriteHalf<S>,
    mut jobs: mpsc::UnboundedReceiver<WriteJob>,
    write_timeout: Option<Duration>,
    broken: watch::Sender<Option<String>>,
) where
    S: AsyncWrite + Send + 'static,
{
    while let Some(job) = jobs.recv().await {
        let failure = broken.borrow().clone();
        let result = match failure {
            Some(cause) => Err(ProtocolError::TransportFailure(cause)),
            None => {
                let written = timeout_result(write_timeout, async {
                    io.write_all(&job.buf).await?;
                    io.flush().await?;
                    Ok::<(), ProtocolError>(())
                })
                .await;
                if let Err(err) = &written {
                    error!(error = %err, len = job.buf.len(), "connection write failed");
                    broken.send_replace(Some(format!("connection write failed: {}", err)));
                }
                written
            }
        };
        let _ = job.done.send(result);
    }

    let _ = io.shutdown().await;
}

/// Decode a complete header block. Fields that are not valid UTF-8 fail only
/// their stream; the HPACK context has already consumed the block by then.
fn decode_block<S>(
    reader: &mut ReadState<S>,
    stream_id: u32,
    block: &[u8],
    end_stream: bool,
) -> Result<Frame, ProtocolError> {
    match reader.decoder.decode(block) {
        Ok(headers) => Ok(Frame::headers(stream_id, headers, end_stream)),
        Err(ProtocolError::HeaderEncodingError(reason)) => Err(ProtocolError::StreamFailure {
            stream_id,
            kind: H2StreamErrorKind::ProtocolViolation(reason),
        }),
        Err(err) => Err(err),
    }
}

fn require_stream(raw: &FrameH2) -> Result<(), ProtocolError> {
    if raw.stream_id == 0 {
        return Err(ProtocolError::H2ProtocolError(format!(
            "{:?} frame on stream 0",
            raw.frame_type
        )));
    }
    Ok(())
}

fn goaway_error(raw: &FrameH2) -> ProtocolError {
    if raw.payload.len() < 8 {
        return ProtocolError::H2FrameSizeError("Invalid GOAWAY frame size".to_string());
    }

    let last_stream_id = u32::from_be_bytes([
        raw.payload[0],
        raw.payload[1],
        raw.payload[2],
        raw.payload[3],
    ]) & MAX_STREAM_ID;
    let error_code = H2ErrorCode::from(u32::from_be_bytes([
        raw.payload[4],
        raw.payload[5],
        raw.payload[6],
        raw.payload[7],
    ]));
    let debug_data = String::from_utf8_lossy(&raw.payload[8..]).to_string();

    debug!(last_stream_id, error_code = %error_code, "GOAWAY received");
    ProtocolError::H2ConnectionError(H2ConnectionErrorKind::GoAway(error_code, debug_data))
}
