use crate::h2::consts::MAX_STREAM_ID;
use crate::h2::registry::{ResponseFuture, StreamRecord, StreamRegistry};
use crate::h2::state::SendEvent;
use crate::h2::transport::H2Transport;
use crate::h2::{read, write};
use crate::stream;
use crate::types::{DispatcherConfig, Frame, H2ErrorCode, ProtocolError, Request, Transport};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub(crate) enum CloseCause {
    Failed(String),
    Shutdown,
}

/// State shared between the dispatcher handle, the read loop and every body
/// write loop of one connection.
pub(crate) struct Shared {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) registry: StreamRegistry,
    pub(crate) config: DispatcherConfig,
    next_stream_id: AtomicU32,
    /// Held from id allocation until the stream's HEADERS are written, so
    /// new streams reach the wire in increasing id order.
    opening: tokio::sync::Mutex<()>,
    closed: OnceLock<CloseCause>,
}

impl Shared {
    fn ensure_open(&self) -> Result<(), ProtocolError> {
        match self.closed.get() {
            None => Ok(()),
            Some(CloseCause::Failed(cause)) => Err(ProtocolError::TransportFailure(cause.clone())),
            Some(CloseCause::Shutdown) => Err(ProtocolError::ConnectionClosed),
        }
    }

    fn allocate_stream_id(&self) -> Result<u32, ProtocolError> {
        self.next_stream_id
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |id| {
                if id > MAX_STREAM_ID {
                    None
                } else {
                    Some(id + 2)
                }
            })
            .map_err(|_| ProtocolError::StreamIdsExhausted)
    }

    /// Mark the connection closed, then fail and drop every registered
    /// stream. Streams inserted after the mark see it on their re-check.
    pub(crate) fn close(&self, cause: CloseCause, err: impl Fn() -> ProtocolError) {
        let _ = self.closed.set(cause);
        for record in self.registry.drain() {
            debug!(stream_id = record.stream_id(), "failing stream on connection close");
            record.fail(err());
        }
    }

    pub(crate) fn retire(&self, stream_id: u32) {
        if self.registry.remove(stream_id).is_some() {
            debug!(stream_id, active = self.registry.len(), "stream retired");
        }
    }
}

/// Client side of one HTTP/2 connection: assigns stream ids, writes request
/// frames and routes inbound frames back to the stream that owns them.
pub struct Dispatcher {
    shared: Arc<Shared>,
    read_task: JoinHandle<()>,
}

impl Dispatcher {
    /// Start dispatching over an already established transport. Must be
    /// called from within a tokio runtime.
    pub fn new<T>(transport: T, config: DispatcherConfig) -> Result<Self, ProtocolError>
    where
        T: Transport + 'static,
    {
        config.validate()?;

        let shared = Arc::new(Shared {
            transport: Arc::new(transport),
            registry: StreamRegistry::new(),
            next_stream_id: AtomicU32::new(config.initial_stream_id),
            opening: tokio::sync::Mutex::new(()),
            config,
            closed: OnceLock::new(),
        });
        let read_task = tokio::spawn(read::read_loop(Arc::clone(&shared)));

        Ok(Self { shared, read_task })
    }

    /// Open a connection to `target` and start dispatching on it.
    ///
    /// `http://` and `h2c://` use cleartext HTTP/2 with prior knowledge;
    /// `https://` and `h2://` negotiate `h2` over TLS.
    pub async fn connect(target: &str, config: DispatcherConfig) -> Result<Self, ProtocolError> {
        config.validate()?;

        let target = stream::parse_target(target)?;
        let io = stream::connect(&target, &config).await?;
        let transport = H2Transport::new(io, &config);
        transport.handshake().await?;

        info!(authority = %target.authority(), "HTTP/2 connection established");
        Self::new(transport, config)
    }

    /// Send `request` on a fresh stream.
    ///
    /// Returns once the request HEADERS frame is written; the body, if any,
    /// is streamed by a background task. The returned future resolves with
    /// the response headers. Concurrent calls open their streams one at a
    /// time.
    pub async fn dispatch(&self, request: Request) -> Result<ResponseFuture, ProtocolError> {
        let shared = &self.shared;
        shared.ensure_open()?;
        let opening = shared.opening.lock().await;

        let stream_id = shared.allocate_stream_id()?;
        let (record, response) = StreamRecord::new(stream_id);
        if !shared.registry.insert_if_absent(stream_id, Arc::clone(&record)) {
            warn!(stream_id, "stream id already registered");
            return Err(ProtocolError::DuplicateStreamIdentifier(stream_id));
        }
        if let Err(err) = shared.ensure_open() {
            shared.retire(stream_id);
            return Err(err);
        }

        let transition = record.machine().on_send(request);
        let transition = match transition {
            Ok(transition) => transition,
            Err(err) => {
                shared.retire(stream_id);
                return Err(err);
            }
        };
        debug!(
            stream_id,
            from = %transition.from,
            to = %transition.to,
            "dispatching request"
        );

        let (headers, body) = match transition.event {
            SendEvent::HeadersOnly { headers } => (headers, None),
            SendEvent::Streaming { headers, body } => (headers, Some(body)),
            SendEvent::Finished => {
                shared.retire(stream_id);
                return Err(ProtocolError::IllegalStreamTransition {
                    stream_id,
                    state: transition.from.to_string(),
                    frame: "request HEADERS".to_string(),
                });
            }
        };

        let end_of_stream = body.is_none();
        if let Err(err) =
            write::send_headers(shared.transport.as_ref(), stream_id, headers, end_of_stream).await
        {
            warn!(stream_id, error = %err, "failed to write request HEADERS");
            record.machine().abort();
            shared.retire(stream_id);
            return Err(err);
        }
        drop(opening);

        if let Some(body) = body {
            tokio::spawn(write::write_body_loop(
                Arc::clone(shared),
                Arc::clone(&record),
                body,
            ));
        }

        Ok(response)
    }

    /// Abort an open stream: stop its body writer, fail whoever waits on it
    /// with `Cancelled` and tell the peer with RST_STREAM(CANCEL).
    ///
    /// Returns `false` when the stream is not open.
    pub async fn cancel(&self, stream_id: u32) -> bool {
        let Some(record) = self.shared.registry.remove(stream_id) else {
            return false;
        };

        debug!(stream_id, "cancelling stream");
        record.fail(ProtocolError::Cancelled(stream_id));

        if let Err(err) = self
            .shared
            .transport
            .write_frame(Frame::reset(stream_id, H2ErrorCode::Cancel))
            .await
        {
            warn!(stream_id, error = %err, "failed to write RST_STREAM");
        }
        true
    }

    /// Number of streams that have not yet closed in both directions.
    pub fn active_streams(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn stream_ids(&self) -> Vec<u32> {
        self.shared.registry.stream_ids()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.get().is_some()
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.shared.config
    }

    /// Stop reading and fail every open stream with `ConnectionClosed`.
    pub fn shutdown(&self) {
        self.read_task.abort();
        self.shared
            .close(CloseCause::Shutdown, || ProtocolError::ConnectionClosed);
        debug!("dispatcher shut down");
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.read_task.abort();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.shared.registry)
            .field("closed", &self.shared.closed.get())
            .finish()
    }
}
