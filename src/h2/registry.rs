use crate::h2::state::StreamStateMachine;
use crate::types::{BodySender, ProtocolError, Response};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::sync::{oneshot, watch};

type Completion = oneshot::Sender<Result<Response, ProtocolError>>;

/// Everything the dispatcher tracks for one open stream.
pub struct StreamRecord {
    stream_id: u32,
    machine: Mutex<StreamStateMachine>,
    completion: Mutex<Option<Completion>>,
    cancel: watch::Sender<bool>,
}

/// Resolves with the stream's final response, or with the error that
/// ended the stream first.
#[must_use = "futures do nothing unless polled"]
pub struct ResponseFuture {
    stream_id: u32,
    rx: oneshot::Receiver<Result<Response, ProtocolError>>,
}

impl StreamRecord {
    pub fn new(stream_id: u32) -> (Arc<Self>, ResponseFuture) {
        let (tx, rx) = oneshot::channel();
        let (cancel, _) = watch::channel(false);
        let record = Arc::new(Self {
            stream_id,
            machine: Mutex::new(StreamStateMachine::new(stream_id)),
            completion: Mutex::new(Some(tx)),
            cancel,
        });
        (record, ResponseFuture { stream_id, rx })
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Lock the state machine. The guard must not be held across an await.
    pub fn machine(&self) -> MutexGuard<'_, StreamStateMachine> {
        self.machine.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_closed(&self) -> bool {
        self.machine().is_closed()
    }

    /// Whether the response has not been delivered yet.
    pub fn is_pending(&self) -> bool {
        self.completion
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Resolve the response future. Only the first call has an effect.
    pub fn complete(&self, result: Result<Response, ProtocolError>) -> bool {
        let sender = self
            .completion
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match sender {
            Some(sender) => sender.send(result).is_ok(),
            None => false,
        }
    }

    pub fn cancel_signal(&self) -> watch::Receiver<bool> {
        self.cancel.subscribe()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Close both directions and deliver `err` to whoever is still waiting
    /// on this stream: the response future if it is pending, otherwise the
    /// response body. Any request body writer is told to stop.
    pub fn fail(&self, err: ProtocolError) {
        let sink = self.machine().abort();
        self.fail_with_sink(err, sink);
    }

    /// Like [`StreamRecord::fail`] for a stream whose state machine already
    /// closed and handed out its body sink.
    pub fn fail_with_sink(&self, err: ProtocolError, sink: Option<BodySender>) {
        self.cancel.send_replace(true);

        let completion = self
            .completion
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match completion {
            Some(completion) => {
                let _ = completion.send(Err(err));
            }
            None => {
                if let Some(sink) = sink {
                    sink.abort(err);
                }
            }
        }
    }
}

impl std::fmt::Debug for StreamRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRecord")
            .field("stream_id", &self.stream_id)
            .field("pending", &self.is_pending())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl ResponseFuture {
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }
}

impl Future for ResponseFuture {
    type Output = Result<Response, ProtocolError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ProtocolError::ConnectionClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("stream_id", &self.stream_id)
            .finish()
    }
}

/// Concurrent map from stream id to its record.
#[derive(Default)]
pub struct StreamRegistry {
    streams: DashMap<u32, Arc<StreamRecord>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `record` under `stream_id` unless that id is already taken.
    pub fn insert_if_absent(&self, stream_id: u32, record: Arc<StreamRecord>) -> bool {
        match self.streams.entry(stream_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    pub fn lookup(&self, stream_id: u32) -> Option<Arc<StreamRecord>> {
        self.streams
            .get(&stream_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, stream_id: u32) -> Option<Arc<StreamRecord>> {
        self.streams.remove(&stream_id).map(|(_, record)| record)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn stream_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.streams.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Remove and return every record.
    pub fn drain(&self) -> Vec<Arc<StreamRecord>> {
        self.stream_ids()
            .into_iter()
            .filter_map(|id| self.remove(id))
            .collect()
    }
}

impl std::fmt::Debug for StreamRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRegistry")
            .field("streams", &self.stream_ids())
            .finish()
    }
}
