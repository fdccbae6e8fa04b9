use super::error::ProtocolError;
use super::Header;
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use tokio::sync::{mpsc, oneshot};

type Chunk = Result<Bytes, ProtocolError>;
type TrailerSlot = Option<Vec<Header>>;

enum Trailers {
    Ready(TrailerSlot),
    Pending(oneshot::Receiver<TrailerSlot>),
}

/// Pull side of a body: a finite, single-consumer sequence of byte chunks
/// followed by an end signal that may carry trailers.
pub struct Body {
    buffered: VecDeque<Bytes>,
    rx: Option<mpsc::UnboundedReceiver<Chunk>>,
    trailers: Trailers,
}

/// Push side of a channel-backed [`Body`].
///
/// Writes never wait for the consumer. Dropping the sender without calling
/// [`BodySender::close`] aborts the body.
pub struct BodySender {
    tx: mpsc::UnboundedSender<Chunk>,
    trailers: Option<oneshot::Sender<TrailerSlot>>,
}

/// A cloneable handle that can only append data to a body.
#[derive(Clone)]
pub struct DataSink {
    tx: mpsc::UnboundedSender<Chunk>,
}

/// A fully buffered body.
#[derive(Debug, Clone, Default)]
pub struct Collected {
    pub data: Bytes,
    pub trailers: Option<Vec<Header>>,
}

impl Body {
    pub fn empty() -> Self {
        Self {
            buffered: VecDeque::new(),
            rx: None,
            trailers: Trailers::Ready(None),
        }
    }

    pub fn from_chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self {
            buffered: chunks.into_iter().map(Into::into).collect(),
            rx: None,
            trailers: Trailers::Ready(None),
        }
    }

    pub fn channel() -> (BodySender, Body) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (trailers_tx, trailers_rx) = oneshot::channel();
        let sender = BodySender {
            tx,
            trailers: Some(trailers_tx),
        };
        let body = Body {
            buffered: VecDeque::new(),
            rx: Some(rx),
            trailers: Trailers::Pending(trailers_rx),
        };
        (sender, body)
    }

    /// Attach trailers to a buffered body. Channel-backed bodies get their
    /// trailers from [`BodySender::close`] instead.
    pub fn with_trailers(mut self, trailers: Vec<Header>) -> Self {
        if let Trailers::Ready(_) = self.trailers {
            self.trailers = Trailers::Ready(Some(trailers));
        }
        self
    }

    /// True when the body is known up front to carry neither data nor
    /// trailers, so a request can end its stream on the HEADERS frame.
    pub fn is_empty(&self) -> bool {
        self.rx.is_none()
            && self.buffered.iter().all(|chunk| chunk.is_empty())
            && matches!(self.trailers, Trailers::Ready(None))
    }

    /// Next chunk of at most `max_bytes` bytes, or `None` once the data is
    /// exhausted. Larger chunks are split; empty chunks are skipped.
    pub async fn read(&mut self, max_bytes: usize) -> Result<Option<Bytes>, ProtocolError> {
        let max_bytes = max_bytes.max(1);
        loop {
            if let Some(mut chunk) = self.buffered.pop_front() {
                if chunk.is_empty() {
                    continue;
                }
                if chunk.len() > max_bytes {
                    let rest = chunk.split_off(max_bytes);
                    self.buffered.push_front(rest);
                }
                return Ok(Some(chunk));
            }

            let Some(rx) = self.rx.as_mut() else {
                return Ok(None);
            };

            match rx.recv().await {
                Some(Ok(chunk)) => self.buffered.push_back(chunk),
                Some(Err(err)) => {
                    self.rx = None;
                    return Err(err);
                }
                None => {
                    self.rx = None;
                    return Ok(None);
                }
            }
        }
    }

    /// Resolves once the producer signalled the end of the body.
    pub async fn trailers(&mut self) -> Result<Option<Vec<Header>>, ProtocolError> {
        match std::mem::replace(&mut self.trailers, Trailers::Ready(None)) {
            Trailers::Ready(trailers) => Ok(trailers),
            Trailers::Pending(rx) => rx.await.map_err(|_| {
                ProtocolError::BodyWriteFailure("body ended without an end signal".to_string())
            }),
        }
    }

    pub async fn collect(mut self) -> Result<Collected, ProtocolError> {
        let mut data = BytesMut::new();
        while let Some(chunk) = self.read(usize::MAX).await? {
            data.extend_from_slice(&chunk);
        }
        let trailers = self.trailers().await?;
        Ok(Collected {
            data: data.freeze(),
            trailers,
        })
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Body")
            .field("buffered", &self.buffered.len())
            .field("streaming", &self.rx.is_some())
            .finish()
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::empty()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::from_chunks([bytes])
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::from(Bytes::from(bytes))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::from(Bytes::from(text))
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Body::from(Bytes::from_static(text.as_bytes()))
    }
}

impl BodySender {
    pub fn write(&self, chunk: impl Into<Bytes>) -> Result<(), ProtocolError> {
        self.tx
            .send(Ok(chunk.into()))
            .map_err(|_| ProtocolError::BodyWriteFailure("body receiver dropped".to_string()))
    }

    pub fn data_sink(&self) -> DataSink {
        DataSink {
            tx: self.tx.clone(),
        }
    }

    /// Whether the consuming [`Body`] has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Signal the end of the body, optionally with trailers.
    pub fn close(mut self, trailers: Option<Vec<Header>>) {
        if let Some(slot) = self.trailers.take() {
            let _ = slot.send(trailers);
        }
    }

    /// End the body with an error; the consumer sees it on its next read.
    pub fn abort(mut self, err: ProtocolError) {
        self.trailers.take();
        let _ = self.tx.send(Err(err));
    }
}

impl Drop for BodySender {
    fn drop(&mut self) {
        if self.trailers.take().is_some() {
            let _ = self.tx.send(Err(ProtocolError::BodyWriteFailure(
                "body sender dropped before end of stream".to_string(),
            )));
        }
    }
}

impl DataSink {
    pub fn write(&self, chunk: Bytes) -> Result<(), ProtocolError> {
        self.tx
            .send(Ok(chunk))
            .map_err(|_| ProtocolError::BodyWriteFailure("body receiver dropped".to_string()))
    }
}
