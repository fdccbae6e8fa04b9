#![allow(dead_code)]

use async_trait::async_trait;
use riph2mux::h2::consts::FRAME_HEADER_SIZE;
use riph2mux::types::{Frame, FrameH2, ProtocolError, Transport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, Mutex};

/// In-memory transport: frames pushed by the test are read by the
/// dispatcher, frames the dispatcher writes are captured for the test.
pub struct MockTransport {
    inbound: Mutex<mpsc::UnboundedReceiver<Result<Frame, ProtocolError>>>,
    outbound: mpsc::UnboundedSender<Frame>,
    fail_writes: AtomicBool,
}

pub struct MockPeer {
    inbound: mpsc::UnboundedSender<Result<Frame, ProtocolError>>,
    outbound: mpsc::UnboundedReceiver<Frame>,
}

pub fn mock_pair() -> (Arc<MockTransport>, MockPeer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let transport = Arc::new(MockTransport {
        inbound: Mutex::new(inbound_rx),
        outbound: outbound_tx,
        fail_writes: AtomicBool::new(false),
    });
    let peer = MockPeer {
        inbound: inbound_tx,
        outbound: outbound_rx,
    };
    (transport, peer)
}

impl MockTransport {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn read_frame(&self) -> Result<Frame, ProtocolError> {
        let mut inbound = self.inbound.lock().await;
        match inbound.recv().await {
            Some(result) => result,
            None => Err(ProtocolError::TransportFailure(
                "mock peer went away".to_string(),
            )),
        }
    }

    async fn write_frame(&self, frame: Frame) -> Result<(), ProtocolError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ProtocolError::TransportFailure("write refused".to_string()));
        }
        self.outbound
            .send(frame)
            .map_err(|_| ProtocolError::TransportFailure("mock peer went away".to_string()))
    }
}

impl MockPeer {
    pub fn send(&self, frame: Frame) {
        self.inbound.send(Ok(frame)).expect("dispatcher read side alive");
    }

    pub fn fail(&self, err: ProtocolError) {
        self.inbound.send(Err(err)).expect("dispatcher read side alive");
    }

    pub async fn expect_write(&mut self) -> Frame {
        tokio::time::timeout(Duration::from_secs(1), self.outbound.recv())
            .await
            .expect("timed out waiting for a written frame")
            .expect("transport dropped")
    }

    pub async fn expect_no_write(&mut self) {
        if let Ok(Some(frame)) =
            tokio::time::timeout(Duration::from_millis(50), self.outbound.recv()).await
        {
            panic!("unexpected frame written: {:?}", frame);
        }
    }
}

/// Poll `condition` until it holds or a second has passed.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Route crate logs to the test output; filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Read one frame from the server end of a duplex pipe.
pub async fn read_wire_frame(server: &mut DuplexStream) -> FrameH2 {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    server.read_exact(&mut header).await.expect("frame header");
    let length = FrameH2::payload_length(&header);

    let mut buf = header.to_vec();
    buf.resize(FRAME_HEADER_SIZE + length, 0);
    server
        .read_exact(&mut buf[FRAME_HEADER_SIZE..])
        .await
        .expect("frame payload");
    FrameH2::parse(&buf).expect("valid frame")
}

pub async fn write_wire_frame(server: &mut DuplexStream, frame: FrameH2) {
    let bytes = frame.serialize().expect("serialize");
    server.write_all(&bytes).await.expect("write frame");
}
