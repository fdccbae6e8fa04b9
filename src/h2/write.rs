use crate::h2::dispatcher::Shared;
use crate::h2::registry::StreamRecord;
use crate::h2::state::SendState;
use crate::types::{Body, Frame, Header, ProtocolError, Transport};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

pub(crate) async fn send_headers(
    transport: &dyn Transport,
    stream_id: u32,
    headers: Vec<Header>,
    end_of_stream: bool,
) -> Result<(), ProtocolError> {
    trace!(stream_id, end_stream = end_of_stream, "writing HEADERS");
    transport
        .write_frame(Frame::headers(stream_id, headers, end_of_stream))
        .await
}

enum BodyOutcome {
    Finished,
    Cancelled,
}

/// Stream a request body onto the wire after its HEADERS frame.
///
/// Runs until the body is exhausted, fails, or the stream is cancelled, then
/// closes the send side. A failed body is abandoned without a terminal frame
/// and leaves the response untouched.
pub(crate) async fn write_body_loop(shared: Arc<Shared>, record: Arc<StreamRecord>, body: Body) {
    let stream_id = record.stream_id();
    let mut cancel = record.cancel_signal();
    let max_bytes = shared.config.max_data_frame_size;

    let outcome = pump_body(
        shared.transport.as_ref(),
        &mut cancel,
        stream_id,
        body,
        max_bytes,
    )
    .await;

    match outcome {
        Ok(BodyOutcome::Finished) => debug!(stream_id, "request body finished"),
        Ok(BodyOutcome::Cancelled) => debug!(stream_id, "request body cancelled"),
        Err(err) => warn!(stream_id, error = %err, "request body abandoned"),
    }

    let closed = {
        let mut machine = record.machine();
        if machine.send_state() == SendState::Active {
            if let Err(err) = machine.finish_send() {
                warn!(stream_id, error = %err, "failed to close send side");
            }
        }
        machine.is_closed()
    };

    if closed {
        shared.retire(stream_id);
    }
}

/// Cancellation is only observed while waiting on the body source or between
/// frames. A frame write, once started, always runs to completion.
async fn pump_body(
    transport: &dyn Transport,
    cancel: &mut watch::Receiver<bool>,
    stream_id: u32,
    mut body: Body,
    max_bytes: usize,
) -> Result<BodyOutcome, ProtocolError> {
    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.wait_for(|cancelled| *cancelled) => return Ok(BodyOutcome::Cancelled),
            chunk = body.read(max_bytes) => chunk.map_err(body_failure)?,
        };
        let Some(chunk) = chunk else {
            break;
        };
        if *cancel.borrow() {
            return Ok(BodyOutcome::Cancelled);
        }

        trace!(stream_id, len = chunk.len(), "writing DATA");
        transport
            .write_frame(Frame::data(stream_id, chunk, false))
            .await
            .map_err(body_failure)?;
    }

    let trailers = tokio::select! {
        biased;
        _ = cancel.wait_for(|cancelled| *cancelled) => return Ok(BodyOutcome::Cancelled),
        trailers = body.trailers() => trailers.map_err(body_failure)?,
    };
    if *cancel.borrow() {
        return Ok(BodyOutcome::Cancelled);
    }

    let terminal = match trailers {
        Some(trailers) => Frame::headers(stream_id, trailers, true),
        None => Frame::data(stream_id, Bytes::new(), true),
    };
    trace!(stream_id, frame = %terminal, "writing end of request body");
    transport.write_frame(terminal).await.map_err(body_failure)?;
    Ok(BodyOutcome::Finished)
}

fn body_failure(err: ProtocolError) -> ProtocolError {
    match err {
        ProtocolError::BodyWriteFailure(_) => err,
        other => ProtocolError::BodyWriteFailure(other.to_string()),
    }
}
