use crate::h2::dispatcher::{CloseCause, Shared};
use crate::h2::state::RecvEvent;
use crate::types::{Frame, H2ErrorCode, H2StreamErrorKind, ProtocolError};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Sole reader of the transport. Runs until the transport fails, then fails
/// every stream still registered and marks the connection closed. Errors the
/// transport scopes to one stream only end that stream.
pub(crate) async fn read_loop(shared: Arc<Shared>) {
    loop {
        let frame = match shared.transport.read_frame().await {
            Ok(frame) => frame,
            Err(ProtocolError::StreamFailure { stream_id, kind }) => {
                reset_stream(&shared, stream_id, ProtocolError::H2StreamError(kind)).await;
                continue;
            }
            Err(err) => {
                let cause = err.to_string();
                error!(error = %err, streams = shared.registry.len(), "transport read failed");
                shared.close(CloseCause::Failed(cause.clone()), || {
                    ProtocolError::TransportFailure(cause.clone())
                });
                return;
            }
        };

        route_frame(&shared, frame).await;
    }
}

async fn route_frame(shared: &Shared, frame: Frame) {
    let stream_id = frame.stream_id();

    if let Frame::WindowUpdate { increment, .. } = frame {
        trace!(stream_id, increment, "peer WINDOW_UPDATE skipped");
        return;
    }

    let Some(record) = shared.registry.lookup(stream_id) else {
        warn!(stream_id, frame = %frame, "frame for unknown stream dropped");
        return;
    };

    trace!(stream_id, frame = %frame, "routing frame");
    let transition = record.machine().on_receive(frame);
    let transition = match transition {
        Ok(transition) => transition,
        Err(err) => {
            reset_stream(shared, stream_id, err).await;
            return;
        }
    };

    match transition.event {
        RecvEvent::Informational { status } => {
            debug!(stream_id, status, "interim response");
        }
        RecvEvent::Response(response) => {
            debug!(stream_id, status = response.status, "response headers received");
            if !record.complete(Ok(response)) {
                debug!(stream_id, "response future dropped before delivery");
            }
        }
        RecvEvent::Data {
            payload,
            credit,
            sink,
        } => {
            if sink.write(payload).is_err() {
                trace!(stream_id, "response body dropped, discarding DATA");
            }
            return_credit(shared, stream_id, credit).await;
        }
        RecvEvent::EndOfStream {
            payload,
            credit,
            sink,
        } => {
            if !payload.is_empty() && sink.write(payload).is_err() {
                trace!(stream_id, "response body dropped, discarding DATA");
            }
            sink.close(None);
            return_credit(shared, stream_id, credit).await;
        }
        RecvEvent::Trailers { trailers, sink } => {
            trace!(stream_id, count = trailers.len(), "response trailers received");
            sink.close(Some(trailers));
        }
        RecvEvent::Reset { error_code, sink } => {
            warn!(stream_id, error_code = %error_code, "stream reset by peer");
            record.fail_with_sink(
                ProtocolError::H2StreamError(H2StreamErrorKind::Reset(error_code)),
                sink,
            );
        }
    }

    if record.is_closed() {
        shared.retire(stream_id);
    }
}

/// Hand consumed DATA bytes back to the peer. A zero increment is not a
/// legal WINDOW_UPDATE, so empty unpadded frames return nothing.
async fn return_credit(shared: &Shared, stream_id: u32, credit: u32) {
    if credit == 0 {
        return;
    }
    if let Err(err) = shared
        .transport
        .write_frame(Frame::window_update(stream_id, credit))
        .await
    {
        warn!(stream_id, credit, error = %err, "failed to return flow-control credit");
    }
}

/// Fail a stream the peer broke, then tell the peer with
/// RST_STREAM(PROTOCOL_ERROR).
async fn reset_stream(shared: &Shared, stream_id: u32, err: ProtocolError) {
    let Some(record) = shared.registry.lookup(stream_id) else {
        warn!(stream_id, error = %err, "stream error on unknown stream");
        return;
    };

    warn!(stream_id, error = %err, "stream failed");
    record.fail(err);
    shared.retire(stream_id);

    if let Err(err) = shared
        .transport
        .write_frame(Frame::reset(stream_id, H2ErrorCode::ProtocolError))
        .await
    {
        warn!(stream_id, error = %err, "failed to write RST_STREAM");
    }
}
