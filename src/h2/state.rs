//! Per-stream state machine (RFC 7540 Section 5.1, client side).
//!
//! The send and receive halves of a stream move independently. Each leaves
//! `Idle` exactly once and nothing leaves its half-closed state. Every
//! transition returns a [`Transition`] naming the old and new sub-state and
//! the event the dispatcher has to act on; anything outside the table is an
//! `IllegalStreamTransition`.

use crate::types::{
    Body, BodySender, DataSink, Frame, H2ErrorCode, Header, ProtocolError, Request, Response,
};
use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Idle,
    Active,
    HalfClosedLocal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvState {
    Idle,
    Active,
    HalfClosedRemote,
}

impl std::fmt::Display for SendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendState::Idle => write!(f, "send idle"),
            SendState::Active => write!(f, "send open"),
            SendState::HalfClosedLocal => write!(f, "half-closed (local)"),
        }
    }
}

impl std::fmt::Display for RecvState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecvState::Idle => write!(f, "receive idle"),
            RecvState::Active => write!(f, "receive open"),
            RecvState::HalfClosedRemote => write!(f, "half-closed (remote)"),
        }
    }
}

#[derive(Debug)]
pub struct Transition<S, E> {
    pub from: S,
    pub to: S,
    pub event: E,
}

#[derive(Debug)]
pub enum SendEvent {
    /// HEADERS without END_STREAM, then the body write loop owns `body`.
    Streaming { headers: Vec<Header>, body: Body },
    /// HEADERS with END_STREAM; nothing follows.
    HeadersOnly { headers: Vec<Header> },
    /// The terminal frame of the body has been written.
    Finished,
}

pub enum RecvEvent {
    /// 1xx interim response; the final response is still to come.
    Informational { status: u16 },
    /// Final response headers. The body is empty when the HEADERS frame
    /// ended the stream.
    Response(Response),
    /// Append to the response body, then return `credit` bytes of window.
    Data {
        payload: Bytes,
        credit: u32,
        sink: DataSink,
    },
    /// Last DATA frame: append, close the body without trailers, then
    /// return `credit`.
    EndOfStream {
        payload: Bytes,
        credit: u32,
        sink: BodySender,
    },
    /// Trailing HEADERS: close the body with these trailers.
    Trailers {
        trailers: Vec<Header>,
        sink: BodySender,
    },
    /// Peer reset the stream.
    Reset {
        error_code: H2ErrorCode,
        sink: Option<BodySender>,
    },
}

impl std::fmt::Debug for RecvEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecvEvent::Informational { status } => {
                f.debug_struct("Informational").field("status", status).finish()
            }
            RecvEvent::Response(response) => f.debug_tuple("Response").field(response).finish(),
            RecvEvent::Data {
                payload, credit, ..
            } => f
                .debug_struct("Data")
                .field("len", &payload.len())
                .field("credit", credit)
                .finish(),
            RecvEvent::EndOfStream {
                payload, credit, ..
            } => f
                .debug_struct("EndOfStream")
                .field("len", &payload.len())
                .field("credit", credit)
                .finish(),
            RecvEvent::Trailers { trailers, .. } => f
                .debug_struct("Trailers")
                .field("trailers", trailers)
                .finish(),
            RecvEvent::Reset { error_code, .. } => f
                .debug_struct("Reset")
                .field("error_code", error_code)
                .finish(),
        }
    }
}

enum RecvSide {
    Idle,
    Active(BodySender),
    HalfClosedRemote,
}

impl RecvSide {
    fn state(&self) -> RecvState {
        match self {
            RecvSide::Idle => RecvState::Idle,
            RecvSide::Active(_) => RecvState::Active,
            RecvSide::HalfClosedRemote => RecvState::HalfClosedRemote,
        }
    }
}

pub struct StreamStateMachine {
    stream_id: u32,
    send: SendState,
    recv: RecvSide,
}

impl StreamStateMachine {
    pub fn new(stream_id: u32) -> Self {
        Self {
            stream_id,
            send: SendState::Idle,
            recv: RecvSide::Idle,
        }
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    pub fn send_state(&self) -> SendState {
        self.send
    }

    pub fn recv_state(&self) -> RecvState {
        self.recv.state()
    }

    /// Both directions have reached their terminal state.
    pub fn is_closed(&self) -> bool {
        self.send == SendState::HalfClosedLocal
            && self.recv.state() == RecvState::HalfClosedRemote
    }

    pub fn on_send(
        &mut self,
        request: Request,
    ) -> Result<Transition<SendState, SendEvent>, ProtocolError> {
        let from = self.send;
        if from != SendState::Idle {
            return Err(self.illegal(from, "request HEADERS"));
        }

        let Request { headers, body } = request;
        let event = if body.is_empty() {
            self.send = SendState::HalfClosedLocal;
            SendEvent::HeadersOnly { headers }
        } else {
            self.send = SendState::Active;
            SendEvent::Streaming { headers, body }
        };

        Ok(Transition {
            from,
            to: self.send,
            event,
        })
    }

    /// Close the send side after the body loop wrote its terminal frame or
    /// gave up on the body.
    pub fn finish_send(&mut self) -> Result<Transition<SendState, SendEvent>, ProtocolError> {
        let from = self.send;
        if from != SendState::Active {
            return Err(self.illegal(from, "end of request body"));
        }
        self.send = SendState::HalfClosedLocal;
        Ok(Transition {
            from,
            to: self.send,
            event: SendEvent::Finished,
        })
    }

    pub fn on_receive(
        &mut self,
        frame: Frame,
    ) -> Result<Transition<RecvState, RecvEvent>, ProtocolError> {
        let from = self.recv.state();
        let side = std::mem::replace(&mut self.recv, RecvSide::HalfClosedRemote);

        let (side, event) = match (side, frame) {
            (
                RecvSide::Idle,
                Frame::Headers {
                    headers,
                    end_stream,
                    ..
                },
            ) => {
                let (status, headers) = match response_head(self.stream_id, headers) {
                    Ok(head) => head,
                    Err(err) => {
                        self.recv = RecvSide::Idle;
                        return Err(err);
                    }
                };

                let informational = (100..200).contains(&status);
                if informational && end_stream {
                    self.recv = RecvSide::Idle;
                    return Err(ProtocolError::MalformedHeaders(format!(
                        "interim response {} on stream {} ends the stream",
                        status, self.stream_id
                    )));
                }

                if informational {
                    (RecvSide::Idle, RecvEvent::Informational { status })
                } else if end_stream {
                    let response = Response {
                        status,
                        headers,
                        body: Body::empty(),
                    };
                    (RecvSide::HalfClosedRemote, RecvEvent::Response(response))
                } else {
                    let (sink, body) = Body::channel();
                    let response = Response {
                        status,
                        headers,
                        body,
                    };
                    (RecvSide::Active(sink), RecvEvent::Response(response))
                }
            }
            (
                RecvSide::Active(sink),
                Frame::Data {
                    payload,
                    padding,
                    end_stream: false,
                    ..
                },
            ) => {
                let credit = (payload.len() as u32).saturating_add(padding);
                let data_sink = sink.data_sink();
                (
                    RecvSide::Active(sink),
                    RecvEvent::Data {
                        payload,
                        credit,
                        sink: data_sink,
                    },
                )
            }
            (
                RecvSide::Active(sink),
                Frame::Data {
                    payload,
                    padding,
                    end_stream: true,
                    ..
                },
            ) => {
                let credit = (payload.len() as u32).saturating_add(padding);
                (
                    RecvSide::HalfClosedRemote,
                    RecvEvent::EndOfStream {
                        payload,
                        credit,
                        sink,
                    },
                )
            }
            (RecvSide::Active(sink), Frame::Headers { headers, .. }) => (
                RecvSide::HalfClosedRemote,
                RecvEvent::Trailers {
                    trailers: headers,
                    sink,
                },
            ),
            (side, Frame::Reset { error_code, .. }) => {
                let sink = match side {
                    RecvSide::Active(sink) => Some(sink),
                    _ => None,
                };
                self.send = SendState::HalfClosedLocal;
                (
                    RecvSide::HalfClosedRemote,
                    RecvEvent::Reset { error_code, sink },
                )
            }
            (side, frame) => {
                let state = side.state();
                self.recv = side;
                return Err(self.illegal(state, frame));
            }
        };

        self.recv = side;
        Ok(Transition {
            from,
            to: self.recv.state(),
            event,
        })
    }

    /// Force both directions closed, handing back the response body sink if
    /// one is still open.
    pub fn abort(&mut self) -> Option<BodySender> {
        self.send = SendState::HalfClosedLocal;
        match std::mem::replace(&mut self.recv, RecvSide::HalfClosedRemote) {
            RecvSide::Active(sink) => Some(sink),
            _ => None,
        }
    }

    fn illegal(&self, state: impl std::fmt::Display, frame: impl std::fmt::Display) -> ProtocolError {
        ProtocolError::IllegalStreamTransition {
            stream_id: self.stream_id,
            state: state.to_string(),
            frame: frame.to_string(),
        }
    }
}

impl std::fmt::Debug for StreamStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamStateMachine")
            .field("stream_id", &self.stream_id)
            .field("send", &self.send)
            .field("recv", &self.recv.state())
            .finish()
    }
}

/// Split a response header block into its `:status` and regular headers.
fn response_head(stream_id: u32, headers: Vec<Header>) -> Result<(u16, Vec<Header>), ProtocolError> {
    let status = headers
        .iter()
        .find(|h| h.name == ":status")
        .and_then(|h| h.value.as_deref())
        .and_then(|v| v.parse::<u16>().ok())
        .filter(|status| (100..1000).contains(status))
        .ok_or_else(|| {
            ProtocolError::MalformedHeaders(format!(
                "response on stream {} has no valid :status",
                stream_id
            ))
        })?;

    let headers = headers.into_iter().filter(|h| !h.is_pseudo()).collect();
    Ok((status, headers))
}
