mod common;

use bytes::{BufMut, Bytes, BytesMut};
use common::{read_wire_frame, write_wire_frame};
use riph2mux::h2::consts::*;
use riph2mux::types::{
    ClientTimeouts, DispatcherConfig, Frame, FrameH2, FrameTypeH2, H2ConnectionErrorKind,
    H2ErrorCode, Header, ProtocolError, Transport,
};
use riph2mux::H2Transport;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

fn pair() -> (H2Transport<DuplexStream>, DuplexStream) {
    let (client, server) = tokio::io::duplex(1 << 20);
    (H2Transport::new(client, &DispatcherConfig::default()), server)
}

fn encode_block(headers: &[(&[u8], &[u8])]) -> Bytes {
    let mut encoder = hpack::Encoder::new();
    Bytes::from(encoder.encode(headers.iter().copied()))
}

#[tokio::test]
async fn handshake_sends_preface_and_settings() {
    let (transport, mut server) = pair();
    transport.handshake().await.expect("handshake");

    let mut preface = [0u8; 24];
    server.read_exact(&mut preface).await.expect("preface");
    assert_eq!(&preface[..], CONNECTION_PREFACE);

    let settings = read_wire_frame(&mut server).await;
    assert_eq!(settings.frame_type, FrameTypeH2::Settings);
    assert!(!settings.is_ack());
    let entries = settings.settings_entries().expect("entries");
    assert!(entries.contains(&(SETTINGS_ENABLE_PUSH, 0)));
    assert!(entries.contains(&(SETTINGS_MAX_FRAME_SIZE, DEFAULT_MAX_FRAME_SIZE)));
}

#[tokio::test]
async fn peer_settings_are_acknowledged() {
    let (transport, mut server) = pair();

    write_wire_frame(&mut server, FrameH2::settings(&[(SETTINGS_MAX_CONCURRENT_STREAMS, 10)])).await;
    write_wire_frame(
        &mut server,
        FrameH2::headers(1, encode_block(&[(b":status", b"200")]), true, true),
    )
    .await;

    let frame = transport.read_frame().await.expect("headers");
    assert_eq!(
        frame,
        Frame::headers(1, vec![Header::new(":status", "200")], true)
    );

    let ack = read_wire_frame(&mut server).await;
    assert_eq!(ack.frame_type, FrameTypeH2::Settings);
    assert!(ack.is_ack());
}

#[tokio::test]
async fn padded_data_reports_padding_and_returns_connection_credit() {
    let (transport, mut server) = pair();

    let mut payload = BytesMut::new();
    payload.put_u8(3);
    payload.put_slice(b"body");
    payload.put_slice(&[0, 0, 0]);
    write_wire_frame(
        &mut server,
        FrameH2::new(FrameTypeH2::Data, PADDED_FLAG, 1, payload.freeze()),
    )
    .await;

    let frame = transport.read_frame().await.expect("data");
    assert_eq!(
        frame,
        Frame::Data {
            stream_id: 1,
            payload: Bytes::from_static(b"body"),
            padding: 4,
            end_stream: false,
        }
    );

    let update = read_wire_frame(&mut server).await;
    assert_eq!(update.frame_type, FrameTypeH2::WindowUpdate);
    assert_eq!(update.stream_id, 0);
    assert_eq!(update.payload_u32().expect("increment"), 8);
}

#[tokio::test]
async fn continuation_frames_are_reassembled() {
    let (transport, mut server) = pair();

    let block = encode_block(&[(b":status", b"200"), (b"x-long", &[b'a'; 64])]);
    let (first, rest) = block.split_at(5);
    write_wire_frame(
        &mut server,
        FrameH2::headers(3, Bytes::copy_from_slice(first), false, false),
    )
    .await;
    write_wire_frame(
        &mut server,
        FrameH2::continuation(3, Bytes::copy_from_slice(rest), true),
    )
    .await;

    let frame = transport.read_frame().await.expect("headers");
    let Frame::Headers {
        stream_id,
        headers,
        end_stream,
    } = frame
    else {
        panic!("expected headers, got {:?}", frame);
    };
    assert_eq!(stream_id, 3);
    assert!(!end_stream);
    assert_eq!(headers[1], Header::new("x-long", "a".repeat(64)));
}

#[tokio::test]
async fn interleaved_frame_inside_header_block_is_an_error() {
    let (transport, mut server) = pair();

    let block = encode_block(&[(b":status", b"200")]);
    write_wire_frame(&mut server, FrameH2::headers(1, block, false, false)).await;
    write_wire_frame(&mut server, FrameH2::data(1, Bytes::from_static(b"x"), false)).await;

    assert!(matches!(
        transport.read_frame().await,
        Err(ProtocolError::H2ProtocolError(_))
    ));
}

#[tokio::test]
async fn ping_is_answered_and_unknown_frames_skipped() {
    let (transport, mut server) = pair();

    write_wire_frame(
        &mut server,
        FrameH2::new(FrameTypeH2::Ping, 0, 0, Bytes::from_static(b"12345678")),
    )
    .await;
    // extension frame type 0xfa
    server
        .write_all(&[0, 0, 2, 0xfa, 0, 0, 0, 0, 1, 0xde, 0xad])
        .await
        .expect("write unknown frame");
    write_wire_frame(&mut server, FrameH2::rst(1, H2ErrorCode::Cancel as u32)).await;

    let frame = transport.read_frame().await.expect("reset");
    assert_eq!(frame, Frame::reset(1, H2ErrorCode::Cancel));

    let pong = read_wire_frame(&mut server).await;
    assert_eq!(pong.frame_type, FrameTypeH2::Ping);
    assert!(pong.is_ack());
    assert_eq!(pong.payload, Bytes::from_static(b"12345678"));
}

#[tokio::test]
async fn goaway_is_a_connection_error() {
    let (transport, mut server) = pair();

    write_wire_frame(
        &mut server,
        FrameH2::goaway(1, H2ErrorCode::EnhanceYourCalm as u32, Some(&b"slow down"[..])),
    )
    .await;

    match transport.read_frame().await {
        Err(ProtocolError::H2ConnectionError(H2ConnectionErrorKind::GoAway(code, debug))) => {
            assert_eq!(code, H2ErrorCode::EnhanceYourCalm);
            assert_eq!(debug, "slow down");
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[tokio::test]
async fn stream_window_update_is_forwarded() {
    let (transport, mut server) = pair();

    write_wire_frame(&mut server, FrameH2::window_update(0, 1000)).await;
    write_wire_frame(&mut server, FrameH2::window_update(5, 2000)).await;

    assert_eq!(
        transport.read_frame().await.expect("window update"),
        Frame::window_update(5, 2000)
    );
}

#[tokio::test]
async fn large_header_block_is_split_into_continuations() {
    let (transport, mut server) = pair();

    let big = "v".repeat(40_000);
    let headers = vec![
        Header::new(":method", "GET"),
        Header::new("x-big", big.clone()),
    ];
    transport
        .write_frame(Frame::headers(1, headers, true))
        .await
        .expect("write headers");

    let mut block = BytesMut::new();
    let first = read_wire_frame(&mut server).await;
    assert_eq!(first.frame_type, FrameTypeH2::Headers);
    assert!(first.is_end_stream());
    assert!(!first.is_end_headers());
    assert_eq!(first.payload.len(), DEFAULT_MAX_FRAME_SIZE as usize);
    block.extend_from_slice(&first.payload);

    loop {
        let next = read_wire_frame(&mut server).await;
        assert_eq!(next.frame_type, FrameTypeH2::Continuation);
        block.extend_from_slice(&next.payload);
        if next.is_end_headers() {
            break;
        }
    }

    let mut decoder = hpack::Decoder::new();
    let decoded = decoder.decode(&block).expect("decode");
    assert_eq!(decoded[1].0, b"x-big".to_vec());
    assert_eq!(decoded[1].1, big.into_bytes());
}

#[tokio::test]
async fn outbound_frames_use_wire_encoding() {
    let (transport, mut server) = pair();

    transport
        .write_frame(Frame::data(1, "abc", true))
        .await
        .expect("data");
    transport
        .write_frame(Frame::window_update(1, 512))
        .await
        .expect("window update");
    transport
        .write_frame(Frame::reset(1, H2ErrorCode::Cancel))
        .await
        .expect("reset");

    let data = read_wire_frame(&mut server).await;
    assert_eq!(data.frame_type, FrameTypeH2::Data);
    assert!(data.is_end_stream());
    assert_eq!(data.payload, Bytes::from_static(b"abc"));

    let update = read_wire_frame(&mut server).await;
    assert_eq!(update.frame_type, FrameTypeH2::WindowUpdate);
    assert_eq!(update.payload_u32().expect("increment"), 512);

    let reset = read_wire_frame(&mut server).await;
    assert_eq!(reset.frame_type, FrameTypeH2::RstStream);
    assert_eq!(reset.payload_u32().expect("code"), H2ErrorCode::Cancel as u32);
}

#[tokio::test]
async fn stalled_write_breaks_the_connection() {
    let (client, _server) = tokio::io::duplex(64);
    let config = DispatcherConfig {
        timeouts: ClientTimeouts::unbounded().with_write(Duration::from_millis(50)),
        ..DispatcherConfig::default()
    };
    let transport = H2Transport::new(client, &config);

    let result = transport
        .write_frame(Frame::data(1, vec![0u8; 4096], false))
        .await;
    assert!(matches!(result, Err(ProtocolError::Timeout)));
    assert!(transport.is_broken());

    // part of the frame may be on the wire: nothing may follow it
    assert!(matches!(
        transport.write_frame(Frame::reset(1, H2ErrorCode::Cancel)).await,
        Err(ProtocolError::TransportFailure(_))
    ));
    assert!(matches!(
        transport.read_frame().await,
        Err(ProtocolError::TransportFailure(_))
    ));
}
