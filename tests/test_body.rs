use bytes::Bytes;
use riph2mux::types::{Body, Header, ProtocolError};

#[tokio::test]
async fn read_splits_large_chunks_and_skips_empty_ones() {
    let mut body = Body::from_chunks(vec![
        Bytes::from_static(b""),
        Bytes::from_static(b"abcdef"),
        Bytes::from_static(b""),
        Bytes::from_static(b"g"),
    ]);

    assert_eq!(body.read(4).await.unwrap(), Some(Bytes::from_static(b"abcd")));
    assert_eq!(body.read(4).await.unwrap(), Some(Bytes::from_static(b"ef")));
    assert_eq!(body.read(4).await.unwrap(), Some(Bytes::from_static(b"g")));
    assert_eq!(body.read(4).await.unwrap(), None);
    assert_eq!(body.trailers().await.unwrap(), None);
}

#[test]
fn emptiness_is_known_up_front() {
    assert!(Body::empty().is_empty());
    assert!(Body::from_chunks(vec![Bytes::new()]).is_empty());
    assert!(!Body::from("x").is_empty());
    assert!(!Body::empty()
        .with_trailers(vec![Header::new("x-trailer", "1")])
        .is_empty());

    let (_sender, body) = Body::channel();
    assert!(!body.is_empty());
}

#[tokio::test]
async fn channel_body_carries_trailers() {
    let (sender, body) = Body::channel();
    sender.write("hello ").unwrap();
    sender.data_sink().write(Bytes::from_static(b"world")).unwrap();
    sender.close(Some(vec![Header::new("x-checksum", "42")]));

    let collected = body.collect().await.unwrap();
    assert_eq!(collected.data, Bytes::from_static(b"hello world"));
    assert_eq!(
        collected.trailers,
        Some(vec![Header::new("x-checksum", "42")])
    );
}

#[tokio::test]
async fn dropped_sender_fails_the_body() {
    let (sender, body) = Body::channel();
    sender.write("partial").unwrap();
    drop(sender);

    assert!(matches!(
        body.collect().await,
        Err(ProtocolError::BodyWriteFailure(_))
    ));
}

#[tokio::test]
async fn aborted_sender_surfaces_its_error() {
    let (sender, mut body) = Body::channel();
    sender.abort(ProtocolError::Cancelled(9));
    assert!(matches!(body.read(1).await, Err(ProtocolError::Cancelled(9))));
}

#[test]
fn sender_notices_dropped_body() {
    let (sender, body) = Body::channel();
    assert!(!sender.is_closed());
    drop(body);
    assert!(sender.is_closed());
    assert!(sender.write("nobody listening").is_err());
}
