use bytes::Bytes;
use riph2mux::h2::{RecvEvent, StreamRecord, StreamRegistry};
use riph2mux::types::{Body, Frame, Header, ProtocolError, Response};
use std::sync::Arc;
use tokio_test::{assert_pending, assert_ready};

fn ok_response(status: u16) -> Result<Response, ProtocolError> {
    Ok(Response {
        status,
        headers: Vec::new(),
        body: Body::empty(),
    })
}

#[test]
fn insert_if_absent_rejects_duplicates() {
    let registry = StreamRegistry::new();
    let (first, _rx1) = StreamRecord::new(1);
    let (second, _rx2) = StreamRecord::new(1);

    assert!(registry.insert_if_absent(1, Arc::clone(&first)));
    assert!(!registry.insert_if_absent(1, second));
    assert_eq!(registry.len(), 1);

    let found = registry.lookup(1).expect("registered");
    assert!(Arc::ptr_eq(&found, &first));
    assert!(registry.lookup(3).is_none());
}

#[test]
fn remove_and_drain() {
    let registry = StreamRegistry::new();
    for id in [5, 1, 3] {
        let (record, _rx) = StreamRecord::new(id);
        assert!(registry.insert_if_absent(id, record));
    }
    assert_eq!(registry.stream_ids(), vec![1, 3, 5]);

    assert!(registry.remove(3).is_some());
    assert!(registry.remove(3).is_none());

    let drained: Vec<u32> = registry.drain().iter().map(|r| r.stream_id()).collect();
    assert_eq!(drained, vec![1, 5]);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn completion_resolves_once() {
    let (record, response) = StreamRecord::new(1);
    assert!(record.is_pending());

    assert!(record.complete(ok_response(200)));
    assert!(!record.complete(ok_response(500)));
    assert!(!record.is_pending());

    assert_eq!(response.await.expect("response").status, 200);
}

#[test]
fn response_future_pends_until_completed() {
    let (record, response) = StreamRecord::new(1);
    let mut response = tokio_test::task::spawn(response);
    assert_pending!(response.poll());

    record.complete(ok_response(204));
    assert!(response.is_woken());
    let result = assert_ready!(response.poll());
    assert_eq!(result.expect("response").status, 204);
}

#[tokio::test]
async fn fail_before_delivery_errors_the_future() {
    let (record, response) = StreamRecord::new(7);
    let cancel = record.cancel_signal();

    record.fail(ProtocolError::Cancelled(7));

    assert!(matches!(response.await, Err(ProtocolError::Cancelled(7))));
    assert!(*cancel.borrow());
    assert!(record.is_closed());
}

#[tokio::test]
async fn fail_after_delivery_aborts_the_body() {
    let (record, response) = StreamRecord::new(1);

    let transition = record
        .machine()
        .on_receive(Frame::headers(1, vec![Header::new(":status", "200")], false))
        .expect("headers");
    let RecvEvent::Response(delivered) = transition.event else {
        panic!("expected a response");
    };
    assert!(record.complete(Ok(delivered)));
    let mut response = response.await.expect("response");

    let transition = record
        .machine()
        .on_receive(Frame::data(1, "abc", false))
        .expect("data");
    if let RecvEvent::Data { payload, sink, .. } = transition.event {
        sink.write(payload).expect("append");
    }

    record.fail(ProtocolError::TransportFailure("gone".to_string()));

    assert_eq!(
        response.body.read(64).await.expect("buffered data"),
        Some(Bytes::from_static(b"abc"))
    );
    assert!(matches!(
        response.body.read(64).await,
        Err(ProtocolError::TransportFailure(_))
    ));
}

#[tokio::test]
async fn dropped_record_closes_the_future() {
    let (record, response) = StreamRecord::new(1);
    drop(record);
    assert!(matches!(response.await, Err(ProtocolError::ConnectionClosed)));
}
