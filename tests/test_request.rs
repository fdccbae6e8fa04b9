use bytes::Bytes;
use riph2mux::types::{Header, ProtocolError, Request};
use serde_json::json;

fn names(request: &Request) -> Vec<&str> {
    request.headers.iter().map(|h| h.name.as_str()).collect()
}

#[test]
fn request_builder_orders_pseudo_headers_first() {
    let request = Request::get("example.com", "/index.html")
        .header("Accept", "text/html")
        .build()
        .expect("valid request");

    assert_eq!(
        names(&request),
        vec![":method", ":scheme", ":authority", ":path", "accept", "user-agent"]
    );
    assert_eq!(request.method(), Some("GET"));
    assert!(!request.has_body());
}

#[test]
fn explicit_user_agent_is_kept() {
    let request = Request::get("example.com", "/")
        .header("user-agent", "custom/1.0")
        .build()
        .expect("valid request");
    let agents: Vec<_> = request
        .headers
        .iter()
        .filter(|h| h.name == "user-agent")
        .collect();
    assert_eq!(agents, vec![&Header::new("user-agent", "custom/1.0")]);
}

#[tokio::test]
async fn json_body_sets_content_type() {
    let request = Request::post("example.com", "/api")
        .json(&json!({"hello": "world"}))
        .build()
        .expect("valid request");

    assert!(request
        .headers
        .contains(&Header::new("content-type", "application/json")));
    let collected = request.body.collect().await.expect("collect");
    assert_eq!(collected.data, Bytes::from_static(b"{\"hello\":\"world\"}"));
}

#[tokio::test]
async fn trailers_attach_to_buffered_body() {
    let request = Request::post("example.com", "/")
        .body("hello")
        .trailer("x-checksum", "abc")
        .build()
        .expect("valid request");

    assert!(request.has_body());
    let collected = request.body.collect().await.expect("collect");
    assert_eq!(
        collected.trailers,
        Some(vec![Header::new("x-checksum", "abc")])
    );
}

#[test]
fn connect_carries_only_authority() {
    let request = Request::builder("CONNECT")
        .authority("proxy.example:443")
        .build()
        .expect("valid request");
    assert_eq!(names(&request), vec![":method", ":authority", "user-agent"]);
}

#[test]
fn invalid_header_names_are_rejected() {
    let result = Request::get("example.com", "/")
        .header("bad name", "x")
        .build();
    assert!(matches!(result, Err(ProtocolError::MalformedHeaders(_))));
}
