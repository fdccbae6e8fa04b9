use riph2mux::types::ProtocolError;
use riph2mux::{parse_target, Target};

#[test]
fn parse_target_with_default_ports() {
    let http = parse_target("http://example.com/path?q=1").expect("valid http");
    assert_eq!(
        http,
        Target {
            host: "example.com".to_string(),
            port: 80,
            tls: false,
        }
    );
    assert_eq!(http.scheme(), "http");

    let https = parse_target("https://example.com").expect("valid https");
    assert_eq!(https.port, 443);
    assert!(https.tls);
}

#[test]
fn parse_target_h2_schemes() {
    let h2 = parse_target("h2://example.com").expect("valid h2");
    assert!(h2.tls);
    assert_eq!(h2.port, 443);

    let h2c = parse_target("h2c://localhost:8080").expect("valid h2c");
    assert!(!h2c.tls);
    assert_eq!(h2c.authority(), "localhost:8080");
}

#[test]
fn parse_target_ipv6_host() {
    let target = parse_target("https://[::1]:8443/").expect("valid");
    assert_eq!(target.host, "::1");
    assert_eq!(target.port, 8443);
}

#[test]
fn parse_target_invalid_inputs() {
    let err = parse_target("not a url").unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidTarget(_)));

    let missing_host = parse_target("http://:8080").unwrap_err();
    assert!(matches!(missing_host, ProtocolError::InvalidTarget(_)));

    let wrong_scheme = parse_target("ftp://example.com").unwrap_err();
    assert!(matches!(wrong_scheme, ProtocolError::InvalidTarget(_)));
}
