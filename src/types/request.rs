use super::body::Body;
use super::error::ProtocolError;
use super::Header;
use crate::utils::ensure_user_agent;
use serde_json::Value;

pub const APPLICATION_JSON: &str = "application/json";
pub const CONTENT_TYPE_HEADER: &str = "content-type";

/// A request ready to be dispatched on a stream: the complete header block
/// (pseudo-headers first) and its body.
#[derive(Debug, Default)]
pub struct Request {
    pub headers: Vec<Header>,
    pub body: Body,
}

impl Request {
    pub fn new(headers: Vec<Header>, body: Body) -> Self {
        Self { headers, body }
    }

    pub fn builder(method: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(method)
    }

    pub fn get(authority: impl Into<String>, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new("GET").authority(authority).path(path)
    }

    pub fn post(authority: impl Into<String>, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new("POST").authority(authority).path(path)
    }

    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }

    pub fn method(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name == ":method")
            .and_then(|h| h.value.as_deref())
    }
}

#[derive(Debug)]
pub struct RequestBuilder {
    method: String,
    scheme: String,
    authority: Option<String>,
    path: String,
    headers: Vec<Header>,
    body: Body,
    trailers: Vec<Header>,
    error: Option<ProtocolError>,
}

impl RequestBuilder {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            scheme: "https".to_string(),
            authority: None,
            path: "/".to_string(),
            headers: Vec::new(),
            body: Body::empty(),
            trailers: Vec::new(),
            error: None,
        }
    }

    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = Some(authority.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.path = if path.is_empty() { "/".to_string() } else { path };
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    pub fn json(mut self, value: &Value) -> Self {
        match serde_json::to_vec(value) {
            Ok(encoded) => {
                self.headers
                    .retain(|h| !h.name.eq_ignore_ascii_case(CONTENT_TYPE_HEADER));
                self.headers
                    .push(Header::new(CONTENT_TYPE_HEADER, APPLICATION_JSON));
                self.body = Body::from(encoded);
            }
            Err(err) => {
                self.error = Some(ProtocolError::MalformedHeaders(format!(
                    "Failed to encode JSON body: {}",
                    err
                )));
            }
        }
        self
    }

    /// Trailers sent after a buffered body. For streaming bodies pass them to
    /// `BodySender::close` instead.
    pub fn trailer(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.trailers.push(Header::new(name, value));
        self
    }

    pub fn build(self) -> Result<Request, ProtocolError> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let method = self.method.to_uppercase();
        if method.is_empty() || method.contains(char::is_whitespace) {
            return Err(ProtocolError::MalformedHeaders(format!(
                "Invalid method: {:?}",
                self.method
            )));
        }

        let mut pseudo_headers = vec![Header::new(":method", method.clone())];
        let mut regular_headers = Vec::with_capacity(self.headers.len());

        for header in self.headers {
            // HTTP/2 requires lowercase field names
            let header = Header {
                name: header.name.to_lowercase(),
                value: header.value,
            };
            validate_header_name(&header)?;
            if header.is_pseudo() {
                pseudo_headers.retain(|h| h.name != header.name);
                pseudo_headers.push(header);
            } else {
                regular_headers.push(header);
            }
        }

        let has = |headers: &[Header], name: &str| headers.iter().any(|h| h.name == name);

        if method == "CONNECT" {
            // CONNECT carries only :method and :authority
            if !has(&pseudo_headers, ":authority") {
                let authority = self.authority.ok_or_else(|| {
                    ProtocolError::MalformedHeaders("CONNECT requires an authority".to_string())
                })?;
                pseudo_headers.push(Header::new(":authority", authority));
            }
            pseudo_headers.retain(|h| h.name != ":scheme" && h.name != ":path");
        } else {
            if !has(&pseudo_headers, ":scheme") {
                pseudo_headers.push(Header::new(":scheme", self.scheme));
            }
            if !has(&pseudo_headers, ":authority") {
                if let Some(authority) = self.authority {
                    pseudo_headers.push(Header::new(":authority", authority));
                }
            }
            if !has(&pseudo_headers, ":path") {
                pseudo_headers.push(Header::new(":path", self.path));
            }
        }

        ensure_user_agent(&mut regular_headers);

        let mut headers = pseudo_headers;
        headers.extend(regular_headers);

        let body = if self.trailers.is_empty() {
            self.body
        } else {
            self.body.with_trailers(self.trailers)
        };

        Ok(Request { headers, body })
    }
}

fn validate_header_name(header: &Header) -> Result<(), ProtocolError> {
    if header.name.is_empty() || header.name == ":" {
        return Err(ProtocolError::MalformedHeaders(
            "Empty header name".to_string(),
        ));
    }
    if header.name.contains(char::is_whitespace) {
        return Err(ProtocolError::MalformedHeaders(format!(
            "Header name contains whitespace: {}",
            header.name
        )));
    }
    Ok(())
}
