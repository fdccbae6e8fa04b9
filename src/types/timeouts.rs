use std::time::Duration;

/// Deadlines applied by the connection layer. Reads carry no deadline: the
/// read loop legitimately idles while no response is outstanding.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientTimeouts {
    /// TCP connect plus TLS handshake.
    pub connect: Option<Duration>,
    /// One frame write, flush included.
    pub write: Option<Duration>,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            connect: Some(Duration::from_secs(10)),
            write: Some(Duration::from_secs(30)),
        }
    }
}

impl ClientTimeouts {
    pub fn unbounded() -> Self {
        Self {
            connect: None,
            write: None,
        }
    }

    pub fn with_connect(mut self, connect: Duration) -> Self {
        self.connect = Some(connect);
        self
    }

    pub fn with_write(mut self, write: Duration) -> Self {
        self.write = Some(write);
        self
    }
}
