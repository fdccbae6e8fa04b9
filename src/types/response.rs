use super::body::{Body, Collected};
use super::error::ProtocolError;
use super::Header;
use crate::utils::header_value;
use serde_json::Value;

#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<Header>,
    pub body: Body,
}

impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    /// Buffer the whole body together with any trailers.
    pub async fn collect(self) -> Result<Collected, ProtocolError> {
        self.body.collect().await
    }

    pub async fn text(self) -> Result<String, ProtocolError> {
        let collected = self.collect().await?;
        Ok(String::from_utf8_lossy(&collected.data).to_string())
    }

    pub async fn json(self) -> Result<Value, ProtocolError> {
        let collected = self.collect().await?;
        serde_json::from_slice(&collected.data)
            .map_err(|e| ProtocolError::InvalidResponse(format!("Invalid JSON body: {}", e)))
    }
}
