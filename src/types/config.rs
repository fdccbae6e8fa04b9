use super::error::ProtocolError;
use super::timeouts::ClientTimeouts;
use crate::h2::consts::{
    DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_CONCURRENT_STREAMS,
    DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_HEADER_LIST_SIZE, MAX_FRAME_SIZE_UPPER_BOUND,
    MAX_STREAM_ID, MAX_WINDOW_SIZE,
};

/// SETTINGS this endpoint advertises during the handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalSettings {
    pub header_table_size: u32,
    pub max_concurrent_streams: u32,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: u32,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            header_table_size: DEFAULT_HEADER_TABLE_SIZE,
            max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: DEFAULT_MAX_HEADER_LIST_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    /// First locally initiated stream id; must be odd.
    pub initial_stream_id: u32,
    /// Upper bound on the payload of each outbound DATA frame.
    pub max_data_frame_size: usize,
    pub timeouts: ClientTimeouts,
    pub settings: LocalSettings,
    /// Skip TLS certificate verification when connecting.
    pub accept_invalid_certs: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            initial_stream_id: 1,
            max_data_frame_size: DEFAULT_MAX_FRAME_SIZE as usize,
            timeouts: ClientTimeouts::default(),
            settings: LocalSettings::default(),
            accept_invalid_certs: false,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.initial_stream_id % 2 == 0 || self.initial_stream_id > MAX_STREAM_ID {
            return Err(ProtocolError::InvalidConfig(format!(
                "initial_stream_id must be an odd number <= {}, got {}",
                MAX_STREAM_ID, self.initial_stream_id
            )));
        }

        if self.max_data_frame_size == 0
            || self.max_data_frame_size > MAX_FRAME_SIZE_UPPER_BOUND as usize
        {
            return Err(ProtocolError::InvalidConfig(format!(
                "max_data_frame_size must be in 1..={}, got {}",
                MAX_FRAME_SIZE_UPPER_BOUND, self.max_data_frame_size
            )));
        }

        let max_frame = self.settings.max_frame_size;
        if !(DEFAULT_MAX_FRAME_SIZE..=MAX_FRAME_SIZE_UPPER_BOUND).contains(&max_frame) {
            return Err(ProtocolError::InvalidConfig(format!(
                "settings.max_frame_size must be in {}..={}, got {}",
                DEFAULT_MAX_FRAME_SIZE, MAX_FRAME_SIZE_UPPER_BOUND, max_frame
            )));
        }

        if self.settings.initial_window_size > MAX_WINDOW_SIZE {
            return Err(ProtocolError::InvalidConfig(format!(
                "settings.initial_window_size must be <= {}",
                MAX_WINDOW_SIZE
            )));
        }

        Ok(())
    }
}
