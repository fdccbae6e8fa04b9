pub mod body;
pub mod config;
pub mod error;
pub mod frame;
pub mod header;
pub mod request;
pub mod response;
pub mod timeouts;

pub use body::*;
pub use config::*;
pub use error::*;
pub use frame::*;
pub use header::*;
pub use request::*;
pub use response::*;
pub use timeouts::*;
